//! Parse configuration.

#[cfg(feature = "serde")]
use serde::Serialize;

/// Knobs for one parse invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ParseOptions {
    /// Maximum marshal nesting depth before [`crate::ErrorKind::DepthExceeded`].
    pub max_depth: usize,
    /// Maximum characters of string/bytes previews in chunk labels.
    pub label_limit: usize,
    /// Disassemble code objects and emit one chunk per instruction.
    pub disassemble: bool,
}

impl Default for ParseOptions {
    fn default() -> Self { Self { max_depth: 64, label_limit: 64, disassemble: true } }
}

impl ParseOptions {
    /// Same options with disassembly switched on or off.
    #[must_use]
    pub const fn with_disassemble(mut self, on: bool) -> Self {
        self.disassemble = on;
        self
    }

    /// Same options with another depth ceiling.
    #[must_use]
    pub const fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}
