//! Parse failures.
//!
//! Every failure carries the absolute blob offset at which it was detected.
//! Malformed input is an ordinary outcome for a format probed against arbitrary
//! files, so all of these are plain values, never panics.

use std::borrow::Cow;

use thiserror::Error;

/// Result alias shared by the whole core.
pub type ParseResult<T> = Result<T, ParseError>;

/// What went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// A read needed more bytes than the blob (or the cursor bound) holds.
    #[error("unexpected end of data: need {needed} bytes, {available} available")]
    UnexpectedEnd {
        /// Bytes requested by the read.
        needed: u64,
        /// Bytes that were left.
        available: u64,
    },

    /// Unrecognized marshal type byte.
    #[error("unknown marshal tag 0x{tag:02X}")]
    UnknownTag {
        /// Raw tag byte, flag bit included.
        tag: u8,
    },

    /// Back-reference to an index that is out of range or not yet complete.
    #[error("malformed back-reference #{index} (intern table holds {len} entries)")]
    MalformedReference {
        /// Requested index.
        index: u32,
        /// Entries present when the reference was read.
        len: u32,
    },

    /// Instruction stream ends mid-operand or on a dangling `EXTENDED_ARG`.
    #[error("truncated instruction at code offset {at}")]
    TruncatedInstruction {
        /// Offset inside the instruction stream.
        at: u32,
    },

    /// The revision is registered but carries no opcode table.
    #[error("no opcode table registered for revision {label}")]
    UnsupportedRevision {
        /// Revision label, e.g. `3.6`.
        label: &'static str,
    },

    /// Structurally impossible value (negative size, bad float text, wrong field shape…).
    #[error("malformed value: {0}")]
    MalformedValue(Cow<'static, str>),

    /// Nesting deeper than [`crate::ParseOptions::max_depth`].
    #[error("nesting deeper than {limit} levels")]
    DepthExceeded {
        /// Configured limit.
        limit: usize,
    },

    /// No registered revision matches the magic prefix.
    #[error("magic {found:02X?} not recognized")]
    NotRecognized {
        /// The bytes that were compared.
        found: Vec<u8>,
    },
}

impl ErrorKind {
    /// Builds a [`ErrorKind::MalformedValue`].
    pub fn malformed(msg: impl Into<Cow<'static, str>>) -> Self { Self::MalformedValue(msg.into()) }
}

/// A failure and where it happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at offset {offset:#x}")]
pub struct ParseError {
    /// Failure kind.
    pub kind: ErrorKind,
    /// Absolute offset in the blob.
    pub offset: u64,
}

impl ParseError {
    /// Creates an error.
    pub const fn new(kind: ErrorKind, offset: u64) -> Self { Self { kind, offset } }

    /// Shorthand for a [`ErrorKind::MalformedValue`] error.
    pub fn malformed(msg: impl Into<Cow<'static, str>>, offset: u64) -> Self {
        Self::new(ErrorKind::malformed(msg), offset)
    }

    /// Failure kind.
    pub const fn kind(&self) -> &ErrorKind { &self.kind }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_offset() {
        let e = ParseError::new(ErrorKind::UnknownTag { tag: 0x3F }, 0x1c);
        assert_eq!(e.to_string(), "unknown marshal tag 0x3F at offset 0x1c");
    }

    #[test]
    fn malformed_shorthand() {
        let e = ParseError::malformed("negative length", 7);
        assert_eq!(e.kind(), &ErrorKind::MalformedValue("negative length".into()));
        assert_eq!(e.offset, 7);
    }
}
