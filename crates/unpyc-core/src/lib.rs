//! unpyc-core — reconstruction structurée de fichiers `.pyc`
//!
//! Provides:
//! - [`magic`]: registry of known pyc format revisions, keyed by their 4-byte magic
//! - [`cursor`]: bounds-checked little-endian reader with absolute offsets
//! - [`marshal`]: recursive marshal decoder, intern table, reference encoder
//! - [`code`]: code-object builder (fields, name lists, line table)
//! - [`disasm`]: opcode-table driven disassembler with `EXTENDED_ARG` folding
//! - [`chunk`]: nested, addressed annotations emitted over the original blob
//! - [`parser`]: the `pyc3` format parser hook and the `parse`/`unpyc_blob` entry points
//!
//! The whole pipeline is a pure function of `(blob bytes, start offset)`; the only
//! side effect is a single [`blob::ChunkStore::attach_chunks`] call on success.
//!
//! Features:
//! - `serde` (default): `Serialize` on chunks, spans, instructions and options

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

#[cfg(feature = "serde")]
use serde::Serialize;

/* ─────────────────────────── Modules publics ─────────────────────────── */

pub mod blob;
pub mod chunk;
pub mod code;
pub mod cursor;
pub mod disasm;
pub mod error;
pub mod magic;
pub mod marshal;
pub mod opcodes;
pub mod options;
pub mod parser;

pub use blob::{Blob, BlobStore, ChunkStore, MemoryBlob};
pub use chunk::{Chunk, ChunkKind};
pub use code::CodeObject;
pub use cursor::Cursor;
pub use disasm::{disassemble, Instruction};
pub use error::{ErrorKind, ParseError, ParseResult};
pub use magic::FormatRevision;
pub use marshal::{InternTable, Node, Value};
pub use options::ParseOptions;
pub use parser::{parse, unpyc_blob, FormatParser, ParsedPyc, PycHeader, PycParser};

/* ─────────────────────────── Spans ─────────────────────────── */

/// Half-open byte range `[start, end)`, in absolute blob offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Span {
    /// First byte (inclusive).
    pub start: u64,
    /// One past the last byte.
    pub end: u64,
}

impl Span {
    /// Creates a span.
    pub const fn new(start: u64, end: u64) -> Self { Self { start, end } }
    /// Length in bytes.
    pub const fn len(&self) -> u64 { self.end.saturating_sub(self.start) }
    /// True when the span covers no byte.
    pub const fn is_empty(&self) -> bool { self.start >= self.end }
    /// True if `offset` falls inside the span.
    pub const fn contains(&self, offset: u64) -> bool { self.start <= offset && offset < self.end }
    /// Smallest span covering both `self` and `other`.
    pub fn join(self, other: Self) -> Self {
        Self { start: self.start.min(other.start), end: self.end.max(other.end) }
    }
}

/// A value together with the bytes it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Spanned<T> {
    /// The value.
    pub value: T,
    /// Where it was read.
    pub span: Span,
}

impl<T> Spanned<T> {
    /// Builds a `Spanned<T>`.
    pub const fn new(value: T, span: Span) -> Self { Self { value, span } }
    /// Applies `f` to the value and keeps the span.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> { Spanned { value: f(self.value), span: self.span } }
}

/* ─────────────────────────── Prélude ─────────────────────────── */

/// Convenience re-exports of the types most callers need.
pub mod prelude {
    pub use super::{
        parse, unpyc_blob, Blob, BlobStore, Chunk, ChunkKind, ChunkStore, CodeObject, FormatParser,
        FormatRevision, Instruction, MemoryBlob, ParseError, ParseOptions, ParseResult, ParsedPyc,
        PycParser, Span, Spanned, Value,
    };
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(4, 9);
        assert_eq!(s.len(), 5);
        assert!(s.contains(4));
        assert!(!s.contains(9));
        assert!(Span::new(3, 3).is_empty());
        assert_eq!(s.join(Span::new(1, 5)), Span::new(1, 9));
    }

    #[test]
    fn spanned_map_keeps_span() {
        let v = Spanned::new(21_u32, Span::new(0, 4)).map(|x| x * 2);
        assert_eq!(v.value, 42);
        assert_eq!(v.span, Span::new(0, 4));
    }
}
