//! Marshal object model, decoder and reference encoder.
//!
//! A marshalled stream is a single type byte followed by a payload, recursively.
//! Bit `0x80` of the type byte ([`tag::FLAG_REF`]) asks the reader to remember the
//! object in the per-parse [`InternTable`]; tag `r` later points back at it.

use std::{fmt::Write as _, sync::Arc};

use crate::{code::CodeObject, Span};

mod decoder;
mod intern;
mod writer;

pub use decoder::Decoder;
pub use intern::InternTable;
pub use writer::Writer;

/// Type bytes of the marshal format.
pub mod tag {
    /// Dict terminator.
    pub const NULL: u8 = b'0';
    /// `None`.
    pub const NONE: u8 = b'N';
    /// `False`.
    pub const FALSE: u8 = b'F';
    /// `True`.
    pub const TRUE: u8 = b'T';
    /// `StopIteration` singleton.
    pub const STOPITER: u8 = b'S';
    /// `Ellipsis` singleton.
    pub const ELLIPSIS: u8 = b'.';
    /// 32-bit signed integer.
    pub const INT: u8 = b'i';
    /// Arbitrary precision integer, base 2^15 digits.
    pub const LONG: u8 = b'l';
    /// Float as text (u8 length).
    pub const FLOAT: u8 = b'f';
    /// Float as IEEE-754 f64.
    pub const BINARY_FLOAT: u8 = b'g';
    /// Complex as two texts.
    pub const COMPLEX: u8 = b'x';
    /// Complex as two f64.
    pub const BINARY_COMPLEX: u8 = b'y';
    /// Byte string.
    pub const STRING: u8 = b's';
    /// Interned UTF-8 string.
    pub const INTERNED: u8 = b't';
    /// Legacy string back-reference (marshal versions below 3).
    pub const STRINGREF: u8 = b'R';
    /// Back-reference into the intern table.
    pub const REF: u8 = b'r';
    /// UTF-8 string.
    pub const UNICODE: u8 = b'u';
    /// ASCII string (u32 length).
    pub const ASCII: u8 = b'a';
    /// Interned ASCII string (u32 length).
    pub const ASCII_INTERNED: u8 = b'A';
    /// ASCII string (u8 length).
    pub const SHORT_ASCII: u8 = b'z';
    /// Interned ASCII string (u8 length).
    pub const SHORT_ASCII_INTERNED: u8 = b'Z';
    /// Tuple (u32 count).
    pub const TUPLE: u8 = b'(';
    /// Tuple (u8 count).
    pub const SMALL_TUPLE: u8 = b')';
    /// List.
    pub const LIST: u8 = b'[';
    /// Dict, pairs until [`NULL`].
    pub const DICT: u8 = b'{';
    /// Set.
    pub const SET: u8 = b'<';
    /// Frozenset.
    pub const FROZENSET: u8 = b'>';
    /// Code object.
    pub const CODE: u8 = b'c';
    /// Placeholder for unmarshallable objects; always rejected.
    pub const UNKNOWN: u8 = b'?';
    /// "Remember me" bit.
    pub const FLAG_REF: u8 = 0x80;
}

/* ─────────────────────────── Values ─────────────────────────── */

/// A decoded marshal object.
///
/// Payloads are reference counted: cloning a value (into the intern table, or
/// into the resolved views of a code object) never copies a subtree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `None`.
    None,
    /// `True` / `False`.
    Bool(bool),
    /// `StopIteration`.
    StopIteration,
    /// `...`.
    Ellipsis,
    /// Small integer.
    Int(i32),
    /// Big integer: sign and base-2^15 digits, least significant first.
    Long {
        /// Sign.
        negative: bool,
        /// Digits, each `< 2^15`, last one non-zero.
        digits: Vec<u16>,
    },
    /// Float.
    Float(f64),
    /// Complex number.
    Complex {
        /// Real part.
        re: f64,
        /// Imaginary part.
        im: f64,
    },
    /// Byte string (also raw instruction bytes and line tables).
    Bytes(Arc<[u8]>),
    /// Text string.
    Str {
        /// Contents.
        text: Arc<str>,
        /// Written with an interned tag.
        interned: bool,
    },
    /// Tuple.
    Tuple(Arc<[Node]>),
    /// List.
    List(Arc<[Node]>),
    /// Set.
    Set(Arc<[Node]>),
    /// Frozenset.
    FrozenSet(Arc<[Node]>),
    /// Dict, insertion order.
    Dict(Arc<[(Node, Node)]>),
    /// Code object.
    Code(Arc<CodeObject>),
    /// Back-reference to intern slot `n` (non-owning).
    Ref(u32),
}

/// A value with the bytes it was decoded from and its intern slot, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Tag byte through end of payload.
    pub span: Span,
    /// Intern-table slot this object was registered under.
    pub slot: Option<u32>,
    /// Decoded value.
    pub value: Value,
}

impl Node {
    /// Creates a node.
    pub const fn new(span: Span, slot: Option<u32>, value: Value) -> Self { Self { span, slot, value } }

    /// Structural equality ignoring spans and slots.
    pub fn content_eq(&self, other: &Self) -> bool { self.value.content_eq(&other.value) }
}

fn seq_eq(a: &[Node], b: &[Node]) -> bool { a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.content_eq(y)) }

impl Value {
    /// Short type name (`tuple`, `str`, `code`…).
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::StopIteration => "StopIteration",
            Self::Ellipsis => "ellipsis",
            Self::Int(_) | Self::Long { .. } => "int",
            Self::Float(_) => "float",
            Self::Complex { .. } => "complex",
            Self::Bytes(_) => "bytes",
            Self::Str { .. } => "str",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::FrozenSet(_) => "frozenset",
            Self::Dict(_) => "dict",
            Self::Code(_) => "code",
            Self::Ref(_) => "ref",
        }
    }

    /// Whether the value owns child nodes.
    pub const fn is_container(&self) -> bool {
        matches!(self, Self::Tuple(_) | Self::List(_) | Self::Set(_) | Self::FrozenSet(_) | Self::Dict(_))
    }

    /// Child nodes of a sequence-like container.
    pub fn elements(&self) -> Option<&[Node]> {
        match self {
            Self::Tuple(v) | Self::List(v) | Self::Set(v) | Self::FrozenSet(v) => Some(v),
            _ => None,
        }
    }

    /// Text of a `str` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Structural equality ignoring spans and slots; floats compare by bits.
    pub fn content_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Complex { re: a, im: b }, Self::Complex { re: c, im: d }) => {
                a.to_bits() == c.to_bits() && b.to_bits() == d.to_bits()
            }
            (Self::Tuple(a), Self::Tuple(b))
            | (Self::List(a), Self::List(b))
            | (Self::Set(a), Self::Set(b))
            | (Self::FrozenSet(a), Self::FrozenSet(b)) => seq_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|((k1, v1), (k2, v2))| k1.content_eq(k2) && v1.content_eq(v2))
            }
            (Self::Code(a), Self::Code(b)) => a.content_eq(b),
            _ => self == other,
        }
    }

    /// Big integer as `i128` when it fits.
    pub fn long_to_i128(negative: bool, digits: &[u16]) -> Option<i128> {
        if digits.len() * 15 > 126 {
            return None;
        }
        let magnitude = digits.iter().rev().fold(0_i128, |acc, &d| (acc << 15) | i128::from(d));
        Some(if negative { -magnitude } else { magnitude })
    }

    /// Repr-like one-line summary; strings and bytes are cut after `limit` characters.
    pub fn summary(&self, limit: usize) -> String {
        match self {
            Self::None => "None".into(),
            Self::Bool(b) => String::from(if *b { "True" } else { "False" }),
            Self::StopIteration => "StopIteration".into(),
            Self::Ellipsis => "Ellipsis".into(),
            Self::Int(n) => n.to_string(),
            Self::Long { negative, digits } => Self::long_to_i128(*negative, digits)
                .map_or_else(|| format!("<int, {} digits>", digits.len()), |n| n.to_string()),
            Self::Float(f) => format!("{f:?}"),
            Self::Complex { re, im } => {
                let sign = if im.is_sign_negative() { "" } else { "+" };
                format!("({re:?}{sign}{im:?}j)")
            }
            Self::Bytes(b) => bytes_repr(b, limit),
            Self::Str { text, .. } => str_repr(text, limit),
            Self::Tuple(v) | Self::List(v) | Self::Set(v) | Self::FrozenSet(v) => {
                format!("{}({})", self.type_name(), v.len())
            }
            Self::Dict(v) => format!("dict({})", v.len()),
            Self::Code(c) => format!("<code {}>", c.name),
            Self::Ref(i) => format!("ref #{i}"),
        }
    }
}

fn str_repr(text: &str, limit: usize) -> String {
    let mut out = String::from("'");
    for (n, ch) in text.chars().enumerate() {
        if n == limit {
            out.push_str("...");
            break;
        }
        match ch {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => out.extend(c.escape_default()),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn bytes_repr(bytes: &[u8], limit: usize) -> String {
    let mut out = String::from("b'");
    for (n, &b) in bytes.iter().enumerate() {
        if n == limit {
            out.push_str("...");
            break;
        }
        match b {
            b'\'' => out.push_str("\\'"),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7E => out.push(char::from(b)),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push('\'');
    out
}
