//! Recursive-descent marshal reader.

use std::sync::Arc;

use tracing::trace;

use super::{tag, InternTable, Node, Value};
use crate::{
    blob::Blob,
    code::{self, SharedViews},
    cursor::{Cursor, LenWidth},
    error::{ErrorKind, ParseError, ParseResult},
    magic::FormatRevision,
    options::ParseOptions,
    Span,
};

/// Marshal decoder over a cursor, owning the intern table of one parse.
#[derive(Debug)]
pub struct Decoder<'a, B: Blob + ?Sized> {
    cursor: Cursor<'a, B>,
    revision: &'static FormatRevision,
    interns: InternTable,
    views: SharedViews,
    max_depth: usize,
    disassemble: bool,
    depth: usize,
}

impl<'a, B: Blob + ?Sized> Decoder<'a, B> {
    /// Decoder reading `revision`'s marshal dialect from `cursor`.
    pub fn new(cursor: Cursor<'a, B>, revision: &'static FormatRevision, options: &ParseOptions) -> Self {
        Self {
            cursor,
            revision,
            interns: InternTable::new(),
            views: SharedViews::default(),
            max_depth: options.max_depth,
            disassemble: options.disassemble,
            depth: 0,
        }
    }

    /// Absolute offset of the next byte.
    pub const fn offset(&self) -> u64 { self.cursor.offset() }

    /// Revision being decoded.
    pub const fn revision(&self) -> &'static FormatRevision { self.revision }

    /// Objects interned so far.
    pub const fn interns(&self) -> &InternTable { &self.interns }

    /// Gives the cursor and intern table back.
    pub fn into_parts(self) -> (Cursor<'a, B>, InternTable) { (self.cursor, self.interns) }

    pub(crate) fn cursor_mut(&mut self) -> &mut Cursor<'a, B> { &mut self.cursor }

    pub(crate) fn views_mut(&mut self) -> (&InternTable, &mut SharedViews) { (&self.interns, &mut self.views) }

    pub(crate) const fn disassembles(&self) -> bool { self.disassemble }

    /// Reads one complete object.
    pub fn read_object(&mut self) -> ParseResult<Node> {
        let start = self.cursor.offset();
        if self.depth >= self.max_depth {
            return Err(ParseError::new(ErrorKind::DepthExceeded { limit: self.max_depth }, start));
        }
        self.depth += 1;
        let node = self.read_tagged(start);
        self.depth -= 1;
        node
    }

    fn read_tagged(&mut self, start: u64) -> ParseResult<Node> {
        let raw = self.cursor.read_u8()?;
        let refs = self.revision.has_ref_flags();
        let kind = if refs { raw & !tag::FLAG_REF } else { raw };
        let flagged = kind != raw;
        trace!(offset = start, tag = %char::from(kind), flagged, depth = self.depth, "marshal object");

        let registers = if refs {
            flagged
                && !matches!(
                    kind,
                    tag::NULL | tag::NONE | tag::FALSE | tag::TRUE | tag::STOPITER | tag::ELLIPSIS | tag::REF
                )
        } else {
            kind == tag::INTERNED
        };
        let slot = registers.then(|| self.interns.reserve());

        let value = self.read_payload(raw, kind, start)?;
        let node = Node::new(Span::new(start, self.cursor.offset()), slot, value);
        if let Some(slot) = slot {
            self.interns.fill(slot, node.clone());
        }
        Ok(node)
    }

    fn read_payload(&mut self, raw: u8, kind: u8, start: u64) -> ParseResult<Value> {
        let refs = self.revision.has_ref_flags();
        let value = match kind {
            tag::NULL => return Err(ParseError::malformed("NULL object outside a dict", start)),
            tag::NONE => Value::None,
            tag::FALSE => Value::Bool(false),
            tag::TRUE => Value::Bool(true),
            tag::STOPITER => Value::StopIteration,
            tag::ELLIPSIS => Value::Ellipsis,
            tag::INT => Value::Int(self.cursor.read_i32()?),
            tag::LONG => self.read_long()?,
            tag::FLOAT => Value::Float(self.read_text_float()?),
            tag::BINARY_FLOAT => Value::Float(self.cursor.read_f64()?),
            tag::COMPLEX => {
                let re = self.read_text_float()?;
                Value::Complex { re, im: self.read_text_float()? }
            }
            tag::BINARY_COMPLEX => {
                let re = self.cursor.read_f64()?;
                Value::Complex { re, im: self.cursor.read_f64()? }
            }
            tag::STRING => Value::Bytes(self.cursor.read_cstring_prefixed(LenWidth::U32)?.into()),
            tag::UNICODE | tag::ASCII => self.read_str(LenWidth::U32, false)?,
            tag::INTERNED | tag::ASCII_INTERNED => self.read_str(LenWidth::U32, true)?,
            tag::SHORT_ASCII => self.read_str(LenWidth::U8, false)?,
            tag::SHORT_ASCII_INTERNED => self.read_str(LenWidth::U8, true)?,
            tag::TUPLE => {
                let n = self.read_count()?;
                Value::Tuple(self.read_seq(n)?)
            }
            tag::SMALL_TUPLE => {
                let n = usize::from(self.cursor.read_u8()?);
                Value::Tuple(self.read_seq(n)?)
            }
            tag::LIST => {
                let n = self.read_count()?;
                Value::List(self.read_seq(n)?)
            }
            tag::SET => {
                let n = self.read_count()?;
                Value::Set(self.read_seq(n)?)
            }
            tag::FROZENSET => {
                let n = self.read_count()?;
                Value::FrozenSet(self.read_seq(n)?)
            }
            tag::DICT => self.read_dict()?,
            tag::CODE => Value::Code(Arc::new(code::build(self, start)?)),
            tag::REF if refs => self.read_ref(start)?,
            tag::STRINGREF if !refs => self.read_ref(start)?,
            _ => return Err(ParseError::new(ErrorKind::UnknownTag { tag: raw }, start)),
        };
        Ok(value)
    }

    fn read_ref(&mut self, start: u64) -> ParseResult<Value> {
        let index = self.cursor.read_u32()?;
        self.interns.resolve(index, start)?;
        Ok(Value::Ref(index))
    }

    fn read_count(&mut self) -> ParseResult<usize> {
        let at = self.cursor.offset();
        let n = self.cursor.read_i32()?;
        usize::try_from(n).map_err(|_| ParseError::malformed("negative element count", at))
    }

    fn capacity(&self, n: usize) -> usize { n.min(usize::try_from(self.cursor.peek_remaining()).unwrap_or(usize::MAX)) }

    fn read_seq(&mut self, n: usize) -> ParseResult<Arc<[Node]>> {
        let mut items = Vec::with_capacity(self.capacity(n));
        for _ in 0..n {
            items.push(self.read_object()?);
        }
        Ok(items.into())
    }

    fn read_dict(&mut self) -> ParseResult<Value> {
        let mut pairs = Vec::new();
        loop {
            let next = self.cursor.peek_u8()?;
            let next = if self.revision.has_ref_flags() { next & !tag::FLAG_REF } else { next };
            if next == tag::NULL {
                self.cursor.read_u8()?;
                break;
            }
            let key = self.read_object()?;
            let value = self.read_object()?;
            pairs.push((key, value));
        }
        Ok(Value::Dict(pairs.into()))
    }

    fn read_long(&mut self) -> ParseResult<Value> {
        let at = self.cursor.offset();
        let n = self.cursor.read_i32()?;
        let count = n.unsigned_abs() as usize;
        let mut digits = Vec::with_capacity(self.capacity(count) / 2);
        for _ in 0..count {
            let digit_at = self.cursor.offset();
            let d = self.cursor.read_u16()?;
            if d >= 1 << 15 {
                return Err(ParseError::malformed("long digit out of range", digit_at));
            }
            digits.push(d);
        }
        if digits.last() == Some(&0) {
            return Err(ParseError::malformed("long with a zero top digit", at));
        }
        Ok(Value::Long { negative: n < 0, digits })
    }

    fn read_text_float(&mut self) -> ParseResult<f64> {
        let at = self.cursor.offset();
        let raw = self.cursor.read_cstring_prefixed(LenWidth::U8)?;
        std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .ok_or_else(|| ParseError::malformed("unparsable float text", at))
    }

    fn read_str(&mut self, width: LenWidth, interned: bool) -> ParseResult<Value> {
        let raw = self.cursor.read_cstring_prefixed(width)?;
        Ok(Value::Str { text: String::from_utf8_lossy(&raw).into(), interned })
    }
}
