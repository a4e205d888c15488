//! Reference marshal encoder (counterpart of [`super::Decoder`]).
//!
//! Used to build fixtures and to check that decoding inverts encoding.

use std::collections::HashMap;

use super::{tag, Node, Value};
use crate::{
    code::CodeObject,
    magic::{FormatRevision, HeaderLayout},
};

/// Little-endian marshal writer for one marshal version.
#[derive(Debug, Clone)]
pub struct Writer {
    buf: Vec<u8>,
    version: u8,
    share_strings: bool,
    seen: HashMap<(String, bool), u32>,
    next_slot: u32,
}

impl Writer {
    /// Empty writer producing marshal version `version`.
    pub fn new(version: u8) -> Self {
        Self { buf: Vec::new(), version, share_strings: false, seen: HashMap::new(), next_slot: 0 }
    }

    /// Empty writer matching `revision`.
    pub fn for_revision(revision: &FormatRevision) -> Self { Self::new(revision.marshal_version) }

    /// Writes repeated strings once and back-references afterwards.
    #[must_use]
    pub fn sharing_strings(mut self) -> Self {
        self.share_strings = true;
        self
    }

    /// Bytes written so far.
    pub fn as_slice(&self) -> &[u8] { &self.buf }

    /// Consumes the writer.
    pub fn into_vec(self) -> Vec<u8> { self.buf }

    /// Current length.
    pub fn len(&self) -> usize { self.buf.len() }

    /// True if nothing was written.
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// Raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) { self.buf.extend_from_slice(bytes); }
    /// One byte.
    pub fn write_u8(&mut self, v: u8) { self.buf.push(v); }
    /// u16 LE.
    pub fn write_u16(&mut self, v: u16) { self.write_bytes(&v.to_le_bytes()); }
    /// u32 LE.
    pub fn write_u32(&mut self, v: u32) { self.write_bytes(&v.to_le_bytes()); }
    /// i32 LE.
    pub fn write_i32(&mut self, v: i32) { self.write_bytes(&v.to_le_bytes()); }
    /// u64 LE.
    pub fn write_u64(&mut self, v: u64) { self.write_bytes(&v.to_le_bytes()); }
    /// f64 LE.
    pub fn write_f64(&mut self, v: f64) { self.write_bytes(&v.to_le_bytes()); }

    /// Writes a type byte, with the "remember me" bit when `flag` is set and the
    /// version supports it. Returns the intern slot a reader will assign.
    pub fn write_tag(&mut self, kind: u8, flag: bool) -> Option<u32> {
        let refs = self.version >= 3;
        let registers = if refs { flag } else { kind == tag::INTERNED };
        self.write_u8(if refs && flag { kind | tag::FLAG_REF } else { kind });
        registers.then(|| {
            let slot = self.next_slot;
            self.next_slot += 1;
            slot
        })
    }

    /// Writes magic and header fields; `flags` is zero for 16-byte headers.
    pub fn write_header(&mut self, revision: &FormatRevision, mtime: u32, source_size: u32) {
        self.write_bytes(&revision.magic);
        if revision.header == HeaderLayout::FlagsThenMtimeOrHash {
            self.write_u32(0);
        }
        self.write_u32(mtime);
        if revision.header != HeaderLayout::Mtime {
            self.write_u32(source_size);
        }
    }

    /// Writes a hash-based 16-byte header (`flags = 1 | check_source << 1`).
    pub fn write_hashed_header(&mut self, revision: &FormatRevision, check_source: bool, hash: u64) {
        self.write_bytes(&revision.magic);
        self.write_u32(1 | (u32::from(check_source) << 1));
        self.write_u64(hash);
    }

    /// Writes a node, flagged when it carries an intern slot.
    pub fn write_node(&mut self, node: &Node) { self.write_flagged(&node.value, node.slot.is_some()); }

    /// Writes a value without the "remember me" bit.
    pub fn write_value(&mut self, value: &Value) { self.write_flagged(value, false); }

    fn write_len(&mut self, n: usize) { self.write_i32(i32::try_from(n).unwrap_or(i32::MAX)); }

    fn write_seq(&mut self, kind: u8, items: &[Node], flag: bool) {
        if kind == tag::TUPLE && self.version >= 4 && items.len() < 256 {
            self.write_tag(tag::SMALL_TUPLE, flag);
            self.write_u8(u8::try_from(items.len()).unwrap_or(u8::MAX));
        } else {
            self.write_tag(kind, flag);
            self.write_len(items.len());
        }
        for item in items {
            self.write_node(item);
        }
    }

    fn write_flagged(&mut self, value: &Value, flag: bool) {
        match value {
            Value::None => self.write_u8(tag::NONE),
            Value::Bool(true) => self.write_u8(tag::TRUE),
            Value::Bool(false) => self.write_u8(tag::FALSE),
            Value::StopIteration => self.write_u8(tag::STOPITER),
            Value::Ellipsis => self.write_u8(tag::ELLIPSIS),
            Value::Int(n) => {
                self.write_tag(tag::INT, flag);
                self.write_i32(*n);
            }
            Value::Long { negative, digits } => {
                self.write_tag(tag::LONG, flag);
                let n = i32::try_from(digits.len()).unwrap_or(i32::MAX);
                self.write_i32(if *negative { -n } else { n });
                for d in digits {
                    self.write_u16(*d);
                }
            }
            Value::Float(f) => {
                self.write_tag(tag::BINARY_FLOAT, flag);
                self.write_f64(*f);
            }
            Value::Complex { re, im } => {
                self.write_tag(tag::BINARY_COMPLEX, flag);
                self.write_f64(*re);
                self.write_f64(*im);
            }
            Value::Bytes(b) => {
                self.write_tag(tag::STRING, flag);
                self.write_len(b.len());
                self.write_bytes(b);
            }
            Value::Str { text, interned } => self.write_str(text, *interned, flag),
            Value::Tuple(items) => self.write_seq(tag::TUPLE, items, flag),
            Value::List(items) => self.write_seq(tag::LIST, items, flag),
            Value::Set(items) => self.write_seq(tag::SET, items, flag),
            Value::FrozenSet(items) => self.write_seq(tag::FROZENSET, items, flag),
            Value::Dict(pairs) => {
                self.write_tag(tag::DICT, flag);
                for (k, v) in pairs.iter() {
                    self.write_node(k);
                    self.write_node(v);
                }
                self.write_u8(tag::NULL);
            }
            Value::Code(code) => self.write_code(code, flag),
            Value::Ref(i) => {
                self.write_u8(if self.version >= 3 { tag::REF } else { tag::STRINGREF });
                self.write_u32(*i);
            }
        }
    }

    fn write_str(&mut self, text: &str, interned: bool, flag: bool) {
        let shared = self.share_strings && (self.version >= 3 || interned);
        if shared {
            if let Some(&slot) = self.seen.get(&(text.to_owned(), interned)) {
                self.write_flagged(&Value::Ref(slot), false);
                return;
            }
        }
        let kind = if interned { tag::INTERNED } else { tag::UNICODE };
        let slot = self.write_tag(kind, flag || shared);
        self.write_len(text.len());
        self.write_bytes(text.as_bytes());
        if let (true, Some(slot)) = (shared, slot) {
            self.seen.insert((text.to_owned(), interned), slot);
        }
    }

    fn write_code(&mut self, code: &CodeObject, flag: bool) {
        self.write_tag(tag::CODE, flag);
        self.write_u32(code.argcount.value);
        if let Some(p) = &code.posonlyargcount {
            self.write_u32(p.value);
        }
        for field in [&code.kwonlyargcount, &code.nlocals, &code.stacksize, &code.flags] {
            self.write_u32(field.value);
        }
        let n = &code.nodes;
        for node in [&n.code, &n.consts, &n.names, &n.varnames, &n.freevars, &n.cellvars, &n.filename, &n.name] {
            self.write_node(node);
        }
        self.write_u32(code.firstlineno.value);
        self.write_node(&n.lnotab);
    }
}
