//! Code objects: fixed fields, marshalled members and their resolved views.
//!
//! [`build`] runs with the decoder positioned just after a `c` tag and recurses
//! back into [`Decoder::read_object`] for every marshalled member, so nested code
//! objects in the constant pool are complete by the time the outer one is.
//!
//! Views share their storage with the decoded nodes. A member reached through a
//! back-reference is resolved once per parse: name lists and disassembly are kept
//! per intern slot in [`SharedViews`].

use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    blob::Blob,
    disasm::{disassemble, Instruction},
    error::{ParseError, ParseResult},
    magic::FormatRevision,
    marshal::{Decoder, InternTable, Node, Value},
    Span, Spanned,
};

/// Marshalled members of a code object, exactly as read (references unresolved).
#[derive(Debug, Clone, PartialEq)]
pub struct CodeNodes {
    /// Raw instruction bytes.
    pub code: Node,
    /// Constant pool.
    pub consts: Node,
    /// Global / attribute names.
    pub names: Node,
    /// Local variable names.
    pub varnames: Node,
    /// Free variable names.
    pub freevars: Node,
    /// Cell variable names.
    pub cellvars: Node,
    /// Source file name.
    pub filename: Node,
    /// Declared name.
    pub name: Node,
    /// Compact line-number table.
    pub lnotab: Node,
}

/// One compiled unit.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeObject {
    /// Positional argument count.
    pub argcount: Spanned<u32>,
    /// Positional-only argument count (3.8+).
    pub posonlyargcount: Option<Spanned<u32>>,
    /// Keyword-only argument count.
    pub kwonlyargcount: Spanned<u32>,
    /// Number of locals.
    pub nlocals: Spanned<u32>,
    /// Stack size hint.
    pub stacksize: Spanned<u32>,
    /// `CO_*` flags.
    pub flags: Spanned<u32>,
    /// First source line.
    pub firstlineno: Spanned<u32>,
    /// Members as read.
    pub nodes: CodeNodes,

    /// Instruction bytes.
    pub bytecode: Arc<[u8]>,
    /// Absolute offset of the instruction bytes when stored inline (not behind a reference).
    pub bytecode_offset: Option<u64>,
    /// Constant pool items as stored; back-references stay unresolved (see [`CodeObject::constant`]).
    pub constants: Arc<[Node]>,
    /// `co_names`.
    pub names: Arc<[Arc<str>]>,
    /// `co_varnames`.
    pub varnames: Arc<[Arc<str>]>,
    /// `co_freevars`.
    pub freevars: Arc<[Arc<str>]>,
    /// `co_cellvars`.
    pub cellvars: Arc<[Arc<str>]>,
    /// `co_filename`.
    pub filename: Arc<str>,
    /// `co_name`.
    pub name: Arc<str>,
    /// Line table bytes.
    pub lnotab: Arc<[u8]>,
    /// Line deltas are signed (3.6+).
    pub signed_line_deltas: bool,
    /// Disassembly (empty when disassembly is switched off).
    pub instructions: Arc<[Instruction]>,
}

/// Views already computed for interned members, by intern slot.
#[derive(Debug, Default)]
pub(crate) struct SharedViews {
    strings: HashMap<u32, Arc<[Arc<str>]>>,
    listings: HashMap<u32, Arc<[Instruction]>>,
}

fn read_field<B: Blob + ?Sized>(dec: &mut Decoder<'_, B>) -> ParseResult<Spanned<u32>> {
    let at = dec.offset();
    let v = dec.cursor_mut().read_u32()?;
    Ok(Spanned::new(v, Span::new(at, at + 4)))
}

/// Reads the body of a code object. `start` is the offset of its tag.
pub(crate) fn build<B: Blob + ?Sized>(dec: &mut Decoder<'_, B>, start: u64) -> ParseResult<CodeObject> {
    let revision = dec.revision();
    let argcount = read_field(dec)?;
    let posonlyargcount = if revision.code.posonly_args { Some(read_field(dec)?) } else { None };
    let kwonlyargcount = read_field(dec)?;
    let nlocals = read_field(dec)?;
    let stacksize = read_field(dec)?;
    let flags = read_field(dec)?;

    let code = dec.read_object()?;
    let consts = dec.read_object()?;
    let names = dec.read_object()?;
    let varnames = dec.read_object()?;
    let freevars = dec.read_object()?;
    let cellvars = dec.read_object()?;
    let filename = dec.read_object()?;
    let name = dec.read_object()?;
    let firstlineno = read_field(dec)?;
    let lnotab = dec.read_object()?;
    let nodes = CodeNodes { code, consts, names, varnames, freevars, cellvars, filename, name, lnotab };

    let disassembles = dec.disassembles();
    let (interns, views) = dec.views_mut();
    let (bytecode, bytecode_offset) = match &nodes.code.value {
        Value::Bytes(b) => (Arc::clone(b), Some(nodes.code.span.end - b.len() as u64)),
        _ => (bytes_of(&nodes.code, interns, "code")?, None),
    };
    let constants = elements_of(&nodes.consts, interns, "consts")?;
    let names = views.strings(&nodes.names, interns, "names")?;
    let varnames = views.strings(&nodes.varnames, interns, "varnames")?;
    let freevars = views.strings(&nodes.freevars, interns, "freevars")?;
    let cellvars = views.strings(&nodes.cellvars, interns, "cellvars")?;
    let filename = text_of(&nodes.filename, interns, "filename")?;
    let name = text_of(&nodes.name, interns, "name")?;
    let lnotab = bytes_of(&nodes.lnotab, interns, "lnotab")?;

    let instructions: Arc<[Instruction]> = if disassembles {
        let base = bytecode_offset.unwrap_or(nodes.code.span.start);
        views.listing(interns.deref(&nodes.code).slot, &bytecode, revision, base)?
    } else {
        Arc::new([])
    };
    debug!(offset = start, name = %name, instructions = instructions.len(), "code object");

    Ok(CodeObject {
        argcount,
        posonlyargcount,
        kwonlyargcount,
        nlocals,
        stacksize,
        flags,
        firstlineno,
        nodes,
        bytecode,
        bytecode_offset,
        constants,
        names,
        varnames,
        freevars,
        cellvars,
        filename,
        name,
        lnotab,
        signed_line_deltas: revision.code.signed_line_deltas,
        instructions,
    })
}

fn shape_error(node: &Node, field: &str, expected: &str) -> ParseError {
    ParseError::malformed(format!("code field `{field}` is {}, expected {expected}", node.value.type_name()), node.span.start)
}

fn bytes_of(node: &Node, interns: &InternTable, field: &str) -> ParseResult<Arc<[u8]>> {
    match &interns.deref(node).value {
        Value::Bytes(b) => Ok(Arc::clone(b)),
        _ => Err(shape_error(node, field, "bytes")),
    }
}

fn elements_of(node: &Node, interns: &InternTable, field: &str) -> ParseResult<Arc<[Node]>> {
    match &interns.deref(node).value {
        Value::Tuple(items) => Ok(Arc::clone(items)),
        _ => Err(shape_error(node, field, "a tuple")),
    }
}

fn text_of(node: &Node, interns: &InternTable, field: &str) -> ParseResult<Arc<str>> {
    match &interns.deref(node).value {
        Value::Str { text, .. } => Ok(Arc::clone(text)),
        Value::Bytes(b) => Ok(String::from_utf8_lossy(b).into()),
        _ => Err(shape_error(node, field, "a string")),
    }
}

/// Walks `(byte increment, line increment)` pairs; offsets saturate at `u32::MAX`.
fn line_starts(pairs: impl Iterator<Item = (u8, u8)>, first_line: i64, signed: bool) -> Vec<(u32, i64)> {
    let mut out = Vec::new();
    let mut addr = 0_u32;
    let mut line = first_line;
    let mut last = None;
    for (byte_incr, line_incr) in pairs {
        if byte_incr != 0 {
            if last != Some(line) {
                out.push((addr, line));
                last = Some(line);
            }
            addr = addr.saturating_add(u32::from(byte_incr));
        }
        line += if signed { i64::from(i8::from_ne_bytes([line_incr])) } else { i64::from(line_incr) };
    }
    if last != Some(line) {
        out.push((addr, line));
    }
    out
}

impl SharedViews {
    fn strings(&mut self, node: &Node, interns: &InternTable, field: &str) -> ParseResult<Arc<[Arc<str>]>> {
        let slot = interns.deref(node).slot;
        if let Some(hit) = slot.and_then(|s| self.strings.get(&s)) {
            return Ok(Arc::clone(hit));
        }
        let list: Arc<[Arc<str>]> =
            elements_of(node, interns, field)?.iter().map(|n| text_of(n, interns, field)).collect::<ParseResult<_>>()?;
        if let Some(s) = slot {
            self.strings.insert(s, Arc::clone(&list));
        }
        Ok(list)
    }

    fn listing(
        &mut self,
        slot: Option<u32>,
        bytecode: &[u8],
        revision: &FormatRevision,
        base: u64,
    ) -> ParseResult<Arc<[Instruction]>> {
        if let Some(hit) = slot.and_then(|s| self.listings.get(&s)) {
            return Ok(Arc::clone(hit));
        }
        let listing: Arc<[Instruction]> = disassemble(bytecode, revision, base)?.into();
        if let Some(s) = slot {
            self.listings.insert(s, Arc::clone(&listing));
        }
        Ok(listing)
    }
}

impl CodeObject {
    /// Code objects stored directly in the constant pool.
    ///
    /// A code object reached through a back-reference is not repeated, so
    /// [`CodeObject::tree`] visits every decoded code object once.
    pub fn nested(&self) -> impl Iterator<Item = &Self> + '_ {
        self.constants.iter().filter_map(|n| match &n.value {
            Value::Code(c) => Some(&**c),
            _ => None,
        })
    }

    /// Constant `index`, following a back-reference one level.
    pub fn constant<'a>(&'a self, index: usize, interns: &'a InternTable) -> Option<&'a Node> {
        self.constants.get(index).map(|n| interns.deref(n))
    }

    /// This object and every nested one, pre-order, with their nesting depth.
    pub fn tree(&self) -> Vec<(usize, &Self)> {
        let mut out = Vec::new();
        let mut stack = vec![(0, self)];
        while let Some((depth, code)) = stack.pop() {
            out.push((depth, code));
            let children: Vec<&Self> = code.nested().collect();
            stack.extend(children.into_iter().rev().map(|c| (depth + 1, c)));
        }
        out
    }

    /// Name of cell-or-free variable `index` (`co_cellvars + co_freevars`).
    pub fn free_name(&self, index: usize) -> Option<&str> {
        let cells = self.cellvars.len();
        let name = if index < cells { self.cellvars.get(index) } else { self.freevars.get(index - cells) };
        name.map(|n| &**n)
    }

    /// `(instruction offset, line)` pairs where a new line starts.
    pub fn line_table(&self) -> Vec<(u32, i64)> {
        let pairs = self.lnotab.chunks_exact(2).map(|p| (p[0], p[1]));
        line_starts(pairs, i64::from(self.firstlineno.value), self.signed_line_deltas)
    }

    /// Structural equality ignoring spans, slots and derived views.
    pub fn content_eq(&self, other: &Self) -> bool {
        let meta = |c: &Self| {
            (
                c.argcount.value,
                c.posonlyargcount.as_ref().map(|p| p.value),
                c.kwonlyargcount.value,
                c.nlocals.value,
                c.stacksize.value,
                c.flags.value,
                c.firstlineno.value,
            )
        };
        let (a, b) = (&self.nodes, &other.nodes);
        meta(self) == meta(other)
            && a.code.content_eq(&b.code)
            && a.consts.content_eq(&b.consts)
            && a.names.content_eq(&b.names)
            && a.varnames.content_eq(&b.varnames)
            && a.freevars.content_eq(&b.freevars)
            && a.cellvars.content_eq(&b.cellvars)
            && a.filename.content_eq(&b.filename)
            && a.name.content_eq(&b.name)
            && a.lnotab.content_eq(&b.lnotab)
    }
}
