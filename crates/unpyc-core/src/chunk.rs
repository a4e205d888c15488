//! Chunks: nested, labeled byte ranges over the original blob.
//!
//! The emitter turns a [`ParsedPyc`] into one chunk tree. Every range comes from
//! offsets recorded while decoding; nothing here reads the blob again.

use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;
use thiserror::Error;

use crate::{
    code::CodeObject,
    marshal::{InternTable, Node, Value},
    options::ParseOptions,
    parser::{ParsedPyc, PycHeader},
    Span, Spanned,
};

/// Semantic kind of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ChunkKind {
    /// Whole parsed region.
    File,
    /// File header.
    Header,
    /// One fixed-width field.
    Field,
    /// Marshal leaf value.
    MarshalScalar,
    /// Marshal tuple, list, set, frozenset or dict.
    MarshalContainer,
    /// Marshal back-reference.
    MarshalRef,
    /// Code object.
    CodeObject,
    /// Code object fixed fields.
    CodeMetadata,
    /// Constant pool.
    ConstantPool,
    /// `names`, `varnames`, `freevars`, `cellvars`.
    NameTable,
    /// Instruction bytes.
    InstructionList,
    /// One decoded instruction.
    Instruction,
    /// Line-number table.
    LineTable,
}

impl ChunkKind {
    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Header => "header",
            Self::Field => "field",
            Self::MarshalScalar => "marshal_scalar",
            Self::MarshalContainer => "marshal_container",
            Self::MarshalRef => "marshal_ref",
            Self::CodeObject => "code_object",
            Self::CodeMetadata => "code_metadata",
            Self::ConstantPool => "constant_pool",
            Self::NameTable => "name_table",
            Self::InstructionList => "instruction_list",
            Self::Instruction => "instruction",
            Self::LineTable => "line_table",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Labeled byte range `[start, end)` with ordered, non-overlapping children.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Chunk {
    /// First byte (absolute).
    pub start: u64,
    /// One past the last byte.
    pub end: u64,
    /// Semantic kind.
    pub kind: ChunkKind,
    /// Display label.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub label: Option<String>,
    /// Children sorted by `start`.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Vec::is_empty"))]
    pub children: Vec<Chunk>,
}

/// A violated nesting invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NestingError {
    /// `end < start`.
    #[error("chunk [{start:#x}, {end:#x}) ends before it starts")]
    Inverted {
        /// Start.
        start: u64,
        /// End.
        end: u64,
    },
    /// A child reaches outside its parent.
    #[error("child [{child_start:#x}, {child_end:#x}) escapes parent [{parent_start:#x}, {parent_end:#x})")]
    Escapes {
        /// Parent start.
        parent_start: u64,
        /// Parent end.
        parent_end: u64,
        /// Child start.
        child_start: u64,
        /// Child end.
        child_end: u64,
    },
    /// Two siblings overlap or are out of order.
    #[error("sibling at {next:#x} starts before the previous one ends at {prev_end:#x}")]
    Overlap {
        /// End of the earlier sibling.
        prev_end: u64,
        /// Start of the later sibling.
        next: u64,
    },
}

impl Chunk {
    /// Chunk without label nor children.
    pub const fn new(kind: ChunkKind, start: u64, end: u64) -> Self {
        Self { start, end, kind, label: None, children: Vec::new() }
    }

    /// Chunk covering `span`.
    pub const fn from_span(kind: ChunkKind, span: Span) -> Self { Self::new(kind, span.start, span.end) }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the children.
    #[must_use]
    pub fn with_children(mut self, children: Vec<Self>) -> Self {
        self.children = children;
        self
    }

    /// Covered range.
    pub const fn span(&self) -> Span { Span::new(self.start, self.end) }

    /// True if `offset` is inside `[start, end)`.
    pub const fn contains(&self, offset: u64) -> bool { self.start <= offset && offset < self.end }

    /// Chunks covering `offset`, from `self` down to the innermost. Empty if `self` does not cover it.
    pub fn find_path(&self, offset: u64) -> Vec<&Self> {
        let mut path = Vec::new();
        if !self.contains(offset) {
            return path;
        }
        let mut cur = self;
        loop {
            path.push(cur);
            let i = cur.children.partition_point(|c| c.end <= offset);
            match cur.children.get(i) {
                Some(c) if c.contains(offset) => cur = c,
                _ => break,
            }
        }
        path
    }

    /// Pre-order traversal yielding `(depth, chunk)`.
    pub fn walk(&self) -> Walk<'_> { Walk { stack: vec![(0, self)] } }

    /// Checks containment and sibling order over the whole subtree.
    pub fn check_nesting(&self) -> Result<(), NestingError> {
        if self.end < self.start {
            return Err(NestingError::Inverted { start: self.start, end: self.end });
        }
        let mut prev_end = None;
        for child in &self.children {
            if child.start < self.start || child.end > self.end {
                return Err(NestingError::Escapes {
                    parent_start: self.start,
                    parent_end: self.end,
                    child_start: child.start,
                    child_end: child.end,
                });
            }
            if let Some(prev_end) = prev_end.filter(|&e| e > child.start) {
                return Err(NestingError::Overlap { prev_end, next: child.start });
            }
            child.check_nesting()?;
            prev_end = Some(child.end);
        }
        Ok(())
    }

    /// Indented text rendering, one chunk per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (depth, c) in self.walk() {
            out.push_str(&format!("{:indent$}{c}\n", "", indent = depth * 2));
        }
        out
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}..{:#06x} {}", self.start, self.end, self.kind)?;
        if let Some(label) = &self.label {
            write!(f, " {label}")?;
        }
        Ok(())
    }
}

/// Iterator returned by [`Chunk::walk`].
#[derive(Debug, Clone)]
pub struct Walk<'a> {
    stack: Vec<(usize, &'a Chunk)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a Chunk);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, chunk) = self.stack.pop()?;
        self.stack.extend(chunk.children.iter().rev().map(|c| (depth + 1, c)));
        Some((depth, chunk))
    }
}

/* ─────────────────────────── Emission ─────────────────────────── */

/// Builds the chunk tree of a parsed file.
pub(crate) fn emit(parsed: &ParsedPyc, options: &ParseOptions) -> Chunk {
    let e = Emitter { interns: &parsed.interns, limit: options.label_limit, instructions: options.disassemble };
    Chunk::from_span(ChunkKind::File, parsed.span)
        .with_label(format!("pyc {}", parsed.revision.label))
        .with_children(vec![e.header(&parsed.header, parsed.revision.label), e.node(&parsed.root, None)])
}

struct Emitter<'a> {
    interns: &'a InternTable,
    limit: usize,
    instructions: bool,
}

fn field<T: fmt::Display>(name: &str, f: &Spanned<T>) -> Chunk {
    Chunk::from_span(ChunkKind::Field, f.span).with_label(format!("{name} = {}", f.value))
}

impl Emitter<'_> {
    fn header(&self, h: &PycHeader, label: &str) -> Chunk {
        let number = u16::from_le_bytes([h.magic.value[0], h.magic.value[1]]);
        let mut children = vec![Chunk::from_span(ChunkKind::Field, h.magic.span)
            .with_label(format!("magic = {number} ({label})"))];
        if let Some(flags) = &h.flags {
            children.push(Chunk::from_span(ChunkKind::Field, flags.span).with_label(format!("flags = {:#x}", flags.value)));
        }
        if let Some(mtime) = &h.mtime {
            children.push(field("mtime", mtime));
        }
        if let Some(size) = &h.source_size {
            children.push(field("source_size", size));
        }
        if let Some(hash) = &h.source_hash {
            children.push(
                Chunk::from_span(ChunkKind::Field, hash.span).with_label(format!("source_hash = {:#018x}", hash.value)),
            );
        }
        Chunk::from_span(ChunkKind::Header, h.span).with_label("header").with_children(children)
    }

    fn summary(&self, node: &Node) -> String {
        match node.value {
            Value::Ref(i) => {
                let target = self.interns.get(i).map_or_else(|| "?".to_owned(), |t| t.value.summary(self.limit));
                format!("ref #{i} → {target}")
            }
            _ => node.value.summary(self.limit),
        }
    }

    fn label(&self, node: &Node, field: Option<&str>) -> String {
        let mut out = field.map_or_else(String::new, |f| format!("{f}: "));
        out.push_str(&self.summary(node));
        if let Some(slot) = node.slot {
            out.push_str(&format!(" [ref #{slot}]"));
        }
        out
    }

    fn node(&self, node: &Node, field: Option<&str>) -> Chunk {
        let (kind, children) = match &node.value {
            Value::Code(code) => return self.code(node, code),
            Value::Ref(_) => (ChunkKind::MarshalRef, Vec::new()),
            Value::Dict(pairs) => (
                ChunkKind::MarshalContainer,
                pairs.iter().flat_map(|(k, v)| [self.node(k, None), self.node(v, None)]).collect(),
            ),
            v => match v.elements() {
                Some(items) => (ChunkKind::MarshalContainer, items.iter().map(|i| self.node(i, None)).collect()),
                None => (ChunkKind::MarshalScalar, Vec::new()),
            },
        };
        Chunk::from_span(kind, node.span).with_label(self.label(node, field)).with_children(children)
    }

    fn code(&self, node: &Node, code: &CodeObject) -> Chunk {
        let n = &code.nodes;
        let mut meta = vec![field("argcount", &code.argcount)];
        if let Some(p) = &code.posonlyargcount {
            meta.push(field("posonlyargcount", p));
        }
        meta.push(field("kwonlyargcount", &code.kwonlyargcount));
        meta.push(field("nlocals", &code.nlocals));
        meta.push(field("stacksize", &code.stacksize));
        meta.push(
            Chunk::from_span(ChunkKind::Field, code.flags.span).with_label(format!("flags = {:#x}", code.flags.value)),
        );

        let children = vec![
            Chunk::new(ChunkKind::CodeMetadata, code.argcount.span.start, code.flags.span.end)
                .with_label("metadata")
                .with_children(meta),
            self.instruction_list(code),
            self.constant_pool(code),
            Chunk::new(ChunkKind::NameTable, n.names.span.start, n.cellvars.span.end).with_label("names").with_children(
                vec![
                    self.node(&n.names, Some("names")),
                    self.node(&n.varnames, Some("varnames")),
                    self.node(&n.freevars, Some("freevars")),
                    self.node(&n.cellvars, Some("cellvars")),
                ],
            ),
            self.node(&n.filename, Some("filename")),
            self.node(&n.name, Some("name")),
            field("firstlineno", &code.firstlineno),
            Chunk::from_span(ChunkKind::LineTable, n.lnotab.span)
                .with_label(format!("lnotab: {} line starts", code.line_table().len())),
        ];

        let mut label = format!("code {}", code.name);
        if let Some(slot) = node.slot {
            label.push_str(&format!(" [ref #{slot}]"));
        }
        Chunk::from_span(ChunkKind::CodeObject, node.span).with_label(label).with_children(children)
    }

    fn instruction_list(&self, code: &CodeObject) -> Chunk {
        let node = &code.nodes.code;
        let mut label = format!("code: {} bytes", code.bytecode.len());
        if let Value::Ref(i) = node.value {
            label.push_str(&format!(" (ref #{i})"));
        }
        let children = match code.bytecode_offset {
            Some(base) if self.instructions => {
                label.push_str(&format!(", {} instructions", code.instructions.len()));
                code.instructions
                    .iter()
                    .map(|i| {
                        Chunk::new(ChunkKind::Instruction, base + u64::from(i.offset), base + u64::from(i.end()))
                            .with_label(i.label(code, self.interns, self.limit))
                    })
                    .collect()
            }
            _ => Vec::new(),
        };
        Chunk::from_span(ChunkKind::InstructionList, node.span).with_label(label).with_children(children)
    }

    fn constant_pool(&self, code: &CodeObject) -> Chunk {
        let node = &code.nodes.consts;
        let children = match &node.value {
            Value::Tuple(items) => items.iter().map(|i| self.node(i, None)).collect(),
            _ => Vec::new(),
        };
        Chunk::from_span(ChunkKind::ConstantPool, node.span)
            .with_label(self.label(node, Some("consts")))
            .with_children(children)
    }
}
