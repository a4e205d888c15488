//! Table-driven disassembler.
//!
//! Instruction layout comes entirely from the revision's [`OpcodeTable`]: operand
//! width per opcode, `HAVE_ARGUMENT` threshold, and the `EXTENDED_ARG` opcode whose
//! operand is shifted into the next instruction's argument. The prefixes are folded
//! into the instruction they extend: its offset is the first prefix and its width
//! covers all of them.

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::{
    code::CodeObject,
    error::{ErrorKind, ParseError, ParseResult},
    magic::FormatRevision,
    marshal::InternTable,
    opcodes::{OperandKind, COMPARE_OPS},
};

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Instruction {
    /// Offset in the instruction stream (of the first `EXTENDED_ARG` prefix, if any).
    pub offset: u32,
    /// Bytes covered, prefixes included.
    pub width: u32,
    /// Numeric opcode.
    pub opcode: u8,
    /// Mnemonic; `None` for opcodes unknown to the revision.
    pub mnemonic: Option<&'static str>,
    /// How to read the argument.
    pub operand: OperandKind,
    /// Argument with every prefix folded in.
    pub argument: Option<u32>,
}

fn to_u32(n: usize) -> u32 { u32::try_from(n).unwrap_or(u32::MAX) }

/// Decodes `code` with `revision`'s opcode table.
///
/// `base` is the absolute blob offset of `code[0]`; errors are reported there.
pub fn disassemble(code: &[u8], revision: &FormatRevision, base: u64) -> ParseResult<Vec<Instruction>> {
    let table = revision
        .opcodes
        .ok_or_else(|| ParseError::new(ErrorKind::UnsupportedRevision { label: revision.label }, base))?;
    let truncated = |at: usize| ParseError::new(ErrorKind::TruncatedInstruction { at: to_u32(at) }, base + at as u64);

    let mut out = Vec::new();
    let mut pos = 0_usize;
    let mut ext = 0_u32;
    let mut prefix_start = None;

    while let Some(&op) = code.get(pos) {
        let start = pos;
        let width = usize::from(table.encoding.operand_width(op, table.have_argument));
        let operand = code.get(pos + 1..pos + 1 + width).ok_or_else(|| truncated(start))?;
        let raw = operand.iter().rev().fold(0_u32, |acc, &b| (acc << 8) | u32::from(b));
        pos += 1 + width;

        if op == table.extended_arg && width > 0 {
            ext = (ext | raw).checked_shl(to_u32(8 * width)).unwrap_or(0);
            prefix_start.get_or_insert(start);
            continue;
        }

        let first = prefix_start.take().unwrap_or(start);
        let takes = width > 0 && table.takes_argument(op);
        let info = table.get(op);
        out.push(Instruction {
            offset: to_u32(first),
            width: to_u32(pos - first),
            opcode: op,
            mnemonic: info.map(|i| i.name),
            operand: info.map_or(if takes { OperandKind::Plain } else { OperandKind::None }, |i| i.operand),
            argument: takes.then_some(ext | raw),
        });
        ext = 0;
    }

    match prefix_start {
        Some(at) => Err(truncated(at)),
        None => Ok(out),
    }
}

impl Instruction {
    /// Offset of the next instruction.
    pub const fn end(&self) -> u32 { self.offset + self.width }

    /// Target of a jump instruction.
    pub fn jump_target(&self) -> Option<u32> {
        let arg = self.argument?;
        match self.operand {
            OperandKind::JumpRelative => self.end().checked_add(arg),
            OperandKind::JumpAbsolute => Some(arg),
            _ => None,
        }
    }

    /// Human hint for the argument, resolved against the owning code object.
    pub fn hint(&self, code: &CodeObject, interns: &InternTable, limit: usize) -> Option<String> {
        let arg = self.argument?;
        let i = arg as usize;
        match self.operand {
            OperandKind::Const => code.constant(i, interns).map(|n| n.value.summary(limit)),
            OperandKind::Name => code.names.get(i).map(ToString::to_string),
            OperandKind::Local => code.varnames.get(i).map(ToString::to_string),
            OperandKind::Free => code.free_name(i).map(str::to_owned),
            OperandKind::Compare => COMPARE_OPS.get(i).map(|s| (*s).to_owned()),
            OperandKind::JumpRelative | OperandKind::JumpAbsolute => self.jump_target().map(|t| format!("to {t}")),
            OperandKind::None | OperandKind::Plain => None,
        }
    }

    /// `MNEMONIC arg (hint)`.
    pub fn label(&self, code: &CodeObject, interns: &InternTable, limit: usize) -> String {
        let mut out = self.mnemonic.map_or_else(|| format!("<{}>", self.opcode), str::to_owned);
        if let Some(arg) = self.argument {
            out.push_str(&format!(" {arg}"));
            if let Some(h) = self.hint(code, interns, limit) {
                out.push_str(&format!(" ({h})"));
            }
        }
        out
    }
}
