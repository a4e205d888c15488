//! Registry of known pyc revisions, keyed by their 4-byte magic.
//!
//! Every magic is a little-endian revision number followed by `\r\n`. Adding a
//! revision is a table addition: header layout, marshal version, code layout and
//! opcode table are all data on [`FormatRevision`].

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::opcodes::{self, OpcodeTable};

/// Fields that follow the magic in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum HeaderLayout {
    /// `mtime: u32` (8-byte header).
    Mtime,
    /// `mtime: u32`, `source_size: u32` (12-byte header).
    MtimeSize,
    /// `flags: u32`, then `mtime, source_size` or an 8-byte source hash when
    /// `flags & 1` (16-byte header).
    FlagsThenMtimeOrHash,
}

impl HeaderLayout {
    /// Total header length, magic included.
    pub const fn len(self) -> u64 {
        match self {
            Self::Mtime => 8,
            Self::MtimeSize => 12,
            Self::FlagsThenMtimeOrHash => 16,
        }
    }
}

/// Fixed fields of a marshalled code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct CodeLayout {
    /// A `posonlyargcount` field sits between `argcount` and `kwonlyargcount`.
    pub posonly_args: bool,
    /// Line deltas in the line table are signed bytes.
    pub signed_line_deltas: bool,
}

/// Immutable description of one on-disk revision.
#[derive(Debug, Clone, Copy)]
pub struct FormatRevision {
    /// Human label, e.g. `3.6`.
    pub label: &'static str,
    /// Magic prefix.
    pub magic: [u8; 4],
    /// Header fields after the magic.
    pub header: HeaderLayout,
    /// Marshal format version written by this revision.
    pub marshal_version: u8,
    /// Code-object field layout.
    pub code: CodeLayout,
    /// Instruction set; `None` means the revision is recognized but cannot be disassembled.
    pub opcodes: Option<&'static OpcodeTable>,
}

impl FormatRevision {
    /// Numeric revision stored in the magic.
    pub const fn number(&self) -> u16 { u16::from_le_bytes([self.magic[0], self.magic[1]]) }

    /// Whether tag bit `0x80` marks objects for the intern table.
    pub const fn has_ref_flags(&self) -> bool { self.marshal_version >= 3 }
}

/// Builds a pyc magic from a revision number.
pub const fn magic_for(number: u16) -> [u8; 4] {
    let b = number.to_le_bytes();
    [b[0], b[1], b'\r', b'\n']
}

const CLASSIC: CodeLayout = CodeLayout { posonly_args: false, signed_line_deltas: false };
const CLASSIC_SIGNED: CodeLayout = CodeLayout { posonly_args: false, signed_line_deltas: true };
const POSONLY: CodeLayout = CodeLayout { posonly_args: true, signed_line_deltas: true };

/// All registered revisions.
pub static REVISIONS: &[FormatRevision] = &[
    FormatRevision {
        label: "3.2",
        magic: magic_for(3180),
        header: HeaderLayout::Mtime,
        marshal_version: 2,
        code: CLASSIC,
        opcodes: Some(&opcodes::PY32),
    },
    FormatRevision {
        label: "3.3",
        magic: magic_for(3230),
        header: HeaderLayout::MtimeSize,
        marshal_version: 2,
        code: CLASSIC,
        opcodes: Some(&opcodes::PY33),
    },
    FormatRevision {
        label: "3.4",
        magic: magic_for(3310),
        header: HeaderLayout::MtimeSize,
        marshal_version: 3,
        code: CLASSIC,
        opcodes: Some(&opcodes::PY34),
    },
    FormatRevision {
        label: "3.5",
        magic: magic_for(3350),
        header: HeaderLayout::MtimeSize,
        marshal_version: 4,
        code: CLASSIC,
        opcodes: Some(&opcodes::PY35),
    },
    FormatRevision {
        label: "3.6",
        magic: magic_for(3379),
        header: HeaderLayout::MtimeSize,
        marshal_version: 4,
        code: CLASSIC_SIGNED,
        opcodes: Some(&opcodes::PY36),
    },
    FormatRevision {
        label: "3.7",
        magic: magic_for(3394),
        header: HeaderLayout::FlagsThenMtimeOrHash,
        marshal_version: 4,
        code: CLASSIC_SIGNED,
        opcodes: Some(&opcodes::PY37),
    },
    FormatRevision {
        label: "3.8",
        magic: magic_for(3413),
        header: HeaderLayout::FlagsThenMtimeOrHash,
        marshal_version: 4,
        code: POSONLY,
        opcodes: Some(&opcodes::PY38),
    },
];

/// Finds the revision whose magic prefixes `data`.
///
/// Magics all have the same length, so the first match is the longest one.
pub fn lookup(data: &[u8]) -> Option<&'static FormatRevision> {
    REVISIONS.iter().find(|r| data.starts_with(&r.magic))
}

/// Finds a revision by label (`"3.6"`).
pub fn by_label(label: &str) -> Option<&'static FormatRevision> { REVISIONS.iter().find(|r| r.label == label) }

/// The whole registry, oldest revision first.
pub fn revisions() -> &'static [FormatRevision] { REVISIONS }

/// Every registered magic, for the format-detection hook.
pub fn magics() -> impl Iterator<Item = [u8; 4]> { REVISIONS.iter().map(|r| r.magic) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_magics_resolve() {
        for rev in REVISIONS {
            let found = lookup(&rev.magic).map(|r| r.label);
            assert_eq!(found, Some(rev.label));
        }
        assert_eq!(lookup(&[0x9e, 0x0c, b'\r', b'\n']).map(|r| r.label), Some("3.3"));
        assert_eq!(lookup(&[0xee, 0x0c, b'\r', b'\n']).map(|r| r.label), Some("3.4"));
        assert_eq!(lookup(&[0x33, 0x0d, b'\r', b'\n', 0, 0]).map(|r| r.label), Some("3.6"));
    }

    #[test]
    fn unknown_or_short_prefix_is_no_match() {
        assert!(lookup(b"\x7fELF").is_none());
        assert!(lookup(&[0x33, 0x0d, b'\r', b'\r']).is_none());
        assert!(lookup(&[0x33, 0x0d]).is_none());
    }

    #[test]
    fn only_the_final_3_5_magic_is_registered() {
        assert_eq!(lookup(&[0x16, 0x0d, b'\r', b'\n']).map(|r| r.label), Some("3.5"));
        // 0x0c16 = 3094, not a registered revision
        assert!(lookup(&[0x16, 0x0c, b'\r', b'\n']).is_none());
    }

    #[test]
    fn magics_are_distinct() {
        let mut all: Vec<[u8; 4]> = magics().collect();
        let n = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), n);
    }

    #[test]
    fn revision_numbers_and_flags() {
        let r = by_label("3.4").map(|r| (r.number(), r.has_ref_flags()));
        assert_eq!(r, Some((3310, true)));
        assert_eq!(by_label("3.3").map(FormatRevision::has_ref_flags), Some(false));
        assert_eq!(HeaderLayout::FlagsThenMtimeOrHash.len(), 16);
    }
}
