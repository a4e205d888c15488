//! Opcode tables, one per instruction-set generation.
//!
//! A table is a stack of [`Layer`]s: each layer adds or removes opcodes relative to
//! the layers below it. Lookups walk from the newest layer down, so a revision is
//! described as "previous revision + delta".

#[cfg(feature = "serde")]
use serde::Serialize;

/// How an instruction's operand is interpreted (drives label hints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum OperandKind {
    /// No operand.
    None,
    /// Plain integer (counts, flags).
    Plain,
    /// Index into the constant pool.
    Const,
    /// Index into `co_names`.
    Name,
    /// Index into `co_varnames`.
    Local,
    /// Index into `co_cellvars + co_freevars`.
    Free,
    /// Index into the comparison-operator table.
    Compare,
    /// Byte delta from the end of the instruction.
    JumpRelative,
    /// Absolute byte offset.
    JumpAbsolute,
}

/// One opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// Numeric opcode.
    pub code: u8,
    /// Mnemonic.
    pub name: &'static str,
    /// Operand class.
    pub operand: OperandKind,
}

/// Delta applied on top of the previous layers.
#[derive(Debug, Clone, Copy)]
pub struct Layer {
    /// Opcodes introduced or renamed by this layer.
    pub add: &'static [OpcodeInfo],
    /// Opcodes that stop existing at this layer.
    pub remove: &'static [u8],
}

/// Instruction layout of a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum InstrEncoding {
    /// Every instruction carries an operand of `operand_width` bytes (0, 1 or 2).
    Fixed {
        /// Operand width in bytes.
        operand_width: u8,
    },
    /// Only opcodes `>= have_argument` carry an operand of `operand_width` bytes.
    Threshold {
        /// Operand width in bytes.
        operand_width: u8,
    },
}

impl InstrEncoding {
    /// Operand bytes following opcode `op` under this encoding.
    pub const fn operand_width(self, op: u8, have_argument: u8) -> u8 {
        match self {
            Self::Fixed { operand_width } => operand_width,
            Self::Threshold { operand_width } => {
                if op >= have_argument { operand_width } else { 0 }
            }
        }
    }
}

/// Opcode table descriptor carried by a [`crate::FormatRevision`].
#[derive(Debug, Clone, Copy)]
pub struct OpcodeTable {
    /// Instruction layout.
    pub encoding: InstrEncoding,
    /// First opcode that takes an argument.
    pub have_argument: u8,
    /// The `EXTENDED_ARG` opcode.
    pub extended_arg: u8,
    /// Layers, oldest first.
    pub layers: &'static [Layer],
}

impl OpcodeTable {
    /// Looks an opcode up; `None` if it does not exist in this revision.
    pub fn get(&self, code: u8) -> Option<&'static OpcodeInfo> {
        for layer in self.layers.iter().rev() {
            if let Some(info) = layer.add.iter().find(|i| i.code == code) {
                return Some(info);
            }
            if layer.remove.contains(&code) {
                return None;
            }
        }
        None
    }

    /// Mnemonic of `code`, if known.
    pub fn name(&self, code: u8) -> Option<&'static str> { self.get(code).map(|i| i.name) }

    /// Whether `code` takes an argument in this revision.
    pub fn takes_argument(&self, code: u8) -> bool {
        self.get(code).map_or(code >= self.have_argument, |i| i.operand != OperandKind::None)
    }
}

/// Comparison operators, indexed by `COMPARE_OP` argument.
pub const COMPARE_OPS: &[&str] =
    &["<", "<=", "==", "!=", ">", ">=", "in", "not in", "is", "is not", "exception match", "BAD"];

/* ─────────────────────────── Tables ─────────────────────────── */

const fn op(code: u8, name: &'static str, operand: OperandKind) -> OpcodeInfo { OpcodeInfo { code, name, operand } }

use OperandKind::{Compare, Const, Free, JumpAbsolute as JAbs, JumpRelative as JRel, Local, Name, None as No, Plain};

const BASE_32: &[OpcodeInfo] = &[
    op(1, "POP_TOP", No),
    op(2, "ROT_TWO", No),
    op(3, "ROT_THREE", No),
    op(4, "DUP_TOP", No),
    op(5, "DUP_TOP_TWO", No),
    op(9, "NOP", No),
    op(10, "UNARY_POSITIVE", No),
    op(11, "UNARY_NEGATIVE", No),
    op(12, "UNARY_NOT", No),
    op(15, "UNARY_INVERT", No),
    op(19, "BINARY_POWER", No),
    op(20, "BINARY_MULTIPLY", No),
    op(22, "BINARY_MODULO", No),
    op(23, "BINARY_ADD", No),
    op(24, "BINARY_SUBTRACT", No),
    op(25, "BINARY_SUBSCR", No),
    op(26, "BINARY_FLOOR_DIVIDE", No),
    op(27, "BINARY_TRUE_DIVIDE", No),
    op(28, "INPLACE_FLOOR_DIVIDE", No),
    op(29, "INPLACE_TRUE_DIVIDE", No),
    op(54, "STORE_MAP", No),
    op(55, "INPLACE_ADD", No),
    op(56, "INPLACE_SUBTRACT", No),
    op(57, "INPLACE_MULTIPLY", No),
    op(59, "INPLACE_MODULO", No),
    op(60, "STORE_SUBSCR", No),
    op(61, "DELETE_SUBSCR", No),
    op(62, "BINARY_LSHIFT", No),
    op(63, "BINARY_RSHIFT", No),
    op(64, "BINARY_AND", No),
    op(65, "BINARY_XOR", No),
    op(66, "BINARY_OR", No),
    op(67, "INPLACE_POWER", No),
    op(68, "GET_ITER", No),
    op(69, "STORE_LOCALS", No),
    op(70, "PRINT_EXPR", No),
    op(71, "LOAD_BUILD_CLASS", No),
    op(75, "INPLACE_LSHIFT", No),
    op(76, "INPLACE_RSHIFT", No),
    op(77, "INPLACE_AND", No),
    op(78, "INPLACE_XOR", No),
    op(79, "INPLACE_OR", No),
    op(80, "BREAK_LOOP", No),
    op(81, "WITH_CLEANUP", No),
    op(83, "RETURN_VALUE", No),
    op(84, "IMPORT_STAR", No),
    op(86, "YIELD_VALUE", No),
    op(87, "POP_BLOCK", No),
    op(88, "END_FINALLY", No),
    op(89, "POP_EXCEPT", No),
    op(90, "STORE_NAME", Name),
    op(91, "DELETE_NAME", Name),
    op(92, "UNPACK_SEQUENCE", Plain),
    op(93, "FOR_ITER", JRel),
    op(94, "UNPACK_EX", Plain),
    op(95, "STORE_ATTR", Name),
    op(96, "DELETE_ATTR", Name),
    op(97, "STORE_GLOBAL", Name),
    op(98, "DELETE_GLOBAL", Name),
    op(100, "LOAD_CONST", Const),
    op(101, "LOAD_NAME", Name),
    op(102, "BUILD_TUPLE", Plain),
    op(103, "BUILD_LIST", Plain),
    op(104, "BUILD_SET", Plain),
    op(105, "BUILD_MAP", Plain),
    op(106, "LOAD_ATTR", Name),
    op(107, "COMPARE_OP", Compare),
    op(108, "IMPORT_NAME", Name),
    op(109, "IMPORT_FROM", Name),
    op(110, "JUMP_FORWARD", JRel),
    op(111, "JUMP_IF_FALSE_OR_POP", JAbs),
    op(112, "JUMP_IF_TRUE_OR_POP", JAbs),
    op(113, "JUMP_ABSOLUTE", JAbs),
    op(114, "POP_JUMP_IF_FALSE", JAbs),
    op(115, "POP_JUMP_IF_TRUE", JAbs),
    op(116, "LOAD_GLOBAL", Name),
    op(119, "CONTINUE_LOOP", JAbs),
    op(120, "SETUP_LOOP", JRel),
    op(121, "SETUP_EXCEPT", JRel),
    op(122, "SETUP_FINALLY", JRel),
    op(124, "LOAD_FAST", Local),
    op(125, "STORE_FAST", Local),
    op(126, "DELETE_FAST", Local),
    op(130, "RAISE_VARARGS", Plain),
    op(131, "CALL_FUNCTION", Plain),
    op(132, "MAKE_FUNCTION", Plain),
    op(133, "BUILD_SLICE", Plain),
    op(134, "MAKE_CLOSURE", Plain),
    op(135, "LOAD_CLOSURE", Free),
    op(136, "LOAD_DEREF", Free),
    op(137, "STORE_DEREF", Free),
    op(138, "DELETE_DEREF", Free),
    op(140, "CALL_FUNCTION_VAR", Plain),
    op(141, "CALL_FUNCTION_KW", Plain),
    op(142, "CALL_FUNCTION_VAR_KW", Plain),
    op(143, "SETUP_WITH", JRel),
    op(144, "EXTENDED_ARG", Plain),
    op(145, "LIST_APPEND", Plain),
    op(146, "SET_ADD", Plain),
    op(147, "MAP_ADD", Plain),
];

const ADD_33: &[OpcodeInfo] = &[op(72, "YIELD_FROM", No)];

const ADD_34: &[OpcodeInfo] = &[op(148, "LOAD_CLASSDEREF", Free)];

const ADD_35: &[OpcodeInfo] = &[
    op(16, "BINARY_MATRIX_MULTIPLY", No),
    op(17, "INPLACE_MATRIX_MULTIPLY", No),
    op(50, "GET_AITER", No),
    op(51, "GET_ANEXT", No),
    op(52, "BEFORE_ASYNC_WITH", No),
    op(69, "GET_YIELD_FROM_ITER", No),
    op(73, "GET_AWAITABLE", No),
    op(81, "WITH_CLEANUP_START", No),
    op(82, "WITH_CLEANUP_FINISH", No),
    op(149, "BUILD_LIST_UNPACK", Plain),
    op(150, "BUILD_MAP_UNPACK", Plain),
    op(151, "BUILD_MAP_UNPACK_WITH_CALL", Plain),
    op(152, "BUILD_TUPLE_UNPACK", Plain),
    op(153, "BUILD_SET_UNPACK", Plain),
    op(154, "SETUP_ASYNC_WITH", JRel),
];

const ADD_36: &[OpcodeInfo] = &[
    op(85, "SETUP_ANNOTATIONS", No),
    op(127, "STORE_ANNOTATION", Name),
    op(142, "CALL_FUNCTION_EX", Plain),
    op(155, "FORMAT_VALUE", Plain),
    op(156, "BUILD_CONST_KEY_MAP", Plain),
    op(157, "BUILD_STRING", Plain),
    op(158, "BUILD_TUPLE_UNPACK_WITH_CALL", Plain),
];

const ADD_37: &[OpcodeInfo] = &[op(160, "LOAD_METHOD", Name), op(161, "CALL_METHOD", Plain)];

const ADD_38: &[OpcodeInfo] = &[
    op(6, "ROT_FOUR", No),
    op(53, "BEGIN_FINALLY", No),
    op(54, "END_ASYNC_FOR", No),
    op(162, "CALL_FINALLY", JRel),
    op(163, "POP_FINALLY", Plain),
];

const L32: Layer = Layer { add: BASE_32, remove: &[] };
const L33: Layer = Layer { add: ADD_33, remove: &[] };
const L34: Layer = Layer { add: ADD_34, remove: &[69] };
const L35: Layer = Layer { add: ADD_35, remove: &[54] };
const L36: Layer = Layer { add: ADD_36, remove: &[134, 140] };
const L37: Layer = Layer { add: ADD_37, remove: &[127] };
const L38: Layer = Layer { add: ADD_38, remove: &[80, 119, 120, 121] };

const VARIABLE: InstrEncoding = InstrEncoding::Threshold { operand_width: 2 };
const WORDCODE: InstrEncoding = InstrEncoding::Fixed { operand_width: 1 };

const fn table(encoding: InstrEncoding, layers: &'static [Layer]) -> OpcodeTable {
    OpcodeTable { encoding, have_argument: 90, extended_arg: 144, layers }
}

const STACK_32: &[Layer] = &[L32];
const STACK_33: &[Layer] = &[L32, L33];
const STACK_34: &[Layer] = &[L32, L33, L34];
const STACK_35: &[Layer] = &[L32, L33, L34, L35];
const STACK_36: &[Layer] = &[L32, L33, L34, L35, L36];
const STACK_37: &[Layer] = &[L32, L33, L34, L35, L36, L37];
const STACK_38: &[Layer] = &[L32, L33, L34, L35, L36, L37, L38];

/// Python 3.2.
pub static PY32: OpcodeTable = table(VARIABLE, STACK_32);
/// Python 3.3.
pub static PY33: OpcodeTable = table(VARIABLE, STACK_33);
/// Python 3.4.
pub static PY34: OpcodeTable = table(VARIABLE, STACK_34);
/// Python 3.5.
pub static PY35: OpcodeTable = table(VARIABLE, STACK_35);
/// Python 3.6 (first wordcode revision).
pub static PY36: OpcodeTable = table(WORDCODE, STACK_36);
/// Python 3.7.
pub static PY37: OpcodeTable = table(WORDCODE, STACK_37);
/// Python 3.8.
pub static PY38: OpcodeTable = table(WORDCODE, STACK_38);
