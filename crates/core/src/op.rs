//! Per-version opcode metadata.
//!
//! Instructions are identified by a version-independent mnemonic ([`Op`]);
//! each interpreter version maps a subset of the mnemonics to opcode numbers.
//! The per-version tables are built once and live for the whole process.

use std::sync::OnceLock;

use crate::error::DecodeError;
use crate::version::PythonVersion;

/// What an opcode's argument means.
///
/// `Free` covers the `hasfree` category where the same index space spans
/// cell variables then free variables. The three `Load*` kinds cover the
/// opcodes that pack a flag bit (or two) next to a name index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgKind {
    NoArg,
    JumpAbs,
    JumpFwd,
    JumpBack,
    Local,
    Name,
    Free,
    Const,
    Compare,
    BinaryOp,
    Intrinsic1,
    Intrinsic2,
    LoadGlobal,
    LoadAttr,
    LoadSuperAttr,
    Raw,
}

impl ArgKind {
    pub const fn is_jump(self) -> bool {
        matches!(self, Self::JumpAbs | Self::JumpFwd | Self::JumpBack)
    }

    pub const fn has_arg(self) -> bool {
        !matches!(self, Self::NoArg)
    }
}

/// Split stack effect of one instruction: how many operands it consumes and
/// how many it leaves.
///
/// `popped` doubles as the minimum stack depth required before execution;
/// `effect` is the signed depth change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackEffect {
    popped: u32,
    pushed: u32,
}

impl StackEffect {
    pub const fn new(popped: u32, pushed: u32) -> Self {
        Self { popped, pushed }
    }

    pub const fn popped(self) -> u32 {
        self.popped
    }

    pub const fn pushed(self) -> u32 {
        self.pushed
    }

    pub const fn effect(self) -> i32 {
        self.pushed as i32 - self.popped as i32
    }
}

macro_rules! define_ops {
    ($( $variant:ident = $name:literal => $kind:ident; )*) => {
        /// Version-independent opcode mnemonic: the union of the opcode sets
        /// of CPython 3.8 through 3.12.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Op {
            $( $variant, )*
        }

        impl Op {
            pub const ALL: &'static [Op] = &[ $( Op::$variant, )* ];
            pub const COUNT: usize = Op::ALL.len();

            /// The CPython spelling, e.g. `"POP_JUMP_IF_FALSE"`.
            pub const fn name(self) -> &'static str {
                match self {
                    $( Op::$variant => $name, )*
                }
            }

            const fn base_kind(self) -> ArgKind {
                match self {
                    $( Op::$variant => ArgKind::$kind, )*
                }
            }

            pub fn by_name(name: &str) -> Option<Op> {
                Op::ALL.iter().copied().find(|op| op.name() == name)
            }
        }
    };
}

define_ops! {
    // No-argument opcodes.
    Cache = "CACHE" => NoArg;
    PopTop = "POP_TOP" => NoArg;
    RotTwo = "ROT_TWO" => NoArg;
    RotThree = "ROT_THREE" => NoArg;
    RotFour = "ROT_FOUR" => NoArg;
    DupTop = "DUP_TOP" => NoArg;
    DupTopTwo = "DUP_TOP_TWO" => NoArg;
    Nop = "NOP" => NoArg;
    UnaryPositive = "UNARY_POSITIVE" => NoArg;
    UnaryNegative = "UNARY_NEGATIVE" => NoArg;
    UnaryNot = "UNARY_NOT" => NoArg;
    UnaryInvert = "UNARY_INVERT" => NoArg;
    BinaryMatrixMultiply = "BINARY_MATRIX_MULTIPLY" => NoArg;
    InplaceMatrixMultiply = "INPLACE_MATRIX_MULTIPLY" => NoArg;
    BinaryPower = "BINARY_POWER" => NoArg;
    BinaryMultiply = "BINARY_MULTIPLY" => NoArg;
    BinaryModulo = "BINARY_MODULO" => NoArg;
    BinaryAdd = "BINARY_ADD" => NoArg;
    BinarySubtract = "BINARY_SUBTRACT" => NoArg;
    BinarySubscr = "BINARY_SUBSCR" => NoArg;
    BinaryFloorDivide = "BINARY_FLOOR_DIVIDE" => NoArg;
    BinaryTrueDivide = "BINARY_TRUE_DIVIDE" => NoArg;
    InplaceFloorDivide = "INPLACE_FLOOR_DIVIDE" => NoArg;
    InplaceTrueDivide = "INPLACE_TRUE_DIVIDE" => NoArg;
    InplaceAdd = "INPLACE_ADD" => NoArg;
    InplaceSubtract = "INPLACE_SUBTRACT" => NoArg;
    InplaceMultiply = "INPLACE_MULTIPLY" => NoArg;
    InplaceModulo = "INPLACE_MODULO" => NoArg;
    InplacePower = "INPLACE_POWER" => NoArg;
    InplaceLshift = "INPLACE_LSHIFT" => NoArg;
    InplaceRshift = "INPLACE_RSHIFT" => NoArg;
    InplaceAnd = "INPLACE_AND" => NoArg;
    InplaceXor = "INPLACE_XOR" => NoArg;
    InplaceOr = "INPLACE_OR" => NoArg;
    BinaryLshift = "BINARY_LSHIFT" => NoArg;
    BinaryRshift = "BINARY_RSHIFT" => NoArg;
    BinaryAnd = "BINARY_AND" => NoArg;
    BinaryXor = "BINARY_XOR" => NoArg;
    BinaryOr = "BINARY_OR" => NoArg;
    BinarySlice = "BINARY_SLICE" => NoArg;
    StoreSlice = "STORE_SLICE" => NoArg;
    StoreSubscr = "STORE_SUBSCR" => NoArg;
    DeleteSubscr = "DELETE_SUBSCR" => NoArg;
    GetLen = "GET_LEN" => NoArg;
    MatchMapping = "MATCH_MAPPING" => NoArg;
    MatchSequence = "MATCH_SEQUENCE" => NoArg;
    MatchKeys = "MATCH_KEYS" => NoArg;
    CopyDictWithoutKeys = "COPY_DICT_WITHOUT_KEYS" => NoArg;
    PushNull = "PUSH_NULL" => NoArg;
    PushExcInfo = "PUSH_EXC_INFO" => NoArg;
    CheckExcMatch = "CHECK_EXC_MATCH" => NoArg;
    CheckEgMatch = "CHECK_EG_MATCH" => NoArg;
    WithExceptStart = "WITH_EXCEPT_START" => NoArg;
    GetAiter = "GET_AITER" => NoArg;
    GetAnext = "GET_ANEXT" => NoArg;
    BeforeAsyncWith = "BEFORE_ASYNC_WITH" => NoArg;
    BeforeWith = "BEFORE_WITH" => NoArg;
    BeginFinally = "BEGIN_FINALLY" => NoArg;
    EndAsyncFor = "END_ASYNC_FOR" => NoArg;
    CleanupThrow = "CLEANUP_THROW" => NoArg;
    GetIter = "GET_ITER" => NoArg;
    GetYieldFromIter = "GET_YIELD_FROM_ITER" => NoArg;
    PrintExpr = "PRINT_EXPR" => NoArg;
    LoadBuildClass = "LOAD_BUILD_CLASS" => NoArg;
    YieldFrom = "YIELD_FROM" => NoArg;
    // Takes an argument from 3.11.
    GetAwaitable = "GET_AWAITABLE" => NoArg;
    LoadAssertionError = "LOAD_ASSERTION_ERROR" => NoArg;
    ReturnGenerator = "RETURN_GENERATOR" => NoArg;
    WithCleanupStart = "WITH_CLEANUP_START" => NoArg;
    WithCleanupFinish = "WITH_CLEANUP_FINISH" => NoArg;
    ListToTuple = "LIST_TO_TUPLE" => NoArg;
    ReturnValue = "RETURN_VALUE" => NoArg;
    ImportStar = "IMPORT_STAR" => NoArg;
    SetupAnnotations = "SETUP_ANNOTATIONS" => NoArg;
    // Takes an argument from 3.12.
    YieldValue = "YIELD_VALUE" => NoArg;
    AsyncGenWrap = "ASYNC_GEN_WRAP" => NoArg;
    PrepReraiseStar = "PREP_RERAISE_STAR" => NoArg;
    PopBlock = "POP_BLOCK" => NoArg;
    EndFinally = "END_FINALLY" => NoArg;
    PopExcept = "POP_EXCEPT" => NoArg;
    // Takes an argument from 3.10.
    Reraise = "RERAISE" => NoArg;
    InterpreterExit = "INTERPRETER_EXIT" => NoArg;
    EndFor = "END_FOR" => NoArg;
    EndSend = "END_SEND" => NoArg;
    LoadLocals = "LOAD_LOCALS" => NoArg;

    // Name pool.
    StoreName = "STORE_NAME" => Name;
    DeleteName = "DELETE_NAME" => Name;
    StoreAttr = "STORE_ATTR" => Name;
    DeleteAttr = "DELETE_ATTR" => Name;
    StoreGlobal = "STORE_GLOBAL" => Name;
    DeleteGlobal = "DELETE_GLOBAL" => Name;
    LoadName = "LOAD_NAME" => Name;
    // Flag-carrying from 3.12.
    LoadAttr = "LOAD_ATTR" => Name;
    ImportName = "IMPORT_NAME" => Name;
    ImportFrom = "IMPORT_FROM" => Name;
    // Flag-carrying from 3.11.
    LoadGlobal = "LOAD_GLOBAL" => Name;
    LoadMethod = "LOAD_METHOD" => Name;
    LoadFromDictOrGlobals = "LOAD_FROM_DICT_OR_GLOBALS" => Name;

    // Local variables.
    LoadFast = "LOAD_FAST" => Local;
    StoreFast = "STORE_FAST" => Local;
    DeleteFast = "DELETE_FAST" => Local;
    LoadFastCheck = "LOAD_FAST_CHECK" => Local;
    LoadFastAndClear = "LOAD_FAST_AND_CLEAR" => Local;

    // Cells and frees.
    LoadClosure = "LOAD_CLOSURE" => Free;
    LoadDeref = "LOAD_DEREF" => Free;
    StoreDeref = "STORE_DEREF" => Free;
    DeleteDeref = "DELETE_DEREF" => Free;
    LoadClassDeref = "LOAD_CLASSDEREF" => Free;
    MakeCell = "MAKE_CELL" => Free;
    LoadFromDictOrDeref = "LOAD_FROM_DICT_OR_DEREF" => Free;

    // Constant pool.
    LoadConst = "LOAD_CONST" => Const;
    KwNames = "KW_NAMES" => Const;
    ReturnConst = "RETURN_CONST" => Const;

    // Enum-valued arguments.
    CompareOp = "COMPARE_OP" => Compare;
    BinaryOp = "BINARY_OP" => BinaryOp;
    CallIntrinsic1 = "CALL_INTRINSIC_1" => Intrinsic1;
    CallIntrinsic2 = "CALL_INTRINSIC_2" => Intrinsic2;
    LoadSuperAttr = "LOAD_SUPER_ATTR" => LoadSuperAttr;

    // Jumps.
    JumpForward = "JUMP_FORWARD" => JumpFwd;
    JumpAbsolute = "JUMP_ABSOLUTE" => JumpAbs;
    JumpBackward = "JUMP_BACKWARD" => JumpBack;
    JumpBackwardNoInterrupt = "JUMP_BACKWARD_NO_INTERRUPT" => JumpBack;
    ForIter = "FOR_ITER" => JumpFwd;
    Send = "SEND" => JumpFwd;
    // Absolute through 3.10, forward-relative in 3.11.
    JumpIfFalseOrPop = "JUMP_IF_FALSE_OR_POP" => JumpAbs;
    JumpIfTrueOrPop = "JUMP_IF_TRUE_OR_POP" => JumpAbs;
    // Absolute through 3.10, forward-relative in 3.12.
    PopJumpIfFalse = "POP_JUMP_IF_FALSE" => JumpAbs;
    PopJumpIfTrue = "POP_JUMP_IF_TRUE" => JumpAbs;
    PopJumpIfNone = "POP_JUMP_IF_NONE" => JumpFwd;
    PopJumpIfNotNone = "POP_JUMP_IF_NOT_NONE" => JumpFwd;
    PopJumpForwardIfFalse = "POP_JUMP_FORWARD_IF_FALSE" => JumpFwd;
    PopJumpForwardIfTrue = "POP_JUMP_FORWARD_IF_TRUE" => JumpFwd;
    PopJumpForwardIfNone = "POP_JUMP_FORWARD_IF_NONE" => JumpFwd;
    PopJumpForwardIfNotNone = "POP_JUMP_FORWARD_IF_NOT_NONE" => JumpFwd;
    PopJumpBackwardIfFalse = "POP_JUMP_BACKWARD_IF_FALSE" => JumpBack;
    PopJumpBackwardIfTrue = "POP_JUMP_BACKWARD_IF_TRUE" => JumpBack;
    PopJumpBackwardIfNone = "POP_JUMP_BACKWARD_IF_NONE" => JumpBack;
    PopJumpBackwardIfNotNone = "POP_JUMP_BACKWARD_IF_NOT_NONE" => JumpBack;
    JumpIfNotExcMatch = "JUMP_IF_NOT_EXC_MATCH" => JumpAbs;
    SetupFinally = "SETUP_FINALLY" => JumpFwd;
    SetupWith = "SETUP_WITH" => JumpFwd;
    SetupAsyncWith = "SETUP_ASYNC_WITH" => JumpFwd;
    CallFinally = "CALL_FINALLY" => JumpFwd;

    // Plain integer arguments.
    RotN = "ROT_N" => Raw;
    Swap = "SWAP" => Raw;
    Copy = "COPY" => Raw;
    IsOp = "IS_OP" => Raw;
    ContainsOp = "CONTAINS_OP" => Raw;
    UnpackSequence = "UNPACK_SEQUENCE" => Raw;
    UnpackEx = "UNPACK_EX" => Raw;
    BuildTuple = "BUILD_TUPLE" => Raw;
    BuildList = "BUILD_LIST" => Raw;
    BuildSet = "BUILD_SET" => Raw;
    BuildMap = "BUILD_MAP" => Raw;
    BuildConstKeyMap = "BUILD_CONST_KEY_MAP" => Raw;
    BuildString = "BUILD_STRING" => Raw;
    BuildSlice = "BUILD_SLICE" => Raw;
    BuildListUnpack = "BUILD_LIST_UNPACK" => Raw;
    BuildMapUnpack = "BUILD_MAP_UNPACK" => Raw;
    BuildMapUnpackWithCall = "BUILD_MAP_UNPACK_WITH_CALL" => Raw;
    BuildTupleUnpack = "BUILD_TUPLE_UNPACK" => Raw;
    BuildTupleUnpackWithCall = "BUILD_TUPLE_UNPACK_WITH_CALL" => Raw;
    BuildSetUnpack = "BUILD_SET_UNPACK" => Raw;
    RaiseVarargs = "RAISE_VARARGS" => Raw;
    CallFunction = "CALL_FUNCTION" => Raw;
    CallFunctionKw = "CALL_FUNCTION_KW" => Raw;
    CallFunctionEx = "CALL_FUNCTION_EX" => Raw;
    CallMethod = "CALL_METHOD" => Raw;
    MakeFunction = "MAKE_FUNCTION" => Raw;
    ListAppend = "LIST_APPEND" => Raw;
    SetAdd = "SET_ADD" => Raw;
    MapAdd = "MAP_ADD" => Raw;
    ListExtend = "LIST_EXTEND" => Raw;
    SetUpdate = "SET_UPDATE" => Raw;
    DictMerge = "DICT_MERGE" => Raw;
    DictUpdate = "DICT_UPDATE" => Raw;
    FormatValue = "FORMAT_VALUE" => Raw;
    GenStart = "GEN_START" => Raw;
    MatchClass = "MATCH_CLASS" => Raw;
    Resume = "RESUME" => Raw;
    Precall = "PRECALL" => Raw;
    Call = "CALL" => Raw;
    PopFinally = "POP_FINALLY" => Raw;
    CopyFreeVars = "COPY_FREE_VARS" => Raw;
    ExtendedArg = "EXTENDED_ARG" => Raw;
}

impl Op {
    /// Argument kind under `version`.
    ///
    /// The handful of opcodes whose argument meaning changed across the
    /// 3.8..3.12 family are overridden here; everything else keeps its
    /// table kind.
    pub fn arg_kind(self, version: PythonVersion) -> ArgKind {
        use PythonVersion::*;

        match (self, version) {
            (Op::LoadGlobal, V3_11 | V3_12) => ArgKind::LoadGlobal,
            (Op::LoadAttr, V3_12) => ArgKind::LoadAttr,
            (Op::PopJumpIfFalse | Op::PopJumpIfTrue, V3_12) => ArgKind::JumpFwd,
            (Op::JumpIfFalseOrPop | Op::JumpIfTrueOrPop, V3_11) => ArgKind::JumpFwd,
            (Op::GetAwaitable, V3_11 | V3_12) => ArgKind::Raw,
            (Op::Reraise, V3_10 | V3_11 | V3_12) => ArgKind::Raw,
            (Op::YieldValue, V3_12) => ArgKind::Raw,
            _ => self.base_kind(),
        }
    }

    pub fn has_arg(self, version: PythonVersion) -> bool {
        self.arg_kind(version).has_arg()
    }

    pub fn is_jump(self, version: PythonVersion) -> bool {
        self.arg_kind(version).is_jump()
    }

    pub const fn is_uncond_jump(self) -> bool {
        matches!(
            self,
            Op::JumpForward | Op::JumpAbsolute | Op::JumpBackward | Op::JumpBackwardNoInterrupt
        )
    }

    pub fn is_cond_jump(self, version: PythonVersion) -> bool {
        self.is_jump(version) && !self.is_uncond_jump()
    }

    /// Does control never fall through to the next instruction?
    pub const fn is_final(self) -> bool {
        matches!(
            self,
            Op::ReturnValue | Op::ReturnConst | Op::RaiseVarargs | Op::Reraise
        ) || self.is_uncond_jump()
    }

    /// Opcodes that only exist as encoding artifacts and may not appear in
    /// an abstract stream.
    pub const fn is_artificial(self) -> bool {
        matches!(self, Op::ExtendedArg | Op::Cache)
    }

    /// Number of inline-cache code units following the instruction.
    pub fn cache_slots(self, version: PythonVersion) -> u32 {
        match version {
            PythonVersion::V3_11 => match self {
                Op::BinaryOp => 1,
                Op::BinarySubscr => 4,
                Op::Call => 4,
                Op::CompareOp => 2,
                Op::ForIter => 1,
                Op::LoadAttr => 4,
                Op::LoadGlobal => 5,
                Op::LoadMethod => 10,
                Op::Precall => 1,
                Op::StoreAttr => 4,
                Op::StoreSubscr => 1,
                Op::UnpackSequence => 1,
                _ => 0,
            },
            PythonVersion::V3_12 => match self {
                Op::BinaryOp => 1,
                Op::BinarySubscr => 1,
                Op::Call => 3,
                Op::CompareOp => 1,
                Op::ForIter => 1,
                Op::LoadAttr => 9,
                Op::LoadGlobal => 4,
                Op::LoadSuperAttr => 1,
                Op::Send => 1,
                Op::StoreAttr => 4,
                Op::StoreSubscr => 1,
                Op::UnpackSequence => 1,
                _ => 0,
            },
            _ => 0,
        }
    }

    /// Pre/post stack effect under `version`.
    ///
    /// `oparg` is the encoded integer argument (0 for opcodes without one)
    /// and `jump` selects the taken branch of conditional jumps, whose
    /// effect may differ from the fallthrough.
    pub fn stack_effect(self, version: PythonVersion, oparg: u32, jump: bool) -> StackEffect {
        use PythonVersion::*;

        let n = u64::from(oparg);
        let wide = |popped: u64, pushed: u64| {
            StackEffect::new(
                popped.min(u64::from(u32::MAX)) as u32,
                pushed.min(u64::from(u32::MAX)) as u32,
            )
        };
        let fixed = |popped: u32, pushed: u32| StackEffect::new(popped, pushed);

        match self {
            Op::Nop | Op::Cache | Op::ExtendedArg | Op::Resume | Op::KwNames => fixed(0, 0),
            Op::SetupAnnotations | Op::PopBlock | Op::MakeCell | Op::CopyFreeVars => fixed(0, 0),
            Op::ReturnConst => fixed(0, 0),
            Op::InterpreterExit => fixed(1, 0),

            Op::PopTop | Op::PrintExpr | Op::ImportStar | Op::GenStart => fixed(1, 0),
            Op::ReturnValue => fixed(1, 0),
            Op::RotTwo => fixed(2, 2),
            Op::RotThree => fixed(3, 3),
            Op::RotFour => fixed(4, 4),
            Op::RotN | Op::Swap => wide(n, n),
            Op::Copy => wide(n, n + 1),
            Op::DupTop => fixed(1, 2),
            Op::DupTopTwo => fixed(2, 4),

            Op::UnaryPositive | Op::UnaryNegative | Op::UnaryNot | Op::UnaryInvert => fixed(1, 1),

            Op::BinaryMatrixMultiply
            | Op::InplaceMatrixMultiply
            | Op::BinaryPower
            | Op::BinaryMultiply
            | Op::BinaryModulo
            | Op::BinaryAdd
            | Op::BinarySubtract
            | Op::BinarySubscr
            | Op::BinaryFloorDivide
            | Op::BinaryTrueDivide
            | Op::InplaceFloorDivide
            | Op::InplaceTrueDivide
            | Op::InplaceAdd
            | Op::InplaceSubtract
            | Op::InplaceMultiply
            | Op::InplaceModulo
            | Op::InplacePower
            | Op::InplaceLshift
            | Op::InplaceRshift
            | Op::InplaceAnd
            | Op::InplaceXor
            | Op::InplaceOr
            | Op::BinaryLshift
            | Op::BinaryRshift
            | Op::BinaryAnd
            | Op::BinaryXor
            | Op::BinaryOr
            | Op::BinaryOp => fixed(2, 1),

            Op::BinarySlice => fixed(3, 1),
            Op::StoreSlice => fixed(4, 0),
            Op::StoreSubscr => fixed(3, 0),
            Op::DeleteSubscr => fixed(2, 0),

            Op::GetIter | Op::GetYieldFromIter | Op::GetAiter | Op::ListToTuple => fixed(1, 1),
            Op::GetAnext => fixed(1, 2),
            Op::GetAwaitable => fixed(1, 1),
            Op::GetLen => fixed(1, 2),

            Op::BeforeAsyncWith | Op::BeforeWith => fixed(1, 2),
            Op::BeginFinally => fixed(0, 6),
            Op::EndFinally | Op::PopFinally => fixed(6, 0),
            Op::WithCleanupStart => fixed(1, 2),
            Op::WithCleanupFinish => fixed(2, 1),
            Op::WithExceptStart => match version {
                V3_11 | V3_12 => fixed(4, 5),
                _ => fixed(7, 8),
            },
            Op::EndAsyncFor => match version {
                V3_11 | V3_12 => fixed(2, 0),
                _ => fixed(7, 0),
            },
            Op::CleanupThrow => fixed(3, 2),
            Op::EndFor => fixed(2, 0),
            Op::EndSend => fixed(2, 1),

            Op::LoadBuildClass
            | Op::LoadAssertionError
            | Op::PushNull
            | Op::ReturnGenerator
            | Op::LoadLocals => fixed(0, 1),

            Op::YieldValue => fixed(1, 1),
            Op::YieldFrom => fixed(2, 1),
            Op::AsyncGenWrap => fixed(1, 1),

            Op::PopExcept => match version {
                V3_11 | V3_12 => fixed(1, 0),
                _ => fixed(3, 0),
            },
            Op::Reraise => match version {
                V3_11 | V3_12 => fixed(1, 0),
                _ => fixed(3, 0),
            },
            Op::PushExcInfo => fixed(1, 2),
            Op::CheckExcMatch | Op::CheckEgMatch => fixed(2, 2),
            Op::PrepReraiseStar => fixed(2, 1),

            Op::StoreName | Op::StoreGlobal | Op::StoreFast | Op::StoreDeref => fixed(1, 0),
            Op::DeleteName
            | Op::DeleteGlobal
            | Op::DeleteFast
            | Op::DeleteDeref => fixed(0, 0),
            Op::StoreAttr => fixed(2, 0),
            Op::DeleteAttr => fixed(1, 0),

            Op::LoadConst
            | Op::LoadName
            | Op::LoadFast
            | Op::LoadFastCheck
            | Op::LoadFastAndClear
            | Op::LoadClosure
            | Op::LoadDeref
            | Op::LoadClassDeref => fixed(0, 1),
            Op::LoadGlobal => match version {
                V3_11 | V3_12 => fixed(0, 1 + (oparg & 1)),
                _ => fixed(0, 1),
            },
            Op::LoadAttr => match version {
                V3_12 => fixed(1, 1 + (oparg & 1)),
                _ => fixed(1, 1),
            },
            Op::LoadMethod => fixed(1, 2),
            Op::LoadSuperAttr => fixed(3, 1 + (oparg & 1)),
            Op::LoadFromDictOrGlobals | Op::LoadFromDictOrDeref => fixed(1, 1),

            Op::UnpackSequence => wide(1, n),
            Op::UnpackEx => wide(1, (n & 0xff) + (n >> 8) + 1),

            Op::BuildTuple
            | Op::BuildList
            | Op::BuildSet
            | Op::BuildString
            | Op::BuildSlice
            | Op::BuildListUnpack
            | Op::BuildMapUnpack
            | Op::BuildMapUnpackWithCall
            | Op::BuildTupleUnpack
            | Op::BuildTupleUnpackWithCall
            | Op::BuildSetUnpack => wide(n, 1),
            Op::BuildMap => wide(2 * n, 1),
            Op::BuildConstKeyMap => wide(n + 1, 1),

            Op::ListAppend | Op::SetAdd => wide(n, n.saturating_sub(1)),
            Op::MapAdd => wide(n + 1, n.saturating_sub(1)),
            Op::ListExtend | Op::SetUpdate | Op::DictUpdate | Op::DictMerge => fixed(2, 1),

            Op::CompareOp | Op::IsOp | Op::ContainsOp => fixed(2, 1),
            Op::JumpIfNotExcMatch => fixed(2, 0),

            Op::ImportName => fixed(2, 1),
            Op::ImportFrom => fixed(1, 2),

            Op::JumpForward
            | Op::JumpAbsolute
            | Op::JumpBackward
            | Op::JumpBackwardNoInterrupt => fixed(0, 0),
            Op::PopJumpIfFalse
            | Op::PopJumpIfTrue
            | Op::PopJumpIfNone
            | Op::PopJumpIfNotNone
            | Op::PopJumpForwardIfFalse
            | Op::PopJumpForwardIfTrue
            | Op::PopJumpForwardIfNone
            | Op::PopJumpForwardIfNotNone
            | Op::PopJumpBackwardIfFalse
            | Op::PopJumpBackwardIfTrue
            | Op::PopJumpBackwardIfNone
            | Op::PopJumpBackwardIfNotNone => fixed(1, 0),
            Op::JumpIfFalseOrPop | Op::JumpIfTrueOrPop => {
                if jump {
                    fixed(1, 1)
                } else {
                    fixed(1, 0)
                }
            }
            Op::ForIter => match version {
                V3_12 => fixed(1, 2),
                _ => {
                    if jump {
                        fixed(1, 0)
                    } else {
                        fixed(1, 2)
                    }
                }
            },
            Op::Send => {
                if jump {
                    fixed(2, 1)
                } else {
                    fixed(2, 2)
                }
            }

            Op::SetupFinally => {
                if jump {
                    fixed(0, 6)
                } else {
                    fixed(0, 0)
                }
            }
            Op::SetupWith => {
                if jump {
                    fixed(1, 8)
                } else {
                    fixed(1, 2)
                }
            }
            Op::SetupAsyncWith => {
                if jump {
                    fixed(0, 6)
                } else {
                    fixed(0, 0)
                }
            }
            Op::CallFinally => fixed(0, 1),

            Op::MatchMapping | Op::MatchSequence => fixed(1, 2),
            Op::MatchKeys => match version {
                V3_11 | V3_12 => fixed(2, 3),
                _ => fixed(2, 4),
            },
            Op::MatchClass => match version {
                V3_11 | V3_12 => fixed(3, 1),
                _ => fixed(3, 2),
            },
            Op::CopyDictWithoutKeys => fixed(2, 2),

            Op::FormatValue => fixed(1 + u32::from(oparg & 0x04 != 0), 1),

            Op::RaiseVarargs => wide(n, 0),
            Op::CallFunction => wide(n + 1, 1),
            Op::CallFunctionKw => wide(n + 2, 1),
            Op::CallFunctionEx => match version {
                V3_11 | V3_12 => fixed(3 + (oparg & 1), 1),
                _ => fixed(2 + (oparg & 1), 1),
            },
            Op::CallMethod => wide(n + 2, 1),
            Op::Precall => wide(n, 0),
            Op::Call => match version {
                V3_12 => wide(n + 2, 1),
                _ => fixed(2, 1),
            },
            Op::CallIntrinsic1 => fixed(1, 1),
            Op::CallIntrinsic2 => fixed(2, 1),

            Op::MakeFunction => {
                let extras = (oparg & 0x0f).count_ones();
                match version {
                    V3_12 => fixed(1 + extras, 1),
                    _ => fixed(2 + extras, 1),
                }
            }
        }
    }
}

/// Bidirectional opcode number mapping for one interpreter version.
pub struct OpcodeTable {
    version: PythonVersion,
    decode: [Option<Op>; 256],
    encode: [Option<u8>; Op::COUNT],
}

impl OpcodeTable {
    fn build(version: PythonVersion, entries: &[(u8, Op)]) -> Self {
        let mut decode = [None; 256];
        let mut encode = [None; Op::COUNT];
        for &(number, op) in entries {
            debug_assert!(decode[number as usize].is_none());
            debug_assert!(encode[op as usize].is_none());
            decode[number as usize] = Some(op);
            encode[op as usize] = Some(number);
        }
        Self {
            version,
            decode,
            encode,
        }
    }

    pub const fn version(&self) -> PythonVersion {
        self.version
    }

    pub fn op(&self, number: u8) -> Result<Op, DecodeError> {
        self.decode[number as usize].ok_or(DecodeError::UnknownOpcode {
            opcode: number,
            version: self.version,
        })
    }

    /// Encode `op` for this version, or `None` when the version lacks it.
    pub fn number(&self, op: Op) -> Option<u8> {
        self.encode[op as usize]
    }

    pub fn defines(&self, op: Op) -> bool {
        self.encode[op as usize].is_some()
    }
}

/// The process-global table for `version`, built on first use.
pub fn opcode_table(version: PythonVersion) -> &'static OpcodeTable {
    const NEW: OnceLock<OpcodeTable> = OnceLock::new();
    static TABLES: [OnceLock<OpcodeTable>; 5] = [NEW; 5];

    TABLES[version.index()].get_or_init(|| {
        let entries = match version {
            PythonVersion::V3_8 => tables::V3_8,
            PythonVersion::V3_9 => tables::V3_9,
            PythonVersion::V3_10 => tables::V3_10,
            PythonVersion::V3_11 => tables::V3_11,
            PythonVersion::V3_12 => tables::V3_12,
        };
        OpcodeTable::build(version, entries)
    })
}

mod tables {
    use super::Op;

    macro_rules! version_entries {
        ($name:ident: $( $num:literal => $op:ident, )*) => {
            pub(super) const $name: &[(u8, Op)] = &[ $( ($num, Op::$op), )* ];
        };
    }

    version_entries! { V3_8:
        1 => PopTop, 2 => RotTwo, 3 => RotThree, 4 => DupTop, 5 => DupTopTwo,
        6 => RotFour, 9 => Nop, 10 => UnaryPositive, 11 => UnaryNegative,
        12 => UnaryNot, 15 => UnaryInvert, 16 => BinaryMatrixMultiply,
        17 => InplaceMatrixMultiply, 19 => BinaryPower, 20 => BinaryMultiply,
        22 => BinaryModulo, 23 => BinaryAdd, 24 => BinarySubtract,
        25 => BinarySubscr, 26 => BinaryFloorDivide, 27 => BinaryTrueDivide,
        28 => InplaceFloorDivide, 29 => InplaceTrueDivide, 50 => GetAiter,
        51 => GetAnext, 52 => BeforeAsyncWith, 53 => BeginFinally,
        54 => EndAsyncFor, 55 => InplaceAdd, 56 => InplaceSubtract,
        57 => InplaceMultiply, 59 => InplaceModulo, 60 => StoreSubscr,
        61 => DeleteSubscr, 62 => BinaryLshift, 63 => BinaryRshift,
        64 => BinaryAnd, 65 => BinaryXor, 66 => BinaryOr, 67 => InplacePower,
        68 => GetIter, 69 => GetYieldFromIter, 70 => PrintExpr,
        71 => LoadBuildClass, 72 => YieldFrom, 73 => GetAwaitable,
        75 => InplaceLshift, 76 => InplaceRshift, 77 => InplaceAnd,
        78 => InplaceXor, 79 => InplaceOr, 81 => WithCleanupStart,
        82 => WithCleanupFinish, 83 => ReturnValue, 84 => ImportStar,
        85 => SetupAnnotations, 86 => YieldValue, 87 => PopBlock,
        88 => EndFinally, 89 => PopExcept, 90 => StoreName, 91 => DeleteName,
        92 => UnpackSequence, 93 => ForIter, 94 => UnpackEx, 95 => StoreAttr,
        96 => DeleteAttr, 97 => StoreGlobal, 98 => DeleteGlobal,
        100 => LoadConst, 101 => LoadName, 102 => BuildTuple, 103 => BuildList,
        104 => BuildSet, 105 => BuildMap, 106 => LoadAttr, 107 => CompareOp,
        108 => ImportName, 109 => ImportFrom, 110 => JumpForward,
        111 => JumpIfFalseOrPop, 112 => JumpIfTrueOrPop, 113 => JumpAbsolute,
        114 => PopJumpIfFalse, 115 => PopJumpIfTrue, 116 => LoadGlobal,
        122 => SetupFinally, 124 => LoadFast, 125 => StoreFast,
        126 => DeleteFast, 130 => RaiseVarargs, 131 => CallFunction,
        132 => MakeFunction, 133 => BuildSlice, 135 => LoadClosure,
        136 => LoadDeref, 137 => StoreDeref, 138 => DeleteDeref,
        141 => CallFunctionKw, 142 => CallFunctionEx, 143 => SetupWith,
        144 => ExtendedArg, 145 => ListAppend, 146 => SetAdd, 147 => MapAdd,
        148 => LoadClassDeref, 149 => BuildListUnpack, 150 => BuildMapUnpack,
        151 => BuildMapUnpackWithCall, 152 => BuildTupleUnpack,
        153 => BuildSetUnpack, 154 => SetupAsyncWith, 155 => FormatValue,
        156 => BuildConstKeyMap, 157 => BuildString,
        158 => BuildTupleUnpackWithCall, 160 => LoadMethod, 161 => CallMethod,
        162 => CallFinally, 163 => PopFinally,
    }

    version_entries! { V3_9:
        1 => PopTop, 2 => RotTwo, 3 => RotThree, 4 => DupTop, 5 => DupTopTwo,
        6 => RotFour, 9 => Nop, 10 => UnaryPositive, 11 => UnaryNegative,
        12 => UnaryNot, 15 => UnaryInvert, 16 => BinaryMatrixMultiply,
        17 => InplaceMatrixMultiply, 19 => BinaryPower, 20 => BinaryMultiply,
        22 => BinaryModulo, 23 => BinaryAdd, 24 => BinarySubtract,
        25 => BinarySubscr, 26 => BinaryFloorDivide, 27 => BinaryTrueDivide,
        28 => InplaceFloorDivide, 29 => InplaceTrueDivide, 48 => Reraise,
        49 => WithExceptStart, 50 => GetAiter, 51 => GetAnext,
        52 => BeforeAsyncWith, 54 => EndAsyncFor, 55 => InplaceAdd,
        56 => InplaceSubtract, 57 => InplaceMultiply, 59 => InplaceModulo,
        60 => StoreSubscr, 61 => DeleteSubscr, 62 => BinaryLshift,
        63 => BinaryRshift, 64 => BinaryAnd, 65 => BinaryXor, 66 => BinaryOr,
        67 => InplacePower, 68 => GetIter, 69 => GetYieldFromIter,
        70 => PrintExpr, 71 => LoadBuildClass, 72 => YieldFrom,
        73 => GetAwaitable, 74 => LoadAssertionError, 75 => InplaceLshift,
        76 => InplaceRshift, 77 => InplaceAnd, 78 => InplaceXor,
        79 => InplaceOr, 82 => ListToTuple, 83 => ReturnValue,
        84 => ImportStar, 85 => SetupAnnotations, 86 => YieldValue,
        87 => PopBlock, 89 => PopExcept, 90 => StoreName, 91 => DeleteName,
        92 => UnpackSequence, 93 => ForIter, 94 => UnpackEx, 95 => StoreAttr,
        96 => DeleteAttr, 97 => StoreGlobal, 98 => DeleteGlobal,
        100 => LoadConst, 101 => LoadName, 102 => BuildTuple, 103 => BuildList,
        104 => BuildSet, 105 => BuildMap, 106 => LoadAttr, 107 => CompareOp,
        108 => ImportName, 109 => ImportFrom, 110 => JumpForward,
        111 => JumpIfFalseOrPop, 112 => JumpIfTrueOrPop, 113 => JumpAbsolute,
        114 => PopJumpIfFalse, 115 => PopJumpIfTrue, 116 => LoadGlobal,
        117 => IsOp, 118 => ContainsOp, 121 => JumpIfNotExcMatch,
        122 => SetupFinally, 124 => LoadFast, 125 => StoreFast,
        126 => DeleteFast, 130 => RaiseVarargs, 131 => CallFunction,
        132 => MakeFunction, 133 => BuildSlice, 135 => LoadClosure,
        136 => LoadDeref, 137 => StoreDeref, 138 => DeleteDeref,
        141 => CallFunctionKw, 142 => CallFunctionEx, 143 => SetupWith,
        144 => ExtendedArg, 145 => ListAppend, 146 => SetAdd, 147 => MapAdd,
        148 => LoadClassDeref, 154 => SetupAsyncWith, 155 => FormatValue,
        156 => BuildConstKeyMap, 157 => BuildString, 160 => LoadMethod,
        161 => CallMethod, 162 => ListExtend, 163 => SetUpdate,
        164 => DictMerge, 165 => DictUpdate,
    }

    version_entries! { V3_10:
        1 => PopTop, 2 => RotTwo, 3 => RotThree, 4 => DupTop, 5 => DupTopTwo,
        6 => RotFour, 9 => Nop, 10 => UnaryPositive, 11 => UnaryNegative,
        12 => UnaryNot, 15 => UnaryInvert, 16 => BinaryMatrixMultiply,
        17 => InplaceMatrixMultiply, 19 => BinaryPower, 20 => BinaryMultiply,
        22 => BinaryModulo, 23 => BinaryAdd, 24 => BinarySubtract,
        25 => BinarySubscr, 26 => BinaryFloorDivide, 27 => BinaryTrueDivide,
        28 => InplaceFloorDivide, 29 => InplaceTrueDivide, 30 => GetLen,
        31 => MatchMapping, 32 => MatchSequence, 33 => MatchKeys,
        34 => CopyDictWithoutKeys, 49 => WithExceptStart, 50 => GetAiter,
        51 => GetAnext, 52 => BeforeAsyncWith, 54 => EndAsyncFor,
        55 => InplaceAdd, 56 => InplaceSubtract, 57 => InplaceMultiply,
        59 => InplaceModulo, 60 => StoreSubscr, 61 => DeleteSubscr,
        62 => BinaryLshift, 63 => BinaryRshift, 64 => BinaryAnd,
        65 => BinaryXor, 66 => BinaryOr, 67 => InplacePower, 68 => GetIter,
        69 => GetYieldFromIter, 70 => PrintExpr, 71 => LoadBuildClass,
        72 => YieldFrom, 73 => GetAwaitable, 74 => LoadAssertionError,
        75 => InplaceLshift, 76 => InplaceRshift, 77 => InplaceAnd,
        78 => InplaceXor, 79 => InplaceOr, 82 => ListToTuple,
        83 => ReturnValue, 84 => ImportStar, 85 => SetupAnnotations,
        86 => YieldValue, 87 => PopBlock, 89 => PopExcept, 90 => StoreName,
        91 => DeleteName, 92 => UnpackSequence, 93 => ForIter, 94 => UnpackEx,
        95 => StoreAttr, 96 => DeleteAttr, 97 => StoreGlobal,
        98 => DeleteGlobal, 99 => RotN, 100 => LoadConst, 101 => LoadName,
        102 => BuildTuple, 103 => BuildList, 104 => BuildSet, 105 => BuildMap,
        106 => LoadAttr, 107 => CompareOp, 108 => ImportName,
        109 => ImportFrom, 110 => JumpForward, 111 => JumpIfFalseOrPop,
        112 => JumpIfTrueOrPop, 113 => JumpAbsolute, 114 => PopJumpIfFalse,
        115 => PopJumpIfTrue, 116 => LoadGlobal, 117 => IsOp,
        118 => ContainsOp, 119 => Reraise, 121 => JumpIfNotExcMatch,
        122 => SetupFinally, 124 => LoadFast, 125 => StoreFast,
        126 => DeleteFast, 129 => GenStart, 130 => RaiseVarargs,
        131 => CallFunction, 132 => MakeFunction, 133 => BuildSlice,
        135 => LoadClosure, 136 => LoadDeref, 137 => StoreDeref,
        138 => DeleteDeref, 141 => CallFunctionKw, 142 => CallFunctionEx,
        143 => SetupWith, 144 => ExtendedArg, 145 => ListAppend, 146 => SetAdd,
        147 => MapAdd, 148 => LoadClassDeref, 152 => MatchClass,
        154 => SetupAsyncWith, 155 => FormatValue, 156 => BuildConstKeyMap,
        157 => BuildString, 160 => LoadMethod, 161 => CallMethod,
        162 => ListExtend, 163 => SetUpdate, 164 => DictMerge,
        165 => DictUpdate,
    }

    version_entries! { V3_11:
        0 => Cache, 1 => PopTop, 2 => PushNull, 9 => Nop, 10 => UnaryPositive,
        11 => UnaryNegative, 12 => UnaryNot, 15 => UnaryInvert,
        25 => BinarySubscr, 30 => GetLen, 31 => MatchMapping,
        32 => MatchSequence, 33 => MatchKeys, 35 => PushExcInfo,
        36 => CheckExcMatch, 37 => CheckEgMatch, 49 => WithExceptStart,
        50 => GetAiter, 51 => GetAnext, 52 => BeforeAsyncWith,
        53 => BeforeWith, 54 => EndAsyncFor, 60 => StoreSubscr,
        61 => DeleteSubscr, 68 => GetIter, 69 => GetYieldFromIter,
        70 => PrintExpr, 71 => LoadBuildClass, 74 => LoadAssertionError,
        75 => ReturnGenerator, 82 => ListToTuple, 83 => ReturnValue,
        84 => ImportStar, 85 => SetupAnnotations, 86 => YieldValue,
        87 => AsyncGenWrap, 88 => PrepReraiseStar, 89 => PopExcept,
        90 => StoreName, 91 => DeleteName, 92 => UnpackSequence,
        93 => ForIter, 94 => UnpackEx, 95 => StoreAttr, 96 => DeleteAttr,
        97 => StoreGlobal, 98 => DeleteGlobal, 99 => Swap, 100 => LoadConst,
        101 => LoadName, 102 => BuildTuple, 103 => BuildList, 104 => BuildSet,
        105 => BuildMap, 106 => LoadAttr, 107 => CompareOp, 108 => ImportName,
        109 => ImportFrom, 110 => JumpForward, 111 => JumpIfFalseOrPop,
        112 => JumpIfTrueOrPop, 114 => PopJumpForwardIfFalse,
        115 => PopJumpForwardIfTrue, 116 => LoadGlobal, 117 => IsOp,
        118 => ContainsOp, 119 => Reraise, 120 => Copy, 122 => BinaryOp,
        123 => Send, 124 => LoadFast, 125 => StoreFast, 126 => DeleteFast,
        128 => PopJumpForwardIfNotNone, 129 => PopJumpForwardIfNone,
        130 => RaiseVarargs, 131 => GetAwaitable, 132 => MakeFunction,
        133 => BuildSlice, 134 => JumpBackwardNoInterrupt, 135 => MakeCell,
        136 => LoadClosure, 137 => LoadDeref, 138 => StoreDeref,
        139 => DeleteDeref, 140 => JumpBackward, 142 => CallFunctionEx,
        144 => ExtendedArg, 145 => ListAppend, 146 => SetAdd, 147 => MapAdd,
        148 => LoadClassDeref, 149 => CopyFreeVars, 151 => Resume,
        152 => MatchClass, 155 => FormatValue, 156 => BuildConstKeyMap,
        157 => BuildString, 160 => LoadMethod, 162 => ListExtend,
        163 => SetUpdate, 164 => DictMerge, 165 => DictUpdate, 166 => Precall,
        171 => Call, 172 => KwNames, 173 => PopJumpBackwardIfNotNone,
        174 => PopJumpBackwardIfNone, 175 => PopJumpBackwardIfFalse,
        176 => PopJumpBackwardIfTrue,
    }

    version_entries! { V3_12:
        0 => Cache, 1 => PopTop, 2 => PushNull, 3 => InterpreterExit,
        4 => EndFor, 5 => EndSend, 9 => Nop, 11 => UnaryNegative,
        12 => UnaryNot, 15 => UnaryInvert, 25 => BinarySubscr,
        26 => BinarySlice, 27 => StoreSlice, 30 => GetLen, 31 => MatchMapping,
        32 => MatchSequence, 33 => MatchKeys, 35 => PushExcInfo,
        36 => CheckExcMatch, 37 => CheckEgMatch, 49 => WithExceptStart,
        50 => GetAiter, 51 => GetAnext, 52 => BeforeAsyncWith,
        53 => BeforeWith, 54 => EndAsyncFor, 55 => CleanupThrow,
        60 => StoreSubscr, 61 => DeleteSubscr, 68 => GetIter,
        69 => GetYieldFromIter, 71 => LoadBuildClass,
        74 => LoadAssertionError, 75 => ReturnGenerator, 83 => ReturnValue,
        85 => SetupAnnotations, 87 => LoadLocals, 89 => PopExcept,
        90 => StoreName, 91 => DeleteName, 92 => UnpackSequence,
        93 => ForIter, 94 => UnpackEx, 95 => StoreAttr, 96 => DeleteAttr,
        97 => StoreGlobal, 98 => DeleteGlobal, 99 => Swap, 100 => LoadConst,
        101 => LoadName, 102 => BuildTuple, 103 => BuildList, 104 => BuildSet,
        105 => BuildMap, 106 => LoadAttr, 107 => CompareOp, 108 => ImportName,
        109 => ImportFrom, 110 => JumpForward, 114 => PopJumpIfFalse,
        115 => PopJumpIfTrue, 116 => LoadGlobal, 117 => IsOp,
        118 => ContainsOp, 119 => Reraise, 120 => Copy, 121 => ReturnConst,
        122 => BinaryOp, 123 => Send, 124 => LoadFast, 125 => StoreFast,
        126 => DeleteFast, 127 => LoadFastCheck, 128 => PopJumpIfNotNone,
        129 => PopJumpIfNone, 130 => RaiseVarargs, 131 => GetAwaitable,
        132 => MakeFunction, 133 => BuildSlice,
        134 => JumpBackwardNoInterrupt, 135 => MakeCell, 136 => LoadClosure,
        137 => LoadDeref, 138 => StoreDeref, 139 => DeleteDeref,
        140 => JumpBackward, 141 => LoadSuperAttr, 142 => CallFunctionEx,
        143 => LoadFastAndClear, 144 => ExtendedArg, 145 => ListAppend,
        146 => SetAdd, 147 => MapAdd, 149 => CopyFreeVars, 150 => YieldValue,
        151 => Resume, 152 => MatchClass, 155 => FormatValue,
        156 => BuildConstKeyMap, 157 => BuildString, 162 => ListExtend,
        163 => SetUpdate, 164 => DictMerge, 165 => DictUpdate, 171 => Call,
        172 => KwNames, 173 => CallIntrinsic1, 174 => CallIntrinsic2,
        175 => LoadFromDictOrGlobals, 176 => LoadFromDictOrDeref,
    }
}
