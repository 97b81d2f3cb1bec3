//! Abstract instructions and the pseudo-elements of an abstract stream.
//!
//! An abstract instruction carries a semantic argument (a name, a constant,
//! a jump target, an enum member) instead of a pool index. The argument
//! variant and the opcode's category are checked against each other at
//! construction and on every mutation, so an instruction carrying a jump
//! target can never masquerade as one carrying a name index.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use pyforge_core::{ArgKind, ConstantData, InstrLocation, Op, PythonVersion, StackEffect};

use crate::cfg::BlockId;
use crate::error::InstrError;

/// Opaque position marker, used as a jump target inside an abstract stream.
///
/// Labels are identities, not positions: they are allocated from a
/// per-stream counter ([`crate::Bytecode::new_label`]) and survive any
/// amount of stream editing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

/// Identity of a `TryBegin`, referenced by its matching `TryEnd`s.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TryBeginId(pub(crate) u32);

/// A jump destination: a label inside an abstract stream, a block inside a
/// control-flow graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Label(Label),
    Block(BlockId),
}

/// The comparison selected by `COMPARE_OP`.
///
/// `In` through `ExcMatch` only exist on 3.8; later versions moved them to
/// dedicated opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Compare {
    Less = 0,
    LessOrEqual = 1,
    Equal = 2,
    NotEqual = 3,
    Greater = 4,
    GreaterOrEqual = 5,
    In = 6,
    NotIn = 7,
    Is = 8,
    IsNot = 9,
    ExcMatch = 10,
}

impl Compare {
    /// The low "result mask" bits packed next to the operation on 3.12.
    pub const fn mask(self) -> u32 {
        match self {
            Self::Less => 2,
            Self::LessOrEqual => 2 + 8,
            Self::Equal => 8,
            Self::NotEqual => 1 + 2 + 4,
            Self::Greater => 4,
            Self::GreaterOrEqual => 4 + 8,
            // Not encodable past 3.8; rejected before this is consulted.
            _ => 0,
        }
    }
}

/// The operation selected by `BINARY_OP` (3.11+).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BinaryOperator {
    Add = 0,
    And = 1,
    FloorDivide = 2,
    Lshift = 3,
    MatrixMultiply = 4,
    Multiply = 5,
    Remainder = 6,
    Or = 7,
    Power = 8,
    Rshift = 9,
    Subtract = 10,
    TrueDivide = 11,
    Xor = 12,
    InplaceAdd = 13,
    InplaceAnd = 14,
    InplaceFloorDivide = 15,
    InplaceLshift = 16,
    InplaceMatrixMultiply = 17,
    InplaceMultiply = 18,
    InplaceRemainder = 19,
    InplaceOr = 20,
    InplacePower = 21,
    InplaceRshift = 22,
    InplaceSubtract = 23,
    InplaceTrueDivide = 24,
    InplaceXor = 25,
}

/// Intrinsic selected by `CALL_INTRINSIC_1` (3.12).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum IntrinsicFunction1 {
    Print = 1,
    ImportStar = 2,
    StopIterationError = 3,
    AsyncGenWrap = 4,
    UnaryPositive = 5,
    ListToTuple = 6,
    TypeVar = 7,
    ParamSpec = 8,
    TypeVarTuple = 9,
    SubscriptGeneric = 10,
    TypeAlias = 11,
}

/// Intrinsic selected by `CALL_INTRINSIC_2` (3.12).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum IntrinsicFunction2 {
    PrepReraiseStar = 1,
    TypeVarWithBound = 2,
    TypeVarWithConstraint = 3,
    SetFunctionTypeParams = 4,
}

/// Semantic argument of an abstract instruction.
///
/// `Cell` and `Free` are distinct variants even though both encode into the
/// `hasfree` index space: one spelling may legally denote a cell variable
/// and a free variable in the same unit.
#[derive(Clone, Debug, PartialEq)]
pub enum InstrArg {
    None,
    Raw(u32),
    Const(ConstantData),
    Name(String),
    Local(String),
    Cell(String),
    Free(String),
    Jump(Target),
    Compare(Compare),
    BinaryOp(BinaryOperator),
    Intrinsic1(IntrinsicFunction1),
    Intrinsic2(IntrinsicFunction2),
    LoadGlobal {
        push_null: bool,
        name: String,
    },
    LoadAttr {
        call_as_method: bool,
        name: String,
    },
    LoadSuperAttr {
        call_as_method: bool,
        push_null: bool,
        name: String,
    },
}

impl InstrArg {
    fn matches(&self, kind: ArgKind) -> bool {
        match kind {
            ArgKind::NoArg => matches!(self, Self::None),
            ArgKind::JumpAbs | ArgKind::JumpFwd | ArgKind::JumpBack => {
                matches!(self, Self::Jump(_))
            }
            ArgKind::Local => matches!(self, Self::Local(_)),
            ArgKind::Name => matches!(self, Self::Name(_)),
            ArgKind::Free => matches!(self, Self::Cell(_) | Self::Free(_)),
            ArgKind::Const => matches!(self, Self::Const(_)),
            ArgKind::Compare => matches!(self, Self::Compare(_)),
            ArgKind::BinaryOp => matches!(self, Self::BinaryOp(_)),
            ArgKind::Intrinsic1 => matches!(self, Self::Intrinsic1(_)),
            ArgKind::Intrinsic2 => matches!(self, Self::Intrinsic2(_)),
            ArgKind::LoadGlobal => matches!(self, Self::LoadGlobal { .. }),
            ArgKind::LoadAttr => matches!(self, Self::LoadAttr { .. }),
            ArgKind::LoadSuperAttr => matches!(self, Self::LoadSuperAttr { .. }),
            ArgKind::Raw => matches!(self, Self::Raw(_)),
        }
    }

    /// The integer the stack-effect tables care about: the raw value for
    /// `Raw` arguments, the flag bits for the flag-carrying loads, zero for
    /// everything resolved through a pool.
    pub(crate) fn effect_oparg(&self) -> u32 {
        match self {
            Self::Raw(value) => *value,
            Self::LoadGlobal { push_null, .. } => u32::from(*push_null),
            Self::LoadAttr { call_as_method, .. } => u32::from(*call_as_method),
            Self::LoadSuperAttr {
                call_as_method,
                push_null,
                ..
            } => u32::from(*call_as_method) | (u32::from(*push_null) << 1),
            _ => 0,
        }
    }
}

/// An abstract instruction.
///
/// The fields are private: `op` and `arg` can only change together through
/// [`Instr::set`], which re-validates the pairing, so the "argument matches
/// category" invariant holds for the instruction's whole life.
#[derive(Clone, Debug, PartialEq)]
pub struct Instr {
    op: Op,
    arg: InstrArg,
    location: Option<InstrLocation>,
}

impl Instr {
    pub fn new(version: PythonVersion, op: Op, arg: InstrArg) -> Result<Self, InstrError> {
        let mut instr = Self {
            op: Op::Nop,
            arg: InstrArg::None,
            location: None,
        };
        instr.set(version, op, arg)?;
        Ok(instr)
    }

    pub fn with_location(
        version: PythonVersion,
        op: Op,
        arg: InstrArg,
        location: InstrLocation,
    ) -> Result<Self, InstrError> {
        location.check(version)?;
        let mut instr = Self::new(version, op, arg)?;
        instr.location = Some(location);
        Ok(instr)
    }

    pub fn with_lineno(
        version: PythonVersion,
        op: Op,
        arg: InstrArg,
        lineno: u32,
    ) -> Result<Self, InstrError> {
        Self::with_location(version, op, arg, InstrLocation::line(lineno))
    }

    /// Replace opcode and argument atomically, leaving the location alone.
    pub fn set(&mut self, version: PythonVersion, op: Op, arg: InstrArg) -> Result<(), InstrError> {
        if op.is_artificial() {
            return Err(InstrError::InvalidInstructionUsage(op.name()));
        }
        if !arg.matches(op.arg_kind(version)) {
            return Err(InstrError::InvalidArgumentKind {
                op: op.name(),
                version,
            });
        }
        if let InstrArg::Raw(value) = arg {
            if value > 0x7fff_ffff {
                return Err(InstrError::ArgOutOfRange(value));
            }
        }
        self.op = op;
        self.arg = arg;
        Ok(())
    }

    pub fn set_arg(&mut self, version: PythonVersion, arg: InstrArg) -> Result<(), InstrError> {
        self.set(version, self.op, arg)
    }

    pub const fn op(&self) -> Op {
        self.op
    }

    pub const fn arg(&self) -> &InstrArg {
        &self.arg
    }

    pub const fn location(&self) -> Option<InstrLocation> {
        self.location
    }

    pub fn set_location(&mut self, location: Option<InstrLocation>) {
        self.location = location;
    }

    pub fn lineno(&self) -> Option<u32> {
        self.location.and_then(|loc| loc.lineno)
    }

    pub fn jump_target(&self) -> Option<Target> {
        match &self.arg {
            InstrArg::Jump(target) => Some(*target),
            _ => None,
        }
    }

    pub fn has_jump(&self) -> bool {
        matches!(self.arg, InstrArg::Jump(_))
    }

    pub const fn is_uncond_jump(&self) -> bool {
        self.op.is_uncond_jump()
    }

    pub fn is_cond_jump(&self) -> bool {
        self.has_jump() && !self.is_uncond_jump()
    }

    /// Does control never reach the next element?
    pub const fn is_final(&self) -> bool {
        self.op.is_final()
    }

    pub fn stack_effect(&self, version: PythonVersion, jump: bool) -> StackEffect {
        self.op.stack_effect(version, self.arg.effect_oparg(), jump)
    }

    /// Rewrite the jump target in place, for the CFG builder and flattener.
    pub(crate) fn retarget(&mut self, target: Target) {
        debug_assert!(self.has_jump());
        self.arg = InstrArg::Jump(target);
    }
}

/// Start of an exception-covered region.
#[derive(Clone, Debug, PartialEq)]
pub struct TryBegin {
    pub(crate) id: TryBeginId,
    pub target: Target,
    pub push_lasti: bool,
    /// Operand-stack depth at which the handler runs; solved by the
    /// stack-depth pass when absent.
    pub stack_depth: Option<u32>,
}

impl TryBegin {
    pub const fn id(&self) -> TryBeginId {
        self.id
    }
}

/// End of an exception-covered region, paired to its begin by identity.
///
/// Several `TryEnd`s may reference one begin when conditional jumps exit
/// the region; at most one is active on any path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TryEnd {
    pub entry: TryBeginId,
}

/// One element of an abstract stream or basic block.
///
/// Everything except `Instr` is a pseudo-instruction: present in the stream,
/// absent from the encoded bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum Element {
    Instr(Instr),
    Label(Label),
    SetLineno(u32),
    TryBegin(TryBegin),
    TryEnd(TryEnd),
}

impl Element {
    pub fn as_instr(&self) -> Option<&Instr> {
        match self {
            Self::Instr(instr) => Some(instr),
            _ => None,
        }
    }

    pub fn as_instr_mut(&mut self) -> Option<&mut Instr> {
        match self {
            Self::Instr(instr) => Some(instr),
            _ => None,
        }
    }
}

impl From<Instr> for Element {
    fn from(instr: Instr) -> Self {
        Self::Instr(instr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V38: PythonVersion = PythonVersion::V3_8;
    const V312: PythonVersion = PythonVersion::V3_12;

    #[test]
    fn argument_kind_is_enforced() {
        // A jump opcode cannot carry a name.
        let err = Instr::new(V38, Op::JumpForward, InstrArg::Name("x".into())).unwrap_err();
        assert!(matches!(err, InstrError::InvalidArgumentKind { .. }));

        // A name opcode cannot carry a jump target.
        let err = Instr::new(
            V38,
            Op::LoadName,
            InstrArg::Jump(Target::Label(Label(0))),
        )
        .unwrap_err();
        assert!(matches!(err, InstrError::InvalidArgumentKind { .. }));

        assert!(Instr::new(V38, Op::LoadName, InstrArg::Name("x".into())).is_ok());
    }

    #[test]
    fn kind_checks_follow_the_version() {
        // LOAD_GLOBAL takes a plain name through 3.10 and a flagged name
        // from 3.11.
        assert!(Instr::new(V38, Op::LoadGlobal, InstrArg::Name("print".into())).is_ok());
        assert!(Instr::new(
            PythonVersion::V3_11,
            Op::LoadGlobal,
            InstrArg::Name("print".into())
        )
        .is_err());
        assert!(Instr::new(
            PythonVersion::V3_11,
            Op::LoadGlobal,
            InstrArg::LoadGlobal {
                push_null: true,
                name: "print".into()
            }
        )
        .is_ok());
    }

    #[test]
    fn artificial_opcodes_are_rejected() {
        let err = Instr::new(V38, Op::ExtendedArg, InstrArg::Raw(1)).unwrap_err();
        assert_eq!(err, InstrError::InvalidInstructionUsage("EXTENDED_ARG"));
        let err = Instr::new(V312, Op::Cache, InstrArg::None).unwrap_err();
        assert_eq!(err, InstrError::InvalidInstructionUsage("CACHE"));
    }

    #[test]
    fn raw_arguments_are_range_checked() {
        assert!(Instr::new(V38, Op::BuildTuple, InstrArg::Raw(0x7fff_ffff)).is_ok());
        let err = Instr::new(V38, Op::BuildTuple, InstrArg::Raw(0x8000_0000)).unwrap_err();
        assert_eq!(err, InstrError::ArgOutOfRange(0x8000_0000));
    }

    #[test]
    fn set_replaces_op_and_arg_atomically() {
        let mut instr = Instr::new(V38, Op::LoadName, InstrArg::Name("x".into())).unwrap();
        // Changing to an opcode of another category with the old argument
        // must fail and leave the instruction untouched.
        let err = instr
            .set(V38, Op::BuildTuple, InstrArg::Name("x".into()))
            .unwrap_err();
        assert!(matches!(err, InstrError::InvalidArgumentKind { .. }));
        assert_eq!(instr.op(), Op::LoadName);

        instr.set(V38, Op::BuildTuple, InstrArg::Raw(2)).unwrap();
        assert_eq!(instr.op(), Op::BuildTuple);
        assert_eq!(instr.arg(), &InstrArg::Raw(2));
    }

    #[test]
    fn cell_and_free_share_a_category() {
        assert!(Instr::new(V38, Op::LoadDeref, InstrArg::Cell("x".into())).is_ok());
        assert!(Instr::new(V38, Op::LoadDeref, InstrArg::Free("x".into())).is_ok());
        assert!(Instr::new(V38, Op::LoadDeref, InstrArg::Name("x".into())).is_err());
    }

    #[test]
    fn stack_effect_uses_the_flag_bits() {
        let instr = Instr::new(
            PythonVersion::V3_11,
            Op::LoadGlobal,
            InstrArg::LoadGlobal {
                push_null: true,
                name: "f".into(),
            },
        )
        .unwrap();
        assert_eq!(instr.stack_effect(PythonVersion::V3_11, false).pushed(), 2);
    }
}
