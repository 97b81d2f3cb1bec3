use thiserror::Error;

use pyforge_core::{Op, PythonVersion};

use crate::cfg::BlockId;
use crate::instr::{Label, TryBeginId};

/// Failures while constructing or mutating an abstract instruction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstrError {
    #[error("operation {op} argument does not match its category for Python {version}")]
    InvalidArgumentKind { op: &'static str, version: PythonVersion },
    #[error("operation {0} is an encoding artifact and cannot appear in an abstract stream")]
    InvalidInstructionUsage(&'static str),
    #[error("integer argument {0} is outside the range 0..2,147,483,647")]
    ArgOutOfRange(u32),
    #[error(transparent)]
    Location(#[from] pyforge_core::location::LocationError),
}

/// Failures while assembling an abstract stream into concrete form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssembleError {
    #[error("jump targets label {0:?} which is not present in the stream")]
    UnresolvedLabel(Label),
    #[error("label {0:?} appears more than once in the stream")]
    DuplicateLabel(Label),
    #[error("jump offsets did not stabilize after {passes} passes")]
    JumpsUnstable { passes: u32 },
    #[error("docstring differs between the header and the first constant")]
    DuplicateDocstring,
    #[error("instruction {index} carries an argument that violates its category")]
    InvalidArgumentKind { index: usize },
    #[error("instruction {index}: {op} is not available on Python {version}")]
    UnsupportedOpcode {
        index: usize,
        op: &'static str,
        version: PythonVersion,
    },
    #[error("instruction {index} jumps the wrong way for its opcode")]
    JumpOutOfRange { index: usize },
    #[error("{name:?} is neither a cell nor a free variable of this unit")]
    UndefinedCellOrFree { name: String },
    #[error("exception region {0:?} has no stack depth; run the stack-depth pass first")]
    UnsetTryDepth(TryBeginId),
    #[error("exception region {0:?} is never closed by a TryEnd")]
    UnclosedTryBegin(TryBeginId),
    #[error(transparent)]
    Cfg(#[from] CfgError),
    #[error(transparent)]
    Stacksize(#[from] StacksizeError),
    /// The stack-depth pass re-reads the stream through the disassembler.
    #[error(transparent)]
    Decode(#[from] pyforge_core::error::DecodeError),
}

/// Failures while building or flattening a control-flow graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CfgError {
    #[error("jump targets label {0:?} which is not present in the stream")]
    UnresolvedLabel(Label),
    #[error("jump references removed block {0:?}")]
    DanglingBlock(BlockId),
    #[error("block {0:?} has instructions after its jump")]
    JumpNotLast(BlockId),
    #[error("a block-identity target can only appear inside a control-flow graph")]
    BlockTargetOutsideGraph,
    #[error("cannot split block {block:?} at {index}; it has {len} elements")]
    SplitOutOfRange {
        block: BlockId,
        index: usize,
        len: usize,
    },
}

/// Failures of the stack-depth solver.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StacksizeError {
    #[error("operand stack underflows at instruction {index} of block {block:?}")]
    StackUnderflow { block: BlockId, index: usize },
    #[error("operand stack depth overflows at instruction {index} of block {block:?}")]
    StackOverflow { block: BlockId, index: usize },
    #[error("block {block:?} is entered at two different stack depths ({first} and {second})")]
    InconsistentStack {
        block: BlockId,
        first: u32,
        second: u32,
    },
    #[error("block {block:?} jumps to a label; only block targets can be solved")]
    UnresolvedTarget { block: BlockId },
}

/// Failures of flag inference.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlagsError {
    #[error(
        "the ITERABLE_COROUTINE flag is set but the unit contains async-only \
         instructions; unset the flag before running inference"
    )]
    IterableCoroutineWithAsyncOps,
    #[error("is_async is false but the unit contains async-only instructions")]
    SyncWithAsyncOps,
}

/// Helper shared by the stream layers when reporting an opcode missing from
/// a version's table.
pub(crate) fn unsupported(index: usize, op: Op, version: PythonVersion) -> AssembleError {
    AssembleError::UnsupportedOpcode {
        index,
        op: op.name(),
        version,
    }
}

/// Disassembly surfaces the core decoding taxonomy unchanged.
pub use pyforge_core::error::DecodeError as DisassembleError;
