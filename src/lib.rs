//! Disassemble, edit and reassemble CPython bytecode (3.8 through 3.12).
//!
//! A compiled code unit exists here in three layered forms:
//!
//! - [`ConcreteBytecode`] — the flat opcode sequence with integer arguments,
//!   unit-offset addressing and the decoded exception table, convertible to
//!   and from the packed [`CodeObject`] bit for bit;
//! - [`Bytecode`] — the same sequence with semantic arguments (names,
//!   constants, labels, enum members) and exception regions rendered as
//!   `TryBegin`/`TryEnd` pairs, which is the layer meant for editing;
//! - [`ControlFlowGraph`] — basic blocks linked by fallthrough and jump
//!   edges, hosting the operand-stack depth solver.
//!
//! ```no_run
//! use pyforge::{Bytecode, ConcreteBytecode};
//! # fn load() -> pyforge::CodeObject { unimplemented!() }
//!
//! let code = load();
//! let mut bytecode = ConcreteBytecode::from_code(&code)?.to_bytecode()?;
//! // ... edit the stream ...
//! let rebuilt = bytecode.to_code()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The version-sensitive pieces (opcode tables and the packed-table codecs)
//! live in [`pyforge_core`] and are selected once per unit by the
//! [`PythonVersion`] carried in each header.

pub mod assemble;
pub mod bytecode;
pub mod cfg;
pub mod concrete;
pub mod dump;
pub mod error;
pub mod flags;
pub mod instr;
pub mod stackdepth;

pub(crate) type IndexSet<T> = indexmap::IndexSet<T, ahash::RandomState>;

pub use assemble::AssembleOptions;
pub use bytecode::{Bytecode, CodeMeta};
pub use cfg::{BasicBlock, BlockId, ControlFlowGraph};
pub use concrete::{ConcreteBytecode, ConcreteInstr, FromCodeOptions};
pub use error::{AssembleError, CfgError, DisassembleError, FlagsError, InstrError, StacksizeError};
pub use flags::{infer_flags, InstrSource};
pub use instr::{
    BinaryOperator, Compare, Element, Instr, InstrArg, IntrinsicFunction1, IntrinsicFunction2,
    Label, Target, TryBegin, TryBeginId, TryEnd,
};
pub use stackdepth::StacksizeOptions;

pub use pyforge_core::{
    CodeObject, CompilerFlags, ConstantData, InstrLocation, Op, PythonVersion,
};
