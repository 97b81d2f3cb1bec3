//! Re-derive the instruction-determined compiler flags of a code unit.
//!
//! The inference is conservative about asynchrony: it never turns a
//! previously asynchronous unit into a synchronous one, because the
//! instructions alone cannot distinguish a coroutine from the generator it
//! desugars to.

use std::collections::HashSet;

use pyforge_core::{ArgKind, CompilerFlags, Op, PythonVersion};

use crate::bytecode::Bytecode;
use crate::cfg::ControlFlowGraph;
use crate::concrete::ConcreteBytecode;
use crate::error::FlagsError;
use crate::instr::Element;

/// Any representation whose instructions and header the inferer can read.
pub trait InstrSource {
    fn version(&self) -> PythonVersion;
    fn existing_flags(&self) -> CompilerFlags;
    /// Whether the unit captures or provides closure variables.
    fn has_cell_or_free(&self) -> bool;
    fn visit_ops(&self, visit: &mut dyn FnMut(Op, u32));
}

impl InstrSource for Bytecode {
    fn version(&self) -> PythonVersion {
        self.meta.version
    }

    fn existing_flags(&self) -> CompilerFlags {
        self.meta.flags
    }

    fn has_cell_or_free(&self) -> bool {
        !self.meta.cellvars.is_empty() || !self.meta.freevars.is_empty()
    }

    fn visit_ops(&self, visit: &mut dyn FnMut(Op, u32)) {
        for instr in self.instrs() {
            visit(instr.op(), instr.arg().effect_oparg());
        }
    }
}

impl InstrSource for ConcreteBytecode {
    fn version(&self) -> PythonVersion {
        self.meta.version
    }

    fn existing_flags(&self) -> CompilerFlags {
        self.meta.flags
    }

    fn has_cell_or_free(&self) -> bool {
        !self.meta.cellvars.is_empty() || !self.meta.freevars.is_empty()
    }

    fn visit_ops(&self, visit: &mut dyn FnMut(Op, u32)) {
        for instr in &self.instrs {
            visit(instr.op(), instr.arg());
        }
    }
}

impl InstrSource for ControlFlowGraph {
    fn version(&self) -> PythonVersion {
        self.meta.version
    }

    fn existing_flags(&self) -> CompilerFlags {
        self.meta.flags
    }

    fn has_cell_or_free(&self) -> bool {
        !self.meta.cellvars.is_empty() || !self.meta.freevars.is_empty()
    }

    fn visit_ops(&self, visit: &mut dyn FnMut(Op, u32)) {
        for (_, block) in self.iter() {
            for element in &block.elements {
                if let Element::Instr(instr) = element {
                    visit(instr.op(), instr.arg().effect_oparg());
                }
            }
        }
    }
}

/// A `YIELD_VALUE` that is not immediately resumed by an `await`-flavoured
/// `RESUME` marks a true generator.
fn is_generator(ops: &[(Op, u32)]) -> bool {
    let mut found_yield = false;
    for &(op, arg) in ops {
        if found_yield {
            if op == Op::Resume && arg & 3 == 3 {
                // The yield belonged to an await.
                found_yield = false;
                continue;
            }
            break;
        }
        if op == Op::YieldValue {
            found_yield = true;
        }
    }
    found_yield
}

/// Recompute the flags determined by the instruction stream.
///
/// `is_async` forces coroutine classification when `Some(true)`, forbids it
/// when `Some(false)`, and infers from the instructions and the existing
/// flags when `None`. Flags the instructions cannot determine (`NEWLOCALS`,
/// `VARARGS`, `VARKEYWORDS`, `NESTED`) are copied through unchanged.
pub fn infer_flags(
    code: &impl InstrSource,
    is_async: Option<bool>,
) -> Result<CompilerFlags, FlagsError> {
    let mut ops = Vec::new();
    code.visit_ops(&mut |op, arg| ops.push((op, arg)));
    let present: HashSet<Op> = ops.iter().map(|&(op, _)| op).collect();
    let existing = code.existing_flags();
    let version = code.version();

    let mut flags = CompilerFlags::empty();

    if !present
        .iter()
        .any(|op| matches!(op, Op::StoreName | Op::LoadName | Op::DeleteName))
    {
        flags |= CompilerFlags::OPTIMIZED;
    }

    if !code.has_cell_or_free()
        && !present
            .iter()
            .any(|op| op.arg_kind(version) == ArgKind::Free)
    {
        flags |= CompilerFlags::NOFREE;
    }

    flags |= existing
        & (CompilerFlags::NEWLOCALS
            | CompilerFlags::VARARGS
            | CompilerFlags::VARKEYWORDS
            | CompilerFlags::NESTED);

    let maybe_generator = present
        .iter()
        .any(|op| matches!(op, Op::YieldValue | Op::YieldFrom | Op::ReturnGenerator));
    let sure_async = present.iter().any(|op| {
        matches!(
            op,
            Op::GetAwaitable
                | Op::GetAiter
                | Op::GetAnext
                | Op::BeforeAsyncWith
                | Op::SetupAsyncWith
                | Op::EndAsyncFor
                | Op::AsyncGenWrap
        )
    });

    if is_async != Some(false) {
        let sure_generator = is_generator(&ops);

        if existing.contains(CompilerFlags::COROUTINE) {
            flags |= if sure_generator {
                CompilerFlags::ASYNC_GENERATOR
            } else {
                CompilerFlags::COROUTINE
            };
        } else if existing.contains(CompilerFlags::ITERABLE_COROUTINE) {
            if sure_async {
                return Err(FlagsError::IterableCoroutineWithAsyncOps);
            }
            flags |= CompilerFlags::ITERABLE_COROUTINE;
        } else if existing.contains(CompilerFlags::ASYNC_GENERATOR) {
            flags |= if sure_generator {
                CompilerFlags::ASYNC_GENERATOR
            } else {
                CompilerFlags::COROUTINE
            };
        } else if sure_async {
            flags |= if sure_generator {
                CompilerFlags::ASYNC_GENERATOR
            } else {
                CompilerFlags::COROUTINE
            };
        } else if maybe_generator {
            if is_async == Some(true) {
                flags |= if sure_generator {
                    CompilerFlags::ASYNC_GENERATOR
                } else {
                    CompilerFlags::COROUTINE
                };
            } else {
                flags |= CompilerFlags::GENERATOR;
            }
        } else if is_async == Some(true) {
            flags |= CompilerFlags::COROUTINE;
        }
    } else {
        if sure_async {
            return Err(FlagsError::SyncWithAsyncOps);
        }
        if maybe_generator {
            flags |= CompilerFlags::GENERATOR;
        }
    }

    flags |= existing & CompilerFlags::FUTURE_GENERATOR_STOP;

    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::{Instr, InstrArg};
    use pyforge_core::ConstantData;

    const V38: PythonVersion = PythonVersion::V3_8;

    fn function_body() -> Bytecode {
        let mut code = Bytecode::new(V38);
        code.push(Instr::new(V38, Op::LoadFast, InstrArg::Local("x".into())).unwrap());
        code.push(Instr::new(V38, Op::ReturnValue, InstrArg::None).unwrap());
        code
    }

    #[test]
    fn locals_only_units_are_optimized_and_free_of_cells() {
        let flags = infer_flags(&function_body(), None).unwrap();
        assert!(flags.contains(CompilerFlags::OPTIMIZED));
        assert!(flags.contains(CompilerFlags::NOFREE));
        assert!(!flags.contains(CompilerFlags::GENERATOR));
    }

    #[test]
    fn module_style_name_access_is_not_optimized() {
        let mut code = Bytecode::new(V38);
        code.push(Instr::new(V38, Op::LoadName, InstrArg::Name("x".into())).unwrap());
        code.push(Instr::new(V38, Op::ReturnValue, InstrArg::None).unwrap());
        let flags = infer_flags(&code, None).unwrap();
        assert!(!flags.contains(CompilerFlags::OPTIMIZED));
    }

    #[test]
    fn yield_makes_a_generator_unless_async() {
        let mut code = Bytecode::new(V38);
        code.push(Instr::new(V38, Op::LoadConst, InstrArg::Const(ConstantData::None)).unwrap());
        code.push(Instr::new(V38, Op::YieldValue, InstrArg::None).unwrap());
        code.push(Instr::new(V38, Op::ReturnValue, InstrArg::None).unwrap());

        let flags = infer_flags(&code, None).unwrap();
        assert!(flags.contains(CompilerFlags::GENERATOR));

        let flags = infer_flags(&code, Some(true)).unwrap();
        assert!(flags.contains(CompilerFlags::ASYNC_GENERATOR));
        assert!(!flags.contains(CompilerFlags::GENERATOR));
    }

    #[test]
    fn async_ops_force_coroutines() {
        let mut code = Bytecode::new(V38);
        code.push(Instr::new(V38, Op::LoadFast, InstrArg::Local("x".into())).unwrap());
        code.push(Instr::new(V38, Op::GetAwaitable, InstrArg::None).unwrap());
        code.push(Instr::new(V38, Op::ReturnValue, InstrArg::None).unwrap());

        let flags = infer_flags(&code, None).unwrap();
        assert!(flags.contains(CompilerFlags::COROUTINE));

        assert_eq!(
            infer_flags(&code, Some(false)).unwrap_err(),
            FlagsError::SyncWithAsyncOps
        );
    }

    #[test]
    fn inference_is_idempotent() {
        let mut code = function_body();
        let first = infer_flags(&code, None).unwrap();
        code.meta.flags = first;
        let second = infer_flags(&code, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cells_suppress_nofree() {
        let mut code = function_body();
        code.meta.cellvars.push("x".into());
        let flags = infer_flags(&code, None).unwrap();
        assert!(!flags.contains(CompilerFlags::NOFREE));
    }
}
