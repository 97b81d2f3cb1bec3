//! Human-readable rendering of the three representations.

use std::fmt;

use itertools::Itertools;

use crate::bytecode::Bytecode;
use crate::cfg::ControlFlowGraph;
use crate::concrete::ConcreteBytecode;
use crate::instr::{Element, InstrArg, Target};

impl fmt::Display for InstrArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Raw(value) => write!(f, "{value}"),
            Self::Const(value) => write!(f, "{value}"),
            Self::Name(name) | Self::Local(name) => write!(f, "{name}"),
            Self::Cell(name) => write!(f, "<cell {name}>"),
            Self::Free(name) => write!(f, "<free {name}>"),
            Self::Jump(target) => write!(f, "{target}"),
            Self::Compare(compare) => write!(f, "{compare:?}"),
            Self::BinaryOp(operator) => write!(f, "{operator:?}"),
            Self::Intrinsic1(func) => write!(f, "{func:?}"),
            Self::Intrinsic2(func) => write!(f, "{func:?}"),
            Self::LoadGlobal { push_null, name } => write!(f, "({push_null}, {name})"),
            Self::LoadAttr {
                call_as_method,
                name,
            } => write!(f, "({call_as_method}, {name})"),
            Self::LoadSuperAttr {
                call_as_method,
                push_null,
                name,
            } => write!(f, "({call_as_method}, {push_null}, {name})"),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(label) => write!(f, "<L{}>", label.0),
            Self::Block(block) => write!(f, "<block{}>", block.0),
        }
    }
}

impl fmt::Display for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, element) in self.elements.iter().enumerate() {
            match element {
                Element::Label(label) => {
                    if index != 0 {
                        writeln!(f)?;
                    }
                    writeln!(f, "L{}:", label.0)?;
                }
                Element::SetLineno(line) => writeln!(f, "    SetLineno {line}")?,
                Element::TryBegin(begin) => writeln!(
                    f,
                    "    TryBegin #{} -> {} (lasti: {}, depth: {})",
                    begin.id().0,
                    begin.target,
                    begin.push_lasti,
                    begin
                        .stack_depth
                        .map_or_else(|| "?".to_owned(), |d| d.to_string()),
                )?,
                Element::TryEnd(end) => writeln!(f, "    TryEnd #{}", end.entry.0)?,
                Element::Instr(instr) => {
                    writeln!(f, "    {:3}: {} {}", index, instr.op().name(), instr.arg())?
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConcreteBytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut offset = 0u32;
        for instr in &self.instrs {
            writeln!(f, "{:4}    {} {}", offset, instr.op().name(), instr.arg())?;
            offset += instr.size_units();
        }
        Ok(())
    }
}

impl fmt::Display for ControlFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, block) in self.iter() {
            writeln!(f, "block{}:", id.0)?;
            for element in &block.elements {
                match element {
                    Element::Instr(instr) => {
                        writeln!(f, "    {} {}", instr.op().name(), instr.arg())?
                    }
                    Element::SetLineno(line) => writeln!(f, "    SetLineno {line}")?,
                    Element::TryBegin(begin) => {
                        writeln!(f, "    TryBegin #{} -> {}", begin.id().0, begin.target)?
                    }
                    Element::TryEnd(end) => writeln!(f, "    TryEnd #{}", end.entry.0)?,
                    Element::Label(label) => writeln!(f, "    L{}:", label.0)?,
                }
            }
            if let Some(next) = block.next_block {
                writeln!(f, "    -> block{}", next.0)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// One-line summary of a unit's pools, in the order they were built.
pub fn describe_pools(code: &ConcreteBytecode) -> String {
    format!(
        "consts: [{}]  names: [{}]  varnames: [{}]",
        code.consts.iter().map(|c| c.to_string()).format(", "),
        code.names.iter().format(", "),
        code.varnames.iter().format(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::{Instr, InstrArg};
    use pyforge_core::{Op, PythonVersion};

    #[test]
    fn renders_labels_and_jumps() {
        let version = PythonVersion::V3_8;
        let mut code = Bytecode::new(version);
        let target = code.new_label();
        code.push(
            Instr::new(
                version,
                Op::JumpForward,
                InstrArg::Jump(Target::Label(target)),
            )
            .unwrap(),
        );
        code.push_label(target);
        code.push(Instr::new(version, Op::ReturnValue, InstrArg::None).unwrap());

        let rendered = code.to_string();
        assert!(rendered.contains("JUMP_FORWARD <L0>"));
        assert!(rendered.contains("L0:"));
        assert!(rendered.contains("RETURN_VALUE"));
    }
}
