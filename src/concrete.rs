//! The concrete stream: instructions with integer arguments at byte-level
//! fidelity, and the conversions to and from the packed code object.
//!
//! The disassembler to the abstract layer also lives here: it resolves pool
//! indices into semantic values, materializes labels, and rebuilds
//! `TryBegin`/`TryEnd` pairs from the exception table.

use std::collections::HashMap;

use log::debug;

use pyforge_core::error::DecodeError;
use pyforge_core::exception_table::{decode_exception_table, encode_exception_table};
use pyforge_core::linetable::{
    decode_lnotab, decode_pairs, decode_positions, encode_lnotab, encode_pairs, encode_positions,
    LineRecord,
};
use pyforge_core::version::LineTableKind;
use pyforge_core::{
    ArgKind, CodeObject, ExceptionTableEntry, InstrLocation, Op, PythonVersion,
};

use crate::assemble::AssembleOptions;
use crate::bytecode::{Bytecode, CodeMeta};
use crate::cfg::ControlFlowGraph;
use crate::error::{AssembleError, InstrError};
use crate::instr::{
    BinaryOperator, Compare, Element, Instr, InstrArg, IntrinsicFunction1, IntrinsicFunction2,
    Label, Target, TryBegin, TryBeginId, TryEnd,
};
use crate::stackdepth::StacksizeOptions;

/// A concrete instruction: an opcode plus an unsigned integer argument.
///
/// `extended_args`, when set, pins the encoded width so that zero-valued
/// `EXTENDED_ARG` prefixes survive a round trip byte for byte.
#[derive(Clone, Debug, PartialEq)]
pub struct ConcreteInstr {
    op: Op,
    arg: u32,
    pub location: Option<InstrLocation>,
    extended_args: Option<u32>,
}

impl ConcreteInstr {
    pub fn new(op: Op, arg: u32) -> Result<Self, InstrError> {
        if arg > 0x7fff_ffff {
            return Err(InstrError::ArgOutOfRange(arg));
        }
        Ok(Self {
            op,
            arg,
            location: None,
            extended_args: None,
        })
    }

    pub fn with_extended_args(op: Op, arg: u32, extended_args: u32) -> Result<Self, InstrError> {
        let mut instr = Self::new(op, arg)?;
        instr.extended_args = Some(extended_args);
        Ok(instr)
    }

    pub const fn op(&self) -> Op {
        self.op
    }

    pub const fn arg(&self) -> u32 {
        self.arg
    }

    pub const fn extended_args(&self) -> Option<u32> {
        self.extended_args
    }

    pub(crate) fn set_arg(&mut self, arg: u32) {
        self.arg = arg;
    }

    pub(crate) fn set_extended_args(&mut self, extended_args: Option<u32>) {
        self.extended_args = extended_args;
    }

    /// Code units occupied by the argument alone, minus the instruction.
    pub(crate) fn natural_extras(arg: u32) -> u32 {
        u32::from(arg > 0xff) + u32::from(arg > 0xff_ff) + u32::from(arg > 0xff_ff_ff)
    }

    /// Encoded size in code units, `EXTENDED_ARG` prefixes included.
    pub fn size_units(&self) -> u32 {
        let natural = Self::natural_extras(self.arg);
        1 + self.extended_args.map_or(natural, |n| n.max(natural))
    }

    /// Unit offset this instruction transfers control to, if it jumps.
    pub(crate) fn jump_target_units(
        &self,
        version: PythonVersion,
        offset: u32,
    ) -> Result<Option<u32>, DecodeError> {
        let kind = self.op.arg_kind(version);
        if !kind.is_jump() {
            return Ok(None);
        }
        // Jump arguments are bytes before 3.10 and code units after.
        let arg_units = if version.offsets_in_code_units() {
            self.arg
        } else {
            if self.arg % 2 != 0 {
                return Err(DecodeError::BadJumpTarget { offset });
            }
            self.arg / 2
        };
        let mut base = offset + self.size_units();
        if version.jumps_skip_caches() {
            base += self.op.cache_slots(version);
        }
        let target = match kind {
            ArgKind::JumpAbs => arg_units,
            ArgKind::JumpFwd => base + arg_units,
            ArgKind::JumpBack => base
                .checked_sub(arg_units)
                .ok_or(DecodeError::BadJumpTarget { offset })?,
            _ => unreachable!(),
        };
        Ok(Some(target))
    }

    fn assemble_into(&self, out: &mut Vec<u8>, number: u8, extended_arg_number: u8) {
        let extras = self.size_units() - 1;
        let bytes = self.arg.to_le_bytes();
        for i in (1..=extras).rev() {
            out.push(extended_arg_number);
            out.push(bytes.get(i as usize).copied().unwrap_or(0));
        }
        out.push(number);
        out.push(bytes[0]);
    }
}

/// Options for [`ConcreteBytecode::from_code`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FromCodeOptions {
    /// Keep `EXTENDED_ARG` opcodes as standalone instructions instead of
    /// folding them into their terminal instruction.
    pub keep_extended_args: bool,
}

/// A code unit in concrete form: the instruction sequence with unit-offset
/// addressing, plus the pools and the decoded exception table.
#[derive(Clone, Debug)]
pub struct ConcreteBytecode {
    pub meta: CodeMeta,
    pub instrs: Vec<ConcreteInstr>,
    pub consts: Vec<pyforge_core::ConstantData>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub exception_table: Vec<ExceptionTableEntry>,
}

impl ConcreteBytecode {
    pub fn new(version: PythonVersion) -> Self {
        Self {
            meta: CodeMeta::new(version),
            instrs: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            exception_table: Vec::new(),
        }
    }

    pub const fn version(&self) -> PythonVersion {
        self.meta.version
    }

    /// Total size of the stream in code units.
    pub fn size_units(&self) -> u32 {
        self.instrs.iter().map(ConcreteInstr::size_units).sum()
    }

    // --- code object -> concrete

    pub fn from_code(code: &CodeObject) -> Result<Self, DecodeError> {
        Self::from_code_with(code, FromCodeOptions::default())
    }

    pub fn from_code_with(code: &CodeObject, options: FromCodeOptions) -> Result<Self, DecodeError> {
        let version = code.version;
        let table = pyforge_core::opcode_table(version);

        if code.code.len() % 2 != 0 {
            return Err(DecodeError::TruncatedCode);
        }

        // One instruction per code unit; prefixes are folded below.
        let mut instrs = Vec::with_capacity(code.code.len() / 2);
        for unit in code.code.chunks_exact(2) {
            let op = table.op(unit[0])?;
            instrs.push(ConcreteInstr {
                op,
                arg: u32::from(unit[1]),
                location: None,
                extended_args: None,
            });
        }

        attach_locations(version, code, &mut instrs)?;

        if !options.keep_extended_args {
            instrs = fold_extended_args(instrs)?;
        }

        let exception_table = if version.has_exception_table() {
            decode_exception_table(&code.exceptiontable)?
        } else {
            Vec::new()
        };

        let mut meta = CodeMeta::new(version);
        meta.name = code.name.clone();
        meta.qualname = code.qualname.clone();
        meta.filename = code.filename.clone();
        meta.flags = code.flags;
        meta.first_lineno = code.first_lineno;
        meta.argcount = code.argcount;
        meta.posonlyargcount = code.posonlyargcount;
        meta.kwonlyargcount = code.kwonlyargcount;
        meta.cellvars = code.cellvars.clone();
        meta.freevars = code.freevars.clone();
        meta.docstring = code
            .consts
            .first()
            .and_then(|c| c.as_docstring())
            .cloned();

        Ok(Self {
            meta,
            instrs,
            consts: code.consts.clone(),
            names: code.names.clone(),
            varnames: code.varnames.clone(),
            exception_table,
        })
    }

    // --- concrete -> code object

    pub fn to_code(&self) -> Result<CodeObject, AssembleError> {
        self.to_code_with(None, &AssembleOptions::default())
    }

    /// Pack into a code object. A caller-supplied `stacksize` bypasses the
    /// stack-depth solver entirely.
    pub fn to_code_with(
        &self,
        stacksize: Option<u32>,
        options: &AssembleOptions,
    ) -> Result<CodeObject, AssembleError> {
        let version = self.meta.version;
        let table = pyforge_core::opcode_table(version);

        if let Some(doc) = &self.meta.docstring {
            if let Some(first) = self.consts.first() {
                if first.as_docstring().is_some() && first != doc {
                    return Err(AssembleError::DuplicateDocstring);
                }
            }
        }

        let extended_arg_number = table
            .number(Op::ExtendedArg)
            .expect("every supported version defines EXTENDED_ARG");

        let mut code = Vec::new();
        for (index, instr) in self.instrs.iter().enumerate() {
            let number = table
                .number(instr.op)
                .ok_or_else(|| crate::error::unsupported(index, instr.op, version))?;
            instr.assemble_into(&mut code, number, extended_arg_number);
        }

        let linetable = self.encode_linetable();

        let mut entries = self.exception_table.clone();
        entries.sort_by_key(|e| (e.start_offset, e.stop_offset));
        let exceptiontable = if version.has_exception_table() {
            encode_exception_table(&entries)
        } else {
            Vec::new()
        };

        let stacksize = match stacksize {
            Some(size) => size,
            None => self.compute_stacksize(options)?,
        };

        Ok(CodeObject {
            version,
            code,
            consts: self.consts.clone(),
            names: self.names.clone(),
            varnames: self.varnames.clone(),
            cellvars: self.meta.cellvars.clone(),
            freevars: self.meta.freevars.clone(),
            filename: self.meta.filename.clone(),
            name: self.meta.name.clone(),
            qualname: self.meta.qualname.clone(),
            flags: self.meta.flags,
            first_lineno: self.meta.first_lineno,
            argcount: self.meta.argcount,
            posonlyargcount: self.meta.posonlyargcount,
            kwonlyargcount: self.meta.kwonlyargcount,
            nlocals: self.varnames.len() as u32,
            stacksize,
            linetable,
            exceptiontable,
        })
    }

    fn encode_linetable(&self) -> Vec<u8> {
        let first_lineno = self.meta.first_lineno;
        match self.meta.version.line_table_kind() {
            LineTableKind::Lnotab | LineTableKind::PairTable => {
                let mut records = Vec::with_capacity(self.instrs.len());
                let mut offset = 0u32;
                for instr in &self.instrs {
                    let size = instr.size_units() * 2;
                    records.push(LineRecord {
                        offset,
                        size,
                        line: instr.location.and_then(|loc| loc.lineno),
                    });
                    offset += size;
                }
                if self.meta.version.line_table_kind() == LineTableKind::Lnotab {
                    encode_lnotab(first_lineno, &records)
                } else {
                    encode_pairs(first_lineno, &records)
                }
            }
            LineTableKind::Positions => {
                let mut unit_locations = Vec::new();
                for instr in &self.instrs {
                    let loc = instr.location.unwrap_or_default();
                    unit_locations
                        .extend(std::iter::repeat(loc).take(instr.size_units() as usize));
                }
                encode_positions(first_lineno, &unit_locations)
            }
        }
    }

    pub fn compute_stacksize(&self, options: &AssembleOptions) -> Result<u32, AssembleError> {
        let bytecode = self.to_bytecode()?;
        let mut cfg = ControlFlowGraph::from_bytecode(&bytecode)?;
        let size = cfg.compute_stacksize_with(StacksizeOptions {
            check_pre_and_post: options.check_pre_and_post,
            compute_exception_stack_depths: true,
        })?;
        Ok(size)
    }

    // --- concrete -> abstract (the disassembler)

    pub fn to_bytecode(&self) -> Result<Bytecode, DecodeError> {
        let version = self.meta.version;
        let instrs = fold_extended_args(self.instrs.clone())?;

        // Unit offsets, prefixes included.
        let mut offsets = Vec::with_capacity(instrs.len());
        let mut off = 0u32;
        for instr in &instrs {
            offsets.push(off);
            off += instr.size_units();
        }
        let offset_to_index: HashMap<u32, usize> =
            offsets.iter().enumerate().map(|(i, &o)| (o, i)).collect();

        // Jump targets become labels; exception-table targets too.
        let mut target_offsets: Vec<u32> = Vec::new();
        for (i, instr) in instrs.iter().enumerate() {
            if let Some(target) = instr.jump_target_units(version, offsets[i])? {
                if !offset_to_index.contains_key(&target) {
                    return Err(DecodeError::BadJumpTarget { offset: target });
                }
                target_offsets.push(target);
            }
        }
        for entry in &self.exception_table {
            if !offset_to_index.contains_key(&entry.target) {
                return Err(DecodeError::MalformedExceptionTable);
            }
            target_offsets.push(entry.target);
        }
        target_offsets.sort_unstable();
        target_offsets.dedup();

        let mut bytecode = Bytecode::new(version);
        bytecode.copy_meta(&self.meta);
        bytecode.meta.docstring = self
            .consts
            .first()
            .and_then(|c| c.as_docstring())
            .cloned();

        let nargs = self.meta.argcount
            + self.meta.kwonlyargcount
            + u32::from(self.meta.flags.contains(pyforge_core::CompilerFlags::VARARGS))
            + u32::from(self.meta.flags.contains(pyforge_core::CompilerFlags::VARKEYWORDS));
        bytecode.argnames = self
            .varnames
            .iter()
            .take(nargs as usize)
            .cloned()
            .collect();

        let labels: HashMap<u32, Label> = target_offsets
            .iter()
            .map(|&offset| (offset, bytecode.new_label()))
            .collect();

        // Overlapping entries are ordered so that nested regions nest on
        // the stream: identical starts, widest first.
        let mut entry_order: Vec<usize> = (0..self.exception_table.len()).collect();
        entry_order.sort_by_key(|&k| {
            let e = &self.exception_table[k];
            (e.start_offset, std::cmp::Reverse(e.stop_offset))
        });

        let covering_index = |offset: u32| -> usize {
            match offsets.binary_search(&offset) {
                Ok(i) => i,
                Err(i) => i.saturating_sub(1),
            }
        };
        let next_real_at = |mut i: usize| -> usize {
            while i < instrs.len() && instrs[i].op == Op::Cache {
                i += 1;
            }
            i
        };

        let mut begins_at: HashMap<usize, Vec<TryBegin>> = HashMap::new();
        let mut ends_after: HashMap<usize, Vec<TryEnd>> = HashMap::new();
        for (nesting, &k) in entry_order.iter().enumerate() {
            let entry = &self.exception_table[k];
            let id = TryBeginId(nesting as u32);
            bytecode.bump_try_counter(nesting as u32 + 1);
            let start = next_real_at(covering_index(entry.start_offset));
            let stop = covering_index(entry.stop_offset.min(off.saturating_sub(1)));
            if start >= instrs.len() || stop < start {
                return Err(DecodeError::MalformedExceptionTable);
            }
            begins_at.entry(start).or_default().push(TryBegin {
                id,
                target: Target::Label(labels[&entry.target]),
                push_lasti: entry.push_lasti,
                stack_depth: Some(entry.stack_depth),
            });
            ends_after.entry(stop).or_default().push(TryEnd { entry: id });
        }
        // Inner regions close before outer ones at the same position.
        for ends in ends_after.values_mut() {
            ends.sort_by_key(|te| std::cmp::Reverse(te.entry));
        }

        for (i, instr) in instrs.iter().enumerate() {
            if let Some(label) = labels.get(&offsets[i]) {
                bytecode.push_label(*label);
            }
            if let Some(begins) = begins_at.remove(&i) {
                for begin in begins {
                    bytecode.push(Element::TryBegin(begin));
                }
            }
            // Inline caches carry no semantics at this layer.
            if instr.op != Op::Cache {
                let arg = self.classify_arg(instr, offsets[i], &labels, version)?;
                let mut abstract_instr = Instr::new(version, instr.op, arg).map_err(|_| {
                    DecodeError::BadArgValue {
                        offset: offsets[i],
                        arg: instr.arg,
                    }
                })?;
                abstract_instr.set_location(instr.location);
                bytecode.push(abstract_instr);
            }
            if let Some(ends) = ends_after.remove(&i) {
                for end in ends {
                    bytecode.push(Element::TryEnd(end));
                }
            }
        }

        Ok(bytecode)
    }

    fn classify_arg(
        &self,
        instr: &ConcreteInstr,
        offset: u32,
        labels: &HashMap<u32, Label>,
        version: PythonVersion,
    ) -> Result<InstrArg, DecodeError> {
        let arg = instr.arg;
        let bad_pool = |pool: &'static str, index: u32| DecodeError::BadPoolIndex {
            offset,
            pool,
            index,
        };
        let bad_arg = DecodeError::BadArgValue { offset, arg };
        let name_at = |index: u32| -> Result<String, DecodeError> {
            self.names
                .get(index as usize)
                .cloned()
                .ok_or_else(|| bad_pool("names", index))
        };

        Ok(match instr.op.arg_kind(version) {
            ArgKind::NoArg => InstrArg::None,
            ArgKind::Raw => InstrArg::Raw(arg),
            ArgKind::Const => InstrArg::Const(
                self.consts
                    .get(arg as usize)
                    .cloned()
                    .ok_or_else(|| bad_pool("consts", arg))?,
            ),
            ArgKind::Local => InstrArg::Local(
                self.varnames
                    .get(arg as usize)
                    .cloned()
                    .ok_or_else(|| bad_pool("varnames", arg))?,
            ),
            ArgKind::Name => InstrArg::Name(name_at(arg)?),
            ArgKind::Free => {
                let ncells = self.meta.cellvars.len() as u32;
                if arg < ncells {
                    InstrArg::Cell(self.meta.cellvars[arg as usize].clone())
                } else {
                    let free_index = (arg - ncells) as usize;
                    InstrArg::Free(
                        self.meta
                            .freevars
                            .get(free_index)
                            .cloned()
                            .ok_or_else(|| bad_pool("freevars", arg))?,
                    )
                }
            }
            ArgKind::JumpAbs | ArgKind::JumpFwd | ArgKind::JumpBack => {
                let target = instr
                    .jump_target_units(version, offset)?
                    .expect("jump kinds always produce a target");
                InstrArg::Jump(Target::Label(labels[&target]))
            }
            ArgKind::Compare => {
                let value = if version == PythonVersion::V3_12 {
                    arg >> 4
                } else {
                    arg
                };
                let compare =
                    Compare::try_from(u8::try_from(value).map_err(|_| bad_arg.clone())?)
                        .map_err(|_| bad_arg.clone())?;
                // The extended members only exist on 3.8.
                if version != PythonVersion::V3_8 && u8::from(compare) > 5 {
                    return Err(bad_arg);
                }
                InstrArg::Compare(compare)
            }
            ArgKind::BinaryOp => InstrArg::BinaryOp(
                BinaryOperator::try_from(u8::try_from(arg).map_err(|_| bad_arg.clone())?)
                    .map_err(|_| bad_arg.clone())?,
            ),
            ArgKind::Intrinsic1 => InstrArg::Intrinsic1(
                IntrinsicFunction1::try_from(u8::try_from(arg).map_err(|_| bad_arg.clone())?)
                    .map_err(|_| bad_arg.clone())?,
            ),
            ArgKind::Intrinsic2 => InstrArg::Intrinsic2(
                IntrinsicFunction2::try_from(u8::try_from(arg).map_err(|_| bad_arg.clone())?)
                    .map_err(|_| bad_arg.clone())?,
            ),
            ArgKind::LoadGlobal => InstrArg::LoadGlobal {
                push_null: arg & 1 != 0,
                name: name_at(arg >> 1)?,
            },
            ArgKind::LoadAttr => InstrArg::LoadAttr {
                call_as_method: arg & 1 != 0,
                name: name_at(arg >> 1)?,
            },
            ArgKind::LoadSuperAttr => InstrArg::LoadSuperAttr {
                call_as_method: arg & 1 != 0,
                push_null: arg & 2 != 0,
                name: name_at(arg >> 2)?,
            },
        })
    }
}

fn attach_locations(
    version: PythonVersion,
    code: &CodeObject,
    instrs: &mut [ConcreteInstr],
) -> Result<(), DecodeError> {
    match version.line_table_kind() {
        LineTableKind::Lnotab | LineTableKind::PairTable => {
            let entries = if version.line_table_kind() == LineTableKind::Lnotab {
                decode_lnotab(&code.linetable, code.first_lineno, code.code.len() as u32)?
            } else {
                decode_pairs(&code.linetable, code.first_lineno)?
            };
            let mut cursor = 0;
            for (i, instr) in instrs.iter_mut().enumerate() {
                let byte_offset = (i * 2) as u32;
                while cursor < entries.len() && entries[cursor].end <= byte_offset {
                    cursor += 1;
                }
                instr.location = entries
                    .get(cursor)
                    .filter(|e| e.start <= byte_offset)
                    .and_then(|e| e.line)
                    .map(InstrLocation::line);
            }
        }
        LineTableKind::Positions => {
            let runs = decode_positions(&code.linetable, code.first_lineno)?;
            let mut index = 0usize;
            for (units, location) in runs {
                for _ in 0..units {
                    if let Some(instr) = instrs.get_mut(index) {
                        if location != InstrLocation::default() {
                            instr.location = Some(location);
                        }
                    }
                    index += 1;
                }
            }
        }
    }
    Ok(())
}

/// Fold runs of `EXTENDED_ARG` into their terminal instruction, remembering
/// the prefix count so meaningless zero prefixes re-encode verbatim.
pub(crate) fn fold_extended_args(
    instrs: Vec<ConcreteInstr>,
) -> Result<Vec<ConcreteInstr>, DecodeError> {
    let mut out = Vec::with_capacity(instrs.len());
    let mut pending: Option<u32> = None;
    let mut prefix_units = 0u32;

    for instr in instrs {
        if instr.op == Op::ExtendedArg {
            prefix_units += instr.size_units();
            pending = Some(pending.map_or(instr.arg, |acc| (acc << 8) | (instr.arg & 0xff)));
            continue;
        }
        if let Some(high) = pending.take() {
            let folded_arg = (high << 8) | (instr.arg & 0xff);
            debug!(
                "folded {prefix_units} EXTENDED_ARG unit(s) into {} (arg {folded_arg})",
                instr.op.name()
            );
            out.push(ConcreteInstr {
                op: instr.op,
                arg: folded_arg,
                location: instr.location,
                extended_args: Some(prefix_units.max(instr.extended_args.unwrap_or(0))),
            });
            prefix_units = 0;
        } else {
            out.push(instr);
        }
    }

    if pending.is_some() {
        return Err(DecodeError::DanglingExtendedArg);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const V38: PythonVersion = PythonVersion::V3_8;

    fn instr(op: Op, arg: u32) -> ConcreteInstr {
        ConcreteInstr::new(op, arg).unwrap()
    }

    #[test]
    fn size_grows_with_the_argument() {
        assert_eq!(instr(Op::LoadConst, 0xff).size_units(), 1);
        assert_eq!(instr(Op::LoadConst, 0x100).size_units(), 2);
        assert_eq!(instr(Op::LoadConst, 0x1_0000).size_units(), 3);
        assert_eq!(instr(Op::LoadConst, 0x100_0000).size_units(), 4);
    }

    #[test]
    fn pinned_prefixes_extend_the_size() {
        let pinned = ConcreteInstr::with_extended_args(Op::Nop, 0, 1).unwrap();
        assert_eq!(pinned.size_units(), 2);
    }

    #[test]
    fn folding_merges_prefixes() {
        let instrs = vec![
            instr(Op::ExtendedArg, 0x01),
            instr(Op::LoadConst, 0x02),
            instr(Op::ReturnValue, 0),
        ];
        let folded = fold_extended_args(instrs).unwrap();
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[0].op(), Op::LoadConst);
        assert_eq!(folded[0].arg(), 0x0102);
        assert_eq!(folded[0].extended_args(), Some(1));
    }

    #[test]
    fn folding_preserves_zero_prefixes_before_nop() {
        let instrs = vec![instr(Op::ExtendedArg, 0), instr(Op::Nop, 0)];
        let folded = fold_extended_args(instrs).unwrap();
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].op(), Op::Nop);
        assert_eq!(folded[0].arg(), 0);
        // The zero prefix still occupies a unit when re-encoded.
        assert_eq!(folded[0].size_units(), 2);
    }

    #[test]
    fn dangling_prefix_is_an_error() {
        let instrs = vec![instr(Op::ExtendedArg, 1)];
        assert_eq!(
            fold_extended_args(instrs),
            Err(DecodeError::DanglingExtendedArg)
        );
    }

    #[test]
    fn assemble_emits_prefixes_high_to_low() {
        let mut out = Vec::new();
        instr(Op::LoadConst, 0x0102).assemble_into(&mut out, 100, 144);
        assert_eq!(out, vec![144, 0x01, 100, 0x02]);
    }

    #[test]
    fn backward_jump_targets_resolve() {
        // JUMP_BACKWARD at unit offset 10 with arg 4 on 3.11 lands at
        // (10 + 1) - 4 = 7.
        let jump = instr(Op::JumpBackward, 4);
        let target = jump
            .jump_target_units(PythonVersion::V3_11, 10)
            .unwrap()
            .unwrap();
        assert_eq!(target, 7);
    }

    #[test]
    fn pre_310_jump_arguments_are_bytes() {
        // JUMP_FORWARD at unit 0 with byte delta 6 on 3.8 lands at unit 4.
        let jump = instr(Op::JumpForward, 6);
        assert_eq!(jump.jump_target_units(V38, 0).unwrap(), Some(4));
        // JUMP_ABSOLUTE args are byte offsets too.
        let jump = instr(Op::JumpAbsolute, 6);
        assert_eq!(jump.jump_target_units(V38, 0).unwrap(), Some(3));
    }
}
