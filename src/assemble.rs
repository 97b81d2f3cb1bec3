//! The assembler: abstract stream to concrete stream.
//!
//! Pools are built in first-occurrence order under the constant key, jump
//! arguments are resolved by iterating the `EXTENDED_ARG` widths to a fixed
//! point, and the `TryBegin`/`TryEnd` pairs are collected back into
//! exception-table entries.

use std::collections::HashMap;

use log::debug;

use pyforge_core::{ArgKind, ConstantData, ExceptionTableEntry, InstrLocation, Op, PythonVersion};

use crate::bytecode::Bytecode;
use crate::cfg::ControlFlowGraph;
use crate::concrete::{ConcreteBytecode, ConcreteInstr};
use crate::error::{unsupported, AssembleError};
use crate::instr::{Compare, Element, InstrArg, Label, Target, TryBeginId};
use crate::stackdepth::StacksizeOptions;
use crate::IndexSet;

/// Knobs of the abstract-to-concrete conversion.
#[derive(Clone, Copy, Debug)]
pub struct AssembleOptions {
    /// Upper bound on fix-point passes before giving up.
    pub compute_jumps_passes: u32,
    /// Solve missing `TryBegin` stack depths through the CFG first.
    pub compute_exception_stack_depths: bool,
    /// Verify pre-effects in the stack-depth solver.
    pub check_pre_and_post: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            compute_jumps_passes: 10,
            compute_exception_stack_depths: true,
            check_pre_and_post: true,
        }
    }
}

struct JumpSite {
    instr: usize,
    element: usize,
    label: Label,
    extra: u32,
}

struct TryRegion {
    id: TryBeginId,
    target: Label,
    push_lasti: bool,
    depth: Option<u32>,
    start: usize,
    /// Exclusive end, set by the first `TryEnd` of the region.
    end: Option<usize>,
}

struct Converter<'a> {
    code: &'a Bytecode,
    version: PythonVersion,
    instrs: Vec<ConcreteInstr>,
    jumps: Vec<JumpSite>,
    labels: HashMap<Label, usize>,
    consts: IndexSet<ConstantData>,
    names: IndexSet<String>,
    varnames: IndexSet<String>,
    regions: Vec<TryRegion>,
}

impl<'a> Converter<'a> {
    fn new(code: &'a Bytecode) -> Self {
        Self {
            code,
            version: code.version(),
            instrs: Vec::new(),
            jumps: Vec::new(),
            labels: HashMap::new(),
            consts: IndexSet::default(),
            names: IndexSet::default(),
            varnames: IndexSet::default(),
            regions: Vec::new(),
        }
    }

    fn add_const(&mut self, value: ConstantData) -> u32 {
        self.consts.insert_full(value).0 as u32
    }

    fn add_name(&mut self, name: &str) -> u32 {
        self.names.insert_full(name.to_owned()).0 as u32
    }

    fn add_varname(&mut self, name: &str) -> u32 {
        self.varnames.insert_full(name.to_owned()).0 as u32
    }

    fn encode_compare(&self, index: usize, compare: Compare) -> Result<u32, AssembleError> {
        let value = u32::from(u8::from(compare));
        match self.version {
            PythonVersion::V3_8 => Ok(value),
            PythonVersion::V3_12 => {
                if value > 5 {
                    return Err(AssembleError::InvalidArgumentKind { index });
                }
                Ok((value << 4) | compare.mask())
            }
            _ => {
                if value > 5 {
                    return Err(AssembleError::InvalidArgumentKind { index });
                }
                Ok(value)
            }
        }
    }

    fn cell_or_free_index(&self, name: &str, cell: bool) -> Result<u32, AssembleError> {
        let vars = if cell {
            &self.code.meta.cellvars
        } else {
            &self.code.meta.freevars
        };
        let position = vars
            .iter()
            .position(|candidate| candidate == name)
            .ok_or_else(|| AssembleError::UndefinedCellOrFree {
                name: name.to_owned(),
            })?;
        let base = if cell {
            0
        } else {
            self.code.meta.cellvars.len()
        };
        Ok((base + position) as u32)
    }

    fn convert_elements(&mut self) -> Result<(), AssembleError> {
        let mut current_line = self.code.meta.first_lineno;

        for (element_index, element) in self.code.elements.iter().enumerate() {
            match element {
                Element::Label(label) => {
                    if self.labels.insert(*label, self.instrs.len()).is_some() {
                        return Err(AssembleError::DuplicateLabel(*label));
                    }
                }
                Element::SetLineno(line) => {
                    current_line = *line;
                }
                Element::TryBegin(begin) => {
                    let Target::Label(target) = begin.target else {
                        return Err(AssembleError::InvalidArgumentKind {
                            index: element_index,
                        });
                    };
                    self.regions.push(TryRegion {
                        id: begin.id,
                        target,
                        push_lasti: begin.push_lasti,
                        depth: begin.stack_depth,
                        start: self.instrs.len(),
                        end: None,
                    });
                }
                Element::TryEnd(end) => {
                    let region = self
                        .regions
                        .iter_mut()
                        .rev()
                        .find(|region| region.id == end.entry)
                        .ok_or(AssembleError::UnclosedTryBegin(end.entry))?;
                    // Only the first end of a region is meaningful; later
                    // copies come from conditional exits.
                    if region.end.is_none() {
                        region.end = Some(self.instrs.len());
                    }
                }
                Element::Instr(instr) => {
                    let op = instr.op();
                    let table = pyforge_core::opcode_table(self.version);
                    if table.number(op).is_none() {
                        return Err(unsupported(element_index, op, self.version));
                    }

                    let location = match instr.location() {
                        Some(location) => {
                            if let Some(line) = location.lineno {
                                current_line = line;
                            }
                            location
                        }
                        None => InstrLocation::line(current_line),
                    };

                    let raw = self.resolve_arg(element_index, op, instr.arg())?;
                    let mut concrete = ConcreteInstr::new(op, raw)
                        .map_err(|_| AssembleError::InvalidArgumentKind {
                            index: element_index,
                        })?;
                    concrete.location = Some(location);
                    self.instrs.push(concrete);

                    for _ in 0..op.cache_slots(self.version) {
                        let mut cache = ConcreteInstr::new(Op::Cache, 0)
                            .expect("CACHE carries no argument");
                        cache.location = Some(location);
                        self.instrs.push(cache);
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve_arg(
        &mut self,
        element_index: usize,
        op: Op,
        arg: &InstrArg,
    ) -> Result<u32, AssembleError> {
        let kind = op.arg_kind(self.version);
        let mismatch = AssembleError::InvalidArgumentKind {
            index: element_index,
        };
        Ok(match (kind, arg) {
            (ArgKind::NoArg, InstrArg::None) => 0,
            (ArgKind::Raw, InstrArg::Raw(value)) => *value,
            (ArgKind::Const, InstrArg::Const(value)) => self.add_const(value.clone()),
            (ArgKind::Local, InstrArg::Local(name)) => self.add_varname(name),
            (ArgKind::Name, InstrArg::Name(name)) => self.add_name(name),
            (ArgKind::Free, InstrArg::Cell(name)) => self.cell_or_free_index(name, true)?,
            (ArgKind::Free, InstrArg::Free(name)) => self.cell_or_free_index(name, false)?,
            (ArgKind::Compare, InstrArg::Compare(compare)) => {
                self.encode_compare(element_index, *compare)?
            }
            (ArgKind::BinaryOp, InstrArg::BinaryOp(operator)) => u32::from(u8::from(*operator)),
            (ArgKind::Intrinsic1, InstrArg::Intrinsic1(func)) => u32::from(u8::from(*func)),
            (ArgKind::Intrinsic2, InstrArg::Intrinsic2(func)) => u32::from(u8::from(*func)),
            (ArgKind::LoadGlobal, InstrArg::LoadGlobal { push_null, name }) => {
                (self.add_name(name) << 1) | u32::from(*push_null)
            }
            (ArgKind::LoadAttr, InstrArg::LoadAttr {
                call_as_method,
                name,
            }) => (self.add_name(name) << 1) | u32::from(*call_as_method),
            (
                ArgKind::LoadSuperAttr,
                InstrArg::LoadSuperAttr {
                    call_as_method,
                    push_null,
                    name,
                },
            ) => {
                (self.add_name(name) << 2)
                    | (u32::from(*push_null) << 1)
                    | u32::from(*call_as_method)
            }
            (
                ArgKind::JumpAbs | ArgKind::JumpFwd | ArgKind::JumpBack,
                InstrArg::Jump(Target::Label(label)),
            ) => {
                self.jumps.push(JumpSite {
                    instr: self.instrs.len(),
                    element: element_index,
                    label: *label,
                    extra: 0,
                });
                // Placeholder until the fix-point resolves offsets.
                0
            }
            _ => return Err(mismatch),
        })
    }

    /// Resolve jump arguments, growing `EXTENDED_ARG` widths monotonically
    /// until no jump needs more room than it has.
    fn compute_jumps(&mut self, max_passes: u32) -> Result<Vec<u32>, AssembleError> {
        let scale = self.version.jump_arg_scale();
        let mut offsets: Vec<u32> = Vec::with_capacity(self.instrs.len() + 1);

        for pass in 1..=max_passes.max(1) {
            offsets.clear();
            let mut off = 0u32;
            for instr in &self.instrs {
                offsets.push(off);
                off += instr.size_units();
            }
            // A label may sit past the last instruction.
            offsets.push(off);

            let mut changed = false;
            for site in &mut self.jumps {
                let target_index = *self
                    .labels
                    .get(&site.label)
                    .ok_or(AssembleError::UnresolvedLabel(site.label))?;
                let target = offsets[target_index];
                let instr = &self.instrs[site.instr];
                let kind = instr.op().arg_kind(self.version);
                let mut base = offsets[site.instr] + instr.size_units();
                if self.version.jumps_skip_caches() {
                    base += instr.op().cache_slots(self.version);
                }
                let arg_units = match kind {
                    ArgKind::JumpAbs => target,
                    ArgKind::JumpFwd => {
                        target
                            .checked_sub(base)
                            .ok_or(AssembleError::JumpOutOfRange {
                                index: site.element,
                            })?
                    }
                    ArgKind::JumpBack => {
                        base.checked_sub(target)
                            .ok_or(AssembleError::JumpOutOfRange {
                                index: site.element,
                            })?
                    }
                    _ => unreachable!("jump sites only record jump kinds"),
                };
                let raw = arg_units * scale;
                let needed = ConcreteInstr::natural_extras(raw);
                let instr = &mut self.instrs[site.instr];
                instr.set_arg(raw);
                if needed > site.extra {
                    site.extra = needed;
                    instr.set_extended_args(Some(needed));
                    changed = true;
                }
            }

            debug!("jump fix-point pass {pass}: changed={changed}");
            if !changed {
                return Ok(offsets);
            }
        }

        Err(AssembleError::JumpsUnstable {
            passes: max_passes,
        })
    }

    fn build_exception_table(
        &self,
        offsets: &[u32],
    ) -> Result<Vec<ExceptionTableEntry>, AssembleError> {
        let mut entries = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            let end = region.end.ok_or(AssembleError::UnclosedTryBegin(region.id))?;
            if end <= region.start {
                // The region closed before covering any instruction.
                continue;
            }
            let stop = end - 1;
            let depth = region.depth.ok_or(AssembleError::UnsetTryDepth(region.id))?;
            let target_index = *self
                .labels
                .get(&region.target)
                .ok_or(AssembleError::UnresolvedLabel(region.target))?;
            let stop_offset = offsets[stop] + self.instrs[stop].size_units() - 1;
            entries.push(ExceptionTableEntry::new(
                offsets[region.start],
                stop_offset,
                offsets[target_index],
                depth,
                region.push_lasti,
            ));
        }
        entries.sort_by_key(|entry| (entry.start_offset, entry.stop_offset));
        Ok(entries)
    }

    fn run(mut self, options: &AssembleOptions) -> Result<ConcreteBytecode, AssembleError> {
        if let Some(docstring) = &self.code.meta.docstring {
            self.add_const(docstring.clone());
        }
        for argname in &self.code.argnames {
            self.varnames.insert(argname.clone());
        }

        self.convert_elements()?;
        let offsets = self.compute_jumps(options.compute_jumps_passes)?;
        let exception_table = if self.version.has_exception_table() {
            self.build_exception_table(&offsets)?
        } else {
            Vec::new()
        };

        Ok(ConcreteBytecode {
            meta: self.code.meta.clone(),
            instrs: self.instrs,
            consts: self.consts.into_iter().collect(),
            names: self.names.into_iter().collect(),
            varnames: self.varnames.into_iter().collect(),
            exception_table,
        })
    }
}

impl Bytecode {
    pub fn to_concrete(&self) -> Result<ConcreteBytecode, AssembleError> {
        self.to_concrete_with(&AssembleOptions::default())
    }

    pub fn to_concrete_with(
        &self,
        options: &AssembleOptions,
    ) -> Result<ConcreteBytecode, AssembleError> {
        if options.compute_exception_stack_depths && self.has_unset_try_depth() {
            // Exception regions without a recorded depth go through the
            // stack-depth pass, which writes the depths back into the
            // rebuilt stream.
            let mut cfg = ControlFlowGraph::from_bytecode(self)?;
            cfg.compute_stacksize_with(StacksizeOptions {
                check_pre_and_post: options.check_pre_and_post,
                compute_exception_stack_depths: true,
            })?;
            let resolved = cfg.to_bytecode()?;
            return Converter::new(&resolved).run(options);
        }
        Converter::new(self).run(options)
    }

    pub fn to_code(&self) -> Result<pyforge_core::CodeObject, AssembleError> {
        self.to_code_with(None, &AssembleOptions::default())
    }

    /// Assemble all the way to a packed code object. A caller-supplied
    /// `stacksize` bypasses the solver.
    pub fn to_code_with(
        &self,
        stacksize: Option<u32>,
        options: &AssembleOptions,
    ) -> Result<pyforge_core::CodeObject, AssembleError> {
        match stacksize {
            Some(size) => self
                .to_concrete_with(options)?
                .to_code_with(Some(size), options),
            None => {
                let mut cfg = ControlFlowGraph::from_bytecode(self)?;
                let size = cfg.compute_stacksize_with(StacksizeOptions {
                    check_pre_and_post: options.check_pre_and_post,
                    compute_exception_stack_depths: options.compute_exception_stack_depths,
                })?;
                let resolved = cfg.to_bytecode()?;
                let concrete = Converter::new(&resolved).run(options)?;
                concrete.to_code_with(Some(size), options)
            }
        }
    }
}
