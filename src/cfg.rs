//! The control-flow graph: basic blocks in an arena, linked by fallthrough
//! and jump edges.
//!
//! Blocks live in an arena and are referenced by stable [`BlockId`]s; a
//! separate order list fixes the layout the flattener emits. Removing a
//! block leaves a tombstone, and any surviving reference to it is reported
//! at flatten time rather than dangling.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::bytecode::Bytecode;
use crate::error::CfgError;
use crate::instr::{Element, Instr, Label, Target, TryBeginId, TryEnd};

/// Stable identity of a basic block inside one graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

/// A straight-line run of elements; only the last instruction may jump.
#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    pub elements: Vec<Element>,
    /// Fallthrough successor, taken when the last instruction permits it.
    pub next_block: Option<BlockId>,
}

impl BasicBlock {
    /// The last real instruction, looking past trailing pseudo-elements.
    pub fn last_instr(&self) -> Option<&Instr> {
        self.elements.iter().rev().find_map(Element::as_instr)
    }

    /// The block this one jumps to, when its last instruction jumps.
    pub fn jump_target(&self) -> Option<Target> {
        self.last_instr().and_then(Instr::jump_target)
    }

    fn check_jump_is_last(&self) -> bool {
        let mut seen_jump = false;
        for element in &self.elements {
            if let Element::Instr(instr) = element {
                if seen_jump {
                    return false;
                }
                seen_jump = instr.has_jump();
            }
        }
        true
    }
}

/// A code unit as an ordered collection of basic blocks.
#[derive(Clone, Debug)]
pub struct ControlFlowGraph {
    pub meta: crate::bytecode::CodeMeta,
    pub argnames: Vec<String>,
    blocks: Vec<Option<BasicBlock>>,
    order: Vec<BlockId>,
}

impl ControlFlowGraph {
    /// An empty graph holding a single empty entry block.
    pub fn new(version: pyforge_core::PythonVersion) -> Self {
        let mut cfg = Self {
            meta: crate::bytecode::CodeMeta::new(version),
            argnames: Vec::new(),
            blocks: Vec::new(),
            order: Vec::new(),
        };
        cfg.add_block();
        cfg
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(BasicBlock::default()));
        self.order.push(id);
        id
    }

    /// Remove a block, leaving a tombstone. References to it surface as
    /// [`CfgError::DanglingBlock`] when the graph is flattened.
    pub fn remove_block(&mut self, id: BlockId) {
        if let Some(slot) = self.blocks.get_mut(id.0 as usize) {
            *slot = None;
        }
        self.order.retain(|&b| b != id);
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0 as usize)?.as_ref()
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(id.0 as usize)?.as_mut()
    }

    fn expect_block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        self.block_mut(id).expect("block ids handed out by this graph")
    }

    /// Number of live blocks.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The entry block.
    pub fn entry(&self) -> Option<BlockId> {
        self.order.first().copied()
    }

    /// Live block ids in layout order.
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.order.clone()
    }

    /// Live blocks in layout order.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.order
            .iter()
            .filter_map(move |&id| Some((id, self.block(id)?)))
    }

    /// Split `block` before element `index`; the tail moves into a new
    /// block laid out immediately after, connected by fallthrough.
    pub fn split_block(&mut self, id: BlockId, index: usize) -> Result<BlockId, CfgError> {
        let block = self.block(id).ok_or(CfgError::DanglingBlock(id))?;
        if index > block.elements.len() {
            return Err(CfgError::SplitOutOfRange {
                block: id,
                index,
                len: block.elements.len(),
            });
        }
        if index == 0 {
            return Ok(id);
        }
        if index == block.elements.len() {
            // Nothing to move: the successor in layout order, if any, is
            // the natural "second half".
            let position = self.order.iter().position(|&b| b == id).expect("live block");
            if let Some(&next) = self.order.get(position + 1) {
                return Ok(next);
            }
        }

        let new_id = BlockId(self.blocks.len() as u32);
        let block = self.expect_block_mut(id);
        let tail = block.elements.split_off(index);
        let inherited_next = block.next_block;
        block.next_block = Some(new_id);

        self.blocks.push(Some(BasicBlock {
            elements: tail,
            next_block: inherited_next,
        }));
        let position = self.order.iter().position(|&b| b == id).expect("live block");
        self.order.insert(position + 1, new_id);
        Ok(new_id)
    }

    // --- abstract stream -> CFG

    pub fn from_bytecode(code: &Bytecode) -> Result<Self, CfgError> {
        let mut label_index: HashMap<Label, usize> = HashMap::new();
        let mut referenced_labels: Vec<Label> = Vec::new();
        let mut try_end_index: HashMap<TryBeginId, usize> = HashMap::new();

        for (index, element) in code.elements.iter().enumerate() {
            match element {
                Element::Label(label) => {
                    label_index.insert(*label, index);
                }
                Element::Instr(instr) => match instr.jump_target() {
                    Some(Target::Label(label)) => referenced_labels.push(label),
                    Some(Target::Block(_)) => {
                        return Err(CfgError::BlockTargetOutsideGraph);
                    }
                    None => {}
                },
                Element::TryBegin(begin) => match begin.target {
                    Target::Label(label) => referenced_labels.push(label),
                    Target::Block(_) => return Err(CfgError::BlockTargetOutsideGraph),
                },
                Element::TryEnd(end) => {
                    try_end_index.entry(end.entry).or_insert(index);
                }
                Element::SetLineno(_) => {}
            }
        }

        // Element indices where a targeted label sits: block boundaries.
        let mut block_starts: HashMap<usize, Label> = HashMap::new();
        for label in &referenced_labels {
            let index = *label_index
                .get(label)
                .ok_or(CfgError::UnresolvedLabel(*label))?;
            block_starts.insert(index, *label);
        }

        let mut cfg = Self::new(code.version());
        cfg.meta = code.meta.clone();
        cfg.argnames = code.argnames.clone();

        let mut current = cfg.entry().expect("a fresh graph has an entry block");
        let mut label_blocks: HashMap<Label, BlockId> = HashMap::new();
        let mut jump_sites: Vec<(BlockId, usize)> = Vec::new();
        let mut begin_sites: Vec<(BlockId, usize)> = Vec::new();
        let mut add_try_end: HashMap<Label, TryEnd> = HashMap::new();
        let mut active_try: Option<TryBeginId> = None;

        for (index, element) in code.elements.iter().enumerate() {
            if let Some(label) = block_starts.get(&index) {
                let block = cfg.block(current).expect("current block is live");
                if index != 0 && !block.elements.is_empty() {
                    let last_final = block.last_instr().map(Instr::is_final);
                    let new_block = cfg.add_block();
                    if last_final == Some(false) {
                        cfg.expect_block_mut(current).next_block = Some(new_block);
                    }
                    current = new_block;
                }
                label_blocks.insert(*label, current);
            } else {
                let block = cfg.block(current).expect("current block is live");
                if let Some(last) = block.last_instr() {
                    if last.is_final() {
                        let finished = current;
                        current = cfg.add_block();
                        // A TryEnd trailing a final instruction belongs to
                        // the block it closes.
                        if let Element::TryEnd(end) = element {
                            cfg.expect_block_mut(finished)
                                .elements
                                .push(Element::TryEnd(*end));
                            active_try = None;
                            continue;
                        }
                    } else if last.has_jump() {
                        // A conditional jump out of an exception region must
                        // still see the region close on the taken path.
                        if let (Some(active), Some(Target::Label(target))) =
                            (active_try, last.jump_target())
                        {
                            if let (Some(&end_at), Some(&target_at)) =
                                (try_end_index.get(&active), label_index.get(&target))
                            {
                                if target_at >= end_at {
                                    add_try_end.insert(target, TryEnd { entry: active });
                                }
                            }
                        }
                        let new_block = cfg.add_block();
                        cfg.expect_block_mut(current).next_block = Some(new_block);
                        current = new_block;
                    }
                }
            }

            match element {
                Element::Label(_) => {}
                Element::SetLineno(line) => {
                    cfg.expect_block_mut(current)
                        .elements
                        .push(Element::SetLineno(*line));
                }
                Element::TryBegin(begin) => {
                    active_try = Some(begin.id);
                    let block = cfg.expect_block_mut(current);
                    begin_sites.push((current, block.elements.len()));
                    block.elements.push(Element::TryBegin(begin.clone()));
                }
                Element::TryEnd(end) => {
                    active_try = None;
                    cfg.expect_block_mut(current)
                        .elements
                        .push(Element::TryEnd(*end));
                }
                Element::Instr(instr) => {
                    let block = cfg.expect_block_mut(current);
                    if instr.has_jump() {
                        jump_sites.push((current, block.elements.len()));
                    }
                    block.elements.push(Element::Instr(instr.clone()));
                }
            }
        }

        // Close regions at the head of blocks entered by conditional exits.
        for (label, end) in add_try_end {
            let block_id = label_blocks[&label];
            cfg.expect_block_mut(block_id)
                .elements
                .insert(0, Element::TryEnd(end));
        }

        // Labels become block identities.
        for (block_id, position) in jump_sites {
            let block = cfg.expect_block_mut(block_id);
            let instr = block.elements[position]
                .as_instr_mut()
                .expect("recorded jump positions hold instructions");
            let Some(Target::Label(label)) = instr.jump_target() else {
                unreachable!("recorded jump positions hold label jumps");
            };
            let target = *label_blocks
                .get(&label)
                .ok_or(CfgError::UnresolvedLabel(label))?;
            instr.retarget(Target::Block(target));
        }
        for (block_id, position) in begin_sites {
            let block = cfg.expect_block_mut(block_id);
            let Element::TryBegin(begin) = &mut block.elements[position] else {
                unreachable!("recorded begin positions hold TryBegin elements");
            };
            let Target::Label(label) = begin.target else {
                unreachable!("stream TryBegins target labels");
            };
            let target = *label_blocks
                .get(&label)
                .ok_or(CfgError::UnresolvedLabel(label))?;
            begin.target = Target::Block(target);
        }

        debug!("built CFG with {} blocks", cfg.len());
        Ok(cfg)
    }

    // --- CFG -> abstract stream

    pub fn to_bytecode(&self) -> Result<Bytecode, CfgError> {
        let mut used: HashSet<BlockId> = HashSet::new();
        for (id, block) in self.iter() {
            if !block.check_jump_is_last() {
                return Err(CfgError::JumpNotLast(id));
            }
            if let Some(Target::Block(target)) = block.jump_target() {
                used.insert(target);
            }
            for element in &block.elements {
                if let Element::TryBegin(begin) = element {
                    if let Target::Block(target) = begin.target {
                        used.insert(target);
                    }
                }
            }
        }

        let mut bytecode = Bytecode::new(self.meta.version);
        bytecode.meta = self.meta.clone();
        bytecode.argnames = self.argnames.clone();

        let mut labels: HashMap<BlockId, Label> = HashMap::new();
        for (id, _) in self.iter() {
            if used.contains(&id) {
                labels.insert(id, bytecode.new_label());
            }
        }

        let resolve = |target: Target| -> Result<Target, CfgError> {
            match target {
                Target::Block(block) => labels
                    .get(&block)
                    .map(|&label| Target::Label(label))
                    .ok_or(CfgError::DanglingBlock(block)),
                Target::Label(label) => Ok(Target::Label(label)),
            }
        };

        let mut seen_try_end: HashSet<TryBeginId> = HashSet::new();
        let mut max_try_id = 0u32;

        for (id, block) in self.iter() {
            if let Some(&label) = labels.get(&id) {
                bytecode.push_label(label);
            }
            for element in &block.elements {
                match element {
                    Element::Label(_) => {}
                    Element::SetLineno(line) => bytecode.elements.push(Element::SetLineno(*line)),
                    Element::Instr(instr) => {
                        let mut instr = instr.clone();
                        if let Some(target) = instr.jump_target() {
                            instr.retarget(resolve(target)?);
                        }
                        bytecode.elements.push(Element::Instr(instr));
                    }
                    Element::TryBegin(begin) => {
                        let mut begin = begin.clone();
                        begin.target = resolve(begin.target)?;
                        max_try_id = max_try_id.max(begin.id.0);
                        bytecode.elements.push(Element::TryBegin(begin));
                    }
                    Element::TryEnd(end) => {
                        // Conditional exits can leave several copies of one
                        // region's end; keep the first.
                        if seen_try_end.insert(end.entry) {
                            bytecode.elements.push(Element::TryEnd(*end));
                        }
                    }
                }
            }
        }

        bytecode.bump_try_counter(max_try_id + 1);
        Ok(bytecode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyforge_core::{Op, PythonVersion};

    use crate::instr::InstrArg;

    const V38: PythonVersion = PythonVersion::V3_8;

    fn instr(op: Op, arg: InstrArg) -> Instr {
        Instr::new(V38, op, arg).unwrap()
    }

    fn conditional_stream() -> Bytecode {
        // if test: x = 1
        // else:    x = 2
        let mut code = Bytecode::new(V38);
        let l_else = code.new_label();
        let l_end = code.new_label();
        code.push(instr(Op::LoadName, InstrArg::Name("test".into())));
        code.push(instr(
            Op::PopJumpIfFalse,
            InstrArg::Jump(Target::Label(l_else)),
        ));
        code.push(instr(Op::LoadConst, InstrArg::Const(1i64.into())));
        code.push(instr(
            Op::JumpForward,
            InstrArg::Jump(Target::Label(l_end)),
        ));
        code.push_label(l_else);
        code.push(instr(Op::LoadConst, InstrArg::Const(2i64.into())));
        code.push_label(l_end);
        code.push(instr(Op::StoreName, InstrArg::Name("x".into())));
        code.push(instr(
            Op::LoadConst,
            InstrArg::Const(pyforge_core::ConstantData::None),
        ));
        code.push(instr(Op::ReturnValue, InstrArg::None));
        code
    }

    #[test]
    fn splits_at_jumps_and_labels() {
        let code = conditional_stream();
        let cfg = ControlFlowGraph::from_bytecode(&code).unwrap();
        // entry | after cond-jump | else | join
        assert_eq!(cfg.len(), 4);

        let (entry, entry_block) = cfg.iter().next().unwrap();
        assert_eq!(entry, cfg.entry().unwrap());
        assert!(matches!(
            entry_block.jump_target(),
            Some(Target::Block(_))
        ));
        assert!(entry_block.next_block.is_some());
    }

    #[test]
    fn round_trips_through_blocks() {
        let code = conditional_stream();
        let cfg = ControlFlowGraph::from_bytecode(&code).unwrap();
        let back = cfg.to_bytecode().unwrap();

        let ops: Vec<Op> = back.instrs().map(Instr::op).collect();
        let original_ops: Vec<Op> = code.instrs().map(Instr::op).collect();
        assert_eq!(ops, original_ops);

        // Jumps resolve to labels that exist in the flattened stream.
        for instr in back.instrs() {
            if let Some(Target::Label(label)) = instr.jump_target() {
                assert!(back
                    .elements
                    .iter()
                    .any(|el| matches!(el, Element::Label(l) if *l == label)));
            }
        }
    }

    #[test]
    fn dangling_blocks_are_reported_at_flatten_time() {
        let code = conditional_stream();
        let mut cfg = ControlFlowGraph::from_bytecode(&code).unwrap();
        let (entry, entry_block) = cfg.iter().next().unwrap();
        let Some(Target::Block(target)) = entry_block.jump_target() else {
            panic!("entry ends with a conditional jump");
        };
        let _ = entry;
        cfg.remove_block(target);
        assert_eq!(
            cfg.to_bytecode().unwrap_err(),
            CfgError::DanglingBlock(target)
        );
    }

    #[test]
    fn split_block_moves_the_tail() {
        let code = conditional_stream();
        let mut cfg = ControlFlowGraph::from_bytecode(&code).unwrap();
        let entry = cfg.entry().unwrap();
        let new = cfg.split_block(entry, 1).unwrap();
        assert_eq!(cfg.block(entry).unwrap().elements.len(), 1);
        assert_eq!(cfg.block(entry).unwrap().next_block, Some(new));
        // Layout order keeps the tail adjacent.
        let order: Vec<BlockId> = cfg.iter().map(|(id, _)| id).collect();
        let entry_pos = order.iter().position(|&b| b == entry).unwrap();
        assert_eq!(order[entry_pos + 1], new);
    }

    #[test]
    fn jump_must_be_last() {
        let mut cfg = ControlFlowGraph::new(V38);
        let entry = cfg.entry().unwrap();
        let target = cfg.add_block();
        let jump = {
            let mut i = instr(Op::JumpForward, InstrArg::Jump(Target::Label(Label(0))));
            i.retarget(Target::Block(target));
            i
        };
        cfg.block_mut(entry).unwrap().elements.push(jump.into());
        cfg.block_mut(entry)
            .unwrap()
            .elements
            .push(instr(Op::ReturnValue, InstrArg::None).into());
        assert_eq!(cfg.to_bytecode().unwrap_err(), CfgError::JumpNotLast(entry));
    }
}
