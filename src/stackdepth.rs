//! Maximum operand-stack depth over the control-flow graph.
//!
//! A depth-first walk carries the running depth through fallthrough and
//! jump edges, forks into exception handlers at each region's close with
//! the minimum depth observed since its `TryBegin`, and memoizes blocks by
//! their entry fingerprint so the walk terminates on cyclic graphs. The
//! recursion is an explicit frame stack.

use std::collections::{HashMap, HashSet};

use log::trace;

use pyforge_core::{CompilerFlags, PythonVersion, StackEffect};

use crate::cfg::{BlockId, ControlFlowGraph};
use crate::error::StacksizeError;
use crate::instr::{Element, Target, TryBeginId};

/// Knobs of the stack-depth solver.
#[derive(Clone, Copy, Debug)]
pub struct StacksizeOptions {
    /// Check that every instruction finds its required operands (and report
    /// blocks entered at conflicting depths). When off, only net-negative
    /// depths are rejected.
    pub check_pre_and_post: bool,
    /// Write the solved start depth back into each `TryBegin`.
    pub compute_exception_stack_depths: bool,
}

impl Default for StacksizeOptions {
    fn default() -> Self {
        Self {
            check_pre_and_post: true,
            compute_exception_stack_depths: true,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Pending {
    None,
    /// A handler spawned at a `TryEnd`; record its depth and continue.
    AfterTryEnd { handler: BlockId },
    /// The taken branch of a conditional jump; apply the fallthrough effect
    /// of the element and continue.
    AfterJump { element: usize },
    /// The target of an unconditional jump; the rest of the block is dead.
    AfterUncondJump,
    /// A handler spawned after a final instruction; record and finish.
    AfterTrailingHandler { handler: BlockId },
    /// The fallthrough successor; take its result and finish.
    AfterNext,
}

struct Frame {
    block: BlockId,
    idx: usize,
    size: u32,
    maxsize: u32,
    minsize: u32,
    exception_handler: Option<bool>,
    current_try: Option<TryBeginId>,
    entered: bool,
    inserted: bool,
    pending: Pending,
}

impl Frame {
    fn child(&self, block: BlockId, size: u32, minsize: u32, handler: Option<bool>) -> Self {
        Self {
            block,
            idx: 0,
            size,
            maxsize: self.maxsize,
            minsize,
            exception_handler: handler,
            current_try: if handler.is_some() {
                None
            } else {
                self.current_try
            },
            entered: false,
            inserted: false,
            pending: Pending::None,
        }
    }
}

enum Step {
    Push(Frame),
    Pop,
}

struct Solver<'a> {
    cfg: &'a ControlFlowGraph,
    version: PythonVersion,
    check: bool,
    try_info: HashMap<TryBeginId, (BlockId, bool)>,
    seen_blocks: HashSet<BlockId>,
    startsizes: HashMap<BlockId, HashSet<(u32, Option<bool>)>>,
    entry_depths: HashMap<(BlockId, bool), u32>,
    exc_startsize: HashMap<BlockId, u32>,
    exc_maxsize: HashMap<BlockId, u32>,
}

impl<'a> Solver<'a> {
    fn new(cfg: &'a ControlFlowGraph, check: bool) -> Self {
        let mut try_info = HashMap::new();
        for (_, block) in cfg.iter() {
            for element in &block.elements {
                if let Element::TryBegin(begin) = element {
                    if let Target::Block(target) = begin.target {
                        try_info.insert(begin.id, (target, begin.push_lasti));
                    }
                }
            }
        }
        Self {
            cfg,
            version: cfg.meta.version,
            check,
            try_info,
            seen_blocks: HashSet::new(),
            startsizes: HashMap::new(),
            entry_depths: HashMap::new(),
            exc_startsize: HashMap::new(),
            exc_maxsize: HashMap::new(),
        }
    }

    fn apply(
        &self,
        frame: &mut Frame,
        effect: StackEffect,
        at: usize,
    ) -> Result<(), StacksizeError> {
        let underflow = StacksizeError::StackUnderflow {
            block: frame.block,
            index: at,
        };
        let new_size = if self.check {
            let dipped = frame
                .size
                .checked_sub(effect.popped())
                .ok_or(underflow)?;
            dipped
                .checked_add(effect.pushed())
                .ok_or(StacksizeError::StackOverflow {
                    block: frame.block,
                    index: at,
                })?
        } else {
            let net = i64::from(frame.size) + i64::from(effect.effect());
            u32::try_from(net).map_err(|_| underflow)?
        };
        frame.size = new_size;
        frame.maxsize = frame.maxsize.max(new_size);
        frame.minsize = frame.minsize.min(new_size);
        Ok(())
    }

    /// Dry-run of [`Self::apply`] for the taken branch of a jump: the
    /// parent keeps its own depth for the fallthrough path.
    fn preview(
        &self,
        frame: &Frame,
        effect: StackEffect,
        at: usize,
    ) -> Result<(u32, u32, u32), StacksizeError> {
        let mut scratch = Frame {
            block: frame.block,
            idx: 0,
            size: frame.size,
            maxsize: frame.maxsize,
            minsize: frame.minsize,
            exception_handler: None,
            current_try: None,
            entered: false,
            inserted: false,
            pending: Pending::None,
        };
        self.apply(&mut scratch, effect, at)?;
        Ok((scratch.size, scratch.maxsize, scratch.minsize))
    }

    /// First `TryEnd` among the dead elements after a final instruction.
    fn trailing_try_end(&self, frame: &Frame) -> Option<TryBeginId> {
        let block = self.cfg.block(frame.block)?;
        block.elements[frame.idx..].iter().find_map(|el| match el {
            Element::TryEnd(end) => Some(end.entry),
            _ => None,
        })
    }

    /// Spawn the handler of `entry` if this path lowers its start depth.
    fn spawn_handler(
        &mut self,
        frame: &mut Frame,
        entry: TryBeginId,
        pending: fn(BlockId) -> Pending,
    ) -> Option<Frame> {
        let (target, push_lasti) = *self.try_info.get(&entry)?;
        let known = *self.exc_startsize.get(&target).unwrap_or(&u32::MAX);
        if frame.minsize < known {
            self.exc_startsize.insert(target, frame.minsize);
            frame.pending = pending(target);
            Some(frame.child(target, frame.minsize, frame.minsize, Some(push_lasti)))
        } else {
            None
        }
    }

    fn finish_after_final(&mut self, frame: &mut Frame) -> Option<Frame> {
        self.trailing_try_end(frame)
            .filter(|entry| Some(*entry) == frame.current_try || frame.current_try.is_none())
            .and_then(|entry| self.spawn_handler(frame, entry, |b| Pending::AfterTrailingHandler { handler: b }))
    }

    fn run(&mut self, initial_size: u32) -> Result<u32, StacksizeError> {
        let Some(entry) = self.cfg.entry() else {
            return Ok(0);
        };

        let mut stack = vec![Frame {
            block: entry,
            idx: 0,
            size: initial_size,
            maxsize: initial_size,
            minsize: initial_size,
            exception_handler: None,
            current_try: None,
            entered: false,
            inserted: false,
            pending: Pending::None,
        }];
        let mut ret = initial_size;

        // Fingerprinting bounds the walk; this is a backstop against bugs.
        let max_steps = self.cfg.len().max(1) * 10_000;
        let mut steps = 0usize;

        while !stack.is_empty() {
            steps += 1;
            if steps > max_steps {
                let frame = stack.last().expect("stack is non-empty");
                return Err(StacksizeError::StackOverflow {
                    block: frame.block,
                    index: frame.idx,
                });
            }

            let step = self.advance(stack.last_mut().expect("stack is non-empty"), ret)?;
            match step {
                Step::Push(child) => stack.push(child),
                Step::Pop => {
                    let frame = stack.pop().expect("stack is non-empty");
                    if frame.inserted {
                        self.seen_blocks.remove(&frame.block);
                    }
                    ret = frame.maxsize;
                }
            }
        }

        let handler_peak = self.exc_maxsize.values().copied().max().unwrap_or(0);
        Ok(ret.max(handler_peak))
    }

    fn advance(&mut self, frame: &mut Frame, ret: u32) -> Result<Step, StacksizeError> {
        if !frame.entered {
            frame.entered = true;
            let fingerprint = (frame.size, frame.exception_handler);
            let already = self.seen_blocks.contains(&frame.block)
                || self
                    .startsizes
                    .get(&frame.block)
                    .is_some_and(|sizes| sizes.contains(&fingerprint));
            if already {
                return Ok(Step::Pop);
            }
            if self.check {
                let key = (frame.block, frame.exception_handler.is_some());
                if let Some(&first) = self.entry_depths.get(&key) {
                    if first != frame.size {
                        return Err(StacksizeError::InconsistentStack {
                            block: frame.block,
                            first,
                            second: frame.size,
                        });
                    }
                } else {
                    self.entry_depths.insert(key, frame.size);
                }
            }
            self.seen_blocks.insert(frame.block);
            frame.inserted = true;
            self.startsizes
                .entry(frame.block)
                .or_default()
                .insert(fingerprint);

            // Entering a handler, the unwinder has pushed the exception and
            // possibly the raising offset.
            if let Some(push_lasti) = frame.exception_handler {
                self.apply(frame, StackEffect::new(0, 1 + u32::from(push_lasti)), 0)?;
            }
            trace!(
                "enter {:?} at depth {} (handler: {:?})",
                frame.block,
                frame.size,
                frame.exception_handler
            );
        }

        match std::mem::replace(&mut frame.pending, Pending::None) {
            Pending::None => {}
            Pending::AfterTryEnd { handler } => {
                self.exc_maxsize.insert(handler, ret);
            }
            Pending::AfterJump { element } => {
                frame.maxsize = frame.maxsize.max(ret);
                let block = self.cfg.block(frame.block).expect("frame blocks are live");
                let Element::Instr(instr) = &block.elements[element] else {
                    unreachable!("jump resume points hold instructions");
                };
                let effect = instr.stack_effect(self.version, false);
                self.apply(frame, effect, element)?;
            }
            Pending::AfterUncondJump => {
                frame.maxsize = frame.maxsize.max(ret);
                if let Some(child) = self.finish_after_final(frame) {
                    return Ok(Step::Push(child));
                }
                return Ok(Step::Pop);
            }
            Pending::AfterTrailingHandler { handler } => {
                self.exc_maxsize.insert(handler, ret);
                return Ok(Step::Pop);
            }
            Pending::AfterNext => {
                frame.maxsize = frame.maxsize.max(ret);
                return Ok(Step::Pop);
            }
        }

        let block = self.cfg.block(frame.block).expect("frame blocks are live");
        while frame.idx < block.elements.len() {
            let at = frame.idx;
            frame.idx += 1;
            match &block.elements[at] {
                Element::Label(_) | Element::SetLineno(_) => {}
                Element::TryBegin(begin) => {
                    // Regions never nest, so the minimum depth between this
                    // begin and its end seeds the handler.
                    frame.current_try = Some(begin.id);
                    frame.minsize = frame.size;
                }
                Element::TryEnd(end) => {
                    // A block may open with ends that belong to paths not
                    // taken here; only the active region counts.
                    if Some(end.entry) != frame.current_try {
                        continue;
                    }
                    if let Some(child) =
                        self.spawn_handler(frame, end.entry, |b| Pending::AfterTryEnd {
                            handler: b,
                        })
                    {
                        return Ok(Step::Push(child));
                    }
                }
                Element::Instr(instr) => {
                    if let Some(target) = instr.jump_target() {
                        let Target::Block(target) = target else {
                            return Err(StacksizeError::UnresolvedTarget { block: frame.block });
                        };
                        let effect = instr.stack_effect(self.version, true);
                        let (taken, maxsize, minsize) = self.preview(frame, effect, at)?;
                        frame.pending = if instr.is_uncond_jump() {
                            Pending::AfterUncondJump
                        } else {
                            Pending::AfterJump { element: at }
                        };
                        let mut child = frame.child(target, taken, minsize, None);
                        child.maxsize = maxsize;
                        return Ok(Step::Push(child));
                    }

                    let effect = instr.stack_effect(self.version, false);
                    self.apply(frame, effect, at)?;

                    if instr.is_final() {
                        if let Some(child) = self.finish_after_final(frame) {
                            return Ok(Step::Push(child));
                        }
                        return Ok(Step::Pop);
                    }
                }
            }
        }

        if let Some(next) = block.next_block {
            frame.pending = Pending::AfterNext;
            let child = frame.child(next, frame.size, frame.minsize, None);
            return Ok(Step::Push(child));
        }
        Ok(Step::Pop)
    }
}

impl ControlFlowGraph {
    pub fn compute_stacksize(&mut self) -> Result<u32, StacksizeError> {
        self.compute_stacksize_with(StacksizeOptions::default())
    }

    /// Solve the maximum operand-stack depth of the graph, optionally
    /// writing each exception region's start depth back into its
    /// `TryBegin`. Unreachable blocks contribute nothing.
    pub fn compute_stacksize_with(
        &mut self,
        options: StacksizeOptions,
    ) -> Result<u32, StacksizeError> {
        // Generators and coroutines begin with the sent value on the stack
        // from 3.10 on.
        let generator_kind = CompilerFlags::GENERATOR
            | CompilerFlags::COROUTINE
            | CompilerFlags::ASYNC_GENERATOR;
        let initial_size = u32::from(
            self.meta.version.offsets_in_code_units()
                && self.meta.flags.intersects(generator_kind),
        );

        let mut solver = Solver::new(self, options.check_pre_and_post);
        let maxsize = solver.run(initial_size)?;
        let exc_startsize = std::mem::take(&mut solver.exc_startsize);
        drop(solver);

        if options.compute_exception_stack_depths {
            for id in self.block_ids() {
                let Some(block) = self.block_mut(id) else { continue };
                for element in &mut block.elements {
                    if let Element::TryBegin(begin) = element {
                        if let Target::Block(target) = begin.target {
                            if let Some(&depth) = exc_startsize.get(&target) {
                                begin.stack_depth = Some(depth);
                            }
                        }
                    }
                }
            }
        }

        Ok(maxsize)
    }
}
