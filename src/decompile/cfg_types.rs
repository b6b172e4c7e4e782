use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use crate::code_attribute::{CatchBlock, CompareOp, Instruction};

/// Block ID is the bytecode offset of the first instruction in the block.
pub type BlockId = u32;

/// Virtual exit node used by post-dominator queries.
pub const EXIT: BlockId = u32::MAX;

/// How a basic block ends.
#[derive(Clone, Debug, PartialEq)]
pub enum Terminator {
    FallThrough { target: BlockId },
    Goto { target: BlockId },
    ConditionalBranch {
        condition: BranchCondition,
        if_true: BlockId,
        if_false: BlockId,
    },
    /// `cases` are sorted by key.
    Switch {
        default: BlockId,
        cases: Vec<(i32, BlockId)>,
    },
    Return,
    Throw,
    Jsr { target: BlockId, return_addr: BlockId },
    Ret,
}

/// The condition for a conditional branch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BranchCondition {
    IntZero(CompareOp),
    IntCompare(CompareOp),
    RefCompare(CompareOp),
    RefNull(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

impl BasicBlock {
    /// Instructions other than a trailing jump.
    pub fn body(&self) -> &[Instruction] {
        match (self.instructions.last(), &self.terminator) {
            (Some(last), Terminator::Goto { .. }) if last.kind.ends_block() => {
                &self.instructions[..self.instructions.len() - 1]
            }
            _ => &self.instructions,
        }
    }

    /// A block holding nothing but an unconditional jump.
    pub fn is_goto_only(&self) -> bool {
        matches!(self.terminator, Terminator::Goto { .. } | Terminator::FallThrough { .. })
            && self.body().is_empty()
    }
}

/// Kind tag of a CFG edge.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    FallThrough,
    Branch,
    SwitchCase,
    ExceptionHandler,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Edge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
}

/// Classification of an unconditional jump by the goto reducer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JumpClass {
    /// Leaves the loop headed at `header`.
    Break { header: BlockId, labeled: bool },
    /// Jumps to the head of an enclosing loop from inside its body.
    Continue { header: BlockId, labeled: bool },
    /// Loop latch, left for the loop reducer.
    BackEdge { header: BlockId },
    /// Forward jump to an if/else join.
    Forward,
    /// No structured equivalent.
    Residual,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForEachForm {
    Array,
    Iterator,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopKind {
    ForEach(ForEachForm),
    For,
    While,
    DoWhile,
    Endless,
    /// Retreating edge whose target does not dominate its source.
    Unstructured,
}

/// A natural loop as classified by the loop reducer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopInfo {
    pub header: BlockId,
    pub kind: LoopKind,
    pub body: BTreeSet<BlockId>,
    /// Block control reaches when the loop terminates normally.
    pub exit: Option<BlockId>,
    /// Source of the back-edge with the highest offset.
    pub latch: BlockId,
    /// Block holding only the initializer, for `for` and for-each loops.
    pub init: Option<BlockId>,
    /// Block holding only the update, for `for` and array for-each loops.
    pub update: Option<BlockId>,
}

impl LoopInfo {
    /// Where `continue` transfers control.
    pub fn continue_target(&self) -> BlockId {
        match self.kind {
            LoopKind::DoWhile => self.latch,
            _ => self.update.unwrap_or(self.header),
        }
    }

    /// Block at which structuring of this loop starts.
    pub fn entry(&self) -> BlockId {
        self.init.unwrap_or(self.header)
    }
}

/// Header and body of a natural loop before classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NaturalLoop {
    pub header: BlockId,
    pub body: BTreeSet<BlockId>,
    /// Sources of back-edges to `header`, in offset order.
    pub latches: Vec<BlockId>,
}

/// The control flow graph for a single method.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlFlowGraph {
    pub blocks: BTreeMap<BlockId, BasicBlock>,
    pub entry: BlockId,
    pub catch_blocks: Vec<CatchBlock>,
    /// Goto reducer annotations, keyed by the block whose terminator jumps.
    pub jump_classes: BTreeMap<BlockId, JumpClass>,
    /// Loop reducer annotations.
    pub loops: Vec<LoopInfo>,
}

impl ControlFlowGraph {
    /// Normal (non-exceptional) successors, without duplicates.
    pub fn successors(&self, block_id: BlockId) -> Vec<BlockId> {
        let block = match self.blocks.get(&block_id) {
            Some(b) => b,
            None => return Vec::new(),
        };
        let mut succs = match &block.terminator {
            Terminator::FallThrough { target } | Terminator::Goto { target } => vec![*target],
            Terminator::ConditionalBranch {
                if_true, if_false, ..
            } => vec![*if_false, *if_true],
            Terminator::Switch { default, cases } => {
                let mut succs: Vec<BlockId> = cases.iter().map(|(_, t)| *t).collect();
                succs.push(*default);
                succs
            }
            Terminator::Return | Terminator::Throw | Terminator::Ret => vec![],
            Terminator::Jsr {
                target,
                return_addr,
            } => vec![*target, *return_addr],
        };
        let mut seen = BTreeSet::new();
        succs.retain(|s| seen.insert(*s));
        succs
    }

    /// Handler blocks protecting any instruction of `block_id`.
    pub fn exception_successors(&self, block_id: BlockId) -> Vec<BlockId> {
        let block = match self.blocks.get(&block_id) {
            Some(b) => b,
            None => return Vec::new(),
        };
        let mut handlers = BTreeSet::new();
        for catch in &self.catch_blocks {
            if block.instructions.iter().any(|i| catch.covers(i.offset)) {
                handlers.insert(catch.handler_pc);
            }
        }
        handlers.into_iter().collect()
    }

    pub fn all_successors(&self, block_id: BlockId) -> Vec<BlockId> {
        let mut succs = self.successors(block_id);
        for h in self.exception_successors(block_id) {
            if !succs.contains(&h) {
                succs.push(h);
            }
        }
        succs
    }

    /// Normal predecessors.
    pub fn predecessors(&self, target: BlockId) -> Vec<BlockId> {
        self.blocks
            .keys()
            .filter(|&&b| self.successors(b).contains(&target))
            .copied()
            .collect()
    }

    /// Every edge, tagged with its kind.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for (&from, block) in &self.blocks {
            let mut push = |to: BlockId, kind: EdgeKind| edges.push(Edge { from, to, kind });
            match &block.terminator {
                Terminator::FallThrough { target } => push(*target, EdgeKind::FallThrough),
                Terminator::Goto { target } => push(*target, EdgeKind::Branch),
                Terminator::ConditionalBranch {
                    if_true, if_false, ..
                } => {
                    push(*if_false, EdgeKind::FallThrough);
                    push(*if_true, EdgeKind::Branch);
                }
                Terminator::Switch { default, cases } => {
                    for (_, target) in cases {
                        push(*target, EdgeKind::SwitchCase);
                    }
                    push(*default, EdgeKind::SwitchCase);
                }
                Terminator::Jsr {
                    target,
                    return_addr,
                } => {
                    push(*target, EdgeKind::Branch);
                    push(*return_addr, EdgeKind::FallThrough);
                }
                Terminator::Return | Terminator::Throw | Terminator::Ret => {}
            }
            for handler in self.exception_successors(from) {
                push(handler, EdgeKind::ExceptionHandler);
            }
        }
        edges
    }

    /// The block following `block_id` in offset order.
    pub fn next_block(&self, block_id: BlockId) -> Option<BlockId> {
        self.blocks
            .range(block_id.saturating_add(1)..)
            .next()
            .map(|(&id, _)| id)
    }

    /// Block IDs in reverse postorder, following exception edges too.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = BTreeSet::new();
        let mut postorder = Vec::new();
        if self.blocks.contains_key(&self.entry) {
            // Iterative DFS keeps deep methods off the call stack.
            let mut stack = vec![(self.entry, self.all_successors(self.entry), 0usize)];
            visited.insert(self.entry);
            while let Some((node, succs, idx)) = stack.last_mut() {
                if let Some(&next) = succs.get(*idx) {
                    *idx += 1;
                    if self.blocks.contains_key(&next) && visited.insert(next) {
                        let next_succs = self.all_successors(next);
                        stack.push((next, next_succs, 0));
                    }
                } else {
                    postorder.push(*node);
                    stack.pop();
                }
            }
        }
        postorder.reverse();
        postorder
    }

    /// Immediate dominators over normal and exception edges. The entry maps
    /// to itself; unreachable blocks are absent.
    pub fn dominators(&self) -> BTreeMap<BlockId, BlockId> {
        let rpo = self.reverse_postorder();
        let mut preds: BTreeMap<BlockId, Vec<BlockId>> = BTreeMap::new();
        for &b in &rpo {
            for s in self.all_successors(b) {
                preds.entry(s).or_default().push(b);
            }
        }
        compute_idoms(&rpo, &preds)
    }

    /// Immediate post-dominators over normal edges, relative to the virtual
    /// [`EXIT`] node. Blocks that never reach an exit are absent.
    pub fn post_dominators(&self) -> BTreeMap<BlockId, BlockId> {
        // Reverse graph: EXIT -> returning blocks, and s -> b for each edge b -> s.
        let mut rev_succs: BTreeMap<BlockId, Vec<BlockId>> = BTreeMap::new();
        for (&b, block) in &self.blocks {
            let succs = self.successors(b);
            if succs.is_empty()
                || matches!(block.terminator, Terminator::Return | Terminator::Throw)
            {
                rev_succs.entry(EXIT).or_default().push(b);
            }
            for s in succs {
                rev_succs.entry(s).or_default().push(b);
            }
        }
        let mut visited = BTreeSet::new();
        let mut postorder = Vec::new();
        let mut stack = vec![(EXIT, 0usize)];
        visited.insert(EXIT);
        while let Some((node, idx)) = stack.last_mut() {
            let next = rev_succs.get(node).and_then(|s| s.get(*idx)).copied();
            match next {
                Some(n) => {
                    *idx += 1;
                    if visited.insert(n) {
                        stack.push((n, 0));
                    }
                }
                None => {
                    postorder.push(*node);
                    stack.pop();
                }
            }
        }
        postorder.reverse();
        let mut rev_preds: BTreeMap<BlockId, Vec<BlockId>> = BTreeMap::new();
        for (&from, tos) in &rev_succs {
            for &to in tos {
                rev_preds.entry(to).or_default().push(from);
            }
        }
        compute_idoms(&postorder, &rev_preds)
    }

    /// Does `a` dominate `b` according to `doms`?
    pub fn dominates(doms: &BTreeMap<BlockId, BlockId>, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match doms.get(&current) {
                Some(&dom) if dom != current => current = dom,
                _ => return false,
            }
        }
    }

    /// Blocks reachable from `start` over normal edges without entering
    /// `barrier`.
    pub fn reachable_from(&self, start: BlockId, barrier: &BTreeSet<BlockId>) -> BTreeSet<BlockId> {
        let mut visited = BTreeSet::new();
        let mut worklist = vec![start];
        while let Some(b) = worklist.pop() {
            if barrier.contains(&b) || !self.blocks.contains_key(&b) || !visited.insert(b) {
                continue;
            }
            worklist.extend(self.successors(b));
        }
        visited
    }

    /// Natural loops over normal edges, one per header, innermost first.
    pub fn natural_loops(&self) -> Vec<NaturalLoop> {
        let doms = self.dominators();
        let mut by_header: BTreeMap<BlockId, NaturalLoop> = BTreeMap::new();
        for &b in self.blocks.keys() {
            if !doms.contains_key(&b) {
                continue;
            }
            for s in self.successors(b) {
                if !Self::dominates(&doms, s, b) {
                    continue;
                }
                let lp = by_header.entry(s).or_insert_with(|| NaturalLoop {
                    header: s,
                    body: BTreeSet::from([s]),
                    latches: Vec::new(),
                });
                lp.latches.push(b);
                let mut worklist = vec![b];
                while let Some(n) = worklist.pop() {
                    if lp.body.insert(n) {
                        worklist.extend(self.predecessors(n));
                    }
                }
            }
        }
        let mut loops: Vec<NaturalLoop> = by_header.into_values().collect();
        loops.sort_by_key(|l| (l.body.len(), l.header));
        loops
    }

    /// Retreating edges whose target does not dominate their source.
    pub fn irreducible_edges(&self) -> Vec<(BlockId, BlockId)> {
        let doms = self.dominators();
        let rpo = self.reverse_postorder();
        let position: BTreeMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        let mut edges = Vec::new();
        for &b in &rpo {
            for s in self.successors(b) {
                match (position.get(&b), position.get(&s)) {
                    (Some(pb), Some(ps)) if ps <= pb && !Self::dominates(&doms, s, b) => {
                        edges.push((b, s))
                    }
                    _ => {}
                }
            }
        }
        edges
    }

    /// Offsets where a protected range starts or ends, or a handler begins.
    pub fn try_boundaries(&self) -> BTreeSet<BlockId> {
        let mut boundaries = BTreeSet::new();
        for catch in &self.catch_blocks {
            boundaries.insert(catch.start_pc);
            boundaries.insert(catch.end_pc);
            boundaries.insert(catch.handler_pc);
        }
        boundaries
    }

    /// Split `block_id` so that a new block starts at instruction offset
    /// `at`. Returns false when `at` is already a block start or is not an
    /// instruction of the block.
    pub fn split_block(&mut self, block_id: BlockId, at: u32) -> bool {
        if at == block_id {
            return false;
        }
        let block = match self.blocks.get_mut(&block_id) {
            Some(b) => b,
            None => return false,
        };
        let idx = match block.instructions.iter().position(|i| i.offset == at) {
            Some(idx) => idx,
            None => return false,
        };
        let tail = block.instructions.split_off(idx);
        let terminator = std::mem::replace(&mut block.terminator, Terminator::FallThrough { target: at });
        self.blocks.insert(
            at,
            BasicBlock {
                id: at,
                instructions: tail,
                terminator,
            },
        );
        if let Some(class) = self.jump_classes.remove(&block_id) {
            self.jump_classes.insert(at, class);
        }
        true
    }

    /// Generate a DOT graph for visualization.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph CFG {\n");
        for (id, block) in &self.blocks {
            let _ = writeln!(
                dot,
                "  B{} [label=\"B{} ({} instrs)\"];",
                id,
                id,
                block.instructions.len()
            );
        }
        for edge in self.edges() {
            let style = match edge.kind {
                EdgeKind::FallThrough => "",
                EdgeKind::Branch => " [label=\"branch\"]",
                EdgeKind::SwitchCase => " [label=\"case\"]",
                EdgeKind::ExceptionHandler => " [style=dashed, label=\"catch\"]",
            };
            let _ = writeln!(dot, "  B{} -> B{}{};", edge.from, edge.to, style);
        }
        dot.push_str("}\n");
        dot
    }
}

/// Cooper-Harvey-Kennedy iterative dominator computation over nodes in
/// reverse postorder.
fn compute_idoms(
    rpo: &[BlockId],
    preds: &BTreeMap<BlockId, Vec<BlockId>>,
) -> BTreeMap<BlockId, BlockId> {
    let mut doms: BTreeMap<BlockId, BlockId> = BTreeMap::new();
    let entry = match rpo.first() {
        Some(&e) => e,
        None => return doms,
    };
    doms.insert(entry, entry);
    let rpo_index: BTreeMap<BlockId, usize> =
        rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

    let mut changed = true;
    while changed {
        changed = false;
        for &b in rpo.iter().skip(1) {
            let mut new_idom: Option<BlockId> = None;
            for p in preds.get(&b).map(|v| v.as_slice()).unwrap_or(&[]) {
                if !doms.contains_key(p) {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => *p,
                    Some(current) => intersect(&doms, &rpo_index, current, *p),
                });
            }
            if let Some(idom) = new_idom {
                if doms.get(&b) != Some(&idom) {
                    doms.insert(b, idom);
                    changed = true;
                }
            }
        }
    }
    doms
}

fn intersect(
    doms: &BTreeMap<BlockId, BlockId>,
    rpo_index: &BTreeMap<BlockId, usize>,
    mut b1: BlockId,
    mut b2: BlockId,
) -> BlockId {
    while b1 != b2 {
        let idx1 = rpo_index.get(&b1).copied().unwrap_or(usize::MAX);
        let idx2 = rpo_index.get(&b2).copied().unwrap_or(usize::MAX);
        if idx1 > idx2 {
            b1 = *doms.get(&b1).unwrap_or(&b1);
        } else {
            b2 = *doms.get(&b2).unwrap_or(&b2);
        }
        if idx1 == usize::MAX && idx2 == usize::MAX {
            break;
        }
    }
    b1
}
