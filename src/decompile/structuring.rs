use std::collections::{BTreeMap, BTreeSet};
use std::cmp::Reverse;

use tracing::trace;

use crate::code_attribute::CatchBlock;
use crate::error::{Warning, WarningKind};

use super::cfg_types::*;
use super::expr::*;
use super::stack_sim::{simulate_block, SimContext, SimulatedBlock};
use super::structured_types::*;
use super::util::is_pure_condition;
use super::visitor::{walk_body_mut, PositionEraser};

/// Statements of one method body after structuring, with the problems met
/// on the way.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructuredBody {
    pub statements: Vec<StructuredStmt>,
    pub warnings: Vec<Warning>,
}

/// Turn a reduced control flow graph into nested statements.
///
/// Blocks are simulated on demand, each exactly once. Control flow that has
/// no structured form is kept as a labeled `goto` and reported as a
/// [`WarningKind::ReductionAmbiguity`].
pub fn structure_method(
    cfg: &ControlFlowGraph,
    ctx: &SimContext<'_>,
    method: &str,
    strip_finally_copies: bool,
) -> StructuredBody {
    if cfg.blocks.is_empty() {
        return StructuredBody::default();
    }
    let mut structurer = Structurer {
        cfg,
        ctx,
        method,
        strip_finally_copies,
        post_dominators: cfg.post_dominators(),
        loops: cfg
            .loops
            .iter()
            .filter(|l| l.kind != LoopKind::Unstructured)
            .map(|l| (l.entry(), l.clone()))
            .collect(),
        regions: try_regions(&cfg.catch_blocks),
        visited: BTreeSet::new(),
        loops_done: BTreeSet::new(),
        tries_done: BTreeSet::new(),
        breakables: Vec::new(),
        used_labels: BTreeSet::new(),
        warnings: Vec::new(),
    };
    let mut statements = structurer.structure_seq(cfg.entry, &BTreeSet::new(), Vec::new());
    for (idx, region) in structurer.regions.iter().enumerate() {
        if !structurer.tries_done.contains(&idx) {
            structurer.warnings.push(Warning::new(
                WarningKind::ReductionAmbiguity,
                method,
                format!("protected range at {} was not structured", region.start),
            ));
        }
    }
    retain_used_labels(&mut statements, &structurer.used_labels);
    StructuredBody {
        statements,
        warnings: structurer.warnings,
    }
}

/// Exception table rows grouped into try statements.
#[derive(Clone, Debug, PartialEq)]
struct TryRegion {
    start: BlockId,
    /// Handlers with the types they catch, in handler order.
    catches: Vec<(BlockId, Vec<String>)>,
    finally: Option<BlockId>,
}

impl TryRegion {
    fn handlers(&self) -> BTreeSet<BlockId> {
        self.catches
            .iter()
            .map(|(pc, _)| *pc)
            .chain(self.finally)
            .collect()
    }
}

/// Group the exception table by handler, then by protected range.
///
/// The compiler splits a range around inlined finally code and protects the
/// catch handlers with the finally handler too, so each handler is owned by
/// its row with the smallest start. Regions come out outermost first.
fn try_regions(catch_blocks: &[CatchBlock]) -> Vec<TryRegion> {
    let mut by_handler: BTreeMap<BlockId, (BlockId, BlockId, Vec<String>)> = BTreeMap::new();
    for catch in catch_blocks {
        let entry = by_handler
            .entry(catch.handler_pc)
            .or_insert((catch.start_pc, catch.end_pc, Vec::new()));
        if (catch.start_pc, Reverse(catch.end_pc)) < (entry.0, Reverse(entry.1)) {
            entry.0 = catch.start_pc;
            entry.1 = catch.end_pc;
        }
        if let Some(ty) = &catch.catch_type {
            if !entry.2.contains(ty) {
                entry.2.push(ty.clone());
            }
        }
    }
    let mut regions: BTreeMap<(BlockId, Reverse<BlockId>), TryRegion> = BTreeMap::new();
    for (handler, (start, end, types)) in by_handler {
        let region = regions
            .entry((start, Reverse(end)))
            .or_insert_with(|| TryRegion {
                start,
                catches: Vec::new(),
                finally: None,
            });
        if types.is_empty() && region.finally.is_none() {
            region.finally = Some(handler);
        } else {
            region.catches.push((handler, types));
        }
    }
    regions.into_values().collect()
}

/// An enclosing statement that `break` (and, for loops, `continue`) can
/// target.
struct Breakable {
    label: String,
    /// Header of the loop, `None` for a switch.
    header: Option<BlockId>,
    break_target: Option<BlockId>,
    continue_target: Option<BlockId>,
    label_used: bool,
}

struct Structurer<'a, 'c> {
    cfg: &'a ControlFlowGraph,
    ctx: &'a SimContext<'c>,
    method: &'a str,
    strip_finally_copies: bool,
    post_dominators: BTreeMap<BlockId, BlockId>,
    /// Classified loops keyed by the block where structuring enters them.
    loops: BTreeMap<BlockId, LoopInfo>,
    regions: Vec<TryRegion>,
    visited: BTreeSet<BlockId>,
    loops_done: BTreeSet<BlockId>,
    tries_done: BTreeSet<usize>,
    breakables: Vec<Breakable>,
    used_labels: BTreeSet<String>,
    warnings: Vec<Warning>,
}

fn block_label(id: BlockId) -> String {
    format!("L{}", id)
}

fn unresolved(what: &str) -> Expr {
    Expr::new(ExprKind::Unresolved(what.into()), None)
}

impl<'a, 'c> Structurer<'a, 'c> {
    fn warn(&mut self, message: String) {
        self.warnings.push(Warning::new(
            WarningKind::ReductionAmbiguity,
            self.method,
            message,
        ));
    }

    fn simulate(&mut self, block: &BasicBlock, entry_stack: Vec<Expr>) -> SimulatedBlock {
        let sim = simulate_block(block, entry_stack, self.ctx);
        for diagnostic in &sim.diagnostics {
            self.warn(format!("block {}: {}", block.id, diagnostic));
        }
        sim
    }

    /// Structure the code starting at `start` until control reaches one of
    /// `stops`, leaves the method, or jumps somewhere structured statements
    /// express with `break`, `continue` or `goto`.
    fn structure_seq(
        &mut self,
        start: BlockId,
        stops: &BTreeSet<BlockId>,
        entry_stack: Vec<Expr>,
    ) -> Vec<StructuredStmt> {
        let mut out = Vec::new();
        let mut current = Some((start, entry_stack));
        while let Some((id, stack)) = current.take() {
            if self.visited.contains(&id) {
                self.residual_goto(id, &mut out);
                break;
            }
            if let Some(idx) = self.pending_try(id) {
                current = self
                    .structure_try(idx, stops, &mut out)
                    .and_then(|next| self.follow(next, stops, &mut out))
                    .map(|next| (next, Vec::new()));
                continue;
            }
            if let Some(info) = self.pending_loop(id) {
                current = self
                    .structure_loop(info, &mut out)
                    .and_then(|next| self.follow(next, stops, &mut out))
                    .map(|next| (next, Vec::new()));
                continue;
            }
            current = self.structure_block(id, stack, stops, &mut out);
        }
        out
    }

    /// Structure the code a branch leads to.
    fn branch(&mut self, start: BlockId, stops: &BTreeSet<BlockId>) -> Vec<StructuredStmt> {
        let mut out = Vec::new();
        if let Some(next) = self.follow(start, stops, &mut out) {
            let rest = self.structure_seq(next, stops, Vec::new());
            out.extend(rest);
        }
        out
    }

    /// Decide what a transfer to `target` means in the current context.
    /// Returns the block to continue with, if any.
    fn follow(
        &mut self,
        target: BlockId,
        stops: &BTreeSet<BlockId>,
        out: &mut Vec<StructuredStmt>,
    ) -> Option<BlockId> {
        if stops.contains(&target) {
            return None;
        }
        if let Some(jump) = self.jump_stmt(target) {
            out.push(jump);
            return None;
        }
        if self.visited.contains(&target) {
            self.residual_goto(target, out);
            return None;
        }
        Some(target)
    }

    fn residual_goto(&mut self, target: BlockId, out: &mut Vec<StructuredStmt>) {
        let label = block_label(target);
        self.used_labels.insert(label.clone());
        self.warn(format!("jump to {} has no structured form", target));
        out.push(StructuredStmt::Goto(label));
    }

    /// `break` or `continue` for a jump to `target`, labeled when it does not
    /// refer to the innermost candidate.
    fn jump_stmt(&mut self, target: BlockId) -> Option<StructuredStmt> {
        let depth = self.breakables.len();
        for idx in (0..depth).rev() {
            let is_continue = self.breakables[idx].continue_target == Some(target);
            let is_break = self.breakables[idx].break_target == Some(target);
            if !is_continue && !is_break {
                continue;
            }
            let labeled = if is_continue {
                self.breakables[idx + 1..]
                    .iter()
                    .any(|b| b.continue_target.is_some())
            } else {
                idx + 1 < depth
            };
            let label = if labeled {
                let breakable = &mut self.breakables[idx];
                breakable.label_used = true;
                Some(breakable.label.clone())
            } else {
                None
            };
            return Some(if is_continue {
                StructuredStmt::Continue(label)
            } else {
                StructuredStmt::Break(label)
            });
        }
        None
    }

    fn is_jump_target(&self, target: BlockId) -> bool {
        self.breakables
            .iter()
            .any(|b| b.continue_target == Some(target) || b.break_target == Some(target))
    }

    /// Stops for a nested construct joining at `join`: the join itself plus
    /// the enclosing stops that are not already expressed as jumps.
    fn nested_stops(&self, join: Option<BlockId>, stops: &BTreeSet<BlockId>) -> BTreeSet<BlockId> {
        match join {
            Some(join) => stops
                .iter()
                .copied()
                .filter(|s| !self.is_jump_target(*s))
                .chain(std::iter::once(join))
                .collect(),
            None => stops.clone(),
        }
    }

    fn innermost_loop_body(&self) -> Option<&BTreeSet<BlockId>> {
        let header = self.breakables.iter().rev().find_map(|b| b.header)?;
        self.loops
            .values()
            .find(|l| l.header == header)
            .map(|l| &l.body)
    }

    fn in_current_loop(&self, id: BlockId) -> bool {
        self.innermost_loop_body().map_or(true, |body| body.contains(&id))
    }

    fn pending_loop(&self, id: BlockId) -> Option<LoopInfo> {
        self.loops
            .get(&id)
            .filter(|l| !self.loops_done.contains(&l.header))
            .cloned()
    }

    fn pending_try(&self, id: BlockId) -> Option<usize> {
        let idx = self
            .regions
            .iter()
            .enumerate()
            .position(|(idx, r)| r.start == id && !self.tries_done.contains(&idx))?;
        // A loop starting at the same block goes first unless the whole loop
        // is protected by the region.
        if let Some(info) = self.pending_loop(id) {
            let first_handler = self.regions[idx].handlers().into_iter().next()?;
            if info.body.iter().any(|&b| b >= first_handler) {
                return None;
            }
        }
        Some(idx)
    }

    fn structure_block(
        &mut self,
        id: BlockId,
        stack: Vec<Expr>,
        stops: &BTreeSet<BlockId>,
        out: &mut Vec<StructuredStmt>,
    ) -> Option<(BlockId, Vec<Expr>)> {
        let cfg = self.cfg;
        let block = cfg.blocks.get(&id)?;
        self.visited.insert(id);
        out.push(StructuredStmt::Label(block_label(id)));
        let sim = self.simulate(block, stack);
        out.extend(sim.statements.iter().cloned().map(StructuredStmt::Simple));
        match &block.terminator {
            Terminator::Return | Terminator::Throw => None,
            Terminator::FallThrough { target } | Terminator::Goto { target } => {
                let exit_stack = sim.exit_stack;
                self.follow(*target, stops, out).map(|t| (t, exit_stack))
            }
            Terminator::ConditionalBranch {
                if_true, if_false, ..
            } => self.structure_conditional(id, sim, *if_true, *if_false, stops, out),
            Terminator::Switch { default, cases } => {
                self.structure_switch(id, sim, *default, cases, stops, out)
            }
            Terminator::Jsr {
                target,
                return_addr,
            } => {
                out.push(StructuredStmt::Comment(format!("jsr L{}", target)));
                self.warn(format!("subroutine call at block {} kept as a comment", id));
                self.follow(*return_addr, stops, out).map(|t| (t, Vec::new()))
            }
            Terminator::Ret => {
                out.push(StructuredStmt::Comment("ret".into()));
                self.warn(format!("subroutine return at block {} kept as a comment", id));
                None
            }
        }
    }

    fn structure_conditional(
        &mut self,
        head: BlockId,
        sim: SimulatedBlock,
        if_true: BlockId,
        if_false: BlockId,
        stops: &BTreeSet<BlockId>,
        out: &mut Vec<StructuredStmt>,
    ) -> Option<(BlockId, Vec<Expr>)> {
        let mut condition = sim.condition.unwrap_or_else(|| unresolved("condition"));
        let (mut taken, mut fallthrough) = (if_true, if_false);
        self.merge_short_circuit(head, &mut condition, &mut taken, &mut fallthrough);

        if let Some((then_value, else_value, join)) = self.conditional_value(taken, fallthrough) {
            self.visited.insert(taken);
            self.visited.insert(fallthrough);
            let mut stack = sim.exit_stack;
            stack.push(make_ternary(condition, then_value, else_value));
            return self.follow(join, stops, out).map(|j| (j, stack));
        }
        if !sim.exit_stack.is_empty() {
            self.warn(format!(
                "{} value(s) live across the branch at block {} were dropped",
                sim.exit_stack.len(),
                head
            ));
        }
        self.structure_if(head, condition, taken, fallthrough, stops, out)
    }

    /// Fold chains of pure condition blocks into `&&`/`||`.
    ///
    /// `taken` and `fallthrough` are the targets for a true and a false
    /// `condition`; both are updated as blocks are folded in.
    fn merge_short_circuit(
        &mut self,
        head: BlockId,
        condition: &mut Expr,
        taken: &mut BlockId,
        fallthrough: &mut BlockId,
    ) {
        let mut members = BTreeSet::from([head]);
        loop {
            let candidates = [(*fallthrough, false), (*taken, true)];
            let merged = candidates.into_iter().find_map(|(block, on_true)| {
                let (c2, t2, f2) = self.pure_condition(block, &members)?;
                let other = if on_true { *fallthrough } else { *taken };
                let (op, negate, new_target) = match (on_true, t2 == other, f2 == other) {
                    (false, true, _) => (BinaryOp::Or, false, f2),
                    (false, _, true) => (BinaryOp::Or, true, t2),
                    (true, _, true) => (BinaryOp::And, false, t2),
                    (true, true, _) => (BinaryOp::And, true, f2),
                    _ => return None,
                };
                Some((block, on_true, op, if negate { c2.negate() } else { c2 }, new_target))
            });
            let (block, on_true, op, rhs, new_target) = match merged {
                Some(m) => m,
                None => return,
            };
            trace!(head, block, "merged short-circuit condition");
            let lhs = std::mem::replace(condition, unresolved("condition"));
            let line = lhs.line.or(rhs.line);
            *condition = Expr::new(
                ExprKind::Binary {
                    op,
                    left: lhs.boxed(),
                    right: rhs.boxed(),
                },
                line,
            );
            if on_true {
                *taken = new_target;
            } else {
                *fallthrough = new_target;
            }
            members.insert(block);
            self.visited.insert(block);
        }
    }

    /// A block that only tests a condition and is entered only from
    /// `members`: its condition and its (taken, fallthrough) targets.
    fn pure_condition(
        &self,
        id: BlockId,
        members: &BTreeSet<BlockId>,
    ) -> Option<(Expr, BlockId, BlockId)> {
        if self.visited.contains(&id)
            || self.loops.contains_key(&id)
            || self.regions.iter().any(|r| r.start == id)
        {
            return None;
        }
        let block = self.cfg.blocks.get(&id)?;
        let (if_true, if_false) = match block.terminator {
            Terminator::ConditionalBranch {
                if_true, if_false, ..
            } => (if_true, if_false),
            _ => return None,
        };
        if !self.cfg.predecessors(id).iter().all(|p| members.contains(p))
            || !is_pure_condition(&block.instructions, self.ctx.pool)
        {
            return None;
        }
        let sim = simulate_block(block, Vec::new(), self.ctx);
        if !sim.statements.is_empty() || !sim.exit_stack.is_empty() || !sim.diagnostics.is_empty() {
            return None;
        }
        Some((sim.condition?, if_true, if_false))
    }

    /// Both arms of a conditional expression: each pushes one value and
    /// jumps to the same join.
    fn conditional_value(&self, taken: BlockId, fallthrough: BlockId) -> Option<(Expr, Expr, BlockId)> {
        if taken == fallthrough {
            return None;
        }
        let (then_value, then_join) = self.value_block(taken)?;
        let (else_value, else_join) = self.value_block(fallthrough)?;
        if then_join != else_join {
            return None;
        }
        Some((then_value, else_value, then_join))
    }

    fn value_block(&self, id: BlockId) -> Option<(Expr, BlockId)> {
        if self.visited.contains(&id)
            || self.loops.contains_key(&id)
            || self.regions.iter().any(|r| r.start == id)
            || self.is_jump_target(id)
        {
            return None;
        }
        let block = self.cfg.blocks.get(&id)?;
        let join = match block.terminator {
            Terminator::Goto { target } | Terminator::FallThrough { target } => target,
            _ => return None,
        };
        let mut sim = simulate_block(block, Vec::new(), self.ctx);
        if !sim.statements.is_empty() || !sim.diagnostics.is_empty() || sim.exit_stack.len() != 1 {
            return None;
        }
        Some((sim.exit_stack.pop()?, join))
    }

    /// Where the two arms of an if meet: the immediate post-dominator when
    /// it lies in the current loop, otherwise a block both arms reach.
    fn if_join(
        &self,
        head: BlockId,
        taken: BlockId,
        fallthrough: BlockId,
        stops: &BTreeSet<BlockId>,
    ) -> Option<BlockId> {
        if let Some(&join) = self.post_dominators.get(&head) {
            if join != EXIT && !self.visited.contains(&join) && self.in_current_loop(join) {
                return Some(join);
            }
        }
        let mut barrier = stops.clone();
        barrier.insert(head);
        let from_fallthrough = self.cfg.reachable_from(fallthrough, &barrier);
        let from_taken = self.cfg.reachable_from(taken, &barrier);
        if from_fallthrough.contains(&taken) {
            return Some(taken);
        }
        if from_taken.contains(&fallthrough) {
            return Some(fallthrough);
        }
        let common = from_fallthrough
            .intersection(&from_taken)
            .copied()
            .find(|b| !self.visited.contains(b) && self.in_current_loop(*b));
        if common.is_some() {
            return common;
        }
        // One arm never rejoins: the other arm simply follows the if.
        if !self.leaks(&from_fallthrough, stops) {
            return Some(taken);
        }
        if !self.leaks(&from_taken, stops) {
            return Some(fallthrough);
        }
        None
    }

    /// Does control escape `region` into a stop that is not a jump target?
    fn leaks(&self, region: &BTreeSet<BlockId>, stops: &BTreeSet<BlockId>) -> bool {
        region.iter().any(|&b| {
            self.cfg
                .successors(b)
                .iter()
                .any(|s| stops.contains(s) && !self.is_jump_target(*s))
        })
    }

    fn structure_if(
        &mut self,
        head: BlockId,
        condition: Expr,
        taken: BlockId,
        fallthrough: BlockId,
        stops: &BTreeSet<BlockId>,
        out: &mut Vec<StructuredStmt>,
    ) -> Option<(BlockId, Vec<Expr>)> {
        let join = self.if_join(head, taken, fallthrough, stops);
        let inner = self.nested_stops(join, stops);
        // The fallthrough arm reads first, guarded by the negated condition.
        let (mut condition, then_start, else_start) = if join == Some(fallthrough) {
            (condition, taken, fallthrough)
        } else {
            (condition.negate(), fallthrough, taken)
        };
        let mut then_body = self.branch(then_start, &inner);
        let mut else_body = self.branch(else_start, &inner);
        if then_body.iter().all(is_label) && !else_body.iter().all(is_label) {
            std::mem::swap(&mut then_body, &mut else_body);
            condition = condition.negate();
        }
        out.push(StructuredStmt::If {
            condition,
            then_body,
            else_body,
        });
        let join = join?;
        self.follow(join, stops, out).map(|j| (j, Vec::new()))
    }

    fn structure_switch(
        &mut self,
        head: BlockId,
        sim: SimulatedBlock,
        default: BlockId,
        cases: &[(i32, BlockId)],
        stops: &BTreeSet<BlockId>,
        out: &mut Vec<StructuredStmt>,
    ) -> Option<(BlockId, Vec<Expr>)> {
        let key = sim.switch_key.unwrap_or_else(|| unresolved("switch key"));
        let join = self
            .post_dominators
            .get(&head)
            .copied()
            .filter(|&j| j != EXIT && !self.visited.contains(&j) && self.in_current_loop(j));

        let mut groups: BTreeMap<BlockId, Vec<Option<i32>>> = BTreeMap::new();
        for &(value, target) in cases {
            groups.entry(target).or_default().push(Some(value));
        }
        if Some(default) != join {
            groups.entry(default).or_default().push(None);
        }
        let label = format!("switch{}", head);
        self.breakables.push(Breakable {
            label: label.clone(),
            header: None,
            break_target: join,
            continue_target: None,
            label_used: false,
        });

        let targets: Vec<BlockId> = groups.keys().copied().collect();
        let mut switch_cases = Vec::with_capacity(groups.len());
        for (idx, (target, labels)) in groups.into_iter().enumerate() {
            let next = targets.get(idx + 1).copied();
            // Falling into the next case ends this one; reaching the join
            // from any case but the last is a `break`.
            let case_stops = match next {
                Some(next) => self.nested_stops(Some(next), stops),
                None => self.nested_stops(join, stops),
            };
            let body = self.branch(target, &case_stops);
            let ends_in_jump = body
                .iter()
                .rev()
                .find(|s| !is_label(s))
                .map_or(false, StructuredStmt::is_jump);
            switch_cases.push(SwitchCase {
                labels,
                falls_through: next.is_some() && !ends_in_jump,
                body,
            });
        }
        let used = self.breakables.pop().map_or(false, |b| b.label_used);
        let switch = StructuredStmt::Switch {
            key,
            cases: switch_cases,
        };
        out.push(if used {
            StructuredStmt::Labeled {
                label,
                body: Box::new(switch),
            }
        } else {
            switch
        });
        let join = join?;
        self.follow(join, stops, out).map(|j| (j, Vec::new()))
    }

    /// Structure a classified loop. Returns the block control reaches when
    /// the loop terminates.
    fn structure_loop(&mut self, info: LoopInfo, out: &mut Vec<StructuredStmt>) -> Option<BlockId> {
        self.loops_done.insert(info.header);
        let label = loop_label(info.header);
        out.push(StructuredStmt::Label(block_label(info.entry())));
        if info.init.is_some() {
            out.push(StructuredStmt::Label(block_label(info.header)));
        }
        self.breakables.push(Breakable {
            label: label.clone(),
            header: Some(info.header),
            break_target: info.exit,
            continue_target: Some(info.continue_target()),
            label_used: false,
        });
        trace!(header = info.header, kind = ?info.kind, "structuring loop");

        let stmt = match &info.kind {
            LoopKind::While => {
                let (condition, entry) = self.loop_condition(&info);
                let body = self.loop_body(entry, info.header);
                StructuredStmt::While { condition, body }
            }
            LoopKind::For => {
                let init = self.simple_block(info.init);
                let (condition, entry) = self.loop_condition(&info);
                let body = self.loop_body(entry, info.continue_target());
                let update = self.simple_block(info.update);
                StructuredStmt::For {
                    init,
                    condition,
                    update,
                    body,
                }
            }
            LoopKind::ForEach(form) => {
                let init = self.simple_block(info.init);
                let (condition, entry) = self.loop_condition(&info);
                let mut body = self.loop_body(entry, info.continue_target());
                let update = self.simple_block(info.update);
                match for_each_parts(form, &init, &mut body) {
                    Some((var, iterable)) => StructuredStmt::ForEach {
                        var,
                        iterable,
                        body,
                    },
                    None => {
                        self.warn(format!(
                            "for-each loop at {} kept in its expanded form",
                            info.header
                        ));
                        StructuredStmt::For {
                            init,
                            condition,
                            update,
                            body,
                        }
                    }
                }
            }
            LoopKind::DoWhile => {
                let mut body = if info.latch == info.header {
                    Vec::new()
                } else {
                    self.structure_seq(info.header, &BTreeSet::from([info.latch]), Vec::new())
                };
                let condition = self.do_while_condition(&info, &mut body);
                StructuredStmt::DoWhile { body, condition }
            }
            _ => {
                let body = self.structure_seq(info.header, &BTreeSet::from([info.header]), Vec::new());
                StructuredStmt::While {
                    condition: Expr::literal(Literal::Boolean(true), None),
                    body,
                }
            }
        };
        let used = self.breakables.pop().map_or(false, |b| b.label_used);
        out.push(if used {
            StructuredStmt::Labeled {
                label,
                body: Box::new(stmt),
            }
        } else {
            stmt
        });
        info.exit
    }

    /// Statements of a block that belongs to a loop's header line.
    fn simple_block(&mut self, id: Option<BlockId>) -> Vec<StructuredStmt> {
        let cfg = self.cfg;
        let block = match id.and_then(|id| cfg.blocks.get(&id)) {
            Some(b) => b,
            None => return Vec::new(),
        };
        self.visited.insert(block.id);
        let sim = self.simulate(block, Vec::new());
        sim.statements.into_iter().map(StructuredStmt::Simple).collect()
    }

    /// The condition under which a top-tested loop keeps iterating, and the
    /// first block of its body.
    fn loop_condition(&mut self, info: &LoopInfo) -> (Expr, BlockId) {
        let cfg = self.cfg;
        self.visited.insert(info.header);
        let block = match cfg.blocks.get(&info.header) {
            Some(b) => b,
            None => return (unresolved("loop condition"), info.header),
        };
        let sim = self.simulate(block, Vec::new());
        let condition = sim.condition.unwrap_or_else(|| unresolved("loop condition"));
        match block.terminator {
            Terminator::ConditionalBranch { if_true, .. }
                if info.body.contains(&if_true) && Some(if_true) != info.exit =>
            {
                (condition, if_true)
            }
            Terminator::ConditionalBranch { if_false, .. } => (condition.negate(), if_false),
            _ => (condition, info.header),
        }
    }

    fn loop_body(&mut self, entry: BlockId, continue_target: BlockId) -> Vec<StructuredStmt> {
        self.branch(entry, &BTreeSet::from([continue_target]))
    }

    /// Simulate a do-while latch, appending its statements to `body`, and
    /// return the condition that repeats the loop.
    fn do_while_condition(&mut self, info: &LoopInfo, body: &mut Vec<StructuredStmt>) -> Expr {
        let cfg = self.cfg;
        let block = match cfg.blocks.get(&info.latch) {
            Some(b) => b,
            None => return unresolved("loop condition"),
        };
        self.visited.insert(info.latch);
        body.push(StructuredStmt::Label(block_label(info.latch)));
        let sim = self.simulate(block, Vec::new());
        body.extend(sim.statements.into_iter().map(StructuredStmt::Simple));
        let condition = sim.condition.unwrap_or_else(|| unresolved("loop condition"));
        match block.terminator {
            Terminator::ConditionalBranch { if_true, .. } if if_true == info.header => condition,
            _ => condition.negate(),
        }
    }

    /// Structure a try statement. Returns where control continues after it.
    fn structure_try(
        &mut self,
        idx: usize,
        stops: &BTreeSet<BlockId>,
        out: &mut Vec<StructuredStmt>,
    ) -> Option<BlockId> {
        self.tries_done.insert(idx);
        let region = self.regions[idx].clone();
        let handlers = region.handlers();
        let continuation = self.continuation(&region, &handlers);
        let mut inner = self.nested_stops(continuation, stops);
        inner.extend(handlers.iter().copied());

        let mut try_body = self.structure_seq(region.start, &inner, Vec::new());
        let mut catches = Vec::new();
        for (pc, types) in &region.catches {
            if self.visited.contains(pc) {
                continue;
            }
            let caught = match types.as_slice() {
                [single] => Some(single.clone()),
                _ => None,
            };
            let entry = Expr::new(ExprKind::CaughtException(caught), None);
            let mut body = self.structure_seq(*pc, &inner, vec![entry]);
            let var = take_catch_var(&mut body);
            catches.push(CatchClause {
                exception_types: types.clone(),
                var,
                body,
            });
        }

        let mut finally_body = None;
        if let Some(pc) = region.finally.filter(|pc| !self.visited.contains(pc)) {
            let entry = Expr::new(ExprKind::CaughtException(None), None);
            let mut body = self.structure_seq(pc, &inner, vec![entry]);
            match extract_finally(&body) {
                Some(code) => finally_body = Some(code),
                None => {
                    let var = take_catch_var(&mut body);
                    catches.push(CatchClause {
                        exception_types: Vec::new(),
                        var,
                        body,
                    });
                }
            }
        }

        if let Some(code) = finally_body.as_ref().filter(|c| !c.is_empty()) {
            if self.strip_finally_copies {
                let pattern = normalized(code);
                strip_finally_copies(&mut try_body, &pattern, true);
                for catch in &mut catches {
                    strip_finally_copies(&mut catch.body, &pattern, true);
                }
                if catches.is_empty() && is_monitor_exit_only(code) {
                    if let Some(object) = take_monitor_enter(out) {
                        out.push(StructuredStmt::Synchronized {
                            object,
                            body: try_body,
                        });
                        return continuation;
                    }
                }
            }
        }
        out.push(StructuredStmt::TryCatch {
            try_body,
            catches,
            finally_body,
        });
        continuation
    }

    /// Where control goes when the protected code completes normally: the
    /// first target past the handlers, or the single exit of the try body.
    fn continuation(&self, region: &TryRegion, handlers: &BTreeSet<BlockId>) -> Option<BlockId> {
        let first_handler = *handlers.iter().next()?;
        if first_handler <= region.start {
            return None;
        }
        let exits: BTreeSet<BlockId> = self
            .cfg
            .blocks
            .range(region.start..first_handler)
            .flat_map(|(&b, _)| self.cfg.successors(b))
            .filter(|s| !(region.start..first_handler).contains(s) && !handlers.contains(s))
            .collect();
        if let Some(&after) = exits.iter().find(|&&s| s >= first_handler) {
            return Some(after);
        }
        match exits.len() {
            1 => exits.into_iter().next(),
            _ => None,
        }
    }
}

fn loop_label(header: BlockId) -> String {
    format!("loop{}", header)
}

fn is_label(stmt: &StructuredStmt) -> bool {
    matches!(stmt, StructuredStmt::Label(_))
}

/// `c ? 1 : 0` is `c` and `c ? 0 : 1` is `!c`.
fn make_ternary(condition: Expr, then_value: Expr, else_value: Expr) -> Expr {
    match (then_value.int_value(), else_value.int_value()) {
        (Some(1), Some(0)) => condition,
        (Some(0), Some(1)) => condition.negate(),
        _ => {
            let line = condition.line;
            Expr::new(
                ExprKind::Ternary {
                    condition: condition.boxed(),
                    then_expr: then_value.boxed(),
                    else_expr: else_value.boxed(),
                },
                line,
            )
        }
    }
}

fn caught_exception_store(stmt: &StructuredStmt) -> Option<&LocalRef> {
    match stmt {
        StructuredStmt::Simple(simple) => match simple.as_assign()? {
            (target, value) if matches!(value.kind, ExprKind::CaughtException(_)) => {
                target.as_local()
            }
            _ => None,
        },
        _ => None,
    }
}

/// Remove the leading store of the caught exception and return its local.
fn take_catch_var(body: &mut Vec<StructuredStmt>) -> Option<LocalRef> {
    let idx = body.iter().position(|s| !is_label(s))?;
    let local = caught_exception_store(&body[idx])?.clone();
    body.remove(idx);
    Some(local)
}

/// The code between `t = <exception>` and `throw t` of a finally handler.
fn extract_finally(body: &[StructuredStmt]) -> Option<Vec<StructuredStmt>> {
    let code: Vec<&StructuredStmt> = body.iter().filter(|s| !is_label(s)).collect();
    let (first, rest) = code.split_first()?;
    let (last, middle) = rest.split_last()?;
    let slot = caught_exception_store(first)?.slot;
    match last {
        StructuredStmt::Simple(Stmt {
            kind: StmtKind::Throw(thrown),
            ..
        }) if thrown.is_local_slot(slot) => {}
        _ => return None,
    }
    Some(middle.iter().map(|s| (*s).clone()).collect())
}

/// A copy of `stmts` without labels, source positions or variable
/// bindings, for comparing duplicated code.
fn normalized(stmts: &[StructuredStmt]) -> Vec<StructuredStmt> {
    let mut copy = stmts.to_vec();
    drop_labels(&mut copy);
    walk_body_mut(&mut PositionEraser, &mut copy);
    copy
}

fn drop_labels(stmts: &mut Vec<StructuredStmt>) {
    stmts.retain(|s| !is_label(s));
    for stmt in stmts.iter_mut() {
        for list in stmt.child_lists_mut() {
            drop_labels(list);
        }
    }
}

fn retain_used_labels(stmts: &mut Vec<StructuredStmt>, used: &BTreeSet<String>) {
    stmts.retain(|s| match s {
        StructuredStmt::Label(label) => used.contains(label),
        _ => true,
    });
    for stmt in stmts.iter_mut() {
        for list in stmt.child_lists_mut() {
            retain_used_labels(list, used);
        }
    }
}

fn exits_try(stmt: &StructuredStmt) -> bool {
    matches!(
        stmt,
        StructuredStmt::Break(_)
            | StructuredStmt::Continue(_)
            | StructuredStmt::Simple(Stmt {
                kind: StmtKind::Return(_),
                ..
            })
    )
}

/// Remove the compiler's inlined copies of `pattern` (already normalized)
/// from the end of `body` and from in front of every `return`, `break` and
/// `continue` in it.
fn strip_finally_copies(body: &mut Vec<StructuredStmt>, pattern: &[StructuredStmt], at_tail: bool) {
    let n = pattern.len();
    let matches_at = |body: &[StructuredStmt], idx: &[usize]| {
        let candidate: Vec<StructuredStmt> = idx.iter().map(|&i| body[i].clone()).collect();
        normalized(&candidate) == pattern
    };
    let mut code: Vec<usize> = (0..body.len()).filter(|&i| !is_label(&body[i])).collect();
    if at_tail && code.len() >= n {
        let ends_in_jump = code.last().map_or(false, |&i| body[i].is_jump());
        let tail = &code[code.len() - n..];
        if !ends_in_jump && matches_at(body, tail) {
            for &i in tail.iter().rev() {
                body.remove(i);
            }
            code.truncate(code.len() - n);
        }
    }
    let mut pos = code.len();
    while pos > 0 {
        pos -= 1;
        if pos >= n && exits_try(&body[code[pos]]) && matches_at(body, &code[pos - n..pos]) {
            for &i in code[pos - n..pos].iter().rev() {
                body.remove(i);
            }
            pos -= n;
        }
    }
    for stmt in body.iter_mut() {
        for list in stmt.child_lists_mut() {
            strip_finally_copies(list, pattern, false);
        }
    }
}

fn is_monitor_exit_only(code: &[StructuredStmt]) -> bool {
    let code: Vec<&StructuredStmt> = code.iter().filter(|s| !is_label(s)).collect();
    matches!(
        code.as_slice(),
        [StructuredStmt::Simple(Stmt {
            kind: StmtKind::MonitorExit(_),
            ..
        })]
    )
}

/// Remove the `monitorenter` just before a synchronized region and return
/// the locked object.
fn take_monitor_enter(out: &mut Vec<StructuredStmt>) -> Option<Expr> {
    let idx = out.iter().rposition(|s| !is_label(s))?;
    let object = match &out[idx] {
        StructuredStmt::Simple(Stmt {
            kind: StmtKind::MonitorEnter(object),
            ..
        }) => object.clone(),
        _ => return None,
    };
    out.remove(idx);
    Some(match object.kind {
        ExprKind::Assign { value, .. } => *value,
        _ => object,
    })
}

/// The element variable and the iterated expression of a for-each loop,
/// removing the element fetch from the front of `body`.
fn for_each_parts(
    form: &ForEachForm,
    init: &[StructuredStmt],
    body: &mut Vec<StructuredStmt>,
) -> Option<(LocalRef, Expr)> {
    let first_init = init.iter().find_map(|s| match s {
        StructuredStmt::Simple(stmt) => stmt.as_assign(),
        _ => None,
    })?;
    let iterable = match form {
        ForEachForm::Iterator => match &first_init.1.kind {
            ExprKind::Invoke {
                object: Some(object),
                name,
                ..
            } if name == "iterator" => (**object).clone(),
            _ => return None,
        },
        ForEachForm::Array => first_init.1.clone(),
    };
    let idx = body.iter().position(|s| !is_label(s))?;
    let var = match &body[idx] {
        StructuredStmt::Simple(stmt) => {
            let (target, value) = stmt.as_assign()?;
            let fetch = match &value.kind {
                ExprKind::Cast { operand, .. } => operand.as_ref(),
                _ => value,
            };
            let fetches = match (form, &fetch.kind) {
                (ForEachForm::Iterator, ExprKind::Invoke { name, .. }) => name == "next",
                (ForEachForm::Array, ExprKind::ArrayLoad { .. }) => true,
                _ => false,
            };
            if !fetches {
                return None;
            }
            target.as_local()?.clone()
        }
        _ => return None,
    };
    body.remove(idx);
    Some((var, iterable))
}
