use std::collections::BTreeSet;

use tracing::debug;

use crate::code_attribute::InstructionKind;

use super::cfg_types::*;

/// Fold compiler-generated jumps and classify the ones that remain.
///
/// Jumps through goto-only blocks are threaded, jumps to a lone `return`
/// become that return when `inline_returns` is set, jumps to the next block
/// become fallthroughs, and unreachable blocks are dropped. Every remaining
/// `goto` is then classified in [`ControlFlowGraph::jump_classes`], inner
/// loops first. Running the reducer on its own output changes nothing.
pub fn reduce_gotos(cfg: &mut ControlFlowGraph, inline_returns: bool) {
    thread_jumps(cfg);
    if inline_returns {
        inline_return_targets(cfg);
    }
    remove_jumps_to_next(cfg);
    remove_unreachable(cfg);
    classify_jumps(cfg);
    debug!(
        blocks = cfg.blocks.len(),
        jumps = cfg.jump_classes.len(),
        "reduced gotos"
    );
}

/// Final destination of a jump to `target`, skipping goto-only blocks.
fn resolve_target(cfg: &ControlFlowGraph, target: BlockId, boundaries: &BTreeSet<BlockId>) -> BlockId {
    let mut current = target;
    let mut seen = BTreeSet::new();
    while seen.insert(current) {
        if boundaries.contains(&current) {
            break;
        }
        let block = match cfg.blocks.get(&current) {
            Some(b) if b.is_goto_only() => b,
            _ => break,
        };
        match block.terminator {
            Terminator::Goto { target } | Terminator::FallThrough { target } => {
                if target == current || seen.contains(&target) {
                    break;
                }
                current = target;
            }
            _ => break,
        }
    }
    current
}

fn thread_jumps(cfg: &mut ControlFlowGraph) {
    let boundaries = cfg.try_boundaries();
    let ids: Vec<BlockId> = cfg.blocks.keys().copied().collect();
    for id in ids {
        let terminator = match cfg.blocks.get(&id) {
            Some(b) => b.terminator.clone(),
            None => continue,
        };
        match terminator {
            Terminator::Goto { target } => {
                let resolved = resolve_target(cfg, target, &boundaries);
                if resolved != target && resolved != id {
                    retarget(cfg, id, Terminator::Goto { target: resolved });
                }
            }
            Terminator::ConditionalBranch {
                condition,
                if_true,
                if_false,
            } => {
                let resolved = resolve_target(cfg, if_true, &boundaries);
                if resolved != if_true {
                    retarget(
                        cfg,
                        id,
                        Terminator::ConditionalBranch {
                            condition,
                            if_true: resolved,
                            if_false,
                        },
                    );
                }
            }
            _ => {}
        }
    }
}

/// Replace a block's terminator and keep its branch instruction in step.
fn retarget(cfg: &mut ControlFlowGraph, id: BlockId, terminator: Terminator) {
    let block = match cfg.blocks.get_mut(&id) {
        Some(b) => b,
        None => return,
    };
    let new_target = match &terminator {
        Terminator::Goto { target } => Some(*target),
        Terminator::ConditionalBranch { if_true, .. } => Some(*if_true),
        _ => None,
    };
    if let (Some(new_target), Some(last)) = (new_target, block.instructions.last_mut()) {
        match &mut last.kind {
            InstructionKind::Goto(target)
            | InstructionKind::IfZero { target, .. }
            | InstructionKind::IfCompare { target, .. }
            | InstructionKind::IfNull { target, .. } => *target = new_target,
            _ => {}
        }
    }
    block.terminator = terminator;
}

fn inline_return_targets(cfg: &mut ControlFlowGraph) {
    let boundaries = cfg.try_boundaries();
    let ids: Vec<BlockId> = cfg.blocks.keys().copied().collect();
    for id in ids {
        let target = match cfg.blocks.get(&id).map(|b| &b.terminator) {
            Some(Terminator::Goto { target }) => *target,
            _ => continue,
        };
        if boundaries.contains(&target) || keeps_join(cfg, id, target) {
            continue;
        }
        let return_kind = match cfg.blocks.get(&target).map(|b| b.instructions.as_slice()) {
            Some([only]) if matches!(only.kind, InstructionKind::Return(_)) => only.kind.clone(),
            _ => continue,
        };
        if let Some(block) = cfg.blocks.get_mut(&id) {
            if let Some(last) = block.instructions.last_mut() {
                if matches!(last.kind, InstructionKind::Goto(_)) {
                    last.kind = return_kind;
                    block.terminator = Terminator::Return;
                }
            }
        }
    }
}

/// A jump whose join the structurer still needs: the arm of a conditional
/// value (a lone push before the goto), or the exit of a try statement
/// jumping over its handlers.
fn keeps_join(cfg: &ControlFlowGraph, id: BlockId, target: BlockId) -> bool {
    let block = match cfg.blocks.get(&id) {
        Some(b) => b,
        None => return false,
    };
    let lone_value = matches!(
        block.body(),
        [only] if matches!(
            only.kind,
            InstructionKind::Push { .. }
                | InstructionKind::Load { .. }
                | InstructionKind::AconstNull
                | InstructionKind::Ldc(_)
                | InstructionKind::LongConst(_)
                | InstructionKind::FloatConst(_)
                | InstructionKind::DoubleConst(_)
        )
    );
    let skips_handler = cfg
        .catch_blocks
        .iter()
        .any(|c| c.handler_pc > id && c.handler_pc < target);
    lone_value || skips_handler
}

fn remove_jumps_to_next(cfg: &mut ControlFlowGraph) {
    loop {
        let mut changed = false;
        let ids: Vec<BlockId> = cfg.blocks.keys().copied().collect();
        for id in ids {
            let next = cfg.next_block(id);
            if let Some(block) = cfg.blocks.get_mut(&id) {
                if let Terminator::Goto { target } = block.terminator {
                    if Some(target) == next {
                        if matches!(
                            block.instructions.last().map(|i| &i.kind),
                            Some(InstructionKind::Goto(_))
                        ) {
                            block.instructions.pop();
                        }
                        block.terminator = Terminator::FallThrough { target };
                        changed = true;
                    }
                }
            }
        }
        changed |= collapse_empty_blocks(cfg);
        if !changed {
            break;
        }
    }
}

/// Remove blocks left without instructions, sending their predecessors
/// straight to the successor.
fn collapse_empty_blocks(cfg: &mut ControlFlowGraph) -> bool {
    let boundaries = cfg.try_boundaries();
    let empties: Vec<(BlockId, BlockId)> = cfg
        .blocks
        .values()
        .filter(|b| b.instructions.is_empty() && b.id != cfg.entry && !boundaries.contains(&b.id))
        .filter_map(|b| match b.terminator {
            Terminator::FallThrough { target } if target != b.id => Some((b.id, target)),
            _ => None,
        })
        .collect();
    let changed = !empties.is_empty();
    for (empty, target) in empties {
        for pred in cfg.predecessors(empty) {
            if let Some(block) = cfg.blocks.get_mut(&pred) {
                redirect(block, empty, target);
            }
        }
        cfg.blocks.remove(&empty);
    }
    changed
}

/// Point every edge of `block` that goes to `from` at `to` instead.
fn redirect(block: &mut BasicBlock, from: BlockId, to: BlockId) {
    let swap = |t: &mut BlockId| {
        if *t == from {
            *t = to;
        }
    };
    match &mut block.terminator {
        Terminator::FallThrough { target } | Terminator::Goto { target } => swap(target),
        Terminator::ConditionalBranch {
            if_true, if_false, ..
        } => {
            swap(if_true);
            swap(if_false);
        }
        Terminator::Switch { default, cases } => {
            swap(default);
            cases.iter_mut().for_each(|(_, t)| swap(t));
        }
        Terminator::Jsr {
            target,
            return_addr,
        } => {
            swap(target);
            swap(return_addr);
        }
        Terminator::Return | Terminator::Throw | Terminator::Ret => {}
    }
    if let Some(last) = block.instructions.last_mut() {
        match &mut last.kind {
            InstructionKind::Goto(target)
            | InstructionKind::Jsr(target)
            | InstructionKind::IfZero { target, .. }
            | InstructionKind::IfCompare { target, .. }
            | InstructionKind::IfNull { target, .. } => swap(target),
            InstructionKind::Switch { default, cases } => {
                swap(default);
                cases.iter_mut().for_each(|(_, t)| swap(t));
            }
            _ => {}
        }
    }
}

fn remove_unreachable(cfg: &mut ControlFlowGraph) {
    let reachable: BTreeSet<BlockId> = cfg.reverse_postorder().into_iter().collect();
    let before = cfg.blocks.len();
    cfg.blocks.retain(|id, _| reachable.contains(id));
    if cfg.blocks.len() != before {
        debug!(removed = before - cfg.blocks.len(), "dropped unreachable blocks");
    }
}

fn classify_jumps(cfg: &mut ControlFlowGraph) {
    let loops = cfg.natural_loops();
    let classes: Vec<(BlockId, JumpClass)> = cfg
        .blocks
        .values()
        .filter_map(|block| match block.terminator {
            Terminator::Goto { target } => {
                Some((block.id, classify_jump(cfg, &loops, block.id, target)))
            }
            _ => None,
        })
        .collect();
    cfg.jump_classes = classes.into_iter().collect();
}

/// A goto-only block outside `lp` entered only from inside it: the
/// landing pad javac emits for `break`.
fn is_exit_stub(cfg: &ControlFlowGraph, lp: &NaturalLoop, block: BlockId) -> bool {
    if lp.body.contains(&block) || !cfg.blocks.get(&block).map_or(false, |b| b.is_goto_only()) {
        return false;
    }
    let preds = cfg.predecessors(block);
    !preds.is_empty() && preds.iter().all(|p| lp.body.contains(p))
}

/// Classify the jump `from -> to` against the loops containing `from`,
/// innermost first.
pub(crate) fn classify_jump(
    cfg: &ControlFlowGraph,
    loops: &[NaturalLoop],
    from: BlockId,
    to: BlockId,
) -> JumpClass {
    let enclosing: Vec<&NaturalLoop> = loops
        .iter()
        .filter(|l| l.body.contains(&from) || is_exit_stub(cfg, l, from))
        .collect();
    for (depth, lp) in enclosing.iter().enumerate() {
        if to == lp.header {
            if depth == 0 && lp.latches.last() == Some(&from) {
                return JumpClass::BackEdge { header: lp.header };
            }
            return JumpClass::Continue {
                header: lp.header,
                labeled: depth > 0,
            };
        }
        if lp.body.contains(&to) {
            return if to > from {
                JumpClass::Forward
            } else {
                JumpClass::Residual
            };
        }
        match enclosing.get(depth + 1) {
            Some(outer) if outer.header == to || !outer.body.contains(&to) => continue,
            _ => {
                return JumpClass::Break {
                    header: lp.header,
                    labeled: depth > 0,
                }
            }
        }
    }
    if to > from {
        JumpClass::Forward
    } else {
        JumpClass::Residual
    }
}

/// Blocks outside the loop reached directly from inside it.
pub(crate) fn loop_exits(cfg: &ControlFlowGraph, lp: &NaturalLoop) -> BTreeSet<BlockId> {
    lp.body
        .iter()
        .flat_map(|&b| cfg.successors(b))
        .filter(|s| !lp.body.contains(s))
        .collect()
}
