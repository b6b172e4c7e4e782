use std::collections::BTreeSet;

use tracing::{debug, trace};

use crate::code_attribute::{ArithOp, Instruction, InstructionKind, OperandType};
use crate::constant_info::ConstantPool;

use super::cfg_types::*;
use super::goto_reducer::loop_exits;
use super::util::{expression_start, is_pure_condition};

/// Recognise loops and record them in [`ControlFlowGraph::loops`].
///
/// Each natural loop is classified, most specific shape first: for-each
/// over an iterator or an array, `for`, `while`, `do`/`while`, endless.
/// Retreating edges into a block that does not dominate their source are
/// recorded as unstructured loops. Initializer and update code is split
/// into blocks of its own; the analysis restarts after every split.
pub fn reduce_loops(cfg: &mut ControlFlowGraph, pool: &ConstantPool) {
    'restart: loop {
        let natural = cfg.natural_loops();
        let mut loops = Vec::with_capacity(natural.len());
        for lp in &natural {
            match classify(cfg, lp, pool) {
                Classified::Done(info) => loops.push(info),
                Classified::Split { block, at } => {
                    trace!(block, at, "splitting loop block");
                    if cfg.split_block(block, at) {
                        continue 'restart;
                    }
                    loops.push(fallback(cfg, lp));
                }
            }
        }
        for (from, to) in cfg.irreducible_edges() {
            if loops.iter().any(|l| l.header == to) {
                continue;
            }
            loops.push(LoopInfo {
                header: to,
                kind: LoopKind::Unstructured,
                body: BTreeSet::from([to, from]),
                exit: None,
                latch: from,
                init: None,
                update: None,
            });
        }
        refine_jump_classes(cfg, &loops);
        debug!(loops = loops.len(), "reduced loops");
        cfg.loops = loops;
        return;
    }
}

enum Classified {
    Done(LoopInfo),
    /// `block` must be split at `at` before the loop can be classified.
    Split { block: BlockId, at: u32 },
}

fn classify(cfg: &ControlFlowGraph, lp: &NaturalLoop, pool: &ConstantPool) -> Classified {
    let latch = lp.latches.last().copied().unwrap_or(lp.header);
    let exit = loop_exit(cfg, lp);
    let base = LoopInfo {
        header: lp.header,
        kind: LoopKind::Endless,
        body: lp.body.clone(),
        exit,
        latch,
        init: None,
        update: None,
    };
    let header_is_test = latch != lp.header && header_condition(cfg, lp, pool);

    if header_is_test {
        if let Some(result) = match_iterator_foreach(cfg, lp, &base, pool) {
            return result;
        }
        if let Some(result) = match_array_foreach(cfg, lp, &base, pool) {
            return result;
        }
        if let Some(result) = match_for(cfg, lp, &base, pool) {
            return result;
        }
        return Classified::Done(LoopInfo {
            kind: LoopKind::While,
            ..base
        });
    }
    if latch_condition(cfg, lp) {
        return Classified::Done(LoopInfo {
            kind: LoopKind::DoWhile,
            ..base
        });
    }
    Classified::Done(base)
}

fn fallback(cfg: &ControlFlowGraph, lp: &NaturalLoop) -> LoopInfo {
    LoopInfo {
        header: lp.header,
        kind: LoopKind::Endless,
        body: lp.body.clone(),
        exit: loop_exit(cfg, lp),
        latch: lp.latches.last().copied().unwrap_or(lp.header),
        init: None,
        update: None,
    }
}

/// The loop's follow block: the exit reached from the header or latch
/// condition when there is one, else the lowest exit offset.
fn loop_exit(cfg: &ControlFlowGraph, lp: &NaturalLoop) -> Option<BlockId> {
    let conditional_exit = |b: BlockId| match cfg.blocks.get(&b).map(|b| &b.terminator) {
        Some(Terminator::ConditionalBranch {
            if_true, if_false, ..
        }) => [*if_true, *if_false]
            .into_iter()
            .find(|t| !lp.body.contains(t)),
        _ => None,
    };
    let latch = lp.latches.last().copied().unwrap_or(lp.header);
    conditional_exit(lp.header)
        .or_else(|| conditional_exit(latch))
        .or_else(|| loop_exits(cfg, lp).into_iter().find(|&b| b > lp.header))
        .or_else(|| loop_exits(cfg, lp).into_iter().next())
}

/// Header evaluates nothing but the loop condition and one branch leaves
/// the loop.
fn header_condition(cfg: &ControlFlowGraph, lp: &NaturalLoop, pool: &ConstantPool) -> bool {
    let header = match cfg.blocks.get(&lp.header) {
        Some(b) => b,
        None => return false,
    };
    match header.terminator {
        Terminator::ConditionalBranch {
            if_true, if_false, ..
        } => {
            lp.body.contains(&if_true) != lp.body.contains(&if_false)
                && is_pure_condition(&header.instructions, pool)
        }
        _ => false,
    }
}

/// Latch ends with a conditional branch back to the header.
fn latch_condition(cfg: &ControlFlowGraph, lp: &NaturalLoop) -> bool {
    let latch = lp.latches.last().copied().unwrap_or(lp.header);
    match cfg.blocks.get(&latch).map(|b| &b.terminator) {
        Some(Terminator::ConditionalBranch {
            if_true, if_false, ..
        }) => {
            (*if_true == lp.header && !lp.body.contains(if_false))
                || (*if_false == lp.header && !lp.body.contains(if_true))
        }
        _ => false,
    }
}

/// The unique block outside the loop that enters the header.
fn preheader(cfg: &ControlFlowGraph, lp: &NaturalLoop) -> Option<BlockId> {
    let outside: Vec<BlockId> = cfg
        .predecessors(lp.header)
        .into_iter()
        .filter(|p| !lp.body.contains(p))
        .collect();
    match outside.as_slice() {
        [single] => Some(*single),
        _ => None,
    }
}

/// First body block on the path taken when the header test passes.
fn body_entry(cfg: &ControlFlowGraph, lp: &NaturalLoop) -> Option<BlockId> {
    match cfg.blocks.get(&lp.header)?.terminator {
        Terminator::ConditionalBranch {
            if_true, if_false, ..
        } => [if_false, if_true]
            .into_iter()
            .find(|t| lp.body.contains(t)),
        _ => None,
    }
}

/// If the preheader ends with a store whose value is computed inside it,
/// the offset at which that initializer starts.
fn init_split(
    cfg: &ControlFlowGraph,
    pre: BlockId,
    slot_matches: impl Fn(u16) -> bool,
    pool: &ConstantPool,
) -> Option<(u16, u32)> {
    let block = cfg.blocks.get(&pre)?;
    let body = block.body();
    let store_idx = body.len().checked_sub(1)?;
    let slot = match body[store_idx].kind {
        InstructionKind::Store { slot, .. } if slot_matches(slot) => slot,
        _ => return None,
    };
    let start = expression_start(body, store_idx, pool)?;
    Some((slot, body[start].offset))
}

fn match_for(
    cfg: &ControlFlowGraph,
    lp: &NaturalLoop,
    base: &LoopInfo,
    pool: &ConstantPool,
) -> Option<Classified> {
    let header = cfg.blocks.get(&lp.header)?;
    let latch = cfg.blocks.get(&base.latch)?;
    if !matches!(
        latch.terminator,
        Terminator::Goto { .. } | Terminator::FallThrough { .. }
    ) {
        return None;
    }
    let read_slots: BTreeSet<u16> = header
        .instructions
        .iter()
        .filter_map(|i| match i.kind {
            InstructionKind::Load { slot, .. } => Some(slot),
            _ => None,
        })
        .collect();

    // Update: trailing `iinc s` or `s = s op k` on the latch.
    let latch_body = latch.body();
    let (update_slot, update_start) = match latch_body {
        [.., Instruction {
            kind: InstructionKind::Iinc { slot, .. },
            ..
        }] => (*slot, latch_body.len() - 1),
        [.., load, push, arith, store] => match (&load.kind, &push.kind, &arith.kind, &store.kind) {
            (
                InstructionKind::Load { slot: a, .. },
                InstructionKind::Push { .. } | InstructionKind::LongConst(_) | InstructionKind::Ldc(_),
                InstructionKind::Arith {
                    op: ArithOp::Add | ArithOp::Sub | ArithOp::Mul | ArithOp::Shl | ArithOp::Shr,
                    ..
                },
                InstructionKind::Store { slot: b, .. },
            ) if a == b => (*a, latch_body.len() - 4),
            _ => return None,
        },
        _ => return None,
    };
    if !read_slots.contains(&update_slot) {
        return None;
    }
    let pre = preheader(cfg, lp)?;
    let (_, init_offset) = init_split(cfg, pre, |s| s == update_slot, pool)?;
    let update_offset = latch_body[update_start].offset;

    if init_offset != pre {
        return Some(Classified::Split {
            block: pre,
            at: init_offset,
        });
    }
    if update_offset != base.latch {
        return Some(Classified::Split {
            block: base.latch,
            at: update_offset,
        });
    }
    // The initializer block must fall straight into the header.
    if cfg.successors(pre) != vec![lp.header] {
        return None;
    }
    Some(Classified::Done(LoopInfo {
        kind: LoopKind::For,
        init: Some(pre),
        update: Some(base.latch),
        ..base.clone()
    }))
}

/// `for (T x : iterable)`:
///
/// ```text
/// pre:    ... invoke iterator(); astore it
/// header: aload it; invokeinterface hasNext()Z; ifeq exit
/// body:   aload it; invokeinterface next(); [checkcast]; store x; ...
/// ```
fn match_iterator_foreach(
    cfg: &ControlFlowGraph,
    lp: &NaturalLoop,
    base: &LoopInfo,
    pool: &ConstantPool,
) -> Option<Classified> {
    let header = cfg.blocks.get(&lp.header)?;
    let it_slot = match header.instructions.as_slice() {
        [load, call, _branch] => match (&load.kind, &call.kind) {
            (
                InstructionKind::Load {
                    ty: OperandType::Reference,
                    slot,
                },
                InstructionKind::Invoke { index, .. },
            ) if is_method(pool, *index, "hasNext", "()Z") => *slot,
            _ => return None,
        },
        _ => return None,
    };
    let entry = cfg.blocks.get(&body_entry(cfg, lp)?)?;
    let mut prefix = entry.instructions.iter();
    match (prefix.next().map(|i| &i.kind), prefix.next().map(|i| &i.kind)) {
        (
            Some(InstructionKind::Load { slot, .. }),
            Some(InstructionKind::Invoke { index, .. }),
        ) if *slot == it_slot && is_method(pool, *index, "next", "()Ljava/lang/Object;") => {}
        _ => return None,
    }
    let element_store = prefix.find(|i| !matches!(i.kind, InstructionKind::CheckCast(_)))?;
    if !matches!(element_store.kind, InstructionKind::Store { .. }) {
        return None;
    }

    let pre = preheader(cfg, lp)?;
    let pre_block = cfg.blocks.get(&pre)?;
    let pre_body = pre_block.body();
    match pre_body {
        [.., call, store] => match (&call.kind, &store.kind) {
            (
                InstructionKind::Invoke { index, .. },
                InstructionKind::Store { slot, .. },
            ) if *slot == it_slot && is_method_named(pool, *index, "iterator") => {}
            _ => return None,
        },
        _ => return None,
    }
    let (_, init_offset) = init_split(cfg, pre, |s| s == it_slot, pool)?;
    if init_offset != pre {
        return Some(Classified::Split {
            block: pre,
            at: init_offset,
        });
    }
    if cfg.successors(pre) != vec![lp.header] {
        return None;
    }
    Some(Classified::Done(LoopInfo {
        kind: LoopKind::ForEach(ForEachForm::Iterator),
        init: Some(pre),
        ..base.clone()
    }))
}

/// `for (T x : array)`:
///
/// ```text
/// pre:    <array>; astore a; aload a; arraylength; istore n; iconst_0; istore i
/// header: iload i; iload n; if_icmpge exit
/// body:   aload a; iload i; xaload; store x; ...
/// latch:  ...; iinc i 1
/// ```
fn match_array_foreach(
    cfg: &ControlFlowGraph,
    lp: &NaturalLoop,
    base: &LoopInfo,
    pool: &ConstantPool,
) -> Option<Classified> {
    let header = cfg.blocks.get(&lp.header)?;
    let (i_slot, n_slot) = match header.instructions.as_slice() {
        [a, b, branch] => match (&a.kind, &b.kind, &branch.kind) {
            (
                InstructionKind::Load { ty: OperandType::Int, slot: i },
                InstructionKind::Load { ty: OperandType::Int, slot: n },
                InstructionKind::IfCompare { reference: false, .. },
            ) => (*i, *n),
            _ => return None,
        },
        _ => return None,
    };
    let entry = cfg.blocks.get(&body_entry(cfg, lp)?)?;
    let array_slot = match entry.instructions.as_slice() {
        [a, i, load, store, ..] => match (&a.kind, &i.kind, &load.kind, &store.kind) {
            (
                InstructionKind::Load { ty: OperandType::Reference, slot: a },
                InstructionKind::Load { slot: i, .. },
                InstructionKind::ArrayLoad(_),
                InstructionKind::Store { .. },
            ) if *i == i_slot => *a,
            _ => return None,
        },
        _ => return None,
    };
    let latch = cfg.blocks.get(&base.latch)?;
    let latch_body = latch.body();
    let update_offset = match latch_body.last() {
        Some(last) if matches!(last.kind, InstructionKind::Iinc { slot, delta: 1 } if slot == i_slot) => {
            last.offset
        }
        _ => return None,
    };

    let pre = preheader(cfg, lp)?;
    let pre_block = cfg.blocks.get(&pre)?;
    let pre_body = pre_block.body();
    // Hidden locals: array copy, length and index, stored in that order.
    if pre_body.len() < 7 {
        return None;
    }
    let tail = &pre_body[pre_body.len() - 6..];
    let shape_ok = matches!(
        (&tail[0].kind, &tail[1].kind, &tail[2].kind, &tail[3].kind, &tail[4].kind, &tail[5].kind),
        (
            InstructionKind::Store { ty: OperandType::Reference, slot: a1 },
            InstructionKind::Load { ty: OperandType::Reference, slot: a2 },
            InstructionKind::ArrayLength,
            InstructionKind::Store { ty: OperandType::Int, slot: n },
            InstructionKind::Push { value: 0, .. },
            InstructionKind::Store { ty: OperandType::Int, slot: i },
        ) if *a1 == array_slot && *a2 == array_slot && *n == n_slot && *i == i_slot
    );
    if !shape_ok {
        return None;
    }
    // The initializer starts where the array expression does.
    let store_idx = pre_body.len() - 6;
    let start = expression_start(pre_body, store_idx, pool)?;
    let init_offset = pre_body[start].offset;
    if init_offset != pre {
        return Some(Classified::Split {
            block: pre,
            at: init_offset,
        });
    }
    if update_offset != base.latch {
        return Some(Classified::Split {
            block: base.latch,
            at: update_offset,
        });
    }
    if cfg.successors(pre) != vec![lp.header] {
        return None;
    }
    Some(Classified::Done(LoopInfo {
        kind: LoopKind::ForEach(ForEachForm::Array),
        init: Some(pre),
        update: Some(base.latch),
        ..base.clone()
    }))
}

fn is_method(pool: &ConstantPool, index: u16, name: &str, descriptor: &str) -> bool {
    pool.member_ref(index)
        .map_or(false, |m| m.name == name && m.descriptor == descriptor)
}

fn is_method_named(pool: &ConstantPool, index: u16, name: &str) -> bool {
    pool.member_ref(index).map_or(false, |m| m.name == name)
}

/// Jumps to a loop's continue target or exit become `continue`/`break`
/// once the loop's shape is known.
fn refine_jump_classes(cfg: &mut ControlFlowGraph, loops: &[LoopInfo]) {
    let ids: Vec<BlockId> = cfg.jump_classes.keys().copied().collect();
    for id in ids {
        let target = match cfg.blocks.get(&id).map(|b| &b.terminator) {
            Some(Terminator::Goto { target }) => *target,
            _ => continue,
        };
        let mut enclosing = loops.iter().filter(|l| l.body.contains(&id)).collect::<Vec<_>>();
        enclosing.sort_by_key(|l| l.body.len());
        for (depth, lp) in enclosing.iter().enumerate() {
            if lp.update == Some(target) && id != lp.latch && lp.update != Some(id) {
                cfg.jump_classes.insert(
                    id,
                    JumpClass::Continue {
                        header: lp.header,
                        labeled: depth > 0,
                    },
                );
                break;
            }
            if lp.exit == Some(target) {
                cfg.jump_classes.insert(
                    id,
                    JumpClass::Break {
                        header: lp.header,
                        labeled: depth > 0,
                    },
                );
                break;
            }
        }
    }
}
