use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::code_attribute::{DecodedMethod, Instruction, InstructionKind};

use super::cfg_types::*;

/// Build a control flow graph from a decoded method body.
///
/// Block leaders are offset 0, every branch and switch target, the
/// instruction following any block-ending instruction, every handler and
/// both ends of every protected range.
pub fn build_cfg(method: &DecodedMethod) -> ControlFlowGraph {
    let mut cfg = ControlFlowGraph {
        blocks: BTreeMap::new(),
        entry: 0,
        catch_blocks: method.catch_blocks.clone(),
        jump_classes: BTreeMap::new(),
        loops: Vec::new(),
    };
    if method.instructions.is_empty() {
        return cfg;
    }

    let mut leaders = BTreeSet::new();
    leaders.insert(0u32);
    for catch in &method.catch_blocks {
        leaders.insert(catch.handler_pc);
        leaders.insert(catch.start_pc);
        leaders.insert(catch.end_pc);
    }
    for instr in &method.instructions {
        leaders.extend(instr.kind.branch_targets());
        if instr.kind.ends_block() {
            leaders.insert(instr.next_offset());
        }
    }
    // Only offsets that start an instruction can start a block.
    leaders.retain(|l| method.instruction_at(*l).is_some());

    let mut current: Vec<Instruction> = Vec::new();
    for instr in &method.instructions {
        if leaders.contains(&instr.offset) && !current.is_empty() {
            push_block(&mut cfg, std::mem::take(&mut current));
        }
        current.push(instr.clone());
    }
    if !current.is_empty() {
        push_block(&mut cfg, current);
    }
    trace!(blocks = cfg.blocks.len(), "built control flow graph");
    cfg
}

fn push_block(cfg: &mut ControlFlowGraph, instructions: Vec<Instruction>) {
    let (id, terminator) = match (instructions.first(), instructions.last()) {
        (Some(first), Some(last)) => (first.offset, build_terminator(last)),
        _ => return,
    };
    cfg.blocks.insert(
        id,
        BasicBlock {
            id,
            instructions,
            terminator,
        },
    );
}

/// Terminator implied by the last instruction of a block.
pub fn build_terminator(last: &Instruction) -> Terminator {
    let next = last.next_offset();
    match &last.kind {
        InstructionKind::Goto(target) => Terminator::Goto { target: *target },
        InstructionKind::IfZero { op, target } => Terminator::ConditionalBranch {
            condition: BranchCondition::IntZero(*op),
            if_true: *target,
            if_false: next,
        },
        InstructionKind::IfCompare {
            op,
            reference,
            target,
        } => Terminator::ConditionalBranch {
            condition: if *reference {
                BranchCondition::RefCompare(*op)
            } else {
                BranchCondition::IntCompare(*op)
            },
            if_true: *target,
            if_false: next,
        },
        InstructionKind::IfNull { null, target } => Terminator::ConditionalBranch {
            condition: BranchCondition::RefNull(*null),
            if_true: *target,
            if_false: next,
        },
        InstructionKind::Switch { default, cases } => Terminator::Switch {
            default: *default,
            cases: cases.clone(),
        },
        InstructionKind::Return(_) => Terminator::Return,
        InstructionKind::Throw => Terminator::Throw,
        InstructionKind::Jsr(target) => Terminator::Jsr {
            target: *target,
            return_addr: next,
        },
        InstructionKind::Ret(_) => Terminator::Ret,
        _ => Terminator::FallThrough { target: next },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_attribute::{CatchBlock, CompareOp, OperandType, PushForm};

    fn instr(offset: u32, length: u32, kind: InstructionKind) -> Instruction {
        Instruction {
            offset,
            length,
            line_number: None,
            kind,
        }
    }

    fn method(instructions: Vec<Instruction>, catch_blocks: Vec<CatchBlock>) -> DecodedMethod {
        let code_length = instructions.last().map_or(0, |i| i.next_offset());
        DecodedMethod {
            instructions,
            catch_blocks,
            max_stack: 4,
            max_locals: 4,
            code_length,
        }
    }

    /// `if (x == 0) { return 1; } return 2;`
    fn branchy() -> DecodedMethod {
        method(
            vec![
                instr(0, 1, InstructionKind::Load { ty: OperandType::Int, slot: 0 }),
                instr(1, 3, InstructionKind::IfZero { op: CompareOp::Ne, target: 6 }),
                instr(4, 1, InstructionKind::Push { value: 1, form: PushForm::Iconst }),
                instr(5, 1, InstructionKind::Return(Some(OperandType::Int))),
                instr(6, 1, InstructionKind::Push { value: 2, form: PushForm::Iconst }),
                instr(7, 1, InstructionKind::Return(Some(OperandType::Int))),
            ],
            vec![],
        )
    }

    #[test]
    fn test_blocks_and_edges() {
        let cfg = build_cfg(&branchy());
        assert_eq!(cfg.blocks.keys().copied().collect::<Vec<_>>(), vec![0, 4, 6]);
        assert_eq!(
            cfg.blocks[&0].terminator,
            Terminator::ConditionalBranch {
                condition: BranchCondition::IntZero(CompareOp::Ne),
                if_true: 6,
                if_false: 4,
            }
        );
        assert_eq!(cfg.successors(0), vec![4, 6]);
        assert_eq!(cfg.predecessors(6), vec![0]);
        assert_eq!(cfg.reverse_postorder()[0], 0);
    }

    #[test]
    fn test_dominators() {
        let cfg = build_cfg(&branchy());
        let doms = cfg.dominators();
        assert_eq!(doms[&4], 0);
        assert_eq!(doms[&6], 0);
        assert!(ControlFlowGraph::dominates(&doms, 0, 6));
        assert!(!ControlFlowGraph::dominates(&doms, 4, 6));
        let pdoms = cfg.post_dominators();
        assert_eq!(pdoms[&0], EXIT);
    }

    #[test]
    fn test_try_range_boundaries_are_leaders() {
        let m = method(
            vec![
                instr(0, 3, InstructionKind::Invoke { kind: crate::code_attribute::InvokeKind::Static, index: 2 }),
                instr(3, 3, InstructionKind::Invoke { kind: crate::code_attribute::InvokeKind::Static, index: 2 }),
                instr(6, 3, InstructionKind::Goto(10)),
                instr(9, 1, InstructionKind::Throw),
                instr(10, 1, InstructionKind::Return(None)),
            ],
            vec![CatchBlock {
                start_pc: 3,
                end_pc: 6,
                handler_pc: 9,
                catch_type: None,
            }],
        );
        let cfg = build_cfg(&m);
        assert_eq!(cfg.blocks.keys().copied().collect::<Vec<_>>(), vec![0, 3, 6, 9, 10]);
        assert_eq!(cfg.exception_successors(3), vec![9]);
        assert!(cfg.exception_successors(0).is_empty());
        let rpo = cfg.reverse_postorder();
        assert!(rpo.contains(&9));
        assert!(cfg.to_dot().contains("B3 -> B9 [style=dashed"));
    }

    #[test]
    fn test_split_block() {
        let mut cfg = build_cfg(&branchy());
        assert!(cfg.split_block(0, 1));
        assert_eq!(cfg.blocks[&0].terminator, Terminator::FallThrough { target: 1 });
        assert_eq!(cfg.successors(1), vec![4, 6]);
        assert!(!cfg.split_block(0, 0));
    }
}
