use crate::code_attribute::{FieldOp, Instruction, InstructionKind, InvokeKind, StackOp};
use crate::constant_info::{ConstantInfo, ConstantPool};

use super::descriptor::{parse_method_descriptor, JvmType};

/// Number of stack values an instruction pops and pushes, counting a long
/// or double as one value.
///
/// `None` when the effect depends on operand categories the instruction
/// alone does not reveal (`pop2`, the `dup2` family), or when a referenced
/// constant cannot be resolved.
pub fn stack_effect(kind: &InstructionKind, pool: &ConstantPool) -> Option<(usize, usize)> {
    use InstructionKind::*;
    Some(match kind {
        Nop | Goto(_) | Ret(_) | Iinc { .. } => (0, 0),
        AconstNull | Push { .. } | LongConst(_) | FloatConst(_) | DoubleConst(_) | Ldc(_)
        | Load { .. } | New(_) | Jsr(_) => (0, 1),
        Store { .. } | IfZero { .. } | IfNull { .. } | Switch { .. } | Throw | MonitorEnter
        | MonitorExit => (1, 0),
        ArrayLoad(_) | Arith { .. } | CompareValues(_) => (2, 1),
        ArrayStore(_) => (3, 0),
        Neg(_) | Convert { .. } | NewArray(_) | ANewArray(_) | ArrayLength | CheckCast(_)
        | InstanceOf(_) => (1, 1),
        IfCompare { .. } => (2, 0),
        Return(ty) => (usize::from(ty.is_some()), 0),
        Stack(StackOp::Pop) => (1, 0),
        Stack(StackOp::Dup) => (1, 2),
        Stack(StackOp::DupX1) => (2, 3),
        Stack(StackOp::Swap) => (2, 2),
        Stack(_) => return None,
        Field { op, .. } => match op {
            FieldOp::GetStatic => (0, 1),
            FieldOp::PutStatic => (1, 0),
            FieldOp::GetField => (1, 1),
            FieldOp::PutField => (2, 0),
        },
        Invoke { kind, index } => {
            let member = pool.member_ref(*index)?;
            let (params, ret) = parse_method_descriptor(member.descriptor)?;
            let receiver = usize::from(*kind != InvokeKind::Static);
            (params.len() + receiver, usize::from(ret != JvmType::Void))
        }
        InvokeDynamic(index) => {
            let (_, descriptor) = invoke_dynamic_name_and_type(pool, *index)?;
            let (params, ret) = parse_method_descriptor(descriptor)?;
            (params.len(), usize::from(ret != JvmType::Void))
        }
        MultiANewArray { dimensions, .. } => (*dimensions as usize, 1),
    })
}

/// Name and descriptor of an InvokeDynamic constant.
pub fn invoke_dynamic_name_and_type(pool: &ConstantPool, index: u16) -> Option<(&str, &str)> {
    match pool.get(index)? {
        ConstantInfo::InvokeDynamic(c) => pool.name_and_type(c.name_and_type_index),
        _ => None,
    }
}

/// Index of the first instruction of the expression whose value is on top
/// of the stack just before `instructions[end]`.
///
/// Walks backwards until exactly one value has been produced without
/// consuming anything from below.
pub fn expression_start(
    instructions: &[Instruction],
    end: usize,
    pool: &ConstantPool,
) -> Option<usize> {
    let mut needed = 1usize;
    for idx in (0..end.min(instructions.len())).rev() {
        let (pops, pushes) = stack_effect(&instructions[idx].kind, pool)?;
        if pushes > needed {
            return None;
        }
        needed = needed - pushes + pops;
        if needed == 0 {
            return Some(idx);
        }
    }
    None
}

/// An instruction that only computes a value: no local, field or array
/// writes, no monitors, no discarded values and no void calls.
pub fn is_side_effect_free(kind: &InstructionKind, pool: &ConstantPool) -> bool {
    use InstructionKind::*;
    match kind {
        Store { .. } | Iinc { .. } | ArrayStore(_) | MonitorEnter | MonitorExit
        | Stack(StackOp::Pop) | Stack(StackOp::Pop2) => false,
        Field { op, .. } => matches!(op, FieldOp::GetField | FieldOp::GetStatic),
        Invoke { .. } | InvokeDynamic(_) => {
            matches!(stack_effect(kind, pool), Some((_, pushes)) if pushes > 0)
        }
        _ => true,
    }
}

/// True when `instructions` evaluate a branch condition and nothing else,
/// starting from an empty stack.
pub fn is_pure_condition(instructions: &[Instruction], pool: &ConstantPool) -> bool {
    let mut depth = 0usize;
    for instr in instructions {
        if !is_side_effect_free(&instr.kind, pool) {
            return false;
        }
        let (pops, pushes) = match stack_effect(&instr.kind, pool) {
            Some(effect) => effect,
            None => return false,
        };
        if pops > depth {
            return false;
        }
        depth = depth - pops + pushes;
    }
    depth == 0
}
