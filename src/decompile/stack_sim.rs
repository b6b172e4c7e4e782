use tracing::trace;

use crate::code_attribute::{
    CompareOp, FieldOp, Instruction, InstructionKind, InvokeKind, OperandType, StackOp,
};
use crate::constant_info::{ConstantInfo, ConstantPool};

use super::cfg_types::*;
use super::descriptor::*;
use super::expr::*;
use super::util::invoke_dynamic_name_and_type;

/// What the stack simulation needs to know about the enclosing method.
pub struct SimContext<'a> {
    pub pool: &'a ConstantPool,
    pub is_static: bool,
    pub max_stack: u16,
}

/// The statements of one basic block together with the values it leaves
/// behind.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulatedBlock {
    pub statements: Vec<Stmt>,
    /// Values left on the stack when control leaves the block.
    pub exit_stack: Vec<Expr>,
    /// For a conditional block: the condition under which the branch is
    /// taken.
    pub condition: Option<Expr>,
    pub switch_key: Option<Expr>,
    /// Problems met while simulating, such as stack underflow.
    pub diagnostics: Vec<String>,
}

/// A stack slot. Copies made by the `dup` family share a tag so that a
/// store consuming one copy can turn the other into an assignment.
#[derive(Clone, Debug)]
struct StackValue {
    expr: Expr,
    tag: Option<u32>,
}

struct Simulator<'a, 'c> {
    ctx: &'a SimContext<'c>,
    stack: Vec<StackValue>,
    statements: Vec<Stmt>,
    diagnostics: Vec<String>,
    next_tag: u32,
    overflow_reported: bool,
}

/// Simulate a single basic block, turning its instructions into statements
/// and expression trees. `entry_stack` holds the values live on entry, e.g.
/// the caught exception at the start of a handler.
pub fn simulate_block(
    block: &BasicBlock,
    entry_stack: Vec<Expr>,
    ctx: &SimContext<'_>,
) -> SimulatedBlock {
    let mut sim = Simulator {
        ctx,
        stack: entry_stack
            .into_iter()
            .map(|expr| StackValue { expr, tag: None })
            .collect(),
        statements: Vec::new(),
        diagnostics: Vec::new(),
        next_tag: 0,
        overflow_reported: false,
    };
    let mut condition = None;
    let mut switch_key = None;

    let instructions = &block.instructions;
    let mut idx = 0;
    while idx < instructions.len() {
        let instr = &instructions[idx];
        let line = instr.line_number.map(u32::from);
        match &instr.kind {
            InstructionKind::IfZero { op, .. } => {
                let value = sim.pop(line);
                condition = Some(if_zero_condition(value, *op, line));
            }
            InstructionKind::IfCompare { op, .. } => {
                let right = sim.pop(line);
                let left = sim.pop(line);
                condition = Some(Expr::new(
                    ExprKind::Compare {
                        op: *op,
                        left: left.boxed(),
                        right: right.boxed(),
                    },
                    line,
                ));
            }
            InstructionKind::IfNull { null, .. } => {
                let value = sim.pop(line);
                let op = if *null { CompareOp::Eq } else { CompareOp::Ne };
                condition = Some(Expr::new(
                    ExprKind::Compare {
                        op,
                        left: value.boxed(),
                        right: Expr::literal(Literal::Null, line).boxed(),
                    },
                    line,
                ));
            }
            InstructionKind::Switch { .. } => switch_key = Some(sim.pop(line)),
            InstructionKind::Iinc { slot, delta } => {
                if sim.pre_increment_follows(instructions, idx, *slot) {
                    let target = sim.local(*slot, instr.next_offset(), OperandType::Int, line);
                    sim.push(Expr::new(
                        ExprKind::Increment {
                            target: target.boxed(),
                            delta: i32::from(*delta),
                            prefix: true,
                        },
                        line,
                    ));
                    // The load is folded into the increment.
                    idx += 2;
                    continue;
                }
                sim.increment(*slot, i32::from(*delta), instr, line);
            }
            kind => sim.step(instr, kind, line),
        }
        sim.check_depth();
        idx += 1;
    }

    let exit_stack: Vec<Expr> = sim.stack.into_iter().map(|v| v.expr).collect();
    if !exit_stack.is_empty() {
        trace!(block = block.id, depth = exit_stack.len(), "values live out of block");
    }
    SimulatedBlock {
        statements: sim.statements,
        exit_stack,
        condition,
        switch_key,
        diagnostics: sim.diagnostics,
    }
}

/// Build the condition for `if<cond>`, folding `lcmp`/`fcmp*`/`dcmp*` and
/// tests of boolean values.
fn if_zero_condition(value: Expr, op: CompareOp, line: Option<u32>) -> Expr {
    match value.kind {
        ExprKind::ValueCompare { left, right, .. } => {
            Expr::new(ExprKind::Compare { op, left, right }, line)
        }
        _ if value.is_boolean() && op == CompareOp::Ne => value,
        _ if value.is_boolean() && op == CompareOp::Eq => value.negate(),
        _ => Expr::new(
            ExprKind::Compare {
                op,
                left: value.boxed(),
                right: Expr::literal(Literal::int(0), line).boxed(),
            },
            line,
        ),
    }
}

impl<'a, 'c> Simulator<'a, 'c> {
    fn pop(&mut self, line: Option<u32>) -> Expr {
        self.pop_value(line).expr
    }

    fn pop_value(&mut self, line: Option<u32>) -> StackValue {
        match self.stack.pop() {
            Some(v) => v,
            None => {
                self.diagnostics.push("operand stack underflow".to_string());
                StackValue {
                    expr: Expr::new(ExprKind::Unresolved("stack underflow".into()), line),
                    tag: None,
                }
            }
        }
    }

    fn push(&mut self, expr: Expr) {
        self.stack.push(StackValue { expr, tag: None });
    }

    fn emit(&mut self, kind: StmtKind, line: Option<u32>) {
        self.statements.push(Stmt::new(kind, line));
    }

    fn check_depth(&mut self) {
        let depth: usize = self
            .stack
            .iter()
            .map(|v| if v.expr.ty().is_wide() { 2 } else { 1 })
            .sum();
        if depth > usize::from(self.ctx.max_stack) && !self.overflow_reported {
            self.overflow_reported = true;
            self.diagnostics.push(format!(
                "operand stack depth {} exceeds max_stack {}",
                depth, self.ctx.max_stack
            ));
        }
    }

    fn local(&self, slot: u16, pc: u32, ty: OperandType, line: Option<u32>) -> Expr {
        Expr::new(
            ExprKind::Local(LocalRef::new(slot, pc, JvmType::from_operand(ty))),
            line,
        )
    }

    /// Store `value` into `target`. When another stack slot holds a `dup`
    /// copy of the value, that copy becomes the assignment expression;
    /// otherwise the assignment is a statement.
    fn assign(&mut self, target: Expr, value: StackValue, line: Option<u32>) {
        let assignment = Expr::new(
            ExprKind::Assign {
                target: target.boxed(),
                value: value.expr.boxed(),
            },
            line,
        );
        if self.replace_tagged(value.tag, assignment.clone()) {
            return;
        }
        self.emit(StmtKind::Expr(assignment), line);
    }

    /// Replace the stack slot sharing `tag` with `expr`.
    fn replace_tagged(&mut self, tag: Option<u32>, expr: Expr) -> bool {
        let tag = match tag {
            Some(t) => t,
            None => return false,
        };
        match self.stack.iter_mut().rev().find(|v| v.tag == Some(tag)) {
            Some(slot) => {
                *slot = StackValue { expr, tag: None };
                true
            }
            None => false,
        }
    }

    /// `iinc` followed by a load of the same slot, inside a larger
    /// expression, reads as `++x`.
    fn pre_increment_follows(&self, instructions: &[Instruction], idx: usize, slot: u16) -> bool {
        let next_is_load = matches!(
            instructions.get(idx + 1).map(|i| &i.kind),
            Some(InstructionKind::Load { ty: OperandType::Int, slot: s }) if *s == slot
        );
        if !next_is_load {
            return false;
        }
        if !self.stack.is_empty() {
            return true;
        }
        matches!(
            instructions.get(idx + 2).map(|i| &i.kind),
            Some(InstructionKind::Store { slot: s, .. }) if *s != slot
        ) || matches!(
            instructions.get(idx + 2).map(|i| &i.kind),
            Some(InstructionKind::Return(Some(_)))
        )
    }

    fn increment(&mut self, slot: u16, delta: i32, instr: &Instruction, line: Option<u32>) {
        let target = self.local(slot, instr.next_offset(), OperandType::Int, line);
        let postfix_of_top = self
            .stack
            .last()
            .map_or(false, |v| v.expr.is_local_slot(slot));
        let increment = |prefix| {
            Expr::new(
                ExprKind::Increment {
                    target: target.clone().boxed(),
                    delta,
                    prefix,
                },
                line,
            )
        };
        if postfix_of_top {
            let top = self.pop_value(line);
            self.stack.push(StackValue {
                expr: increment(false),
                tag: top.tag,
            });
        } else {
            self.emit(StmtKind::Expr(increment(false)), line);
        }
    }

    /// Duplicate the top `copy` slots and insert the copies below the
    /// `skip` slots underneath them, counting long and double as two.
    fn dup(&mut self, copy: usize, skip: usize, line: Option<u32>) {
        let copied = self.values_spanning(0, copy, line);
        let skipped = self.values_spanning(copied, skip, line);
        let len = self.stack.len();
        for v in &mut self.stack[len - copied..] {
            if v.tag.is_none() {
                v.tag = Some(self.next_tag);
                self.next_tag += 1;
            }
        }
        let copies: Vec<StackValue> = self.stack[len - copied..].to_vec();
        let at = len - copied - skipped;
        for (i, v) in copies.into_iter().enumerate() {
            self.stack.insert(at + i, v);
        }
    }

    /// How many values, starting `from_top` values down, make up `slots`
    /// stack slots. Pads the stack on underflow.
    fn values_spanning(&mut self, from_top: usize, slots: usize, line: Option<u32>) -> usize {
        let mut count = 0;
        let mut covered = 0;
        while covered < slots {
            if from_top + count >= self.stack.len() {
                self.diagnostics.push("operand stack underflow".to_string());
                self.stack.insert(
                    0,
                    StackValue {
                        expr: Expr::new(ExprKind::Unresolved("stack underflow".into()), line),
                        tag: None,
                    },
                );
            }
            let idx = self.stack.len() - 1 - from_top - count;
            covered += if self.stack[idx].expr.ty().is_wide() { 2 } else { 1 };
            count += 1;
        }
        count
    }

    fn step(&mut self, instr: &Instruction, kind: &InstructionKind, line: Option<u32>) {
        let pool = self.ctx.pool;
        match kind {
            InstructionKind::Nop
            | InstructionKind::Goto(_)
            | InstructionKind::Ret(_)
            | InstructionKind::IfZero { .. }
            | InstructionKind::IfCompare { .. }
            | InstructionKind::IfNull { .. }
            | InstructionKind::Switch { .. }
            | InstructionKind::Iinc { .. } => {}
            InstructionKind::AconstNull => self.push(Expr::literal(Literal::Null, line)),
            InstructionKind::Push { value, form } => self.push(Expr::literal(
                Literal::Int {
                    value: *value,
                    pushed_by: Some(*form),
                },
                line,
            )),
            InstructionKind::LongConst(v) => self.push(Expr::literal(Literal::Long(*v), line)),
            InstructionKind::FloatConst(v) => self.push(Expr::literal(Literal::Float(*v), line)),
            InstructionKind::DoubleConst(v) => {
                self.push(Expr::literal(Literal::Double(*v), line))
            }
            InstructionKind::Ldc(index) => {
                let constant = load_constant(pool, *index, line);
                self.push(constant);
            }
            InstructionKind::Load { ty, slot } => {
                let expr = if !self.ctx.is_static && *slot == 0 && *ty == OperandType::Reference {
                    Expr::new(ExprKind::This, line)
                } else {
                    self.local(*slot, instr.offset, *ty, line)
                };
                self.push(expr);
            }
            InstructionKind::Store { ty, slot } => {
                let value = self.pop_value(line);
                let target = self.local(*slot, instr.next_offset(), *ty, line);
                self.assign(target, value, line);
            }
            InstructionKind::ArrayLoad(_) => {
                let index = self.pop(line);
                let array = self.pop(line);
                self.push(Expr::new(
                    ExprKind::ArrayLoad {
                        array: array.boxed(),
                        index: index.boxed(),
                    },
                    line,
                ));
            }
            InstructionKind::ArrayStore(_) => {
                let value = self.pop_value(line);
                let index = self.pop(line);
                let array = self.pop(line);
                let target = Expr::new(
                    ExprKind::ArrayLoad {
                        array: array.boxed(),
                        index: index.boxed(),
                    },
                    line,
                );
                self.assign(target, value, line);
            }
            InstructionKind::Stack(op) => self.stack_op(*op, line),
            InstructionKind::Arith { op, .. } => {
                let right = self.pop(line);
                let left = self.pop(line);
                self.push(Expr::new(
                    ExprKind::Binary {
                        op: BinaryOp::from_arith(*op),
                        left: left.boxed(),
                        right: right.boxed(),
                    },
                    line,
                ));
            }
            InstructionKind::Neg(_) => {
                let value = self.pop(line);
                self.push(Expr::new(ExprKind::Neg(value.boxed()), line));
            }
            InstructionKind::Convert { to, .. } => {
                let value = self.pop(line);
                self.push(Expr::new(
                    ExprKind::Cast {
                        ty: JvmType::from_operand(*to),
                        operand: value.boxed(),
                    },
                    line,
                ));
            }
            InstructionKind::CompareValues(kind) => {
                let right = self.pop(line);
                let left = self.pop(line);
                self.push(Expr::new(
                    ExprKind::ValueCompare {
                        kind: *kind,
                        left: left.boxed(),
                        right: right.boxed(),
                    },
                    line,
                ));
            }
            InstructionKind::Jsr(_) => {
                self.push(Expr::new(ExprKind::Unresolved("returnAddress".into()), line))
            }
            InstructionKind::Return(None) => self.emit(StmtKind::Return(None), line),
            InstructionKind::Return(Some(_)) => {
                let value = self.pop(line);
                self.emit(StmtKind::Return(Some(value)), line);
            }
            InstructionKind::Throw => {
                let value = self.pop(line);
                self.emit(StmtKind::Throw(value), line);
            }
            InstructionKind::Field { op, index } => self.field(*op, *index, line),
            InstructionKind::Invoke { kind, index } => self.invoke(*kind, *index, line),
            InstructionKind::InvokeDynamic(index) => {
                let (name, descriptor) = match invoke_dynamic_name_and_type(pool, *index) {
                    Some((n, d)) => (n.to_string(), d.to_string()),
                    None => {
                        self.diagnostics
                            .push(format!("unresolvable invokedynamic #{}", index));
                        (format!("indy#{}", index), "()Ljava/lang/Object;".to_string())
                    }
                };
                let (params, ret) =
                    parse_method_descriptor(&descriptor).unwrap_or((vec![], JvmType::Unknown));
                let args = self.pop_args(params.len(), line);
                let call = Expr::new(
                    ExprKind::InvokeDynamic {
                        name,
                        descriptor,
                        args,
                    },
                    line,
                );
                self.push_or_emit(call, &ret, line);
            }
            InstructionKind::New(index) => {
                let class_name = pool.class_name(*index).unwrap_or("java/lang/Object");
                self.push(Expr::new(ExprKind::UninitNew(class_name.to_string()), line));
            }
            InstructionKind::NewArray(ty) => {
                let count = self.pop(line);
                self.push(Expr::new(
                    ExprKind::NewArray {
                        element: JvmType::from_operand(*ty),
                        dimensions: vec![count],
                    },
                    line,
                ));
            }
            InstructionKind::ANewArray(index) => {
                let count = self.pop(line);
                let element = class_constant_type(pool.class_name(*index).unwrap_or("java/lang/Object"));
                self.push(Expr::new(
                    ExprKind::NewArray {
                        element,
                        dimensions: vec![count],
                    },
                    line,
                ));
            }
            InstructionKind::MultiANewArray { index, dimensions } => {
                let dims = self.pop_args(usize::from(*dimensions), line);
                let mut element = class_constant_type(pool.class_name(*index).unwrap_or("[Ljava/lang/Object;"));
                for _ in 0..*dimensions {
                    element = match element {
                        JvmType::Array(inner) => *inner,
                        other => other,
                    };
                }
                self.push(Expr::new(
                    ExprKind::NewArray {
                        element,
                        dimensions: dims,
                    },
                    line,
                ));
            }
            InstructionKind::ArrayLength => {
                let array = self.pop(line);
                self.push(Expr::new(ExprKind::ArrayLength(array.boxed()), line));
            }
            InstructionKind::CheckCast(index) => {
                let operand = self.pop(line);
                let ty = class_constant_type(pool.class_name(*index).unwrap_or("java/lang/Object"));
                self.push(Expr::new(
                    ExprKind::Cast {
                        ty,
                        operand: operand.boxed(),
                    },
                    line,
                ));
            }
            InstructionKind::InstanceOf(index) => {
                let operand = self.pop(line);
                let class_name = pool.class_name(*index).unwrap_or("java/lang/Object").to_string();
                self.push(Expr::new(
                    ExprKind::InstanceOf {
                        operand: operand.boxed(),
                        class_name,
                    },
                    line,
                ));
            }
            InstructionKind::MonitorEnter => {
                let object = self.pop(line);
                self.emit(StmtKind::MonitorEnter(object), line);
            }
            InstructionKind::MonitorExit => {
                let object = self.pop(line);
                self.emit(StmtKind::MonitorExit(object), line);
            }
        }
    }

    fn stack_op(&mut self, op: StackOp, line: Option<u32>) {
        match op {
            StackOp::Pop => {
                let value = self.pop(line);
                self.discard(value, line);
            }
            StackOp::Pop2 => {
                let value = self.pop(line);
                let wide = value.ty().is_wide();
                self.discard(value, line);
                if !wide {
                    let second = self.pop(line);
                    self.discard(second, line);
                }
            }
            StackOp::Dup => self.dup(1, 0, line),
            StackOp::DupX1 => self.dup(1, 1, line),
            StackOp::DupX2 => self.dup(1, 2, line),
            StackOp::Dup2 => self.dup(2, 0, line),
            StackOp::Dup2X1 => self.dup(2, 1, line),
            StackOp::Dup2X2 => self.dup(2, 2, line),
            StackOp::Swap => {
                let a = self.pop_value(line);
                let b = self.pop_value(line);
                self.stack.push(a);
                self.stack.push(b);
            }
        }
    }

    /// A popped value is kept as a statement only when evaluating it does
    /// something.
    fn discard(&mut self, value: Expr, line: Option<u32>) {
        if has_side_effects(&value) {
            self.emit(StmtKind::Expr(value), line);
        }
    }

    fn field(&mut self, op: FieldOp, index: u16, line: Option<u32>) {
        let (class_name, name, ty) = match self.ctx.pool.member_ref(index) {
            Some(m) => (
                m.class_name.to_string(),
                m.name.to_string(),
                parse_type_descriptor(m.descriptor).unwrap_or(JvmType::Unknown),
            ),
            None => {
                self.diagnostics.push(format!("unresolvable field #{}", index));
                (String::new(), format!("field#{}", index), JvmType::Unknown)
            }
        };
        let field = |object: Option<Expr>| {
            Expr::new(
                ExprKind::Field {
                    object: object.map(Expr::boxed),
                    class_name: class_name.clone(),
                    name: name.clone(),
                    ty: ty.clone(),
                },
                line,
            )
        };
        match op {
            FieldOp::GetStatic => self.push(field(None)),
            FieldOp::GetField => {
                let object = self.pop(line);
                self.push(field(Some(object)));
            }
            FieldOp::PutStatic => {
                let value = self.pop_value(line);
                self.assign(field(None), value, line);
            }
            FieldOp::PutField => {
                let value = self.pop_value(line);
                let object = self.pop(line);
                self.assign(field(Some(object)), value, line);
            }
        }
    }

    fn invoke(&mut self, kind: InvokeKind, index: u16, line: Option<u32>) {
        let (class_name, name, descriptor) = match self.ctx.pool.member_ref(index) {
            Some(m) => (
                m.class_name.to_string(),
                m.name.to_string(),
                m.descriptor.to_string(),
            ),
            None => {
                self.diagnostics.push(format!("unresolvable method #{}", index));
                (String::new(), format!("method#{}", index), "()V".to_string())
            }
        };
        let (params, ret) =
            parse_method_descriptor(&descriptor).unwrap_or((vec![], JvmType::Unknown));
        let args = self.pop_args(params.len(), line);
        if kind == InvokeKind::Static {
            let call = Expr::new(
                ExprKind::Invoke {
                    kind,
                    object: None,
                    class_name,
                    name,
                    descriptor,
                    args,
                },
                line,
            );
            self.push_or_emit(call, &ret, line);
            return;
        }
        let receiver = self.pop_value(line);
        if name == "<init>" {
            if let ExprKind::UninitNew(new_class) = &receiver.expr.kind {
                let created = Expr::new(
                    ExprKind::New {
                        class_name: new_class.clone(),
                        descriptor,
                        args,
                    },
                    receiver.expr.line.or(line),
                );
                if !self.replace_tagged(receiver.tag, created.clone()) {
                    self.emit(StmtKind::Expr(created), line);
                }
                return;
            }
        }
        let call = Expr::new(
            ExprKind::Invoke {
                kind,
                object: Some(receiver.expr.boxed()),
                class_name,
                name,
                descriptor,
                args,
            },
            line,
        );
        self.push_or_emit(call, &ret, line);
    }

    /// Pop `n` values, returned in evaluation order.
    fn pop_args(&mut self, n: usize, line: Option<u32>) -> Vec<Expr> {
        let mut args: Vec<Expr> = (0..n).map(|_| self.pop(line)).collect();
        args.reverse();
        args
    }

    fn push_or_emit(&mut self, call: Expr, ret: &JvmType, line: Option<u32>) {
        if *ret == JvmType::Void {
            self.emit(StmtKind::Expr(call), line);
        } else {
            self.push(call);
        }
    }
}

/// Load a constant for `ldc`, `ldc_w` or `ldc2_w`.
fn load_constant(pool: &ConstantPool, index: u16, line: Option<u32>) -> Expr {
    let literal = match pool.get(index) {
        Some(ConstantInfo::Integer(c)) => Literal::int(c.value),
        Some(ConstantInfo::Float(c)) => Literal::Float(c.value),
        Some(ConstantInfo::Long(c)) => Literal::Long(c.value),
        Some(ConstantInfo::Double(c)) => Literal::Double(c.value),
        Some(ConstantInfo::String(c)) => match pool.utf8(c.string_index) {
            Some(s) => Literal::String(s.to_string()),
            None => return unresolved_constant(index, line),
        },
        Some(ConstantInfo::Class(c)) => match pool.utf8(c.name_index) {
            Some(name) => Literal::Class(class_constant_type(name)),
            None => return unresolved_constant(index, line),
        },
        _ => return unresolved_constant(index, line),
    };
    Expr::literal(literal, line)
}

fn unresolved_constant(index: u16, line: Option<u32>) -> Expr {
    Expr::new(ExprKind::Unresolved(format!("constant#{}", index)), line)
}

/// Does evaluating this expression do anything beyond producing a value?
fn has_side_effects(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Invoke { .. }
            | ExprKind::InvokeDynamic { .. }
            | ExprKind::New { .. }
            | ExprKind::Assign { .. }
            | ExprKind::Increment { .. }
            | ExprKind::Unresolved(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_attribute::{ArithOp, PushForm};

    fn instr(offset: u32, length: u32, kind: InstructionKind) -> Instruction {
        Instruction {
            offset,
            length,
            line_number: Some(7),
            kind,
        }
    }

    fn block(instructions: Vec<Instruction>) -> BasicBlock {
        let next = instructions.last().map_or(0, |i| i.next_offset());
        BasicBlock {
            id: instructions.first().map_or(0, |i| i.offset),
            instructions,
            terminator: Terminator::FallThrough { target: next },
        }
    }

    fn run(instructions: Vec<Instruction>, pool: &ConstantPool) -> SimulatedBlock {
        let ctx = SimContext {
            pool,
            is_static: true,
            max_stack: 4,
        };
        simulate_block(&block(instructions), Vec::new(), &ctx)
    }

    fn int_load(offset: u32, slot: u16) -> Instruction {
        instr(offset, 1, InstructionKind::Load { ty: OperandType::Int, slot })
    }

    fn int_store(offset: u32, slot: u16) -> Instruction {
        instr(offset, 1, InstructionKind::Store { ty: OperandType::Int, slot })
    }

    #[test]
    fn test_chained_assignment() {
        let pool = ConstantPool::new();
        // b = a = 5
        let sim = run(
            vec![
                instr(0, 1, InstructionKind::Push { value: 5, form: PushForm::Iconst }),
                instr(1, 1, InstructionKind::Stack(StackOp::Dup)),
                int_store(2, 1),
                int_store(3, 2),
            ],
            &pool,
        );
        assert_eq!(sim.statements.len(), 1);
        let (target, value) = sim.statements[0].as_assign().unwrap();
        assert!(target.is_local_slot(2));
        match &value.kind {
            ExprKind::Assign { target, value } => {
                assert!(target.is_local_slot(1));
                assert_eq!(value.int_value(), Some(5));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(sim.diagnostics.is_empty());
    }

    #[test]
    fn test_post_increment_in_expression() {
        let pool = ConstantPool::new();
        // x = i++
        let sim = run(
            vec![
                int_load(0, 1),
                instr(1, 3, InstructionKind::Iinc { slot: 1, delta: 1 }),
                int_store(4, 2),
            ],
            &pool,
        );
        let (_, value) = sim.statements[0].as_assign().unwrap();
        assert!(matches!(
            value.kind,
            ExprKind::Increment { delta: 1, prefix: false, .. }
        ));
    }

    #[test]
    fn test_pre_increment_and_statement_increment() {
        let pool = ConstantPool::new();
        // x = ++i; i += 3;
        let sim = run(
            vec![
                instr(0, 3, InstructionKind::Iinc { slot: 1, delta: 1 }),
                int_load(3, 1),
                int_store(4, 2),
                instr(5, 3, InstructionKind::Iinc { slot: 1, delta: 3 }),
            ],
            &pool,
        );
        assert_eq!(sim.statements.len(), 2);
        let (_, value) = sim.statements[0].as_assign().unwrap();
        assert!(matches!(value.kind, ExprKind::Increment { prefix: true, .. }));
        assert!(matches!(
            sim.statements[1].kind,
            StmtKind::Expr(Expr { kind: ExprKind::Increment { delta: 3, .. }, .. })
        ));
    }

    #[test]
    fn test_long_compare_folds_into_condition() {
        let pool = ConstantPool::new();
        let sim = run(
            vec![
                instr(0, 1, InstructionKind::Load { ty: OperandType::Long, slot: 0 }),
                instr(1, 1, InstructionKind::Load { ty: OperandType::Long, slot: 2 }),
                instr(2, 1, InstructionKind::CompareValues(crate::code_attribute::ValueCompare::Long)),
                instr(3, 3, InstructionKind::IfZero { op: CompareOp::Ge, target: 20 }),
            ],
            &pool,
        );
        match sim.condition.unwrap().kind {
            ExprKind::Compare { op, left, right } => {
                assert_eq!(op, CompareOp::Ge);
                assert!(left.is_local_slot(0));
                assert!(right.is_local_slot(2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_new_dup_init() {
        let mut pool = ConstantPool::new();
        let class = pool.add_class("java/lang/StringBuilder").unwrap();
        let init = pool
            .add_method_ref("java/lang/StringBuilder", "<init>", "()V")
            .unwrap();
        let sim = run(
            vec![
                instr(0, 3, InstructionKind::New(class)),
                instr(3, 1, InstructionKind::Stack(StackOp::Dup)),
                instr(4, 3, InstructionKind::Invoke { kind: InvokeKind::Special, index: init }),
                instr(7, 1, InstructionKind::Store { ty: OperandType::Reference, slot: 1 }),
            ],
            &pool,
        );
        let (_, value) = sim.statements[0].as_assign().unwrap();
        assert!(matches!(&value.kind, ExprKind::New { class_name, .. } if class_name == "java/lang/StringBuilder"));
        assert_eq!(value.line, Some(7));
    }

    #[test]
    fn test_underflow_and_exit_stack() {
        let pool = ConstantPool::new();
        let sim = run(
            vec![
                int_load(0, 0),
                instr(1, 1, InstructionKind::Arith { op: ArithOp::Add, ty: OperandType::Int }),
            ],
            &pool,
        );
        assert_eq!(sim.diagnostics, vec!["operand stack underflow".to_string()]);
        assert_eq!(sim.exit_stack.len(), 1);
    }
}
