use crate::code_attribute::{ArithOp, CompareOp, InvokeKind, PushForm, ValueCompare};

use super::descriptor::{parse_method_descriptor, JvmType};

/// Constant values.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    /// `pushed_by` records the instruction form for constants that came from
    /// `iconst`, `bipush` or `sipush`.
    Int {
        value: i32,
        pushed_by: Option<PushForm>,
    },
    Long(i64),
    Float(f32),
    Double(f64),
    Char(u16),
    Boolean(bool),
    String(String),
    Class(JvmType),
    Null,
}

impl Literal {
    pub fn int(value: i32) -> Self {
        Literal::Int {
            value,
            pushed_by: None,
        }
    }

    pub fn ty(&self) -> JvmType {
        match self {
            Literal::Int { .. } => JvmType::Int,
            Literal::Long(_) => JvmType::Long,
            Literal::Float(_) => JvmType::Float,
            Literal::Double(_) => JvmType::Double,
            Literal::Char(_) => JvmType::Char,
            Literal::Boolean(_) => JvmType::Boolean,
            Literal::String(_) => JvmType::string(),
            Literal::Class(_) => JvmType::Reference("java/lang/Class".into()),
            Literal::Null => JvmType::Null,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    BitAnd,
    BitOr,
    BitXor,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl BinaryOp {
    pub fn from_arith(op: ArithOp) -> Self {
        match op {
            ArithOp::Add => BinaryOp::Add,
            ArithOp::Sub => BinaryOp::Sub,
            ArithOp::Mul => BinaryOp::Mul,
            ArithOp::Div => BinaryOp::Div,
            ArithOp::Rem => BinaryOp::Rem,
            ArithOp::Shl => BinaryOp::Shl,
            ArithOp::Shr => BinaryOp::Shr,
            ArithOp::Ushr => BinaryOp::Ushr,
            ArithOp::And => BinaryOp::BitAnd,
            ArithOp::Or => BinaryOp::BitOr,
            ArithOp::Xor => BinaryOp::BitXor,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Ushr => ">>>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// A use or definition of a local variable slot.
///
/// `pc` is the instruction offset for loads and the offset following the
/// instruction for stores, matching how LocalVariableTable ranges start.
/// `name`, `ty` and `var` are settled once local variables are resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalRef {
    pub slot: u16,
    pub pc: u32,
    pub name: String,
    pub ty: JvmType,
    /// Index into the method's local variable list.
    pub var: Option<usize>,
}

impl LocalRef {
    pub fn new(slot: u16, pc: u32, ty: JvmType) -> Self {
        Self {
            slot,
            pc,
            name: String::new(),
            ty,
            var: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Local(LocalRef),
    This,
    /// The exception object on entry to a handler.
    CaughtException(Option<String>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Cast {
        ty: JvmType,
        operand: Box<Expr>,
    },
    InstanceOf {
        operand: Box<Expr>,
        class_name: String,
    },
    Field {
        object: Option<Box<Expr>>,
        class_name: String,
        name: String,
        ty: JvmType,
    },
    Invoke {
        kind: InvokeKind,
        object: Option<Box<Expr>>,
        class_name: String,
        name: String,
        descriptor: String,
        args: Vec<Expr>,
    },
    InvokeDynamic {
        name: String,
        descriptor: String,
        args: Vec<Expr>,
    },
    New {
        class_name: String,
        descriptor: String,
        args: Vec<Expr>,
    },
    NewArray {
        element: JvmType,
        dimensions: Vec<Expr>,
    },
    ArrayLength(Box<Expr>),
    ArrayLoad {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    /// Assignment used as an expression or as a statement.
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// `++x`, `x++`, `--x`, `x--`, or `x += delta` when `delta` is not one.
    Increment {
        target: Box<Expr>,
        delta: i32,
        prefix: bool,
    },
    Ternary {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    StringConcat(Vec<Expr>),
    /// Result of `lcmp`/`fcmp*`/`dcmp*` before it is folded into a branch.
    ValueCompare {
        kind: ValueCompare,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Result of `new` before its constructor runs.
    UninitNew(String),
    /// Placeholder for a value the stack simulation could not recover.
    Unresolved(String),
}

/// Expression node. `line` is the source line of the instruction that
/// produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: Option<u32>,
}

impl Expr {
    pub fn new(kind: ExprKind, line: Option<u32>) -> Self {
        Self { kind, line }
    }

    pub fn literal(literal: Literal, line: Option<u32>) -> Self {
        Self::new(ExprKind::Literal(literal), line)
    }

    pub fn boxed(self) -> Box<Expr> {
        Box::new(self)
    }

    pub fn as_local(&self) -> Option<&LocalRef> {
        match &self.kind {
            ExprKind::Local(local) => Some(local),
            _ => None,
        }
    }

    pub fn is_local_slot(&self, slot: u16) -> bool {
        self.as_local().map_or(false, |l| l.slot == slot)
    }

    pub fn int_value(&self) -> Option<i32> {
        match &self.kind {
            ExprKind::Literal(Literal::Int { value, .. }) => Some(*value),
            _ => None,
        }
    }

    /// Static type as far as it can be read off the tree.
    pub fn ty(&self) -> JvmType {
        match &self.kind {
            ExprKind::Literal(lit) => lit.ty(),
            ExprKind::Local(local) => local.ty.clone(),
            ExprKind::This | ExprKind::Unresolved(_) => JvmType::Unknown,
            ExprKind::CaughtException(ty) => JvmType::Reference(
                ty.clone().unwrap_or_else(|| "java/lang/Throwable".into()),
            ),
            ExprKind::Binary { op, left, .. } => {
                if op.is_logical() {
                    JvmType::Boolean
                } else {
                    match left.ty() {
                        t if t.is_int_like() => JvmType::Int,
                        t => t,
                    }
                }
            }
            ExprKind::Compare { .. } | ExprKind::Not(_) | ExprKind::InstanceOf { .. } => {
                JvmType::Boolean
            }
            ExprKind::Neg(inner) => inner.ty(),
            ExprKind::Cast { ty, .. } => ty.clone(),
            ExprKind::Field { ty, .. } => ty.clone(),
            ExprKind::Invoke { descriptor, .. } | ExprKind::InvokeDynamic { descriptor, .. } => {
                parse_method_descriptor(descriptor)
                    .map(|(_, ret)| ret)
                    .unwrap_or(JvmType::Unknown)
            }
            ExprKind::New { class_name, .. } => JvmType::Reference(class_name.clone()),
            ExprKind::NewArray {
                element,
                dimensions,
            } => {
                let mut ty = element.clone();
                for _ in 0..dimensions.len().max(1) {
                    ty = JvmType::Array(Box::new(ty));
                }
                ty
            }
            ExprKind::ArrayLength(_) | ExprKind::ValueCompare { .. } => JvmType::Int,
            ExprKind::ArrayLoad { array, .. } => array
                .ty()
                .element_type()
                .cloned()
                .unwrap_or(JvmType::Unknown),
            ExprKind::Assign { target, .. } | ExprKind::Increment { target, .. } => target.ty(),
            ExprKind::Ternary { then_expr, .. } => then_expr.ty(),
            ExprKind::StringConcat(_) => JvmType::string(),
            ExprKind::UninitNew(class_name) => JvmType::Reference(class_name.clone()),
        }
    }

    pub fn is_boolean(&self) -> bool {
        self.ty() == JvmType::Boolean
    }

    /// Expressions that may be evaluated any number of times.
    pub fn is_pure(&self) -> bool {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Local(_) | ExprKind::This => true,
            ExprKind::Field { object, .. } => object.as_ref().map_or(true, |o| o.is_pure()),
            ExprKind::ArrayLength(inner) | ExprKind::Not(inner) | ExprKind::Neg(inner) => {
                inner.is_pure()
            }
            ExprKind::Cast { operand, .. } | ExprKind::InstanceOf { operand, .. } => {
                operand.is_pure()
            }
            ExprKind::Binary { left, right, .. }
            | ExprKind::Compare { left, right, .. }
            | ExprKind::ArrayLoad {
                array: left,
                index: right,
            } => left.is_pure() && right.is_pure(),
            _ => false,
        }
    }

    /// Logical negation, pushed through comparisons and De Morgan.
    pub fn negate(self) -> Expr {
        let line = self.line;
        match self.kind {
            ExprKind::Compare { op, left, right } => Expr::new(
                ExprKind::Compare {
                    op: op.negate(),
                    left,
                    right,
                },
                line,
            ),
            ExprKind::Not(inner) => *inner,
            ExprKind::Literal(Literal::Boolean(b)) => Expr::literal(Literal::Boolean(!b), line),
            ExprKind::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                left,
                right,
            } => {
                let flipped = if op == BinaryOp::And {
                    BinaryOp::Or
                } else {
                    BinaryOp::And
                };
                Expr::new(
                    ExprKind::Binary {
                        op: flipped,
                        left: (*left).negate().boxed(),
                        right: (*right).negate().boxed(),
                    },
                    line,
                )
            }
            kind => Expr::new(ExprKind::Not(Expr::new(kind, line).boxed()), line),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
    /// Expression evaluated for its side effect: assignments, calls,
    /// increments and discarded values.
    Expr(Expr),
    Return(Option<Expr>),
    Throw(Expr),
    MonitorEnter(Expr),
    MonitorExit(Expr),
}

/// A simple statement produced by stack simulation.
#[derive(Clone, Debug, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: Option<u32>,
}

impl Stmt {
    pub fn new(kind: StmtKind, line: Option<u32>) -> Self {
        Self { kind, line }
    }

    pub fn expr(&self) -> Option<&Expr> {
        match &self.kind {
            StmtKind::Expr(e)
            | StmtKind::Throw(e)
            | StmtKind::MonitorEnter(e)
            | StmtKind::MonitorExit(e)
            | StmtKind::Return(Some(e)) => Some(e),
            StmtKind::Return(None) => None,
        }
    }

    /// `target = value` as a statement, if this is one.
    pub fn as_assign(&self) -> Option<(&Expr, &Expr)> {
        match &self.kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Assign { target, value },
                ..
            }) => Some((target, value)),
            _ => None,
        }
    }

    pub fn ends_flow(&self) -> bool {
        matches!(self.kind, StmtKind::Return(_) | StmtKind::Throw(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(slot: u16, ty: JvmType) -> Expr {
        Expr::new(ExprKind::Local(LocalRef::new(slot, 0, ty)), None)
    }

    #[test]
    fn test_negate_de_morgan() {
        let a = Expr::new(
            ExprKind::Compare {
                op: CompareOp::Lt,
                left: local(1, JvmType::Int).boxed(),
                right: local(2, JvmType::Int).boxed(),
            },
            Some(3),
        );
        let b = local(3, JvmType::Boolean);
        let and = Expr::new(
            ExprKind::Binary {
                op: BinaryOp::And,
                left: a.boxed(),
                right: b.clone().boxed(),
            },
            Some(3),
        );
        let negated = and.negate();
        match negated.kind {
            ExprKind::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                assert!(matches!(
                    left.kind,
                    ExprKind::Compare {
                        op: CompareOp::Ge,
                        ..
                    }
                ));
                assert_eq!(right.kind, ExprKind::Not(b.boxed()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_types() {
        let call = Expr::new(
            ExprKind::Invoke {
                kind: InvokeKind::Virtual,
                object: Some(local(1, JvmType::string()).boxed()),
                class_name: "java/lang/String".into(),
                name: "isEmpty".into(),
                descriptor: "()Z".into(),
                args: vec![],
            },
            None,
        );
        assert!(call.is_boolean());
        assert!(!call.is_pure());
        let load = Expr::new(
            ExprKind::ArrayLoad {
                array: local(1, JvmType::Array(Box::new(JvmType::Char))).boxed(),
                index: Expr::literal(Literal::int(0), None).boxed(),
            },
            None,
        );
        assert_eq!(load.ty(), JvmType::Char);
        assert!(load.is_pure());
    }
}
