//! Primitive type refinement on the statement tree.
//!
//! The JVM computes with `int` for every sub-int primitive, so constants
//! come out of the stack simulation as `int` literals. Where the context
//! says otherwise they are rewritten: `'b'` passed to `String.indexOf`,
//! `true` returned from a `boolean` method, `'x'` stored into a `char`.

use tracing::trace;

use crate::code_attribute::{CompareOp, InvokeKind, PushForm};
use crate::constant_info::WellKnown;
use crate::error::{Warning, WarningKind};

use super::descriptor::{parse_method_descriptor, JvmType};
use super::expr::{Expr, ExprKind, Literal, Stmt, StmtKind};
use super::local_variables::{LocalOrigin, LocalVariable};
use super::structured_types::StructuredStmt;
use super::visitor::{walk_body_mut, walk_expr_mut, walk_simple_mut, walk_statement_mut, VisitorMut};

pub struct TypeContext<'a> {
    /// `name` + descriptor, for warnings.
    pub method: &'a str,
    pub return_type: &'a JvmType,
    pub vars: &'a [LocalVariable],
    /// Rewrite `bipush`/`sipush` arguments of `String.indexOf` and
    /// `String.lastIndexOf` as char literals.
    pub infer_char_literals: bool,
}

/// Refine literal types in `body` from their context. Returns the
/// type-uncertainty warnings met on the way.
pub fn infer_types(body: &mut [StructuredStmt], ctx: &TypeContext<'_>) -> Vec<Warning> {
    let mut inference = Inference {
        ctx,
        warnings: Vec::new(),
    };
    walk_body_mut(&mut inference, body);
    inference.warnings
}

struct Inference<'c, 'a> {
    ctx: &'c TypeContext<'a>,
    warnings: Vec<Warning>,
}

impl Inference<'_, '_> {
    fn var_of(&self, expr: &Expr) -> Option<&LocalVariable> {
        expr.as_local().and_then(|l| l.var).and_then(|idx| self.ctx.vars.get(idx))
    }

    /// `String.indexOf(int)` and friends, called with a constant that was
    /// pushed by `bipush` or `sipush`.
    fn is_char_search(&self, kind: InvokeKind, class_name: &str, name: &str, descriptor: &str) -> bool {
        self.ctx.infer_char_literals
            && kind == InvokeKind::Virtual
            && class_name == WellKnown::JavaLangString.as_str()
            && (name == "indexOf" || name == "lastIndexOf")
            && (descriptor == "(I)I" || descriptor == "(II)I")
    }

    fn refine_arguments(&mut self, callee: &str, descriptor: &str, args: &mut [Expr]) {
        let params = match parse_method_descriptor(descriptor) {
            Some((params, _)) => params,
            None => return,
        };
        for (arg, param) in args.iter_mut().zip(params.iter()) {
            narrow_literal(arg, param, true);
            let uncertain = self.var_of(arg).map_or(false, |var| {
                var.origin == LocalOrigin::Inferred && var.ty == JvmType::Int && param.is_narrow_int()
            });
            if uncertain {
                let name = arg.as_local().map(|l| l.name.clone()).unwrap_or_default();
                trace!(local = %name, callee, "int local flows into narrow parameter");
                self.warnings.push(Warning::new(
                    WarningKind::TypeInferenceUncertain,
                    self.ctx.method,
                    format!(
                        "local {} passed to {} as {} is kept as int",
                        name,
                        callee,
                        param.source_name()
                    ),
                ));
            }
        }
    }
}

impl VisitorMut for Inference<'_, '_> {
    fn visit_statement_mut(&mut self, stmt: &mut StructuredStmt) {
        walk_statement_mut(self, stmt);
        if let StructuredStmt::Declaration { var, init: Some(init) } = stmt {
            narrow_literal(init, &var.ty, false);
        }
    }

    fn visit_simple_mut(&mut self, stmt: &mut Stmt) {
        walk_simple_mut(self, stmt);
        if let StmtKind::Return(Some(value)) = &mut stmt.kind {
            narrow_literal(value, self.ctx.return_type, false);
        }
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        walk_expr_mut(self, expr);
        match &mut expr.kind {
            ExprKind::Invoke {
                kind,
                class_name,
                name,
                descriptor,
                args,
                ..
            } => {
                if self.is_char_search(*kind, class_name, name, descriptor) {
                    if let Some(first) = args.first_mut() {
                        char_from_push(first);
                    }
                }
                let callee = format!("{}.{}", class_name, name);
                self.refine_arguments(&callee, descriptor, args);
            }
            ExprKind::New {
                class_name,
                descriptor,
                args,
            } => {
                let callee = format!("new {}", class_name);
                self.refine_arguments(&callee, descriptor, args);
            }
            ExprKind::Assign { target, value } => {
                let ty = target.ty();
                narrow_literal(value, &ty, false);
            }
            ExprKind::Ternary {
                then_expr, else_expr, ..
            } => {
                // Both arms follow a typed arm.
                let then_ty = then_expr.ty();
                let else_ty = else_expr.ty();
                if then_ty.is_narrow_int() {
                    narrow_literal(else_expr, &then_ty, false);
                } else if else_ty.is_narrow_int() {
                    narrow_literal(then_expr, &else_ty, false);
                }
            }
            ExprKind::Compare { left, right, .. } => {
                let left_ty = left.ty();
                let right_ty = right.ty();
                if left_ty == JvmType::Char {
                    narrow_literal(right, &JvmType::Char, false);
                } else if right_ty == JvmType::Char {
                    narrow_literal(left, &JvmType::Char, false);
                }
            }
            _ => {}
        }
        if let Some(simplified) = boolean_comparison(expr) {
            *expr = simplified;
        }
    }
}

fn char_from_push(arg: &mut Expr) {
    if let ExprKind::Literal(Literal::Int {
        value,
        pushed_by: Some(PushForm::Bipush | PushForm::Sipush),
    }) = arg.kind
    {
        if let Ok(c) = u16::try_from(value) {
            arg.kind = ExprKind::Literal(Literal::Char(c));
        }
    }
}

/// Rewrite an `int` literal to the narrower type its context expects.
/// Method arguments of type `byte` and `short` need an explicit cast;
/// assignment contexts accept the constant as is.
fn narrow_literal(expr: &mut Expr, expected: &JvmType, invocation: bool) {
    let value = match expr.kind {
        ExprKind::Literal(Literal::Int { value, .. }) => value,
        ExprKind::Ternary { .. } if *expected == JvmType::Boolean => {
            if let ExprKind::Ternary {
                then_expr, else_expr, ..
            } = &mut expr.kind
            {
                narrow_literal(then_expr, expected, invocation);
                narrow_literal(else_expr, expected, invocation);
            }
            return;
        }
        _ => return,
    };
    match expected {
        JvmType::Boolean if value == 0 || value == 1 => {
            expr.kind = ExprKind::Literal(Literal::Boolean(value == 1));
        }
        JvmType::Char => {
            if let Ok(c) = u16::try_from(value) {
                expr.kind = ExprKind::Literal(Literal::Char(c));
            }
        }
        JvmType::Byte | JvmType::Short if invocation => {
            let line = expr.line;
            let literal = std::mem::replace(expr, Expr::literal(Literal::Null, line));
            *expr = Expr::new(
                ExprKind::Cast {
                    ty: expected.clone(),
                    operand: literal.boxed(),
                },
                line,
            );
        }
        _ => {}
    }
}

/// `b == 0` is `!b`, `b != 0` is `b`, and the same for comparisons with
/// `true` or `false`, when `b` is a boolean.
fn boolean_comparison(expr: &Expr) -> Option<Expr> {
    let (op, left, right) = match &expr.kind {
        ExprKind::Compare { op, left, right } => (*op, left, right),
        _ => return None,
    };
    if !left.is_boolean() {
        return None;
    }
    let truth = match &right.kind {
        ExprKind::Literal(Literal::Int { value: 0, .. }) | ExprKind::Literal(Literal::Boolean(false)) => false,
        ExprKind::Literal(Literal::Int { value: 1, .. }) | ExprKind::Literal(Literal::Boolean(true)) => true,
        _ => return None,
    };
    let keep = match op {
        CompareOp::Eq => truth,
        CompareOp::Ne => !truth,
        _ => return None,
    };
    let mut value = (**left).clone();
    if value.line.is_none() {
        value.line = expr.line;
    }
    Some(if keep { value } else { value.negate() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompile::expr::LocalRef;
    use crate::decompile::local_variables::LocalFlags;

    fn index_of(arg: Expr) -> Expr {
        Expr::new(
            ExprKind::Invoke {
                kind: InvokeKind::Virtual,
                object: Some(Expr::literal(Literal::String("abc".into()), None).boxed()),
                class_name: "java/lang/String".into(),
                name: "indexOf".into(),
                descriptor: "(I)I".into(),
                args: vec![arg],
            },
            Some(7),
        )
    }

    fn run(stmt: StructuredStmt, vars: &[LocalVariable], ret: JvmType) -> (StructuredStmt, Vec<Warning>) {
        let mut body = vec![stmt];
        let ctx = TypeContext {
            method: "m()V",
            return_type: &ret,
            vars,
            infer_char_literals: true,
        };
        let warnings = infer_types(&mut body, &ctx);
        (body.remove(0), warnings)
    }

    fn simple(kind: StmtKind) -> StructuredStmt {
        StructuredStmt::Simple(Stmt::new(kind, Some(7)))
    }

    fn first_arg(stmt: &StructuredStmt) -> &Expr {
        match stmt {
            StructuredStmt::Simple(Stmt {
                kind: StmtKind::Return(Some(Expr {
                    kind: ExprKind::Invoke { args, .. },
                    ..
                })),
                ..
            }) => &args[0],
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_index_of_bipush_is_char() {
        let arg = Expr::literal(
            Literal::Int {
                value: 98,
                pushed_by: Some(PushForm::Bipush),
            },
            None,
        );
        let (stmt, warnings) = run(simple(StmtKind::Return(Some(index_of(arg)))), &[], JvmType::Int);
        assert_eq!(first_arg(&stmt).kind, ExprKind::Literal(Literal::Char(98)));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_index_of_local_stays_int() {
        let mut local = LocalRef::new(1, 3, JvmType::Int);
        local.var = Some(0);
        local.name = "x".into();
        let vars = [LocalVariable {
            slot: 1,
            start_pc: 0,
            length: 10,
            name_index: None,
            signature_index: None,
            name: "x".into(),
            ty: JvmType::Int,
            signature: None,
            flags: LocalFlags::empty(),
            origin: LocalOrigin::Table,
        }];
        let arg = Expr::new(ExprKind::Local(local), None);
        let (stmt, _) = run(simple(StmtKind::Return(Some(index_of(arg)))), &vars, JvmType::Int);
        assert_eq!(first_arg(&stmt).ty(), JvmType::Int);
    }

    #[test]
    fn test_iconst_argument_stays_int() {
        let arg = Expr::literal(
            Literal::Int {
                value: 3,
                pushed_by: Some(PushForm::Iconst),
            },
            None,
        );
        let (stmt, _) = run(simple(StmtKind::Return(Some(index_of(arg)))), &[], JvmType::Int);
        assert_eq!(first_arg(&stmt).int_value(), Some(3));
    }

    #[test]
    fn test_boolean_return_and_comparison() {
        let (stmt, _) = run(
            simple(StmtKind::Return(Some(Expr::literal(Literal::int(1), None)))),
            &[],
            JvmType::Boolean,
        );
        assert_eq!(
            stmt,
            simple(StmtKind::Return(Some(Expr::literal(Literal::Boolean(true), None))))
        );

        let flag = Expr::new(
            ExprKind::Local(LocalRef {
                slot: 1,
                pc: 0,
                name: "flag".into(),
                ty: JvmType::Boolean,
                var: None,
            }),
            Some(3),
        );
        let cond = Expr::new(
            ExprKind::Compare {
                op: CompareOp::Eq,
                left: flag.clone().boxed(),
                right: Expr::literal(Literal::int(0), None).boxed(),
            },
            Some(3),
        );
        let (stmt, _) = run(
            StructuredStmt::While {
                condition: cond,
                body: vec![],
            },
            &[],
            JvmType::Void,
        );
        match stmt {
            StructuredStmt::While { condition, .. } => {
                assert_eq!(condition.kind, ExprKind::Not(flag.boxed()))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_inferred_int_local_into_char_parameter_warns() {
        let mut local = LocalRef::new(2, 5, JvmType::Int);
        local.var = Some(0);
        local.name = "i2".into();
        let vars = [LocalVariable {
            slot: 2,
            start_pc: 0,
            length: 10,
            name_index: None,
            signature_index: None,
            name: "i2".into(),
            ty: JvmType::Int,
            signature: None,
            flags: LocalFlags::empty(),
            origin: LocalOrigin::Inferred,
        }];
        let call = Expr::new(
            ExprKind::Invoke {
                kind: InvokeKind::Virtual,
                object: Some(Expr::new(ExprKind::This, None).boxed()),
                class_name: "Foo".into(),
                name: "put".into(),
                descriptor: "(C)V".into(),
                args: vec![Expr::new(ExprKind::Local(local), None)],
            },
            Some(9),
        );
        let (_, warnings) = run(simple(StmtKind::Expr(call)), &vars, JvmType::Void);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::TypeInferenceUncertain);
        assert_eq!(warnings[0].method, "m()V");
    }
}
