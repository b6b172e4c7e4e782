//! Rewrites of compiler-generated idioms back into source form.

use std::collections::BTreeMap;

use tracing::trace;

use crate::code_attribute::InvokeKind;
use crate::constant_info::WellKnown;

use super::declarations::count_uses;
use super::descriptor::JvmType;
use super::expr::{Expr, ExprKind, Literal, Stmt, StmtKind};
use super::local_variables::{LocalFlags, LocalOrigin, LocalVariable};
use super::structured_types::StructuredStmt;
use super::visitor::{walk_body_mut, walk_expr_mut, VisitorMut};

#[derive(Clone, Debug)]
pub struct DesugarContext<'a> {
    pub method_name: &'a str,
    pub super_class: Option<&'a str>,
    pub returns_void: bool,
    /// Fold `StringBuilder`/`StringBuffer` append chains into `+`.
    pub string_concat: bool,
}

/// Run every desugaring pass over a method body.
pub fn desugar(body: &mut Vec<StructuredStmt>, vars: &mut [LocalVariable], ctx: &DesugarContext<'_>) {
    if ctx.string_concat {
        walk_body_mut(&mut ConcatFolder, body);
    }
    inline_temporary_returns(body, vars);
    if ctx.returns_void {
        drop_trailing_return(body);
    }
    if ctx.method_name == WellKnown::InstanceConstructor.as_str() {
        drop_implicit_super_call(body, ctx.super_class);
    }
}

struct ConcatFolder;

impl VisitorMut for ConcatFolder {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        walk_expr_mut(self, expr);
        if let Some(parts) = concat_parts(expr) {
            trace!(parts = parts.len(), "folded string builder chain");
            expr.kind = ExprKind::StringConcat(parts);
        }
    }
}

fn is_builder(class_name: &str) -> bool {
    class_name == WellKnown::StringBuilder.as_str() || class_name == WellKnown::StringBuffer.as_str()
}

/// The operands of `new StringBuilder(..).append(a)...append(z).toString()`.
fn concat_parts(expr: &Expr) -> Option<Vec<Expr>> {
    let mut current = match &expr.kind {
        ExprKind::Invoke {
            kind: InvokeKind::Virtual,
            object: Some(object),
            class_name,
            name,
            args,
            ..
        } if is_builder(class_name) && name == WellKnown::ToString.as_str() && args.is_empty() => object,
        _ => return None,
    };
    let mut parts = Vec::new();
    loop {
        match &current.kind {
            ExprKind::Invoke {
                kind: InvokeKind::Virtual,
                object: Some(object),
                class_name,
                name,
                args,
                ..
            } if is_builder(class_name) && name == WellKnown::Append.as_str() && args.len() == 1 => {
                parts.push(args[0].clone());
                current = object;
            }
            ExprKind::New {
                class_name,
                descriptor,
                args,
            } if is_builder(class_name) => {
                match (descriptor.as_str(), args.as_slice()) {
                    ("()V", []) => {}
                    ("(Ljava/lang/String;)V", [initial]) => parts.push(unwrap_value_of(initial)),
                    ("(Ljava/lang/CharSequence;)V", [initial]) => parts.push(initial.clone()),
                    _ => return None,
                }
                break;
            }
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    parts.reverse();
    // `a + b` with neither side a String would be an addition.
    let leading_string = parts.iter().take(2).any(|p| p.ty() == JvmType::string());
    if !leading_string {
        parts.insert(0, Expr::literal(Literal::String(String::new()), expr.line));
    }
    Some(parts)
}

/// `String.valueOf(x)` as the builder's initial value is just `x`.
fn unwrap_value_of(expr: &Expr) -> Expr {
    match &expr.kind {
        ExprKind::Invoke {
            kind: InvokeKind::Static,
            class_name,
            name,
            args,
            ..
        } if class_name == WellKnown::JavaLangString.as_str()
            && name == WellKnown::ValueOf.as_str()
            && args.len() == 1 =>
        {
            args[0].clone()
        }
        _ => expr.clone(),
    }
}

/// `tmp = e; return tmp;` becomes `return e;` when `tmp` is a synthetic
/// variable used nowhere else.
fn inline_temporary_returns(body: &mut Vec<StructuredStmt>, vars: &mut [LocalVariable]) {
    let counts = count_uses(body);
    inline_in_list(body, vars, &counts);
}

fn inline_in_list(
    list: &mut Vec<StructuredStmt>,
    vars: &mut [LocalVariable],
    counts: &BTreeMap<usize, usize>,
) {
    for stmt in list.iter_mut() {
        for child in stmt.child_lists_mut() {
            inline_in_list(child, vars, counts);
        }
    }
    let mut i = 0;
    while i + 1 < list.len() {
        let folded = match (&list[i], &list[i + 1]) {
            (store, StructuredStmt::Simple(ret)) => temporary_return(store, ret, vars, counts),
            _ => None,
        };
        if let Some((var, stmt)) = folded {
            vars[var].flags |= LocalFlags::TO_BE_REMOVED;
            list.splice(i..i + 2, std::iter::once(StructuredStmt::Simple(stmt)));
        }
        i += 1;
    }
}

fn temporary_return(
    store: &StructuredStmt,
    ret: &Stmt,
    vars: &[LocalVariable],
    counts: &BTreeMap<usize, usize>,
) -> Option<(usize, Stmt)> {
    let returned = match &ret.kind {
        StmtKind::Return(Some(e)) => e.as_local()?.var?,
        _ => return None,
    };
    let (var, value, line) = match store {
        StructuredStmt::Declaration {
            var,
            init: Some(init),
        } => (var.var?, init, init.line),
        StructuredStmt::Simple(stmt) => {
            let (target, value) = stmt.as_assign()?;
            (target.as_local()?.var?, value, stmt.line)
        }
        _ => return None,
    };
    let synthetic = vars.get(var).map_or(false, |v| v.origin == LocalOrigin::Inferred);
    if var != returned || !synthetic || counts.get(&var) != Some(&2) {
        return None;
    }
    Some((var, Stmt::new(StmtKind::Return(Some(value.clone())), line.or(ret.line))))
}

fn drop_trailing_return(body: &mut Vec<StructuredStmt>) {
    let trailing = matches!(
        body.last(),
        Some(StructuredStmt::Simple(Stmt {
            kind: StmtKind::Return(None),
            ..
        }))
    );
    if trailing {
        body.pop();
    }
}

/// Drop a leading no-argument `super()` call.
fn drop_implicit_super_call(body: &mut Vec<StructuredStmt>, super_class: Option<&str>) {
    let implicit = match body.first() {
        Some(StructuredStmt::Simple(Stmt {
            kind: StmtKind::Expr(call),
            ..
        })) => match &call.kind {
            ExprKind::Invoke {
                kind: InvokeKind::Special,
                object: Some(object),
                class_name,
                name,
                args,
                ..
            } => {
                matches!(object.kind, ExprKind::This)
                    && name == WellKnown::InstanceConstructor.as_str()
                    && args.is_empty()
                    && Some(class_name.as_str()) == super_class
            }
            _ => false,
        },
        _ => false,
    };
    if implicit {
        body.remove(0);
    }
}
