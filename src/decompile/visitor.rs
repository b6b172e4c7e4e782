//! Traversal of the decompiled syntax tree.
//!
//! [`Visitor`] walks a tree by shared reference and [`VisitorMut`] rewrites
//! statements and expressions in place. Every method has a default that calls
//! the matching `walk_*` function, so an implementation overrides only the
//! nodes it cares about and calls `walk_*` itself to keep descending.

use super::expr::{Expr, ExprKind, LocalRef, Stmt, StmtKind};
use super::java_ast::{CompilationUnit, FieldDeclaration, MethodDeclaration, TypeDeclaration};
use super::structured_types::StructuredStmt;

/// Kind tag exposed by every node of the tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    CompilationUnit,
    TypeDeclaration,
    Field,
    Method,
    Statement,
    SimpleStatement,
    Expression,
}

pub trait Node {
    fn kind(&self) -> NodeKind;
    fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V);
}

pub trait Visitor {
    fn visit_compilation_unit(&mut self, unit: &CompilationUnit) {
        walk_compilation_unit(self, unit);
    }

    fn visit_type_declaration(&mut self, decl: &TypeDeclaration) {
        walk_type_declaration(self, decl);
    }

    fn visit_field(&mut self, field: &FieldDeclaration) {
        walk_field(self, field);
    }

    fn visit_method(&mut self, method: &MethodDeclaration) {
        walk_method(self, method);
    }

    fn visit_statement(&mut self, stmt: &StructuredStmt) {
        walk_statement(self, stmt);
    }

    fn visit_simple(&mut self, stmt: &Stmt) {
        walk_simple(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_local(&mut self, _local: &LocalRef) {}
}

pub fn walk_compilation_unit<V: Visitor + ?Sized>(visitor: &mut V, unit: &CompilationUnit) {
    visitor.visit_type_declaration(&unit.type_declaration);
}

pub fn walk_type_declaration<V: Visitor + ?Sized>(visitor: &mut V, decl: &TypeDeclaration) {
    for field in &decl.fields {
        visitor.visit_field(field);
    }
    for method in &decl.methods {
        visitor.visit_method(method);
    }
}

pub fn walk_field<V: Visitor + ?Sized>(visitor: &mut V, field: &FieldDeclaration) {
    if let Some(init) = &field.initializer {
        visitor.visit_expr(init);
    }
}

pub fn walk_method<V: Visitor + ?Sized>(visitor: &mut V, method: &MethodDeclaration) {
    if let Some(body) = &method.body {
        for stmt in &body.statements {
            visitor.visit_statement(stmt);
        }
    }
}

pub fn walk_statement<V: Visitor + ?Sized>(visitor: &mut V, stmt: &StructuredStmt) {
    match stmt {
        StructuredStmt::Simple(simple) => visitor.visit_simple(simple),
        StructuredStmt::Declaration { var, init } => {
            visitor.visit_local(var);
            if let Some(init) = init {
                visitor.visit_expr(init);
            }
        }
        StructuredStmt::ForEach { var, iterable, body } => {
            visitor.visit_local(var);
            visitor.visit_expr(iterable);
            for s in body {
                visitor.visit_statement(s);
            }
        }
        StructuredStmt::For {
            init,
            condition,
            update,
            body,
        } => {
            // Source order: init, condition, update, body.
            for s in init {
                visitor.visit_statement(s);
            }
            visitor.visit_expr(condition);
            for s in update.iter().chain(body) {
                visitor.visit_statement(s);
            }
        }
        StructuredStmt::DoWhile { body, condition } => {
            for s in body {
                visitor.visit_statement(s);
            }
            visitor.visit_expr(condition);
        }
        StructuredStmt::TryCatch {
            try_body,
            catches,
            finally_body,
        } => {
            for s in try_body {
                visitor.visit_statement(s);
            }
            for catch in catches {
                if let Some(var) = &catch.var {
                    visitor.visit_local(var);
                }
                for s in &catch.body {
                    visitor.visit_statement(s);
                }
            }
            for s in finally_body.iter().flatten() {
                visitor.visit_statement(s);
            }
        }
        StructuredStmt::Labeled { body, .. } => visitor.visit_statement(body),
        other => {
            for expr in other.own_exprs() {
                visitor.visit_expr(expr);
            }
            for list in other.child_lists() {
                for s in list {
                    visitor.visit_statement(s);
                }
            }
        }
    }
}

pub fn walk_simple<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    if let Some(expr) = stmt.expr() {
        visitor.visit_expr(expr);
    }
}

/// Visits operands in evaluation order.
pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Local(local) => visitor.visit_local(local),
        ExprKind::Literal(_)
        | ExprKind::This
        | ExprKind::CaughtException(_)
        | ExprKind::UninitNew(_)
        | ExprKind::Unresolved(_) => {}
        ExprKind::Binary { left, right, .. }
        | ExprKind::Compare { left, right, .. }
        | ExprKind::ValueCompare { left, right, .. }
        | ExprKind::ArrayLoad {
            array: left,
            index: right,
        }
        | ExprKind::Assign {
            target: left,
            value: right,
        } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        ExprKind::Not(inner)
        | ExprKind::Neg(inner)
        | ExprKind::ArrayLength(inner)
        | ExprKind::Cast { operand: inner, .. }
        | ExprKind::InstanceOf { operand: inner, .. }
        | ExprKind::Increment { target: inner, .. } => visitor.visit_expr(inner),
        ExprKind::Field { object, .. } => {
            if let Some(object) = object {
                visitor.visit_expr(object);
            }
        }
        ExprKind::Invoke { object, args, .. } => {
            if let Some(object) = object {
                visitor.visit_expr(object);
            }
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        ExprKind::InvokeDynamic { args, .. } | ExprKind::New { args, .. } => {
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        ExprKind::NewArray { dimensions, .. } => {
            for dim in dimensions {
                visitor.visit_expr(dim);
            }
        }
        ExprKind::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            visitor.visit_expr(condition);
            visitor.visit_expr(then_expr);
            visitor.visit_expr(else_expr);
        }
        ExprKind::StringConcat(parts) => {
            for part in parts {
                visitor.visit_expr(part);
            }
        }
    }
}

/// In-place rewriting of statement and expression trees.
pub trait VisitorMut {
    fn visit_statement_mut(&mut self, stmt: &mut StructuredStmt) {
        walk_statement_mut(self, stmt);
    }

    fn visit_simple_mut(&mut self, stmt: &mut Stmt) {
        walk_simple_mut(self, stmt);
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        walk_expr_mut(self, expr);
    }

    fn visit_local_mut(&mut self, _local: &mut LocalRef) {}
}

pub fn walk_body_mut<V: VisitorMut + ?Sized>(visitor: &mut V, body: &mut [StructuredStmt]) {
    for stmt in body {
        visitor.visit_statement_mut(stmt);
    }
}

pub fn walk_statement_mut<V: VisitorMut + ?Sized>(visitor: &mut V, stmt: &mut StructuredStmt) {
    match stmt {
        StructuredStmt::Simple(simple) => return visitor.visit_simple_mut(simple),
        StructuredStmt::Declaration { var, init } => {
            visitor.visit_local_mut(var);
            if let Some(init) = init {
                visitor.visit_expr_mut(init);
            }
        }
        StructuredStmt::If { condition, .. }
        | StructuredStmt::While { condition, .. }
        | StructuredStmt::DoWhile { condition, .. }
        | StructuredStmt::For { condition, .. } => visitor.visit_expr_mut(condition),
        StructuredStmt::ForEach { var, iterable, .. } => {
            visitor.visit_local_mut(var);
            visitor.visit_expr_mut(iterable);
        }
        StructuredStmt::Switch { key, .. } => visitor.visit_expr_mut(key),
        StructuredStmt::Synchronized { object, .. } => visitor.visit_expr_mut(object),
        StructuredStmt::TryCatch { catches, .. } => {
            for catch in catches.iter_mut() {
                if let Some(var) = &mut catch.var {
                    visitor.visit_local_mut(var);
                }
            }
        }
        StructuredStmt::Labeled { body, .. } => return visitor.visit_statement_mut(body),
        _ => {}
    }
    for list in stmt.child_lists_mut() {
        walk_body_mut(visitor, list);
    }
}

pub fn walk_simple_mut<V: VisitorMut + ?Sized>(visitor: &mut V, stmt: &mut Stmt) {
    match &mut stmt.kind {
        StmtKind::Expr(e)
        | StmtKind::Throw(e)
        | StmtKind::MonitorEnter(e)
        | StmtKind::MonitorExit(e)
        | StmtKind::Return(Some(e)) => visitor.visit_expr_mut(e),
        StmtKind::Return(None) => {}
    }
}

pub fn walk_expr_mut<V: VisitorMut + ?Sized>(visitor: &mut V, expr: &mut Expr) {
    match &mut expr.kind {
        ExprKind::Local(local) => visitor.visit_local_mut(local),
        ExprKind::Literal(_)
        | ExprKind::This
        | ExprKind::CaughtException(_)
        | ExprKind::UninitNew(_)
        | ExprKind::Unresolved(_) => {}
        ExprKind::Binary { left, right, .. }
        | ExprKind::Compare { left, right, .. }
        | ExprKind::ValueCompare { left, right, .. }
        | ExprKind::ArrayLoad {
            array: left,
            index: right,
        }
        | ExprKind::Assign {
            target: left,
            value: right,
        } => {
            visitor.visit_expr_mut(left);
            visitor.visit_expr_mut(right);
        }
        ExprKind::Not(inner)
        | ExprKind::Neg(inner)
        | ExprKind::ArrayLength(inner)
        | ExprKind::Cast { operand: inner, .. }
        | ExprKind::InstanceOf { operand: inner, .. }
        | ExprKind::Increment { target: inner, .. } => visitor.visit_expr_mut(inner),
        ExprKind::Field { object, .. } => {
            if let Some(object) = object {
                visitor.visit_expr_mut(object);
            }
        }
        ExprKind::Invoke { object, args, .. } => {
            if let Some(object) = object {
                visitor.visit_expr_mut(object);
            }
            for arg in args {
                visitor.visit_expr_mut(arg);
            }
        }
        ExprKind::InvokeDynamic { args, .. }
        | ExprKind::New { args, .. }
        | ExprKind::StringConcat(args)
        | ExprKind::NewArray {
            dimensions: args, ..
        } => {
            for arg in args {
                visitor.visit_expr_mut(arg);
            }
        }
        ExprKind::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            visitor.visit_expr_mut(condition);
            visitor.visit_expr_mut(then_expr);
            visitor.visit_expr_mut(else_expr);
        }
    }
}

impl Node for CompilationUnit {
    fn kind(&self) -> NodeKind {
        NodeKind::CompilationUnit
    }

    fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        visitor.visit_compilation_unit(self);
    }
}

impl Node for TypeDeclaration {
    fn kind(&self) -> NodeKind {
        NodeKind::TypeDeclaration
    }

    fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        visitor.visit_type_declaration(self);
    }
}

impl Node for FieldDeclaration {
    fn kind(&self) -> NodeKind {
        NodeKind::Field
    }

    fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        visitor.visit_field(self);
    }
}

impl Node for MethodDeclaration {
    fn kind(&self) -> NodeKind {
        NodeKind::Method
    }

    fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        visitor.visit_method(self);
    }
}

impl Node for StructuredStmt {
    fn kind(&self) -> NodeKind {
        NodeKind::Statement
    }

    fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        visitor.visit_statement(self);
    }
}

impl Node for Stmt {
    fn kind(&self) -> NodeKind {
        NodeKind::SimpleStatement
    }

    fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        visitor.visit_simple(self);
    }
}

impl Node for Expr {
    fn kind(&self) -> NodeKind {
        NodeKind::Expression
    }

    fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        visitor.visit_expr(self);
    }
}

/// Clears source positions and variable bindings so that two copies of the
/// same code compare equal.
pub struct PositionEraser;

impl VisitorMut for PositionEraser {
    fn visit_simple_mut(&mut self, stmt: &mut Stmt) {
        stmt.line = None;
        walk_simple_mut(self, stmt);
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        expr.line = None;
        walk_expr_mut(self, expr);
    }

    fn visit_local_mut(&mut self, local: &mut LocalRef) {
        local.pc = 0;
        local.var = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompile::descriptor::JvmType;
    use crate::decompile::expr::{BinaryOp, Literal};

    #[derive(Default)]
    struct LocalCollector {
        slots: Vec<u16>,
    }

    impl Visitor for LocalCollector {
        fn visit_local(&mut self, local: &LocalRef) {
            self.slots.push(local.slot);
        }
    }

    fn local(slot: u16, pc: u32) -> Expr {
        Expr::new(ExprKind::Local(LocalRef::new(slot, pc, JvmType::Int)), Some(7))
    }

    #[test]
    fn test_walk_order() {
        let sum = Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Add,
                left: local(1, 0).boxed(),
                right: local(2, 0).boxed(),
            },
            Some(7),
        );
        let stmt = StructuredStmt::For {
            init: vec![StructuredStmt::Simple(Stmt::new(
                StmtKind::Expr(local(3, 0)),
                None,
            ))],
            condition: sum,
            update: vec![],
            body: vec![StructuredStmt::Simple(Stmt::new(
                StmtKind::Return(Some(local(4, 0))),
                None,
            ))],
        };
        let mut collector = LocalCollector::default();
        stmt.accept(&mut collector);
        assert_eq!(collector.slots, vec![3, 1, 2, 4]);
        assert_eq!(stmt.kind(), NodeKind::Statement);
    }

    #[test]
    fn test_position_eraser() {
        let mut a = StructuredStmt::Simple(Stmt::new(StmtKind::Expr(local(1, 4)), Some(3)));
        let mut b = StructuredStmt::Simple(Stmt::new(StmtKind::Expr(local(1, 20)), Some(9)));
        assert_ne!(a, b);
        PositionEraser.visit_statement_mut(&mut a);
        PositionEraser.visit_statement_mut(&mut b);
        assert_eq!(a, b);
        let mut lit = Expr::literal(Literal::int(1), Some(2));
        PositionEraser.visit_expr_mut(&mut lit);
        assert_eq!(lit.line, None);
    }
}
