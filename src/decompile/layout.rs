//! Source line assignment for statements.
//!
//! The line of an expression is the line of its first evaluated operand:
//! the array of an array access, the left side of an assignment or binary
//! operator, the object of an instance call, field access or `instanceof`,
//! the test of a ternary, and the operand of a postfix increment. Prefix
//! increments and all other nodes carry their own line. A statement takes
//! the smallest line among its expressions; a statement with none takes
//! the line of the statement before it in the same block.

use super::expr::{Expr, ExprKind};
use super::structured_types::StructuredStmt;

/// Lines of every statement of a method body, in tree order: a statement
/// comes before the statements nested in it, and nested lists follow
/// [`StructuredStmt::child_lists`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineLayout {
    lines: Vec<Option<u32>>,
}

impl LineLayout {
    pub fn compute(body: &[StructuredStmt]) -> Self {
        let mut lines = Vec::new();
        layout_list(body, &mut lines);
        Self { lines }
    }

    pub fn lines(&self) -> &[Option<u32>] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn first_line(&self) -> Option<u32> {
        self.lines.iter().flatten().min().copied()
    }

    pub fn last_line(&self) -> Option<u32> {
        self.lines.iter().flatten().max().copied()
    }
}

fn layout_list(list: &[StructuredStmt], lines: &mut Vec<Option<u32>>) {
    let mut previous = None;
    for stmt in list {
        let line = statement_line(stmt).or(previous);
        lines.push(line);
        previous = line;
        for child in stmt.child_lists() {
            layout_list(child, lines);
        }
    }
}

/// A statement's own line, before inheriting from its predecessor.
pub fn statement_line(stmt: &StructuredStmt) -> Option<u32> {
    let from_exprs = stmt.own_exprs().into_iter().filter_map(expression_line).min();
    match stmt {
        StructuredStmt::Simple(simple) => from_exprs.or(simple.line),
        StructuredStmt::Declaration { .. } => from_exprs,
        // Compound statements without a head expression start where their
        // first nested statement does.
        _ => from_exprs.or_else(|| {
            stmt.child_lists()
                .into_iter()
                .flat_map(|l| l.iter())
                .find_map(statement_line)
        }),
    }
}

/// The line of an expression per the first-evaluated-operand rule.
pub fn expression_line(expr: &Expr) -> Option<u32> {
    let leftmost = match &expr.kind {
        ExprKind::ArrayLoad { array, .. } => expression_line(array),
        ExprKind::Assign { target, .. } => expression_line(target),
        ExprKind::Binary { left, .. }
        | ExprKind::Compare { left, .. }
        | ExprKind::ValueCompare { left, .. } => expression_line(left),
        // `++x` sits on its own line while `x += 5` starts at `x`; postfix is the reverse.
        ExprKind::Increment { target, delta, prefix } => {
            if (*delta == 1 || *delta == -1) == *prefix {
                None
            } else {
                expression_line(target)
            }
        }
        ExprKind::InstanceOf { operand, .. } => expression_line(operand),
        ExprKind::Invoke {
            object: Some(object),
            ..
        }
        | ExprKind::Field {
            object: Some(object),
            ..
        } => expression_line(object),
        ExprKind::Ternary { condition, .. } => expression_line(condition),
        ExprKind::StringConcat(parts) => parts.first().and_then(expression_line),
        _ => None,
    };
    leftmost.or(expr.line)
}
