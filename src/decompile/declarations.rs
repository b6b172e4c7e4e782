//! Placement of local variable declarations.
//!
//! A local is declared in the innermost statement list that contains all of
//! its uses. When the first statement there that touches the variable is a
//! plain assignment to it, the assignment becomes the declaration; otherwise
//! a bare declaration is hoisted in front of that statement.

use std::collections::BTreeMap;

use super::expr::{Expr, ExprKind, LocalRef, Stmt, StmtKind};
use super::local_variables::{LocalFlags, LocalVariable};
use super::structured_types::StructuredStmt;
use super::visitor::{walk_expr, walk_statement, Visitor};

/// Insert declarations for every variable in `vars` that is used in `body`
/// and not already declared by its enclosing construct (parameters, catch
/// clauses, enhanced for). Sets [`LocalFlags::DECLARED`] on each variable.
pub fn place_declarations(body: &mut Vec<StructuredStmt>, vars: &mut [LocalVariable]) {
    let mut structural = StructuralVars::default();
    for stmt in body.iter() {
        structural.visit_statement(stmt);
    }
    for idx in structural.vars {
        if let Some(var) = vars.get_mut(idx) {
            var.flags |= LocalFlags::DECLARED;
        }
    }

    let pending: Vec<usize> = vars
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.flags.contains(LocalFlags::DECLARED))
        .map(|(idx, _)| idx)
        .collect();
    place_in_list(body, &pending, vars);
}

fn place_in_list(list: &mut Vec<StructuredStmt>, pending: &[usize], vars: &mut [LocalVariable]) {
    let counts: Vec<BTreeMap<usize, usize>> = list.iter().map(|s| count_uses(std::slice::from_ref(s))).collect();

    let mut here: Vec<(usize, usize)> = Vec::new();
    let mut nested: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
    for &var in pending {
        let using: Vec<usize> = (0..list.len()).filter(|&i| counts[i].contains_key(&var)).collect();
        let first = match using.first() {
            Some(&first) => first,
            None => continue,
        };
        if using.len() == 1 {
            let total = counts[first][&var];
            let inner = scoped_lists(&list[first])
                .iter()
                .position(|l| count_uses(l).get(&var) == Some(&total));
            if let Some(inner) = inner {
                nested.entry((first, inner)).or_default().push(var);
                continue;
            }
        }
        here.push((first, var));
    }

    for ((stmt_idx, list_idx), vars_inside) in nested {
        if let Some(inner) = scoped_lists_mut(&mut list[stmt_idx]).into_iter().nth(list_idx) {
            place_in_list(inner, &vars_inside, vars);
        }
    }

    // Later positions first so earlier indices stay valid.
    here.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    let mut group_start = 0;
    while group_start < here.len() {
        let at = here[group_start].0;
        let group_end = here[group_start..]
            .iter()
            .position(|(idx, _)| *idx != at)
            .map_or(here.len(), |n| group_start + n);
        let mut hoisted = Vec::new();
        for &(_, var) in &here[group_start..group_end] {
            if !declare_at_assignment(&mut list[at], var) {
                hoisted.push(StructuredStmt::Declaration {
                    var: declared_ref(&vars[var], var),
                    init: None,
                });
            }
            vars[var].flags |= LocalFlags::DECLARED;
        }
        list.splice(at..at, hoisted);
        group_start = group_end;
    }
}

/// Statement lists that open a scope a declaration may be placed in. The
/// init and update parts of a `for` are not among them.
fn scoped_lists(stmt: &StructuredStmt) -> Vec<&Vec<StructuredStmt>> {
    match stmt {
        StructuredStmt::For { body, .. } => vec![body],
        StructuredStmt::Labeled { body, .. } => scoped_lists(body),
        other => other.child_lists(),
    }
}

fn scoped_lists_mut(stmt: &mut StructuredStmt) -> Vec<&mut Vec<StructuredStmt>> {
    match stmt {
        StructuredStmt::For { body, .. } => vec![body],
        StructuredStmt::Labeled { body, .. } => scoped_lists_mut(body),
        other => other.child_lists_mut(),
    }
}

/// Turn `var = value` (directly, or as the first `for` init) into the
/// variable's declaration.
fn declare_at_assignment(stmt: &mut StructuredStmt, var: usize) -> bool {
    match stmt {
        StructuredStmt::Simple(simple) => match assignment_of(simple, var) {
            Some((target, value)) => {
                *stmt = StructuredStmt::Declaration {
                    var: target,
                    init: Some(value),
                };
                true
            }
            None => false,
        },
        StructuredStmt::For { init, .. } => match init.first_mut() {
            Some(first) => declare_at_assignment(first, var),
            None => false,
        },
        StructuredStmt::Labeled { body, .. } => {
            matches!(**body, StructuredStmt::For { .. }) && declare_at_assignment(body, var)
        }
        _ => false,
    }
}

fn assignment_of(stmt: &Stmt, var: usize) -> Option<(LocalRef, Expr)> {
    let (target, value) = match &stmt.kind {
        StmtKind::Expr(Expr {
            kind: ExprKind::Assign { target, value },
            ..
        }) => (target, value),
        _ => return None,
    };
    let local = target.as_local()?;
    if local.var != Some(var) || count_in_expr(value).contains_key(&var) {
        return None;
    }
    let mut value = (**value).clone();
    if value.line.is_none() {
        value.line = stmt.line;
    }
    Some((local.clone(), value))
}

fn declared_ref(var: &LocalVariable, idx: usize) -> LocalRef {
    LocalRef {
        slot: var.slot,
        pc: var.start_pc,
        name: var.name.clone(),
        ty: var.ty.clone(),
        var: Some(idx),
    }
}

#[derive(Default)]
struct UseCounter {
    counts: BTreeMap<usize, usize>,
}

impl Visitor for UseCounter {
    fn visit_local(&mut self, local: &LocalRef) {
        if let Some(var) = local.var {
            *self.counts.entry(var).or_default() += 1;
        }
    }
}

pub(super) fn count_uses(list: &[StructuredStmt]) -> BTreeMap<usize, usize> {
    let mut counter = UseCounter::default();
    for stmt in list {
        counter.visit_statement(stmt);
    }
    counter.counts
}

fn count_in_expr(expr: &Expr) -> BTreeMap<usize, usize> {
    let mut counter = UseCounter::default();
    walk_expr(&mut counter, expr);
    counter.counts
}

/// Variables whose declaration is part of a catch clause or enhanced for.
#[derive(Default)]
struct StructuralVars {
    vars: Vec<usize>,
}

impl Visitor for StructuralVars {
    fn visit_statement(&mut self, stmt: &StructuredStmt) {
        match stmt {
            StructuredStmt::ForEach { var, .. } => self.vars.extend(var.var),
            StructuredStmt::TryCatch { catches, .. } => {
                self.vars.extend(catches.iter().filter_map(|c| c.var.as_ref()).filter_map(|v| v.var));
            }
            _ => {}
        }
        walk_statement(self, stmt);
    }
}
