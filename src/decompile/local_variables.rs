//! Local variable recovery: debug tables when present, liveness runs of
//! slot uses otherwise, and binding every local reference in a method body
//! to one variable.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::attribute_info::LocalVariableTableItem;
use crate::constant_info::ConstantPool;

use super::descriptor::{parse_type_descriptor, JvmType};
use super::expr::{Expr, ExprKind, LocalRef};
use super::structured_types::StructuredStmt;
use super::visitor::{walk_body_mut, walk_expr, walk_statement, Visitor, VisitorMut};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct LocalFlags(u8);

bitflags! {
    impl LocalFlags: u8 {
        const EXCEPTION_OR_RETURN_ADDRESS = 0x01; // Holds a caught exception or a jsr return address.
        const DECLARED = 0x02;                    // A declaration has been placed.
        const FINAL = 0x04;                       // Declared final.
        const TO_BE_REMOVED = 0x08;               // Range collapsed; dropped before binding.
    }
}

/// Where a variable's range came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocalOrigin {
    Parameter,
    Table,
    Inferred,
}

/// A local variable: one slot over the pc range `[start_pc, start_pc + length)`.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalVariable {
    pub slot: u16,
    pub start_pc: u32,
    pub length: u32,
    pub name_index: Option<u16>,
    pub signature_index: Option<u16>,
    pub name: String,
    pub ty: JvmType,
    /// Generic signature from the LocalVariableTypeTable.
    pub signature: Option<String>,
    pub flags: LocalFlags,
    pub origin: LocalOrigin,
}

impl LocalVariable {
    pub fn end_pc(&self) -> u32 {
        self.start_pc.saturating_add(self.length)
    }

    pub fn covers(&self, pc: u32) -> bool {
        self.start_pc <= pc && pc < self.end_pc()
    }

    pub fn overlaps(&self, other: &LocalVariable) -> bool {
        self.slot == other.slot && self.start_pc < other.end_pc() && other.start_pc < self.end_pc()
    }

    pub fn is_parameter(&self) -> bool {
        self.origin == LocalOrigin::Parameter
    }

    fn order_key(&self) -> (&str, u32, u32, u16) {
        (&self.name, self.length, self.start_pc, self.slot)
    }
}

/// What the method declaration says about one parameter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterHint {
    pub name: Option<String>,
    pub is_final: bool,
}

pub struct LocalContext<'a> {
    pub pool: &'a ConstantPool,
    pub table: Vec<&'a LocalVariableTableItem>,
    pub type_table: Vec<&'a LocalVariableTableItem>,
    pub parameters: &'a [JvmType],
    /// From the MethodParameters attribute, one per declared parameter.
    pub parameter_hints: &'a [ParameterHint],
    pub is_static: bool,
    pub code_length: u32,
    /// Merge overlapping table rows of the same name and type instead of
    /// truncating the earlier one.
    pub merge_compatible: bool,
}

/// Recover the method's local variables and bind every [`LocalRef`] in
/// `body` to one of them, filling in its name, type and index.
///
/// The returned list is ordered by (name, length, start_pc, slot) and
/// ranges sharing a slot never overlap.
pub fn resolve_local_variables(body: &mut [StructuredStmt], ctx: &LocalContext<'_>) -> Vec<LocalVariable> {
    let mut vars = parameters(ctx);
    vars.extend(table_variables(ctx));

    let mut uses = UseCollector::default();
    for stmt in body.iter() {
        uses.visit_statement(stmt);
    }
    let uncovered: Vec<&SlotUse> = uses
        .uses
        .iter()
        .filter(|u| !vars.iter().any(|v| v.slot == u.slot && v.covers(u.pc)))
        .collect();
    vars.extend(inferred_variables(&uncovered));

    make_disjoint(&mut vars);
    rename_conflicts(&mut vars);
    vars.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
    trace!(count = vars.len(), "resolved local variables");

    let mut binder = Binder { vars: &mut vars };
    walk_body_mut(&mut binder, body);
    vars
}

fn parameters(ctx: &LocalContext<'_>) -> Vec<LocalVariable> {
    let mut slot = u16::from(!ctx.is_static);
    let mut vars = Vec::with_capacity(ctx.parameters.len());
    for (idx, ty) in ctx.parameters.iter().enumerate() {
        let hint = ctx.parameter_hints.get(idx);
        let table_row = ctx.table.iter().find(|row| row.index == slot && row.start_pc == 0);
        let name = hint
            .and_then(|h| h.name.clone())
            .or_else(|| table_row.and_then(|row| ctx.pool.utf8(row.name_index)).map(String::from))
            .unwrap_or_else(|| format!("param{}", idx + 1));
        let mut flags = LocalFlags::DECLARED;
        if hint.map_or(false, |h| h.is_final) {
            flags |= LocalFlags::FINAL;
        }
        vars.push(LocalVariable {
            slot,
            start_pc: 0,
            length: ctx.code_length.max(1),
            name_index: table_row.map(|row| row.name_index),
            signature_index: None,
            name,
            ty: ty.clone(),
            signature: table_row.and_then(|row| generic_signature(ctx, row)),
            flags,
            origin: LocalOrigin::Parameter,
        });
        slot += if ty.is_wide() { 2 } else { 1 };
    }
    vars
}

fn generic_signature(ctx: &LocalContext<'_>, row: &LocalVariableTableItem) -> Option<String> {
    ctx.type_table
        .iter()
        .find(|t| t.index == row.index && t.start_pc == row.start_pc && t.length == row.length)
        .and_then(|t| ctx.pool.utf8(t.descriptor_index))
        .map(String::from)
}

/// LocalVariableTable rows, with overlaps on a slot merged when the rows
/// agree on name and type and truncated otherwise.
fn table_variables(ctx: &LocalContext<'_>) -> Vec<LocalVariable> {
    let param_end = ctx
        .parameters
        .iter()
        .fold(u16::from(!ctx.is_static), |slot, ty| slot + if ty.is_wide() { 2 } else { 1 });
    let mut rows: Vec<LocalVariable> = ctx
        .table
        .iter()
        // `this` and the parameters are described by the signature.
        .filter(|row| !(row.index < param_end && row.start_pc == 0))
        .map(|row| {
            let signature_index = ctx
                .type_table
                .iter()
                .find(|t| t.index == row.index && t.start_pc == row.start_pc)
                .map(|t| t.descriptor_index);
            LocalVariable {
                slot: row.index,
                start_pc: u32::from(row.start_pc),
                length: u32::from(row.length),
                name_index: Some(row.name_index),
                signature_index,
                name: ctx.pool.utf8(row.name_index).unwrap_or_default().to_string(),
                ty: ctx
                    .pool
                    .utf8(row.descriptor_index)
                    .and_then(parse_type_descriptor)
                    .unwrap_or(JvmType::Unknown),
                signature: generic_signature(ctx, row),
                flags: LocalFlags::empty(),
                origin: LocalOrigin::Table,
            }
        })
        .collect();
    rows.sort_by_key(|v| (v.slot, v.start_pc, v.length));

    let mut merged: Vec<LocalVariable> = Vec::with_capacity(rows.len());
    for row in rows {
        match merged.last_mut() {
            Some(prev) if prev.overlaps(&row) => {
                if ctx.merge_compatible && prev.name == row.name && prev.ty == row.ty {
                    let end = prev.end_pc().max(row.end_pc());
                    prev.length = end - prev.start_pc;
                    continue;
                }
                prev.length = row.start_pc - prev.start_pc;
                merged.push(row);
            }
            _ => merged.push(row),
        }
    }
    merged.retain(|v| v.length > 0);
    merged
}

/// One read or write of a slot found in the method body.
#[derive(Clone, Debug)]
struct SlotUse {
    slot: u16,
    pc: u32,
    ty: JvmType,
    /// Type of the stored value, for writes.
    stored: Option<JvmType>,
    caught: bool,
}

#[derive(Default)]
struct UseCollector {
    uses: Vec<SlotUse>,
}

impl UseCollector {
    fn record(&mut self, local: &LocalRef, stored: Option<JvmType>, caught: bool) {
        self.uses.push(SlotUse {
            slot: local.slot,
            pc: local.pc,
            ty: local.ty.clone(),
            stored,
            caught,
        });
    }
}

impl Visitor for UseCollector {
    fn visit_statement(&mut self, stmt: &StructuredStmt) {
        match stmt {
            StructuredStmt::TryCatch { catches, .. } => {
                for catch in catches {
                    if let Some(var) = &catch.var {
                        let ty = match catch.exception_types.as_slice() {
                            [single] => JvmType::Reference(single.clone()),
                            _ => JvmType::Reference("java/lang/Throwable".into()),
                        };
                        self.record(var, Some(ty), true);
                    }
                }
            }
            StructuredStmt::ForEach { var, iterable, .. } => {
                let element = iterable
                    .ty()
                    .element_type()
                    .cloned()
                    .unwrap_or_else(|| var.ty.clone());
                self.record(var, Some(element), false);
            }
            _ => {}
        }
        walk_statement(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Assign { target, value } = &expr.kind {
            if let ExprKind::Local(local) = &target.kind {
                let caught = matches!(value.kind, ExprKind::CaughtException(_));
                self.record(local, Some(value.ty()), caught);
                self.visit_expr(value);
                return;
            }
        }
        walk_expr(self, expr);
    }

    fn visit_local(&mut self, local: &LocalRef) {
        self.uses.push(SlotUse {
            slot: local.slot,
            pc: local.pc,
            ty: local.ty.clone(),
            stored: None,
            caught: false,
        });
    }
}

/// Storage class of a type: runs of one slot break where it changes.
fn storage_class(ty: &JvmType) -> u8 {
    match ty {
        t if t.is_int_like() => 0,
        JvmType::Long => 1,
        JvmType::Float => 2,
        JvmType::Double => 3,
        JvmType::Unknown => 5,
        _ => 4,
    }
}

fn synthetic_prefix(ty: &JvmType, caught: bool) -> &'static str {
    if caught {
        return "ex";
    }
    match ty {
        JvmType::Long => "l",
        JvmType::Float => "f",
        JvmType::Double => "d",
        t if t.is_int_like() => "i",
        _ => "obj",
    }
}

/// Variables for slot uses no table row covers: one per contiguous run of
/// same-class uses in pc order.
fn inferred_variables(uses: &[&SlotUse]) -> Vec<LocalVariable> {
    let mut by_slot: BTreeMap<u16, Vec<&SlotUse>> = BTreeMap::new();
    for u in uses {
        by_slot.entry(u.slot).or_default().push(u);
    }
    let mut vars = Vec::new();
    for (slot, mut slot_uses) in by_slot {
        slot_uses.sort_by_key(|u| u.pc);
        let mut runs: Vec<Vec<&SlotUse>> = Vec::new();
        for u in slot_uses {
            match runs.last_mut() {
                Some(run) if storage_class(&run[0].ty) == storage_class(&u.ty) => run.push(u),
                _ => runs.push(vec![u]),
            }
        }
        for (k, run) in runs.iter().enumerate() {
            let ty = run_type(run);
            let caught = run.iter().any(|u| u.caught);
            let start = run.iter().map(|u| u.pc).min().unwrap_or(0);
            let end = run.iter().map(|u| u.pc).max().unwrap_or(0) + 1;
            let mut name = format!("{}{}", synthetic_prefix(&ty, caught), slot);
            if k > 0 {
                name = format!("{}_{}", name, k);
            }
            let mut flags = LocalFlags::empty();
            if caught {
                flags |= LocalFlags::EXCEPTION_OR_RETURN_ADDRESS;
            }
            vars.push(LocalVariable {
                slot,
                start_pc: start,
                length: end - start,
                name_index: None,
                signature_index: None,
                name,
                ty,
                signature: None,
                flags,
                origin: LocalOrigin::Inferred,
            });
        }
    }
    vars
}

/// The declared type for a run: the stored reference type when all stores
/// agree, `Object` when they do not, and the slot's operand type otherwise.
fn run_type(run: &[&SlotUse]) -> JvmType {
    let operand = run[0].ty.clone();
    let stored: BTreeSet<&JvmType> = run
        .iter()
        .filter_map(|u| u.stored.as_ref())
        .filter(|t| **t != JvmType::Null && **t != JvmType::Unknown)
        .collect();
    if operand.is_reference() || operand == JvmType::Unknown {
        return match stored.len() {
            0 => JvmType::object(),
            1 => stored.into_iter().next().cloned().unwrap_or_else(JvmType::object),
            _ => JvmType::object(),
        };
    }
    if operand.is_int_like() {
        // A run that only ever holds one narrow type is declared with it.
        if let [single] = stored.into_iter().collect::<Vec<_>>().as_slice() {
            if single.is_int_like() {
                return (*single).clone();
            }
        }
        return JvmType::Int;
    }
    operand
}

/// Make ranges on the same slot pairwise disjoint. Parameter and table
/// ranges win over inferred ones.
fn make_disjoint(vars: &mut Vec<LocalVariable>) {
    vars.sort_by_key(|v| (v.slot, v.start_pc, v.origin));
    for i in 1..vars.len() {
        let (head, tail) = vars.split_at_mut(i);
        let prev = match head.iter_mut().rev().find(|v| !v.flags.contains(LocalFlags::TO_BE_REMOVED)) {
            Some(p) => p,
            None => continue,
        };
        let cur = &mut tail[0];
        if !prev.overlaps(cur) {
            continue;
        }
        if prev.origin != LocalOrigin::Inferred && cur.origin == LocalOrigin::Inferred {
            // Keep the part of the inferred range after the authoritative one.
            let end = cur.end_pc();
            cur.start_pc = prev.end_pc();
            cur.length = end.saturating_sub(cur.start_pc);
            if cur.length == 0 {
                cur.flags |= LocalFlags::TO_BE_REMOVED;
            }
        } else {
            prev.length = cur.start_pc - prev.start_pc;
            if prev.length == 0 {
                prev.flags |= LocalFlags::TO_BE_REMOVED;
            }
        }
    }
    vars.retain(|v| !v.flags.contains(LocalFlags::TO_BE_REMOVED));
}

/// Give distinct names to variables that share a name but not a type.
fn rename_conflicts(vars: &mut [LocalVariable]) {
    let mut types_by_name: BTreeMap<String, Vec<JvmType>> = BTreeMap::new();
    let mut taken: BTreeSet<String> = vars.iter().map(|v| v.name.clone()).collect();
    for var in vars.iter_mut() {
        let types = types_by_name.entry(var.name.clone()).or_default();
        if types.is_empty() || types.contains(&var.ty) {
            if !types.contains(&var.ty) {
                types.push(var.ty.clone());
            }
            continue;
        }
        let base = var.name.clone();
        let mut k = 2;
        let renamed = loop {
            let candidate = format!("{}{}", base, k);
            if !taken.contains(&candidate) {
                break candidate;
            }
            k += 1;
        };
        trace!(from = %base, to = %renamed, "renamed conflicting local");
        taken.insert(renamed.clone());
        types_by_name.entry(renamed.clone()).or_default().push(var.ty.clone());
        var.name = renamed;
    }
}

/// Binds each local reference to the variable covering its pc.
struct Binder<'v> {
    vars: &'v mut Vec<LocalVariable>,
}

impl Binder<'_> {
    fn lookup(&self, slot: u16, pc: u32) -> Option<usize> {
        self.vars
            .iter()
            .position(|v| v.slot == slot && v.covers(pc))
            .or_else(|| {
                // Nearest range on the slot, for uses at the edge of a
                // truncated range.
                self.vars
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.slot == slot)
                    .min_by_key(|(_, v)| {
                        if pc < v.start_pc {
                            v.start_pc - pc
                        } else {
                            pc.saturating_sub(v.end_pc().saturating_sub(1))
                        }
                    })
                    .map(|(idx, _)| idx)
            })
    }
}

impl VisitorMut for Binder<'_> {
    fn visit_local_mut(&mut self, local: &mut LocalRef) {
        let idx = match self.lookup(local.slot, local.pc) {
            Some(idx) => idx,
            None => {
                let ty = if local.ty == JvmType::Unknown {
                    JvmType::object()
                } else {
                    local.ty.clone()
                };
                self.vars.push(LocalVariable {
                    slot: local.slot,
                    start_pc: local.pc,
                    length: 1,
                    name_index: None,
                    signature_index: None,
                    name: format!("{}{}", synthetic_prefix(&ty, false), local.slot),
                    ty,
                    signature: None,
                    flags: LocalFlags::empty(),
                    origin: LocalOrigin::Inferred,
                });
                self.vars.len() - 1
            }
        };
        let var = &self.vars[idx];
        local.name = var.name.clone();
        if var.ty != JvmType::Unknown {
            local.ty = var.ty.clone();
        }
        local.var = Some(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompile::expr::{Literal, Stmt, StmtKind};

    fn local(slot: u16, pc: u32, ty: JvmType) -> Expr {
        Expr::new(ExprKind::Local(LocalRef::new(slot, pc, ty)), None)
    }

    fn assign(slot: u16, pc: u32, ty: JvmType, value: Expr) -> StructuredStmt {
        StructuredStmt::Simple(Stmt::new(
            StmtKind::Expr(Expr::new(
                ExprKind::Assign {
                    target: local(slot, pc, ty).boxed(),
                    value: value.boxed(),
                },
                None,
            )),
            None,
        ))
    }

    fn ctx<'a>(pool: &'a ConstantPool, params: &'a [JvmType]) -> LocalContext<'a> {
        LocalContext {
            pool,
            table: vec![],
            type_table: vec![],
            parameters: params,
            parameter_hints: &[],
            is_static: true,
            code_length: 40,
            merge_compatible: true,
        }
    }

    #[test]
    fn test_inferred_runs_and_parameters() {
        let pool = ConstantPool::new();
        let params = [JvmType::Long, JvmType::string()];
        let mut body = vec![
            assign(3, 2, JvmType::Int, Expr::literal(Literal::int(1), None)),
            StructuredStmt::Simple(Stmt::new(
                StmtKind::Expr(local(2, 4, JvmType::Reference("java/lang/Object".into()))),
                None,
            )),
            assign(
                3,
                10,
                JvmType::Reference("java/lang/Object".into()),
                local(2, 8, JvmType::Reference("java/lang/Object".into())),
            ),
        ];
        let vars = resolve_local_variables(&mut body, &ctx(&pool, &params));
        let names: Vec<&str> = vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["i3", "obj3_1", "param1", "param2"]);
        let param2 = vars.iter().find(|v| v.name == "param2").unwrap();
        assert_eq!(param2.slot, 2);
        assert_eq!(param2.ty, JvmType::string());
        match &body[1] {
            StructuredStmt::Simple(Stmt {
                kind: StmtKind::Expr(e),
                ..
            }) => {
                let l = e.as_local().unwrap();
                assert_eq!(l.name, "param2");
                assert_eq!(l.ty, JvmType::string());
            }
            other => panic!("unexpected {:?}", other),
        }
        for a in &vars {
            for b in &vars {
                if !std::ptr::eq(a, b) {
                    assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_table_overlaps_truncated_and_renamed() {
        let mut pool = ConstantPool::new();
        let x = pool.add_utf8("x").unwrap();
        let int_desc = pool.add_utf8("I").unwrap();
        let str_desc = pool.add_utf8("Ljava/lang/String;").unwrap();
        let rows = vec![
            LocalVariableTableItem { start_pc: 2, length: 20, name_index: x, descriptor_index: int_desc, index: 1 },
            LocalVariableTableItem { start_pc: 10, length: 10, name_index: x, descriptor_index: str_desc, index: 1 },
        ];
        let mut context = ctx(&pool, &[]);
        context.table = rows.iter().collect();
        let vars = resolve_local_variables(&mut [], &context);
        assert_eq!(vars.len(), 2);
        let int_var = vars.iter().find(|v| v.ty == JvmType::Int).unwrap();
        let str_var = vars.iter().find(|v| v.ty == JvmType::string()).unwrap();
        assert_eq!((int_var.start_pc, int_var.length), (2, 8));
        assert_eq!((str_var.start_pc, str_var.length), (10, 10));
        assert_ne!(int_var.name, str_var.name);
    }

    #[test]
    fn test_compatible_table_rows_merge() {
        let mut pool = ConstantPool::new();
        let i = pool.add_utf8("i").unwrap();
        let int_desc = pool.add_utf8("I").unwrap();
        let rows = vec![
            LocalVariableTableItem { start_pc: 2, length: 10, name_index: i, descriptor_index: int_desc, index: 1 },
            LocalVariableTableItem { start_pc: 8, length: 10, name_index: i, descriptor_index: int_desc, index: 1 },
        ];
        let mut context = ctx(&pool, &[]);
        context.table = rows.iter().collect();
        let vars = resolve_local_variables(&mut [], &context);
        assert_eq!(vars.len(), 1);
        assert_eq!((vars[0].start_pc, vars[0].length), (2, 16));
    }
}
