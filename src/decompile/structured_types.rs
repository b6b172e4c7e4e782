use super::expr::{Expr, LocalRef, Stmt};

/// A structured statement: the result of control flow structuring.
#[derive(Clone, Debug, PartialEq)]
pub enum StructuredStmt {
    /// A simple statement from stack simulation.
    Simple(Stmt),
    Block(Vec<StructuredStmt>),
    /// Local variable declaration, with the first assignment folded in when
    /// it is the declaring statement.
    Declaration {
        var: LocalRef,
        init: Option<Expr>,
    },
    /// `else_body` is empty when there is no else branch.
    If {
        condition: Expr,
        then_body: Vec<StructuredStmt>,
        else_body: Vec<StructuredStmt>,
    },
    While {
        condition: Expr,
        body: Vec<StructuredStmt>,
    },
    DoWhile {
        body: Vec<StructuredStmt>,
        condition: Expr,
    },
    For {
        init: Vec<StructuredStmt>,
        condition: Expr,
        update: Vec<StructuredStmt>,
        body: Vec<StructuredStmt>,
    },
    ForEach {
        var: LocalRef,
        iterable: Expr,
        body: Vec<StructuredStmt>,
    },
    Switch {
        key: Expr,
        cases: Vec<SwitchCase>,
    },
    TryCatch {
        try_body: Vec<StructuredStmt>,
        catches: Vec<CatchClause>,
        finally_body: Option<Vec<StructuredStmt>>,
    },
    Synchronized {
        object: Expr,
        body: Vec<StructuredStmt>,
    },
    Labeled {
        label: String,
        body: Box<StructuredStmt>,
    },
    /// Target of a residual `Goto`.
    Label(String),
    Break(Option<String>),
    Continue(Option<String>),
    /// Jump that could not be expressed structurally.
    Goto(String),
    Comment(String),
}

/// One arm of a switch. A `None` label is `default`.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    pub labels: Vec<Option<i32>>,
    pub body: Vec<StructuredStmt>,
    pub falls_through: bool,
}

/// A catch clause. An empty `exception_types` catches everything.
#[derive(Clone, Debug, PartialEq)]
pub struct CatchClause {
    pub exception_types: Vec<String>,
    pub var: Option<LocalRef>,
    pub body: Vec<StructuredStmt>,
}

impl StructuredStmt {
    /// Statement lists nested directly inside this statement, in source
    /// order. Labeled statements are transparent.
    pub fn child_lists(&self) -> Vec<&Vec<StructuredStmt>> {
        match self {
            StructuredStmt::Block(body)
            | StructuredStmt::While { body, .. }
            | StructuredStmt::DoWhile { body, .. }
            | StructuredStmt::ForEach { body, .. }
            | StructuredStmt::Synchronized { body, .. } => vec![body],
            StructuredStmt::If {
                then_body,
                else_body,
                ..
            } => vec![then_body, else_body],
            StructuredStmt::For {
                init, update, body, ..
            } => vec![init, update, body],
            StructuredStmt::Switch { cases, .. } => cases.iter().map(|c| &c.body).collect(),
            StructuredStmt::TryCatch {
                try_body,
                catches,
                finally_body,
            } => {
                let mut lists = vec![try_body];
                lists.extend(catches.iter().map(|c| &c.body));
                lists.extend(finally_body.iter());
                lists
            }
            StructuredStmt::Labeled { body, .. } => body.child_lists(),
            _ => Vec::new(),
        }
    }

    pub fn child_lists_mut(&mut self) -> Vec<&mut Vec<StructuredStmt>> {
        match self {
            StructuredStmt::Block(body)
            | StructuredStmt::While { body, .. }
            | StructuredStmt::DoWhile { body, .. }
            | StructuredStmt::ForEach { body, .. }
            | StructuredStmt::Synchronized { body, .. } => vec![body],
            StructuredStmt::If {
                then_body,
                else_body,
                ..
            } => vec![then_body, else_body],
            StructuredStmt::For {
                init, update, body, ..
            } => vec![init, update, body],
            StructuredStmt::Switch { cases, .. } => {
                cases.iter_mut().map(|c| &mut c.body).collect()
            }
            StructuredStmt::TryCatch {
                try_body,
                catches,
                finally_body,
            } => {
                let mut lists = vec![try_body];
                lists.extend(catches.iter_mut().map(|c| &mut c.body));
                lists.extend(finally_body.iter_mut());
                lists
            }
            StructuredStmt::Labeled { body, .. } => body.child_lists_mut(),
            _ => Vec::new(),
        }
    }

    /// Expressions owned by this statement itself, not by nested lists.
    pub fn own_exprs(&self) -> Vec<&Expr> {
        match self {
            StructuredStmt::Simple(stmt) => stmt.expr().into_iter().collect(),
            StructuredStmt::Declaration { init, .. } => init.iter().collect(),
            StructuredStmt::If { condition, .. }
            | StructuredStmt::While { condition, .. }
            | StructuredStmt::DoWhile { condition, .. }
            | StructuredStmt::For { condition, .. } => vec![condition],
            StructuredStmt::ForEach { iterable, .. } => vec![iterable],
            StructuredStmt::Switch { key, .. } => vec![key],
            StructuredStmt::Synchronized { object, .. } => vec![object],
            StructuredStmt::Labeled { body, .. } => body.own_exprs(),
            _ => Vec::new(),
        }
    }

    /// True when control never continues to the next statement.
    pub fn is_jump(&self) -> bool {
        match self {
            StructuredStmt::Simple(stmt) => stmt.ends_flow(),
            StructuredStmt::Break(_) | StructuredStmt::Continue(_) | StructuredStmt::Goto(_) => {
                true
            }
            _ => false,
        }
    }
}
