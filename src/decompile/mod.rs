//! Bytecode to Java syntax tree.
//!
//! A method body goes through the stages below in order: decoding (in
//! [`crate::code_attribute`]), control flow graph construction, goto and
//! loop reduction, structuring with stack simulation, local variable
//! recovery, declaration placement, type refinement, desugaring and line
//! layout.

pub mod cfg;
pub mod cfg_types;
pub mod declarations;
pub mod descriptor;
pub mod desugar;
pub mod expr;
pub mod goto_reducer;
pub mod java_ast;
pub mod layout;
pub mod local_variables;
pub mod loop_reducer;
pub mod members;
pub mod stack_sim;
pub mod structured_types;
pub mod structuring;
pub mod type_inference;
pub mod visitor;

mod class_decompiler;
mod util;

pub use self::class_decompiler::*;
pub use self::java_ast::*;
pub use self::visitor::{Node, NodeKind, Visitor, VisitorMut};
