//! A decompiler for [Java Classfiles](https://docs.oracle.com/javase/specs/jvms/se10/html/jvms-4.html)
//!
//! The input is the bytes of a single class file; the output is a
//! [`CompilationUnit`]: the type declaration with its fields and methods,
//! each method body as a tree of structured statements and expressions.
//!
//! ```rust
//! match classfile_decompiler::decompile(b"this_will_be_parsed_as_classfile") {
//!     Ok(unit) => println!("{}", unit.type_declaration.name),
//!     Err(ex) => println!("failed to decompile: {}", ex),
//! };
//! ```

#[macro_use]
extern crate nom;

#[macro_use]
extern crate bitflags;

pub mod attribute_info;
pub mod constant_info;
pub mod field_info;
pub mod method_info;

pub mod code_attribute;

pub mod decompile;
pub mod error;
pub mod parser;
pub mod types;

pub use decompile::{
    decompile, CompilationUnit, CompilationUnitSink, DecompileOptions, Decompiler, Node, NodeKind, Visitor,
};
pub use error::*;
pub use parser::{parse_class_from_reader, read_class};
pub use types::*;
