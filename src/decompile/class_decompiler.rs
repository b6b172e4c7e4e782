use tracing::{debug, warn};

use crate::constant_info::ConstantPool;
use crate::error::{DecompileError, UnsupportedBytecode, Warning, WarningKind};
use crate::method_info::{MethodAccessFlags, MethodInfo};
use crate::parser::read_class;
use crate::types::ClassFile;
use crate::code_attribute::decode_method;

use super::cfg::build_cfg;
use super::declarations::place_declarations;
use super::descriptor::{package_name, JvmType};
use super::desugar::{desugar, DesugarContext};
use super::goto_reducer::reduce_gotos;
use super::java_ast::*;
use super::layout::LineLayout;
use super::local_variables::{resolve_local_variables, LocalContext, ParameterHint};
use super::loop_reducer::reduce_loops;
use super::members;
use super::stack_sim::SimContext;
use super::structured_types::StructuredStmt;
use super::structuring::structure_method;
use super::type_inference::{infer_types, TypeContext};

/// Options controlling the decompilation process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecompileOptions {
    /// Keep synthetic and bridge members in the output.
    pub include_synthetic: bool,
    /// Turn `bipush`/`sipush` arguments of `String.indexOf` and
    /// `String.lastIndexOf` into char literals.
    pub infer_char_literals: bool,
    /// Merge overlapping LocalVariableTable rows that agree on name and
    /// type; when off they are truncated instead.
    pub merge_local_variables: bool,
    /// Let branches jump straight to a shared `return` instead of the
    /// block holding it.
    pub inline_returns: bool,
    pub desugar_string_concat: bool,
    /// Remove the copies of a `finally` body the compiler places on every
    /// exit of the protected range.
    pub strip_finally_copies: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            include_synthetic: false,
            infer_char_literals: true,
            merge_local_variables: true,
            inline_returns: true,
            desugar_string_concat: true,
            strip_finally_copies: true,
        }
    }
}

/// Receives finished compilation units.
pub trait CompilationUnitSink {
    fn accept(&mut self, unit: CompilationUnit);
}

impl CompilationUnitSink for Vec<CompilationUnit> {
    fn accept(&mut self, unit: CompilationUnit) {
        self.push(unit);
    }
}

/// The main decompiler entry point.
///
/// A `Decompiler` holds only its options; every call works on its own
/// copy of the input and shares nothing with other calls.
#[derive(Clone, Debug, Default)]
pub struct Decompiler {
    options: DecompileOptions,
}

impl Decompiler {
    pub fn new(options: DecompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DecompileOptions {
        &self.options
    }

    /// Decompile the class file in `bytes`. Only a malformed class file is
    /// an error; methods that cannot be decompiled get a placeholder body
    /// and a warning on the returned unit.
    pub fn decompile(&self, bytes: &[u8]) -> Result<CompilationUnit, DecompileError> {
        let class = read_class(bytes)?;
        Ok(self.decompile_class(&class))
    }

    /// Decompile `bytes` and hand the result to `sink`.
    pub fn decompile_into<S: CompilationUnitSink + ?Sized>(
        &self,
        bytes: &[u8],
        sink: &mut S,
    ) -> Result<(), DecompileError> {
        let unit = self.decompile(bytes)?;
        sink.accept(unit);
        Ok(())
    }

    /// Decompile an already parsed class file.
    pub fn decompile_class(&self, class: &ClassFile) -> CompilationUnit {
        let pool = &class.const_pool;
        let mut declaration = members::type_header(class);
        debug!(class = %declaration.name, "decompiling class");

        declaration.fields = class
            .fields
            .iter()
            .map(|f| members::field_declaration(f, pool))
            .filter(|f| self.options.include_synthetic || !f.modifiers.contains(Modifiers::SYNTHETIC))
            .collect();

        let mut warnings = Vec::new();
        for method in &class.methods {
            let mut header = members::method_header(method, pool, declaration.kind);
            let hidden = header.modifiers.intersects(Modifiers::SYNTHETIC | Modifiers::BRIDGE);
            if hidden && !self.options.include_synthetic {
                continue;
            }
            let key = header.key();
            if !method.access_flags.intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE) {
                let result = self.decompile_body(method, pool, &header, declaration.super_class.as_deref());
                let (body, method_warnings) = match result {
                    Ok(done) => done,
                    Err(e) => placeholder(&key, &e),
                };
                for warning in &method_warnings {
                    warn!(method = %warning.method, kind = ?warning.kind, "{}", warning.message);
                }
                warnings.extend(method_warnings);
                header.body = Some(body);
            }
            declaration.methods.push(header);
        }

        CompilationUnit {
            package: package_name(&declaration.name),
            type_declaration: declaration,
            warnings,
        }
    }

    fn decompile_body(
        &self,
        method: &MethodInfo,
        pool: &ConstantPool,
        header: &MethodDeclaration,
        super_class: Option<&str>,
    ) -> Result<(MethodBody, Vec<Warning>), UnsupportedBytecode> {
        if let Some(name) = method.malformed_attribute() {
            return Err(UnsupportedBytecode::MalformedAttribute { name: name.to_string() });
        }
        let code = method.code().ok_or(UnsupportedBytecode::NoCode)?;
        let key = header.key();
        let is_static = method.access_flags.contains(MethodAccessFlags::STATIC);

        let decoded = decode_method(code, pool)?;
        debug!(method = %key, instructions = decoded.instructions.len(), "decoded");

        let mut cfg = build_cfg(&decoded);
        reduce_gotos(&mut cfg, self.options.inline_returns);
        reduce_loops(&mut cfg, pool);
        debug!(method = %key, blocks = cfg.blocks.len(), loops = cfg.loops.len(), "reduced control flow");

        let sim = SimContext {
            pool,
            is_static,
            max_stack: code.max_stack,
        };
        let structured = structure_method(&cfg, &sim, &key, self.options.strip_finally_copies);
        let mut statements = structured.statements;
        let mut warnings = structured.warnings;

        let parameter_types: Vec<JvmType> = header.parameters.iter().map(|p| p.ty.clone()).collect();
        let hints: Vec<ParameterHint> = header
            .parameters
            .iter()
            .map(|p| ParameterHint {
                name: Some(p.name.clone()),
                is_final: p.modifiers.contains(Modifiers::FINAL),
            })
            .collect();
        let local_ctx = LocalContext {
            pool,
            table: code.local_variable_table(),
            type_table: code.local_variable_type_table(),
            parameters: &parameter_types,
            parameter_hints: &hints,
            is_static,
            code_length: decoded.code_length,
            merge_compatible: self.options.merge_local_variables,
        };
        let mut locals = resolve_local_variables(&mut statements, &local_ctx);
        place_declarations(&mut statements, &mut locals);

        warnings.extend(infer_types(
            &mut statements,
            &TypeContext {
                method: &key,
                return_type: &header.return_type,
                vars: &locals,
                infer_char_literals: self.options.infer_char_literals,
            },
        ));
        desugar(
            &mut statements,
            &mut locals,
            &DesugarContext {
                method_name: &header.name,
                super_class,
                returns_void: header.return_type == JvmType::Void,
                string_concat: self.options.desugar_string_concat,
            },
        );

        let layout = LineLayout::compute(&statements);
        debug!(method = %key, statements = layout.len(), locals = locals.len(), "method done");
        Ok((
            MethodBody {
                statements,
                locals,
                layout,
            },
            warnings,
        ))
    }
}

/// The body of a method whose bytecode could not be decompiled.
fn placeholder(method: &str, error: &UnsupportedBytecode) -> (MethodBody, Vec<Warning>) {
    let statements = vec![StructuredStmt::Comment(format!("unsupported bytecode: {}", error))];
    let layout = LineLayout::compute(&statements);
    let warning = Warning::new(WarningKind::UnsupportedBytecode, method, error.to_string());
    (
        MethodBody {
            statements,
            locals: Vec::new(),
            layout,
        },
        vec![warning],
    )
}

/// Decompile a class file with default options.
pub fn decompile(bytes: &[u8]) -> Result<CompilationUnit, DecompileError> {
    Decompiler::default().decompile(bytes)
}
