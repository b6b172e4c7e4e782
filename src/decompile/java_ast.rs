//! The decompiled compilation unit: one type declaration with its members.

use crate::error::Warning;

use super::descriptor::JvmType;
use super::expr::Expr;
use super::layout::LineLayout;
use super::local_variables::LocalVariable;
use super::structured_types::StructuredStmt;

/// What kind of type a class file declares.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
    Annotation,
    Module,
}

/// Source-level modifiers of a type, field, method or parameter.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Modifiers(u16);

bitflags! {
    impl Modifiers: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICTFP = 0x0800;
        /// Interface method with a body.
        const DEFAULT = 0x1000;
        // Not source modifiers, kept so callers can filter members.
        const SYNTHETIC = 0x2000;
        const BRIDGE = 0x4000;
        const VARARGS = 0x8000;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    /// Internal name, e.g. `java/lang/Deprecated`.
    pub type_name: String,
    pub arguments: Vec<(String, AnnotationValue)>,
    /// From `RuntimeVisibleAnnotations` rather than the invisible table.
    pub visible: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AnnotationValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(u16),
    Byte(i8),
    Short(i16),
    Boolean(bool),
    String(String),
    Class(JvmType),
    Enum { type_name: String, constant: String },
    Annotation(Annotation),
    Array(Vec<AnnotationValue>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: JvmType,
    /// Generic signature of the parameter's local, when recorded.
    pub signature: Option<String>,
    pub modifiers: Modifiers,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDeclaration {
    pub modifiers: Modifiers,
    pub name: String,
    pub ty: JvmType,
    pub signature: Option<String>,
    pub annotations: Vec<Annotation>,
    /// Compile-time constant from the ConstantValue attribute.
    pub initializer: Option<Expr>,
}

/// A decompiled method body.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodBody {
    pub statements: Vec<StructuredStmt>,
    /// Local variables; `LocalRef::var` indexes into this list.
    pub locals: Vec<LocalVariable>,
    /// Line of every statement, in tree order.
    pub layout: LineLayout,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodDeclaration {
    pub modifiers: Modifiers,
    pub name: String,
    pub descriptor: String,
    pub return_type: JvmType,
    pub parameters: Vec<Parameter>,
    /// Internal names of the declared exceptions.
    pub throws: Vec<String>,
    pub signature: Option<String>,
    pub annotations: Vec<Annotation>,
    /// `None` for abstract and native methods.
    pub body: Option<MethodBody>,
}

impl MethodDeclaration {
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == "<clinit>"
    }

    /// `name` + descriptor, the key used in warnings.
    pub fn key(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeDeclaration {
    pub kind: TypeKind,
    pub modifiers: Modifiers,
    /// Internal name, e.g. `com/example/Foo$Bar`.
    pub name: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub signature: Option<String>,
    pub annotations: Vec<Annotation>,
    pub fields: Vec<FieldDeclaration>,
    pub methods: Vec<MethodDeclaration>,
    pub source_file: Option<String>,
}

impl TypeDeclaration {
    /// Name without the package, with nesting kept (`Foo$Bar`).
    pub fn simple_name(&self) -> &str {
        super::descriptor::simple_class_name(&self.name)
    }

    pub fn find_method(&self, name: &str) -> Option<&MethodDeclaration> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Root of the decompiled tree.
#[derive(Clone, Debug, PartialEq)]
pub struct CompilationUnit {
    /// Package in source form, `None` for the default package.
    pub package: Option<String>,
    pub type_declaration: TypeDeclaration,
    /// Method-level problems met while decompiling, in method order.
    pub warnings: Vec<Warning>,
}
