//! Type, field and method headers read from the class file: modifiers,
//! parameter names, throws clauses, generic signatures, annotations and
//! constant initialisers.

use crate::attribute_info::{AttributeInfo, AttributeInfoVariant, ElementValue, RuntimeAnnotation};
use crate::constant_info::{ConstantInfo, ConstantPool};
use crate::field_info::{FieldAccessFlags, FieldInfo};
use crate::method_info::{MethodAccessFlags, MethodInfo};
use crate::types::{ClassAccessFlags, ClassFile};

use super::descriptor::{parse_method_descriptor, parse_type_descriptor, JvmType};
use super::expr::{Expr, Literal};
use super::java_ast::*;

/// `MethodParameters` flag for a final parameter.
const PARAMETER_FINAL: u16 = 0x0010;

pub fn type_kind(flags: ClassAccessFlags) -> TypeKind {
    if flags.contains(ClassAccessFlags::MODULE) {
        TypeKind::Module
    } else if flags.contains(ClassAccessFlags::ANNOTATION) {
        TypeKind::Annotation
    } else if flags.contains(ClassAccessFlags::INTERFACE) {
        TypeKind::Interface
    } else if flags.contains(ClassAccessFlags::ENUM) {
        TypeKind::Enum
    } else {
        TypeKind::Class
    }
}

pub fn class_modifiers(flags: ClassAccessFlags) -> Modifiers {
    let mut modifiers = Modifiers::empty();
    modifiers.set(Modifiers::PUBLIC, flags.contains(ClassAccessFlags::PUBLIC));
    modifiers.set(Modifiers::SYNTHETIC, flags.contains(ClassAccessFlags::SYNTHETIC));
    // Interfaces and enums are implicitly abstract or final.
    if !flags.intersects(ClassAccessFlags::INTERFACE | ClassAccessFlags::ENUM) {
        modifiers.set(Modifiers::FINAL, flags.contains(ClassAccessFlags::FINAL));
        modifiers.set(Modifiers::ABSTRACT, flags.contains(ClassAccessFlags::ABSTRACT));
    }
    modifiers
}

pub fn field_modifiers(flags: FieldAccessFlags) -> Modifiers {
    let pairs = [
        (FieldAccessFlags::PUBLIC, Modifiers::PUBLIC),
        (FieldAccessFlags::PRIVATE, Modifiers::PRIVATE),
        (FieldAccessFlags::PROTECTED, Modifiers::PROTECTED),
        (FieldAccessFlags::STATIC, Modifiers::STATIC),
        (FieldAccessFlags::FINAL, Modifiers::FINAL),
        (FieldAccessFlags::VOLATILE, Modifiers::VOLATILE),
        (FieldAccessFlags::TRANSIENT, Modifiers::TRANSIENT),
        (FieldAccessFlags::SYNTHETIC, Modifiers::SYNTHETIC),
    ];
    pairs
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .fold(Modifiers::empty(), |acc, (_, m)| acc | *m)
}

pub fn method_modifiers(flags: MethodAccessFlags, kind: TypeKind) -> Modifiers {
    let pairs = [
        (MethodAccessFlags::PUBLIC, Modifiers::PUBLIC),
        (MethodAccessFlags::PRIVATE, Modifiers::PRIVATE),
        (MethodAccessFlags::PROTECTED, Modifiers::PROTECTED),
        (MethodAccessFlags::STATIC, Modifiers::STATIC),
        (MethodAccessFlags::FINAL, Modifiers::FINAL),
        (MethodAccessFlags::SYNCHRONIZED, Modifiers::SYNCHRONIZED),
        (MethodAccessFlags::NATIVE, Modifiers::NATIVE),
        (MethodAccessFlags::ABSTRACT, Modifiers::ABSTRACT),
        (MethodAccessFlags::STRICT, Modifiers::STRICTFP),
        (MethodAccessFlags::SYNTHETIC, Modifiers::SYNTHETIC),
        (MethodAccessFlags::BRIDGE, Modifiers::BRIDGE),
        (MethodAccessFlags::VARARGS, Modifiers::VARARGS),
    ];
    let mut modifiers = pairs
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .fold(Modifiers::empty(), |acc, (_, m)| acc | *m);
    let is_default = kind == TypeKind::Interface
        && !flags.intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::STATIC | MethodAccessFlags::PRIVATE);
    modifiers.set(Modifiers::DEFAULT, is_default);
    modifiers
}

/// The type declaration without members.
pub fn type_header(class: &ClassFile) -> TypeDeclaration {
    let pool = &class.const_pool;
    TypeDeclaration {
        kind: type_kind(class.access_flags),
        modifiers: class_modifiers(class.access_flags),
        name: class.class_name().unwrap_or_default().to_string(),
        super_class: class.super_class_name().map(String::from),
        interfaces: class
            .interfaces
            .iter()
            .filter_map(|&idx| pool.class_name(idx))
            .map(String::from)
            .collect(),
        signature: signature(&class.attributes, pool),
        annotations: annotations(&class.attributes, pool),
        fields: Vec::new(),
        methods: Vec::new(),
        source_file: class.source_file().map(String::from),
    }
}

pub fn field_declaration(field: &FieldInfo, pool: &ConstantPool) -> FieldDeclaration {
    let ty = pool
        .utf8(field.descriptor_index)
        .and_then(parse_type_descriptor)
        .unwrap_or(JvmType::Unknown);
    let initializer = field
        .constant_value_index()
        .and_then(|idx| constant_initializer(pool, idx, &ty));
    FieldDeclaration {
        modifiers: field_modifiers(field.access_flags),
        name: pool.utf8(field.name_index).unwrap_or_default().to_string(),
        ty,
        signature: signature(&field.attributes, pool),
        annotations: annotations(&field.attributes, pool),
        initializer,
    }
}

/// `int` constants are stored for every sub-int field type.
fn constant_initializer(pool: &ConstantPool, index: u16, ty: &JvmType) -> Option<Expr> {
    let literal = match (pool.get(index)?, ty) {
        (ConstantInfo::Integer(c), JvmType::Boolean) => Literal::Boolean(c.value != 0),
        (ConstantInfo::Integer(c), JvmType::Char) => Literal::Char(u16::try_from(c.value).ok()?),
        (ConstantInfo::Integer(c), _) => Literal::int(c.value),
        (ConstantInfo::Long(c), _) => Literal::Long(c.value),
        (ConstantInfo::Float(c), _) => Literal::Float(c.value),
        (ConstantInfo::Double(c), _) => Literal::Double(c.value),
        (ConstantInfo::String(s), _) => Literal::String(pool.utf8(s.string_index)?.to_string()),
        _ => return None,
    };
    Some(Expr::literal(literal, None))
}

/// The method declaration without a body. Parameter names come from
/// MethodParameters, then from the LocalVariableTable, then `paramN`.
pub fn method_header(method: &MethodInfo, pool: &ConstantPool, kind: TypeKind) -> MethodDeclaration {
    let name = pool.utf8(method.name_index).unwrap_or_default().to_string();
    let descriptor = pool.utf8(method.descriptor_index).unwrap_or_default().to_string();
    let (param_types, return_type) =
        parse_method_descriptor(&descriptor).unwrap_or((Vec::new(), JvmType::Unknown));
    let is_static = method.access_flags.contains(MethodAccessFlags::STATIC);
    let varargs = method.access_flags.contains(MethodAccessFlags::VARARGS);

    let declared = method_parameters(method, pool);
    let table = method.code().map(|c| c.local_variable_table()).unwrap_or_default();
    let type_table = method.code().map(|c| c.local_variable_type_table()).unwrap_or_default();

    let mut slot = u16::from(!is_static);
    let mut parameters = Vec::with_capacity(param_types.len());
    for (idx, ty) in param_types.iter().enumerate() {
        let row = table.iter().find(|r| r.index == slot && r.start_pc == 0);
        let (declared_name, is_final) = declared.get(idx).cloned().unwrap_or((None, false));
        let name = declared_name
            .or_else(|| row.and_then(|r| pool.utf8(r.name_index)).map(String::from))
            .unwrap_or_else(|| format!("param{}", idx + 1));
        let signature = type_table
            .iter()
            .find(|r| r.index == slot && r.start_pc == 0)
            .and_then(|r| pool.utf8(r.descriptor_index))
            .map(String::from);
        let mut modifiers = Modifiers::empty();
        modifiers.set(Modifiers::FINAL, is_final);
        modifiers.set(Modifiers::VARARGS, varargs && idx + 1 == param_types.len());
        parameters.push(Parameter {
            name,
            ty: ty.clone(),
            signature,
            modifiers,
        });
        slot += if ty.is_wide() { 2 } else { 1 };
    }

    MethodDeclaration {
        modifiers: method_modifiers(method.access_flags, kind),
        name,
        descriptor,
        return_type,
        parameters,
        throws: throws(method, pool),
        signature: signature(&method.attributes, pool),
        annotations: annotations(&method.attributes, pool),
        body: None,
    }
}

/// Names (when present) and finality from the MethodParameters attribute.
fn method_parameters(method: &MethodInfo, pool: &ConstantPool) -> Vec<(Option<String>, bool)> {
    method
        .attributes
        .iter()
        .find_map(|a| match &a.info_parsed {
            Some(AttributeInfoVariant::MethodParameters(mp)) => Some(
                mp.parameters
                    .iter()
                    .map(|p| {
                        let name = match p.name_index {
                            0 => None,
                            idx => pool.utf8(idx).map(String::from),
                        };
                        (name, p.access_flags & PARAMETER_FINAL != 0)
                    })
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

fn throws(method: &MethodInfo, pool: &ConstantPool) -> Vec<String> {
    method
        .attributes
        .iter()
        .find_map(|a| match &a.info_parsed {
            Some(AttributeInfoVariant::Exceptions(e)) => Some(
                e.exception_table
                    .iter()
                    .filter_map(|&idx| pool.class_name(idx))
                    .map(String::from)
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

fn signature(attributes: &[AttributeInfo], pool: &ConstantPool) -> Option<String> {
    attributes.iter().find_map(|a| match &a.info_parsed {
        Some(AttributeInfoVariant::Signature(s)) => pool.utf8(s.signature_index).map(String::from),
        _ => None,
    })
}

/// Runtime annotations of both retentions; a Deprecated attribute without
/// a matching annotation adds `@Deprecated`.
fn annotations(attributes: &[AttributeInfo], pool: &ConstantPool) -> Vec<Annotation> {
    let mut result = Vec::new();
    let mut deprecated = false;
    for attr in attributes {
        match &attr.info_parsed {
            Some(AttributeInfoVariant::RuntimeVisibleAnnotations(ra)) => {
                result.extend(ra.annotations.iter().filter_map(|a| annotation(a, pool, true)));
            }
            Some(AttributeInfoVariant::RuntimeInvisibleAnnotations(ra)) => {
                result.extend(ra.annotations.iter().filter_map(|a| annotation(a, pool, false)));
            }
            Some(AttributeInfoVariant::Deprecated) => deprecated = true,
            _ => {}
        }
    }
    if deprecated && !result.iter().any(|a| a.type_name == "java/lang/Deprecated") {
        result.push(Annotation {
            type_name: "java/lang/Deprecated".into(),
            arguments: Vec::new(),
            visible: true,
        });
    }
    result
}

fn annotation(ann: &RuntimeAnnotation, pool: &ConstantPool, visible: bool) -> Option<Annotation> {
    let type_name = match parse_type_descriptor(pool.utf8(ann.type_index)?)? {
        JvmType::Reference(name) => name,
        _ => return None,
    };
    let arguments = ann
        .element_value_pairs
        .iter()
        .filter_map(|pair| {
            let name = pool.utf8(pair.element_name_index)?.to_string();
            Some((name, element_value(&pair.value, pool)?))
        })
        .collect();
    Some(Annotation {
        type_name,
        arguments,
        visible,
    })
}

fn element_value(value: &ElementValue, pool: &ConstantPool) -> Option<AnnotationValue> {
    Some(match value {
        ElementValue::ConstValueIndex { tag, value } => {
            let constant = pool.get(*value)?;
            match (tag, constant) {
                ('Z', ConstantInfo::Integer(c)) => AnnotationValue::Boolean(c.value != 0),
                ('C', ConstantInfo::Integer(c)) => AnnotationValue::Char(u16::try_from(c.value).ok()?),
                ('B', ConstantInfo::Integer(c)) => AnnotationValue::Byte(i8::try_from(c.value).ok()?),
                ('S', ConstantInfo::Integer(c)) => AnnotationValue::Short(i16::try_from(c.value).ok()?),
                ('I', ConstantInfo::Integer(c)) => AnnotationValue::Int(c.value),
                ('J', ConstantInfo::Long(c)) => AnnotationValue::Long(c.value),
                ('F', ConstantInfo::Float(c)) => AnnotationValue::Float(c.value),
                ('D', ConstantInfo::Double(c)) => AnnotationValue::Double(c.value),
                ('s', ConstantInfo::Utf8(_)) => AnnotationValue::String(pool.utf8(*value)?.to_string()),
                _ => return None,
            }
        }
        ElementValue::EnumConst(e) => AnnotationValue::Enum {
            type_name: match parse_type_descriptor(pool.utf8(e.type_name_index)?)? {
                JvmType::Reference(name) => name,
                _ => return None,
            },
            constant: pool.utf8(e.const_name_index)?.to_string(),
        },
        ElementValue::ClassInfoIndex(idx) => {
            let desc = pool.utf8(*idx)?;
            AnnotationValue::Class(parse_type_descriptor(desc).unwrap_or(JvmType::Unknown))
        }
        ElementValue::AnnotationValue(inner) => AnnotationValue::Annotation(annotation(inner, pool, true)?),
        ElementValue::ElementArray(values) => {
            AnnotationValue::Array(values.iter().filter_map(|v| element_value(v, pool)).collect())
        }
    })
}
