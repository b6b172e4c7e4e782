//! Field and method descriptor parsing.

use crate::code_attribute::OperandType;

/// A JVM type as spelled by a descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JvmType {
    Int,
    Long,
    Float,
    Double,
    Byte,
    Char,
    Short,
    Boolean,
    Void,
    Reference(String),
    Array(Box<JvmType>),
    /// Type of the `null` literal.
    Null,
    Unknown,
}

impl JvmType {
    pub fn object() -> Self {
        JvmType::Reference("java/lang/Object".into())
    }

    pub fn string() -> Self {
        JvmType::Reference("java/lang/String".into())
    }

    /// Long and Double occupy two local slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, JvmType::Long | JvmType::Double)
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            JvmType::Reference(_) | JvmType::Array(_) | JvmType::Null
        )
    }

    /// Types the JVM computes with as `int`.
    pub fn is_int_like(&self) -> bool {
        matches!(
            self,
            JvmType::Int | JvmType::Byte | JvmType::Char | JvmType::Short | JvmType::Boolean
        )
    }

    /// Sub-int primitives that an `int` value does not implicitly convert to.
    pub fn is_narrow_int(&self) -> bool {
        matches!(
            self,
            JvmType::Byte | JvmType::Char | JvmType::Short | JvmType::Boolean
        )
    }

    /// The JVM computational category, used to compare local variable slots.
    pub fn category(&self) -> JvmType {
        match self {
            t if t.is_int_like() => JvmType::Int,
            t if t.is_reference() => JvmType::object(),
            JvmType::Unknown => JvmType::object(),
            other => other.clone(),
        }
    }

    pub fn from_operand(ty: OperandType) -> Self {
        match ty {
            OperandType::Int => JvmType::Int,
            OperandType::Long => JvmType::Long,
            OperandType::Float => JvmType::Float,
            OperandType::Double => JvmType::Double,
            OperandType::Reference => JvmType::object(),
            OperandType::Byte => JvmType::Byte,
            OperandType::Char => JvmType::Char,
            OperandType::Short => JvmType::Short,
            OperandType::Boolean => JvmType::Boolean,
        }
    }

    pub fn element_type(&self) -> Option<&JvmType> {
        match self {
            JvmType::Array(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn to_descriptor(&self) -> String {
        match self {
            JvmType::Int => "I".into(),
            JvmType::Long => "J".into(),
            JvmType::Float => "F".into(),
            JvmType::Double => "D".into(),
            JvmType::Byte => "B".into(),
            JvmType::Char => "C".into(),
            JvmType::Short => "S".into(),
            JvmType::Boolean => "Z".into(),
            JvmType::Void => "V".into(),
            JvmType::Reference(name) => format!("L{};", name),
            JvmType::Array(inner) => format!("[{}", inner.to_descriptor()),
            JvmType::Null | JvmType::Unknown => "Ljava/lang/Object;".into(),
        }
    }

    /// Java source spelling, with the package kept.
    pub fn source_name(&self) -> String {
        match self {
            JvmType::Int => "int".into(),
            JvmType::Long => "long".into(),
            JvmType::Float => "float".into(),
            JvmType::Double => "double".into(),
            JvmType::Byte => "byte".into(),
            JvmType::Char => "char".into(),
            JvmType::Short => "short".into(),
            JvmType::Boolean => "boolean".into(),
            JvmType::Void => "void".into(),
            JvmType::Reference(name) => internal_to_source_name(name),
            JvmType::Array(inner) => format!("{}[]", inner.source_name()),
            JvmType::Null => "null".into(),
            JvmType::Unknown => "java.lang.Object".into(),
        }
    }
}

/// Parse a single type descriptor starting at position `pos` in `desc`.
/// Returns the type and the position after it.
pub fn parse_type_at(desc: &str, pos: usize) -> Option<(JvmType, usize)> {
    let bytes = desc.as_bytes();
    match *bytes.get(pos)? {
        b'B' => Some((JvmType::Byte, pos + 1)),
        b'C' => Some((JvmType::Char, pos + 1)),
        b'D' => Some((JvmType::Double, pos + 1)),
        b'F' => Some((JvmType::Float, pos + 1)),
        b'I' => Some((JvmType::Int, pos + 1)),
        b'J' => Some((JvmType::Long, pos + 1)),
        b'S' => Some((JvmType::Short, pos + 1)),
        b'Z' => Some((JvmType::Boolean, pos + 1)),
        b'V' => Some((JvmType::Void, pos + 1)),
        b'L' => {
            let semi = desc[pos + 1..].find(';')?;
            let class_name = &desc[pos + 1..pos + 1 + semi];
            if class_name.is_empty() {
                return None;
            }
            Some((JvmType::Reference(class_name.to_string()), pos + semi + 2))
        }
        b'[' => {
            let (inner, next) = parse_type_at(desc, pos + 1)?;
            Some((JvmType::Array(Box::new(inner)), next))
        }
        _ => None,
    }
}

/// Parse a complete field descriptor.
pub fn parse_type_descriptor(desc: &str) -> Option<JvmType> {
    match parse_type_at(desc, 0)? {
        (ty, end) if end == desc.len() => Some(ty),
        _ => None,
    }
}

/// Parse a method descriptor, e.g. "(II)V" -> ([Int, Int], Void)
pub fn parse_method_descriptor(desc: &str) -> Option<(Vec<JvmType>, JvmType)> {
    if !desc.starts_with('(') {
        return None;
    }
    let close = desc.find(')')?;
    let mut params = Vec::new();
    let mut pos = 1;
    while pos < close {
        let (ty, next) = parse_type_at(desc, pos)?;
        params.push(ty);
        pos = next;
    }
    let (ret, end) = parse_type_at(desc, close + 1)?;
    if end != desc.len() {
        return None;
    }
    Some((params, ret))
}

/// Type named by a Class constant: either an internal name or, for arrays,
/// a descriptor.
pub fn class_constant_type(name: &str) -> JvmType {
    if name.starts_with('[') {
        parse_type_descriptor(name).unwrap_or(JvmType::Unknown)
    } else {
        JvmType::Reference(name.to_string())
    }
}

/// Convert internal class name to source name.
pub fn internal_to_source_name(name: &str) -> String {
    name.replace('/', ".")
}

/// Get just the simple class name from an internal name.
pub fn simple_class_name(name: &str) -> &str {
    match name.rfind('/') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// Get the package from an internal name, in source form.
pub fn package_name(name: &str) -> Option<String> {
    name.rfind('/').map(|pos| internal_to_source_name(&name[..pos]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitives() {
        assert_eq!(parse_type_descriptor("I"), Some(JvmType::Int));
        assert_eq!(parse_type_descriptor("J"), Some(JvmType::Long));
        assert_eq!(parse_type_descriptor("Z"), Some(JvmType::Boolean));
        assert_eq!(parse_type_descriptor("II"), None);
    }

    #[test]
    fn test_parse_array() {
        assert_eq!(
            parse_type_descriptor("[[Ljava/lang/Object;"),
            Some(JvmType::Array(Box::new(JvmType::Array(Box::new(
                JvmType::object()
            )))))
        );
        assert_eq!(parse_type_descriptor("L;"), None);
    }

    #[test]
    fn test_parse_method_descriptor() {
        let (params, ret) = parse_method_descriptor("(Ljava/lang/String;I)[B").unwrap();
        assert_eq!(params, vec![JvmType::string(), JvmType::Int]);
        assert_eq!(ret, JvmType::Array(Box::new(JvmType::Byte)));

        let (params, ret) = parse_method_descriptor("()V").unwrap();
        assert!(params.is_empty());
        assert_eq!(ret, JvmType::Void);

        assert_eq!(parse_method_descriptor("(I"), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(internal_to_source_name("java/lang/String"), "java.lang.String");
        assert_eq!(simple_class_name("java/lang/String"), "String");
        assert_eq!(package_name("java/lang/String").as_deref(), Some("java.lang"));
        assert_eq!(package_name("NoPackage"), None);
        assert_eq!(
            class_constant_type("[I"),
            JvmType::Array(Box::new(JvmType::Int))
        );
    }

    #[test]
    fn test_category() {
        assert_eq!(JvmType::Char.category(), JvmType::Int);
        assert_eq!(JvmType::string().category(), JvmType::object());
        assert_eq!(JvmType::Long.category(), JvmType::Long);
    }
}
