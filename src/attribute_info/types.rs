use binrw::BinRead;

/// A raw attribute as it appears in the class file. `info_parsed` is filled
/// in once the constant pool is available to resolve the attribute name.
#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct AttributeInfo {
    pub attribute_name_index: u16,
    pub attribute_length: u32,
    #[br(args { count: attribute_length as usize })]
    pub info: Vec<u8>,
    #[br(default)]
    pub info_parsed: Option<AttributeInfoVariant>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeInfoVariant {
    Code(CodeAttribute),
    LineNumberTable(LineNumberTableAttribute),
    LocalVariableTable(LocalVariableTableAttribute),
    LocalVariableTypeTable(LocalVariableTypeTableAttribute),
    Exceptions(ExceptionsAttribute),
    Signature(SignatureAttribute),
    Deprecated,
    Synthetic,
    ConstantValue(ConstantValueAttribute),
    SourceFile(SourceFileAttribute),
    MethodParameters(MethodParametersAttribute),
    RuntimeVisibleAnnotations(RuntimeAnnotationsAttribute),
    RuntimeInvisibleAnnotations(RuntimeAnnotationsAttribute),
    /// An attribute this crate does not interpret.
    Unknown(String),
    /// A recognised attribute whose body did not parse.
    Malformed { name: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// 0 catches everything (`finally`).
    pub catch_type: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    pub fn line_number_table(&self) -> Option<&LineNumberTableAttribute> {
        self.attributes.iter().find_map(|a| match &a.info_parsed {
            Some(AttributeInfoVariant::LineNumberTable(t)) => Some(t),
            _ => None,
        })
    }

    /// All LocalVariableTable attributes merged; javac may split them.
    pub fn local_variable_table(&self) -> Vec<&LocalVariableTableItem> {
        self.attributes
            .iter()
            .filter_map(|a| match &a.info_parsed {
                Some(AttributeInfoVariant::LocalVariableTable(t)) => Some(t.items.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn local_variable_type_table(&self) -> Vec<&LocalVariableTableItem> {
        self.attributes
            .iter()
            .filter_map(|a| match &a.info_parsed {
                Some(AttributeInfoVariant::LocalVariableTypeTable(t)) => Some(t.items.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Name of the first nested attribute that failed to parse.
    pub fn malformed_attribute(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match &a.info_parsed {
            Some(AttributeInfoVariant::Malformed { name }) => Some(name.as_str()),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineNumberTableAttribute {
    pub line_number_table: Vec<LineNumberTableEntry>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineNumberTableEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariableTableAttribute {
    pub items: Vec<LocalVariableTableItem>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariableTypeTableAttribute {
    pub items: Vec<LocalVariableTableItem>,
}

/// One row of a LocalVariableTable or LocalVariableTypeTable. In the type
/// table `descriptor_index` holds a generic signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariableTableItem {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodParametersAttribute {
    pub parameters: Vec<ParameterAttribute>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterAttribute {
    /// 0 when the parameter is unnamed.
    pub name_index: u16,
    pub access_flags: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureAttribute {
    pub signature_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeAnnotationsAttribute {
    pub annotations: Vec<RuntimeAnnotation>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeAnnotation {
    pub type_index: u16,
    pub element_value_pairs: Vec<ElementValuePair>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementValuePair {
    pub element_name_index: u16,
    pub value: ElementValue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElementValue {
    ConstValueIndex { tag: char, value: u16 },
    EnumConst(EnumConstValue),
    ClassInfoIndex(u16),
    AnnotationValue(RuntimeAnnotation),
    ElementArray(Vec<ElementValue>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumConstValue {
    pub type_name_index: u16,
    pub const_name_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionsAttribute {
    pub exception_table: Vec<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantValueAttribute {
    pub constant_value_index: u16,
}

/// The SourceFile attribute is an optional fixed-length attribute in the attributes table of a ClassFile structure.
///
/// [see more](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.7.10)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SourceFileAttribute {
    pub sourcefile_index: u16,
}
