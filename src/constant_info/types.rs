use binrw::{BinRead, BinResult};

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub enum ConstantInfo {
    #[br(magic = 1u8)]
    Utf8(Utf8Constant),
    #[br(magic = 3u8)]
    Integer(IntegerConstant),
    #[br(magic = 4u8)]
    Float(FloatConstant),
    #[br(magic = 5u8)]
    Long(LongConstant),
    #[br(magic = 6u8)]
    Double(DoubleConstant),
    #[br(magic = 7u8)]
    Class(ClassConstant),
    #[br(magic = 8u8)]
    String(StringConstant),
    #[br(magic = 9u8)]
    FieldRef(FieldRefConstant),
    #[br(magic = 10u8)]
    MethodRef(MethodRefConstant),
    #[br(magic = 11u8)]
    InterfaceMethodRef(InterfaceMethodRefConstant),
    #[br(magic = 12u8)]
    NameAndType(NameAndTypeConstant),
    #[br(magic = 15u8)]
    MethodHandle(MethodHandleConstant),
    #[br(magic = 16u8)]
    MethodType(MethodTypeConstant),
    #[br(magic = 17u8)]
    Dynamic(DynamicConstant),
    #[br(magic = 18u8)]
    InvokeDynamic(InvokeDynamicConstant),
    #[br(magic = 19u8)]
    Module(ModuleConstant),
    #[br(magic = 20u8)]
    Package(PackageConstant),
}

impl ConstantInfo {
    /// Long and Double entries take up two pool slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, ConstantInfo::Long(_) | ConstantInfo::Double(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ConstantInfo::Utf8(_) => "Utf8",
            ConstantInfo::Integer(_) => "Integer",
            ConstantInfo::Float(_) => "Float",
            ConstantInfo::Long(_) => "Long",
            ConstantInfo::Double(_) => "Double",
            ConstantInfo::Class(_) => "Class",
            ConstantInfo::String(_) => "String",
            ConstantInfo::FieldRef(_) => "Fieldref",
            ConstantInfo::MethodRef(_) => "Methodref",
            ConstantInfo::InterfaceMethodRef(_) => "InterfaceMethodref",
            ConstantInfo::NameAndType(_) => "NameAndType",
            ConstantInfo::MethodHandle(_) => "MethodHandle",
            ConstantInfo::MethodType(_) => "MethodType",
            ConstantInfo::Dynamic(_) => "Dynamic",
            ConstantInfo::InvokeDynamic(_) => "InvokeDynamic",
            ConstantInfo::Module(_) => "Module",
            ConstantInfo::Package(_) => "Package",
        }
    }
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct Utf8Constant {
    #[br(parse_with = modified_utf8_parser)]
    pub utf8_string: String,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct IntegerConstant {
    pub value: i32,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct FloatConstant {
    pub value: f32,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct LongConstant {
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct DoubleConstant {
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct ClassConstant {
    pub name_index: u16,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct StringConstant {
    pub string_index: u16,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct FieldRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct MethodRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct InterfaceMethodRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct NameAndTypeConstant {
    pub name_index: u16,
    pub descriptor_index: u16,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct MethodHandleConstant {
    pub reference_kind: u8,
    pub reference_index: u16,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct MethodTypeConstant {
    pub descriptor_index: u16,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct DynamicConstant {
    pub bootstrap_method_attr_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct InvokeDynamicConstant {
    pub bootstrap_method_attr_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct ModuleConstant {
    pub name_index: u16,
}

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big)]
pub struct PackageConstant {
    pub name_index: u16,
}

#[binrw::parser(reader, endian)]
fn modified_utf8_parser() -> BinResult<String> {
    let length = u16::read_options(reader, endian, ())?;
    let mut bytes = vec![0u8; length as usize];
    reader.read_exact(&mut bytes)?;
    Ok(decode_modified_utf8(&bytes))
}

/// Decodes the JVM's "modified UTF-8": NUL is encoded on two bytes and
/// supplementary characters as surrogate pairs of three bytes each.
/// Invalid sequences decode to U+FFFD.
pub fn decode_modified_utf8(bytes: &[u8]) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        if b0 & 0x80 == 0 {
            units.push(b0);
            i += 1;
        } else if b0 & 0xe0 == 0xc0 && i + 1 < bytes.len() {
            let b1 = bytes[i + 1] as u16;
            units.push(((b0 & 0x1f) << 6) | (b1 & 0x3f));
            i += 2;
        } else if b0 & 0xf0 == 0xe0 && i + 2 < bytes.len() {
            let b1 = bytes[i + 1] as u16;
            let b2 = bytes[i + 2] as u16;
            units.push(((b0 & 0x0f) << 12) | ((b1 & 0x3f) << 6) | (b2 & 0x3f));
            i += 3;
        } else {
            units.push(0xfffd);
            i += 1;
        }
    }
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Inverse of [`decode_modified_utf8`].
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | ((unit >> 6) & 0x1f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | ((unit >> 12) & 0x0f) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}
