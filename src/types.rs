use binrw::{BinRead, BinResult};

use crate::attribute_info::{AttributeInfo, AttributeInfoVariant};
use crate::constant_info::{ConstantInfo, ConstantPool};
use crate::field_info::FieldInfo;
use crate::method_info::MethodInfo;

#[derive(Clone, Debug, PartialEq, BinRead)]
#[br(big, magic = b"\xca\xfe\xba\xbe")]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub const_pool_size: u16,
    #[br(parse_with = constant_pool_parser, args(const_pool_size))]
    pub const_pool: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces_count: u16,
    #[br(count = interfaces_count)]
    pub interfaces: Vec<u16>,
    pub fields_count: u16,
    #[br(count = fields_count)]
    pub fields: Vec<FieldInfo>,
    pub methods_count: u16,
    #[br(count = methods_count)]
    pub methods: Vec<MethodInfo>,
    pub attributes_count: u16,
    #[br(count = attributes_count)]
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    pub fn class_name(&self) -> Option<&str> {
        self.const_pool.class_name(self.this_class)
    }

    /// `None` for `java/lang/Object` and module-info.
    pub fn super_class_name(&self) -> Option<&str> {
        if self.super_class == 0 {
            return None;
        }
        self.const_pool.class_name(self.super_class)
    }

    pub fn find_method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| self.const_pool.utf8(m.name_index) == Some(name))
    }

    pub fn source_file(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match &a.info_parsed {
            Some(AttributeInfoVariant::SourceFile(s)) => self.const_pool.utf8(s.sourcefile_index),
            _ => None,
        })
    }
}

/// Reads `count - 1` pool entries; Long and Double are followed by an
/// unusable slot.
#[binrw::parser(reader, endian)]
fn constant_pool_parser(count: u16) -> BinResult<ConstantPool> {
    let count = count as usize;
    let mut entries: Vec<Option<ConstantInfo>> = Vec::with_capacity(count.max(1));
    entries.push(None);
    while entries.len() < count {
        let entry = ConstantInfo::read_options(reader, endian, ())?;
        let wide = entry.is_wide();
        entries.push(Some(entry));
        if wide {
            entries.push(None);
        }
    }
    entries.truncate(count.max(1));
    Ok(ConstantPool::from_entries(entries))
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, BinRead)]
#[br(big)]
pub struct ClassAccessFlags(u16);

bitflags! {
    impl ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;     //	Declared public; may be accessed from outside its package.
        const FINAL = 0x0010;      //	Declared final; no subclasses allowed.
        const SUPER = 0x0020;      //	Treat superclass methods specially when invoked by the invokespecial instruction.
        const INTERFACE = 0x0200;  //	Is an interface, not a class.
        const ABSTRACT = 0x0400;   //	Declared abstract; must not be instantiated.
        const SYNTHETIC = 0x1000;  //	Declared synthetic; not present in the source code.
        const ANNOTATION = 0x2000; //	Declared as an annotation type.
        const ENUM = 0x4000;       //	Declared as an enum type.
        const MODULE = 0x8000;     //	Declared as a module type.
    }
}
