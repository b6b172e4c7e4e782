use std::io::Cursor;

use binrw::BinRead;
use tracing::debug;

use crate::attribute_info::{interpret_attributes, AttributeInfo};
use crate::constant_info::{ConstantInfo, ConstantPool};
use crate::error::ClassFormatError;
use crate::types::ClassFile;

/// JDK 1.1
pub const MIN_MAJOR_VERSION: u16 = 45;
/// JDK 25
pub const MAX_MAJOR_VERSION: u16 = 69;

const PREVIEW_MINOR_VERSION: u16 = 0xffff;

/// Parses and validates a complete class file.
///
/// The magic number and version are checked before anything else is read.
/// Every constant pool reference held by the pool itself, the class header,
/// fields, methods and attributes is checked for bounds and kind.
pub fn read_class(bytes: &[u8]) -> Result<ClassFile, ClassFormatError> {
    check_header(bytes)?;

    let mut cursor = Cursor::new(bytes);
    let mut class = ClassFile::read(&mut cursor).map_err(|e| map_binrw_error(&e))?;
    let consumed = cursor.position() as usize;
    if consumed < bytes.len() {
        return Err(ClassFormatError::TrailingBytes {
            count: bytes.len() - consumed,
        });
    }

    class.const_pool.validate()?;
    validate_class_references(&class)?;

    interpret_attributes(&mut class.attributes, &class.const_pool);
    for field in &mut class.fields {
        interpret_attributes(&mut field.attributes, &class.const_pool);
    }
    for method in &mut class.methods {
        interpret_attributes(&mut method.attributes, &class.const_pool);
    }

    debug!(
        class = class.class_name().unwrap_or("?"),
        major = class.major_version,
        pool = class.const_pool.len(),
        methods = class.methods.len(),
        "class file read"
    );
    Ok(class)
}

/// Attempt to parse a class file given a reader that implements the std::io::Read trait.
pub fn parse_class_from_reader<T: std::io::Read>(reader: &mut T) -> Result<ClassFile, ClassFormatError> {
    let mut class_bytes = Vec::new();
    reader
        .read_to_end(&mut class_bytes)
        .map_err(|_| ClassFormatError::Truncated)?;
    read_class(&class_bytes)
}

fn check_header(bytes: &[u8]) -> Result<(), ClassFormatError> {
    if bytes.len() < 4 || bytes[..4] != [0xca, 0xfe, 0xba, 0xbe] {
        return Err(ClassFormatError::BadMagic);
    }
    if bytes.len() < 8 {
        return Err(ClassFormatError::Truncated);
    }
    let minor = u16::from_be_bytes([bytes[4], bytes[5]]);
    let major = u16::from_be_bytes([bytes[6], bytes[7]]);
    let minor_ok = major < 56 || minor == 0 || minor == PREVIEW_MINOR_VERSION;
    if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major) || !minor_ok {
        return Err(ClassFormatError::UnsupportedVersion { major, minor });
    }
    Ok(())
}

fn map_binrw_error(error: &binrw::Error) -> ClassFormatError {
    if error.is_eof() {
        return ClassFormatError::Truncated;
    }
    match error {
        binrw::Error::BadMagic { pos: 0, .. } => ClassFormatError::BadMagic,
        binrw::Error::BadMagic { pos, .. }
        | binrw::Error::NoVariantMatch { pos }
        | binrw::Error::EnumErrors { pos, .. } => ClassFormatError::Malformed {
            offset: *pos,
            reason: "unknown constant pool tag".to_string(),
        },
        other => ClassFormatError::Malformed {
            offset: 0,
            reason: other.to_string(),
        },
    }
}

fn validate_class_references(class: &ClassFile) -> Result<(), ClassFormatError> {
    let pool = &class.const_pool;
    let is_class = |e: &ConstantInfo| matches!(e, ConstantInfo::Class(_));
    let is_utf8 = |e: &ConstantInfo| matches!(e, ConstantInfo::Utf8(_));

    pool.check_reference(class.this_class, "this_class", "not a Class", is_class)?;
    if class.super_class != 0 {
        pool.check_reference(class.super_class, "super_class", "not a Class", is_class)?;
    }
    for interface in &class.interfaces {
        pool.check_reference(*interface, "interfaces", "not a Class", is_class)?;
    }
    for (i, field) in class.fields.iter().enumerate() {
        let from = format!("field {}", i);
        pool.check_reference(field.name_index, &from, "not a Utf8", is_utf8)?;
        pool.check_reference(field.descriptor_index, &from, "not a Utf8", is_utf8)?;
        check_attribute_names(pool, &field.attributes, &from)?;
    }
    for (i, method) in class.methods.iter().enumerate() {
        let from = format!("method {}", i);
        pool.check_reference(method.name_index, &from, "not a Utf8", is_utf8)?;
        pool.check_reference(method.descriptor_index, &from, "not a Utf8", is_utf8)?;
        check_attribute_names(pool, &method.attributes, &from)?;
    }
    check_attribute_names(pool, &class.attributes, "class attributes")
}

fn check_attribute_names(
    pool: &ConstantPool,
    attributes: &[AttributeInfo],
    from: &str,
) -> Result<(), ClassFormatError> {
    for attribute in attributes {
        pool.check_reference(attribute.attribute_name_index, from, "not a Utf8", |e| {
            matches!(e, ConstantInfo::Utf8(_))
        })?;
    }
    Ok(())
}
