use std::collections::HashMap;

use crate::error::{ClassFormatError, ConstantPoolError};

use super::types::*;

/// Names the decompiler needs to reference even when the class file never
/// mentioned them. Interned on first use and cached per pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WellKnown {
    InstanceConstructor,
    ClassConstructor,
    ToString,
    ValueOf,
    Append,
    JavaLangObject,
    ObjectDescriptor,
    JavaLangString,
    StringBuffer,
    StringBuilder,
    This,
    Code,
    ConstantValue,
    Deprecated,
    Exceptions,
    LineNumberTable,
    LocalVariableTable,
    LocalVariableTypeTable,
    Signature,
    SourceFile,
    Synthetic,
    RuntimeVisibleAnnotations,
    RuntimeInvisibleAnnotations,
    MethodParameters,
}

impl WellKnown {
    pub fn as_str(self) -> &'static str {
        match self {
            WellKnown::InstanceConstructor => "<init>",
            WellKnown::ClassConstructor => "<clinit>",
            WellKnown::ToString => "toString",
            WellKnown::ValueOf => "valueOf",
            WellKnown::Append => "append",
            WellKnown::JavaLangObject => "java/lang/Object",
            WellKnown::ObjectDescriptor => "Ljava/lang/Object;",
            WellKnown::JavaLangString => "java/lang/String",
            WellKnown::StringBuffer => "java/lang/StringBuffer",
            WellKnown::StringBuilder => "java/lang/StringBuilder",
            WellKnown::This => "this",
            WellKnown::Code => "Code",
            WellKnown::ConstantValue => "ConstantValue",
            WellKnown::Deprecated => "Deprecated",
            WellKnown::Exceptions => "Exceptions",
            WellKnown::LineNumberTable => "LineNumberTable",
            WellKnown::LocalVariableTable => "LocalVariableTable",
            WellKnown::LocalVariableTypeTable => "LocalVariableTypeTable",
            WellKnown::Signature => "Signature",
            WellKnown::SourceFile => "SourceFile",
            WellKnown::Synthetic => "Synthetic",
            WellKnown::RuntimeVisibleAnnotations => "RuntimeVisibleAnnotations",
            WellKnown::RuntimeInvisibleAnnotations => "RuntimeInvisibleAnnotations",
            WellKnown::MethodParameters => "MethodParameters",
        }
    }
}

/// A resolved field or method reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class_index: u16,
    pub class_name: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// The constant pool of one class.
///
/// Slot 0 and the slot after every Long/Double are `None`. Utf8, Class,
/// NameAndType, Fieldref and Methodref entries are deduplicated on insertion.
#[derive(Clone, Debug, Default)]
pub struct ConstantPool {
    entries: Vec<Option<ConstantInfo>>,
    utf8s: HashMap<String, u16>,
    classes: HashMap<u16, u16>,
    name_and_types: HashMap<(u16, u16), u16>,
    field_refs: HashMap<(u16, u16), u16>,
    method_refs: HashMap<(u16, u16), u16>,
    well_known: HashMap<WellKnown, u16>,
    well_known_classes: HashMap<WellKnown, u16>,
    frozen: bool,
}

impl PartialEq for ConstantPool {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl ConstantPool {
    /// An empty pool holding only the reserved slot 0.
    pub fn new() -> Self {
        Self {
            entries: vec![None],
            ..Default::default()
        }
    }

    /// Builds a pool from the slots read from a class file. The reverse maps
    /// point at the first occurrence of a value.
    pub fn from_entries(entries: Vec<Option<ConstantInfo>>) -> Self {
        let mut pool = Self {
            entries,
            ..Default::default()
        };
        if pool.entries.is_empty() {
            pool.entries.push(None);
        }
        for (index, entry) in pool.entries.iter().enumerate() {
            let index = index as u16;
            match entry {
                Some(ConstantInfo::Utf8(c)) => {
                    pool.utf8s.entry(c.utf8_string.clone()).or_insert(index);
                }
                Some(ConstantInfo::Class(c)) => {
                    pool.classes.entry(c.name_index).or_insert(index);
                }
                Some(ConstantInfo::NameAndType(c)) => {
                    pool.name_and_types
                        .entry((c.name_index, c.descriptor_index))
                        .or_insert(index);
                }
                Some(ConstantInfo::FieldRef(c)) => {
                    pool.field_refs
                        .entry((c.class_index, c.name_and_type_index))
                        .or_insert(index);
                }
                Some(ConstantInfo::MethodRef(c)) => {
                    pool.method_refs
                        .entry((c.class_index, c.name_and_type_index))
                        .or_insert(index);
                }
                _ => {}
            }
        }
        pool
    }

    /// Number of slots including the reserved slot 0, i.e. the class file's
    /// `constant_pool_count`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Ends the append phase. Lookups keep working.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn get(&self, index: u16) -> Option<&ConstantInfo> {
        self.entries.get(index as usize)?.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &ConstantInfo)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i as u16, e)))
    }

    pub fn utf8(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            ConstantInfo::Utf8(c) => Some(&c.utf8_string),
            _ => None,
        }
    }

    /// Index of an existing Utf8 entry, without interning.
    pub fn find_utf8(&self, value: &str) -> Option<u16> {
        self.utf8s.get(value).copied()
    }

    pub fn class_name(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            ConstantInfo::Class(c) => self.utf8(c.name_index),
            _ => None,
        }
    }

    pub fn name_and_type(&self, index: u16) -> Option<(&str, &str)> {
        match self.get(index)? {
            ConstantInfo::NameAndType(c) => {
                Some((self.utf8(c.name_index)?, self.utf8(c.descriptor_index)?))
            }
            _ => None,
        }
    }

    /// Resolves a Fieldref, Methodref or InterfaceMethodref.
    pub fn member_ref(&self, index: u16) -> Option<MemberRef<'_>> {
        let (class_index, nat_index) = match self.get(index)? {
            ConstantInfo::FieldRef(c) => (c.class_index, c.name_and_type_index),
            ConstantInfo::MethodRef(c) => (c.class_index, c.name_and_type_index),
            ConstantInfo::InterfaceMethodRef(c) => (c.class_index, c.name_and_type_index),
            _ => return None,
        };
        let (name, descriptor) = self.name_and_type(nat_index)?;
        Some(MemberRef {
            class_index,
            class_name: self.class_name(class_index)?,
            name,
            descriptor,
        })
    }

    /// Name index of the Class entry at `class_index`.
    pub fn class_name_index(&self, class_index: u16) -> Option<u16> {
        match self.get(class_index)? {
            ConstantInfo::Class(c) => Some(c.name_index),
            _ => None,
        }
    }

    fn push(&mut self, entry: ConstantInfo) -> Result<u16, ConstantPoolError> {
        if self.frozen {
            return Err(ConstantPoolError::Frozen);
        }
        let slots = if entry.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > u16::MAX as usize {
            return Err(ConstantPoolError::Overflow);
        }
        let index = self.entries.len() as u16;
        self.entries.push(Some(entry));
        if slots == 2 {
            self.entries.push(None);
        }
        Ok(index)
    }

    pub fn add_utf8(&mut self, value: &str) -> Result<u16, ConstantPoolError> {
        if value.starts_with("L[") {
            return Err(ConstantPoolError::InvalidUtf8(value.to_string()));
        }
        if let Some(&index) = self.utf8s.get(value) {
            return Ok(index);
        }
        let index = self.push(ConstantInfo::Utf8(Utf8Constant {
            utf8_string: value.to_string(),
        }))?;
        self.utf8s.insert(value.to_string(), index);
        Ok(index)
    }

    /// Adds a Class entry for an internal name such as `java/lang/String`.
    pub fn add_class(&mut self, internal_name: &str) -> Result<u16, ConstantPoolError> {
        let name_index = self.add_utf8(internal_name)?;
        self.add_class_by_name_index(name_index)
    }

    pub fn add_class_by_name_index(&mut self, name_index: u16) -> Result<u16, ConstantPoolError> {
        if let Some(&index) = self.classes.get(&name_index) {
            return Ok(index);
        }
        let index = self.push(ConstantInfo::Class(ClassConstant { name_index }))?;
        self.classes.insert(name_index, index);
        Ok(index)
    }

    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ConstantPoolError> {
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        if let Some(&index) = self.name_and_types.get(&(name_index, descriptor_index)) {
            return Ok(index);
        }
        let index = self.push(ConstantInfo::NameAndType(NameAndTypeConstant {
            name_index,
            descriptor_index,
        }))?;
        self.name_and_types.insert((name_index, descriptor_index), index);
        Ok(index)
    }

    pub fn add_field_ref(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ConstantPoolError> {
        let class_index = self.add_class(class_name)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        if let Some(&index) = self.field_refs.get(&(class_index, name_and_type_index)) {
            return Ok(index);
        }
        let index = self.push(ConstantInfo::FieldRef(FieldRefConstant {
            class_index,
            name_and_type_index,
        }))?;
        self.field_refs.insert((class_index, name_and_type_index), index);
        Ok(index)
    }

    pub fn add_method_ref(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ConstantPoolError> {
        let class_index = self.add_class(class_name)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        if let Some(&index) = self.method_refs.get(&(class_index, name_and_type_index)) {
            return Ok(index);
        }
        let index = self.push(ConstantInfo::MethodRef(MethodRefConstant {
            class_index,
            name_and_type_index,
        }))?;
        self.method_refs.insert((class_index, name_and_type_index), index);
        Ok(index)
    }

    /// Appends a non-deduplicated constant (Integer, String, ...).
    pub fn add_constant(&mut self, entry: ConstantInfo) -> Result<u16, ConstantPoolError> {
        match entry {
            ConstantInfo::Utf8(c) => self.add_utf8(&c.utf8_string),
            ConstantInfo::Class(c) => self.add_class_by_name_index(c.name_index),
            other => self.push(other),
        }
    }

    /// Utf8 index of a well-known name, interned on first use.
    pub fn well_known(&mut self, name: WellKnown) -> Result<u16, ConstantPoolError> {
        if let Some(&index) = self.well_known.get(&name) {
            return Ok(index);
        }
        let index = self.add_utf8(name.as_str())?;
        self.well_known.insert(name, index);
        Ok(index)
    }

    /// Class index for a well-known class name, interned on first use.
    pub fn well_known_class(&mut self, name: WellKnown) -> Result<u16, ConstantPoolError> {
        if let Some(&index) = self.well_known_classes.get(&name) {
            return Ok(index);
        }
        let name_index = self.well_known(name)?;
        let index = self.add_class_by_name_index(name_index)?;
        self.well_known_classes.insert(name, index);
        Ok(index)
    }

    /// Checks that every index stored inside the pool points at an entry of
    /// the right kind.
    pub fn validate(&self) -> Result<(), ClassFormatError> {
        for (index, entry) in self.iter() {
            let from = || format!("constant #{} ({})", index, entry.kind_name());
            match entry {
                ConstantInfo::Class(c) => self.expect_utf8(c.name_index, from)?,
                ConstantInfo::String(c) => self.expect_utf8(c.string_index, from)?,
                ConstantInfo::MethodType(c) => self.expect_utf8(c.descriptor_index, from)?,
                ConstantInfo::Module(c) => self.expect_utf8(c.name_index, from)?,
                ConstantInfo::Package(c) => self.expect_utf8(c.name_index, from)?,
                ConstantInfo::NameAndType(c) => {
                    self.expect_utf8(c.name_index, from)?;
                    self.expect_utf8(c.descriptor_index, from)?;
                }
                ConstantInfo::FieldRef(FieldRefConstant {
                    class_index,
                    name_and_type_index,
                })
                | ConstantInfo::MethodRef(MethodRefConstant {
                    class_index,
                    name_and_type_index,
                })
                | ConstantInfo::InterfaceMethodRef(InterfaceMethodRefConstant {
                    class_index,
                    name_and_type_index,
                }) => {
                    self.expect(*class_index, "not a Class", from, |e| {
                        matches!(e, ConstantInfo::Class(_))
                    })?;
                    self.expect(*name_and_type_index, "not a NameAndType", from, |e| {
                        matches!(e, ConstantInfo::NameAndType(_))
                    })?;
                }
                ConstantInfo::Dynamic(DynamicConstant {
                    name_and_type_index, ..
                })
                | ConstantInfo::InvokeDynamic(InvokeDynamicConstant {
                    name_and_type_index, ..
                }) => {
                    self.expect(*name_and_type_index, "not a NameAndType", from, |e| {
                        matches!(e, ConstantInfo::NameAndType(_))
                    })?;
                }
                ConstantInfo::MethodHandle(c) => {
                    self.expect(c.reference_index, "not a member reference", from, |e| {
                        matches!(
                            e,
                            ConstantInfo::FieldRef(_)
                                | ConstantInfo::MethodRef(_)
                                | ConstantInfo::InterfaceMethodRef(_)
                        )
                    })?;
                }
                ConstantInfo::Utf8(_)
                | ConstantInfo::Integer(_)
                | ConstantInfo::Float(_)
                | ConstantInfo::Long(_)
                | ConstantInfo::Double(_) => {}
            }
        }
        Ok(())
    }

    /// Checks a reference held outside the pool (this_class, member names...).
    pub fn check_reference(
        &self,
        index: u16,
        from: &str,
        expected: &'static str,
        is_expected: impl Fn(&ConstantInfo) -> bool,
    ) -> Result<(), ClassFormatError> {
        self.expect(index, expected, || from.to_string(), is_expected)
    }

    fn expect_utf8(&self, index: u16, from: impl Fn() -> String) -> Result<(), ClassFormatError> {
        self.expect(index, "not a Utf8", from, |e| matches!(e, ConstantInfo::Utf8(_)))
    }

    fn expect(
        &self,
        index: u16,
        problem: &'static str,
        from: impl Fn() -> String,
        is_expected: impl Fn(&ConstantInfo) -> bool,
    ) -> Result<(), ClassFormatError> {
        match self.entries.get(index as usize) {
            None => Err(ClassFormatError::BadConstantReference {
                from: from(),
                index,
                problem: "past the end of the constant pool",
            }),
            Some(None) => Err(ClassFormatError::BadConstantReference {
                from: from(),
                index,
                problem: "an unusable slot",
            }),
            Some(Some(entry)) if !is_expected(entry) => Err(ClassFormatError::BadConstantReference {
                from: from(),
                index,
                problem,
            }),
            Some(Some(_)) => Ok(()),
        }
    }
}
