//! Assembles class files in memory for the integration tests.

#![allow(dead_code)]

use classfile_decompiler::constant_info::{
    encode_modified_utf8, ConstantInfo, ConstantPool, InterfaceMethodRefConstant, StringConstant,
};

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_SYNTHETIC: u16 = 0x1000;
pub const ACC_ABSTRACT: u16 = 0x0400;

/// A `Code` attribute before encoding.
#[derive(Clone, Debug, Default)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytes: Vec<u8>,
    /// `(start_pc, end_pc, handler_pc, catch_type)`
    pub exception_table: Vec<(u16, u16, u16, u16)>,
    /// `(start_pc, line)`
    pub lines: Vec<(u16, u16)>,
    /// `(start_pc, length, name, descriptor, slot)`
    pub locals: Vec<(u16, u16, String, String, u16)>,
}

impl Code {
    pub fn new(max_stack: u16, max_locals: u16, bytes: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            bytes,
            ..Default::default()
        }
    }

    pub fn line(mut self, start_pc: u16, line: u16) -> Self {
        self.lines.push((start_pc, line));
        self
    }

    pub fn local(mut self, start_pc: u16, length: u16, name: &str, descriptor: &str, slot: u16) -> Self {
        self.locals
            .push((start_pc, length, name.to_string(), descriptor.to_string(), slot));
        self
    }

    pub fn catch(mut self, start_pc: u16, end_pc: u16, handler_pc: u16, catch_type: u16) -> Self {
        self.exception_table.push((start_pc, end_pc, handler_pc, catch_type));
        self
    }
}

pub struct ClassBuilder {
    pool: ConstantPool,
    major_version: u16,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
}

impl ClassBuilder {
    /// A public class extending `java/lang/Object`, class file version 52.
    pub fn new(name: &str) -> Self {
        let mut pool = ConstantPool::new();
        let this_class = pool.add_class(name).unwrap();
        let super_class = pool.add_class("java/lang/Object").unwrap();
        Self {
            pool,
            major_version: 52,
            access_flags: ACC_PUBLIC | ACC_SUPER,
            this_class,
            super_class,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut self.pool
    }

    pub fn major_version(mut self, major: u16) -> Self {
        self.major_version = major;
        self
    }

    /// Points `this_class` at an arbitrary pool slot.
    pub fn this_class_index(mut self, index: u16) -> Self {
        self.this_class = index;
        self
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let string_index = self.pool.add_utf8(value).unwrap();
        self.pool
            .add_constant(ConstantInfo::String(StringConstant { string_index }))
            .unwrap()
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.pool.add_method_ref(class, name, descriptor).unwrap()
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.pool.add_class(class).unwrap();
        let name_and_type_index = self.pool.add_name_and_type(name, descriptor).unwrap();
        self.pool
            .add_constant(ConstantInfo::InterfaceMethodRef(InterfaceMethodRefConstant {
                class_index,
                name_and_type_index,
            }))
            .unwrap()
    }

    pub fn field(&mut self, access: u16, name: &str, descriptor: &str) {
        let mut out = Vec::new();
        put_u16(&mut out, access);
        put_u16(&mut out, self.pool.add_utf8(name).unwrap());
        put_u16(&mut out, self.pool.add_utf8(descriptor).unwrap());
        put_u16(&mut out, 0);
        self.fields.push(out);
    }

    pub fn method(&mut self, access: u16, name: &str, descriptor: &str, code: Option<Code>) {
        let mut out = Vec::new();
        put_u16(&mut out, access);
        put_u16(&mut out, self.pool.add_utf8(name).unwrap());
        put_u16(&mut out, self.pool.add_utf8(descriptor).unwrap());
        match code {
            Some(code) => {
                put_u16(&mut out, 1);
                let body = self.encode_code(&code);
                self.put_attribute(&mut out, "Code", &body);
            }
            None => put_u16(&mut out, 0),
        }
        self.methods.push(out);
    }

    /// The default constructor: `aload_0; invokespecial Object.<init>; return`.
    pub fn default_constructor(&mut self) {
        let init = self.method_ref("java/lang/Object", "<init>", "()V");
        let [hi, lo] = init.to_be_bytes();
        self.method(
            ACC_PUBLIC,
            "<init>",
            "()V",
            Some(Code::new(1, 1, vec![0x2a, 0xb7, hi, lo, 0xb1])),
        );
    }

    pub fn build(mut self) -> Vec<u8> {
        let source_name = self.pool.add_utf8("SourceFile").unwrap();
        let source_value = self.pool.add_utf8("Test.java").unwrap();

        let mut out = vec![0xca, 0xfe, 0xba, 0xbe];
        put_u16(&mut out, 0);
        put_u16(&mut out, self.major_version);
        put_u16(&mut out, self.pool.len() as u16);
        for (_, entry) in self.pool.iter() {
            encode_constant(&mut out, entry);
        }
        put_u16(&mut out, self.access_flags);
        put_u16(&mut out, self.this_class);
        put_u16(&mut out, self.super_class);
        put_u16(&mut out, 0);
        put_u16(&mut out, self.fields.len() as u16);
        for field in &self.fields {
            out.extend_from_slice(field);
        }
        put_u16(&mut out, self.methods.len() as u16);
        for method in &self.methods {
            out.extend_from_slice(method);
        }
        put_u16(&mut out, 1);
        put_u16(&mut out, source_name);
        put_u32(&mut out, 2);
        put_u16(&mut out, source_value);
        out
    }

    fn encode_code(&mut self, code: &Code) -> Vec<u8> {
        let mut out = Vec::new();
        put_u16(&mut out, code.max_stack);
        put_u16(&mut out, code.max_locals);
        put_u32(&mut out, code.bytes.len() as u32);
        out.extend_from_slice(&code.bytes);
        put_u16(&mut out, code.exception_table.len() as u16);
        for (start, end, handler, catch_type) in &code.exception_table {
            for value in [*start, *end, *handler, *catch_type] {
                put_u16(&mut out, value);
            }
        }

        let mut attributes = Vec::new();
        let mut count = 0u16;
        if !code.lines.is_empty() {
            let mut body = Vec::new();
            put_u16(&mut body, code.lines.len() as u16);
            for (pc, line) in &code.lines {
                put_u16(&mut body, *pc);
                put_u16(&mut body, *line);
            }
            self.put_attribute(&mut attributes, "LineNumberTable", &body);
            count += 1;
        }
        if !code.locals.is_empty() {
            let mut body = Vec::new();
            put_u16(&mut body, code.locals.len() as u16);
            for (start, length, name, descriptor, slot) in &code.locals {
                put_u16(&mut body, *start);
                put_u16(&mut body, *length);
                put_u16(&mut body, self.pool.add_utf8(name).unwrap());
                put_u16(&mut body, self.pool.add_utf8(descriptor).unwrap());
                put_u16(&mut body, *slot);
            }
            self.put_attribute(&mut attributes, "LocalVariableTable", &body);
            count += 1;
        }
        put_u16(&mut out, count);
        out.extend_from_slice(&attributes);
        out
    }

    fn put_attribute(&mut self, out: &mut Vec<u8>, name: &str, body: &[u8]) {
        put_u16(out, self.pool.add_utf8(name).unwrap());
        put_u32(out, body.len() as u32);
        out.extend_from_slice(body);
    }
}

pub fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn encode_constant(out: &mut Vec<u8>, entry: &ConstantInfo) {
    match entry {
        ConstantInfo::Utf8(c) => {
            let bytes = encode_modified_utf8(&c.utf8_string);
            out.push(1);
            put_u16(out, bytes.len() as u16);
            out.extend_from_slice(&bytes);
        }
        ConstantInfo::Integer(c) => {
            out.push(3);
            out.extend_from_slice(&c.value.to_be_bytes());
        }
        ConstantInfo::Float(c) => {
            out.push(4);
            out.extend_from_slice(&c.value.to_be_bytes());
        }
        ConstantInfo::Long(c) => {
            out.push(5);
            out.extend_from_slice(&c.value.to_be_bytes());
        }
        ConstantInfo::Double(c) => {
            out.push(6);
            out.extend_from_slice(&c.value.to_be_bytes());
        }
        ConstantInfo::Class(c) => {
            out.push(7);
            put_u16(out, c.name_index);
        }
        ConstantInfo::String(c) => {
            out.push(8);
            put_u16(out, c.string_index);
        }
        ConstantInfo::FieldRef(c) => {
            out.push(9);
            put_u16(out, c.class_index);
            put_u16(out, c.name_and_type_index);
        }
        ConstantInfo::MethodRef(c) => {
            out.push(10);
            put_u16(out, c.class_index);
            put_u16(out, c.name_and_type_index);
        }
        ConstantInfo::InterfaceMethodRef(c) => {
            out.push(11);
            put_u16(out, c.class_index);
            put_u16(out, c.name_and_type_index);
        }
        ConstantInfo::NameAndType(c) => {
            out.push(12);
            put_u16(out, c.name_index);
            put_u16(out, c.descriptor_index);
        }
        ConstantInfo::MethodHandle(c) => {
            out.push(15);
            out.push(c.reference_kind);
            put_u16(out, c.reference_index);
        }
        ConstantInfo::MethodType(c) => {
            out.push(16);
            put_u16(out, c.descriptor_index);
        }
        ConstantInfo::Dynamic(c) => {
            out.push(17);
            put_u16(out, c.bootstrap_method_attr_index);
            put_u16(out, c.name_and_type_index);
        }
        ConstantInfo::InvokeDynamic(c) => {
            out.push(18);
            put_u16(out, c.bootstrap_method_attr_index);
            put_u16(out, c.name_and_type_index);
        }
        ConstantInfo::Module(c) => {
            out.push(19);
            put_u16(out, c.name_index);
        }
        ConstantInfo::Package(c) => {
            out.push(20);
            put_u16(out, c.name_index);
        }
    }
}
