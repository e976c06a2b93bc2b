#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_SUPER: u16 = 0x0020;

pub const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";
pub const STRING_CONCAT_FACTORY: &str = "java/lang/invoke/StringConcatFactory";
pub const CONCAT_BOOTSTRAP_DESCRIPTOR: &str = concat!(
    "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;",
    "Ljava/lang/String;[Ljava/lang/Object;)Ljava/lang/invoke/CallSite;"
);
const REF_INVOKE_STATIC: u8 = 6;

/// Assembles class files the way javac lays them out.
pub struct ClassBuilder {
    pub major_version: u16,
    pool: Vec<u8>,
    pool_count: u16,
    interned: HashMap<Vec<u8>, u16>,
    this_class: u16,
    super_class: u16,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
    bootstrap_methods: Vec<(u16, Vec<u16>)>,
    source_file: Option<String>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        let mut builder = ClassBuilder {
            major_version: 52,
            pool: vec![],
            pool_count: 1,
            interned: HashMap::new(),
            this_class: 0,
            super_class: 0,
            fields: vec![],
            methods: vec![],
            bootstrap_methods: vec![],
            source_file: None,
        };
        builder.this_class = builder.class(name);
        builder.super_class = builder.class("java/lang/Object");
        builder
    }

    fn entry(&mut self, bytes: Vec<u8>, slots: u16) -> u16 {
        if let Some(index) = self.interned.get(&bytes) {
            return *index;
        }
        let index = self.pool_count;
        self.pool.extend_from_slice(&bytes);
        self.pool_count += slots;
        self.interned.insert(bytes, index);
        index
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        self.utf8_bytes(value.as_bytes())
    }

    /// Utf8 entry with an already encoded (modified UTF-8) payload.
    pub fn utf8_bytes(&mut self, encoded: &[u8]) -> u16 {
        let mut bytes = vec![1];
        bytes.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        bytes.extend_from_slice(encoded);
        self.entry(bytes, 1)
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        let mut bytes = vec![3];
        bytes.extend_from_slice(&value.to_be_bytes());
        self.entry(bytes, 1)
    }

    pub fn long(&mut self, value: i64) -> u16 {
        let mut bytes = vec![5];
        bytes.extend_from_slice(&value.to_be_bytes());
        self.entry(bytes, 2)
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.entry(tagged(7, &[name_index]), 1)
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let utf8 = self.utf8(value);
        self.entry(tagged(8, &[utf8]), 1)
    }

    pub fn string_bytes(&mut self, encoded: &[u8]) -> u16 {
        let utf8 = self.utf8_bytes(encoded);
        self.entry(tagged(8, &[utf8]), 1)
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.entry(tagged(12, &[name, descriptor]), 1)
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        self.entry(tagged(9, &[class, name_and_type]), 1)
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        self.entry(tagged(10, &[class, name_and_type]), 1)
    }

    /// Call site bound to `StringConcatFactory.makeConcatWithConstants` with `recipe`.
    pub fn concat_call_site(&mut self, descriptor: &str, recipe: &str) -> u16 {
        self.call_site("makeConcatWithConstants", "makeConcatWithConstants", descriptor, recipe)
    }

    pub fn call_site(
        &mut self,
        bootstrap: &str,
        name: &str,
        descriptor: &str,
        recipe: &str,
    ) -> u16 {
        let method = self.method_ref(STRING_CONCAT_FACTORY, bootstrap, CONCAT_BOOTSTRAP_DESCRIPTOR);
        let mut handle = vec![15, REF_INVOKE_STATIC];
        handle.extend_from_slice(&method.to_be_bytes());
        let handle = self.entry(handle, 1);
        let recipe = self.string(recipe);
        let bootstrap_index = self.bootstrap_methods.len() as u16;
        self.bootstrap_methods.push((handle, vec![recipe]));
        let name_and_type = self.name_and_type(name, descriptor);
        self.entry(tagged(18, &[bootstrap_index, name_and_type]), 1)
    }

    pub fn field(&mut self, flags: u16, name: &str, descriptor: &str) {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut bytes = vec![];
        for value in &[flags, name, descriptor, 0] {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        self.fields.push(bytes);
    }

    pub fn method(
        &mut self,
        flags: u16,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: &[u8],
    ) {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let code_name = self.utf8("Code");
        let line_numbers_name = self.utf8("LineNumberTable");

        let mut line_numbers = vec![];
        line_numbers.extend_from_slice(&1u16.to_be_bytes());
        line_numbers.extend_from_slice(&0u16.to_be_bytes());
        line_numbers.extend_from_slice(&(self.methods.len() as u16 + 1).to_be_bytes());

        let mut info = vec![];
        info.extend_from_slice(&max_stack.to_be_bytes());
        info.extend_from_slice(&max_locals.to_be_bytes());
        info.extend_from_slice(&(code.len() as u32).to_be_bytes());
        info.extend_from_slice(code);
        info.extend_from_slice(&0u16.to_be_bytes());
        info.extend_from_slice(&1u16.to_be_bytes());
        info.extend(attribute(line_numbers_name, &line_numbers));

        let mut bytes = vec![];
        for value in &[flags, name, descriptor, 1] {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        bytes.extend(attribute(code_name, &info));
        self.methods.push(bytes);
    }

    pub fn source_file(&mut self, name: &str) {
        self.source_file = Some(name.to_string());
    }

    pub fn build(mut self) -> Vec<u8> {
        let mut attributes = vec![];
        if let Some(source_file) = self.source_file.take() {
            let name = self.utf8("SourceFile");
            let value = self.utf8(&source_file);
            attributes.push(attribute(name, &value.to_be_bytes()));
        }
        if !self.bootstrap_methods.is_empty() {
            let name = self.utf8("BootstrapMethods");
            let mut info = (self.bootstrap_methods.len() as u16).to_be_bytes().to_vec();
            for (handle, arguments) in &self.bootstrap_methods {
                info.extend_from_slice(&handle.to_be_bytes());
                info.extend_from_slice(&(arguments.len() as u16).to_be_bytes());
                for argument in arguments {
                    info.extend_from_slice(&argument.to_be_bytes());
                }
            }
            attributes.push(attribute(name, &info));
        }

        let mut bytes = vec![0xCA, 0xFE, 0xBA, 0xBE];
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&self.major_version.to_be_bytes());
        bytes.extend_from_slice(&self.pool_count.to_be_bytes());
        bytes.extend_from_slice(&self.pool);
        for value in &[ACC_PUBLIC | ACC_SUPER, self.this_class, self.super_class, 0] {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        bytes.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        for field in &self.fields {
            bytes.extend_from_slice(field);
        }
        bytes.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            bytes.extend_from_slice(method);
        }
        bytes.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
        for attribute in attributes {
            bytes.extend(attribute);
        }
        bytes
    }
}

fn tagged(tag: u8, indices: &[u16]) -> Vec<u8> {
    let mut bytes = vec![tag];
    for index in indices {
        bytes.extend_from_slice(&index.to_be_bytes());
    }
    bytes
}

fn attribute(name_index: u16, info: &[u8]) -> Vec<u8> {
    let mut bytes = name_index.to_be_bytes().to_vec();
    bytes.extend_from_slice(&(info.len() as u32).to_be_bytes());
    bytes.extend_from_slice(info);
    bytes
}

/// Opcode followed by a big-endian u2 operand.
pub fn op_u2(opcode: u8, operand: u16) -> [u8; 3] {
    let [high, low] = operand.to_be_bytes();
    [opcode, high, low]
}

/// Branch opcode with a signed offset.
pub fn branch(opcode: u8, offset: i16) -> [u8; 3] {
    op_u2(opcode, offset as u16)
}

/// Output sink the test keeps a handle to.
#[derive(Clone, Default)]
pub struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl SharedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
