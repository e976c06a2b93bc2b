use crate::class_file::constant_pool::{Constant, ConstantPool};
use crate::class_file::reader::ClassReader;
use crate::error::{Result, VmError};
use std::rc::Rc;

pub const CODE: &str = "Code";
pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
pub const SOURCE_FILE: &str = "SourceFile";
pub const BOOTSTRAP_METHODS: &str = "BootstrapMethods";

/// Attribute as laid out in the file, before its name is known.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAttribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInfo {
    pub name_index: u16,
    pub name: Rc<str>,
    pub data: Attribute,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Code(CodeAttribute),
    LineNumberTable(Vec<LineNumber>),
    SourceFile { sourcefile_index: u16, sourcefile: Rc<str> },
    BootstrapMethods(Vec<BootstrapMethod>),
    /// Any other attribute, payload kept verbatim.
    Other(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Rc<[u8]>,
    /// Decoded but never consulted; there is no exception dispatch.
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethod {
    pub method_ref: u16,
    pub arguments: Vec<u16>,
}

pub fn read_attributes<T: AsRef<[u8]>>(reader: &mut ClassReader<T>) -> Result<Vec<RawAttribute>> {
    let count = reader.read_u2()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()? as usize;
        attributes.push(RawAttribute {
            name_index,
            info: reader.read_bytes(length)?,
        });
    }
    Ok(attributes)
}

pub fn link_attributes(raw: Vec<RawAttribute>, pool: &ConstantPool) -> Result<Vec<AttributeInfo>> {
    raw.into_iter().map(|attr| link_attribute(attr, pool)).collect()
}

fn link_attribute(raw: RawAttribute, pool: &ConstantPool) -> Result<AttributeInfo> {
    let name = Rc::clone(pool.utf8(raw.name_index)?);
    let data = match &*name {
        CODE => Attribute::Code(decode(&raw.info, name.as_ref(), |r| read_code(r, pool))?),
        LINE_NUMBER_TABLE => {
            Attribute::LineNumberTable(decode(&raw.info, name.as_ref(), read_line_numbers)?)
        }
        SOURCE_FILE => {
            let sourcefile_index = decode(&raw.info, name.as_ref(), |r| r.read_u2())?;
            Attribute::SourceFile {
                sourcefile_index,
                sourcefile: Rc::clone(pool.utf8(sourcefile_index)?),
            }
        }
        BOOTSTRAP_METHODS => Attribute::BootstrapMethods(decode(&raw.info, name.as_ref(), |r| {
            read_bootstrap_methods(r, pool)
        })?),
        _ => Attribute::Other(raw.info),
    };
    Ok(AttributeInfo {
        name_index: raw.name_index,
        name,
        data,
    })
}

/// Runs `read` over an attribute payload, which must be consumed exactly.
fn decode<R, F>(info: &[u8], name: &str, read: F) -> Result<R>
where
    F: FnOnce(&mut ClassReader<&[u8]>) -> Result<R>,
{
    let mut reader = ClassReader::new(info);
    let value = read(&mut reader)?;
    if !reader.is_exhausted() {
        return Err(VmError::MalformedClassFile(format!(
            "{} attribute has {} trailing bytes",
            name,
            reader.remaining()
        )));
    }
    Ok(value)
}

fn read_code(reader: &mut ClassReader<&[u8]>, pool: &ConstantPool) -> Result<CodeAttribute> {
    let max_stack = reader.read_u2()?;
    let max_locals = reader.read_u2()?;
    let code_length = reader.read_u4()? as usize;
    let code: Rc<[u8]> = reader.read_bytes(code_length)?.into();

    let exception_table_length = reader.read_u2()?;
    let mut exception_table = Vec::with_capacity(exception_table_length as usize);
    for _ in 0..exception_table_length {
        exception_table.push(ExceptionTableEntry {
            start_pc: reader.read_u2()?,
            end_pc: reader.read_u2()?,
            handler_pc: reader.read_u2()?,
            catch_type: reader.read_u2()?,
        });
    }

    let attributes = link_attributes(read_attributes(reader)?, pool)?;
    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_table,
        attributes,
    })
}

fn read_line_numbers(reader: &mut ClassReader<&[u8]>) -> Result<Vec<LineNumber>> {
    let count = reader.read_u2()?;
    (0..count)
        .map(|_| {
            Ok(LineNumber {
                start_pc: reader.read_u2()?,
                line_number: reader.read_u2()?,
            })
        })
        .collect()
}

fn read_bootstrap_methods(
    reader: &mut ClassReader<&[u8]>,
    pool: &ConstantPool,
) -> Result<Vec<BootstrapMethod>> {
    let count = reader.read_u2()?;
    let mut methods = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let method_ref = reader.read_u2()?;
        pool.method_handle(method_ref)?;
        let argument_count = reader.read_u2()?;
        let mut arguments = Vec::with_capacity(argument_count as usize);
        for _ in 0..argument_count {
            let argument = reader.read_u2()?;
            if let Constant::Utf8(_) | Constant::NameAndType(_) = pool.get(argument)? {
                return Err(VmError::BrokenConstantPoolReference {
                    index: argument,
                    expected: "loadable constant",
                    found: pool.get(argument)?.tag_name(),
                });
            }
            arguments.push(argument);
        }
        methods.push(BootstrapMethod {
            method_ref,
            arguments,
        });
    }
    Ok(methods)
}

impl AttributeInfo {
    pub fn as_code(&self) -> Option<&CodeAttribute> {
        match &self.data {
            Attribute::Code(code) => Some(code),
            _ => None,
        }
    }
}

impl CodeAttribute {
    pub fn line_number_table(&self) -> Option<&[LineNumber]> {
        self.attributes.iter().find_map(|attr| match &attr.data {
            Attribute::LineNumberTable(lines) => Some(lines.as_slice()),
            _ => None,
        })
    }

    /// Source line of the instruction at `pc`, if the method carries line numbers.
    pub fn line_number_at(&self, pc: u16) -> Option<u16> {
        self.line_number_table()?
            .iter()
            .filter(|entry| entry.start_pc <= pc)
            .max_by_key(|entry| entry.start_pc)
            .map(|entry| entry.line_number)
    }
}
