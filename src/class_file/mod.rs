pub mod attributes;
pub mod constant_pool;
pub mod descriptor;
pub mod reader;

use crate::class_file::attributes::{
    link_attributes, read_attributes, Attribute, AttributeInfo, BootstrapMethod, CodeAttribute,
    LineNumber, RawAttribute,
};
use crate::class_file::constant_pool::{read_constant_pool, ConstantPool};
use crate::class_file::descriptor::{parse_field_descriptor, FieldType};
use crate::class_file::reader::ClassReader;
use crate::error::{Result, VmError};
use log::debug;
use std::rc::Rc;

pub const MAGIC: u32 = 0xCAFEBABE;
pub const MAX_MAJOR_VERSION: u16 = 52;

bitflags::bitflags! {
    #[derive(Default)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        /// ACC_SUPER on classes
        const SYNCHRONIZED = 0x0020;
        /// ACC_VOLATILE on fields
        const BRIDGE = 0x0040;
        /// ACC_TRANSIENT on fields
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub access_flags: AccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub name: Rc<str>,
    pub descriptor: Rc<str>,
    pub attributes: Vec<AttributeInfo>,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(AccessFlags::STATIC)
    }

    pub fn field_type(&self) -> Result<FieldType> {
        parse_field_descriptor(&self.descriptor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub access_flags: AccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub name: Rc<str>,
    pub descriptor: Rc<str>,
    pub attributes: Vec<AttributeInfo>,
}

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(AccessFlags::STATIC)
    }

    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(AttributeInfo::as_code)
    }

    pub fn line_number_table(&self) -> Option<&[LineNumber]> {
        self.code()?.line_number_table()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub magic: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: AccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
    name: Rc<str>,
}

struct RawMember {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    attributes: Vec<RawAttribute>,
}

fn read_members<T: AsRef<[u8]>>(reader: &mut ClassReader<T>) -> Result<Vec<RawMember>> {
    let count = reader.read_u2()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        members.push(RawMember {
            access_flags: reader.read_u2()?,
            name_index: reader.read_u2()?,
            descriptor_index: reader.read_u2()?,
            attributes: read_attributes(reader)?,
        });
    }
    Ok(members)
}

type LinkedMember = (AccessFlags, u16, u16, Rc<str>, Rc<str>, Vec<AttributeInfo>);

fn link_member(member: RawMember, pool: &ConstantPool) -> Result<LinkedMember> {
    Ok((
        AccessFlags::from_bits_truncate(member.access_flags),
        member.name_index,
        member.descriptor_index,
        Rc::clone(pool.utf8(member.name_index)?),
        Rc::clone(pool.utf8(member.descriptor_index)?),
        link_attributes(member.attributes, pool)?,
    ))
}

impl ClassFile {
    /// Structural parse followed by linking. The whole buffer must be consumed.
    pub fn parse(bytes: &[u8]) -> Result<ClassFile> {
        let mut reader = ClassReader::new(bytes);

        let magic = reader.read_u4()?;
        if magic != MAGIC {
            return Err(VmError::MalformedClassFile(format!(
                "bad magic {:#010X}",
                magic
            )));
        }
        let minor_version = reader.read_u2()?;
        let major_version = reader.read_u2()?;
        if major_version > MAX_MAJOR_VERSION {
            return Err(VmError::MalformedClassFile(format!(
                "unsupported class file version {}.{}",
                major_version, minor_version
            )));
        }

        let raw_pool = read_constant_pool(&mut reader)?;
        let access_flags = reader.read_u2()?;
        let this_class = reader.read_u2()?;
        let super_class = reader.read_u2()?;
        let interfaces_count = reader.read_u2()?;
        if interfaces_count != 0 {
            return Err(VmError::MalformedClassFile(format!(
                "{} interfaces declared, interfaces are not supported",
                interfaces_count
            )));
        }
        let fields = read_members(&mut reader)?;
        let methods = read_members(&mut reader)?;
        let attributes = read_attributes(&mut reader)?;
        if !reader.is_exhausted() {
            return Err(VmError::MalformedClassFile(format!(
                "{} trailing bytes after class attributes",
                reader.remaining()
            )));
        }

        let constant_pool = ConstantPool::link(raw_pool)?;
        let name = Rc::clone(&constant_pool.class(this_class)?.name);
        if super_class != 0 {
            constant_pool.class(super_class)?;
        }

        let fields = fields
            .into_iter()
            .map(|member| {
                let (access_flags, name_index, descriptor_index, name, descriptor, attributes) =
                    link_member(member, &constant_pool)?;
                Ok(FieldInfo {
                    access_flags,
                    name_index,
                    descriptor_index,
                    name,
                    descriptor,
                    attributes,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let methods = methods
            .into_iter()
            .map(|member| {
                let (access_flags, name_index, descriptor_index, name, descriptor, attributes) =
                    link_member(member, &constant_pool)?;
                Ok(MethodInfo {
                    access_flags,
                    name_index,
                    descriptor_index,
                    name,
                    descriptor,
                    attributes,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let attributes = link_attributes(attributes, &constant_pool)?;

        debug!(
            "Parsed class {} (version {}.{}, {} constants, {} methods)",
            name,
            major_version,
            minor_version,
            constant_pool.len(),
            methods.len()
        );

        Ok(ClassFile {
            magic,
            minor_version,
            major_version,
            constant_pool,
            access_flags: AccessFlags::from_bits_truncate(access_flags),
            this_class,
            super_class,
            interfaces: vec![],
            fields,
            methods,
            attributes,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn super_name(&self) -> Option<&str> {
        if self.super_class == 0 {
            return None;
        }
        self.constant_pool.class_name(self.super_class).ok()
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<(usize, &MethodInfo)> {
        self.methods
            .iter()
            .enumerate()
            .find(|(_, m)| &*m.name == name && &*m.descriptor == descriptor)
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    pub fn bootstrap_methods(&self) -> Option<&[BootstrapMethod]> {
        self.attributes.iter().find_map(|attr| match &attr.data {
            Attribute::BootstrapMethods(methods) => Some(methods.as_slice()),
            _ => None,
        })
    }

    pub fn source_file(&self) -> Option<&str> {
        self.attributes.iter().find_map(|attr| match &attr.data {
            Attribute::SourceFile { sourcefile, .. } => Some(&**sourcefile),
            _ => None,
        })
    }
}
