use crate::class_file::reader::ClassReader;
use crate::error::{Result, VmError};
use cesu8_str::java as cesu8_java;
use log::trace;
use std::rc::Rc;

const CONSTANT_UTF8: u8 = 1;
const CONSTANT_INTEGER: u8 = 3;
const CONSTANT_FLOAT: u8 = 4;
const CONSTANT_LONG: u8 = 5;
const CONSTANT_DOUBLE: u8 = 6;
const CONSTANT_CLASS: u8 = 7;
const CONSTANT_STRING: u8 = 8;
const CONSTANT_FIELDREF: u8 = 9;
const CONSTANT_METHODREF: u8 = 10;
const CONSTANT_INTERFACE_METHODREF: u8 = 11;
const CONSTANT_NAME_AND_TYPE: u8 = 12;
const CONSTANT_METHOD_HANDLE: u8 = 15;
const CONSTANT_INVOKE_DYNAMIC: u8 = 18;

/// Constant pool entry as stored in the file: cross references are plain indices.
#[derive(Debug, Clone, PartialEq)]
pub enum RawConstant {
    Utf8(Rc<str>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    /// Second slot of a Long or Double.
    Unusable,
}

impl RawConstant {
    pub fn tag_name(&self) -> &'static str {
        match self {
            RawConstant::Utf8(_) => "Utf8",
            RawConstant::Integer(_) => "Integer",
            RawConstant::Float(_) => "Float",
            RawConstant::Long(_) => "Long",
            RawConstant::Double(_) => "Double",
            RawConstant::Class { .. } => "Class",
            RawConstant::String { .. } => "String",
            RawConstant::Fieldref { .. } => "Fieldref",
            RawConstant::Methodref { .. } => "Methodref",
            RawConstant::InterfaceMethodref { .. } => "InterfaceMethodref",
            RawConstant::NameAndType { .. } => "NameAndType",
            RawConstant::MethodHandle { .. } => "MethodHandle",
            RawConstant::InvokeDynamic { .. } => "InvokeDynamic",
            RawConstant::Unusable => "unusable slot",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassRef {
    pub name_index: u16,
    pub name: Rc<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameAndType {
    pub name_index: u16,
    pub descriptor_index: u16,
    pub name: Rc<str>,
    pub descriptor: Rc<str>,
}

/// A linked Fieldref, Methodref or InterfaceMethodref.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberRef {
    pub class_index: u16,
    pub name_and_type_index: u16,
    pub class: ClassRef,
    pub name_and_type: NameAndType,
}

impl MemberRef {
    pub fn class_name(&self) -> &str {
        &self.class.name
    }

    pub fn name(&self) -> &str {
        &self.name_and_type.name
    }

    pub fn descriptor(&self) -> &str {
        &self.name_and_type.descriptor
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodHandle {
    pub reference_kind: u8,
    pub reference_index: u16,
    pub reference: MemberRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvokeDynamic {
    pub bootstrap_method_attr_index: u16,
    pub name_and_type_index: u16,
    pub name_and_type: NameAndType,
}

/// Constant pool entry after linking: every reference carries its resolved target.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Utf8(Rc<str>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(ClassRef),
    String { string_index: u16, value: Rc<str> },
    Fieldref(MemberRef),
    Methodref(MemberRef),
    InterfaceMethodref(MemberRef),
    NameAndType(NameAndType),
    MethodHandle(MethodHandle),
    InvokeDynamic(InvokeDynamic),
    Unusable,
}

impl Constant {
    pub fn tag_name(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class(_) => "Class",
            Constant::String { .. } => "String",
            Constant::Fieldref(_) => "Fieldref",
            Constant::Methodref(_) => "Methodref",
            Constant::InterfaceMethodref(_) => "InterfaceMethodref",
            Constant::NameAndType(_) => "NameAndType",
            Constant::MethodHandle(_) => "MethodHandle",
            Constant::InvokeDynamic(_) => "InvokeDynamic",
            Constant::Unusable => "unusable slot",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    raw: Vec<RawConstant>,
    resolved: Vec<Constant>,
}

/// Decodes `count - 1` entries in file order. Long and Double take two slots.
pub fn read_constant_pool<T: AsRef<[u8]>>(reader: &mut ClassReader<T>) -> Result<Vec<RawConstant>> {
    let count = reader.read_u2()?;
    let mut entries = Vec::with_capacity(count as usize);
    while entries.len() + 1 < count as usize {
        let index = entries.len() as u16 + 1;
        let entry = read_constant(reader, index)?;
        trace!("#{} = {:?}", index, entry);
        let wide = matches!(entry, RawConstant::Long(_) | RawConstant::Double(_));
        entries.push(entry);
        if wide {
            entries.push(RawConstant::Unusable);
        }
    }
    if entries.len() + 1 != count.max(1) as usize {
        return Err(VmError::MalformedClassFile(format!(
            "constant pool of {} entries ends with a two-slot constant",
            count
        )));
    }
    Ok(entries)
}

/// Class files store text as modified UTF-8: `\0` is `C0 80` and
/// supplementary characters are surrogate pairs.
fn decode_modified_utf8(bytes: &[u8], index: u16) -> Result<String> {
    let java_str = cesu8_java::JavaStr::from_java_cesu8(bytes).map_err(|_| {
        VmError::MalformedClassFile(format!("constant #{} is not valid modified UTF-8", index))
    })?;
    Ok(cesu8_java::from_java_cesu8(java_str).into_owned())
}

fn read_constant<T: AsRef<[u8]>>(reader: &mut ClassReader<T>, index: u16) -> Result<RawConstant> {
    let tag = reader.read_u1()?;
    let entry = match tag {
        CONSTANT_UTF8 => {
            let length = reader.read_u2()? as usize;
            let bytes = reader.read_bytes(length)?;
            RawConstant::Utf8(decode_modified_utf8(&bytes, index)?.into())
        }
        CONSTANT_INTEGER => RawConstant::Integer(reader.read_u4()? as i32),
        CONSTANT_FLOAT => RawConstant::Float(f32::from_bits(reader.read_u4()?)),
        CONSTANT_LONG => RawConstant::Long(read_u8(reader)? as i64),
        CONSTANT_DOUBLE => RawConstant::Double(f64::from_bits(read_u8(reader)?)),
        CONSTANT_CLASS => RawConstant::Class {
            name_index: reader.read_u2()?,
        },
        CONSTANT_STRING => RawConstant::String {
            string_index: reader.read_u2()?,
        },
        CONSTANT_FIELDREF => RawConstant::Fieldref {
            class_index: reader.read_u2()?,
            name_and_type_index: reader.read_u2()?,
        },
        CONSTANT_METHODREF => RawConstant::Methodref {
            class_index: reader.read_u2()?,
            name_and_type_index: reader.read_u2()?,
        },
        CONSTANT_INTERFACE_METHODREF => RawConstant::InterfaceMethodref {
            class_index: reader.read_u2()?,
            name_and_type_index: reader.read_u2()?,
        },
        CONSTANT_NAME_AND_TYPE => RawConstant::NameAndType {
            name_index: reader.read_u2()?,
            descriptor_index: reader.read_u2()?,
        },
        CONSTANT_METHOD_HANDLE => RawConstant::MethodHandle {
            reference_kind: reader.read_u1()?,
            reference_index: reader.read_u2()?,
        },
        CONSTANT_INVOKE_DYNAMIC => RawConstant::InvokeDynamic {
            bootstrap_method_attr_index: reader.read_u2()?,
            name_and_type_index: reader.read_u2()?,
        },
        _ => return Err(VmError::UnsupportedConstantTag { tag, index }),
    };
    Ok(entry)
}

fn read_u8<T: AsRef<[u8]>>(reader: &mut ClassReader<T>) -> Result<u64> {
    let high = reader.read_u4()? as u64;
    let low = reader.read_u4()? as u64;
    Ok((high << 32) | low)
}

fn raw_entry<'a>(
    raw: &'a [RawConstant],
    index: u16,
    expected: &'static str,
) -> Result<&'a RawConstant> {
    if index == 0 {
        return Err(broken(index, expected, "index 0"));
    }
    raw.get(index as usize - 1)
        .ok_or_else(|| broken(index, expected, "nothing (out of range)"))
}

fn broken(index: u16, expected: &'static str, found: &'static str) -> VmError {
    VmError::BrokenConstantPoolReference {
        index,
        expected,
        found,
    }
}

fn link_utf8(raw: &[RawConstant], index: u16) -> Result<Rc<str>> {
    match raw_entry(raw, index, "Utf8")? {
        RawConstant::Utf8(value) => Ok(Rc::clone(value)),
        other => Err(broken(index, "Utf8", other.tag_name())),
    }
}

fn link_class(raw: &[RawConstant], index: u16) -> Result<ClassRef> {
    match raw_entry(raw, index, "Class")? {
        RawConstant::Class { name_index } => Ok(ClassRef {
            name_index: *name_index,
            name: link_utf8(raw, *name_index)?,
        }),
        other => Err(broken(index, "Class", other.tag_name())),
    }
}

fn link_name_and_type(raw: &[RawConstant], index: u16) -> Result<NameAndType> {
    match raw_entry(raw, index, "NameAndType")? {
        RawConstant::NameAndType {
            name_index,
            descriptor_index,
        } => Ok(NameAndType {
            name_index: *name_index,
            descriptor_index: *descriptor_index,
            name: link_utf8(raw, *name_index)?,
            descriptor: link_utf8(raw, *descriptor_index)?,
        }),
        other => Err(broken(index, "NameAndType", other.tag_name())),
    }
}

fn link_member(
    raw: &[RawConstant],
    class_index: u16,
    name_and_type_index: u16,
) -> Result<MemberRef> {
    Ok(MemberRef {
        class_index,
        name_and_type_index,
        class: link_class(raw, class_index)?,
        name_and_type: link_name_and_type(raw, name_and_type_index)?,
    })
}

fn link_method_handle(
    raw: &[RawConstant],
    reference_kind: u8,
    reference_index: u16,
) -> Result<MethodHandle> {
    // kinds 1-4 reference fields, 5-9 methods
    let (expected, entry) = match reference_kind {
        1..=4 => ("Fieldref", raw_entry(raw, reference_index, "Fieldref")?),
        5..=9 => ("Methodref", raw_entry(raw, reference_index, "Methodref")?),
        _ => {
            return Err(VmError::MalformedClassFile(format!(
                "method handle reference kind {}",
                reference_kind
            )))
        }
    };
    let reference = match (expected, entry) {
        (
            "Fieldref",
            RawConstant::Fieldref {
                class_index,
                name_and_type_index,
            },
        )
        | (
            "Methodref",
            RawConstant::Methodref {
                class_index,
                name_and_type_index,
            },
        )
        | (
            "Methodref",
            RawConstant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            },
        ) => link_member(raw, *class_index, *name_and_type_index)?,
        (_, other) => return Err(broken(reference_index, expected, other.tag_name())),
    };
    Ok(MethodHandle {
        reference_kind,
        reference_index,
        reference,
    })
}

fn link_entry(raw: &[RawConstant], entry: &RawConstant) -> Result<Constant> {
    let constant = match entry {
        RawConstant::Utf8(value) => Constant::Utf8(Rc::clone(value)),
        RawConstant::Integer(value) => Constant::Integer(*value),
        RawConstant::Float(value) => Constant::Float(*value),
        RawConstant::Long(value) => Constant::Long(*value),
        RawConstant::Double(value) => Constant::Double(*value),
        RawConstant::Class { name_index } => Constant::Class(ClassRef {
            name_index: *name_index,
            name: link_utf8(raw, *name_index)?,
        }),
        RawConstant::String { string_index } => Constant::String {
            string_index: *string_index,
            value: link_utf8(raw, *string_index)?,
        },
        RawConstant::Fieldref {
            class_index,
            name_and_type_index,
        } => Constant::Fieldref(link_member(raw, *class_index, *name_and_type_index)?),
        RawConstant::Methodref {
            class_index,
            name_and_type_index,
        } => Constant::Methodref(link_member(raw, *class_index, *name_and_type_index)?),
        RawConstant::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => Constant::InterfaceMethodref(link_member(raw, *class_index, *name_and_type_index)?),
        RawConstant::NameAndType {
            name_index,
            descriptor_index,
        } => Constant::NameAndType(NameAndType {
            name_index: *name_index,
            descriptor_index: *descriptor_index,
            name: link_utf8(raw, *name_index)?,
            descriptor: link_utf8(raw, *descriptor_index)?,
        }),
        RawConstant::MethodHandle {
            reference_kind,
            reference_index,
        } => Constant::MethodHandle(link_method_handle(raw, *reference_kind, *reference_index)?),
        RawConstant::InvokeDynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        } => Constant::InvokeDynamic(InvokeDynamic {
            bootstrap_method_attr_index: *bootstrap_method_attr_index,
            name_and_type_index: *name_and_type_index,
            name_and_type: link_name_and_type(raw, *name_and_type_index)?,
        }),
        RawConstant::Unusable => Constant::Unusable,
    };
    Ok(constant)
}

impl ConstantPool {
    /// Builds the resolved table, validating the tag of every referenced entry.
    pub fn link(raw: Vec<RawConstant>) -> Result<Self> {
        let resolved = raw
            .iter()
            .map(|entry| link_entry(&raw, entry))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { raw, resolved })
    }

    /// Number of slots, not counting the unused index 0.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    pub fn raw(&self, index: u16) -> Result<&RawConstant> {
        raw_entry(&self.raw, index, "constant")
    }

    pub fn get(&self, index: u16) -> Result<&Constant> {
        if index == 0 {
            return Err(broken(index, "constant", "index 0"));
        }
        match self.resolved.get(index as usize - 1) {
            Some(Constant::Unusable) => Err(broken(index, "constant", "unusable slot")),
            Some(constant) => Ok(constant),
            None => Err(broken(index, "constant", "nothing (out of range)")),
        }
    }

    /// `(index, entry)` pairs in file order, 1-based.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.resolved
            .iter()
            .enumerate()
            .map(|(i, constant)| (i as u16 + 1, constant))
    }

    pub fn utf8(&self, index: u16) -> Result<&Rc<str>> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value),
            other => Err(broken(index, "Utf8", other.tag_name())),
        }
    }

    pub fn class(&self, index: u16) -> Result<&ClassRef> {
        match self.get(index)? {
            Constant::Class(class) => Ok(class),
            other => Err(broken(index, "Class", other.tag_name())),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str> {
        Ok(&self.class(index)?.name)
    }

    pub fn field_ref(&self, index: u16) -> Result<&MemberRef> {
        match self.get(index)? {
            Constant::Fieldref(member) => Ok(member),
            other => Err(broken(index, "Fieldref", other.tag_name())),
        }
    }

    pub fn method_ref(&self, index: u16) -> Result<&MemberRef> {
        match self.get(index)? {
            Constant::Methodref(member) | Constant::InterfaceMethodref(member) => Ok(member),
            other => Err(broken(index, "Methodref", other.tag_name())),
        }
    }

    pub fn method_handle(&self, index: u16) -> Result<&MethodHandle> {
        match self.get(index)? {
            Constant::MethodHandle(handle) => Ok(handle),
            other => Err(broken(index, "MethodHandle", other.tag_name())),
        }
    }

    pub fn invoke_dynamic(&self, index: u16) -> Result<&InvokeDynamic> {
        match self.get(index)? {
            Constant::InvokeDynamic(call_site) => Ok(call_site),
            other => Err(broken(index, "InvokeDynamic", other.tag_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_bytes(count: u16, entries: &[&[u8]]) -> Vec<u8> {
        let mut bytes = count.to_be_bytes().to_vec();
        for entry in entries {
            bytes.extend_from_slice(entry);
        }
        bytes
    }

    fn decode(bytes: Vec<u8>) -> Result<Vec<RawConstant>> {
        read_constant_pool(&mut ClassReader::new(bytes))
    }

    #[test]
    fn test_linked_member_reference() {
        let bytes = pool_bytes(
            7,
            &[
                &[CONSTANT_UTF8, 0, 3, b'F', b'o', b'o'],
                &[CONSTANT_CLASS, 0, 1],
                &[CONSTANT_UTF8, 0, 1, b'x'],
                &[CONSTANT_UTF8, 0, 1, b'I'],
                &[CONSTANT_NAME_AND_TYPE, 0, 3, 0, 4],
                &[CONSTANT_FIELDREF, 0, 2, 0, 5],
            ],
        );
        let pool = ConstantPool::link(decode(bytes).unwrap()).unwrap();
        assert_eq!(pool.len(), 6);
        let field = pool.field_ref(6).unwrap();
        assert_eq!(field.class_name(), "Foo");
        assert_eq!(field.name(), "x");
        assert_eq!(field.descriptor(), "I");
        assert_eq!(pool.class_name(2).unwrap(), "Foo");
        assert_eq!(
            pool.raw(6).unwrap(),
            &RawConstant::Fieldref {
                class_index: 2,
                name_and_type_index: 5
            }
        );
    }

    #[test]
    fn test_wide_constants_take_two_slots() {
        let bytes = pool_bytes(
            5,
            &[
                &[CONSTANT_LONG, 0, 0, 0, 1, 0, 0, 0, 2],
                &[CONSTANT_INTEGER, 0xFF, 0xFF, 0xFF, 0xFE],
                &[CONSTANT_DOUBLE, 0x3F, 0xF0, 0, 0, 0, 0, 0, 0],
            ],
        );
        let raw = decode(bytes);
        // the double would need slots 4 and 5 in a pool of 4
        assert!(matches!(raw, Err(VmError::MalformedClassFile(_))));

        let bytes = pool_bytes(
            6,
            &[
                &[CONSTANT_LONG, 0, 0, 0, 1, 0, 0, 0, 2],
                &[CONSTANT_INTEGER, 0xFF, 0xFF, 0xFF, 0xFE],
                &[CONSTANT_DOUBLE, 0x3F, 0xF0, 0, 0, 0, 0, 0, 0],
            ],
        );
        let pool = ConstantPool::link(decode(bytes).unwrap()).unwrap();
        assert_eq!(pool.get(1).unwrap(), &Constant::Long((1 << 32) | 2));
        assert!(matches!(
            pool.get(2),
            Err(VmError::BrokenConstantPoolReference { index: 2, .. })
        ));
        assert_eq!(pool.get(3).unwrap(), &Constant::Integer(-2));
        assert_eq!(pool.get(4).unwrap(), &Constant::Double(1.0));
    }

    #[test]
    fn test_wrong_tag_is_broken_reference() {
        let bytes = pool_bytes(
            3,
            &[&[CONSTANT_INTEGER, 0, 0, 0, 1], &[CONSTANT_CLASS, 0, 1]],
        );
        match ConstantPool::link(decode(bytes).unwrap()) {
            Err(VmError::BrokenConstantPoolReference {
                index,
                expected,
                found,
            }) => {
                assert_eq!(index, 1);
                assert_eq!(expected, "Utf8");
                assert_eq!(found, "Integer");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_reference() {
        let bytes = pool_bytes(2, &[&[CONSTANT_STRING, 0, 9]]);
        assert!(matches!(
            ConstantPool::link(decode(bytes).unwrap()),
            Err(VmError::BrokenConstantPoolReference { index: 9, .. })
        ));
    }

    #[test]
    fn test_unsupported_tag() {
        // CONSTANT_MethodType
        let bytes = pool_bytes(2, &[&[16, 0, 1]]);
        assert!(matches!(
            decode(bytes),
            Err(VmError::UnsupportedConstantTag { tag: 16, index: 1 })
        ));
    }
}
