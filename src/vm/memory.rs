use crate::error::{Result, VmError};
use crate::vm::stack::{Value, CHAR_ARRAY, INT_ARRAY, STRING};
use derive_more::{Display, From};
use std::collections::HashMap;

/// Stable index into the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, From)]
#[display(fmt = "@{}", _0)]
pub struct HeapPtr(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    ArrayInt(Vec<i32>),
    ArrayChar(Vec<u16>),
    Str(String),
    Instance {
        class_name: String,
        fields: HashMap<String, Value>,
    },
}

impl HeapObject {
    fn kind(&self) -> String {
        match self {
            HeapObject::ArrayInt(_) => INT_ARRAY.to_string(),
            HeapObject::ArrayChar(_) => CHAR_ARRAY.to_string(),
            HeapObject::Str(_) => STRING.to_string(),
            HeapObject::Instance { class_name, .. } => format!("L{}", class_name),
        }
    }
}

//objects live until the process ends, nothing is collected
#[derive(Default)]
pub struct HeapMemory {
    objects: Vec<HeapObject>,
}

impl HeapMemory {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn alloc(&mut self, object: HeapObject) -> HeapPtr {
        self.objects.push(object);
        HeapPtr::from(self.objects.len() - 1)
    }

    pub fn new_string(&mut self, value: &str) -> HeapPtr {
        self.alloc(HeapObject::Str(value.to_string()))
    }

    pub fn new_instance(&mut self, class_name: &str, fields: HashMap<String, Value>) -> HeapPtr {
        self.alloc(HeapObject::Instance {
            class_name: class_name.to_string(),
            fields,
        })
    }

    pub fn get(&self, ptr: HeapPtr) -> Result<&HeapObject> {
        self.objects.get(ptr.0).ok_or(VmError::InvalidReference(ptr))
    }

    pub fn get_mut(&mut self, ptr: HeapPtr) -> Result<&mut HeapObject> {
        self.objects.get_mut(ptr.0).ok_or(VmError::InvalidReference(ptr))
    }

    pub fn string(&self, ptr: HeapPtr) -> Result<&str> {
        match self.get(ptr)? {
            HeapObject::Str(value) => Ok(value),
            other => Err(mismatch(STRING, other)),
        }
    }

    pub fn int_array(&mut self, ptr: HeapPtr) -> Result<&mut Vec<i32>> {
        match self.get_mut(ptr)? {
            HeapObject::ArrayInt(values) => Ok(values),
            other => Err(mismatch(INT_ARRAY, other)),
        }
    }

    pub fn char_array(&mut self, ptr: HeapPtr) -> Result<&mut Vec<u16>> {
        match self.get_mut(ptr)? {
            HeapObject::ArrayChar(values) => Ok(values),
            other => Err(mismatch(CHAR_ARRAY, other)),
        }
    }

    pub fn array_length(&self, ptr: HeapPtr) -> Result<usize> {
        match self.get(ptr)? {
            HeapObject::ArrayInt(values) => Ok(values.len()),
            HeapObject::ArrayChar(values) => Ok(values.len()),
            other => Err(mismatch("array", other)),
        }
    }

    pub fn get_field(&self, ptr: HeapPtr, name: &str) -> Result<Option<&Value>> {
        match self.get(ptr)? {
            HeapObject::Instance { fields, .. } => Ok(fields.get(name)),
            other => Err(mismatch("object instance", other)),
        }
    }

    pub fn set_field(&mut self, ptr: HeapPtr, name: &str, value: Value) -> Result<()> {
        match self.get_mut(ptr)? {
            HeapObject::Instance { fields, .. } => {
                fields.insert(name.to_string(), value);
                Ok(())
            }
            other => Err(mismatch("object instance", other)),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn inspect(&self) -> &[HeapObject] {
        &self.objects
    }
}

fn mismatch(expected: &str, found: &HeapObject) -> VmError {
    VmError::TypeMismatch {
        expected: expected.to_string(),
        found: found.kind(),
    }
}

/// Bounds-checked array index.
pub fn element_index(index: i32, len: usize) -> Result<usize> {
    if index < 0 || index as usize >= len {
        return Err(VmError::ArrayIndexOutOfBounds { index, len });
    }
    Ok(index as usize)
}
