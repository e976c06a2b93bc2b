use crate::class_file::descriptor::FieldType;
use crate::class_file::reader::ClassReader;
use crate::class_file::{ClassFile, MethodInfo};
use crate::error::{Result, VmError};
use crate::vm::memory::HeapPtr;
use derive_more::TryInto;
use std::convert::TryInto;
use std::io::SeekFrom;
use std::rc::Rc;

pub const INT: &str = "I";
pub const BOOLEAN: &str = "Z";
pub const CHAR: &str = "C";
pub const INT_ARRAY: &str = "[I";
pub const CHAR_ARRAY: &str = "[C";
pub const STRING: &str = "Ljava/lang/String";

#[derive(TryInto, Clone, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Boolean(bool),
    Char(u16),
    /// Heap handle plus the declared type tag (`[C`, `Ljava/lang/String`, `LPoint`).
    #[try_into(ignore)]
    Reference(HeapPtr, String),
}

impl Value {
    pub fn reference(ptr: HeapPtr, tag: &str) -> Self {
        Value::Reference(ptr, tag.to_string())
    }

    pub fn type_tag(&self) -> &str {
        match self {
            Value::Int(_) => INT,
            Value::Boolean(_) => BOOLEAN,
            Value::Char(_) => CHAR,
            Value::Reference(_, tag) => tag,
        }
    }

    /// Whether the value may be stored in a field declared as `field_type`.
    /// Booleans and chars are ints on the operand stack, so ints fit those fields too.
    pub fn conforms_to(&self, field_type: &FieldType) -> bool {
        match self {
            Value::Int(_) => matches!(
                field_type,
                FieldType::Int
                    | FieldType::Short
                    | FieldType::Byte
                    | FieldType::Boolean
                    | FieldType::Char
            ),
            Value::Boolean(_) => matches!(field_type, FieldType::Boolean | FieldType::Int),
            Value::Char(_) => matches!(field_type, FieldType::Char | FieldType::Int),
            Value::Reference(_, tag) => *tag == field_type.tag(),
        }
    }

    /// JVM default for primitive fields; reference fields have no null to start from.
    pub fn default_for(field_type: &FieldType) -> Option<Value> {
        match field_type {
            FieldType::Int | FieldType::Short | FieldType::Byte => Some(Value::Int(0)),
            FieldType::Boolean => Some(Value::Boolean(false)),
            FieldType::Char => Some(Value::Char(0)),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct Stack {
    frames: Vec<StackFrame>,
}

impl Stack {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn top_frame(&self) -> Result<&StackFrame> {
        self.frames.last().ok_or(VmError::NoActiveFrame)
    }

    pub fn top_frame_mut(&mut self) -> Result<&mut StackFrame> {
        self.frames.last_mut().ok_or(VmError::NoActiveFrame)
    }

    pub fn push_frame(&mut self, frame: StackFrame) {
        self.frames.push(frame)
    }

    pub fn pop_frame(&mut self) -> Option<StackFrame> {
        self.frames.pop()
    }

    pub fn clear(&mut self) {
        self.frames.clear()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn inspect(&self) -> &[StackFrame] {
        &self.frames
    }
}

pub struct StackFrame {
    pub class: Rc<ClassFile>,
    pub method_idx: usize,

    code: ClassReader<Rc<[u8]>>,
    instruction_start: u64,

    stack: Vec<Value>,
    locals: Vec<Option<Value>>,
}

impl StackFrame {
    /// Frame for `class.methods[method_idx]` with `arguments` in the leading local slots.
    pub fn new(class: Rc<ClassFile>, method_idx: usize, arguments: Vec<Value>) -> Result<Self> {
        let method = class
            .methods
            .get(method_idx)
            .ok_or_else(|| VmError::MethodNotFound {
                class: class.name().to_string(),
                name: format!("#{}", method_idx),
                descriptor: String::new(),
            })?;
        let code = method.code().ok_or_else(|| VmError::MissingCode {
            class: class.name().to_string(),
            name: method.name.to_string(),
        })?;
        let max_locals = code.max_locals as usize;
        if arguments.len() > max_locals {
            return Err(VmError::LocalIndexOutOfBounds {
                index: arguments.len() - 1,
                len: max_locals,
            });
        }

        let mut locals = vec![None; max_locals];
        for (slot, argument) in locals.iter_mut().zip(arguments) {
            *slot = Some(argument);
        }

        Ok(Self {
            code: ClassReader::new(Rc::clone(&code.code)),
            instruction_start: 0,
            stack: Vec::with_capacity(code.max_stack as usize),
            locals,
            class,
            method_idx,
        })
    }

    pub fn method(&self) -> &MethodInfo {
        &self.class.methods[self.method_idx]
    }

    pub fn pc(&self) -> u64 {
        self.code.position()
    }

    pub fn instruction_start(&self) -> u64 {
        self.instruction_start
    }

    /// Reads the next opcode, `None` once the code is exhausted.
    pub fn next_opcode(&mut self) -> Result<Option<u8>> {
        if self.code.is_exhausted() {
            return Ok(None);
        }
        self.instruction_start = self.code.position();
        self.code.read_u1().map(Some)
    }

    pub fn peek_opcode(&self) -> Option<u8> {
        let mut code = self.code.clone();
        code.read_u1().ok()
    }

    /// Re-executes the current instruction on the next step.
    pub fn restart_instruction(&mut self) -> Result<()> {
        self.code.seek(SeekFrom::Start(self.instruction_start))?;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.code.read_u1()
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.code.read_u1()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.code.read_u2()
    }

    /// Branch offset relative to the position after the 3-byte instruction.
    pub fn read_code_offset(&mut self) -> Result<i32> {
        Ok(self.code.read_u2()? as i16 as i32 - 3)
    }

    pub fn jmp_relative(&mut self, offset: i32) -> Result<()> {
        self.code.seek(SeekFrom::Current(offset as i64))?;
        Ok(())
    }

    pub fn set_local(&mut self, idx: usize, value: Value) -> Result<()> {
        let len = self.locals.len();
        let slot = self
            .locals
            .get_mut(idx)
            .ok_or(VmError::LocalIndexOutOfBounds { index: idx, len })?;
        *slot = Some(value);
        Ok(())
    }

    pub fn get_local(&self, idx: usize) -> Result<Value> {
        match self.locals.get(idx) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(VmError::UninitializedLocal(idx)),
            None => Err(VmError::LocalIndexOutOfBounds {
                index: idx,
                len: self.locals.len(),
            }),
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value)
    }

    pub fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    pub fn dup(&mut self) -> Result<()> {
        let value = self.stack.last().cloned().ok_or(VmError::StackUnderflow)?;
        self.stack.push(value);
        Ok(())
    }

    /// Pops an int, widening booleans and chars.
    pub fn pop_int(&mut self) -> Result<i32> {
        match self.pop()? {
            Value::Boolean(value) => Ok(value as i32),
            Value::Char(value) => Ok(value as i32),
            value => {
                let found = value.type_tag().to_string();
                value.try_into().map_err(|_| VmError::TypeMismatch {
                    expected: INT.to_string(),
                    found,
                })
            }
        }
    }

    /// Pops a reference whose declared type is exactly `tag`.
    pub fn pop_reference(&mut self, tag: &str) -> Result<HeapPtr> {
        match self.pop()? {
            Value::Reference(ptr, declared) if declared == tag => Ok(ptr),
            other => Err(VmError::TypeMismatch {
                expected: tag.to_string(),
                found: other.type_tag().to_string(),
            }),
        }
    }

    pub fn pop_any_reference(&mut self) -> Result<(HeapPtr, String)> {
        match self.pop()? {
            Value::Reference(ptr, declared) => Ok((ptr, declared)),
            other => Err(VmError::TypeMismatch {
                expected: "reference".to_string(),
                found: other.type_tag().to_string(),
            }),
        }
    }

    pub fn inspect_stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn inspect_locals(&self) -> &[Option<Value>] {
        &self.locals
    }
}
