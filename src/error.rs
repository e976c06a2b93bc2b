use crate::vm::memory::HeapPtr;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VmError>;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("Unexpected end of data: wanted {wanted} bytes, {remaining} remaining")]
    UnexpectedEof { wanted: usize, remaining: usize },

    #[error("Malformed class file: {0}")]
    MalformedClassFile(String),

    #[error("Unsupported constant pool tag {tag} at index {index}")]
    UnsupportedConstantTag { tag: u8, index: u16 },

    #[error("Broken constant pool reference #{index}: expected {expected}, found {found}")]
    BrokenConstantPoolReference {
        index: u16,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Class {name} not found at {}", path.display())]
    ClassNotFound {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No public static void main(String[]) in class {0}")]
    EntryPointNotFound(String),

    #[error("Method {class}#{name}{descriptor} not found")]
    MethodNotFound {
        class: String,
        name: String,
        descriptor: String,
    },

    #[error("Method {class}#{name} has no code")]
    MissingCode { class: String, name: String },

    #[error("Method {class}#{name} ran past the end of its code without returning")]
    MissingReturn { class: String, name: String },

    #[error("Unsupported opcode {opcode} at {pc}")]
    UnsupportedOpcode { opcode: u8, pc: u64 },

    #[error("Malformed bytecode: {0}")]
    MalformedBytecode(String),

    #[error("Branch target {0} is outside the method code")]
    InvalidBranchTarget(i64),

    #[error("Unsupported descriptor type {0}")]
    UnsupportedDescriptor(String),

    #[error("Malformed descriptor {0:?}")]
    MalformedDescriptor(String),

    #[error("Unsupported invokedynamic call site: {0}")]
    UnsupportedDynamicCallSite(String),

    #[error("ldc of constant #{index} ({tag}) is not supported")]
    UnsupportedLdcOperand { index: u16, tag: &'static str },

    #[error("Unsupported newarray type code {0}")]
    UnsupportedArrayType(u8),

    #[error("Unsupported platform member {class}.{member}")]
    UnsupportedPlatformMember { class: String, member: String },

    #[error("Type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Field {class}.{field} expects {expected}, got {found}")]
    FieldTypeMismatch {
        class: String,
        field: String,
        expected: String,
        found: String,
    },

    #[error("Field {class}.{field} not found")]
    FieldNotFound { class: String, field: String },

    #[error("Operand stack underflow")]
    StackUnderflow,

    #[error("Local variable index {index} out of bounds (max_locals {len})")]
    LocalIndexOutOfBounds { index: usize, len: usize },

    #[error("Local variable {0} read before assignment")]
    UninitializedLocal(usize),

    #[error("Invalid heap reference {0}")]
    InvalidReference(HeapPtr),

    #[error("Array index {index} out of bounds for length {len}")]
    ArrayIndexOutOfBounds { index: i32, len: usize },

    #[error("Negative array size {0}")]
    NegativeArraySize(i32),

    #[error("/ by zero")]
    DivisionByZero,

    #[error("No active frame")]
    NoActiveFrame,

    #[error(transparent)]
    Io(#[from] io::Error),
}
