pub mod class_file;
pub mod error;
pub mod vm;

pub use crate::error::{Result, VmError};
pub use crate::vm::vm::VM;
