pub mod class_loader;
mod instructions;
pub mod interpreter;
pub mod java_lang;
pub mod memory;
pub mod opcodes;
mod program;
pub mod stack;
pub mod vm;
