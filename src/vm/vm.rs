use crate::class_file::ClassFile;
use crate::error::{Result, VmError};
use crate::vm::class_loader::ClassLoader;
use crate::vm::memory::{HeapMemory, HeapPtr};
use crate::vm::program::Program;
use crate::vm::stack::{Stack, StackFrame};
use log::info;
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;

pub struct VM {
    pub stack: Stack,
    pub heap: HeapMemory,

    class_loader: ClassLoader,
    pub(crate) program: Program,
    out: Box<dyn Write>,
}

impl VM {
    pub fn new(classpath: impl Into<PathBuf>) -> Self {
        Self::with_output(classpath, Box::new(io::stdout()))
    }

    /// VM whose `System.out` writes to `out`.
    pub fn with_output(classpath: impl Into<PathBuf>, out: Box<dyn Write>) -> Self {
        Self {
            stack: Stack::new(),
            heap: HeapMemory::new(),
            class_loader: ClassLoader::new(classpath),
            program: Program::default(),
            out,
        }
    }

    /// Registers a class from memory; later lookups of its name never touch the disk.
    pub fn define_class(&mut self, bytes: &[u8]) -> Result<Rc<ClassFile>> {
        let class_file = ClassFile::parse(bytes)?;
        if let Some(existing) = self.program.find_class(class_file.name()) {
            return Ok(existing);
        }
        info!("Defined class {}", class_file.name());
        Ok(self.program.add_class(class_file))
    }

    pub fn get_or_load_class(&mut self, name: &str) -> Result<Rc<ClassFile>> {
        self.class_loader.load_class_into(name, &mut self.program)
    }

    pub fn loaded_classes(&self) -> &[Rc<ClassFile>] {
        &self.program.classes
    }

    pub fn statics_of(&self, class_name: &str) -> Option<HeapPtr> {
        self.program.statics(class_name)
    }

    pub(crate) fn frame(&mut self) -> Result<&mut StackFrame> {
        self.stack.top_frame_mut()
    }

    pub(crate) fn current_class(&self) -> Result<Rc<ClassFile>> {
        Ok(Rc::clone(&self.stack.top_frame()?.class))
    }

    pub(crate) fn write_out(&mut self, text: &str) -> Result<()> {
        self.out.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(VmError::from)
    }
}
