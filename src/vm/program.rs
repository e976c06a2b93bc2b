use crate::class_file::ClassFile;
use crate::vm::memory::HeapPtr;
use std::collections::HashMap;
use std::rc::Rc;

/// Everything loaded so far: parsed classes and their static state.
#[derive(Default)]
pub struct Program {
    pub classes: Vec<Rc<ClassFile>>,
    statics: HashMap<String, HeapPtr>,
}

impl Program {
    pub fn find_class(&self, name: &str) -> Option<Rc<ClassFile>> {
        self.classes
            .iter()
            .find(|class| class.name() == name)
            .map(Rc::clone)
    }

    pub fn add_class(&mut self, class: ClassFile) -> Rc<ClassFile> {
        let class = Rc::new(class);
        self.classes.push(Rc::clone(&class));
        class
    }

    /// Static instance of an initialized class.
    pub fn statics(&self, class_name: &str) -> Option<HeapPtr> {
        self.statics.get(class_name).copied()
    }

    pub fn register_statics(&mut self, class_name: &str, ptr: HeapPtr) {
        self.statics.insert(class_name.to_string(), ptr);
    }
}
