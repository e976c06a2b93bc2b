use crate::class_file::ClassFile;
use crate::error::{Result, VmError};
use crate::vm::program::Program;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Clone)]
pub struct ClassLoader {
    base_path: PathBuf,
}

impl Default for ClassLoader {
    fn default() -> Self {
        ClassLoader::new(".")
    }
}

impl ClassLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// `a/b/C` lives at `<base>/a/b/C.class`.
    pub fn class_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{}.class", name))
    }

    pub fn load_class_into(&self, name: &str, program: &mut Program) -> Result<Rc<ClassFile>> {
        if let Some(class) = program.find_class(name) {
            return Ok(class);
        }

        let path = self.class_path(name);
        let data = fs::read(&path).map_err(|source| VmError::ClassNotFound {
            name: name.to_string(),
            path: path.clone(),
            source,
        })?;
        let class_file = ClassFile::parse(&data)?;
        if class_file.name() != name {
            return Err(VmError::MalformedClassFile(format!(
                "{} defines class {}, expected {}",
                path.display(),
                class_file.name(),
                name
            )));
        }

        info!("Loaded class {} from {}", name, path.display());
        Ok(program.add_class(class_file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_path() {
        let loader = ClassLoader::new("/tmp/classes");
        assert_eq!(loader.base_path(), Path::new("/tmp/classes"));
        assert_eq!(
            loader.class_path("demo/util/Square"),
            PathBuf::from("/tmp/classes/demo/util/Square.class")
        );
        assert_eq!(
            ClassLoader::default().class_path("Square"),
            PathBuf::from("./Square.class")
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ClassLoader::new(dir.path());
        let mut program = Program::default();
        match loader.load_class_into("Nowhere", &mut program) {
            Err(VmError::ClassNotFound { name, path, .. }) => {
                assert_eq!(name, "Nowhere");
                assert_eq!(path, dir.path().join("Nowhere.class"));
            }
            other => panic!("unexpected {:?}", other.map(|c| c.name().to_string())),
        }
        assert!(program.classes.is_empty());
    }
}
