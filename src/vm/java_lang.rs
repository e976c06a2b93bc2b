use crate::error::{Result, VmError};
use crate::vm::memory::{HeapMemory, HeapObject};
use crate::vm::stack::Value;
use crate::vm::vm::VM;
use std::collections::HashMap;
use std::io::{self, Write};

pub const INIT_METHOD: &str = "<init>";
pub const CLINIT_METHOD: &str = "<clinit>";
pub const MAKE_CONCAT_WITH_CONSTANTS: &str = "makeConcatWithConstants";

const SYSTEM_CLASS: &str = "java/lang/System";
const PRINT_STREAM_CLASS: &str = "java/io/PrintStream";
const PRINTLN: &str = "println";
const PRINT: &str = "print";

const FD_FIELD: &str = "fd";
const STDOUT: i32 = 1;
const STDERR: i32 = 2;

const RECIPE_ARGUMENT: char = '\u{1}';
const RECIPE_CONSTANT: char = '\u{2}';

pub type NativeMethod = fn(&mut VM, &[Value]) -> Result<Option<Value>>;

const NATIVE_METHODS: &[(&str, &str, NativeMethod)] = &[
    (PRINT_STREAM_CLASS, PRINTLN, print_stream_println),
    (PRINT_STREAM_CLASS, PRINT, print_stream_print),
];

/// Platform classes are built in and never read from the classpath.
pub fn is_platform_class(class_name: &str) -> bool {
    class_name.starts_with("java/")
}

pub fn find_native(class_name: &str, name: &str) -> Option<NativeMethod> {
    NATIVE_METHODS
        .iter()
        .find(|(class, method, _)| *class == class_name && *method == name)
        .map(|(_, _, native)| *native)
}

/// Static fields of a platform class: `System.out` and `System.err`.
pub fn platform_statics(heap: &mut HeapMemory, class_name: &str) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    if class_name == SYSTEM_CLASS {
        let stream_tag = format!("L{}", PRINT_STREAM_CLASS);
        for &(name, fd) in &[("out", STDOUT), ("err", STDERR)] {
            let mut stream = HashMap::new();
            stream.insert(FD_FIELD.to_string(), Value::Int(fd));
            let ptr = heap.new_instance(PRINT_STREAM_CLASS, stream);
            fields.insert(name.to_string(), Value::reference(ptr, &stream_tag));
        }
    }
    fields
}

fn print_stream_println(vm: &mut VM, arguments: &[Value]) -> Result<Option<Value>> {
    print_stream(vm, arguments, true)
}

fn print_stream_print(vm: &mut VM, arguments: &[Value]) -> Result<Option<Value>> {
    print_stream(vm, arguments, false)
}

fn print_stream(vm: &mut VM, arguments: &[Value], newline: bool) -> Result<Option<Value>> {
    let (receiver, rest) = arguments.split_first().ok_or(VmError::StackUnderflow)?;
    let mut text = match rest {
        [] => String::new(),
        [value] => display_value(&vm.heap, value)?,
        _ => {
            return Err(VmError::UnsupportedPlatformMember {
                class: PRINT_STREAM_CLASS.to_string(),
                member: format!("{} with {} arguments", PRINTLN, rest.len()),
            })
        }
    };
    if newline {
        text.push('\n');
    }

    let fd = match receiver {
        Value::Reference(ptr, _) => vm.heap.get_field(*ptr, FD_FIELD)?.cloned(),
        _ => None,
    };
    match fd {
        Some(Value::Int(STDERR)) => io::stderr().write_all(text.as_bytes())?,
        _ => vm.write_out(&text)?,
    }
    Ok(None)
}

/// Text of a value the way `PrintStream.print` renders it.
pub fn display_value(heap: &HeapMemory, value: &Value) -> Result<String> {
    match value {
        Value::Int(value) => Ok(value.to_string()),
        Value::Boolean(value) => Ok(value.to_string()),
        Value::Char(value) => Ok(char_text(*value)),
        Value::Reference(ptr, tag) => match heap.get(*ptr)? {
            HeapObject::Str(value) => Ok(value.clone()),
            HeapObject::ArrayChar(chars) => Ok(String::from_utf16_lossy(chars)),
            _ => Err(VmError::TypeMismatch {
                expected: "printable value".to_string(),
                found: tag.clone(),
            }),
        },
    }
}

pub fn char_text(value: u16) -> String {
    String::from_utf16_lossy(&[value])
}

/// `StringConcatFactory.makeConcatWithConstants`: `\u{1}` takes the next operand,
/// `\u{2}` the next bootstrap constant.
pub fn concat_with_constants(
    recipe: &str,
    operands: &[String],
    constants: &[String],
) -> Result<String> {
    let mut operands = operands.iter();
    let mut constants = constants.iter();
    let mut result = String::with_capacity(recipe.len());
    for c in recipe.chars() {
        match c {
            RECIPE_ARGUMENT => {
                let operand = operands.next().ok_or_else(|| {
                    VmError::UnsupportedDynamicCallSite(format!(
                        "recipe {:?} needs more operands",
                        recipe
                    ))
                })?;
                result.push_str(operand);
            }
            RECIPE_CONSTANT => {
                let constant = constants.next().ok_or_else(|| {
                    VmError::UnsupportedDynamicCallSite(format!(
                        "recipe {:?} needs more constants",
                        recipe
                    ))
                })?;
                result.push_str(constant);
            }
            c => result.push(c),
        }
    }
    if operands.next().is_some() {
        return Err(VmError::UnsupportedDynamicCallSite(format!(
            "recipe {:?} leaves operands unused",
            recipe
        )));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_suffix() {
        let text = concat_with_constants("\u{1}!", &["7".to_string()], &[]).unwrap();
        assert_eq!(text, "7!");
    }

    #[test]
    fn test_concat_constants_and_operands() {
        let text = concat_with_constants(
            "x=\u{1}, \u{2}\u{1}",
            &["1".to_string(), "b".to_string()],
            &["a".to_string()],
        )
        .unwrap();
        assert_eq!(text, "x=1, ab");
    }

    #[test]
    fn test_concat_operand_mismatch() {
        assert!(matches!(
            concat_with_constants("\u{1}\u{1}", &["1".to_string()], &[]),
            Err(VmError::UnsupportedDynamicCallSite(_))
        ));
        assert!(matches!(
            concat_with_constants("none", &["1".to_string()], &[]),
            Err(VmError::UnsupportedDynamicCallSite(_))
        ));
    }

    #[test]
    fn test_platform_lookup() {
        assert!(is_platform_class("java/lang/System"));
        assert!(!is_platform_class("Square"));
        assert!(find_native(PRINT_STREAM_CLASS, PRINTLN).is_some());
        assert!(find_native(PRINT_STREAM_CLASS, "flush").is_none());
    }

    #[test]
    fn test_display_value() {
        let mut heap = HeapMemory::new();
        let hello = heap.new_string("hello");
        let chars = heap.alloc(HeapObject::ArrayChar(vec![104, 105]));
        assert_eq!(display_value(&heap, &Value::Int(-3)).unwrap(), "-3");
        assert_eq!(display_value(&heap, &Value::Char(65)).unwrap(), "A");
        assert_eq!(display_value(&heap, &Value::Boolean(true)).unwrap(), "true");
        assert_eq!(
            display_value(&heap, &Value::reference(hello, "Ljava/lang/String")).unwrap(),
            "hello"
        );
        assert_eq!(
            display_value(&heap, &Value::reference(chars, "[C")).unwrap(),
            "hi"
        );
    }
}
