use crate::error::{Result, VmError};
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

pub const MAX_ARRAY_DIMENSIONS: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    /// Type tag carried by runtime values: `I`, `[C`, `Ljava/lang/String`.
    pub fn tag(&self) -> String {
        match self {
            FieldType::Byte => "B".to_string(),
            FieldType::Char => "C".to_string(),
            FieldType::Double => "D".to_string(),
            FieldType::Float => "F".to_string(),
            FieldType::Int => "I".to_string(),
            FieldType::Long => "J".to_string(),
            FieldType::Short => "S".to_string(),
            FieldType::Boolean => "Z".to_string(),
            FieldType::Object(class_name) => format!("L{}", class_name),
            FieldType::Array(element) => format!("[{}", element.tag()),
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, FieldType::Object(name) if name == "java/lang/String")
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    /// `None` for `V`
    pub return_type: Option<FieldType>,
}

pub fn parse_method_descriptor(descriptor: &str) -> Result<MethodDescriptor> {
    let malformed = || VmError::MalformedDescriptor(descriptor.to_string());
    let mut chars = descriptor.chars().peekable();
    if chars.next() != Some('(') {
        return Err(malformed());
    }

    let mut parameters = vec![];
    loop {
        match chars.peek() {
            Some(')') => {
                chars.next();
                break;
            }
            Some(_) => parameters.push(parse_field_type(&mut chars, descriptor)?),
            None => return Err(malformed()),
        }
    }

    let return_type = if chars.peek() == Some(&'V') {
        chars.next();
        None
    } else {
        Some(parse_field_type(&mut chars, descriptor)?)
    };
    if chars.next().is_some() {
        return Err(malformed());
    }

    Ok(MethodDescriptor {
        parameters,
        return_type,
    })
}

pub fn parse_field_descriptor(descriptor: &str) -> Result<FieldType> {
    let mut chars = descriptor.chars().peekable();
    let field_type = parse_field_type(&mut chars, descriptor)?;
    if chars.next().is_some() {
        return Err(VmError::MalformedDescriptor(descriptor.to_string()));
    }
    Ok(field_type)
}

fn parse_field_type(chars: &mut Peekable<Chars>, descriptor: &str) -> Result<FieldType> {
    let malformed = || VmError::MalformedDescriptor(descriptor.to_string());
    let field_type = match chars.next().ok_or_else(malformed)? {
        'B' => FieldType::Byte,
        'C' => FieldType::Char,
        'D' => FieldType::Double,
        'F' => FieldType::Float,
        'I' => FieldType::Int,
        'J' => FieldType::Long,
        'S' => FieldType::Short,
        'Z' => FieldType::Boolean,
        '[' => {
            let mut dimensions = 1;
            while chars.peek() == Some(&'[') {
                chars.next();
                dimensions += 1;
            }
            if dimensions > MAX_ARRAY_DIMENSIONS {
                return Err(malformed());
            }
            let mut field_type = parse_field_type(chars, descriptor)?;
            for _ in 0..dimensions {
                field_type = FieldType::Array(Box::new(field_type));
            }
            field_type
        }
        'L' => {
            let mut class_name = String::new();
            loop {
                match chars.next() {
                    Some(';') => break,
                    Some(c) => class_name.push(c),
                    None => return Err(malformed()),
                }
            }
            if class_name.is_empty() {
                return Err(malformed());
            }
            FieldType::Object(class_name)
        }
        _ => return Err(malformed()),
    };
    Ok(field_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_descriptor() {
        let descriptor = parse_method_descriptor("([Ljava/lang/String;)V").unwrap();
        assert_eq!(
            descriptor.parameters,
            vec![FieldType::Array(Box::new(FieldType::Object(
                "java/lang/String".to_string()
            )))]
        );
        assert_eq!(descriptor.return_type, None);
    }

    #[test]
    fn test_mixed_parameters() {
        let descriptor = parse_method_descriptor("(IZ[CLjava/lang/String;)I").unwrap();
        let tags: Vec<String> = descriptor.parameters.iter().map(|t| t.tag()).collect();
        assert_eq!(tags, vec!["I", "Z", "[C", "Ljava/lang/String"]);
        assert_eq!(descriptor.return_type, Some(FieldType::Int));
        assert!(descriptor.parameters[3].is_string());
    }

    #[test]
    fn test_nested_arrays() {
        let field = parse_field_descriptor("[[I").unwrap();
        assert_eq!(field.tag(), "[[I");
    }

    #[test]
    fn test_array_dimension_limit() {
        let deepest = format!("{}I", "[".repeat(MAX_ARRAY_DIMENSIONS));
        assert_eq!(parse_field_descriptor(&deepest).unwrap().tag(), deepest);

        let too_deep = format!("{}I", "[".repeat(MAX_ARRAY_DIMENSIONS + 1));
        assert!(matches!(
            parse_field_descriptor(&too_deep),
            Err(VmError::MalformedDescriptor(_))
        ));
        let huge = format!("({}I)V", "[".repeat(65_000));
        assert!(matches!(
            parse_method_descriptor(&huge),
            Err(VmError::MalformedDescriptor(_))
        ));
    }

    #[test]
    fn test_malformed() {
        for bad in &["I)V", "(I", "(Ljava/lang/String", "(I)", "(Q)V", "()VV", "(L;)V", ""] {
            assert!(
                matches!(parse_method_descriptor(bad), Err(VmError::MalformedDescriptor(_))),
                "{} should be rejected",
                bad
            );
        }
        assert!(matches!(
            parse_field_descriptor("II"),
            Err(VmError::MalformedDescriptor(_))
        ));
    }
}
