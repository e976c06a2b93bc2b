use crate::class_file::constant_pool::{Constant, ConstantPool, MemberRef};
use crate::class_file::descriptor::{
    parse_field_descriptor, parse_method_descriptor, FieldType, MethodDescriptor,
};
use crate::class_file::ClassFile;
use crate::error::{Result, VmError};
use crate::vm::interpreter::StackModification;
use crate::vm::java_lang::{
    self, CLINIT_METHOD, INIT_METHOD, MAKE_CONCAT_WITH_CONSTANTS,
};
use crate::vm::memory::HeapPtr;
use crate::vm::stack::{StackFrame, Value, CHAR_ARRAY, STRING};
use crate::vm::vm::VM;
use log::{debug, info, trace};
use std::collections::HashMap;
use std::rc::Rc;

enum Initialization {
    Ready(HeapPtr),
    /// `<clinit>` must run first; the current instruction has been rewound.
    Pending(StackModification),
}

impl VM {
    pub(crate) fn get_static(&mut self, index: u16) -> Result<StackModification> {
        let (field, field_type) = self.resolve_field(index)?;
        let statics = match self.initialize_class(field.class_name())? {
            Initialization::Ready(ptr) => ptr,
            Initialization::Pending(call) => return Ok(call),
        };
        let value = self
            .heap
            .get_field(statics, field.name())?
            .cloned()
            .ok_or_else(|| missing_field(&field))?;
        check_field(&field, &field_type, &value)?;
        self.frame()?.push(value);
        Ok(StackModification::Nop)
    }

    pub(crate) fn put_static(&mut self, index: u16) -> Result<StackModification> {
        let (field, field_type) = self.resolve_field(index)?;
        let statics = match self.initialize_class(field.class_name())? {
            Initialization::Ready(ptr) => ptr,
            Initialization::Pending(call) => return Ok(call),
        };
        let value = self.frame()?.pop()?;
        check_field(&field, &field_type, &value)?;
        self.heap.set_field(statics, field.name(), value)?;
        Ok(StackModification::Nop)
    }

    pub(crate) fn get_field(&mut self, index: u16) -> Result<StackModification> {
        let (field, field_type) = self.resolve_field(index)?;
        let object_tag = format!("L{}", field.class_name());
        let object = self.frame()?.pop_reference(&object_tag)?;
        let value = self
            .heap
            .get_field(object, field.name())?
            .cloned()
            .ok_or_else(|| missing_field(&field))?;
        check_field(&field, &field_type, &value)?;
        self.frame()?.push(value);
        Ok(StackModification::Nop)
    }

    pub(crate) fn put_field(&mut self, index: u16) -> Result<StackModification> {
        let (field, field_type) = self.resolve_field(index)?;
        let object_tag = format!("L{}", field.class_name());
        let frame = self.frame()?;
        let value = frame.pop()?;
        let object = frame.pop_reference(&object_tag)?;
        check_field(&field, &field_type, &value)?;
        self.heap.set_field(object, field.name(), value)?;
        Ok(StackModification::Nop)
    }

    pub(crate) fn new_object(&mut self, index: u16) -> Result<StackModification> {
        let class_name = self
            .current_class()?
            .constant_pool
            .class_name(index)?
            .to_string();
        let fields = if java_lang::is_platform_class(&class_name) {
            HashMap::new()
        } else {
            if let Initialization::Pending(call) = self.initialize_class(&class_name)? {
                return Ok(call);
            }
            let class = self.get_or_load_class(&class_name)?;
            default_fields(&class, false)?
        };
        let ptr = self.heap.new_instance(&class_name, fields);
        trace!("New {} at {}", class_name, ptr);
        self.frame()?
            .push(Value::reference(ptr, &format!("L{}", class_name)));
        Ok(StackModification::Nop)
    }

    pub(crate) fn invoke_static(&mut self, index: u16) -> Result<StackModification> {
        let (method, descriptor) = self.resolve_method(index)?;
        let arguments = self.pop_arguments(&method, &descriptor)?;
        self.dispatch(&method, arguments)
    }

    pub(crate) fn invoke_virtual(&mut self, index: u16) -> Result<StackModification> {
        let (method, descriptor) = self.resolve_method(index)?;
        let mut arguments = self.pop_arguments(&method, &descriptor)?;
        let (receiver, tag) = self.frame()?.pop_any_reference()?;
        let expected = format!("L{}", method.class_name());
        // no inheritance: the receiver is exactly the referenced class
        if !java_lang::is_platform_class(method.class_name()) && tag != expected {
            return Err(VmError::TypeMismatch {
                expected,
                found: tag,
            });
        }
        arguments.insert(0, Value::Reference(receiver, tag));
        self.dispatch(&method, arguments)
    }

    pub(crate) fn invoke_special(&mut self, index: u16) -> Result<StackModification> {
        let (method, descriptor) = self.resolve_method(index)?;
        if method.name() != INIT_METHOD {
            return self.invoke_virtual(index);
        }
        // constructors are not executed
        let arguments = self.pop_arguments(&method, &descriptor)?;
        let (receiver, _) = self.frame()?.pop_any_reference()?;
        trace!(
            "Skip {}#{}({:?}) on {}",
            method.class_name(),
            INIT_METHOD,
            arguments,
            receiver
        );
        Ok(StackModification::Nop)
    }

    pub(crate) fn invoke_dynamic(&mut self, index: u16) -> Result<StackModification> {
        let padding = self.frame()?.read_u16()?;
        if padding != 0 {
            return Err(VmError::MalformedBytecode(format!(
                "invokedynamic #{} followed by {:#06x} instead of two zero bytes",
                index, padding
            )));
        }

        let class = self.current_class()?;
        let call_site = class.constant_pool.invoke_dynamic(index)?;
        let name = &*call_site.name_and_type.name;
        if name != MAKE_CONCAT_WITH_CONSTANTS {
            return Err(VmError::UnsupportedDynamicCallSite(name.to_string()));
        }
        let bootstrap = class
            .bootstrap_methods()
            .and_then(|methods| methods.get(call_site.bootstrap_method_attr_index as usize))
            .ok_or_else(|| {
                VmError::MalformedClassFile(format!(
                    "{} has no bootstrap method {}",
                    class.name(),
                    call_site.bootstrap_method_attr_index
                ))
            })?;
        let handle = class.constant_pool.method_handle(bootstrap.method_ref)?;
        if handle.reference.name() != MAKE_CONCAT_WITH_CONSTANTS {
            return Err(VmError::UnsupportedDynamicCallSite(format!(
                "{}#{}",
                handle.reference.class_name(),
                handle.reference.name()
            )));
        }

        let (recipe, constants) = match bootstrap.arguments.split_first() {
            Some((&recipe_index, constants)) => (
                recipe_text(&class.constant_pool, recipe_index)?,
                constants
                    .iter()
                    .map(|&i| constant_text(&class.constant_pool, i))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => {
                return Err(VmError::UnsupportedDynamicCallSite(format!(
                    "{} without a recipe",
                    name
                )))
            }
        };
        let descriptor = parse_method_descriptor(&call_site.name_and_type.descriptor)?;
        match &descriptor.return_type {
            Some(return_type) if return_type.is_string() => {}
            _ => {
                return Err(VmError::UnsupportedDynamicCallSite(format!(
                    "{}{}",
                    name, call_site.name_and_type.descriptor
                )))
            }
        }

        let operands = self.pop_concat_operands(&descriptor)?;
        let text = java_lang::concat_with_constants(&recipe, &operands, &constants)?;
        debug!("Concat {:?} with {:?} = {:?}", recipe, operands, text);
        let ptr = self.heap.new_string(&text);
        self.frame()?.push(Value::reference(ptr, STRING));
        Ok(StackModification::Nop)
    }

    fn resolve_field(&self, index: u16) -> Result<(MemberRef, FieldType)> {
        let field = self.current_class()?.constant_pool.field_ref(index)?.clone();
        let field_type = parse_field_descriptor(field.descriptor())?;
        Ok((field, field_type))
    }

    fn resolve_method(&self, index: u16) -> Result<(MemberRef, MethodDescriptor)> {
        let method = self.current_class()?.constant_pool.method_ref(index)?.clone();
        let descriptor = parse_method_descriptor(method.descriptor())?;
        Ok((method, descriptor))
    }

    /// Pops the declared parameters, returned in declaration order.
    fn pop_arguments(
        &mut self,
        method: &MemberRef,
        descriptor: &MethodDescriptor,
    ) -> Result<Vec<Value>> {
        let native = java_lang::is_platform_class(method.class_name());
        let frame = self.frame()?;
        let mut arguments = descriptor
            .parameters
            .iter()
            .rev()
            .map(|parameter| pop_argument(frame, parameter, native))
            .collect::<Result<Vec<_>>>()?;
        arguments.reverse();
        Ok(arguments)
    }

    fn pop_concat_operands(&mut self, descriptor: &MethodDescriptor) -> Result<Vec<String>> {
        let frame = self.stack.top_frame_mut()?;
        let mut operands = Vec::with_capacity(descriptor.parameters.len());
        for parameter in descriptor.parameters.iter().rev() {
            let text = match parameter {
                FieldType::Int => frame.pop_int()?.to_string(),
                FieldType::Char => java_lang::char_text(frame.pop_int()? as u16),
                FieldType::Boolean => (frame.pop_int()? != 0).to_string(),
                parameter if parameter.is_string() => {
                    let ptr = frame.pop_reference(STRING)?;
                    self.heap.string(ptr)?.to_string()
                }
                other => return Err(VmError::UnsupportedDescriptor(other.tag())),
            };
            operands.push(text);
        }
        operands.reverse();
        Ok(operands)
    }

    fn dispatch(&mut self, method: &MemberRef, arguments: Vec<Value>) -> Result<StackModification> {
        let class_name = method.class_name();
        if java_lang::is_platform_class(class_name) {
            let native = java_lang::find_native(class_name, method.name()).ok_or_else(|| {
                VmError::UnsupportedPlatformMember {
                    class: class_name.to_string(),
                    member: format!("{}{}", method.name(), method.descriptor()),
                }
            })?;
            debug!("Call native {}#{}({:?})", class_name, method.name(), arguments);
            if let Some(value) = native(self, &arguments)? {
                self.frame()?.push(value);
            }
            return Ok(StackModification::Nop);
        }

        let class = self.get_or_load_class(class_name)?;
        let method_idx = class
            .find_method(method.name(), method.descriptor())
            .map(|(idx, _)| idx)
            .ok_or_else(|| VmError::MethodNotFound {
                class: class_name.to_string(),
                name: method.name().to_string(),
                descriptor: method.descriptor().to_string(),
            })?;
        Ok(StackModification::Call {
            class,
            method_idx,
            arguments,
        })
    }

    /// Static instance of `class_name`, allocating it and scheduling `<clinit>` on first use.
    fn initialize_class(&mut self, class_name: &str) -> Result<Initialization> {
        if let Some(ptr) = self.program.statics(class_name) {
            return Ok(Initialization::Ready(ptr));
        }

        if java_lang::is_platform_class(class_name) {
            let fields = java_lang::platform_statics(&mut self.heap, class_name);
            let ptr = self.heap.new_instance(class_name, fields);
            self.program.register_statics(class_name, ptr);
            return Ok(Initialization::Ready(ptr));
        }

        let class = self.get_or_load_class(class_name)?;
        let fields = default_fields(&class, true)?;
        let ptr = self.heap.new_instance(class_name, fields);
        self.program.register_statics(class_name, ptr);
        info!("Initialize {}", class_name);

        match class.find_method(CLINIT_METHOD, "()V") {
            Some((method_idx, _)) => {
                self.frame()?.restart_instruction()?;
                Ok(Initialization::Pending(StackModification::Call {
                    class: Rc::clone(&class),
                    method_idx,
                    arguments: vec![],
                }))
            }
            None => Ok(Initialization::Ready(ptr)),
        }
    }
}

/// Natives also take `char`; bytecode methods only `I`, `Z`, `[C` and `String`.
fn pop_argument(frame: &mut StackFrame, parameter: &FieldType, native: bool) -> Result<Value> {
    match parameter {
        FieldType::Int => Ok(Value::Int(frame.pop_int()?)),
        FieldType::Boolean => Ok(Value::Boolean(frame.pop_int()? != 0)),
        FieldType::Char if native => Ok(Value::Char(frame.pop_int()? as u16)),
        FieldType::Array(element) if **element == FieldType::Char => {
            Ok(Value::reference(frame.pop_reference(CHAR_ARRAY)?, CHAR_ARRAY))
        }
        parameter if parameter.is_string() => {
            Ok(Value::reference(frame.pop_reference(STRING)?, STRING))
        }
        other => Err(VmError::UnsupportedDescriptor(other.tag())),
    }
}

/// Defaults for the static (or instance) primitive fields of `class`.
fn default_fields(class: &ClassFile, statics: bool) -> Result<HashMap<String, Value>> {
    let mut fields = HashMap::new();
    for field in class.fields.iter().filter(|f| f.is_static() == statics) {
        if let Some(value) = Value::default_for(&field.field_type()?) {
            fields.insert(field.name.to_string(), value);
        }
    }
    Ok(fields)
}

fn check_field(field: &MemberRef, field_type: &FieldType, value: &Value) -> Result<()> {
    if value.conforms_to(field_type) {
        return Ok(());
    }
    Err(VmError::FieldTypeMismatch {
        class: field.class_name().to_string(),
        field: field.name().to_string(),
        expected: field_type.tag(),
        found: value.type_tag().to_string(),
    })
}

fn missing_field(field: &MemberRef) -> VmError {
    if java_lang::is_platform_class(field.class_name()) {
        return VmError::UnsupportedPlatformMember {
            class: field.class_name().to_string(),
            member: field.name().to_string(),
        };
    }
    VmError::FieldNotFound {
        class: field.class_name().to_string(),
        field: field.name().to_string(),
    }
}

fn recipe_text(pool: &ConstantPool, index: u16) -> Result<String> {
    match pool.get(index)? {
        Constant::String { value, .. } => Ok(value.to_string()),
        other => Err(VmError::UnsupportedDynamicCallSite(format!(
            "recipe constant #{} is {}",
            index,
            other.tag_name()
        ))),
    }
}

fn constant_text(pool: &ConstantPool, index: u16) -> Result<String> {
    match pool.get(index)? {
        Constant::String { value, .. } => Ok(value.to_string()),
        Constant::Integer(value) => Ok(value.to_string()),
        other => Err(VmError::UnsupportedDynamicCallSite(format!(
            "concat constant #{} is {}",
            index,
            other.tag_name()
        ))),
    }
}
