use crate::class_file::constant_pool::Constant;
use crate::class_file::{AccessFlags, ClassFile};
use crate::error::{Result, VmError};
use crate::vm::memory::{element_index, HeapObject};
use crate::vm::opcodes::*;
use crate::vm::stack::{StackFrame, Value, CHAR_ARRAY, INT_ARRAY, STRING};
use crate::vm::vm::VM;
use log::{debug, info, trace, warn};
use std::rc::Rc;

pub const MAIN_METHOD: &str = "main";
pub const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

pub enum StackModification {
    Nop,
    Call {
        class: Rc<ClassFile>,
        method_idx: usize,
        arguments: Vec<Value>,
    },
    Return(Option<Value>),
}

impl VM {
    /// Loads `class_name`, runs its `main` until the last frame returns.
    /// Frames left over from a failed run are discarded first.
    pub fn start(&mut self, class_name: &str) -> Result<()> {
        if !self.stack.is_empty() {
            warn!("Discarding {} frames of an aborted run", self.stack.depth());
            self.stack.clear();
        }
        let class = self.get_or_load_class(class_name)?;
        self.enter_main(class)?;
        self.do_loop()?;
        self.flush()
    }

    /// Pushes the frame of `public static void main(String[])` without running it.
    pub fn enter_main(&mut self, class: Rc<ClassFile>) -> Result<()> {
        let entry_flags = AccessFlags::PUBLIC | AccessFlags::STATIC;
        let method_idx = match class.find_method(MAIN_METHOD, MAIN_DESCRIPTOR) {
            Some((idx, method)) if method.access_flags == entry_flags => idx,
            _ => return Err(VmError::EntryPointNotFound(class.name().to_string())),
        };
        info!("Start {}#{}", class.name(), MAIN_METHOD);
        let frame = StackFrame::new(class, method_idx, vec![])?;
        self.stack.push_frame(frame);
        Ok(())
    }

    pub fn do_loop(&mut self) -> Result<()> {
        while !self.stack.is_empty() {
            self.step()?;
        }
        Ok(())
    }

    /// Executes exactly one instruction of the top frame.
    pub fn step(&mut self) -> Result<()> {
        match self.do_command()? {
            StackModification::Nop => {}
            StackModification::Call {
                class,
                method_idx,
                arguments,
            } => self.call(class, method_idx, arguments)?,
            StackModification::Return(value) => self.return_call(value)?,
        }
        Ok(())
    }

    fn call(
        &mut self,
        class: Rc<ClassFile>,
        method_idx: usize,
        arguments: Vec<Value>,
    ) -> Result<()> {
        let frame = StackFrame::new(class, method_idx, arguments)?;
        debug!(
            "Call {}#{}({:?})",
            frame.class.name(),
            frame.method().name,
            frame.inspect_locals()
        );
        self.stack.push_frame(frame);
        Ok(())
    }

    fn return_call(&mut self, value: Option<Value>) -> Result<()> {
        let frame = self.stack.pop_frame().ok_or(VmError::NoActiveFrame)?;
        match value {
            Some(value) => {
                debug!(
                    "Return {:?} from {}#{}",
                    value,
                    frame.class.name(),
                    frame.method().name
                );
                // the outermost frame has nobody to hand the value to
                if let Ok(caller) = self.stack.top_frame_mut() {
                    caller.push(value);
                }
            }
            None => debug!("Return from {}#{}", frame.class.name(), frame.method().name),
        }
        Ok(())
    }

    fn do_command(&mut self) -> Result<StackModification> {
        let frame = self.stack.top_frame_mut()?;
        let cmd = match frame.next_opcode()? {
            Some(cmd) => cmd,
            None => {
                return Err(VmError::MissingReturn {
                    class: frame.class.name().to_string(),
                    name: frame.method().name.to_string(),
                })
            }
        };
        trace!("Process cmd [{}] at [{}]", cmd, frame.instruction_start());
        match cmd {
            ICONST_M1 => frame.push(Value::Int(-1)),
            ICONST_0..=ICONST_5 => frame.push(Value::Int((cmd - ICONST_0) as i32)),
            BIPUSH => {
                let byte_value = frame.read_i8()?;
                frame.push(Value::Int(byte_value as i32))
            }
            LDC => {
                let index = frame.read_u8()? as u16;
                let value = match frame.class.constant_pool.get(index)? {
                    Constant::Integer(value) => Value::Int(*value),
                    Constant::String { value, .. } => {
                        Value::reference(self.heap.new_string(value), STRING)
                    }
                    other => {
                        return Err(VmError::UnsupportedLdcOperand {
                            index,
                            tag: other.tag_name(),
                        })
                    }
                };
                frame.push(value);
            }

            ILOAD | ALOAD => {
                let idx = frame.read_u8()? as usize;
                let value = frame.get_local(idx)?;
                frame.push(value)
            }
            ILOAD_0..=ILOAD_3 => {
                let value = frame.get_local((cmd - ILOAD_0) as usize)?;
                frame.push(value)
            }
            ALOAD_0..=ALOAD_3 => {
                let value = frame.get_local((cmd - ALOAD_0) as usize)?;
                frame.push(value)
            }
            IALOAD => {
                let index = frame.pop_int()?;
                let array = frame.pop_reference(INT_ARRAY)?;
                let values = self.heap.int_array(array)?;
                let value = values[element_index(index, values.len())?];
                frame.push(Value::Int(value));
            }
            CALOAD => {
                let index = frame.pop_int()?;
                let array = frame.pop_reference(CHAR_ARRAY)?;
                let values = self.heap.char_array(array)?;
                let value = values[element_index(index, values.len())?];
                frame.push(Value::Char(value));
            }

            ISTORE | ASTORE => {
                let idx = frame.read_u8()? as usize;
                let value = frame.pop()?;
                frame.set_local(idx, value)?;
            }
            ISTORE_0..=ISTORE_3 => {
                let value = frame.pop()?;
                frame.set_local((cmd - ISTORE_0) as usize, value)?;
            }
            ASTORE_0..=ASTORE_3 => {
                let value = frame.pop()?;
                frame.set_local((cmd - ASTORE_0) as usize, value)?;
            }
            IASTORE => {
                let value = frame.pop_int()?;
                let index = frame.pop_int()?;
                let array = frame.pop_reference(INT_ARRAY)?;
                let values = self.heap.int_array(array)?;
                let idx = element_index(index, values.len())?;
                values[idx] = value;
            }
            CASTORE => {
                let value = frame.pop_int()? as u16;
                let index = frame.pop_int()?;
                let array = frame.pop_reference(CHAR_ARRAY)?;
                let values = self.heap.char_array(array)?;
                let idx = element_index(index, values.len())?;
                values[idx] = value;
            }

            POP => {
                frame.pop()?;
            }
            DUP => frame.dup()?,

            IADD => {
                let i2 = frame.pop_int()?;
                let i1 = frame.pop_int()?;
                frame.push(Value::Int(i1.wrapping_add(i2)));
            }
            ISUB => {
                let i2 = frame.pop_int()?;
                let i1 = frame.pop_int()?;
                frame.push(Value::Int(i1.wrapping_sub(i2)));
            }
            IMUL => {
                let i2 = frame.pop_int()?;
                let i1 = frame.pop_int()?;
                frame.push(Value::Int(i1.wrapping_mul(i2)));
            }
            IREM => {
                let i2 = frame.pop_int()?;
                let i1 = frame.pop_int()?;
                if i2 == 0 {
                    return Err(VmError::DivisionByZero);
                }
                frame.push(Value::Int(i1.wrapping_rem(i2)));
            }
            ISHL => {
                let shift = frame.pop_int()? as u32 & 0x1f;
                let value = frame.pop_int()?;
                frame.push(Value::Int(value.wrapping_shl(shift)));
            }
            ISHR => {
                let shift = frame.pop_int()? as u32 & 0x1f;
                let value = frame.pop_int()?;
                frame.push(Value::Int(value >> shift));
            }
            IUSHR => {
                let shift = frame.pop_int()? as u32 & 0x1f;
                let value = frame.pop_int()?;
                frame.push(Value::Int(((value as u32) >> shift) as i32));
            }
            IINC => {
                let idx = frame.read_u8()? as usize;
                let delta = frame.read_i8()?;
                let value = match frame.get_local(idx)? {
                    Value::Int(value) => value,
                    other => {
                        return Err(VmError::TypeMismatch {
                            expected: "I".to_string(),
                            found: other.type_tag().to_string(),
                        })
                    }
                };
                frame.set_local(idx, Value::Int(value.wrapping_add(delta as i32)))?;
            }

            IFEQ => {
                let (then_offset, value) = Self::if_z_prepare(frame)?;
                if value == 0 {
                    frame.jmp_relative(then_offset)?
                }
            }
            IFNE => {
                let (then_offset, value) = Self::if_z_prepare(frame)?;
                if value != 0 {
                    frame.jmp_relative(then_offset)?
                }
            }
            IFGE => {
                let (then_offset, value) = Self::if_z_prepare(frame)?;
                if value >= 0 {
                    frame.jmp_relative(then_offset)?
                }
            }
            IFLE => {
                let (then_offset, value) = Self::if_z_prepare(frame)?;
                if value <= 0 {
                    frame.jmp_relative(then_offset)?
                }
            }
            IF_ICMPEQ => {
                let (then_offset, i1, i2) = Self::iif_prepare(frame)?;
                if i1 == i2 {
                    frame.jmp_relative(then_offset)?
                }
            }
            IF_ICMPNE => {
                let (then_offset, i1, i2) = Self::iif_prepare(frame)?;
                if i1 != i2 {
                    frame.jmp_relative(then_offset)?
                }
            }
            IF_ICMPLT => {
                let (then_offset, i1, i2) = Self::iif_prepare(frame)?;
                if i1 < i2 {
                    frame.jmp_relative(then_offset)?
                }
            }
            IF_ICMPGE => {
                let (then_offset, i1, i2) = Self::iif_prepare(frame)?;
                if i1 >= i2 {
                    frame.jmp_relative(then_offset)?
                }
            }
            IF_ICMPGT => {
                let (then_offset, i1, i2) = Self::iif_prepare(frame)?;
                if i1 > i2 {
                    frame.jmp_relative(then_offset)?
                }
            }
            GOTO => {
                let offset = frame.read_code_offset()?;
                frame.jmp_relative(offset)?
            }

            IRETURN => {
                let value = frame.pop_int()?;
                return Ok(StackModification::Return(Some(Value::Int(value))));
            }
            ARETURN => {
                let (ptr, tag) = frame.pop_any_reference()?;
                return Ok(StackModification::Return(Some(Value::Reference(ptr, tag))));
            }
            RETURN => return Ok(StackModification::Return(None)),

            GETSTATIC => {
                let index = frame.read_u16()?;
                return self.get_static(index);
            }
            PUTSTATIC => {
                let index = frame.read_u16()?;
                return self.put_static(index);
            }
            GETFIELD => {
                let index = frame.read_u16()?;
                return self.get_field(index);
            }
            PUTFIELD => {
                let index = frame.read_u16()?;
                return self.put_field(index);
            }
            INVOKEVIRTUAL => {
                let index = frame.read_u16()?;
                return self.invoke_virtual(index);
            }
            INVOKESPECIAL => {
                let index = frame.read_u16()?;
                return self.invoke_special(index);
            }
            INVOKESTATIC => {
                let index = frame.read_u16()?;
                return self.invoke_static(index);
            }
            INVOKEDYNAMIC => {
                let index = frame.read_u16()?;
                return self.invoke_dynamic(index);
            }
            NEW => {
                let index = frame.read_u16()?;
                return self.new_object(index);
            }
            NEWARRAY => {
                let array_type = frame.read_u8()?;
                let count = frame.pop_int()?;
                if count < 0 {
                    return Err(VmError::NegativeArraySize(count));
                }
                let (object, tag) = match array_type {
                    T_INT => (HeapObject::ArrayInt(vec![0; count as usize]), INT_ARRAY),
                    T_CHAR => (HeapObject::ArrayChar(vec![0; count as usize]), CHAR_ARRAY),
                    _ => return Err(VmError::UnsupportedArrayType(array_type)),
                };
                let ptr = self.heap.alloc(object);
                frame.push(Value::reference(ptr, tag));
            }
            ARRAYLENGTH => {
                let (array, _) = frame.pop_any_reference()?;
                let length = self.heap.array_length(array)?;
                frame.push(Value::Int(length as i32));
            }
            //no threads, nothing to lock
            MONITORENTER | MONITOREXIT => {
                frame.pop_any_reference()?;
            }

            _ => {
                return Err(VmError::UnsupportedOpcode {
                    opcode: cmd,
                    pc: frame.instruction_start(),
                })
            }
        }
        Ok(StackModification::Nop)
    }

    fn iif_prepare(frame: &mut StackFrame) -> Result<(i32, i32, i32)> {
        let then_offset = frame.read_code_offset()?;
        let i2 = frame.pop_int()?;
        let i1 = frame.pop_int()?;
        Ok((then_offset, i1, i2))
    }

    fn if_z_prepare(frame: &mut StackFrame) -> Result<(i32, i32)> {
        let then_offset = frame.read_code_offset()?;
        let value = frame.pop_int()?;
        Ok((then_offset, value))
    }
}
