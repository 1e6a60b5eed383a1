//! Per-opcode processors. Each one pops its operands, does its work and
//! reports how control continues. Registered into the dispatch table by
//! opcode family.

use crate::bytecode::Instruction;
use crate::descriptor::{MethodDescriptor, PrimitiveType};
use crate::error::VmError;
use crate::interpreter::{Flow, Interpreter};
use crate::keys::{FieldKey, MethodKey};
use crate::thread::VmThread;
use crate::throw_exception;
use crate::vm::{FieldSite, Value, VirtualMachine};
use std::sync::atomic::{Ordering, fence};

fn branch_target(pc: usize, offset: i32) -> usize {
    (pc as i64 + offset as i64) as usize
}

fn jump(thread: &VmThread, insn: &Instruction) -> Result<Flow, VmError> {
    let pc = thread.stack.pc()?;
    Ok(Flow::Jump(branch_target(pc, insn.branch()?)))
}

fn jump_if(thread: &mut VmThread, insn: &Instruction, taken: bool) -> Result<Flow, VmError> {
    if taken { jump(thread, insn) } else { Ok(Flow::Continue) }
}

// ---- constants ------------------------------------------------------------

pub(super) fn nop(_: &mut VmThread, _: &VirtualMachine, _: &Instruction) -> Result<Flow, VmError> {
    Ok(Flow::Continue)
}

pub(super) fn const_null(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    thread.stack.push_operand(Value::Null)?;
    Ok(Flow::Continue)
}

pub(super) fn const_int(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    thread.stack.push_operand(Value::Integer(insn.immediate()?))?;
    Ok(Flow::Continue)
}

pub(super) fn const_long(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let crate::bytecode::Operand::WideImmediate(value) = &insn.operand else {
        return Err(VmError::Panic("lconst without wide immediate".to_string()));
    };
    thread.stack.push_operand(Value::Long(*value))?;
    Ok(Flow::Continue)
}

pub(super) fn const_float(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let crate::bytecode::Operand::FloatImmediate(value) = &insn.operand else {
        return Err(VmError::Panic("fconst without float immediate".to_string()));
    };
    thread.stack.push_operand(Value::Float(*value))?;
    Ok(Flow::Continue)
}

pub(super) fn const_double(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let crate::bytecode::Operand::DoubleImmediate(value) = &insn.operand else {
        return Err(VmError::Panic("dconst without double immediate".to_string()));
    };
    thread.stack.push_operand(Value::Double(*value))?;
    Ok(Flow::Continue)
}

pub(super) fn load_constant(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let class_id = thread.stack.cur_java_frame()?.class_id();
    let value = vm.value_from_ldc(thread, class_id, insn.index()?)?;
    thread.stack.push_operand(value)?;
    Ok(Flow::Continue)
}

// ---- local loads and stores ----------------------------------------------

fn load_local(thread: &mut VmThread, insn: &Instruction) -> Result<Value, VmError> {
    thread.stack.get_local(insn.index()? as usize)
}

pub(super) fn load_int(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let value = load_local(thread, insn)?.as_int()?;
    thread.stack.push_operand(Value::Integer(value))?;
    Ok(Flow::Continue)
}

pub(super) fn load_long(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let value = load_local(thread, insn)?.as_long()?;
    thread.stack.push_operand(Value::Long(value))?;
    Ok(Flow::Continue)
}

pub(super) fn load_float(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let value = load_local(thread, insn)?.as_float()?;
    thread.stack.push_operand(Value::Float(value))?;
    Ok(Flow::Continue)
}

pub(super) fn load_double(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let value = load_local(thread, insn)?.as_double()?;
    thread.stack.push_operand(Value::Double(value))?;
    Ok(Flow::Continue)
}

pub(super) fn load_reference(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let value = load_local(thread, insn)?;
    match value {
        Value::Ref(_) | Value::Null => {
            thread.stack.push_operand(value)?;
            Ok(Flow::Continue)
        }
        other => Err(VmError::Panic(format!(
            "aload on non-reference local {other:?}"
        ))),
    }
}

pub(super) fn store_int(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_int_val()?;
    thread
        .stack
        .set_local(insn.index()? as usize, Value::Integer(value))?;
    Ok(Flow::Continue)
}

pub(super) fn store_long(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_long_val()?;
    thread
        .stack
        .set_local(insn.index()? as usize, Value::Long(value))?;
    Ok(Flow::Continue)
}

pub(super) fn store_float(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_float_val()?;
    thread
        .stack
        .set_local(insn.index()? as usize, Value::Float(value))?;
    Ok(Flow::Continue)
}

pub(super) fn store_double(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_double_val()?;
    thread
        .stack
        .set_local(insn.index()? as usize, Value::Double(value))?;
    Ok(Flow::Continue)
}

pub(super) fn store_reference(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_nullable_ref()?;
    thread.stack.set_local(insn.index()? as usize, value)?;
    Ok(Flow::Continue)
}

// ---- array access ---------------------------------------------------------

pub(super) fn array_load(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let index = thread.stack.pop_int_val()?;
    let array_ref = thread.stack.pop_obj_val()?;
    let value = vm.heap_read().read_array_element(array_ref, index)?;
    thread.stack.push_operand(value)?;
    Ok(Flow::Continue)
}

pub(super) fn array_store_int(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_int_val()?;
    let index = thread.stack.pop_int_val()?;
    let array_ref = thread.stack.pop_obj_val()?;
    vm.heap_write()
        .write_array_element(array_ref, index, Value::Integer(value))?;
    Ok(Flow::Continue)
}

pub(super) fn array_store_long(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_long_val()?;
    let index = thread.stack.pop_int_val()?;
    let array_ref = thread.stack.pop_obj_val()?;
    vm.heap_write()
        .write_array_element(array_ref, index, Value::Long(value))?;
    Ok(Flow::Continue)
}

pub(super) fn array_store_float(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_float_val()?;
    let index = thread.stack.pop_int_val()?;
    let array_ref = thread.stack.pop_obj_val()?;
    vm.heap_write()
        .write_array_element(array_ref, index, Value::Float(value))?;
    Ok(Flow::Continue)
}

pub(super) fn array_store_double(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_double_val()?;
    let index = thread.stack.pop_int_val()?;
    let array_ref = thread.stack.pop_obj_val()?;
    vm.heap_write()
        .write_array_element(array_ref, index, Value::Double(value))?;
    Ok(Flow::Continue)
}

pub(super) fn array_store_reference(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_nullable_ref()?;
    let index = thread.stack.pop_int_val()?;
    let array_ref = thread.stack.pop_obj_val()?;
    vm.heap_write()
        .write_array_element(array_ref, index, value)?;
    Ok(Flow::Continue)
}

pub(super) fn array_length(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let array_ref = thread.stack.pop_obj_val()?;
    let length = vm.heap_read().array_length(array_ref)?;
    thread.stack.push_operand(Value::Integer(length))?;
    Ok(Flow::Continue)
}

// ---- operand stack shuffles ----------------------------------------------

pub(super) fn pop(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    thread.stack.pop_operand()?;
    Ok(Flow::Continue)
}

pub(super) fn pop2(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let top = thread.stack.pop_operand()?;
    if !top.is_wide() {
        thread.stack.pop_operand()?;
    }
    Ok(Flow::Continue)
}

pub(super) fn dup(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = *thread.stack.peek_operand()?;
    thread.stack.push_operand(value)?;
    Ok(Flow::Continue)
}

pub(super) fn dup_x1(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value1 = thread.stack.pop_operand()?;
    let value2 = thread.stack.pop_operand()?;
    thread.stack.push_operand(value1)?;
    thread.stack.push_operand(value2)?;
    thread.stack.push_operand(value1)?;
    Ok(Flow::Continue)
}

pub(super) fn dup_x2(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value1 = thread.stack.pop_operand()?;
    let value2 = thread.stack.pop_operand()?;
    if value2.is_wide() {
        thread.stack.push_operand(value1)?;
        thread.stack.push_operand(value2)?;
        thread.stack.push_operand(value1)?;
    } else {
        let value3 = thread.stack.pop_operand()?;
        thread.stack.push_operand(value1)?;
        thread.stack.push_operand(value3)?;
        thread.stack.push_operand(value2)?;
        thread.stack.push_operand(value1)?;
    }
    Ok(Flow::Continue)
}

pub(super) fn dup2(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value1 = *thread.stack.peek_operand()?;
    if value1.is_wide() {
        thread.stack.push_operand(value1)?;
    } else {
        let value2 = *thread.stack.peek_operand_at(1)?;
        thread.stack.push_operand(value2)?;
        thread.stack.push_operand(value1)?;
    }
    Ok(Flow::Continue)
}

pub(super) fn dup2_x1(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value1 = thread.stack.pop_operand()?;
    let value2 = thread.stack.pop_operand()?;
    if value1.is_wide() {
        thread.stack.push_operand(value1)?;
        thread.stack.push_operand(value2)?;
        thread.stack.push_operand(value1)?;
    } else {
        let value3 = thread.stack.pop_operand()?;
        thread.stack.push_operand(value2)?;
        thread.stack.push_operand(value1)?;
        thread.stack.push_operand(value3)?;
        thread.stack.push_operand(value2)?;
        thread.stack.push_operand(value1)?;
    }
    Ok(Flow::Continue)
}

pub(super) fn dup2_x2(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value1 = thread.stack.pop_operand()?;
    let value2 = thread.stack.pop_operand()?;
    match (value1.is_wide(), value2.is_wide()) {
        (true, true) => {
            thread.stack.push_operand(value1)?;
            thread.stack.push_operand(value2)?;
            thread.stack.push_operand(value1)?;
        }
        (true, false) => {
            let value3 = thread.stack.pop_operand()?;
            thread.stack.push_operand(value1)?;
            thread.stack.push_operand(value3)?;
            thread.stack.push_operand(value2)?;
            thread.stack.push_operand(value1)?;
        }
        (false, _) => {
            let value3 = thread.stack.pop_operand()?;
            if value3.is_wide() {
                thread.stack.push_operand(value2)?;
                thread.stack.push_operand(value1)?;
                thread.stack.push_operand(value3)?;
            } else {
                let value4 = thread.stack.pop_operand()?;
                thread.stack.push_operand(value2)?;
                thread.stack.push_operand(value1)?;
                thread.stack.push_operand(value4)?;
                thread.stack.push_operand(value3)?;
            }
            thread.stack.push_operand(value2)?;
            thread.stack.push_operand(value1)?;
        }
    }
    Ok(Flow::Continue)
}

pub(super) fn swap(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value1 = thread.stack.pop_operand()?;
    let value2 = thread.stack.pop_operand()?;
    thread.stack.push_operand(value1)?;
    thread.stack.push_operand(value2)?;
    Ok(Flow::Continue)
}

// ---- arithmetic -----------------------------------------------------------

macro_rules! int_binop {
    ($name:ident, |$a:ident, $b:ident| $body:expr) => {
        pub(super) fn $name(
            thread: &mut VmThread,
            _: &VirtualMachine,
            _: &Instruction,
        ) -> Result<Flow, VmError> {
            let $b = thread.stack.pop_int_val()?;
            let $a = thread.stack.pop_int_val()?;
            thread.stack.push_operand(Value::Integer($body))?;
            Ok(Flow::Continue)
        }
    };
}

macro_rules! long_binop {
    ($name:ident, |$a:ident, $b:ident| $body:expr) => {
        pub(super) fn $name(
            thread: &mut VmThread,
            _: &VirtualMachine,
            _: &Instruction,
        ) -> Result<Flow, VmError> {
            let $b = thread.stack.pop_long_val()?;
            let $a = thread.stack.pop_long_val()?;
            thread.stack.push_operand(Value::Long($body))?;
            Ok(Flow::Continue)
        }
    };
}

macro_rules! float_binop {
    ($name:ident, |$a:ident, $b:ident| $body:expr) => {
        pub(super) fn $name(
            thread: &mut VmThread,
            _: &VirtualMachine,
            _: &Instruction,
        ) -> Result<Flow, VmError> {
            let $b = thread.stack.pop_float_val()?;
            let $a = thread.stack.pop_float_val()?;
            thread.stack.push_operand(Value::Float($body))?;
            Ok(Flow::Continue)
        }
    };
}

macro_rules! double_binop {
    ($name:ident, |$a:ident, $b:ident| $body:expr) => {
        pub(super) fn $name(
            thread: &mut VmThread,
            _: &VirtualMachine,
            _: &Instruction,
        ) -> Result<Flow, VmError> {
            let $b = thread.stack.pop_double_val()?;
            let $a = thread.stack.pop_double_val()?;
            thread.stack.push_operand(Value::Double($body))?;
            Ok(Flow::Continue)
        }
    };
}

int_binop!(int_add, |a, b| a.wrapping_add(b));
int_binop!(int_sub, |a, b| a.wrapping_sub(b));
int_binop!(int_mul, |a, b| a.wrapping_mul(b));
int_binop!(int_and, |a, b| a & b);
int_binop!(int_or, |a, b| a | b);
int_binop!(int_xor, |a, b| a ^ b);
int_binop!(int_shl, |a, b| a.wrapping_shl((b & 0x1f) as u32));
int_binop!(int_shr, |a, b| a.wrapping_shr((b & 0x1f) as u32));
int_binop!(int_ushr, |a, b| ((a as u32) >> ((b & 0x1f) as u32)) as i32);

long_binop!(long_add, |a, b| a.wrapping_add(b));
long_binop!(long_sub, |a, b| a.wrapping_sub(b));
long_binop!(long_mul, |a, b| a.wrapping_mul(b));
long_binop!(long_and, |a, b| a & b);
long_binop!(long_or, |a, b| a | b);
long_binop!(long_xor, |a, b| a ^ b);

float_binop!(float_add, |a, b| a + b);
float_binop!(float_sub, |a, b| a - b);
float_binop!(float_mul, |a, b| a * b);
float_binop!(float_div, |a, b| a / b);
float_binop!(float_rem, |a, b| a % b);

double_binop!(double_add, |a, b| a + b);
double_binop!(double_sub, |a, b| a - b);
double_binop!(double_mul, |a, b| a * b);
double_binop!(double_div, |a, b| a / b);
double_binop!(double_rem, |a, b| a % b);

pub(super) fn int_div(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let b = thread.stack.pop_int_val()?;
    let a = thread.stack.pop_int_val()?;
    if b == 0 {
        throw_exception!(Arithmetic, "/ by zero")?;
    }
    thread.stack.push_operand(Value::Integer(a.wrapping_div(b)))?;
    Ok(Flow::Continue)
}

pub(super) fn int_rem(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let b = thread.stack.pop_int_val()?;
    let a = thread.stack.pop_int_val()?;
    if b == 0 {
        throw_exception!(Arithmetic, "/ by zero")?;
    }
    thread.stack.push_operand(Value::Integer(a.wrapping_rem(b)))?;
    Ok(Flow::Continue)
}

pub(super) fn long_div(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let b = thread.stack.pop_long_val()?;
    let a = thread.stack.pop_long_val()?;
    if b == 0 {
        throw_exception!(Arithmetic, "/ by zero")?;
    }
    thread.stack.push_operand(Value::Long(a.wrapping_div(b)))?;
    Ok(Flow::Continue)
}

pub(super) fn long_rem(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let b = thread.stack.pop_long_val()?;
    let a = thread.stack.pop_long_val()?;
    if b == 0 {
        throw_exception!(Arithmetic, "/ by zero")?;
    }
    thread.stack.push_operand(Value::Long(a.wrapping_rem(b)))?;
    Ok(Flow::Continue)
}

pub(super) fn long_shl(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let b = thread.stack.pop_int_val()?;
    let a = thread.stack.pop_long_val()?;
    thread
        .stack
        .push_operand(Value::Long(a.wrapping_shl((b & 0x3f) as u32)))?;
    Ok(Flow::Continue)
}

pub(super) fn long_shr(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let b = thread.stack.pop_int_val()?;
    let a = thread.stack.pop_long_val()?;
    thread
        .stack
        .push_operand(Value::Long(a.wrapping_shr((b & 0x3f) as u32)))?;
    Ok(Flow::Continue)
}

pub(super) fn long_ushr(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let b = thread.stack.pop_int_val()?;
    let a = thread.stack.pop_long_val()?;
    thread
        .stack
        .push_operand(Value::Long(((a as u64) >> ((b & 0x3f) as u32)) as i64))?;
    Ok(Flow::Continue)
}

pub(super) fn int_neg(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_int_val()?;
    thread.stack.push_operand(Value::Integer(value.wrapping_neg()))?;
    Ok(Flow::Continue)
}

pub(super) fn long_neg(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_long_val()?;
    thread.stack.push_operand(Value::Long(value.wrapping_neg()))?;
    Ok(Flow::Continue)
}

pub(super) fn float_neg(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_float_val()?;
    thread.stack.push_operand(Value::Float(-value))?;
    Ok(Flow::Continue)
}

pub(super) fn double_neg(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_double_val()?;
    thread.stack.push_operand(Value::Double(-value))?;
    Ok(Flow::Continue)
}

pub(super) fn iinc(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let (idx, increment) = insn.index_immediate()?;
    let value = thread.stack.get_local_int_val(idx as usize)?;
    thread
        .stack
        .set_local(idx as usize, Value::Integer(value.wrapping_add(increment)))?;
    Ok(Flow::Continue)
}

// ---- conversions ----------------------------------------------------------

macro_rules! convert {
    ($name:ident, $pop:ident, |$v:ident| $result:expr) => {
        pub(super) fn $name(
            thread: &mut VmThread,
            _: &VirtualMachine,
            _: &Instruction,
        ) -> Result<Flow, VmError> {
            let $v = thread.stack.$pop()?;
            thread.stack.push_operand($result)?;
            Ok(Flow::Continue)
        }
    };
}

convert!(i2l, pop_int_val, |v| Value::Long(v as i64));
convert!(i2f, pop_int_val, |v| Value::Float(v as f32));
convert!(i2d, pop_int_val, |v| Value::Double(v as f64));
convert!(l2i, pop_long_val, |v| Value::Integer(v as i32));
convert!(l2f, pop_long_val, |v| Value::Float(v as f32));
convert!(l2d, pop_long_val, |v| Value::Double(v as f64));
// `as` casts saturate and map NaN to zero, matching the JVM narrowing rules.
convert!(f2i, pop_float_val, |v| Value::Integer(v as i32));
convert!(f2l, pop_float_val, |v| Value::Long(v as i64));
convert!(f2d, pop_float_val, |v| Value::Double(v as f64));
convert!(d2i, pop_double_val, |v| Value::Integer(v as i32));
convert!(d2l, pop_double_val, |v| Value::Long(v as i64));
convert!(d2f, pop_double_val, |v| Value::Float(v as f32));
convert!(i2b, pop_int_val, |v| Value::Integer((v as i8) as i32));
convert!(i2c, pop_int_val, |v| Value::Integer((v as u16) as i32));
convert!(i2s, pop_int_val, |v| Value::Integer((v as i16) as i32));

// ---- comparisons ----------------------------------------------------------

pub(super) fn lcmp(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let b = thread.stack.pop_long_val()?;
    let a = thread.stack.pop_long_val()?;
    thread
        .stack
        .push_operand(Value::Integer(a.cmp(&b) as i32))?;
    Ok(Flow::Continue)
}

fn float_compare(thread: &mut VmThread, nan_result: i32) -> Result<Flow, VmError> {
    let b = thread.stack.pop_float_val()?;
    let a = thread.stack.pop_float_val()?;
    let result = a
        .partial_cmp(&b)
        .map(|ordering| ordering as i32)
        .unwrap_or(nan_result);
    thread.stack.push_operand(Value::Integer(result))?;
    Ok(Flow::Continue)
}

fn double_compare(thread: &mut VmThread, nan_result: i32) -> Result<Flow, VmError> {
    let b = thread.stack.pop_double_val()?;
    let a = thread.stack.pop_double_val()?;
    let result = a
        .partial_cmp(&b)
        .map(|ordering| ordering as i32)
        .unwrap_or(nan_result);
    thread.stack.push_operand(Value::Integer(result))?;
    Ok(Flow::Continue)
}

pub(super) fn fcmpl(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    float_compare(thread, -1)
}

pub(super) fn fcmpg(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    float_compare(thread, 1)
}

pub(super) fn dcmpl(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    double_compare(thread, -1)
}

pub(super) fn dcmpg(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    double_compare(thread, 1)
}

// ---- branches -------------------------------------------------------------

fn int_cond(
    thread: &mut VmThread,
    insn: &Instruction,
    predicate: fn(i32) -> bool,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_int_val()?;
    jump_if(thread, insn, predicate(value))
}

fn int_cmp_cond(
    thread: &mut VmThread,
    insn: &Instruction,
    predicate: fn(i32, i32) -> bool,
) -> Result<Flow, VmError> {
    let b = thread.stack.pop_int_val()?;
    let a = thread.stack.pop_int_val()?;
    jump_if(thread, insn, predicate(a, b))
}

pub(super) fn if_eq(t: &mut VmThread, _: &VirtualMachine, i: &Instruction) -> Result<Flow, VmError> {
    int_cond(t, i, |v| v == 0)
}

pub(super) fn if_ne(t: &mut VmThread, _: &VirtualMachine, i: &Instruction) -> Result<Flow, VmError> {
    int_cond(t, i, |v| v != 0)
}

pub(super) fn if_lt(t: &mut VmThread, _: &VirtualMachine, i: &Instruction) -> Result<Flow, VmError> {
    int_cond(t, i, |v| v < 0)
}

pub(super) fn if_ge(t: &mut VmThread, _: &VirtualMachine, i: &Instruction) -> Result<Flow, VmError> {
    int_cond(t, i, |v| v >= 0)
}

pub(super) fn if_gt(t: &mut VmThread, _: &VirtualMachine, i: &Instruction) -> Result<Flow, VmError> {
    int_cond(t, i, |v| v > 0)
}

pub(super) fn if_le(t: &mut VmThread, _: &VirtualMachine, i: &Instruction) -> Result<Flow, VmError> {
    int_cond(t, i, |v| v <= 0)
}

pub(super) fn if_icmpeq(
    t: &mut VmThread,
    _: &VirtualMachine,
    i: &Instruction,
) -> Result<Flow, VmError> {
    int_cmp_cond(t, i, |a, b| a == b)
}

pub(super) fn if_icmpne(
    t: &mut VmThread,
    _: &VirtualMachine,
    i: &Instruction,
) -> Result<Flow, VmError> {
    int_cmp_cond(t, i, |a, b| a != b)
}

pub(super) fn if_icmplt(
    t: &mut VmThread,
    _: &VirtualMachine,
    i: &Instruction,
) -> Result<Flow, VmError> {
    int_cmp_cond(t, i, |a, b| a < b)
}

pub(super) fn if_icmpge(
    t: &mut VmThread,
    _: &VirtualMachine,
    i: &Instruction,
) -> Result<Flow, VmError> {
    int_cmp_cond(t, i, |a, b| a >= b)
}

pub(super) fn if_icmpgt(
    t: &mut VmThread,
    _: &VirtualMachine,
    i: &Instruction,
) -> Result<Flow, VmError> {
    int_cmp_cond(t, i, |a, b| a > b)
}

pub(super) fn if_icmple(
    t: &mut VmThread,
    _: &VirtualMachine,
    i: &Instruction,
) -> Result<Flow, VmError> {
    int_cmp_cond(t, i, |a, b| a <= b)
}

fn ref_identity(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Ref(left), Value::Ref(right)) => left == right,
        _ => false,
    }
}

pub(super) fn if_acmpeq(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let b = thread.stack.pop_nullable_ref()?;
    let a = thread.stack.pop_nullable_ref()?;
    jump_if(thread, insn, ref_identity(&a, &b))
}

pub(super) fn if_acmpne(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let b = thread.stack.pop_nullable_ref()?;
    let a = thread.stack.pop_nullable_ref()?;
    jump_if(thread, insn, !ref_identity(&a, &b))
}

pub(super) fn if_null(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_nullable_ref()?;
    jump_if(thread, insn, value.is_null())
}

pub(super) fn if_non_null(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_nullable_ref()?;
    jump_if(thread, insn, !value.is_null())
}

pub(super) fn goto(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    jump(thread, insn)
}

pub(super) fn table_switch(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let crate::bytecode::Operand::Table(table) = &insn.operand else {
        return Err(VmError::Panic("tableswitch without table".to_string()));
    };
    let index = thread.stack.pop_int_val()?;
    let pc = thread.stack.pc()?;
    let offset = if index < table.low || index > table.high {
        table.default_offset
    } else {
        table.offsets[(index - table.low) as usize]
    };
    Ok(Flow::Jump(branch_target(pc, offset)))
}

pub(super) fn lookup_switch(
    thread: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let crate::bytecode::Operand::Lookup(lookup) = &insn.operand else {
        return Err(VmError::Panic("lookupswitch without pairs".to_string()));
    };
    let key = thread.stack.pop_int_val()?;
    let pc = thread.stack.pc()?;
    let offset = lookup
        .pairs
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, offset)| *offset)
        .unwrap_or(lookup.default_offset);
    Ok(Flow::Jump(branch_target(pc, offset)))
}

// ---- returns --------------------------------------------------------------

pub(super) fn return_void(
    _: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    Ok(Flow::Return(None))
}

pub(super) fn return_int(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_int_val()?;
    Ok(Flow::Return(Some(Value::Integer(value))))
}

pub(super) fn return_long(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_long_val()?;
    Ok(Flow::Return(Some(Value::Long(value))))
}

pub(super) fn return_float(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_float_val()?;
    Ok(Flow::Return(Some(Value::Float(value))))
}

pub(super) fn return_double(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_double_val()?;
    Ok(Flow::Return(Some(Value::Double(value))))
}

pub(super) fn return_reference(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let value = thread.stack.pop_nullable_ref()?;
    Ok(Flow::Return(Some(value)))
}

// ---- field access ---------------------------------------------------------

/// Resolves a field-access site, consulting the per-instruction cache first.
fn resolve_field_site(
    thread: &VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
    is_static: bool,
) -> Result<FieldSite, VmError> {
    let frame = thread.stack.cur_java_frame()?;
    let cache_key = (frame.method_id(), frame.pc);
    if let Some(site) = vm.field_sites.get(&cache_key) {
        return Ok(*site);
    }

    let (class_sym, field_key, loader) = {
        let method_area = vm.method_area_read();
        let class = method_area.get_instance_class(frame.class_id())?;
        let view = class.cp.get_field_view(insn.index()?, method_area.interner())?;
        let field_key: FieldKey = view.name_and_type.into();
        (view.class_sym, field_key, class.loader())
    };

    let declared_class = vm
        .method_area_write()
        .get_class_id_or_load(class_sym, loader)?;

    let site = {
        let method_area = vm.method_area_read();
        if is_static {
            let holder = method_area.resolve_static_field_holder(declared_class, &field_key)?;
            let slot = method_area
                .get_instance_class(holder)?
                .static_layout()
                .slot(&field_key)
                .ok_or_else(|| VmError::Panic("static layout lost its slot".to_string()))?;
            FieldSite {
                holder,
                offset: method_area.static_base_offset()? + slot.offset,
                ty: slot.ty,
                volatile: slot.is_volatile(),
                is_static: true,
            }
        } else {
            let slot = method_area.resolve_instance_field(declared_class, &field_key)?;
            FieldSite {
                holder: declared_class,
                offset: slot.offset,
                ty: slot.ty,
                volatile: slot.is_volatile(),
                is_static: false,
            }
        }
    };

    vm.field_sites.insert(cache_key, site);
    Ok(site)
}

pub(super) fn get_static(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let site = resolve_field_site(thread, vm, insn, true)?;
    Interpreter::ensure_initialized(thread, Some(site.holder), vm)?;
    let mirror = vm
        .method_area_write()
        .get_mirror_or_create(site.holder, &vm.heap)?;
    let value = vm.heap_read().read_field(mirror, site.offset, site.ty)?;
    if site.volatile {
        fence(Ordering::Acquire);
    }
    thread.stack.push_operand(value)?;
    Ok(Flow::Continue)
}

pub(super) fn put_static(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let site = resolve_field_site(thread, vm, insn, true)?;
    let value = thread.stack.pop_operand()?;
    Interpreter::ensure_initialized(thread, Some(site.holder), vm)?;
    let mirror = vm
        .method_area_write()
        .get_mirror_or_create(site.holder, &vm.heap)?;
    if site.volatile {
        fence(Ordering::Release);
    }
    vm.heap_write()
        .write_field(mirror, site.offset, value, site.ty)?;
    if site.volatile {
        fence(Ordering::SeqCst);
    }
    Ok(Flow::Continue)
}

pub(super) fn get_field(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let site = resolve_field_site(thread, vm, insn, false)?;
    let object_ref = thread.stack.pop_obj_val()?;
    let value = vm.heap_read().read_field(object_ref, site.offset, site.ty)?;
    if site.volatile {
        fence(Ordering::Acquire);
    }
    thread.stack.push_operand(value)?;
    Ok(Flow::Continue)
}

pub(super) fn put_field(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let site = resolve_field_site(thread, vm, insn, false)?;
    let value = thread.stack.pop_operand()?;
    let object_ref = thread.stack.pop_obj_val()?;
    if site.volatile {
        fence(Ordering::Release);
    }
    vm.heap_write()
        .write_field(object_ref, site.offset, value, site.ty)?;
    if site.volatile {
        fence(Ordering::SeqCst);
    }
    Ok(Flow::Continue)
}

// ---- invocation -----------------------------------------------------------

pub(super) fn invoke_static(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let (view, loader) = {
        let method_area = vm.method_area_read();
        let class = method_area.get_instance_class(thread.stack.cur_java_frame()?.class_id())?;
        (
            class
                .cp
                .get_method_or_interface_method_view(insn.index()?, method_area.interner())?,
            class.loader(),
        )
    };
    let target_class = vm
        .method_area_write()
        .get_class_id_or_load(view.class_sym, loader)?;
    Interpreter::ensure_initialized(thread, Some(target_class), vm)?;
    let method_id = vm
        .method_area_read()
        .resolve_static(target_class, &view.name_and_type.into())?;
    let args = Interpreter::prepare_method_args(thread, method_id, vm)?;
    Interpreter::invoke_static_method(thread, method_id, vm, args)?;
    Ok(Flow::Continue)
}

pub(super) fn invoke_virtual(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let view = {
        let method_area = vm.method_area_read();
        let class = method_area.get_instance_class(thread.stack.cur_java_frame()?.class_id())?;
        class.cp.get_method_view(insn.index()?, method_area.interner())?
    };
    let key: MethodKey = view.name_and_type.into();
    let param_count = {
        let descriptor = vm.interner().resolve(&key.desc);
        MethodDescriptor::parse(descriptor)?.param_count()
    };
    let receiver = thread.stack.peek_operand_at(param_count)?.as_obj_ref()?;
    let receiver_class = vm.heap_read().class_id(receiver);
    let method_id = vm.method_area_read().find_virtual(receiver_class, &key)?;
    let args = Interpreter::prepare_method_args(thread, method_id, vm)?;
    Interpreter::invoke_method_internal(thread, method_id, args, vm)?;
    Ok(Flow::Continue)
}

pub(super) fn invoke_special(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let (view, loader) = {
        let method_area = vm.method_area_read();
        let class = method_area.get_instance_class(thread.stack.cur_java_frame()?.class_id())?;
        (
            class.cp.get_method_view(insn.index()?, method_area.interner())?,
            class.loader(),
        )
    };
    let target_class = vm
        .method_area_write()
        .get_class_id_or_load(view.class_sym, loader)?;
    let method_id = vm
        .method_area_read()
        .find_virtual(target_class, &view.name_and_type.into())?;
    let args = Interpreter::prepare_method_args(thread, method_id, vm)?;
    Interpreter::invoke_method_internal(thread, method_id, args, vm)?;
    Ok(Flow::Continue)
}

pub(super) fn invoke_interface(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let (idx, count) = insn.index_count()?;
    let view = {
        let method_area = vm.method_area_read();
        let class = method_area.get_instance_class(thread.stack.cur_java_frame()?.class_id())?;
        class
            .cp
            .get_interface_method_view(idx, method_area.interner())?
    };
    // `count` operands sit on the stack, the receiver lowest.
    let receiver = thread
        .stack
        .peek_operand_at(count as usize - 1)?
        .as_obj_ref()?;
    let receiver_class = vm.heap_read().class_id(receiver);
    let method_id = vm
        .method_area_read()
        .resolve_interface(receiver_class, &view.name_and_type.into())?;
    let args = Interpreter::prepare_method_args(thread, method_id, vm)?;
    Interpreter::invoke_method_internal(thread, method_id, args, vm)?;
    Ok(Flow::Continue)
}

pub(super) fn invoke_dynamic(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    vm.invoke_dynamic_call(thread, insn.index()?)?;
    Ok(Flow::Continue)
}

// ---- allocation -----------------------------------------------------------

pub(super) fn new_instance(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let (class_sym, loader) = {
        let method_area = vm.method_area_read();
        let class = method_area.get_instance_class(thread.stack.cur_java_frame()?.class_id())?;
        (
            class.cp.get_class_sym(insn.index()?, method_area.interner())?,
            class.loader(),
        )
    };
    let target_class = vm
        .method_area_write()
        .get_class_id_or_load(class_sym, loader)?;
    Interpreter::ensure_initialized(thread, Some(target_class), vm)?;
    let instance_size = vm
        .method_area_read()
        .get_instance_class(target_class)?
        .instance_size();
    let instance_ref = vm.heap_write().alloc_instance(instance_size, target_class)?;
    thread.stack.push_operand(Value::Ref(instance_ref))?;
    Ok(Flow::Continue)
}

pub(super) fn new_array(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let kind = insn.array_kind()?;
    let length = thread.stack.pop_int_val()?;
    vm.check_array_length(length)?;
    let primitive = match kind {
        crate::descriptor::AllocationType::Boolean => PrimitiveType::Boolean,
        crate::descriptor::AllocationType::Char => PrimitiveType::Char,
        crate::descriptor::AllocationType::Float => PrimitiveType::Float,
        crate::descriptor::AllocationType::Double => PrimitiveType::Double,
        crate::descriptor::AllocationType::Byte => PrimitiveType::Byte,
        crate::descriptor::AllocationType::Short => PrimitiveType::Short,
        crate::descriptor::AllocationType::Int => PrimitiveType::Int,
        crate::descriptor::AllocationType::Long => PrimitiveType::Long,
        crate::descriptor::AllocationType::Reference => {
            return Err(VmError::Panic("newarray of references".to_string()));
        }
    };
    let array_class = {
        let mut method_area = vm.method_area_write();
        let element = method_area.primitive_class_id(primitive);
        method_area.new_array_class(element)?
    };
    let array_ref = vm.heap_write().alloc_array(array_class, kind, length)?;
    thread.stack.push_operand(Value::Ref(array_ref))?;
    Ok(Flow::Continue)
}

pub(super) fn new_reference_array(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let length = thread.stack.pop_int_val()?;
    vm.check_array_length(length)?;
    let (class_sym, loader) = {
        let method_area = vm.method_area_read();
        let class = method_area.get_instance_class(thread.stack.cur_java_frame()?.class_id())?;
        (
            class.cp.get_class_sym(insn.index()?, method_area.interner())?,
            class.loader(),
        )
    };
    let array_class = {
        let mut method_area = vm.method_area_write();
        let element = method_area.get_class_id_or_load(class_sym, loader)?;
        method_area.new_array_class(element)?
    };
    let array_ref = vm.heap_write().alloc_array(
        array_class,
        crate::descriptor::AllocationType::Reference,
        length,
    )?;
    thread.stack.push_operand(Value::Ref(array_ref))?;
    Ok(Flow::Continue)
}

fn alloc_multi_array(
    vm: &VirtualMachine,
    class_id: crate::keys::ClassId,
    counts: &[i32],
) -> Result<crate::heap::HeapRef, VmError> {
    let (element, kind) = {
        let method_area = vm.method_area_read();
        let array = method_area.get_class(class_id).as_array()?;
        (array.element, method_area.array_element_kind(array.element))
    };
    let length = counts[0];
    let array_ref = vm.heap_write().alloc_array(class_id, kind, length)?;
    if counts.len() > 1 {
        for index in 0..length {
            let nested = alloc_multi_array(vm, element, &counts[1..])?;
            vm.heap_write()
                .write_array_element(array_ref, index, Value::Ref(nested))?;
        }
    }
    Ok(array_ref)
}

pub(super) fn multi_new_array(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let (idx, dims) = insn.index_count()?;
    let mut counts = vec![0i32; dims as usize];
    for slot in counts.iter_mut().rev() {
        *slot = thread.stack.pop_int_val()?;
    }
    for &count in &counts {
        vm.check_array_length(count)?;
    }
    let (class_sym, loader) = {
        let method_area = vm.method_area_read();
        let class = method_area.get_instance_class(thread.stack.cur_java_frame()?.class_id())?;
        (
            class.cp.get_class_sym(idx, method_area.interner())?,
            class.loader(),
        )
    };
    let array_class = vm
        .method_area_write()
        .get_class_id_or_load(class_sym, loader)?;
    let array_ref = alloc_multi_array(vm, array_class, &counts)?;
    thread.stack.push_operand(Value::Ref(array_ref))?;
    Ok(Flow::Continue)
}

// ---- type checks ----------------------------------------------------------

fn resolve_named_class(
    thread: &VmThread,
    vm: &VirtualMachine,
    idx: u16,
) -> Result<crate::keys::ClassId, VmError> {
    let (class_sym, loader) = {
        let method_area = vm.method_area_read();
        let class = method_area.get_instance_class(thread.stack.cur_java_frame()?.class_id())?;
        (
            class.cp.get_class_sym(idx, method_area.interner())?,
            class.loader(),
        )
    };
    vm.method_area_write().get_class_id_or_load(class_sym, loader)
}

pub(super) fn check_cast(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let target = resolve_named_class(thread, vm, insn.index()?)?;
    let value = thread.stack.pop_nullable_ref()?;
    if let Value::Ref(object_ref) = value {
        let object_class = vm.heap_read().class_id(object_ref);
        let method_area = vm.method_area_read();
        if !method_area.is_assignable_from(target, object_class) {
            return Err(crate::build_exception!(
                ClassCast,
                "class {} cannot be cast to class {}",
                method_area.class_name_dot(object_class),
                method_area.class_name_dot(target)
            ));
        }
    }
    thread.stack.push_operand(value)?;
    Ok(Flow::Continue)
}

pub(super) fn instance_of(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    let target = resolve_named_class(thread, vm, insn.index()?)?;
    let value = thread.stack.pop_nullable_ref()?;
    let result = match value {
        Value::Ref(object_ref) => {
            let object_class = vm.heap_read().class_id(object_ref);
            vm.method_area_read().is_assignable_from(target, object_class) as i32
        }
        _ => 0,
    };
    thread.stack.push_operand(Value::Integer(result))?;
    Ok(Flow::Continue)
}

// ---- monitors and throw ---------------------------------------------------

pub(super) fn monitor_enter(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let object_ref = thread.stack.pop_obj_val()?;
    vm.monitors().monitor(object_ref).enter(thread.id);
    Ok(Flow::Continue)
}

pub(super) fn monitor_exit(
    thread: &mut VmThread,
    vm: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let object_ref = thread.stack.pop_obj_val()?;
    vm.monitors().monitor(object_ref).exit(thread.id)?;
    Ok(Flow::Continue)
}

pub(super) fn athrow(
    thread: &mut VmThread,
    _: &VirtualMachine,
    _: &Instruction,
) -> Result<Flow, VmError> {
    let exception_ref = thread.stack.pop_obj_val()?;
    Err(VmError::Thrown(exception_ref))
}

// Kept for dispatch-table completeness: the engine has no processor for the
// retired jsr/ret family.
pub(super) fn unsupported(
    _: &mut VmThread,
    _: &VirtualMachine,
    insn: &Instruction,
) -> Result<Flow, VmError> {
    Err(VmError::Panic(format!(
        "no processor for opcode {:#04x}",
        insn.opcode
    )))
}
