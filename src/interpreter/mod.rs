//! The fetch-decode-execute engine. Each instruction is decoded at the
//! frame's pc and dispatched through the opcode-indexed processor table;
//! processors mutate the frame and may push further frames by invoking
//! callees. VM exceptions walk the method's exception table and unwind to
//! the caller frame on a miss.

use crate::bytecode::Instruction;
use crate::error::{JavaExceptionKind, JavaThrowable, VmError};
use crate::heap::HeapRef;
use crate::keys::{ClassId, FullyQualifiedMethodKey, MethodId};
use crate::node::ExceptionTableEntry;
use crate::rt::{InitClaim, JvmClass};
use crate::thread::VmThread;
use crate::vm::stack::{FrameType, JavaFrame, NativeFrame};
use crate::vm::{Value, VirtualMachine};
use crate::build_exception;
use smallvec::SmallVec;
use tracing::debug;

pub mod dispatch;
mod handlers;

/// Values travel through invocation in a small inline buffer; almost every
/// call fits without a heap allocation.
pub(crate) type ArgVec = SmallVec<[Value; 8]>;

/// What a processor tells the engine to do next.
pub enum Flow {
    /// Advance past the instruction.
    Continue,
    /// Transfer to an absolute bytecode index.
    Jump(usize),
    /// Terminal: the frame's result is set.
    Return(Option<Value>),
}

/// An exception travelling through the unwinder: either an instance already
/// on the heap, or a pending one materialized only when a handler matches.
enum Raised {
    Instance(HeapRef),
    Pending(JavaThrowable),
}

impl Raised {
    fn into_error(self) -> VmError {
        match self {
            Raised::Instance(oop) => VmError::Thrown(oop),
            Raised::Pending(throwable) => VmError::Java(throwable),
        }
    }
}

pub struct Interpreter;

impl Interpreter {
    fn interpret_method(
        thread: &mut VmThread,
        method_id: MethodId,
        vm: &VirtualMachine,
    ) -> Result<Option<Value>, VmError> {
        let code_ptr = vm.method_area_read().get_method(method_id).code()? as *const [u8];
        loop {
            // SAFETY: methods are never removed from the method area, so the
            // code slice outlives the frame; the raw pointer sidesteps
            // holding the area lock across handler calls.
            let code = unsafe { &*code_ptr };
            let pc = thread.stack.pc()?;
            let instruction = Instruction::read_at(code, pc)?;
            let processor = vm.dispatch().processor(instruction.opcode);

            match processor(thread, vm, &instruction) {
                Ok(Flow::Continue) => {
                    let frame = thread.stack.cur_java_frame_mut()?;
                    frame.pc += instruction.size;
                }
                Ok(Flow::Jump(target)) => {
                    thread.stack.cur_java_frame_mut()?.pc = target;
                }
                Ok(Flow::Return(result)) => {
                    thread.stack.cur_java_frame_mut()?.result = result;
                    return Ok(result);
                }
                Err(error) => {
                    let raised = match error {
                        VmError::Thrown(oop) => Raised::Instance(oop),
                        VmError::Java(throwable) => Raised::Pending(throwable),
                        panic => return Err(panic),
                    };
                    if let Some(unhandled) =
                        Self::find_exception_handler(vm, method_id, raised, thread)?
                    {
                        thread.stack.pop_java_frame()?;
                        return Err(unhandled.into_error());
                    }
                }
            }
        }
    }

    fn pc_in_range(pc: usize, entry: &ExceptionTableEntry) -> bool {
        pc >= entry.start_pc as usize && pc < entry.end_pc as usize
    }

    fn is_exception_caught(
        vm: &VirtualMachine,
        entry: &ExceptionTableEntry,
        method_id: MethodId,
        raised: &Raised,
    ) -> Result<bool, VmError> {
        if entry.catch_type == 0 {
            return Ok(true);
        }

        let (catch_sym, loader) = {
            let method_area = vm.method_area_read();
            let class_id = method_area.get_method(method_id).class_id();
            let class = method_area.get_instance_class(class_id)?;
            (
                class
                    .cp
                    .get_class_sym(entry.catch_type, method_area.interner())?,
                class.loader(),
            )
        };

        let exception_class_id = match raised {
            Raised::Instance(oop) => vm.heap_read().class_id(*oop),
            Raised::Pending(throwable) => {
                let kind_sym = vm.interner().get_or_intern(throwable.kind.class_name());
                vm.method_area_write().get_class_id_or_load(kind_sym, loader)?
            }
        };

        vm.method_area_write()
            .instance_of(exception_class_id, catch_sym, loader)
    }

    /// Walks the current method's exception table. On a match the exception
    /// is materialized if still pending, the operand stack cleared, the
    /// exception pushed and control transferred to the handler. On a miss
    /// the raised exception is handed back for propagation.
    fn find_exception_handler(
        vm: &VirtualMachine,
        method_id: MethodId,
        raised: Raised,
        thread: &mut VmThread,
    ) -> Result<Option<Raised>, VmError> {
        let pc = thread.stack.pc()?;
        let entries: Vec<ExceptionTableEntry> = vm
            .method_area_read()
            .get_method(method_id)
            .exception_table()?
            .to_vec();

        for entry in &entries {
            if !Self::pc_in_range(pc, entry) {
                continue;
            }
            if Self::is_exception_caught(vm, entry, method_id, &raised)? {
                let exception = match raised {
                    Raised::Instance(oop) => oop,
                    Raised::Pending(throwable) => vm.materialize_throwable(thread, throwable)?,
                };
                let frame = thread.stack.cur_java_frame_mut()?;
                frame.clear_operands();
                frame.push_operand(Value::Ref(exception))?;
                frame.pc = entry.handler_pc as usize;
                return Ok(None);
            }
        }

        Ok(Some(raised))
    }

    /// Pops the callee's arguments off the caller's operand stack, receiver
    /// first in the result.
    pub(crate) fn prepare_method_args(
        thread: &mut VmThread,
        method_id: MethodId,
        vm: &VirtualMachine,
    ) -> Result<ArgVec, VmError> {
        let arg_count = vm
            .method_area_read()
            .get_method(method_id)
            .invocation_arg_count();
        let mut args = ArgVec::with_capacity(arg_count);
        for _ in 0..arg_count {
            args.push(thread.stack.pop_operand()?);
        }
        args.reverse();
        Ok(args)
    }

    pub(crate) fn invoke_native_method(
        thread: &mut VmThread,
        method_id: MethodId,
        args: ArgVec,
        vm: &VirtualMachine,
    ) -> Result<Option<Value>, VmError> {
        let method_key = {
            let method_area = vm.method_area_read();
            let method = method_area.get_method(method_id);
            let class_sym = method_area.get_class(method.class_id()).name();
            FullyQualifiedMethodKey::new(class_sym, method.name, method.desc)
        };
        let native = vm.native_registry.get(&method_key).ok_or_else(|| {
            let method_area = vm.method_area_read();
            build_exception!(
                UnsatisfiedLink,
                "{}.{}{}",
                method_area.class_name_dot(method_area.get_method(method_id).class_id()),
                method_area.interner().resolve(&method_area.get_method(method_id).name),
                method_area.interner().resolve(&method_area.get_method(method_id).desc)
            )
        })?;

        thread
            .stack
            .push_frame(FrameType::Native(NativeFrame::new(method_id)))?;
        let native_result = native(vm, thread, args.as_slice());
        thread.stack.pop_native_frame()?;
        native_result
    }

    fn invoke_java_method(
        thread: &mut VmThread,
        method_id: MethodId,
        args: ArgVec,
        vm: &VirtualMachine,
    ) -> Result<Option<Value>, VmError> {
        let (class_id, max_stack, max_locals) = {
            let method_area = vm.method_area_read();
            let method = method_area.get_method(method_id);
            let (max_stack, max_locals) = method.frame_attributes()?;
            (method.class_id(), max_stack, max_locals)
        };
        let mut frame = JavaFrame::new(class_id, method_id, max_stack, max_locals);
        frame.fill_locals(&args)?;
        thread.stack.push_frame(FrameType::Java(frame))?;
        let result = Self::interpret_method(thread, method_id, vm)?;
        thread.stack.pop_java_frame()?;
        Ok(result)
    }

    /// Runs a caller-prepared frame to completion and hands it back with its
    /// result slot set. The helper invocation surface builds on this.
    pub(crate) fn run_frame(
        thread: &mut VmThread,
        frame: JavaFrame,
        vm: &VirtualMachine,
    ) -> Result<JavaFrame, VmError> {
        let method_id = frame.method_id();
        thread.stack.push_frame(FrameType::Java(frame))?;
        Self::interpret_method(thread, method_id, vm)?;
        thread.stack.pop_java_frame()
    }

    pub(crate) fn invoke_method_core(
        thread: &mut VmThread,
        method_id: MethodId,
        args: ArgVec,
        vm: &VirtualMachine,
    ) -> Result<Option<Value>, VmError> {
        let (is_native, is_abstract) = {
            let method_area = vm.method_area_read();
            let method = method_area.get_method(method_id);
            (method.is_native(), method.is_abstract())
        };
        if is_abstract {
            let method_area = vm.method_area_read();
            let method = method_area.get_method(method_id);
            return Err(build_exception!(
                AbstractMethod,
                "{}.{}",
                method_area.class_name_dot(method.class_id()),
                method_area.interner().resolve(&method.name)
            ));
        }
        if is_native {
            Self::invoke_native_method(thread, method_id, args, vm)
        } else {
            Self::invoke_java_method(thread, method_id, args, vm)
        }
    }

    /// Invokes and pushes a non-void result onto the caller's operand stack.
    pub(crate) fn invoke_method_internal(
        thread: &mut VmThread,
        method_id: MethodId,
        args: ArgVec,
        vm: &VirtualMachine,
    ) -> Result<(), VmError> {
        if let Some(result) = Self::invoke_method_core(thread, method_id, args, vm)? {
            thread.stack.push_operand(result)?;
        }
        Ok(())
    }

    pub(crate) fn invoke_static_method(
        thread: &mut VmThread,
        method_id: MethodId,
        vm: &VirtualMachine,
        args: ArgVec,
    ) -> Result<(), VmError> {
        let class_id = vm.method_area_read().get_method(method_id).class_id();
        Self::ensure_initialized(thread, Some(class_id), vm)?;
        Self::invoke_method_internal(thread, method_id, args, vm)
    }

    /// Drives the initialization state machine: the first thread to request
    /// initialization runs `<clinit>` (superclass first, statics prepared);
    /// others block until the phase settles. Reentrant for the initializer.
    pub fn ensure_initialized(
        thread: &mut VmThread,
        class_id: Option<ClassId>,
        vm: &VirtualMachine,
    ) -> Result<(), VmError> {
        let Some(class_id) = class_id else {
            return Ok(());
        };

        // The claim below may block on the state machine; take the shared
        // handle so no method-area lock is pinned while waiting.
        let init = {
            let method_area = vm.method_area_read();
            match method_area.get_class(class_id) {
                JvmClass::Instance(instance) => instance.init_handle(),
                // Array and primitive classes have no initializers.
                _ => return Ok(()),
            }
        };
        let claim = init.claim(thread.id);

        match claim {
            InitClaim::AlreadyInitialized | InitClaim::Reentrant => Ok(()),
            InitClaim::Errored(cause) => Err(VmError::Java(JavaThrowable::with_cause(
                JavaExceptionKind::ExceptionInInitializer,
                None,
                cause,
            ))),
            InitClaim::Owned => {
                debug!("initializing class {}", vm.method_area_read().class_name(class_id));
                match Self::run_initializer(thread, class_id, vm) {
                    Ok(()) => {
                        init.complete();
                        Ok(())
                    }
                    Err(error) => {
                        let cause = match error {
                            VmError::Thrown(oop) => oop,
                            VmError::Java(throwable) => {
                                vm.materialize_throwable(thread, throwable)?
                            }
                            panic => return Err(panic),
                        };
                        init.fail(cause);
                        Err(VmError::Java(JavaThrowable::with_cause(
                            JavaExceptionKind::ExceptionInInitializer,
                            None,
                            cause,
                        )))
                    }
                }
            }
        }
    }

    fn run_initializer(
        thread: &mut VmThread,
        class_id: ClassId,
        vm: &VirtualMachine,
    ) -> Result<(), VmError> {
        let super_id = vm
            .method_area_read()
            .get_instance_class(class_id)?
            .super_id();
        Self::ensure_initialized(thread, super_id, vm)?;

        vm.initialize_static_fields(thread, class_id)?;

        let clinit = vm
            .method_area_read()
            .get_instance_class(class_id)?
            .clinit_method_id();
        if let Some(clinit) = clinit {
            Self::invoke_method_core(thread, clinit, ArgVec::new(), vm)?;
        }
        Ok(())
    }
}
