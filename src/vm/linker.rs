//! invokedynamic linkage. Each instruction site is linked at most once: the
//! bootstrap method runs through `MethodHandleNatives.linkCallSite` and the
//! materialized call site (the appendix slot) is memoized per site.

use crate::build_exception;
use crate::descriptor::PrimitiveType;
use crate::error::{JavaExceptionKind, JavaThrowable, VmError};
use crate::heap::{HeapRef, NULL_REF};
use crate::keys::{ClassId, MethodId, MethodKey, Symbol};
use crate::rt::constant_pool::RuntimeConstant;
use crate::rt::constant_pool::entry::{InvokeDynamicView, MethodHandleKind, MethodHandleView};
use crate::thread::VmThread;
use crate::vm::{Value, VirtualMachine};
use std::collections::HashMap;
use std::sync::RwLock;

/// One invokedynamic instruction site.
pub(crate) type CallSiteKey = (MethodId, usize);

enum CallSiteState {
    InProgress,
    Resolved(HeapRef),
}

/// Thread-safe memo of call-site linkage. Recursive linkage of the same site
/// is refused; a failed linkage clears the in-progress marker so the site
/// can retry.
pub(crate) struct CallSiteCache {
    states: RwLock<HashMap<CallSiteKey, CallSiteState>>,
}

impl CallSiteCache {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn resolve_with_cache<F>(&self, key: CallSiteKey, resolver: F) -> Result<HeapRef, VmError>
    where
        F: FnOnce() -> Result<HeapRef, VmError>,
    {
        {
            let states = self.states.read().unwrap();
            match states.get(&key) {
                Some(CallSiteState::Resolved(handle)) => return Ok(*handle),
                Some(CallSiteState::InProgress) => {
                    return Err(VmError::Panic(format!(
                        "recursive call site linkage at {key:?}"
                    )));
                }
                None => {}
            }
        }

        self.states
            .write()
            .unwrap()
            .insert(key, CallSiteState::InProgress);

        let result = resolver();
        let mut states = self.states.write().unwrap();
        match &result {
            Ok(handle) => {
                states.insert(key, CallSiteState::Resolved(*handle));
            }
            Err(_) => {
                states.remove(&key);
            }
        }
        result
    }
}

impl VirtualMachine {
    /// Executes one `invokedynamic` instruction at the current frame: links
    /// the site on first use, then dispatches through the linked handle.
    pub(crate) fn invoke_dynamic_call(
        &self,
        thread: &mut VmThread,
        cp_idx: u16,
    ) -> Result<(), VmError> {
        let (method_id, pc, caller_class) = {
            let frame = thread.stack.cur_java_frame()?;
            (frame.method_id(), frame.pc, frame.class_id())
        };
        let view = {
            let method_area = self.method_area_read();
            method_area
                .get_instance_class(caller_class)?
                .cp
                .get_invoke_dynamic_view(cp_idx, method_area.interner())?
        };

        let linked = self
            .call_sites
            .resolve_with_cache((method_id, pc), || {
                self.link_call_site(thread, caller_class, cp_idx, &view)
            })?;

        self.dispatch_linked_site(thread, linked, view.name_and_type.desc_sym)
    }

    /// Steps 1-6 of call-site linkage. Failures in the conversion and link
    /// steps wrap as `BootstrapMethodError`.
    fn link_call_site(
        &self,
        thread: &mut VmThread,
        caller_class: ClassId,
        cp_idx: u16,
        view: &InvokeDynamicView,
    ) -> Result<HeapRef, VmError> {
        if view.bootstrap.kind != MethodHandleKind::InvokeStatic {
            return Err(build_exception!(
                IllegalState,
                "bootstrap method is not invokestatic"
            ));
        }

        self.link_call_site_inner(thread, caller_class, cp_idx, view)
            .map_err(|error| match error {
                VmError::Panic(message) => VmError::Panic(message),
                vm_exception => {
                    let cause = match vm_exception {
                        VmError::Thrown(oop) => Some(oop),
                        VmError::Java(throwable) => {
                            self.materialize_throwable(thread, throwable).ok()
                        }
                        VmError::Panic(_) => unreachable!(),
                    };
                    VmError::Java(JavaThrowable {
                        kind: JavaExceptionKind::BootstrapMethod,
                        message: Some("CallSite initialization exception".to_string()),
                        cause,
                    })
                }
            })
    }

    fn link_call_site_inner(
        &self,
        thread: &mut VmThread,
        caller_class: ClassId,
        cp_idx: u16,
        view: &InvokeDynamicView,
    ) -> Result<HeapRef, VmError> {
        let caller_mirror = self
            .method_area_write()
            .get_mirror_or_create(caller_class, &self.heap)?;
        let bootstrap_handle =
            self.method_handle_from_view(thread, caller_class, &view.bootstrap)?;
        let name_ref = self.intern_string(thread, view.name_and_type.name_sym)?;
        let site_type = self.method_type_from_descriptor(thread, view.name_and_type.desc_sym)?;

        let mut static_args = Vec::with_capacity(view.bootstrap_args.len());
        for &arg_idx in &view.bootstrap_args {
            static_args.push(self.for_invoke_dynamic_call(thread, caller_class, arg_idx)?);
        }
        let args_array = self.to_vm_references(&static_args)?;
        let appendix = self.to_vm_references(&[Value::Null])?;

        let natives_class = self.method_area_write().get_class_id_or_load(
            self.symbols().method_handle_natives_sym,
            NULL_REF,
        )?;
        // Newer class libraries take the constant-pool index; fall back to
        // the older signature without it.
        let (link_method, with_index) = {
            let method_area = self.method_area_read();
            match method_area.resolve_static(natives_class, &self.symbols().link_call_site_indexed_mk)
            {
                Ok(method_id) => (method_id, true),
                Err(_) => (
                    method_area
                        .resolve_static(natives_class, &self.symbols().link_call_site_plain_mk)?,
                    false,
                ),
            }
        };

        let mut locals: Vec<Value> = Vec::with_capacity(7);
        locals.push(Value::Ref(caller_mirror));
        if with_index {
            locals.push(Value::Integer(cp_idx as i32));
        }
        locals.push(bootstrap_handle);
        locals.push(Value::Ref(name_ref));
        locals.push(site_type);
        locals.push(Value::Ref(args_array));
        locals.push(Value::Ref(appendix));

        self.invoke_static(thread, natives_class, link_method, &[], &locals)?;

        match self.heap_read().read_array_element(appendix, 0)? {
            Value::Ref(linked) => Ok(linked),
            _ => Err(build_exception!(
                NullPointer,
                "linkCallSite produced no call site"
            )),
        }
    }

    /// Dispatches through a linked handle: unwrap a `CallSite` via
    /// `getTarget`, prepend the handle into the reserved argument slot and
    /// invoke `invokeExact` with the site descriptor virtually.
    fn dispatch_linked_site(
        &self,
        thread: &mut VmThread,
        linked: HeapRef,
        site_desc: Symbol,
    ) -> Result<(), VmError> {
        let handle = {
            let linked_class = self.heap_read().class_id(linked);
            // A CallSite instance can only exist if its class was loaded.
            let call_site_id = self
                .method_area_read()
                .loader_data(NULL_REF)
                .and_then(|data| data.get(self.symbols().call_site_sym));
            let is_call_site = call_site_id.is_some_and(|call_site| {
                self.method_area_read()
                    .is_assignable_from(call_site, linked_class)
            });
            if is_call_site {
                let get_target = self
                    .method_area_read()
                    .find_virtual(linked_class, &self.symbols().get_target_mk)?;
                let target = self
                    .invoke_exact(thread, get_target, &[], &[Value::Ref(linked)])?
                    .unwrap_or(Value::Null);
                match target {
                    Value::Ref(target_ref) => target_ref,
                    _ => {
                        return Err(build_exception!(NullPointer, "call site target is null"));
                    }
                }
            } else {
                linked
            }
        };

        let descriptor_str = self.interner().resolve(&site_desc).to_string();
        let param_count =
            crate::descriptor::MethodDescriptor::parse(&descriptor_str)?.param_count();

        // Reuse the reserved slot: the handle goes in front of the popped
        // arguments.
        let mut locals: Vec<Value> = Vec::with_capacity(param_count + 1);
        locals.push(Value::Ref(handle));
        for _ in 0..param_count {
            locals.push(thread.stack.pop_operand()?);
        }
        locals[1..].reverse();

        let handle_class = self.heap_read().class_id(handle);
        let invoke_exact_key = MethodKey {
            name: self.symbols().invoke_exact_sym,
            desc: site_desc,
        };
        let method_id = self
            .method_area_read()
            .find_virtual(handle_class, &invoke_exact_key)?;
        if let Some(result) = self.invoke_exact(thread, method_id, &[], &locals)? {
            thread.stack.push_operand(result)?;
        }
        Ok(())
    }

    /// Converts one static bootstrap argument into its VM value. Each
    /// constant shape has a dedicated path.
    fn for_invoke_dynamic_call(
        &self,
        thread: &mut VmThread,
        caller_class: ClassId,
        cp_idx: u16,
    ) -> Result<Value, VmError> {
        enum Seed {
            Plain,
            MethodType(Symbol),
            MethodHandle(MethodHandleView),
        }

        let seed = {
            let method_area = self.method_area_read();
            let class = method_area.get_instance_class(caller_class)?;
            match class.cp.get_constant(cp_idx)? {
                RuntimeConstant::Integer(_)
                | RuntimeConstant::Float(_)
                | RuntimeConstant::Long(_)
                | RuntimeConstant::Double(_)
                | RuntimeConstant::String(_)
                | RuntimeConstant::Class(_) => Seed::Plain,
                RuntimeConstant::MethodType(_) => Seed::MethodType(
                    class
                        .cp
                        .get_method_type_sym(cp_idx, method_area.interner())?,
                ),
                RuntimeConstant::MethodHandle(_) => Seed::MethodHandle(
                    class
                        .cp
                        .get_method_handle_view(cp_idx, method_area.interner())?,
                ),
                other => {
                    return Err(VmError::Panic(format!(
                        "unsupported bootstrap argument: {}",
                        other.kind_name()
                    )));
                }
            }
        };

        match seed {
            Seed::Plain => self.value_from_ldc(thread, caller_class, cp_idx),
            Seed::MethodType(desc_sym) => self.method_type_from_descriptor(thread, desc_sym),
            Seed::MethodHandle(handle_view) => {
                self.method_handle_from_view(thread, caller_class, &handle_view)
            }
        }
    }

    /// `MethodType.fromMethodDescriptorString(desc, null)`.
    fn method_type_from_descriptor(
        &self,
        thread: &mut VmThread,
        desc_sym: Symbol,
    ) -> Result<Value, VmError> {
        let method_type_class = self
            .method_area_write()
            .get_class_id_or_load(self.symbols().method_type_sym, NULL_REF)?;
        let factory = self.method_area_read().resolve_static(
            method_type_class,
            &self.symbols().from_method_descriptor_string_mk,
        )?;
        let desc_ref = self.intern_string(thread, desc_sym)?;
        self.invoke_static(
            thread,
            method_type_class,
            factory,
            &[],
            &[Value::Ref(desc_ref), Value::Null],
        )?
        .ok_or_else(|| VmError::Panic("fromMethodDescriptorString returned void".to_string()))
    }

    /// Materializes a constant-pool method handle through
    /// `MethodHandleNatives.linkMethodHandleConstant`.
    fn method_handle_from_view(
        &self,
        thread: &mut VmThread,
        caller_class: ClassId,
        view: &MethodHandleView,
    ) -> Result<Value, VmError> {
        let caller_mirror = self
            .method_area_write()
            .get_mirror_or_create(caller_class, &self.heap)?;
        let owner_class = self
            .method_area_write()
            .get_class_id_or_load(view.member.class_sym, NULL_REF)?;
        let owner_mirror = self
            .method_area_write()
            .get_mirror_or_create(owner_class, &self.heap)?;
        let name_ref = self.intern_string(thread, view.member.name_and_type.name_sym)?;

        let type_value = if view.kind.is_field_access() {
            let field_class = self.class_from_field_descriptor(view.member.name_and_type.desc_sym)?;
            let field_mirror = self
                .method_area_write()
                .get_mirror_or_create(field_class, &self.heap)?;
            Value::Ref(field_mirror)
        } else {
            self.method_type_from_descriptor(thread, view.member.name_and_type.desc_sym)?
        };

        let natives_class = self.method_area_write().get_class_id_or_load(
            self.symbols().method_handle_natives_sym,
            NULL_REF,
        )?;
        let link_constant = self.method_area_read().resolve_static(
            natives_class,
            &self.symbols().link_method_handle_constant_mk,
        )?;
        self.invoke_static(
            thread,
            natives_class,
            link_constant,
            &[],
            &[
                Value::Ref(caller_mirror),
                Value::Integer(view.kind as i32),
                Value::Ref(owner_mirror),
                Value::Ref(name_ref),
                type_value,
            ],
        )?
        .ok_or_else(|| VmError::Panic("linkMethodHandleConstant returned void".to_string()))
    }

    /// Class of a field descriptor: primitive mirror for primitive tags,
    /// array class for `[`-prefixed names, loaded class otherwise.
    fn class_from_field_descriptor(&self, desc_sym: Symbol) -> Result<ClassId, VmError> {
        let desc = self.interner().resolve(&desc_sym).to_string();
        if let Some(primitive) = desc
            .chars()
            .next()
            .filter(|_| desc.len() == 1)
            .and_then(PrimitiveType::from_tag)
        {
            return Ok(self.method_area_read().primitive_class_id(primitive));
        }
        let name = if desc.starts_with('[') {
            desc.clone()
        } else if let Some(object_name) = desc
            .strip_prefix('L')
            .and_then(|rest| rest.strip_suffix(';'))
        {
            object_name.to_string()
        } else {
            return Err(VmError::Panic(format!("bad field descriptor {desc}")));
        };
        let name_sym = self.interner().get_or_intern(&name);
        self.method_area_write().get_class_id_or_load(name_sym, NULL_REF)
    }
}
