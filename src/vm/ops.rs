//! The operations layer: the invocation surface exposed to embedders and
//! natives, string and array bridging between host and VM values, exception
//! construction, static-field preparation and class definition.

use crate::build_exception;
use crate::descriptor::{AllocationType, PrimitiveType};
use crate::error::{JavaThrowable, VmError};
use crate::heap::{HeapRef, NULL_REF};
use crate::interpreter::{ArgVec, Interpreter};
use crate::keys::{ClassId, MethodId, MethodKey, Symbol};
use crate::rt::JvmClass;
use crate::rt::constant_pool::RuntimeConstant;
use crate::thread::VmThread;
use crate::vm::stack::JavaFrame;
use crate::vm::{Value, VirtualMachine};

/// `java/lang/Thread` RUNNABLE status bit.
const THREAD_STATUS_RUNNABLE: i32 = 0x0004;
const THREAD_NORM_PRIORITY: i32 = 5;

impl VirtualMachine {
    // ---- invocation surface ----------------------------------------------

    fn run_with_frame(
        &self,
        thread: &mut VmThread,
        method_id: MethodId,
        stack: &[Value],
        locals: &[Value],
    ) -> Result<Option<Value>, VmError> {
        let (class_id, is_native) = {
            let method_area = self.method_area_read();
            let method = method_area.get_method(method_id);
            (method.class_id(), method.is_native())
        };
        if is_native {
            let args: ArgVec = locals.iter().copied().collect();
            return Interpreter::invoke_native_method(thread, method_id, args, self);
        }
        let (max_stack, max_locals) = self
            .method_area_read()
            .get_method(method_id)
            .frame_attributes()?;
        let mut frame = JavaFrame::new(class_id, method_id, max_stack, max_locals);
        frame.fill_locals(locals)?;
        frame.preload_stack(stack)?;
        let frame = Interpreter::run_frame(thread, frame, self)?;
        Ok(frame.result)
    }

    /// Runs a static method with preloaded operand stack and locals after
    /// ensuring its class is initialized.
    pub fn invoke_static(
        &self,
        thread: &mut VmThread,
        class_id: ClassId,
        method_id: MethodId,
        stack: &[Value],
        locals: &[Value],
    ) -> Result<Option<Value>, VmError> {
        if !self.method_area_read().get_method(method_id).is_static() {
            return Err(build_exception!(IllegalState, "method is not static"));
        }
        Interpreter::ensure_initialized(thread, Some(class_id), self)?;
        self.run_with_frame(thread, method_id, stack, locals)
    }

    /// Virtual dispatch: `locals[0]` is the receiver, resolution starts at
    /// its concrete class (`java/lang/Object` for arrays).
    pub fn invoke_virtual(
        &self,
        thread: &mut VmThread,
        name: &str,
        desc: &str,
        stack: &[Value],
        locals: &[Value],
    ) -> Result<Option<Value>, VmError> {
        let receiver = locals
            .first()
            .ok_or_else(|| VmError::Panic("virtual call without receiver".to_string()))?
            .as_obj_ref()?;
        let receiver_class = self.heap_read().class_id(receiver);
        let key = MethodKey::new_with_str(name, desc, self.interner());
        let method_id = self.method_area_read().find_virtual(receiver_class, &key)?;
        if self.method_area_read().get_method(method_id).is_static() {
            return Err(build_exception!(IllegalState, "{name} resolved to a static method"));
        }
        self.run_with_frame(thread, method_id, stack, locals)
    }

    /// Interface dispatch: receiver chain first, then super-interfaces.
    pub fn invoke_interface(
        &self,
        thread: &mut VmThread,
        name: &str,
        desc: &str,
        stack: &[Value],
        locals: &[Value],
    ) -> Result<Option<Value>, VmError> {
        let receiver = locals
            .first()
            .ok_or_else(|| VmError::Panic("interface call without receiver".to_string()))?
            .as_obj_ref()?;
        let receiver_class = self.heap_read().class_id(receiver);
        let key = MethodKey::new_with_str(name, desc, self.interner());
        let method_id = self
            .method_area_read()
            .resolve_interface(receiver_class, &key)?;
        self.run_with_frame(thread, method_id, stack, locals)
    }

    /// No resolution: executes the given non-static method directly.
    pub fn invoke_exact(
        &self,
        thread: &mut VmThread,
        method_id: MethodId,
        stack: &[Value],
        locals: &[Value],
    ) -> Result<Option<Value>, VmError> {
        if self.method_area_read().get_method(method_id).is_static() {
            return Err(build_exception!(IllegalState, "method is static"));
        }
        self.run_with_frame(thread, method_id, stack, locals)
    }

    // ---- strings ----------------------------------------------------------

    /// Descriptor of `String.value`, probed at runtime: `[C` on JDK 8 class
    /// shapes, `[B` on JDK 9+.
    fn string_value_shape(&self) -> Result<(usize, Symbol), VmError> {
        let method_area = self.method_area_read();
        let string_class = method_area.get_instance_class(self.symbols().java_lang_string_id()?)?;
        let slot = string_class
            .virtual_layout()
            .slot_by_name(self.symbols().value_name_sym)
            .ok_or_else(|| VmError::Panic("String has no value field".to_string()))?;
        Ok((slot.offset, slot.key.desc))
    }

    /// Allocates a `java/lang/String` for the host string. Empty strings get
    /// an empty backing array written directly; anything else goes through
    /// `<init>([C)V` with the host string's UTF-16 code units.
    pub fn new_utf8(&self, thread: &mut VmThread, value: &str) -> Result<HeapRef, VmError> {
        let string_class = self.symbols().java_lang_string_id()?;
        Interpreter::ensure_initialized(thread, Some(string_class), self)?;

        let instance_size = self
            .method_area_read()
            .get_instance_class(string_class)?
            .instance_size();
        let instance = self.heap_write().alloc_instance(instance_size, string_class)?;

        if value.is_empty() {
            let (value_offset, value_desc) = self.string_value_shape()?;
            let empty = if value_desc == self.symbols().byte_array_desc {
                self.new_primitive_array(PrimitiveType::Byte, 0)?
            } else {
                self.new_primitive_array(PrimitiveType::Char, 0)?
            };
            self.heap_write().write_field(
                instance,
                value_offset,
                Value::Ref(empty),
                AllocationType::Reference,
            )?;
            return Ok(instance);
        }

        let units: Vec<u16> = value.encode_utf16().collect();
        let char_array = self.to_vm_chars(&units)?;
        let constructor = self
            .method_area_read()
            .find_virtual(string_class, &self.symbols().char_array_constructor_mk)?;
        self.invoke_exact(
            thread,
            constructor,
            &[],
            &[Value::Ref(instance), Value::Ref(char_array)],
        )?;
        Ok(instance)
    }

    /// Inverse of [`Self::new_utf8`]: copies a VM string out through
    /// `toCharArray()`. Null maps to `None`.
    pub fn read_utf8(&self, thread: &mut VmThread, value: Value) -> Result<Option<String>, VmError> {
        let Some(string_ref) = value.as_nullable_obj_ref()? else {
            return Ok(None);
        };
        let class_id = self.heap_read().class_id(string_ref);
        if class_id != self.symbols().java_lang_string_id()? {
            return Err(build_exception!(
                IllegalState,
                "read_utf8 on {}",
                self.method_area_read().class_name_dot(class_id)
            ));
        }
        let to_char_array = self
            .method_area_read()
            .find_virtual(class_id, &self.symbols().to_char_array_mk)?;
        let chars_ref = self
            .invoke_exact(thread, to_char_array, &[], &[Value::Ref(string_ref)])?
            .ok_or_else(|| VmError::Panic("toCharArray returned void".to_string()))?
            .as_obj_ref()?;
        let units = self.to_java_chars(chars_ref)?;
        Ok(Some(String::from_utf16_lossy(&units)))
    }

    /// Pooled VM string for an interned host symbol, as `ldc` requires.
    pub fn intern_string(&self, thread: &mut VmThread, sym: Symbol) -> Result<HeapRef, VmError> {
        if let Some(existing) = self.string_pool.lock().unwrap().get(&sym) {
            return Ok(*existing);
        }
        let text = self.interner().resolve(&sym).to_string();
        let created = self.new_utf8(thread, &text)?;
        Ok(*self
            .string_pool
            .lock()
            .unwrap()
            .entry(sym)
            .or_insert(created))
    }

    // ---- host <-> VM arrays ----------------------------------------------

    fn new_primitive_array(
        &self,
        primitive: PrimitiveType,
        length: i32,
    ) -> Result<HeapRef, VmError> {
        let class_id = {
            let mut method_area = self.method_area_write();
            let element = method_area.primitive_class_id(primitive);
            method_area.new_array_class(element)?
        };
        self.heap_write()
            .alloc_array(class_id, primitive.allocation_type(), length)
    }

    fn check_element_kind(&self, array: HeapRef, kind: AllocationType) -> Result<(), VmError> {
        let actual = self.heap_read().array_kind(array)?;
        if actual != kind {
            return Err(build_exception!(
                IllegalState,
                "expected {kind:?} array, found {actual:?}"
            ));
        }
        Ok(())
    }

    pub fn to_vm_bytes(&self, values: &[i8]) -> Result<HeapRef, VmError> {
        let array = self.new_primitive_array(PrimitiveType::Byte, values.len() as i32)?;
        let mut heap = self.heap_write();
        for (index, &value) in values.iter().enumerate() {
            heap.write_array_element(array, index as i32, Value::Integer(value as i32))?;
        }
        Ok(array)
    }

    pub fn to_vm_booleans(&self, values: &[bool]) -> Result<HeapRef, VmError> {
        let array = self.new_primitive_array(PrimitiveType::Boolean, values.len() as i32)?;
        let mut heap = self.heap_write();
        for (index, &value) in values.iter().enumerate() {
            heap.write_array_element(array, index as i32, Value::Integer(value as i32))?;
        }
        Ok(array)
    }

    pub fn to_vm_shorts(&self, values: &[i16]) -> Result<HeapRef, VmError> {
        let array = self.new_primitive_array(PrimitiveType::Short, values.len() as i32)?;
        let mut heap = self.heap_write();
        for (index, &value) in values.iter().enumerate() {
            heap.write_array_element(array, index as i32, Value::Integer(value as i32))?;
        }
        Ok(array)
    }

    pub fn to_vm_chars(&self, values: &[u16]) -> Result<HeapRef, VmError> {
        let array = self.new_primitive_array(PrimitiveType::Char, values.len() as i32)?;
        let mut heap = self.heap_write();
        for (index, &value) in values.iter().enumerate() {
            heap.write_array_element(array, index as i32, Value::Integer(value as i32))?;
        }
        Ok(array)
    }

    pub fn to_vm_ints(&self, values: &[i32]) -> Result<HeapRef, VmError> {
        let array = self.new_primitive_array(PrimitiveType::Int, values.len() as i32)?;
        let mut heap = self.heap_write();
        for (index, &value) in values.iter().enumerate() {
            heap.write_array_element(array, index as i32, Value::Integer(value))?;
        }
        Ok(array)
    }

    pub fn to_vm_longs(&self, values: &[i64]) -> Result<HeapRef, VmError> {
        let array = self.new_primitive_array(PrimitiveType::Long, values.len() as i32)?;
        let mut heap = self.heap_write();
        for (index, &value) in values.iter().enumerate() {
            heap.write_array_element(array, index as i32, Value::Long(value))?;
        }
        Ok(array)
    }

    pub fn to_vm_floats(&self, values: &[f32]) -> Result<HeapRef, VmError> {
        let array = self.new_primitive_array(PrimitiveType::Float, values.len() as i32)?;
        let mut heap = self.heap_write();
        for (index, &value) in values.iter().enumerate() {
            heap.write_array_element(array, index as i32, Value::Float(value))?;
        }
        Ok(array)
    }

    pub fn to_vm_doubles(&self, values: &[f64]) -> Result<HeapRef, VmError> {
        let array = self.new_primitive_array(PrimitiveType::Double, values.len() as i32)?;
        let mut heap = self.heap_write();
        for (index, &value) in values.iter().enumerate() {
            heap.write_array_element(array, index as i32, Value::Double(value))?;
        }
        Ok(array)
    }

    /// Reference array of `java/lang/Object` component; elements must be
    /// references or null.
    pub fn to_vm_references(&self, values: &[Value]) -> Result<HeapRef, VmError> {
        let class_id = {
            let mut method_area = self.method_area_write();
            let element = self.symbols().java_lang_object_id()?;
            method_area.new_array_class(element)?
        };
        let array = self
            .heap_write()
            .alloc_array(class_id, AllocationType::Reference, values.len() as i32)?;
        let mut heap = self.heap_write();
        for (index, &value) in values.iter().enumerate() {
            value.as_nullable_obj_ref()?;
            heap.write_array_element(array, index as i32, value)?;
        }
        Ok(array)
    }

    pub fn to_java_bytes(&self, array: HeapRef) -> Result<Vec<i8>, VmError> {
        self.check_element_kind(array, AllocationType::Byte)?;
        let heap = self.heap_read();
        let length = heap.array_length(array)?;
        (0..length)
            .map(|index| Ok(heap.read_array_element(array, index)?.as_int()? as i8))
            .collect()
    }

    pub fn to_java_booleans(&self, array: HeapRef) -> Result<Vec<bool>, VmError> {
        self.check_element_kind(array, AllocationType::Boolean)?;
        let heap = self.heap_read();
        let length = heap.array_length(array)?;
        (0..length)
            .map(|index| Ok(heap.read_array_element(array, index)?.as_int()? != 0))
            .collect()
    }

    pub fn to_java_shorts(&self, array: HeapRef) -> Result<Vec<i16>, VmError> {
        self.check_element_kind(array, AllocationType::Short)?;
        let heap = self.heap_read();
        let length = heap.array_length(array)?;
        (0..length)
            .map(|index| Ok(heap.read_array_element(array, index)?.as_int()? as i16))
            .collect()
    }

    pub fn to_java_chars(&self, array: HeapRef) -> Result<Vec<u16>, VmError> {
        self.check_element_kind(array, AllocationType::Char)?;
        let heap = self.heap_read();
        let length = heap.array_length(array)?;
        (0..length)
            .map(|index| Ok(heap.read_array_element(array, index)?.as_int()? as u16))
            .collect()
    }

    pub fn to_java_ints(&self, array: HeapRef) -> Result<Vec<i32>, VmError> {
        self.check_element_kind(array, AllocationType::Int)?;
        let heap = self.heap_read();
        let length = heap.array_length(array)?;
        (0..length)
            .map(|index| heap.read_array_element(array, index)?.as_int())
            .collect()
    }

    pub fn to_java_longs(&self, array: HeapRef) -> Result<Vec<i64>, VmError> {
        self.check_element_kind(array, AllocationType::Long)?;
        let heap = self.heap_read();
        let length = heap.array_length(array)?;
        (0..length)
            .map(|index| heap.read_array_element(array, index)?.as_long())
            .collect()
    }

    pub fn to_java_floats(&self, array: HeapRef) -> Result<Vec<f32>, VmError> {
        self.check_element_kind(array, AllocationType::Float)?;
        let heap = self.heap_read();
        let length = heap.array_length(array)?;
        (0..length)
            .map(|index| heap.read_array_element(array, index)?.as_float())
            .collect()
    }

    pub fn to_java_doubles(&self, array: HeapRef) -> Result<Vec<f64>, VmError> {
        self.check_element_kind(array, AllocationType::Double)?;
        let heap = self.heap_read();
        let length = heap.array_length(array)?;
        (0..length)
            .map(|index| heap.read_array_element(array, index)?.as_double())
            .collect()
    }

    pub fn to_java_references(&self, array: HeapRef) -> Result<Vec<Value>, VmError> {
        self.check_element_kind(array, AllocationType::Reference)?;
        let heap = self.heap_read();
        let length = heap.array_length(array)?;
        (0..length)
            .map(|index| heap.read_array_element(array, index))
            .collect()
    }

    // ---- constants --------------------------------------------------------

    /// Converts a loadable constant-pool entry into its VM value.
    pub fn value_from_ldc(
        &self,
        thread: &mut VmThread,
        class_id: ClassId,
        idx: u16,
    ) -> Result<Value, VmError> {
        enum Seed {
            Ready(Value),
            Text(Symbol),
            Type(Symbol),
        }

        let (seed, loader) = {
            let method_area = self.method_area_read();
            let class = method_area.get_instance_class(class_id)?;
            let seed = match class.cp.get_constant(idx)? {
                RuntimeConstant::Integer(v) => Seed::Ready(Value::Integer(*v)),
                RuntimeConstant::Float(v) => Seed::Ready(Value::Float(*v)),
                RuntimeConstant::Long(v) => Seed::Ready(Value::Long(*v)),
                RuntimeConstant::Double(v) => Seed::Ready(Value::Double(*v)),
                RuntimeConstant::String(_) => {
                    Seed::Text(class.cp.get_string_sym(idx, method_area.interner())?)
                }
                RuntimeConstant::Class(_) => {
                    Seed::Type(class.cp.get_class_sym(idx, method_area.interner())?)
                }
                other => {
                    return Err(VmError::Panic(format!(
                        "ldc of unsupported constant at index {idx}: {}",
                        other.kind_name()
                    )));
                }
            };
            (seed, class.loader())
        };

        match seed {
            Seed::Ready(value) => Ok(value),
            Seed::Text(sym) => Ok(Value::Ref(self.intern_string(thread, sym)?)),
            Seed::Type(sym) => {
                let target = self
                    .method_area_write()
                    .get_class_id_or_load(sym, loader)?;
                let mirror = self
                    .method_area_write()
                    .get_mirror_or_create(target, &self.heap)?;
                Ok(Value::Ref(mirror))
            }
        }
    }

    // ---- field preparation ------------------------------------------------

    /// Writes every static field of the class: the declared constant when
    /// the field carries one (reference constants through the `ldc`
    /// conversion), the type's default otherwise.
    pub fn initialize_static_fields(
        &self,
        thread: &mut VmThread,
        class_id: ClassId,
    ) -> Result<(), VmError> {
        let mirror = self
            .method_area_write()
            .get_mirror_or_create(class_id, &self.heap)?;
        let base = self.method_area_read().static_base_offset()?;

        let slots: Vec<_> = {
            let method_area = self.method_area_read();
            let class = method_area.get_instance_class(class_id)?;
            class
                .static_layout()
                .slots()
                .iter()
                .map(|slot| (slot.offset, slot.ty, slot.key.desc, slot.constant_value))
                .collect()
        };

        for (offset, ty, desc_sym, constant) in slots {
            let value = match constant {
                Some(idx) => self.value_from_ldc(thread, class_id, idx)?,
                None => {
                    let desc = self.interner().resolve(&desc_sym);
                    Value::default_for_descriptor(desc)
                }
            };
            // A constant whose shape disagrees with the layout is fatal; the
            // write below reports it on the panic channel.
            self.heap_write()
                .write_field(mirror, base + offset, value, ty)?;
        }
        Ok(())
    }

    /// Zeroes every field in the object's virtual layout, optionally only
    /// those declared by one ancestor class.
    pub fn initialize_default_values(
        &self,
        object: HeapRef,
        declared_by: Option<ClassId>,
    ) -> Result<(), VmError> {
        let class_id = self.heap_read().class_id(object);
        let slots: Vec<_> = {
            let method_area = self.method_area_read();
            let class = method_area.get_instance_class(class_id)?;
            class
                .virtual_layout()
                .slots()
                .iter()
                .filter(|slot| declared_by.is_none_or(|filter| slot.declaring_class == filter))
                .map(|slot| (slot.offset, slot.ty, slot.key.desc))
                .collect()
        };
        for (offset, ty, desc_sym) in slots {
            let desc = self.interner().resolve(&desc_sym).to_string();
            self.heap_write()
                .write_field(object, offset, Value::default_for_descriptor(&desc), ty)?;
        }
        Ok(())
    }

    // ---- class definition -------------------------------------------------

    /// Defines a class from bytes under the given loader, as
    /// `ClassLoader.defineClass` requires: bounds-checked, name-checked,
    /// linked under the loader's define lock, mirror allocated and labelled.
    #[allow(clippy::too_many_arguments)]
    pub fn define_class(
        &self,
        thread: &mut VmThread,
        loader: Value,
        expected_name: Option<&str>,
        bytes: &[u8],
        offset: i32,
        length: i32,
        protection_domain: Value,
        _source: &str,
    ) -> Result<ClassId, VmError> {
        let total = bytes.len() as i64;
        let (offset, length) = (offset as i64, length as i64);
        if offset < 0 || length < 0 || offset + length < 0 || total - (offset + length) < 0 {
            return Err(build_exception!(
                ArrayIndexOutOfBounds,
                "offset {offset}, length {length} out of bounds for {total}"
            ));
        }

        let node = self
            .method_area_read()
            .parse(&bytes[offset as usize..(offset + length) as usize])?;

        if let Some(expected) = expected_name {
            let expected_internal = expected.replace('.', "/");
            if expected_internal != node.name {
                return Err(build_exception!(
                    ClassNotFound,
                    "{} (wrong name: {})",
                    expected.replace('/', "."),
                    node.name.replace('/', ".")
                ));
            }
        }

        let loader_ref = loader.as_nullable_obj_ref()?.unwrap_or(NULL_REF);
        let define_lock = self.loader_locks.lock_for(loader_ref);
        let _guard = define_lock.lock().unwrap();

        let class_id = self.method_area_write().define(&node, loader_ref)?;
        let mirror = self
            .method_area_write()
            .get_mirror_or_create(class_id, &self.heap)?;
        self.initialize_default_values(mirror, None)?;

        // Label the mirror with its defining loader and protection domain
        // when the Class shape carries the fields.
        let class_class = self.symbols().java_lang_class_id()?;
        let label_slots: Vec<(usize, Value)> = {
            let method_area = self.method_area_read();
            let layout = method_area.get_instance_class(class_class)?.virtual_layout();
            [
                (self.symbols().class_loader_name_sym, loader),
                (self.symbols().protection_domain_name_sym, protection_domain),
            ]
            .into_iter()
            .filter_map(|(name, value)| {
                layout
                    .slot_by_name(name)
                    .filter(|slot| slot.ty == AllocationType::Reference)
                    .map(|slot| (slot.offset, value))
            })
            .collect()
        };
        for (slot_offset, value) in label_slots {
            self.heap_write()
                .write_field(mirror, slot_offset, value, AllocationType::Reference)?;
        }

        if loader_ref != NULL_REF {
            self.append_to_loader_classes(thread, loader_ref, mirror)?;
        }
        Ok(class_id)
    }

    /// `loader.classes.add(mirror)` when the loader object carries the
    /// JDK 8-style `classes` vector.
    fn append_to_loader_classes(
        &self,
        thread: &mut VmThread,
        loader: HeapRef,
        mirror: HeapRef,
    ) -> Result<(), VmError> {
        let classes_field = {
            let method_area = self.method_area_read();
            let loader_class = method_area.get_instance_class(self.heap_read().class_id(loader))?;
            let classes_sym = self.interner().get_or_intern("classes");
            loader_class
                .virtual_layout()
                .slot_by_name(classes_sym)
                .map(|slot| slot.offset)
        };
        let Some(classes_offset) = classes_field else {
            return Ok(());
        };
        let vector = self
            .heap_read()
            .read_field(loader, classes_offset, AllocationType::Reference)?;
        let Value::Ref(vector_ref) = vector else {
            return Ok(());
        };
        let add = {
            let method_area = self.method_area_read();
            let vector_class = self.heap_read().class_id(vector_ref);
            method_area.find_virtual(vector_class, &self.symbols().vector_add_mk)?
        };
        self.invoke_exact(
            thread,
            add,
            &[],
            &[Value::Ref(vector_ref), Value::Ref(mirror)],
        )?;
        Ok(())
    }

    // ---- exceptions -------------------------------------------------------

    /// Builds an instance of the named throwable class via `<init>()V`,
    /// writing `detailMessage` and `cause` directly when the fields exist.
    fn construct_exception(
        &self,
        thread: &mut VmThread,
        class_name: &str,
        message: Option<&str>,
        cause: Option<HeapRef>,
    ) -> Result<HeapRef, VmError> {
        let class_sym = self.interner().get_or_intern(class_name);
        let class_id = self
            .method_area_write()
            .get_class_id_or_load(class_sym, NULL_REF)?;
        Interpreter::ensure_initialized(thread, Some(class_id), self)?;

        let instance_size = self
            .method_area_read()
            .get_instance_class(class_id)?
            .instance_size();
        let instance = self.heap_write().alloc_instance(instance_size, class_id)?;
        let constructor = self
            .method_area_read()
            .find_virtual(class_id, &self.symbols().no_arg_constructor_mk)?;
        self.invoke_exact(thread, constructor, &[], &[Value::Ref(instance)])?;

        if let Some(message) = message {
            let message_slot = self
                .method_area_read()
                .get_instance_class(class_id)?
                .virtual_layout()
                .slot(&self.symbols().detail_message_fk)
                .map(|slot| slot.offset);
            if let Some(offset) = message_slot {
                let message_ref = self.new_utf8(thread, message)?;
                self.heap_write().write_field(
                    instance,
                    offset,
                    Value::Ref(message_ref),
                    AllocationType::Reference,
                )?;
            }
        }
        if let Some(cause) = cause {
            let cause_slot = self
                .method_area_read()
                .get_instance_class(class_id)?
                .virtual_layout()
                .slot(&self.symbols().cause_fk)
                .map(|slot| slot.offset);
            if let Some(offset) = cause_slot {
                self.heap_write().write_field(
                    instance,
                    offset,
                    Value::Ref(cause),
                    AllocationType::Reference,
                )?;
            }
        }
        Ok(instance)
    }

    /// Constructs and raises a throwable of the named class in the engine.
    pub fn throw_exception(
        &self,
        thread: &mut VmThread,
        class_name: &str,
        message: Option<&str>,
        cause: Option<HeapRef>,
    ) -> VmError {
        match self.construct_exception(thread, class_name, message, cause) {
            Ok(instance) => VmError::Thrown(instance),
            Err(error) => error,
        }
    }

    /// Turns a pending throwable into an instance at the catch boundary. A
    /// failure to materialize is fatal: it would otherwise loop through the
    /// unwinder forever.
    pub(crate) fn materialize_throwable(
        &self,
        thread: &mut VmThread,
        throwable: JavaThrowable,
    ) -> Result<HeapRef, VmError> {
        self.construct_exception(
            thread,
            throwable.kind.class_name(),
            throwable.message.as_deref(),
            throwable.cause,
        )
        .map_err(|error| match error {
            VmError::Panic(message) => VmError::Panic(message),
            other => VmError::Panic(format!(
                "failed to materialize {}: {other}",
                throwable.kind.class_name_dot()
            )),
        })
    }

    // ---- checks -----------------------------------------------------------

    pub fn range_check(&self, index: i32, length: i32) -> Result<(), VmError> {
        if index < 0 || index >= length {
            return Err(build_exception!(
                ArrayIndexOutOfBounds,
                "Index {index} out of bounds for length {length}"
            ));
        }
        Ok(())
    }

    pub fn check_array_length(&self, length: i32) -> Result<(), VmError> {
        if length < 0 {
            return Err(build_exception!(NegativeArraySize, "{length}"));
        }
        Ok(())
    }

    pub fn check_not_null(&self, value: &Value) -> Result<HeapRef, VmError> {
        value.as_obj_ref()
    }

    pub fn check_array(&self, object: HeapRef) -> Result<(), VmError> {
        if !self.heap_read().is_array(object) {
            return Err(build_exception!(IllegalState, "object is not an array"));
        }
        Ok(())
    }

    // ---- threads ----------------------------------------------------------

    /// Copies the host thread's identity onto a `java/lang/Thread` mirror
    /// and marks it runnable.
    pub fn screen_vm_thread(
        &self,
        thread: &mut VmThread,
        thread_oop: HeapRef,
    ) -> Result<(), VmError> {
        let class_id = self.heap_read().class_id(thread_oop);
        let host_name = std::thread::current()
            .name()
            .unwrap_or("Thread-0")
            .to_string();

        let (name_slot, priority_slot, daemon_slot, status_slot) = {
            let method_area = self.method_area_read();
            let layout = method_area.get_instance_class(class_id)?.virtual_layout();
            (
                layout
                    .slot_by_name(self.symbols().name_name_sym)
                    .filter(|slot| slot.ty == AllocationType::Reference)
                    .map(|slot| slot.offset),
                layout
                    .slot(&self.symbols().priority_fk)
                    .map(|slot| slot.offset),
                layout
                    .slot(&self.symbols().daemon_fk)
                    .map(|slot| slot.offset),
                layout
                    .slot(&self.symbols().thread_status_fk)
                    .map(|slot| slot.offset),
            )
        };

        if let Some(offset) = name_slot {
            let name_ref = self.new_utf8(thread, &host_name)?;
            self.heap_write().write_field(
                thread_oop,
                offset,
                Value::Ref(name_ref),
                AllocationType::Reference,
            )?;
        }
        if let Some(offset) = priority_slot {
            self.heap_write().write_field(
                thread_oop,
                offset,
                Value::Integer(THREAD_NORM_PRIORITY),
                AllocationType::Int,
            )?;
        }
        if let Some(offset) = daemon_slot {
            self.heap_write().write_field(
                thread_oop,
                offset,
                Value::Integer(0),
                AllocationType::Boolean,
            )?;
        }
        if let Some(offset) = status_slot {
            self.heap_write().write_field(
                thread_oop,
                offset,
                Value::Integer(THREAD_STATUS_RUNNABLE),
                AllocationType::Int,
            )?;
        }
        thread.bind_oop(thread_oop);
        Ok(())
    }

    /// Object allocation for embedders: zeroed instance of the class.
    pub fn new_instance(
        &self,
        thread: &mut VmThread,
        class_id: ClassId,
    ) -> Result<HeapRef, VmError> {
        Interpreter::ensure_initialized(thread, Some(class_id), self)?;
        let instance_size = self
            .method_area_read()
            .get_instance_class(class_id)?
            .instance_size();
        self.heap_write().alloc_instance(instance_size, class_id)
    }

    /// Monitor wait on an object: releases, blocks (optionally timed),
    /// re-acquires. Interrupts surface as `InterruptedException`.
    pub fn object_wait(
        &self,
        thread: &VmThread,
        object: HeapRef,
        timeout_ms: i64,
        nanos: i32,
    ) -> Result<(), VmError> {
        if thread.take_interrupted() {
            return Err(build_exception!(Interrupted, "sleep interrupted"));
        }
        let timeout = if timeout_ms == 0 && nanos == 0 {
            None
        } else {
            Some(std::time::Duration::from_millis(timeout_ms as u64)
                + std::time::Duration::from_nanos(nanos as u64))
        };
        let monitor = self.monitors().monitor(object);
        monitor.wait(thread.id, timeout)?;
        if thread.take_interrupted() {
            return Err(build_exception!(Interrupted, "wait interrupted"));
        }
        Ok(())
    }
}

// Keeps the helper surface honest about array-vs-instance classes.
impl VirtualMachine {
    pub fn class_of(&self, value: &Value) -> Result<ClassId, VmError> {
        Ok(self.heap_read().class_id(value.as_obj_ref()?))
    }

    pub fn is_array_class(&self, class_id: ClassId) -> bool {
        matches!(self.method_area_read().get_class(class_id), JvmClass::Array(_))
    }
}
