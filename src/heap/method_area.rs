//! The method area: every loaded class and method lives here, indexed by id.
//! Also home of the resolution algorithms (virtual, static, interface,
//! field), assignability, array class creation and mirror management.

use crate::build_exception;
use crate::class_loader::{BootSource, ClassLoaderData};
use crate::descriptor::{AllocationType, PrimitiveType};
use crate::error::VmError;
use crate::heap::{Heap, HeapRef, NULL_REF};
use crate::keys::{ClassId, FieldKey, MethodId, MethodKey, Symbol};
use crate::node::ClassParser;
use crate::rt::class::InstanceClass;
use crate::rt::layout::FieldSlot;
use crate::rt::method::Method;
use crate::rt::{ArrayClass, JvmClass, PrimitiveClass};
use crate::vm::symbols::Symbols;
use lasso::ThreadedRodeo;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

pub struct MethodArea {
    boot_source: Box<dyn BootSource>,
    parser: Box<dyn ClassParser>,
    /// Per-loader name maps and definition lists; the null handle keys the
    /// bootstrap loader.
    loaders: HashMap<HeapRef, ClassLoaderData>,
    classes: Vec<JvmClass>,
    methods: Vec<Method>,
    mirror_to_class: HashMap<HeapRef, ClassId>,
    primitive_ids: HashMap<PrimitiveType, ClassId>,
    interner: Arc<ThreadedRodeo>,
    symbols: Arc<Symbols>,
}

impl MethodArea {
    pub fn init(
        boot_source: Box<dyn BootSource>,
        parser: Box<dyn ClassParser>,
        interner: Arc<ThreadedRodeo>,
        symbols: Arc<Symbols>,
    ) -> Result<Self, VmError> {
        debug!("creating method area");
        let mut method_area = Self {
            boot_source,
            parser,
            loaders: HashMap::from([(NULL_REF, ClassLoaderData::new())]),
            classes: Vec::with_capacity(1024),
            methods: Vec::with_capacity(4096),
            mirror_to_class: HashMap::new(),
            primitive_ids: HashMap::new(),
            interner,
            symbols,
        };
        method_area.preload_basic_classes()?;
        Ok(method_area)
    }

    /// Registers the primitive classes and eagerly loads the classes the
    /// symbol table hands out ids for.
    fn preload_basic_classes(&mut self) -> Result<(), VmError> {
        for primitive in PrimitiveType::ALL {
            let name_sym = self.symbols.primitive_sym(primitive);
            let class_id = self.push_class(JvmClass::Primitive(PrimitiveClass::new(
                name_sym, primitive,
            )));
            self.primitive_ids.insert(primitive, class_id);
            self.boot_loader_data_mut().insert(name_sym, class_id);
        }

        let symbols = self.symbols.clone();
        symbols.set_java_lang_object_id(
            self.get_class_id_or_load(symbols.java_lang_object_sym, NULL_REF)?,
        )?;
        symbols.set_java_lang_class_id(
            self.get_class_id_or_load(symbols.java_lang_class_sym, NULL_REF)?,
        )?;
        symbols.set_java_lang_string_id(
            self.get_class_id_or_load(symbols.java_lang_string_sym, NULL_REF)?,
        )?;
        symbols.set_java_lang_throwable_id(
            self.get_class_id_or_load(symbols.java_lang_throwable_sym, NULL_REF)?,
        )?;
        symbols.set_java_lang_thread_id(
            self.get_class_id_or_load(symbols.java_lang_thread_sym, NULL_REF)?,
        )?;
        Ok(())
    }

    pub fn interner(&self) -> &ThreadedRodeo {
        &self.interner
    }

    pub fn parse(&self, bytes: &[u8]) -> Result<crate::node::ClassNode, VmError> {
        self.parser.parse(bytes)
    }

    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    fn boot_loader_data_mut(&mut self) -> &mut ClassLoaderData {
        self.loaders.get_mut(&NULL_REF).expect("bootstrap loader")
    }

    pub fn loader_data(&self, loader: HeapRef) -> Option<&ClassLoaderData> {
        self.loaders.get(&loader)
    }

    fn loader_data_mut(&mut self, loader: HeapRef) -> &mut ClassLoaderData {
        self.loaders.entry(loader).or_default()
    }

    /// Id the next pushed class will get.
    pub fn next_class_id(&self) -> ClassId {
        ClassId::from_usize(self.classes.len() + 1)
    }

    pub fn push_class(&mut self, class: JvmClass) -> ClassId {
        self.classes.push(class);
        ClassId::from_usize(self.classes.len())
    }

    pub fn get_class(&self, class_id: ClassId) -> &JvmClass {
        &self.classes[class_id.to_index()]
    }

    pub fn get_instance_class(&self, class_id: ClassId) -> Result<&InstanceClass, VmError> {
        self.get_class(class_id).as_instance()
    }

    pub fn push_method(&mut self, method: Method) -> MethodId {
        self.methods.push(method);
        MethodId::from_usize(self.methods.len())
    }

    pub fn get_method(&self, method_id: MethodId) -> &Method {
        &self.methods[method_id.to_index()]
    }

    pub fn class_name(&self, class_id: ClassId) -> &str {
        self.interner.resolve(&self.get_class(class_id).name())
    }

    pub fn class_name_dot(&self, class_id: ClassId) -> String {
        self.class_name(class_id).replace('/', ".")
    }

    pub fn primitive_class_id(&self, primitive: PrimitiveType) -> ClassId {
        self.primitive_ids[&primitive]
    }

    // ---- loading ----------------------------------------------------------

    /// Looks the name up in the requesting loader's map, then the bootstrap
    /// map, loading through the boot source on a complete miss. Array names
    /// are materialized recursively from their component.
    pub fn get_class_id_or_load(
        &mut self,
        name_sym: Symbol,
        loader: HeapRef,
    ) -> Result<ClassId, VmError> {
        if let Some(data) = self.loaders.get(&loader)
            && let Some(class_id) = data.get(name_sym)
        {
            return Ok(class_id);
        }
        if loader != NULL_REF
            && let Some(class_id) = self.loaders[&NULL_REF].get(name_sym)
        {
            return Ok(class_id);
        }
        self.load_class(name_sym, loader)
    }

    fn load_class(&mut self, name_sym: Symbol, loader: HeapRef) -> Result<ClassId, VmError> {
        let name = self.interner.resolve(&name_sym).to_string();
        if name.starts_with('[') {
            return self.load_array_class(name_sym, loader);
        }

        let bytes = self
            .boot_source
            .find(&name)
            .ok_or_else(|| build_exception!(NoClassDefFound, "{}", name.replace('/', ".")))?;
        let node = self.parser.parse(&bytes)?;
        debug!("linking class {name}");

        let super_id = match &node.super_name {
            Some(super_name) => {
                let super_sym = self.interner.get_or_intern(super_name);
                Some(self.get_class_id_or_load(super_sym, loader)?)
            }
            None => None,
        };

        // Boot-source classes are always defined by the bootstrap loader.
        let class_id = InstanceClass::link(&node, super_id, NULL_REF, self)?;
        self.boot_loader_data_mut().insert(name_sym, class_id);
        Ok(class_id)
    }

    fn load_array_class(&mut self, name_sym: Symbol, loader: HeapRef) -> Result<ClassId, VmError> {
        let name = self.interner.resolve(&name_sym).to_string();
        let component = &name[1..];
        let dimensions = name.bytes().take_while(|b| *b == b'[').count() as u8;

        let element = if component.starts_with('[') {
            let component_sym = self.interner.get_or_intern(component);
            self.get_class_id_or_load(component_sym, loader)?
        } else if let Some(object_name) = component
            .strip_prefix('L')
            .and_then(|rest| rest.strip_suffix(';'))
        {
            let component_sym = self.interner.get_or_intern(object_name);
            self.get_class_id_or_load(component_sym, loader)?
        } else {
            let tag = component.chars().next().unwrap_or('?');
            let primitive = PrimitiveType::from_tag(tag).ok_or_else(|| {
                VmError::Panic(format!("bad array descriptor {name}"))
            })?;
            self.primitive_class_id(primitive)
        };

        let super_id = self.symbols.java_lang_object_id()?;
        let class_id = self.push_class(JvmClass::Array(ArrayClass {
            name: name_sym,
            super_id,
            element,
            dimensions,
            mirror_ref: OnceCell::new(),
        }));
        self.boot_loader_data_mut().insert(name_sym, class_id);
        Ok(class_id)
    }

    /// Descriptor spelling of a class name, used to build array class names.
    fn descriptor_name_of(&self, class_id: ClassId) -> String {
        match self.get_class(class_id) {
            JvmClass::Instance(instance) => {
                format!("L{};", self.interner.resolve(&instance.name()))
            }
            JvmClass::Array(array) => self.interner.resolve(&array.name).to_string(),
            JvmClass::Primitive(primitive) => primitive.primitive_type.tag().to_string(),
        }
    }

    /// The array class whose component is `element`, created on demand.
    pub fn new_array_class(&mut self, element: ClassId) -> Result<ClassId, VmError> {
        let name = format!("[{}", self.descriptor_name_of(element));
        let name_sym = self.interner.get_or_intern(&name);
        self.get_class_id_or_load(name_sym, NULL_REF)
    }

    /// Element kind byte for arrays of the given component class.
    pub fn array_element_kind(&self, element: ClassId) -> AllocationType {
        match self.get_class(element) {
            JvmClass::Primitive(primitive) => primitive.primitive_type.allocation_type(),
            _ => AllocationType::Reference,
        }
    }

    /// Links a parsed node under the given defining loader. Duplicate names
    /// within the loader fail; callers hold the loader's define lock.
    pub fn define(&mut self, node: &crate::node::ClassNode, loader: HeapRef) -> Result<ClassId, VmError> {
        let name_sym = self.interner.get_or_intern(&node.name);
        if self
            .loaders
            .get(&loader)
            .is_some_and(|data| data.contains(name_sym))
        {
            return Err(build_exception!(
                ClassNotFound,
                "Class {} is already defined",
                node.name.replace('/', ".")
            ));
        }
        let super_id = match &node.super_name {
            Some(super_name) => {
                let super_sym = self.interner.get_or_intern(super_name);
                Some(self.get_class_id_or_load(super_sym, loader)?)
            }
            None => None,
        };
        let class_id = InstanceClass::link(node, super_id, loader, self)?;
        self.loader_data_mut(loader).insert(name_sym, class_id);
        Ok(class_id)
    }

    // ---- resolution -------------------------------------------------------

    fn declared_method_in_chain(
        &self,
        class_id: ClassId,
        key: &MethodKey,
    ) -> Result<Option<MethodId>, VmError> {
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            let class = self.get_instance_class(id)?;
            if let Some(method_id) = class.declared_method(key) {
                return Ok(Some(method_id));
            }
            cursor = class.super_id();
        }
        Ok(None)
    }

    fn method_miss(&self, owner: ClassId, key: &MethodKey) -> VmError {
        build_exception!(
            NoSuchMethod,
            "{}.{}{}",
            self.class_name_dot(owner),
            self.interner.resolve(&key.name),
            self.interner.resolve(&key.desc)
        )
    }

    /// Virtual method search: probe the receiver's concrete class for the
    /// exact `(name, desc)`, then each superclass in turn. Array receivers
    /// search `java/lang/Object`.
    pub fn find_virtual(&self, receiver: ClassId, key: &MethodKey) -> Result<MethodId, VmError> {
        let start = match self.get_class(receiver) {
            JvmClass::Array(_) => self.symbols.java_lang_object_id()?,
            _ => receiver,
        };
        self.declared_method_in_chain(start, key)?
            .ok_or_else(|| self.method_miss(receiver, key))
    }

    /// Same walk as [`Self::find_virtual`], but the resolved method must be
    /// static.
    pub fn resolve_static(&self, class_id: ClassId, key: &MethodKey) -> Result<MethodId, VmError> {
        let method_id = self
            .declared_method_in_chain(class_id, key)?
            .ok_or_else(|| self.method_miss(class_id, key))?;
        if !self.get_method(method_id).is_static() {
            return Err(build_exception!(
                IllegalState,
                "{}.{} is not static",
                self.class_name_dot(class_id),
                self.interner.resolve(&key.name)
            ));
        }
        Ok(method_id)
    }

    /// Interface method resolution: the receiver chain first, then the
    /// super-interface closure of the receiver.
    pub fn resolve_interface(
        &self,
        receiver: ClassId,
        key: &MethodKey,
    ) -> Result<MethodId, VmError> {
        let start = match self.get_class(receiver) {
            JvmClass::Array(_) => self.symbols.java_lang_object_id()?,
            _ => receiver,
        };
        if let Some(method_id) = self.declared_method_in_chain(start, key)? {
            return Ok(method_id);
        }

        let mut queue: Vec<ClassId> = Vec::new();
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let class = self.get_instance_class(id)?;
            queue.extend_from_slice(class.interfaces());
            cursor = class.super_id();
        }
        let mut visited = Vec::new();
        while let Some(interface_id) = queue.pop() {
            if visited.contains(&interface_id) {
                continue;
            }
            visited.push(interface_id);
            let interface = self.get_instance_class(interface_id)?;
            if let Some(method_id) = interface.declared_method(key) {
                return Ok(method_id);
            }
            queue.extend_from_slice(interface.interfaces());
        }
        Err(self.method_miss(receiver, key))
    }

    /// Class whose static layout declares the field, searching the class
    /// chain and then its interfaces.
    pub fn resolve_static_field_holder(
        &self,
        class_id: ClassId,
        key: &FieldKey,
    ) -> Result<ClassId, VmError> {
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            let class = self.get_instance_class(id)?;
            if class.static_layout().slot(key).is_some() {
                return Ok(id);
            }
            for &interface_id in class.interfaces() {
                if let Ok(holder) = self.resolve_static_field_holder(interface_id, key) {
                    return Ok(holder);
                }
            }
            cursor = class.super_id();
        }
        Err(build_exception!(
            NoSuchField,
            "{}.{}",
            self.class_name_dot(class_id),
            self.interner.resolve(&key.name)
        ))
    }

    /// Instance field slot, inherited fields included.
    pub fn resolve_instance_field(
        &self,
        class_id: ClassId,
        key: &FieldKey,
    ) -> Result<&FieldSlot, VmError> {
        self.get_instance_class(class_id)?
            .virtual_layout()
            .slot(key)
            .ok_or_else(|| {
                build_exception!(
                    NoSuchField,
                    "{}.{}",
                    self.class_name_dot(class_id),
                    self.interner.resolve(&key.name)
                )
            })
    }

    // ---- assignability ----------------------------------------------------

    pub fn is_assignable_from(&self, target: ClassId, cls: ClassId) -> bool {
        self.is_subtype_of(cls, target)
    }

    fn is_subtype_of(&self, this_class: ClassId, target_class: ClassId) -> bool {
        if this_class == target_class {
            return true;
        }

        match (self.get_class(this_class), self.get_class(target_class)) {
            (JvmClass::Array(this_array), JvmClass::Array(target_array)) => {
                let this_element = self.get_class(this_array.element);
                let target_element = self.get_class(target_array.element);
                match (this_element.is_primitive(), target_element.is_primitive()) {
                    (true, true) => this_array.element == target_array.element,
                    (false, false) => self.is_subtype_of(this_array.element, target_array.element),
                    _ => false,
                }
            }
            (JvmClass::Array(_), _) => {
                // Arrays are assignable to Object only (interface supertypes
                // of arrays are not modelled).
                self.symbols
                    .java_lang_object_id()
                    .map(|object| object == target_class)
                    .unwrap_or(false)
            }
            (JvmClass::Primitive(_), _) | (_, JvmClass::Primitive(_)) => false,
            (JvmClass::Instance(this), _) => {
                if let Some(super_id) = this.super_id()
                    && self.is_subtype_of(super_id, target_class)
                {
                    return true;
                }
                this.interfaces()
                    .iter()
                    .any(|&interface_id| self.is_subtype_of(interface_id, target_class))
            }
        }
    }

    /// Assignability against a class name, loading it if needed. Used for
    /// exception table catch types.
    pub fn instance_of(
        &mut self,
        this_class: ClassId,
        other_sym: Symbol,
        loader: HeapRef,
    ) -> Result<bool, VmError> {
        let other_id = self.get_class_id_or_load(other_sym, loader)?;
        Ok(self.is_subtype_of(this_class, other_id))
    }

    // ---- mirrors ----------------------------------------------------------

    /// Byte offset within a mirror object at which the static-field region
    /// begins: the `Class` instance fields, 8-aligned.
    pub fn static_base_offset(&self) -> Result<usize, VmError> {
        let class_class = self.get_instance_class(self.symbols.java_lang_class_id()?)?;
        Ok((class_class.instance_size() + 7) & !7)
    }

    /// The class's backing `java/lang/Class` object, allocated on first use.
    /// Mirrors of instance classes are extended by their static region.
    pub fn get_mirror_or_create(
        &mut self,
        class_id: ClassId,
        heap: &RwLock<Heap>,
    ) -> Result<HeapRef, VmError> {
        if let Some(mirror_ref) = self.get_class(class_id).mirror_ref() {
            return Ok(mirror_ref);
        }
        let class_class_id = self.symbols.java_lang_class_id()?;
        let static_size = match self.get_class(class_id) {
            JvmClass::Instance(instance) => instance.static_layout().size(),
            _ => 0,
        };
        let mirror_size = self.static_base_offset()? + static_size;
        let mirror_ref = heap
            .write()
            .unwrap()
            .alloc_instance(mirror_size, class_class_id)?;
        self.mirror_to_class.insert(mirror_ref, class_id);
        self.get_class(class_id).set_mirror_ref(mirror_ref)?;
        Ok(mirror_ref)
    }

    pub fn get_class_id_by_mirror(&self, mirror: HeapRef) -> Result<ClassId, VmError> {
        self.mirror_to_class
            .get(&mirror)
            .copied()
            .ok_or_else(|| VmError::Panic(format!("no class registered for mirror {mirror:#x}")))
    }
}
