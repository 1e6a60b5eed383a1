use crate::descriptor::AllocationType;
use crate::error::VmError;
use crate::heap::HeapRef;
use crate::keys::{ClassId, FieldKey, MethodId, MethodKey, Symbol};
use crate::node::{self, ClassNode};
use crate::rt::constant_pool::RuntimeConstantPool;
use crate::rt::layout::Layout;
use crate::rt::method::Method;
use crate::rt::{BaseClass, InitState, JvmClass};
use crate::heap::method_area::MethodArea;
use std::collections::HashMap;

/// Runtime mirror of a loaded (non-array, non-primitive) class. Interfaces
/// use the same mirror with the interface access bit set.
pub struct InstanceClass {
    base: BaseClass,

    pub cp: RuntimeConstantPool,

    declared_methods: HashMap<MethodKey, MethodId>,
    clinit: Option<MethodId>,

    virtual_layout: Layout,
    static_layout: Layout,

    /// Directly implemented interfaces, in declaration order.
    interfaces: Vec<ClassId>,
}

impl InstanceClass {
    /// Links a parsed node into the method area: resolves the superclass
    /// layouts, lays out fields, registers methods and loads direct
    /// interfaces. The superclass itself must already be loaded.
    pub fn link(
        node: &ClassNode,
        super_id: Option<ClassId>,
        loader: HeapRef,
        method_area: &mut MethodArea,
    ) -> Result<ClassId, VmError> {
        let mut interfaces = Vec::with_capacity(node.interfaces.len());
        for interface_name in &node.interfaces {
            let interface_sym = method_area.interner().get_or_intern(interface_name);
            interfaces.push(method_area.get_class_id_or_load(interface_sym, loader)?);
        }

        let this_id = method_area.next_class_id();
        let name = method_area.interner().get_or_intern(&node.name);
        let source_file = node
            .source_file
            .as_ref()
            .map(|source| method_area.interner().get_or_intern(source));

        let parent_virtual = match super_id {
            Some(id) => Some(
                method_area
                    .get_class(id)
                    .as_instance()?
                    .virtual_layout()
                    .clone(),
            ),
            None => None,
        };

        let mut virtual_builder = Layout::builder(parent_virtual.as_ref());
        let mut static_builder = Layout::builder(None);
        for field in &node.fields {
            let key = FieldKey {
                name: method_area.interner().get_or_intern(&field.name),
                desc: method_area.interner().get_or_intern(&field.descriptor),
            };
            let ty = AllocationType::of_descriptor(&field.descriptor)?;
            if field.is_static() {
                static_builder.push(key, ty, field.access_flags, this_id, field.constant_value);
            } else {
                virtual_builder.push(key, ty, field.access_flags, this_id, None);
            }
        }

        let mut declared_methods = HashMap::with_capacity(node.methods.len());
        let mut clinit = None;
        for method_node in &node.methods {
            let method_key = MethodKey {
                name: method_area.interner().get_or_intern(&method_node.name),
                desc: method_area.interner().get_or_intern(&method_node.descriptor),
            };
            let method = Method::new(method_node, this_id, method_key.name, method_key.desc)?;
            let method_id = method_area.push_method(method);
            if method_node.name == "<clinit>" {
                clinit = Some(method_id);
            } else {
                declared_methods.insert(method_key, method_id);
            }
        }

        let class = JvmClass::Instance(Box::new(Self {
            base: BaseClass::new(name, node.access_flags, super_id, loader, source_file),
            cp: RuntimeConstantPool::new(
                node.constant_pool.clone(),
                node.bootstrap_methods.clone(),
            ),
            declared_methods,
            clinit,
            virtual_layout: virtual_builder.finish(),
            static_layout: static_builder.finish(),
            interfaces,
        }));

        let pushed_id = method_area.push_class(class);
        debug_assert_eq!(pushed_id, this_id);
        Ok(pushed_id)
    }

    pub fn base(&self) -> &BaseClass {
        &self.base
    }

    pub fn name(&self) -> Symbol {
        self.base.name
    }

    pub fn super_id(&self) -> Option<ClassId> {
        self.base.super_id
    }

    pub fn loader(&self) -> HeapRef {
        self.base.loader
    }

    pub fn is_interface(&self) -> bool {
        self.base.flags & node::ACC_INTERFACE != 0
    }

    pub fn init(&self) -> &InitState {
        self.base.init()
    }

    pub fn init_handle(&self) -> std::sync::Arc<InitState> {
        self.base.init_handle()
    }

    pub fn clinit_method_id(&self) -> Option<MethodId> {
        self.clinit
    }

    pub fn declared_method(&self, key: &MethodKey) -> Option<MethodId> {
        self.declared_methods.get(key).copied()
    }

    pub fn virtual_layout(&self) -> &Layout {
        &self.virtual_layout
    }

    pub fn static_layout(&self) -> &Layout {
        &self.static_layout
    }

    /// Byte size of one instance's field storage.
    pub fn instance_size(&self) -> usize {
        self.virtual_layout.size()
    }

    pub fn interfaces(&self) -> &[ClassId] {
        &self.interfaces
    }
}
