//! Eagerly interned well-known names, descriptors and member keys, plus the
//! class ids of the bootstrap classes resolved at boot. A field of the VM
//! instance, immutable once boot completes.

use crate::descriptor::PrimitiveType;
use crate::error::VmError;
use crate::keys::{ClassId, FieldKey, MethodKey, Symbol};
use lasso::ThreadedRodeo;
use once_cell::sync::OnceCell;
use std::collections::HashMap;

pub struct Symbols {
    // Common method keys
    pub no_arg_constructor_mk: MethodKey,
    pub char_array_constructor_mk: MethodKey,
    pub to_char_array_mk: MethodKey,
    pub vector_add_mk: MethodKey,
    pub get_target_mk: MethodKey,
    pub from_method_descriptor_string_mk: MethodKey,
    pub link_method_handle_constant_mk: MethodKey,
    /// `linkCallSite` with the leading constant-pool index argument.
    pub link_call_site_indexed_mk: MethodKey,
    /// `linkCallSite` without the index argument (older class libraries).
    pub link_call_site_plain_mk: MethodKey,

    // Common field keys
    pub detail_message_fk: FieldKey,
    pub cause_fk: FieldKey,
    pub priority_fk: FieldKey,
    pub daemon_fk: FieldKey,
    pub thread_status_fk: FieldKey,

    // Field names probed by name only (descriptor varies across library
    // versions or is irrelevant)
    pub value_name_sym: Symbol,
    pub name_name_sym: Symbol,
    pub class_loader_name_sym: Symbol,
    pub protection_domain_name_sym: Symbol,

    // Common class names (interned, overrides applied)
    pub java_lang_object_sym: Symbol,
    pub java_lang_class_sym: Symbol,
    pub java_lang_string_sym: Symbol,
    pub java_lang_throwable_sym: Symbol,
    pub java_lang_thread_sym: Symbol,
    pub java_util_vector_sym: Symbol,
    pub method_handle_natives_sym: Symbol,
    pub method_type_sym: Symbol,
    pub call_site_sym: Symbol,

    // Common method names
    pub init_sym: Symbol,
    pub clinit_sym: Symbol,
    pub invoke_exact_sym: Symbol,

    // Common descriptors
    pub void_desc: Symbol,
    pub string_desc: Symbol,
    pub object_desc: Symbol,
    pub throwable_desc: Symbol,
    pub char_array_desc: Symbol,
    pub byte_array_desc: Symbol,

    // Primitive name symbols, in PrimitiveType::ALL order
    primitive_syms: [Symbol; 8],

    // Bootstrap class ids, filled during boot
    java_lang_object_id: OnceCell<ClassId>,
    java_lang_class_id: OnceCell<ClassId>,
    java_lang_string_id: OnceCell<ClassId>,
    java_lang_throwable_id: OnceCell<ClassId>,
    java_lang_thread_id: OnceCell<ClassId>,
}

impl Symbols {
    /// Interns every well-known name. `overrides` remaps bootstrap class
    /// names for embedders running against a renamed class library.
    pub fn new(interner: &ThreadedRodeo, overrides: &HashMap<String, String>) -> Self {
        let class_name = |name: &str| -> Symbol {
            match overrides.get(name) {
                Some(renamed) => interner.get_or_intern(renamed),
                None => interner.get_or_intern(name),
            }
        };

        // Method names
        let init_sym = interner.get_or_intern("<init>");
        let clinit_sym = interner.get_or_intern("<clinit>");
        let invoke_exact_sym = interner.get_or_intern("invokeExact");

        // Descriptors
        let void_desc = interner.get_or_intern("()V");
        let string_desc = interner.get_or_intern("Ljava/lang/String;");
        let object_desc = interner.get_or_intern("Ljava/lang/Object;");
        let throwable_desc = interner.get_or_intern("Ljava/lang/Throwable;");
        let char_array_desc = interner.get_or_intern("[C");
        let byte_array_desc = interner.get_or_intern("[B");
        let int_desc = interner.get_or_intern("I");
        let boolean_desc = interner.get_or_intern("Z");

        let primitive_syms =
            PrimitiveType::ALL.map(|primitive| interner.get_or_intern(primitive.name()));

        Self {
            no_arg_constructor_mk: MethodKey {
                name: init_sym,
                desc: void_desc,
            },
            char_array_constructor_mk: MethodKey {
                name: init_sym,
                desc: interner.get_or_intern("([C)V"),
            },
            to_char_array_mk: MethodKey {
                name: interner.get_or_intern("toCharArray"),
                desc: interner.get_or_intern("()[C"),
            },
            vector_add_mk: MethodKey {
                name: interner.get_or_intern("add"),
                desc: interner.get_or_intern("(Ljava/lang/Object;)Z"),
            },
            get_target_mk: MethodKey {
                name: interner.get_or_intern("getTarget"),
                desc: interner.get_or_intern("()Ljava/lang/invoke/MethodHandle;"),
            },
            from_method_descriptor_string_mk: MethodKey {
                name: interner.get_or_intern("fromMethodDescriptorString"),
                desc: interner.get_or_intern(
                    "(Ljava/lang/String;Ljava/lang/ClassLoader;)Ljava/lang/invoke/MethodType;",
                ),
            },
            link_method_handle_constant_mk: MethodKey {
                name: interner.get_or_intern("linkMethodHandleConstant"),
                desc: interner.get_or_intern(
                    "(Ljava/lang/Class;ILjava/lang/Class;Ljava/lang/String;Ljava/lang/Object;)Ljava/lang/invoke/MethodHandle;",
                ),
            },
            link_call_site_indexed_mk: MethodKey {
                name: interner.get_or_intern("linkCallSite"),
                desc: interner.get_or_intern(
                    "(Ljava/lang/Object;ILjava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/invoke/MemberName;",
                ),
            },
            link_call_site_plain_mk: MethodKey {
                name: interner.get_or_intern("linkCallSite"),
                desc: interner.get_or_intern(
                    "(Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/invoke/MemberName;",
                ),
            },

            detail_message_fk: FieldKey {
                name: interner.get_or_intern("detailMessage"),
                desc: string_desc,
            },
            cause_fk: FieldKey {
                name: interner.get_or_intern("cause"),
                desc: throwable_desc,
            },
            priority_fk: FieldKey {
                name: interner.get_or_intern("priority"),
                desc: int_desc,
            },
            daemon_fk: FieldKey {
                name: interner.get_or_intern("daemon"),
                desc: boolean_desc,
            },
            thread_status_fk: FieldKey {
                name: interner.get_or_intern("threadStatus"),
                desc: int_desc,
            },

            value_name_sym: interner.get_or_intern("value"),
            name_name_sym: interner.get_or_intern("name"),
            class_loader_name_sym: interner.get_or_intern("classLoader"),
            protection_domain_name_sym: interner.get_or_intern("protectionDomain"),

            java_lang_object_sym: class_name("java/lang/Object"),
            java_lang_class_sym: class_name("java/lang/Class"),
            java_lang_string_sym: class_name("java/lang/String"),
            java_lang_throwable_sym: class_name("java/lang/Throwable"),
            java_lang_thread_sym: class_name("java/lang/Thread"),
            java_util_vector_sym: class_name("java/util/Vector"),
            method_handle_natives_sym: class_name("java/lang/invoke/MethodHandleNatives"),
            method_type_sym: class_name("java/lang/invoke/MethodType"),
            call_site_sym: class_name("java/lang/invoke/CallSite"),

            init_sym,
            clinit_sym,
            invoke_exact_sym,

            void_desc,
            string_desc,
            object_desc,
            throwable_desc,
            char_array_desc,
            byte_array_desc,

            primitive_syms,

            java_lang_object_id: OnceCell::new(),
            java_lang_class_id: OnceCell::new(),
            java_lang_string_id: OnceCell::new(),
            java_lang_throwable_id: OnceCell::new(),
            java_lang_thread_id: OnceCell::new(),
        }
    }

    pub fn primitive_sym(&self, primitive: PrimitiveType) -> Symbol {
        let index = PrimitiveType::ALL
            .iter()
            .position(|candidate| *candidate == primitive)
            .unwrap();
        self.primitive_syms[index]
    }

    fn set_once(cell: &OnceCell<ClassId>, class_id: ClassId, what: &str) -> Result<(), VmError> {
        cell.set(class_id)
            .map_err(|_| VmError::Panic(format!("{what} class id already set")))
    }

    fn get_once(cell: &OnceCell<ClassId>, what: &str) -> Result<ClassId, VmError> {
        cell.get()
            .copied()
            .ok_or_else(|| VmError::Panic(format!("{what} is not loaded")))
    }

    pub fn set_java_lang_object_id(&self, class_id: ClassId) -> Result<(), VmError> {
        Self::set_once(&self.java_lang_object_id, class_id, "java/lang/Object")
    }

    pub fn java_lang_object_id(&self) -> Result<ClassId, VmError> {
        Self::get_once(&self.java_lang_object_id, "java/lang/Object")
    }

    pub fn set_java_lang_class_id(&self, class_id: ClassId) -> Result<(), VmError> {
        Self::set_once(&self.java_lang_class_id, class_id, "java/lang/Class")
    }

    pub fn java_lang_class_id(&self) -> Result<ClassId, VmError> {
        Self::get_once(&self.java_lang_class_id, "java/lang/Class")
    }

    pub fn set_java_lang_string_id(&self, class_id: ClassId) -> Result<(), VmError> {
        Self::set_once(&self.java_lang_string_id, class_id, "java/lang/String")
    }

    pub fn java_lang_string_id(&self) -> Result<ClassId, VmError> {
        Self::get_once(&self.java_lang_string_id, "java/lang/String")
    }

    pub fn set_java_lang_throwable_id(&self, class_id: ClassId) -> Result<(), VmError> {
        Self::set_once(&self.java_lang_throwable_id, class_id, "java/lang/Throwable")
    }

    pub fn java_lang_throwable_id(&self) -> Result<ClassId, VmError> {
        Self::get_once(&self.java_lang_throwable_id, "java/lang/Throwable")
    }

    pub fn set_java_lang_thread_id(&self, class_id: ClassId) -> Result<(), VmError> {
        Self::set_once(&self.java_lang_thread_id, class_id, "java/lang/Thread")
    }

    pub fn java_lang_thread_id(&self) -> Result<ClassId, VmError> {
        Self::get_once(&self.java_lang_thread_id, "java/lang/Thread")
    }
}
