//! Native method registry. The VM ships no native implementations of its
//! own; embedders register hooks for the `java.*` natives their workload
//! touches, and an unresolved native call raises `UnsatisfiedLinkError`.

use crate::error::VmError;
use crate::keys::FullyQualifiedMethodKey;
use crate::thread::VmThread;
use crate::vm::{Value, VirtualMachine};
use lasso::ThreadedRodeo;
use std::collections::HashMap;
use std::sync::Arc;

/// A registered native hook. Arguments arrive receiver-first for instance
/// methods; a `Some` result is pushed onto the caller's operand stack.
pub type NativeMethod =
    fn(&VirtualMachine, &mut VmThread, &[Value]) -> Result<Option<Value>, VmError>;

pub struct NativeRegistry {
    methods: HashMap<FullyQualifiedMethodKey, NativeMethod>,
    pub string_interner: Arc<ThreadedRodeo>,
}

impl NativeRegistry {
    pub fn new(string_interner: Arc<ThreadedRodeo>) -> Self {
        Self {
            methods: HashMap::new(),
            string_interner,
        }
    }

    pub fn register(&mut self, key: FullyQualifiedMethodKey, method: NativeMethod) {
        self.methods.insert(key, method);
    }

    pub fn register_str(&mut self, class: &str, name: &str, desc: &str, method: NativeMethod) {
        let key =
            FullyQualifiedMethodKey::new_with_str(class, name, desc, &self.string_interner);
        self.methods.insert(key, method);
    }

    pub fn get(&self, key: &FullyQualifiedMethodKey) -> Option<NativeMethod> {
        self.methods.get(key).copied()
    }
}
