use crate::descriptor::PrimitiveType;
use crate::error::VmError;
use crate::heap::HeapRef;
use crate::keys::{ClassId, Symbol, ThreadId};
use once_cell::sync::OnceCell;
use std::fmt::Display;
use std::sync::{Arc, Condvar, Mutex};

pub mod array;
pub mod class;
pub mod constant_pool;
pub mod layout;
pub mod method;

pub use array::ArrayClass;
pub use class::InstanceClass;

/// Initialization lifecycle of an instance class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    /// Parsed and linked, `<clinit>` not yet run.
    Loaded,
    /// `<clinit>` in progress on the given thread.
    Initializing(ThreadId),
    Initialized,
    /// `<clinit>` raised; the cause instance is rethrown wrapped in
    /// `ExceptionInInitializerError` on every later request.
    Errored(HeapRef),
}

/// Outcome of a thread asking to initialize a class.
pub enum InitClaim {
    /// The calling thread won the race and must run the initializer.
    Owned,
    AlreadyInitialized,
    /// The calling thread is already the initializer (recursive request).
    Reentrant,
    Errored(HeapRef),
}

/// The per-class initialization state machine. The first thread to claim a
/// `Loaded` class becomes the initializer; other threads block on the condvar
/// until the phase settles, except the initializer itself which re-enters.
pub struct InitState {
    phase: Mutex<InitPhase>,
    changed: Condvar,
}

impl InitState {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(InitPhase::Loaded),
            changed: Condvar::new(),
        }
    }

    pub fn claim(&self, thread: ThreadId) -> InitClaim {
        let mut phase = self.phase.lock().unwrap();
        loop {
            match *phase {
                InitPhase::Initialized => return InitClaim::AlreadyInitialized,
                InitPhase::Errored(cause) => return InitClaim::Errored(cause),
                InitPhase::Initializing(owner) if owner == thread => {
                    return InitClaim::Reentrant;
                }
                InitPhase::Initializing(_) => {
                    phase = self.changed.wait(phase).unwrap();
                }
                InitPhase::Loaded => {
                    *phase = InitPhase::Initializing(thread);
                    return InitClaim::Owned;
                }
            }
        }
    }

    pub fn complete(&self) {
        let mut phase = self.phase.lock().unwrap();
        *phase = InitPhase::Initialized;
        self.changed.notify_all();
    }

    pub fn fail(&self, cause: HeapRef) {
        let mut phase = self.phase.lock().unwrap();
        *phase = InitPhase::Errored(cause);
        self.changed.notify_all();
    }

    pub fn current(&self) -> InitPhase {
        *self.phase.lock().unwrap()
    }
}

impl Default for InitState {
    fn default() -> Self {
        Self::new()
    }
}

/// Attributes shared by all instance classes.
pub struct BaseClass {
    pub name: Symbol,
    pub flags: u16,
    pub super_id: Option<ClassId>,
    /// Defining loader object; the null handle means the bootstrap loader.
    pub loader: HeapRef,
    pub source_file: Option<Symbol>,
    mirror_ref: OnceCell<HeapRef>,
    /// Shared so initialization can block on the state machine without
    /// pinning the method-area lock.
    init: Arc<InitState>,
}

impl BaseClass {
    pub fn new(
        name: Symbol,
        flags: u16,
        super_id: Option<ClassId>,
        loader: HeapRef,
        source_file: Option<Symbol>,
    ) -> Self {
        Self {
            name,
            flags,
            super_id,
            loader,
            source_file,
            mirror_ref: OnceCell::new(),
            init: Arc::new(InitState::new()),
        }
    }

    pub fn mirror_ref(&self) -> Option<HeapRef> {
        self.mirror_ref.get().copied()
    }

    pub fn set_mirror_ref(&self, mirror: HeapRef) -> Result<(), VmError> {
        self.mirror_ref
            .set(mirror)
            .map_err(|_| VmError::Panic("class mirror already set".to_string()))
    }

    pub fn init(&self) -> &InitState {
        &self.init
    }

    pub fn init_handle(&self) -> Arc<InitState> {
        self.init.clone()
    }
}

/// A class as the VM sees it. Interfaces are instance classes with the
/// interface access bit set.
pub enum JvmClass {
    Instance(Box<InstanceClass>),
    Array(ArrayClass),
    Primitive(PrimitiveClass),
}

impl Display for JvmClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JvmClass::Instance(_) => write!(f, "InstanceClass"),
            JvmClass::Array(_) => write!(f, "ArrayClass"),
            JvmClass::Primitive(_) => write!(f, "PrimitiveClass"),
        }
    }
}

impl JvmClass {
    pub fn name(&self) -> Symbol {
        match self {
            JvmClass::Instance(instance) => instance.name(),
            JvmClass::Array(array) => array.name,
            JvmClass::Primitive(primitive) => primitive.name,
        }
    }

    pub fn super_id(&self) -> Option<ClassId> {
        match self {
            JvmClass::Instance(instance) => instance.super_id(),
            JvmClass::Array(array) => Some(array.super_id),
            JvmClass::Primitive(_) => None,
        }
    }

    pub fn mirror_ref(&self) -> Option<HeapRef> {
        match self {
            JvmClass::Instance(instance) => instance.base().mirror_ref(),
            JvmClass::Array(array) => array.mirror_ref(),
            JvmClass::Primitive(primitive) => primitive.mirror_ref(),
        }
    }

    pub fn set_mirror_ref(&self, mirror: HeapRef) -> Result<(), VmError> {
        match self {
            JvmClass::Instance(instance) => instance.base().set_mirror_ref(mirror),
            JvmClass::Array(array) => array.set_mirror_ref(mirror),
            JvmClass::Primitive(primitive) => primitive.set_mirror_ref(mirror),
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, JvmClass::Primitive(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, JvmClass::Array(_))
    }

    pub fn as_instance(&self) -> Result<&InstanceClass, VmError> {
        match self {
            JvmClass::Instance(instance) => Ok(instance),
            other => Err(VmError::Panic(format!("{other} is not an instance class"))),
        }
    }

    pub fn as_array(&self) -> Result<&ArrayClass, VmError> {
        match self {
            JvmClass::Array(array) => Ok(array),
            other => Err(VmError::Panic(format!("{other} is not an array class"))),
        }
    }
}

/// Mirror anchor for one of the eight primitive types. Array-component
/// anchors and `ldc` type results.
pub struct PrimitiveClass {
    pub name: Symbol,
    pub primitive_type: PrimitiveType,
    pub(crate) mirror_ref: OnceCell<HeapRef>,
}

impl PrimitiveClass {
    pub fn new(name: Symbol, primitive_type: PrimitiveType) -> Self {
        Self {
            name,
            primitive_type,
            mirror_ref: OnceCell::new(),
        }
    }

    pub fn mirror_ref(&self) -> Option<HeapRef> {
        self.mirror_ref.get().copied()
    }

    pub fn set_mirror_ref(&self, mirror: HeapRef) -> Result<(), VmError> {
        self.mirror_ref
            .set(mirror)
            .map_err(|_| VmError::Panic("primitive class mirror already set".to_string()))
    }
}
