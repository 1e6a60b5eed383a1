use crate::class_loader::{BootSource, LoaderLocks};
use crate::descriptor::{AllocationType, PrimitiveType};
use crate::error::VmError;
use crate::filesystem::FileManager;
use crate::heap::method_area::MethodArea;
use crate::heap::{Heap, HeapRef};
use crate::interpreter::dispatch::DispatchTable;
use crate::keys::{ClassId, MethodId, Symbol, ThreadId};
use crate::native::NativeRegistry;
use crate::node::ClassParser;
use crate::sync::MonitorRegistry;
use crate::thread::VmThread;
use crate::throw_exception;
use crate::vm::linker::CallSiteCache;
use crate::vm::symbols::Symbols;
use dashmap::DashMap;
use lasso::ThreadedRodeo;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod linker;
pub mod ops;
pub mod stack;
pub mod symbols;

/// One operand-stack, local-table or field value. `char`/`short`/`byte`/
/// `boolean` ride as `Integer` and narrow only when written through a typed
/// field or array accessor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Ref(HeapRef),
    Null,
    /// Initial content of a local slot, including the second slot of a wide
    /// value. Never a valid operand.
    Uninitialized,
}

impl Value {
    /// Wide values occupy two stack/local slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Result<i32, VmError> {
        match self {
            Value::Integer(v) => Ok(*v),
            other => throw_exception!(IllegalState, "expected int value, found {other:?}"),
        }
    }

    pub fn as_long(&self) -> Result<i64, VmError> {
        match self {
            Value::Long(v) => Ok(*v),
            other => throw_exception!(IllegalState, "expected long value, found {other:?}"),
        }
    }

    pub fn as_float(&self) -> Result<f32, VmError> {
        match self {
            Value::Float(v) => Ok(*v),
            other => throw_exception!(IllegalState, "expected float value, found {other:?}"),
        }
    }

    pub fn as_double(&self) -> Result<f64, VmError> {
        match self {
            Value::Double(v) => Ok(*v),
            other => throw_exception!(IllegalState, "expected double value, found {other:?}"),
        }
    }

    pub fn as_boolean(&self) -> Result<bool, VmError> {
        Ok(self.as_int()? != 0)
    }

    /// Non-null reference; null raises `NullPointerException`.
    pub fn as_obj_ref(&self) -> Result<HeapRef, VmError> {
        match self {
            Value::Ref(addr) => Ok(*addr),
            Value::Null => throw_exception!(NullPointer),
            other => throw_exception!(IllegalState, "expected reference value, found {other:?}"),
        }
    }

    pub fn as_nullable_obj_ref(&self) -> Result<Option<HeapRef>, VmError> {
        match self {
            Value::Ref(addr) => Ok(Some(*addr)),
            Value::Null => Ok(None),
            other => throw_exception!(IllegalState, "expected reference value, found {other:?}"),
        }
    }

    /// The zero element for a field descriptor; non-primitive descriptors
    /// default to the null reference.
    pub fn default_for_descriptor(desc: &str) -> Value {
        match desc.chars().next().and_then(PrimitiveType::from_tag) {
            Some(PrimitiveType::Long) => Value::Long(0),
            Some(PrimitiveType::Float) => Value::Float(0.0),
            Some(PrimitiveType::Double) => Value::Double(0.0),
            Some(_) => Value::Integer(0),
            None => Value::Null,
        }
    }
}

/// Host-supplied configuration: boot class source, parser, file-system
/// bridge and the symbol overrides applied to well-known class names.
pub struct VmConfig {
    pub boot_source: Box<dyn BootSource>,
    pub parser: Box<dyn ClassParser>,
    pub file_manager: Option<Arc<dyn FileManager>>,
    pub heap_size_mb: usize,
    pub frame_stack_depth: usize,
    pub symbol_overrides: HashMap<String, String>,
}

impl VmConfig {
    pub fn new(boot_source: Box<dyn BootSource>, parser: Box<dyn ClassParser>) -> Self {
        Self {
            boot_source,
            parser,
            file_manager: None,
            heap_size_mb: 64,
            frame_stack_depth: 1024,
            symbol_overrides: HashMap::new(),
        }
    }
}

/// A resolved field-access site, cached per instruction.
#[derive(Debug, Clone, Copy)]
pub struct FieldSite {
    pub holder: ClassId,
    pub offset: usize,
    pub ty: AllocationType,
    pub volatile: bool,
    pub is_static: bool,
}

pub struct VirtualMachine {
    pub heap: RwLock<Heap>,
    method_area: RwLock<MethodArea>,
    interner: Arc<ThreadedRodeo>,
    symbols: Arc<Symbols>,
    pub native_registry: NativeRegistry,
    monitors: MonitorRegistry,
    dispatch: DispatchTable,
    /// Interned VM strings, keyed by their host-side symbol.
    pub(crate) string_pool: Mutex<HashMap<Symbol, HeapRef>>,
    /// Memoized invokedynamic linkage, one entry per instruction site.
    pub(crate) call_sites: CallSiteCache,
    /// Resolved field-access sites, keyed by (method, pc).
    pub(crate) field_sites: DashMap<(MethodId, usize), FieldSite>,
    pub(crate) loader_locks: LoaderLocks,
    file_manager: Option<Arc<dyn FileManager>>,
    frame_stack_depth: usize,
    next_thread_id: AtomicU64,
}

impl VirtualMachine {
    /// Boots a VM: interns the symbol table, maps the heap and preloads the
    /// bootstrap classes from the configured source.
    pub fn new(config: VmConfig) -> Result<Self, VmError> {
        let interner = Arc::new(ThreadedRodeo::new());
        let symbols = Arc::new(Symbols::new(&interner, &config.symbol_overrides));
        let heap = RwLock::new(Heap::new(config.heap_size_mb)?);
        let method_area = MethodArea::init(
            config.boot_source,
            config.parser,
            interner.clone(),
            symbols.clone(),
        )?;

        let vm = Self {
            heap,
            method_area: RwLock::new(method_area),
            native_registry: NativeRegistry::new(interner.clone()),
            interner,
            symbols,
            monitors: MonitorRegistry::new(),
            dispatch: DispatchTable::new(),
            string_pool: Mutex::new(HashMap::new()),
            call_sites: CallSiteCache::new(),
            field_sites: DashMap::new(),
            loader_locks: LoaderLocks::new(),
            file_manager: config.file_manager,
            frame_stack_depth: config.frame_stack_depth,
            next_thread_id: AtomicU64::new(1),
        };

        // Mirrors for the preloaded classes exist from the start so `ldc` of
        // a class constant never has to race mirror creation.
        {
            let mut method_area = vm.method_area.write().unwrap();
            for class_id in [
                vm.symbols.java_lang_object_id()?,
                vm.symbols.java_lang_class_id()?,
                vm.symbols.java_lang_string_id()?,
                vm.symbols.java_lang_throwable_id()?,
                vm.symbols.java_lang_thread_id()?,
            ] {
                method_area.get_mirror_or_create(class_id, &vm.heap)?;
            }
        }

        Ok(vm)
    }

    pub fn heap_read(&self) -> RwLockReadGuard<'_, Heap> {
        self.heap.read().unwrap()
    }

    pub fn heap_write(&self) -> RwLockWriteGuard<'_, Heap> {
        self.heap.write().unwrap()
    }

    pub fn method_area_read(&self) -> RwLockReadGuard<'_, MethodArea> {
        self.method_area.read().unwrap()
    }

    pub fn method_area_write(&self) -> RwLockWriteGuard<'_, MethodArea> {
        self.method_area.write().unwrap()
    }

    pub fn interner(&self) -> &ThreadedRodeo {
        &self.interner
    }

    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    pub fn monitors(&self) -> &MonitorRegistry {
        &self.monitors
    }

    pub(crate) fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn file_manager(&self) -> Option<&Arc<dyn FileManager>> {
        self.file_manager.as_ref()
    }

    /// Binds a host thread to the VM. The returned state owns the thread's
    /// frame stack and must stay on that thread.
    pub fn attach_thread(&self) -> VmThread {
        let id = ThreadId::from_u64(self.next_thread_id.fetch_add(1, Ordering::Relaxed));
        VmThread::new(id, self.frame_stack_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_widths() {
        assert!(Value::Long(1).is_wide());
        assert!(Value::Double(1.0).is_wide());
        assert!(!Value::Integer(1).is_wide());
        assert!(!Value::Null.is_wide());
    }

    #[test]
    fn incompatible_cast_is_illegal_state() {
        let err = Value::Integer(3).as_long().unwrap_err();
        match err {
            VmError::Java(throwable) => assert_eq!(
                throwable.kind,
                crate::error::JavaExceptionKind::IllegalState
            ),
            other => panic!("expected Java error, got {other}"),
        }
    }

    #[test]
    fn default_values_by_descriptor() {
        assert_eq!(Value::default_for_descriptor("I"), Value::Integer(0));
        assert_eq!(Value::default_for_descriptor("Z"), Value::Integer(0));
        assert_eq!(Value::default_for_descriptor("J"), Value::Long(0));
        assert_eq!(Value::default_for_descriptor("D"), Value::Double(0.0));
        assert_eq!(
            Value::default_for_descriptor("Ljava/lang/String;"),
            Value::Null
        );
        assert_eq!(Value::default_for_descriptor("[I"), Value::Null);
    }
}
