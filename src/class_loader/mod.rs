use crate::heap::HeapRef;
use crate::keys::{ClassId, Symbol};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;
use walkdir::WalkDir;

/// Source of bootstrap class bytes. Supplied by the embedder; the VM never
/// touches the file system directly for class loading.
pub trait BootSource: Send + Sync {
    fn find(&self, name: &str) -> Option<Vec<u8>>;
}

/// Directory-tree boot source. Scans the roots once and indexes every
/// `.class` file by its internal name.
pub struct DirSource {
    index: HashMap<String, PathBuf>,
}

impl DirSource {
    pub fn new(roots: &[PathBuf]) -> Self {
        let mut index = HashMap::new();
        for root in roots {
            for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "class")
                    && let Ok(relative) = path.strip_prefix(root)
                {
                    let name = relative
                        .with_extension("")
                        .to_string_lossy()
                        .replace(std::path::MAIN_SEPARATOR, "/");
                    index.entry(name).or_insert_with(|| path.to_path_buf());
                }
            }
        }
        debug!("indexed {} boot classes", index.len());
        Self { index }
    }
}

impl BootSource for DirSource {
    fn find(&self, name: &str) -> Option<Vec<u8>> {
        let path = self.index.get(name)?;
        std::fs::read(path).ok()
    }
}

/// An empty boot source, for embedders that define every class explicitly.
pub struct EmptySource;

impl BootSource for EmptySource {
    fn find(&self, _name: &str) -> Option<Vec<u8>> {
        None
    }
}

/// Per-loader registry of defined classes: the name map used for lookups and
/// the definition-ordered class list. Mutations happen under the loader's
/// define lock; reads go through the method area's own locking.
pub struct ClassLoaderData {
    by_name: HashMap<Symbol, ClassId>,
    classes: Vec<ClassId>,
}

impl ClassLoaderData {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            classes: Vec::new(),
        }
    }

    pub fn get(&self, name: Symbol) -> Option<ClassId> {
        self.by_name.get(&name).copied()
    }

    pub fn contains(&self, name: Symbol) -> bool {
        self.by_name.contains_key(&name)
    }

    pub fn insert(&mut self, name: Symbol, class_id: ClassId) {
        self.by_name.insert(name, class_id);
        self.classes.push(class_id);
    }

    pub fn classes(&self) -> &[ClassId] {
        &self.classes
    }
}

impl Default for ClassLoaderData {
    fn default() -> Self {
        Self::new()
    }
}

/// One define lock per loader object, created on first use. Serializes
/// defining transactions without blocking unrelated loaders.
pub struct LoaderLocks {
    locks: DashMap<HeapRef, Arc<Mutex<()>>>,
}

impl LoaderLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    pub fn lock_for(&self, loader: HeapRef) -> Arc<Mutex<()>> {
        self.locks
            .entry(loader)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for LoaderLocks {
    fn default() -> Self {
        Self::new()
    }
}
