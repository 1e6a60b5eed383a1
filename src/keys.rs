use lasso::ThreadedRodeo;
use std::num::NonZeroU32;

/// Interned string handle. Class names, member names and descriptors are all
/// interned once and compared as plain integers afterwards.
pub type Symbol = lasso::Spur;

/// Index into the method area's class table. 1-based so it can live inside a
/// `NonZeroU32` object header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(NonZeroU32);

impl ClassId {
    pub fn new(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    pub fn from_usize(one_based: usize) -> Self {
        Self(NonZeroU32::new(one_based as u32).expect("class id must be non-zero"))
    }

    pub fn to_index(self) -> usize {
        self.0.get() as usize - 1
    }

    pub fn into_inner(self) -> NonZeroU32 {
        self.0
    }
}

/// Index into the method area's method table. 1-based, see [`ClassId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(u32);

impl MethodId {
    pub fn from_usize(one_based: usize) -> Self {
        debug_assert!(one_based > 0);
        Self(one_based as u32)
    }

    pub fn to_index(self) -> usize {
        self.0 as usize - 1
    }
}

/// Identity of a VM thread. One per attached host thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// `(name, descriptor)` pair identifying a field within one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub name: Symbol,
    pub desc: Symbol,
}

/// `(name, descriptor)` pair identifying a method within one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub name: Symbol,
    pub desc: Symbol,
}

impl MethodKey {
    pub fn new_with_str(name: &str, desc: &str, interner: &ThreadedRodeo) -> Self {
        Self {
            name: interner.get_or_intern(name),
            desc: interner.get_or_intern(desc),
        }
    }
}

/// Method key qualified by its declaring class, used by the native registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullyQualifiedMethodKey {
    pub class: Symbol,
    pub name: Symbol,
    pub desc: Symbol,
}

impl FullyQualifiedMethodKey {
    pub fn new(class: Symbol, name: Symbol, desc: Symbol) -> Self {
        Self { class, name, desc }
    }

    pub fn new_with_str(class: &str, name: &str, desc: &str, interner: &ThreadedRodeo) -> Self {
        Self {
            class: interner.get_or_intern(class),
            name: interner.get_or_intern(name),
            desc: interner.get_or_intern(desc),
        }
    }
}
