use crate::error::VmError;
use crate::heap::HeapRef;
use crate::keys::{ClassId, Symbol};
use once_cell::sync::OnceCell;

/// Runtime class of an array type. The element may itself be a primitive,
/// instance or array class; `dimensions` counts the leading `[` brackets of
/// the descriptor name.
pub struct ArrayClass {
    /// Descriptor-shaped internal name, e.g. `[I` or `[[Ljava/lang/String;`.
    pub name: Symbol,
    pub super_id: ClassId,
    pub element: ClassId,
    pub dimensions: u8,
    pub(crate) mirror_ref: OnceCell<HeapRef>,
}

impl ArrayClass {
    pub fn mirror_ref(&self) -> Option<HeapRef> {
        self.mirror_ref.get().copied()
    }

    pub fn set_mirror_ref(&self, mirror: HeapRef) -> Result<(), VmError> {
        self.mirror_ref
            .set(mirror)
            .map_err(|_| VmError::Panic("array class mirror already set".to_string()))
    }
}
