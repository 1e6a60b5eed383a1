//! Field layouts. Each instance class carries two of these: the virtual
//! layout (inherited plus declared instance fields) and the static layout
//! (declared statics, addressed relative to the class's static base offset
//! inside its mirror object).

use crate::descriptor::AllocationType;
use crate::keys::{ClassId, FieldKey, Symbol};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct FieldSlot {
    pub key: FieldKey,
    pub ty: AllocationType,
    pub offset: usize,
    pub flags: u16,
    pub declaring_class: ClassId,
    /// Constant pool index of a `ConstantValue` attribute (statics only).
    pub constant_value: Option<u16>,
}

impl FieldSlot {
    pub fn is_volatile(&self) -> bool {
        self.flags & crate::node::ACC_VOLATILE != 0
    }
}

/// Ordered `(name, descriptor) -> byte offset` mapping. Offsets are unique
/// per key and fixed for the lifetime of the owning class.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    slots: Vec<FieldSlot>,
    index: HashMap<FieldKey, usize>,
    size: usize,
}

impl Layout {
    pub fn builder(parent: Option<&Layout>) -> LayoutBuilder {
        LayoutBuilder {
            layout: parent.cloned().unwrap_or_default(),
        }
    }

    pub fn slot(&self, key: &FieldKey) -> Option<&FieldSlot> {
        self.index.get(key).map(|&idx| &self.slots[idx])
    }

    pub fn offset_of(&self, key: &FieldKey) -> Option<usize> {
        self.slot(key).map(|slot| slot.offset)
    }

    /// First slot with the given name, any descriptor. Used to probe fields
    /// whose type varies across class library versions (`String.value`).
    pub fn slot_by_name(&self, name: Symbol) -> Option<&FieldSlot> {
        self.slots.iter().find(|slot| slot.key.name == name)
    }

    pub fn slots(&self) -> &[FieldSlot] {
        &self.slots
    }

    /// Total byte size of the storage this layout describes.
    pub fn size(&self) -> usize {
        self.size
    }
}

pub struct LayoutBuilder {
    layout: Layout,
}

impl LayoutBuilder {
    /// Appends a field, aligning its offset to the field's natural size.
    pub fn push(
        &mut self,
        key: FieldKey,
        ty: AllocationType,
        flags: u16,
        declaring_class: ClassId,
        constant_value: Option<u16>,
    ) {
        let layout = &mut self.layout;
        let size = ty.byte_size();
        layout.size = (layout.size + size - 1) & !(size - 1);

        let slot = FieldSlot {
            key,
            ty,
            offset: layout.size,
            flags,
            declaring_class,
            constant_value,
        };
        layout.size += size;
        layout.index.insert(key, layout.slots.len());
        layout.slots.push(slot);
    }

    pub fn finish(self) -> Layout {
        self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lasso::ThreadedRodeo;

    fn key(interner: &ThreadedRodeo, name: &str, desc: &str) -> FieldKey {
        FieldKey {
            name: interner.get_or_intern(name),
            desc: interner.get_or_intern(desc),
        }
    }

    #[test]
    fn aligns_offsets_to_field_size() {
        let interner = ThreadedRodeo::new();
        let class = ClassId::from_usize(1);
        let mut builder = Layout::builder(None);
        builder.push(key(&interner, "a", "B"), AllocationType::Byte, 0, class, None);
        builder.push(key(&interner, "b", "J"), AllocationType::Long, 0, class, None);
        builder.push(key(&interner, "c", "S"), AllocationType::Short, 0, class, None);
        let layout = builder.finish();

        assert_eq!(layout.offset_of(&key(&interner, "a", "B")), Some(0));
        assert_eq!(layout.offset_of(&key(&interner, "b", "J")), Some(8));
        assert_eq!(layout.offset_of(&key(&interner, "c", "S")), Some(16));
        assert_eq!(layout.size(), 18);
    }

    #[test]
    fn child_layout_extends_parent_offsets() {
        let interner = ThreadedRodeo::new();
        let parent_class = ClassId::from_usize(1);
        let child_class = ClassId::from_usize(2);

        let mut builder = Layout::builder(None);
        builder.push(
            key(&interner, "x", "I"),
            AllocationType::Int,
            0,
            parent_class,
            None,
        );
        let parent = builder.finish();

        let mut builder = Layout::builder(Some(&parent));
        builder.push(
            key(&interner, "y", "I"),
            AllocationType::Int,
            0,
            child_class,
            None,
        );
        let child = builder.finish();

        assert_eq!(child.offset_of(&key(&interner, "x", "I")), Some(0));
        assert_eq!(child.offset_of(&key(&interner, "y", "I")), Some(4));
        assert_eq!(parent.size(), 4);
        assert_eq!(child.size(), 8);
    }
}
