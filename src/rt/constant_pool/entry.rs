//! Runtime constant pool entries. Cross-entry references stay as raw pool
//! indices; the interned symbol for each is resolved on first use and cached
//! in a once-cell.

use crate::keys::{FieldKey, MethodKey, Symbol};
use num_enum::TryFromPrimitive;
use once_cell::sync::OnceCell;

pub struct Utf8Entry {
    pub value: String,
    pub utf8_sym: OnceCell<Symbol>,
}

impl Utf8Entry {
    pub fn new(value: String) -> Self {
        Self {
            value,
            utf8_sym: OnceCell::new(),
        }
    }
}

pub struct ClassEntry {
    pub name_idx: u16,
    pub name_sym: OnceCell<Symbol>,
}

impl ClassEntry {
    pub fn new(name_idx: u16) -> Self {
        Self {
            name_idx,
            name_sym: OnceCell::new(),
        }
    }
}

pub struct StringEntry {
    pub string_idx: u16,
    pub string_sym: OnceCell<Symbol>,
}

impl StringEntry {
    pub fn new(string_idx: u16) -> Self {
        Self {
            string_idx,
            string_sym: OnceCell::new(),
        }
    }
}

pub struct NameAndTypeEntry {
    pub name_idx: u16,
    pub descriptor_idx: u16,
    pub name_sym: OnceCell<Symbol>,
    pub descriptor_sym: OnceCell<Symbol>,
}

impl NameAndTypeEntry {
    pub fn new(name_idx: u16, descriptor_idx: u16) -> Self {
        Self {
            name_idx,
            descriptor_idx,
            name_sym: OnceCell::new(),
            descriptor_sym: OnceCell::new(),
        }
    }
}

/// Field, method and interface-method references share this shape.
pub struct MemberEntry {
    pub class_idx: u16,
    pub nat_idx: u16,
    pub class_sym: OnceCell<Symbol>,
}

impl MemberEntry {
    pub fn new(class_idx: u16, nat_idx: u16) -> Self {
        Self {
            class_idx,
            nat_idx,
            class_sym: OnceCell::new(),
        }
    }
}

pub struct MethodHandleEntry {
    pub kind: MethodHandleKind,
    pub reference_idx: u16,
}

pub struct MethodTypeEntry {
    pub descriptor_idx: u16,
}

pub struct InvokeDynamicEntry {
    pub bootstrap_idx: u16,
    pub nat_idx: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum MethodHandleKind {
    GetField = 1,
    GetStatic = 2,
    PutField = 3,
    PutStatic = 4,
    InvokeVirtual = 5,
    InvokeStatic = 6,
    InvokeSpecial = 7,
    NewInvokeSpecial = 8,
    InvokeInterface = 9,
}

impl MethodHandleKind {
    pub fn is_field_access(self) -> bool {
        matches!(
            self,
            MethodHandleKind::GetField
                | MethodHandleKind::GetStatic
                | MethodHandleKind::PutField
                | MethodHandleKind::PutStatic
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NameAndTypeView {
    pub name_sym: Symbol,
    pub desc_sym: Symbol,
}

impl NameAndTypeView {
    pub fn new(name_sym: Symbol, desc_sym: Symbol) -> Self {
        Self { name_sym, desc_sym }
    }
}

impl From<NameAndTypeView> for FieldKey {
    fn from(view: NameAndTypeView) -> Self {
        FieldKey {
            name: view.name_sym,
            desc: view.desc_sym,
        }
    }
}

impl From<NameAndTypeView> for MethodKey {
    fn from(view: NameAndTypeView) -> Self {
        MethodKey {
            name: view.name_sym,
            desc: view.desc_sym,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MemberView {
    pub class_sym: Symbol,
    pub name_and_type: NameAndTypeView,
}

impl MemberView {
    pub fn new(class_sym: Symbol, name_and_type: NameAndTypeView) -> Self {
        Self {
            class_sym,
            name_and_type,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MethodHandleView {
    pub kind: MethodHandleKind,
    pub member: MemberView,
}

#[derive(Debug, Clone)]
pub struct InvokeDynamicView {
    pub bootstrap: MethodHandleView,
    /// Constant pool indices of the static bootstrap arguments.
    pub bootstrap_args: Vec<u16>,
    pub name_and_type: NameAndTypeView,
}
