use crate::error::VmError;
use crate::keys::Symbol;
use crate::node::{BootstrapMethodNode, CpEntry};
use crate::rt::constant_pool::entry::{
    ClassEntry, InvokeDynamicEntry, InvokeDynamicView, MemberEntry, MemberView, MethodHandleEntry,
    MethodHandleKind, MethodHandleView, MethodTypeEntry, NameAndTypeEntry, NameAndTypeView,
    StringEntry, Utf8Entry,
};
use lasso::ThreadedRodeo;

pub mod entry;

pub enum RuntimeConstant {
    Unused,
    Utf8(Utf8Entry),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(ClassEntry),
    String(StringEntry),
    Method(MemberEntry),
    Field(MemberEntry),
    InterfaceMethod(MemberEntry),
    NameAndType(NameAndTypeEntry),
    MethodType(MethodTypeEntry),
    MethodHandle(MethodHandleEntry),
    InvokeDynamic(InvokeDynamicEntry),
}

impl RuntimeConstant {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            RuntimeConstant::Unused => "Unused",
            RuntimeConstant::Utf8(_) => "Utf8",
            RuntimeConstant::Integer(_) => "Integer",
            RuntimeConstant::Float(_) => "Float",
            RuntimeConstant::Long(_) => "Long",
            RuntimeConstant::Double(_) => "Double",
            RuntimeConstant::Class(_) => "Class",
            RuntimeConstant::String(_) => "String",
            RuntimeConstant::Method(_) => "Method",
            RuntimeConstant::Field(_) => "Field",
            RuntimeConstant::InterfaceMethod(_) => "InterfaceMethod",
            RuntimeConstant::NameAndType(_) => "NameAndType",
            RuntimeConstant::MethodType(_) => "MethodType",
            RuntimeConstant::MethodHandle(_) => "MethodHandle",
            RuntimeConstant::InvokeDynamic(_) => "InvokeDynamic",
        }
    }
}

/// The runtime rendition of a class's constant pool, plus its bootstrap
/// method table. The engine trusts pool indices (no verifier); a mismatched
/// entry type is a malformed class and surfaces on the panic channel.
pub struct RuntimeConstantPool {
    entries: Vec<RuntimeConstant>,
    bootstrap_entries: Vec<BootstrapMethodNode>,
}

impl RuntimeConstantPool {
    pub fn new(entries: Vec<CpEntry>, bootstrap_methods: Vec<BootstrapMethodNode>) -> Self {
        let rt_entries = entries
            .into_iter()
            .map(|entry| match entry {
                CpEntry::Unused => RuntimeConstant::Unused,
                CpEntry::Utf8(value) => RuntimeConstant::Utf8(Utf8Entry::new(value)),
                CpEntry::Integer(v) => RuntimeConstant::Integer(v),
                CpEntry::Float(v) => RuntimeConstant::Float(v),
                CpEntry::Long(v) => RuntimeConstant::Long(v),
                CpEntry::Double(v) => RuntimeConstant::Double(v),
                CpEntry::Class(idx) => RuntimeConstant::Class(ClassEntry::new(idx)),
                CpEntry::String(idx) => RuntimeConstant::String(StringEntry::new(idx)),
                CpEntry::MethodRef {
                    class,
                    name_and_type,
                } => RuntimeConstant::Method(MemberEntry::new(class, name_and_type)),
                CpEntry::FieldRef {
                    class,
                    name_and_type,
                } => RuntimeConstant::Field(MemberEntry::new(class, name_and_type)),
                CpEntry::InterfaceMethodRef {
                    class,
                    name_and_type,
                } => RuntimeConstant::InterfaceMethod(MemberEntry::new(class, name_and_type)),
                CpEntry::NameAndType { name, descriptor } => {
                    RuntimeConstant::NameAndType(NameAndTypeEntry::new(name, descriptor))
                }
                CpEntry::MethodType(idx) => RuntimeConstant::MethodType(MethodTypeEntry {
                    descriptor_idx: idx,
                }),
                CpEntry::MethodHandle { kind, reference } => match MethodHandleKind::try_from(kind)
                {
                    Ok(kind) => RuntimeConstant::MethodHandle(MethodHandleEntry {
                        kind,
                        reference_idx: reference,
                    }),
                    Err(_) => RuntimeConstant::Unused,
                },
                CpEntry::InvokeDynamic {
                    bootstrap,
                    name_and_type,
                } => RuntimeConstant::InvokeDynamic(InvokeDynamicEntry {
                    bootstrap_idx: bootstrap,
                    nat_idx: name_and_type,
                }),
            })
            .collect();
        Self {
            entries: rt_entries,
            bootstrap_entries: bootstrap_methods,
        }
    }

    pub fn get_constant(&self, idx: u16) -> Result<&RuntimeConstant, VmError> {
        self.entries.get(idx as usize).ok_or_else(|| {
            VmError::Panic(format!("constant pool index {idx} out of bounds"))
        })
    }

    fn mismatch(&self, idx: u16, expected: &str, actual: &RuntimeConstant) -> VmError {
        VmError::Panic(format!(
            "constant pool index {idx} holds {}, expected {expected}",
            actual.kind_name()
        ))
    }

    fn bootstrap_entry(&self, idx: u16) -> Result<&BootstrapMethodNode, VmError> {
        self.bootstrap_entries.get(idx as usize).ok_or_else(|| {
            VmError::Panic(format!("bootstrap method index {idx} out of bounds"))
        })
    }

    pub fn get_utf8_sym(&self, idx: u16, interner: &ThreadedRodeo) -> Result<Symbol, VmError> {
        match self.get_constant(idx)? {
            RuntimeConstant::Utf8(entry) => Ok(*entry
                .utf8_sym
                .get_or_init(|| interner.get_or_intern(&entry.value))),
            other => Err(self.mismatch(idx, "Utf8", other)),
        }
    }

    pub fn get_class_sym(&self, idx: u16, interner: &ThreadedRodeo) -> Result<Symbol, VmError> {
        match self.get_constant(idx)? {
            RuntimeConstant::Class(entry) => entry
                .name_sym
                .get_or_try_init(|| self.get_utf8_sym(entry.name_idx, interner))
                .copied(),
            other => Err(self.mismatch(idx, "Class", other)),
        }
    }

    pub fn get_string_sym(&self, idx: u16, interner: &ThreadedRodeo) -> Result<Symbol, VmError> {
        match self.get_constant(idx)? {
            RuntimeConstant::String(entry) => entry
                .string_sym
                .get_or_try_init(|| self.get_utf8_sym(entry.string_idx, interner))
                .copied(),
            other => Err(self.mismatch(idx, "String", other)),
        }
    }

    pub fn get_method_type_sym(
        &self,
        idx: u16,
        interner: &ThreadedRodeo,
    ) -> Result<Symbol, VmError> {
        match self.get_constant(idx)? {
            RuntimeConstant::MethodType(entry) => {
                self.get_utf8_sym(entry.descriptor_idx, interner)
            }
            other => Err(self.mismatch(idx, "MethodType", other)),
        }
    }

    pub fn get_nat_view(
        &self,
        idx: u16,
        interner: &ThreadedRodeo,
    ) -> Result<NameAndTypeView, VmError> {
        match self.get_constant(idx)? {
            RuntimeConstant::NameAndType(entry) => {
                let name_sym = *entry
                    .name_sym
                    .get_or_try_init(|| self.get_utf8_sym(entry.name_idx, interner))?;
                let descriptor_sym = *entry
                    .descriptor_sym
                    .get_or_try_init(|| self.get_utf8_sym(entry.descriptor_idx, interner))?;
                Ok(NameAndTypeView::new(name_sym, descriptor_sym))
            }
            other => Err(self.mismatch(idx, "NameAndType", other)),
        }
    }

    fn member_view(
        &self,
        entry: &MemberEntry,
        interner: &ThreadedRodeo,
    ) -> Result<MemberView, VmError> {
        let class_sym = *entry
            .class_sym
            .get_or_try_init(|| self.get_class_sym(entry.class_idx, interner))?;
        let nat_view = self.get_nat_view(entry.nat_idx, interner)?;
        Ok(MemberView::new(class_sym, nat_view))
    }

    pub fn get_field_view(
        &self,
        idx: u16,
        interner: &ThreadedRodeo,
    ) -> Result<MemberView, VmError> {
        match self.get_constant(idx)? {
            RuntimeConstant::Field(entry) => self.member_view(entry, interner),
            other => Err(self.mismatch(idx, "Field", other)),
        }
    }

    pub fn get_method_view(
        &self,
        idx: u16,
        interner: &ThreadedRodeo,
    ) -> Result<MemberView, VmError> {
        match self.get_constant(idx)? {
            RuntimeConstant::Method(entry) => self.member_view(entry, interner),
            other => Err(self.mismatch(idx, "Method", other)),
        }
    }

    pub fn get_interface_method_view(
        &self,
        idx: u16,
        interner: &ThreadedRodeo,
    ) -> Result<MemberView, VmError> {
        match self.get_constant(idx)? {
            RuntimeConstant::InterfaceMethod(entry) => self.member_view(entry, interner),
            other => Err(self.mismatch(idx, "InterfaceMethod", other)),
        }
    }

    /// `invokestatic` accepts plain and interface method references.
    pub fn get_method_or_interface_method_view(
        &self,
        idx: u16,
        interner: &ThreadedRodeo,
    ) -> Result<MemberView, VmError> {
        match self.get_constant(idx)? {
            RuntimeConstant::Method(entry) | RuntimeConstant::InterfaceMethod(entry) => {
                self.member_view(entry, interner)
            }
            other => Err(self.mismatch(idx, "Method", other)),
        }
    }

    pub fn get_method_handle_view(
        &self,
        idx: u16,
        interner: &ThreadedRodeo,
    ) -> Result<MethodHandleView, VmError> {
        match self.get_constant(idx)? {
            RuntimeConstant::MethodHandle(entry) => {
                let member = match self.get_constant(entry.reference_idx)? {
                    RuntimeConstant::Field(member) if entry.kind.is_field_access() => {
                        self.member_view(member, interner)?
                    }
                    RuntimeConstant::Method(member) | RuntimeConstant::InterfaceMethod(member)
                        if !entry.kind.is_field_access() =>
                    {
                        self.member_view(member, interner)?
                    }
                    other => return Err(self.mismatch(entry.reference_idx, "member ref", other)),
                };
                Ok(MethodHandleView {
                    kind: entry.kind,
                    member,
                })
            }
            other => Err(self.mismatch(idx, "MethodHandle", other)),
        }
    }

    pub fn get_invoke_dynamic_view(
        &self,
        idx: u16,
        interner: &ThreadedRodeo,
    ) -> Result<InvokeDynamicView, VmError> {
        match self.get_constant(idx)? {
            RuntimeConstant::InvokeDynamic(entry) => {
                let bootstrap_entry = self.bootstrap_entry(entry.bootstrap_idx)?;
                let bootstrap =
                    self.get_method_handle_view(bootstrap_entry.method_ref, interner)?;
                let nat_view = self.get_nat_view(entry.nat_idx, interner)?;
                Ok(InvokeDynamicView {
                    bootstrap,
                    bootstrap_args: bootstrap_entry.arguments.clone(),
                    name_and_type: nat_view,
                })
            }
            other => Err(self.mismatch(idx, "InvokeDynamic", other)),
        }
    }
}
