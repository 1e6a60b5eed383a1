//! Test fixtures: an in-memory boot source and parser pair backed by
//! hand-assembled class nodes, plus a miniature class library covering the
//! shapes the runtime probes (Object, Class, String, the throwable chain,
//! Thread).

use mimir_vm::error::VmError;
use mimir_vm::node::{
    ACC_PUBLIC, ACC_STATIC, ACC_SUPER, ClassNode, ClassParser, CpEntry, ExceptionTableEntry,
    FieldNode, MethodNode,
};
use mimir_vm::bytecode::opcodes as op;
use mimir_vm::class_loader::BootSource;
use mimir_vm::vm::{VirtualMachine, VmConfig};
use mimir_vm::thread::VmThread;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Boot source and parser in one: `find` hands out the class's name as its
/// "bytes", `parse` resolves those bytes back to the registered node.
#[derive(Clone, Default)]
pub struct Fixtures {
    nodes: Arc<Mutex<HashMap<String, ClassNode>>>,
}

impl Fixtures {
    pub fn new() -> Self {
        let fixtures = Self::default();
        for node in base_classes() {
            fixtures.add(node);
        }
        fixtures
    }

    pub fn add(&self, node: ClassNode) {
        self.nodes
            .lock()
            .unwrap()
            .insert(node.name.clone(), node);
    }

    /// "Class file bytes" for a registered node, for define_class tests.
    pub fn bytes_of(&self, name: &str) -> Vec<u8> {
        name.as_bytes().to_vec()
    }

    pub fn config(&self) -> VmConfig {
        VmConfig::new(Box::new(self.clone()), Box::new(self.clone()))
    }
}

impl BootSource for Fixtures {
    fn find(&self, name: &str) -> Option<Vec<u8>> {
        self.nodes
            .lock()
            .unwrap()
            .contains_key(name)
            .then(|| name.as_bytes().to_vec())
    }
}

impl ClassParser for Fixtures {
    fn parse(&self, bytes: &[u8]) -> Result<ClassNode, VmError> {
        let name = std::str::from_utf8(bytes)
            .map_err(|_| VmError::Panic("fixture bytes are not a name".to_string()))?;
        self.nodes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::Panic(format!("no fixture class {name}")))
    }
}

pub fn boot_vm() -> (Arc<VirtualMachine>, VmThread, Fixtures) {
    let fixtures = Fixtures::new();
    let vm = Arc::new(VirtualMachine::new(fixtures.config()).expect("vm boot"));
    let thread = vm.attach_thread();
    (vm, thread, fixtures)
}

pub fn boot_vm_with(extra: Vec<ClassNode>) -> (Arc<VirtualMachine>, VmThread, Fixtures) {
    let fixtures = Fixtures::new();
    for node in extra {
        fixtures.add(node);
    }
    let vm = Arc::new(VirtualMachine::new(fixtures.config()).expect("vm boot"));
    let thread = vm.attach_thread();
    (vm, thread, fixtures)
}

/// Hand-assembled class node. Constant pool entries are interned on demand;
/// longs and doubles take their class-file double slot.
pub struct ClassBuilder {
    node: ClassNode,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut node = ClassNode {
            major_version: 52,
            access_flags: ACC_PUBLIC | ACC_SUPER,
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            ..ClassNode::default()
        };
        node.constant_pool.push(CpEntry::Unused);
        Self { node }
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.node.access_flags = flags;
        self
    }

    pub fn interface(mut self, name: &str) -> Self {
        self.node.interfaces.push(name.to_string());
        self
    }

    fn push_cp(&mut self, entry: CpEntry) -> u16 {
        if let Some(existing) = self
            .node
            .constant_pool
            .iter()
            .position(|candidate| *candidate == entry)
        {
            return existing as u16;
        }
        self.node.constant_pool.push(entry);
        (self.node.constant_pool.len() - 1) as u16
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        self.push_cp(CpEntry::Utf8(value.to_string()))
    }

    pub fn class_ref(&mut self, name: &str) -> u16 {
        let name_idx = self.utf8(name);
        self.push_cp(CpEntry::Class(name_idx))
    }

    pub fn string_const(&mut self, value: &str) -> u16 {
        let value_idx = self.utf8(value);
        self.push_cp(CpEntry::String(value_idx))
    }

    pub fn int_const(&mut self, value: i32) -> u16 {
        self.push_cp(CpEntry::Integer(value))
    }

    pub fn long_const(&mut self, value: i64) -> u16 {
        let idx = self.push_cp(CpEntry::Long(value));
        self.node.constant_pool.push(CpEntry::Unused);
        idx
    }

    pub fn nat(&mut self, name: &str, desc: &str) -> u16 {
        let name_idx = self.utf8(name);
        let desc_idx = self.utf8(desc);
        self.push_cp(CpEntry::NameAndType {
            name: name_idx,
            descriptor: desc_idx,
        })
    }

    pub fn field_ref(&mut self, class: &str, name: &str, desc: &str) -> u16 {
        let class_idx = self.class_ref(class);
        let nat_idx = self.nat(name, desc);
        self.push_cp(CpEntry::FieldRef {
            class: class_idx,
            name_and_type: nat_idx,
        })
    }

    pub fn method_ref(&mut self, class: &str, name: &str, desc: &str) -> u16 {
        let class_idx = self.class_ref(class);
        let nat_idx = self.nat(name, desc);
        self.push_cp(CpEntry::MethodRef {
            class: class_idx,
            name_and_type: nat_idx,
        })
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, desc: &str) -> u16 {
        let class_idx = self.class_ref(class);
        let nat_idx = self.nat(name, desc);
        self.push_cp(CpEntry::InterfaceMethodRef {
            class: class_idx,
            name_and_type: nat_idx,
        })
    }

    pub fn field(mut self, flags: u16, name: &str, desc: &str) -> Self {
        self.node.fields.push(FieldNode {
            access_flags: flags,
            name: name.to_string(),
            descriptor: desc.to_string(),
            constant_value: None,
        });
        self
    }

    pub fn const_field(mut self, name: &str, desc: &str, constant_idx: u16) -> Self {
        self.node.fields.push(FieldNode {
            access_flags: ACC_PUBLIC | ACC_STATIC,
            name: name.to_string(),
            descriptor: desc.to_string(),
            constant_value: Some(constant_idx),
        });
        self
    }

    pub fn method(self, flags: u16, name: &str, desc: &str, max: (u16, u16), code: Vec<u8>) -> Self {
        self.method_with_handlers(flags, name, desc, max, code, Vec::new())
    }

    pub fn method_with_handlers(
        mut self,
        flags: u16,
        name: &str,
        desc: &str,
        (max_stack, max_locals): (u16, u16),
        code: Vec<u8>,
        exception_table: Vec<ExceptionTableEntry>,
    ) -> Self {
        self.node.methods.push(MethodNode {
            access_flags: flags,
            name: name.to_string(),
            descriptor: desc.to_string(),
            max_stack,
            max_locals,
            code,
            exception_table,
        });
        self
    }

    pub fn build(self) -> ClassNode {
        self.node
    }
}

pub fn be16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

pub fn be32(value: i32) -> [u8; 4] {
    value.to_be_bytes()
}

/// `public static` flags shorthand.
pub const STATIC_METHOD: u16 = ACC_PUBLIC | ACC_STATIC;

fn throwable_subclass(name: &str, super_name: &str) -> ClassNode {
    ClassBuilder::new(name, Some(super_name))
        .method(ACC_PUBLIC, "<init>", "()V", (0, 1), vec![op::RETURN])
        .build()
}

/// The miniature class library every test VM boots against.
pub fn base_classes() -> Vec<ClassNode> {
    let mut classes = Vec::new();

    classes.push(
        ClassBuilder::new("java/lang/Object", None)
            .method(ACC_PUBLIC, "<init>", "()V", (0, 1), vec![op::RETURN])
            .method(
                ACC_PUBLIC,
                "hashCode",
                "()I",
                (1, 1),
                vec![op::ICONST_0, op::IRETURN],
            )
            .build(),
    );

    classes.push(
        ClassBuilder::new("java/lang/Class", Some("java/lang/Object"))
            .field(ACC_PUBLIC, "name", "Ljava/lang/String;")
            .field(ACC_PUBLIC, "classLoader", "Ljava/lang/ClassLoader;")
            .field(ACC_PUBLIC, "protectionDomain", "Ljava/lang/Object;")
            .build(),
    );

    // JDK 8 string shape: char[] backing store.
    let mut string = ClassBuilder::new("java/lang/String", Some("java/lang/Object"))
        .field(ACC_PUBLIC, "value", "[C");
    let value_ref = string.field_ref("java/lang/String", "value", "[C");
    let string = string
        .method(
            ACC_PUBLIC,
            "<init>",
            "([C)V",
            (2, 2),
            [
                &[op::ALOAD_0, op::ALOAD_1, op::PUTFIELD][..],
                &be16(value_ref),
                &[op::RETURN],
            ]
            .concat(),
        )
        .method(
            ACC_PUBLIC,
            "toCharArray",
            "()[C",
            (1, 1),
            [&[op::ALOAD_0, op::GETFIELD][..], &be16(value_ref), &[op::ARETURN]].concat(),
        );
    classes.push(string.build());

    classes.push(
        ClassBuilder::new("java/lang/Throwable", Some("java/lang/Object"))
            .field(ACC_PUBLIC, "detailMessage", "Ljava/lang/String;")
            .field(ACC_PUBLIC, "cause", "Ljava/lang/Throwable;")
            .method(ACC_PUBLIC, "<init>", "()V", (0, 1), vec![op::RETURN])
            .build(),
    );

    classes.push(
        ClassBuilder::new("java/lang/Thread", Some("java/lang/Object"))
            .field(ACC_PUBLIC, "name", "Ljava/lang/String;")
            .field(ACC_PUBLIC, "priority", "I")
            .field(ACC_PUBLIC, "daemon", "Z")
            .field(ACC_PUBLIC, "threadStatus", "I")
            .method(ACC_PUBLIC, "<init>", "()V", (0, 1), vec![op::RETURN])
            .build(),
    );

    classes.push(throwable_subclass("java/lang/Exception", "java/lang/Throwable"));
    classes.push(throwable_subclass("java/lang/Error", "java/lang/Throwable"));
    classes.push(throwable_subclass(
        "java/lang/RuntimeException",
        "java/lang/Exception",
    ));
    for name in [
        "java/lang/ArithmeticException",
        "java/lang/NullPointerException",
        "java/lang/ArrayIndexOutOfBoundsException",
        "java/lang/NegativeArraySizeException",
        "java/lang/ClassCastException",
        "java/lang/IllegalArgumentException",
        "java/lang/IllegalStateException",
        "java/lang/IllegalMonitorStateException",
    ] {
        classes.push(throwable_subclass(name, "java/lang/RuntimeException"));
    }
    classes.push(throwable_subclass(
        "java/lang/ClassNotFoundException",
        "java/lang/Exception",
    ));
    classes.push(throwable_subclass(
        "java/lang/InterruptedException",
        "java/lang/Exception",
    ));
    for name in [
        "java/lang/NoClassDefFoundError",
        "java/lang/NoSuchMethodError",
        "java/lang/NoSuchFieldError",
        "java/lang/AbstractMethodError",
        "java/lang/UnsatisfiedLinkError",
        "java/lang/BootstrapMethodError",
        "java/lang/ExceptionInInitializerError",
        "java/lang/OutOfMemoryError",
        "java/lang/StackOverflowError",
    ] {
        classes.push(throwable_subclass(name, "java/lang/Error"));
    }

    classes
}

/// JDK 9+ string shape: byte[] backing store plus coder. `toCharArray`
/// returns a fresh empty char array, enough for the empty-string probes.
pub fn jdk9_string_class() -> ClassNode {
    let mut string = ClassBuilder::new("java/lang/String", Some("java/lang/Object"))
        .field(ACC_PUBLIC, "value", "[B")
        .field(ACC_PUBLIC, "coder", "B");
    let value_ref = string.field_ref("java/lang/String", "value", "[B");
    string
        .method(
            ACC_PUBLIC,
            "<init>",
            "([C)V",
            (2, 2),
            [
                &[op::ALOAD_0, op::ALOAD_1, op::PUTFIELD][..],
                &be16(value_ref),
                &[op::RETURN],
            ]
            .concat(),
        )
        .method(
            ACC_PUBLIC,
            "toCharArray",
            "()[C",
            (1, 1),
            vec![op::ICONST_0, op::NEWARRAY, 5, op::ARETURN],
        )
        .build()
}
