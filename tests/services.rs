//! Runtime service behavior: string bridging, host/VM array conversions,
//! `ldc` constants, static-field preparation, the initialization state
//! machine under contention and `defineClass`.

mod common;

use common::{ClassBuilder, Fixtures, STATIC_METHOD, be16, boot_vm, boot_vm_with, jdk9_string_class};
use mimir_vm::bytecode::opcodes as op;
use mimir_vm::descriptor::AllocationType;
use mimir_vm::error::{JavaExceptionKind, VmError};
use mimir_vm::heap::{HeapRef, NULL_REF};
use mimir_vm::interpreter::Interpreter;
use mimir_vm::keys::{ClassId, MethodKey};
use mimir_vm::node::ACC_STATIC;
use mimir_vm::thread::VmThread;
use mimir_vm::vm::{Value, VirtualMachine};
use rstest::rstest;
use std::sync::Arc;

fn lookup_class(vm: &VirtualMachine, name: &str) -> ClassId {
    let sym = vm.interner().get_or_intern(name);
    vm.method_area_write()
        .get_class_id_or_load(sym, NULL_REF)
        .expect("class loads")
}

fn call_static(
    vm: &VirtualMachine,
    thread: &mut VmThread,
    class: &str,
    name: &str,
    desc: &str,
    args: &[Value],
) -> Result<Option<Value>, VmError> {
    let class_id = lookup_class(vm, class);
    let key = MethodKey::new_with_str(name, desc, vm.interner());
    let method_id = vm.method_area_read().resolve_static(class_id, &key)?;
    vm.invoke_static(thread, class_id, method_id, &[], args)
}

// ---- strings --------------------------------------------------------------

#[rstest]
#[case("")]
#[case("hello")]
#[case("héllo wörld")]
#[case("emoji \u{1F600} and \u{10348}")]
fn utf8_round_trips(#[case] text: &str) {
    let (vm, mut thread, _) = boot_vm();
    let string_ref = vm.new_utf8(&mut thread, text).unwrap();
    let back = vm.read_utf8(&mut thread, Value::Ref(string_ref)).unwrap();
    assert_eq!(back.as_deref(), Some(text));
}

#[test]
fn read_utf8_of_null_is_none() {
    let (vm, mut thread, _) = boot_vm();
    assert_eq!(vm.read_utf8(&mut thread, Value::Null).unwrap(), None);
}

#[test]
fn read_utf8_rejects_non_string_receivers() {
    let (vm, mut thread, _) = boot_vm();
    let object = vm
        .new_instance(&mut thread, vm.symbols().java_lang_object_id().unwrap())
        .unwrap();
    assert!(vm.read_utf8(&mut thread, Value::Ref(object)).is_err());
}

#[test]
fn empty_string_on_jdk9_shape_gets_byte_array() {
    let (vm, mut thread, _) = boot_vm_with(vec![jdk9_string_class()]);
    let string_ref = vm.new_utf8(&mut thread, "").unwrap();

    let value_offset = {
        let method_area = vm.method_area_read();
        let string_class = method_area
            .get_instance_class(vm.symbols().java_lang_string_id().unwrap())
            .unwrap();
        string_class
            .virtual_layout()
            .slot_by_name(vm.symbols().value_name_sym)
            .unwrap()
            .offset
    };
    let backing = vm
        .heap_read()
        .read_field(string_ref, value_offset, AllocationType::Reference)
        .unwrap();
    let Value::Ref(array) = backing else {
        panic!("value field not written");
    };
    assert_eq!(vm.heap_read().array_kind(array).unwrap(), AllocationType::Byte);
    assert_eq!(vm.heap_read().array_length(array).unwrap(), 0);

    let back = vm.read_utf8(&mut thread, Value::Ref(string_ref)).unwrap();
    assert_eq!(back.as_deref(), Some(""));
}

#[test]
fn utf8_round_trips_on_jdk9_shape() {
    let (vm, mut thread, _) = boot_vm_with(vec![jdk9_string_class()]);
    // Non-empty strings go through <init>([C)V regardless of shape.
    let string_ref = vm.new_utf8(&mut thread, "abc").unwrap();
    let class_id = vm.heap_read().class_id(string_ref);
    assert_eq!(class_id, vm.symbols().java_lang_string_id().unwrap());
}

// ---- array conversions ----------------------------------------------------

#[test]
fn array_conversions_round_trip_every_tag() {
    let (vm, _, _) = boot_vm();

    let bytes = [-1i8, 0, 1, i8::MAX];
    assert_eq!(
        vm.to_java_bytes(vm.to_vm_bytes(&bytes).unwrap()).unwrap(),
        bytes
    );

    let booleans = [true, false, true];
    assert_eq!(
        vm.to_java_booleans(vm.to_vm_booleans(&booleans).unwrap())
            .unwrap(),
        booleans
    );

    let shorts = [i16::MIN, -2, 0, i16::MAX];
    assert_eq!(
        vm.to_java_shorts(vm.to_vm_shorts(&shorts).unwrap()).unwrap(),
        shorts
    );

    let chars = [0u16, 0x41, 0xD83D, 0xDE00, u16::MAX];
    assert_eq!(
        vm.to_java_chars(vm.to_vm_chars(&chars).unwrap()).unwrap(),
        chars
    );

    let ints = [i32::MIN, -1, 0, 7, i32::MAX];
    assert_eq!(vm.to_java_ints(vm.to_vm_ints(&ints).unwrap()).unwrap(), ints);

    let longs = [i64::MIN, 0, i64::MAX];
    assert_eq!(
        vm.to_java_longs(vm.to_vm_longs(&longs).unwrap()).unwrap(),
        longs
    );

    let floats = [0.0f32, -1.5, f32::MAX];
    assert_eq!(
        vm.to_java_floats(vm.to_vm_floats(&floats).unwrap()).unwrap(),
        floats
    );

    let doubles = [0.0f64, 2.5, f64::MIN_POSITIVE];
    assert_eq!(
        vm.to_java_doubles(vm.to_vm_doubles(&doubles).unwrap())
            .unwrap(),
        doubles
    );
}

#[test]
fn reference_array_conversion_preserves_nulls() {
    let (vm, mut thread, _) = boot_vm();
    let object = vm
        .new_instance(&mut thread, vm.symbols().java_lang_object_id().unwrap())
        .unwrap();
    let values = [Value::Ref(object), Value::Null, Value::Ref(object)];
    let array = vm.to_vm_references(&values).unwrap();
    assert_eq!(vm.to_java_references(array).unwrap(), values);
}

#[test]
fn conversion_checks_element_kind() {
    let (vm, _, _) = boot_vm();
    let ints = vm.to_vm_ints(&[1, 2]).unwrap();
    assert!(vm.to_java_longs(ints).is_err());
}

// ---- ldc ------------------------------------------------------------------

#[test]
fn ldc_string_constants_are_interned() {
    let mut builder = ClassBuilder::new("pkg/LdcHost", Some("java/lang/Object"));
    let string_idx = builder.string_const("shared text");
    let (vm, mut thread, _) = boot_vm_with(vec![builder.build()]);
    let host = lookup_class(&vm, "pkg/LdcHost");

    let first = vm.value_from_ldc(&mut thread, host, string_idx).unwrap();
    let second = vm.value_from_ldc(&mut thread, host, string_idx).unwrap();
    assert_eq!(first, second);

    let Value::Ref(string_ref) = first else {
        panic!("expected interned string");
    };
    assert_eq!(
        vm.read_utf8(&mut thread, Value::Ref(string_ref))
            .unwrap()
            .as_deref(),
        Some("shared text")
    );
}

#[test]
fn ldc_of_nested_array_class_resolves_element_chain() {
    let mut builder = ClassBuilder::new("pkg/LdcHost", Some("java/lang/Object"));
    let class_idx = builder.class_ref("[[I");
    let (vm, mut thread, _) = boot_vm_with(vec![builder.build()]);
    let host = lookup_class(&vm, "pkg/LdcHost");

    let mirror_value = vm.value_from_ldc(&mut thread, host, class_idx).unwrap();
    let Value::Ref(mirror) = mirror_value else {
        panic!("expected class mirror");
    };

    let method_area = vm.method_area_read();
    let outer_id = method_area.get_class_id_by_mirror(mirror).unwrap();
    let outer = method_area.get_class(outer_id).as_array().unwrap();
    assert_eq!(outer.dimensions, 2);

    let inner = method_area.get_class(outer.element).as_array().unwrap();
    assert_eq!(inner.dimensions, 1);
    assert!(method_area.get_class(inner.element).is_primitive());
    assert_eq!(method_area.class_name(inner.element), "int");
}

// ---- static fields and initialization -------------------------------------

fn consts_class() -> mimir_vm::node::ClassNode {
    let mut builder = ClassBuilder::new("pkg/Consts", Some("java/lang/Object"));
    let answer_idx = builder.int_const(42);
    let epoch_idx = builder.long_const(1_700_000_000_000);
    let greeting_idx = builder.string_const("hi");
    let answer_ref = builder.field_ref("pkg/Consts", "ANSWER", "I");
    let epoch_ref = builder.field_ref("pkg/Consts", "EPOCH", "J");
    let greeting_ref = builder.field_ref("pkg/Consts", "GREETING", "Ljava/lang/String;");
    builder
        .const_field("ANSWER", "I", answer_idx)
        .const_field("EPOCH", "J", epoch_idx)
        .const_field("GREETING", "Ljava/lang/String;", greeting_idx)
        .method(
            STATIC_METHOD,
            "answer",
            "()I",
            (1, 0),
            [&[op::GETSTATIC][..], &be16(answer_ref), &[op::IRETURN]].concat(),
        )
        .method(
            STATIC_METHOD,
            "epoch",
            "()J",
            (2, 0),
            [&[op::GETSTATIC][..], &be16(epoch_ref), &[op::LRETURN]].concat(),
        )
        .method(
            STATIC_METHOD,
            "greeting",
            "()Ljava/lang/String;",
            (1, 0),
            [&[op::GETSTATIC][..], &be16(greeting_ref), &[op::ARETURN]].concat(),
        )
        .build()
}

#[test]
fn declared_constants_seed_static_fields() {
    let (vm, mut thread, _) = boot_vm_with(vec![consts_class()]);
    assert_eq!(
        call_static(&vm, &mut thread, "pkg/Consts", "answer", "()I", &[]).unwrap(),
        Some(Value::Integer(42))
    );
    assert_eq!(
        call_static(&vm, &mut thread, "pkg/Consts", "epoch", "()J", &[]).unwrap(),
        Some(Value::Long(1_700_000_000_000))
    );
    let greeting = call_static(
        &vm,
        &mut thread,
        "pkg/Consts",
        "greeting",
        "()Ljava/lang/String;",
        &[],
    )
    .unwrap()
    .unwrap();
    assert_eq!(
        vm.read_utf8(&mut thread, greeting).unwrap().as_deref(),
        Some("hi")
    );
}

fn counting_class() -> mimir_vm::node::ClassNode {
    let mut builder = ClassBuilder::new("pkg/Once", Some("java/lang/Object"));
    let count_ref = builder.field_ref("pkg/Once", "count", "I");
    builder
        .field(ACC_STATIC, "count", "I")
        .method(
            ACC_STATIC,
            "<clinit>",
            "()V",
            (2, 0),
            [
                &[op::GETSTATIC][..],
                &be16(count_ref),
                &[op::ICONST_1, op::IADD, op::PUTSTATIC],
                &be16(count_ref),
                &[op::RETURN],
            ]
            .concat(),
        )
        .method(
            STATIC_METHOD,
            "count",
            "()I",
            (1, 0),
            [&[op::GETSTATIC][..], &be16(count_ref), &[op::IRETURN]].concat(),
        )
        .build()
}

#[test]
fn clinit_runs_exactly_once() {
    let (vm, mut thread, _) = boot_vm_with(vec![counting_class()]);
    for _ in 0..3 {
        let count = call_static(&vm, &mut thread, "pkg/Once", "count", "()I", &[]).unwrap();
        assert_eq!(count, Some(Value::Integer(1)));
    }
}

#[test]
fn concurrent_initialization_runs_clinit_once() {
    let (vm, mut thread, _) = boot_vm_with(vec![counting_class()]);
    let class_id = lookup_class(&vm, "pkg/Once");

    let mut workers = Vec::new();
    for _ in 0..8 {
        let vm = Arc::clone(&vm);
        workers.push(std::thread::spawn(move || {
            let mut worker_thread = vm.attach_thread();
            Interpreter::ensure_initialized(&mut worker_thread, Some(class_id), &vm).is_ok()
        }));
    }
    for worker in workers {
        assert!(worker.join().unwrap());
    }

    let count = call_static(&vm, &mut thread, "pkg/Once", "count", "()I", &[]).unwrap();
    assert_eq!(count, Some(Value::Integer(1)));
}

fn exploding_class() -> mimir_vm::node::ClassNode {
    let mut builder = ClassBuilder::new("pkg/Boom", Some("java/lang/Object"));
    let exception_class = builder.class_ref("java/lang/RuntimeException");
    let constructor = builder.method_ref("java/lang/RuntimeException", "<init>", "()V");
    builder
        .method(
            ACC_STATIC,
            "<clinit>",
            "()V",
            (2, 0),
            [
                &[op::NEW][..],
                &be16(exception_class),
                &[op::DUP, op::INVOKESPECIAL],
                &be16(constructor),
                &[op::ATHROW],
            ]
            .concat(),
        )
        .method(STATIC_METHOD, "poke", "()V", (0, 0), vec![op::RETURN])
        .build()
}

fn initializer_error(vm: &VirtualMachine, thread: &mut VmThread, class_id: ClassId) -> HeapRef {
    let error = Interpreter::ensure_initialized(thread, Some(class_id), vm).unwrap_err();
    match error {
        VmError::Java(throwable) => {
            assert_eq!(throwable.kind, JavaExceptionKind::ExceptionInInitializer);
            throwable.cause.expect("wrapped cause")
        }
        other => panic!("expected ExceptionInInitializerError, got {other}"),
    }
}

#[test]
fn failed_clinit_is_wrapped_and_sticky() {
    let (vm, mut thread, _) = boot_vm_with(vec![exploding_class()]);
    let class_id = lookup_class(&vm, "pkg/Boom");

    let first_cause = initializer_error(&vm, &mut thread, class_id);
    assert_eq!(
        vm.method_area_read()
            .class_name_dot(vm.heap_read().class_id(first_cause)),
        "java.lang.RuntimeException"
    );

    // Every later request rethrows the same stored cause.
    let second_cause = initializer_error(&vm, &mut thread, class_id);
    assert_eq!(first_cause, second_cause);

    let mut other_thread = vm.attach_thread();
    let third_cause = initializer_error(&vm, &mut other_thread, class_id);
    assert_eq!(first_cause, third_cause);
}

// ---- defineClass ----------------------------------------------------------

fn defined_class(name: &str) -> mimir_vm::node::ClassNode {
    ClassBuilder::new(name, Some("java/lang/Object"))
        .method(
            STATIC_METHOD,
            "answer",
            "()I",
            (1, 0),
            vec![op::BIPUSH, 41, op::IRETURN],
        )
        .build()
}

fn define(
    vm: &VirtualMachine,
    thread: &mut VmThread,
    fixtures: &Fixtures,
    node_name: &str,
    requested: Option<&str>,
) -> Result<ClassId, VmError> {
    fixtures.add(defined_class(node_name));
    let bytes = fixtures.bytes_of(node_name);
    vm.define_class(
        thread,
        Value::Null,
        requested,
        &bytes,
        0,
        bytes.len() as i32,
        Value::Null,
        "test",
    )
}

#[test]
fn define_class_links_and_executes() {
    let (vm, mut thread, fixtures) = boot_vm();
    let class_id = define(&vm, &mut thread, &fixtures, "pkg/Defined", Some("pkg.Defined")).unwrap();
    let key = MethodKey::new_with_str("answer", "()I", vm.interner());
    let method_id = vm.method_area_read().resolve_static(class_id, &key).unwrap();
    let result = vm
        .invoke_static(&mut thread, class_id, method_id, &[], &[])
        .unwrap();
    assert_eq!(result, Some(Value::Integer(41)));
}

#[test]
fn define_class_rejects_name_mismatch() {
    let (vm, mut thread, fixtures) = boot_vm();
    let error = define(&vm, &mut thread, &fixtures, "other/C", Some("pkg.C")).unwrap_err();
    match error {
        VmError::Java(throwable) => {
            assert_eq!(throwable.kind, JavaExceptionKind::ClassNotFound);
            let message = throwable.message.unwrap();
            assert!(message.contains("pkg.C"), "message: {message}");
            assert!(message.contains("other.C"), "message: {message}");
        }
        other => panic!("expected ClassNotFoundException, got {other}"),
    }
}

#[test]
fn define_class_rejects_duplicates() {
    let (vm, mut thread, fixtures) = boot_vm();
    define(&vm, &mut thread, &fixtures, "pkg/Dup", None).unwrap();
    let error = define(&vm, &mut thread, &fixtures, "pkg/Dup", None).unwrap_err();
    match error {
        VmError::Java(throwable) => {
            assert_eq!(throwable.kind, JavaExceptionKind::ClassNotFound);
        }
        other => panic!("expected ClassNotFoundException, got {other}"),
    }
}

#[rstest]
#[case(-1, 4)]
#[case(0, -2)]
#[case(4, i32::MAX)]
fn define_class_bounds_check(#[case] offset: i32, #[case] length: i32) {
    let (vm, mut thread, fixtures) = boot_vm();
    fixtures.add(defined_class("pkg/Bounds"));
    let bytes = fixtures.bytes_of("pkg/Bounds");
    let error = vm
        .define_class(
            &mut thread,
            Value::Null,
            None,
            &bytes,
            offset,
            length,
            Value::Null,
            "test",
        )
        .unwrap_err();
    match error {
        VmError::Java(throwable) => {
            assert_eq!(throwable.kind, JavaExceptionKind::ArrayIndexOutOfBounds);
        }
        other => panic!("expected ArrayIndexOutOfBoundsException, got {other}"),
    }
}

#[test]
fn defined_mirror_is_labelled() {
    let (vm, mut thread, fixtures) = boot_vm();
    let class_id = define(&vm, &mut thread, &fixtures, "pkg/Labelled", None).unwrap();
    let mirror = vm
        .method_area_write()
        .get_mirror_or_create(class_id, &vm.heap)
        .unwrap();
    assert_eq!(
        vm.method_area_read().get_class_id_by_mirror(mirror).unwrap(),
        class_id
    );
}

// ---- threads and mirrors --------------------------------------------------

#[test]
fn screen_vm_thread_marks_runnable() {
    let (vm, mut thread, _) = boot_vm();
    let thread_class = vm.symbols().java_lang_thread_id().unwrap();
    let thread_oop = vm.new_instance(&mut thread, thread_class).unwrap();
    vm.screen_vm_thread(&mut thread, thread_oop).unwrap();

    let status_offset = {
        let method_area = vm.method_area_read();
        method_area
            .get_instance_class(thread_class)
            .unwrap()
            .virtual_layout()
            .slot(&vm.symbols().thread_status_fk)
            .unwrap()
            .offset
    };
    let status = vm
        .heap_read()
        .read_field(thread_oop, status_offset, AllocationType::Int)
        .unwrap();
    assert_eq!(status, Value::Integer(0x0004));
    assert_eq!(thread.oop(), Some(thread_oop));
}

#[test]
fn static_layout_is_stable() {
    let (vm, mut thread, _) = boot_vm_with(vec![consts_class()]);
    let class_id = lookup_class(&vm, "pkg/Consts");
    call_static(&vm, &mut thread, "pkg/Consts", "answer", "()I", &[]).unwrap();

    let offsets = || {
        let method_area = vm.method_area_read();
        let base = method_area.static_base_offset().unwrap();
        let class = method_area.get_instance_class(class_id).unwrap();
        class
            .static_layout()
            .slots()
            .iter()
            .map(|slot| base + slot.offset)
            .collect::<Vec<_>>()
    };
    let before = offsets();
    call_static(&vm, &mut thread, "pkg/Consts", "epoch", "()J", &[]).unwrap();
    assert_eq!(before, offsets());
    // Offsets are unique per field.
    let mut sorted = before.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), before.len());
}
