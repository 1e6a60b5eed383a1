//! Engine-level behavior: arithmetic, comparisons, branches, switches,
//! exception tables, dispatch, field access and allocation, all driven
//! through hand-assembled bytecode.

mod common;

use common::{ClassBuilder, STATIC_METHOD, be16, be32, boot_vm_with};
use mimir_vm::bytecode::opcodes as op;
use mimir_vm::error::{JavaExceptionKind, VmError};
use mimir_vm::heap::NULL_REF;
use mimir_vm::keys::{ClassId, MethodId, MethodKey};
use mimir_vm::node::{ACC_ABSTRACT, ACC_INTERFACE, ACC_PUBLIC, ExceptionTableEntry};
use mimir_vm::thread::VmThread;
use mimir_vm::vm::{Value, VirtualMachine};
use rstest::rstest;

fn lookup_class(vm: &VirtualMachine, name: &str) -> ClassId {
    let sym = vm.interner().get_or_intern(name);
    vm.method_area_write()
        .get_class_id_or_load(sym, NULL_REF)
        .expect("class loads")
}

fn static_method(vm: &VirtualMachine, class: &str, name: &str, desc: &str) -> (ClassId, MethodId) {
    let class_id = lookup_class(vm, class);
    let key = MethodKey::new_with_str(name, desc, vm.interner());
    let method_id = vm
        .method_area_read()
        .resolve_static(class_id, &key)
        .expect("method resolves");
    (class_id, method_id)
}

fn call_static(
    vm: &VirtualMachine,
    thread: &mut VmThread,
    class: &str,
    name: &str,
    desc: &str,
    args: &[Value],
) -> Result<Option<Value>, VmError> {
    let (class_id, method_id) = static_method(vm, class, name, desc);
    vm.invoke_static(thread, class_id, method_id, &[], args)
}

fn thrown_class(vm: &VirtualMachine, error: &VmError) -> String {
    match error {
        VmError::Thrown(oop) => {
            let class_id = vm.heap_read().class_id(*oop);
            vm.method_area_read().class_name_dot(class_id)
        }
        VmError::Java(throwable) => throwable.kind.class_name_dot(),
        VmError::Panic(message) => panic!("unexpected panic error: {message}"),
    }
}

fn arithmetic_class() -> mimir_vm::node::ClassNode {
    let mut builder = ClassBuilder::new("pkg/Arith", Some("java/lang/Object"));
    let arithmetic = builder.class_ref("java/lang/ArithmeticException");
    builder
        .method(
            STATIC_METHOD,
            "add",
            "(II)I",
            (2, 2),
            vec![op::ILOAD_0, op::ILOAD_1, op::IADD, op::IRETURN],
        )
        .method(
            STATIC_METHOD,
            "div",
            "(II)I",
            (2, 2),
            vec![op::ILOAD_0, op::ILOAD_1, op::IDIV, op::IRETURN],
        )
        .method_with_handlers(
            STATIC_METHOD,
            "safeDiv",
            "(II)I",
            (2, 2),
            vec![
                op::ILOAD_0,
                op::ILOAD_1,
                op::IDIV,
                op::IRETURN,
                // handler: exception ref on the cleared stack
                op::POP,
                op::ICONST_M1,
                op::IRETURN,
            ],
            vec![ExceptionTableEntry {
                start_pc: 0,
                end_pc: 4,
                handler_pc: 4,
                catch_type: arithmetic,
            }],
        )
        .method(
            STATIC_METHOD,
            "lmul",
            "(JJ)J",
            (4, 4),
            vec![op::LLOAD_0, op::LLOAD_2, op::LMUL, op::LRETURN],
        )
        .method(
            STATIC_METHOD,
            "overflow",
            "(I)I",
            (2, 1),
            vec![op::ILOAD_0, op::ICONST_1, op::IADD, op::IRETURN],
        )
        .method(
            STATIC_METHOD,
            "dcl",
            "(DD)I",
            (4, 4),
            vec![op::DLOAD_0, op::DLOAD_2, op::DCMPL, op::IRETURN],
        )
        .method(
            STATIC_METHOD,
            "dcg",
            "(DD)I",
            (4, 4),
            vec![op::DLOAD_0, op::DLOAD_2, op::DCMPG, op::IRETURN],
        )
        .method(
            STATIC_METHOD,
            "f2int",
            "(F)I",
            (1, 1),
            vec![op::FLOAD_0, op::F2I, op::IRETURN],
        )
        .build()
}

fn switch_class() -> mimir_vm::node::ClassNode {
    // tableswitch at pc 1: two pad bytes, default +23, range 1..=2.
    let table = [
        &[op::ILOAD_0, op::TABLESWITCH, 0, 0][..],
        &be32(23),
        &be32(1),
        &be32(2),
        &be32(25),
        &be32(27),
        &[op::ICONST_M1, op::IRETURN, op::ICONST_1, op::IRETURN, op::ICONST_2, op::IRETURN],
    ]
    .concat();

    // lookupswitch at pc 1: two pad bytes, default +19, single pair 7 -> +21.
    let lookup = [
        &[op::ILOAD_0, op::LOOKUPSWITCH, 0, 0][..],
        &be32(19),
        &be32(1),
        &be32(7),
        &be32(21),
        &[op::ICONST_M1, op::IRETURN, op::ICONST_1, op::IRETURN],
    ]
    .concat();

    ClassBuilder::new("pkg/Switches", Some("java/lang/Object"))
        .method(STATIC_METHOD, "table", "(I)I", (1, 1), table)
        .method(STATIC_METHOD, "lookup", "(I)I", (1, 1), lookup)
        .build()
}

fn dispatch_classes() -> Vec<mimir_vm::node::ClassNode> {
    let a = ClassBuilder::new("pkg/A", Some("java/lang/Object"))
        .method(ACC_PUBLIC, "foo", "()I", (1, 1), vec![op::ICONST_1, op::IRETURN])
        .build();
    let b = ClassBuilder::new("pkg/B", Some("pkg/A"))
        .method(ACC_PUBLIC, "foo", "()I", (1, 1), vec![op::ICONST_2, op::IRETURN])
        .build();

    let mut calls = ClassBuilder::new("pkg/Calls", Some("java/lang/Object"));
    let foo_ref = calls.method_ref("pkg/A", "foo", "()I");
    let a_class = calls.class_ref("pkg/A");
    let calls = calls
        .method(
            STATIC_METHOD,
            "callFoo",
            "(Lpkg/A;)I",
            (1, 1),
            [&[op::ALOAD_0, op::INVOKEVIRTUAL][..], &be16(foo_ref), &[op::IRETURN]].concat(),
        )
        .method(
            STATIC_METHOD,
            "castToA",
            "(Ljava/lang/Object;)Lpkg/A;",
            (1, 1),
            [&[op::ALOAD_0, op::CHECKCAST][..], &be16(a_class), &[op::ARETURN]].concat(),
        )
        .method(
            STATIC_METHOD,
            "isA",
            "(Ljava/lang/Object;)I",
            (1, 1),
            [&[op::ALOAD_0, op::INSTANCEOF][..], &be16(a_class), &[op::IRETURN]].concat(),
        )
        .build();

    let greeter = ClassBuilder::new("pkg/Greeter", Some("java/lang/Object"))
        .flags(ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT)
        .method(
            ACC_PUBLIC | ACC_ABSTRACT,
            "greet",
            "()I",
            (0, 0),
            Vec::new(),
        )
        .build();
    let greeter_impl = ClassBuilder::new("pkg/Impl", Some("java/lang/Object"))
        .interface("pkg/Greeter")
        .method(ACC_PUBLIC, "greet", "()I", (1, 1), vec![op::ICONST_5, op::IRETURN])
        .build();

    let mut greet_calls = ClassBuilder::new("pkg/GreetCalls", Some("java/lang/Object"));
    let greet_ref = greet_calls.interface_method_ref("pkg/Greeter", "greet", "()I");
    let greet_calls = greet_calls
        .method(
            STATIC_METHOD,
            "callGreet",
            "(Lpkg/Greeter;)I",
            (1, 1),
            [
                &[op::ALOAD_0, op::INVOKEINTERFACE][..],
                &be16(greet_ref),
                &[1, 0, op::IRETURN],
            ]
            .concat(),
        )
        .build();

    vec![a, b, calls, greeter, greeter_impl, greet_calls]
}

fn point_class() -> mimir_vm::node::ClassNode {
    let mut point = ClassBuilder::new("pkg/Point", Some("java/lang/Object"))
        .field(ACC_PUBLIC, "x", "I")
        .field(ACC_PUBLIC, "y", "J");
    let x_ref = point.field_ref("pkg/Point", "x", "I");
    let y_ref = point.field_ref("pkg/Point", "y", "J");
    point
        .method(
            STATIC_METHOD,
            "setGetX",
            "(Lpkg/Point;I)I",
            (2, 2),
            [
                &[op::ALOAD_0, op::ILOAD_1, op::PUTFIELD][..],
                &be16(x_ref),
                &[op::ALOAD_0, op::GETFIELD],
                &be16(x_ref),
                &[op::IRETURN],
            ]
            .concat(),
        )
        .method(
            STATIC_METHOD,
            "setGetY",
            "(Lpkg/Point;J)J",
            (3, 3),
            [
                &[op::ALOAD_0, op::LLOAD_1, op::PUTFIELD][..],
                &be16(y_ref),
                &[op::ALOAD_0, op::GETFIELD],
                &be16(y_ref),
                &[op::LRETURN],
            ]
            .concat(),
        )
        .build()
}

fn array_class() -> mimir_vm::node::ClassNode {
    let mut builder = ClassBuilder::new("pkg/Arrays", Some("java/lang/Object"));
    let int_grid = builder.class_ref("[[I");
    builder
        .method(
            STATIC_METHOD,
            "fillAndSum",
            "(I)I",
            (3, 2),
            vec![
                // int[] a = new int[n]; a[0] = 7; return a[0] + a.length;
                op::ILOAD_0,
                op::NEWARRAY,
                10, // T_INT
                op::ASTORE_1,
                op::ALOAD_1,
                op::ICONST_0,
                op::BIPUSH,
                7,
                op::IASTORE,
                op::ALOAD_1,
                op::ICONST_0,
                op::IALOAD,
                op::ALOAD_1,
                op::ARRAYLENGTH,
                op::IADD,
                op::IRETURN,
            ],
        )
        .method(
            STATIC_METHOD,
            "oob",
            "(I)I",
            (3, 1),
            vec![
                op::ICONST_1,
                op::NEWARRAY,
                10,
                op::ILOAD_0,
                op::IALOAD,
                op::IRETURN,
            ],
        )
        .method(
            STATIC_METHOD,
            "grid",
            "(II)[[I",
            (2, 2),
            [
                &[op::ILOAD_0, op::ILOAD_1, op::MULTIANEWARRAY][..],
                &be16(int_grid),
                &[2, op::ARETURN],
            ]
            .concat(),
        )
        .build()
}

#[test]
fn static_add_returns_seven() {
    let (vm, mut thread, _) = boot_vm_with(vec![arithmetic_class()]);
    let result = call_static(
        &vm,
        &mut thread,
        "pkg/Arith",
        "add",
        "(II)I",
        &[Value::Integer(3), Value::Integer(4)],
    )
    .unwrap();
    assert_eq!(result, Some(Value::Integer(7)));
}

#[test]
fn integer_arithmetic_wraps() {
    let (vm, mut thread, _) = boot_vm_with(vec![arithmetic_class()]);
    let result = call_static(
        &vm,
        &mut thread,
        "pkg/Arith",
        "overflow",
        "(I)I",
        &[Value::Integer(i32::MAX)],
    )
    .unwrap();
    assert_eq!(result, Some(Value::Integer(i32::MIN)));
}

#[test]
fn long_arguments_occupy_two_slots() {
    let (vm, mut thread, _) = boot_vm_with(vec![arithmetic_class()]);
    let result = call_static(
        &vm,
        &mut thread,
        "pkg/Arith",
        "lmul",
        "(JJ)J",
        &[Value::Long(6), Value::Long(7_000_000_000)],
    )
    .unwrap();
    assert_eq!(result, Some(Value::Long(42_000_000_000)));
}

#[test]
fn division_by_zero_raises_arithmetic_exception() {
    let (vm, mut thread, _) = boot_vm_with(vec![arithmetic_class()]);
    let error = call_static(
        &vm,
        &mut thread,
        "pkg/Arith",
        "div",
        "(II)I",
        &[Value::Integer(1), Value::Integer(0)],
    )
    .unwrap_err();
    assert_eq!(thrown_class(&vm, &error), "java.lang.ArithmeticException");
}

#[test]
fn exception_table_transfers_to_handler() {
    let (vm, mut thread, _) = boot_vm_with(vec![arithmetic_class()]);
    let caught = call_static(
        &vm,
        &mut thread,
        "pkg/Arith",
        "safeDiv",
        "(II)I",
        &[Value::Integer(1), Value::Integer(0)],
    )
    .unwrap();
    assert_eq!(caught, Some(Value::Integer(-1)));

    let fine = call_static(
        &vm,
        &mut thread,
        "pkg/Arith",
        "safeDiv",
        "(II)I",
        &[Value::Integer(12), Value::Integer(3)],
    )
    .unwrap();
    assert_eq!(fine, Some(Value::Integer(4)));
}

#[rstest]
#[case(1.0, 2.0, -1, -1)]
#[case(2.0, 2.0, 0, 0)]
#[case(3.0, 2.0, 1, 1)]
#[case(f64::NAN, 2.0, -1, 1)]
#[case(2.0, f64::NAN, -1, 1)]
fn double_compare_nan_polarity(
    #[case] a: f64,
    #[case] b: f64,
    #[case] expected_l: i32,
    #[case] expected_g: i32,
) {
    let (vm, mut thread, _) = boot_vm_with(vec![arithmetic_class()]);
    let args = [Value::Double(a), Value::Double(b)];
    let low = call_static(&vm, &mut thread, "pkg/Arith", "dcl", "(DD)I", &args).unwrap();
    let high = call_static(&vm, &mut thread, "pkg/Arith", "dcg", "(DD)I", &args).unwrap();
    assert_eq!(low, Some(Value::Integer(expected_l)));
    assert_eq!(high, Some(Value::Integer(expected_g)));
}

#[rstest]
#[case(f32::NAN, 0)]
#[case(1e20, i32::MAX)]
#[case(-1e20, i32::MIN)]
#[case(3.9, 3)]
fn float_to_int_saturates(#[case] input: f32, #[case] expected: i32) {
    let (vm, mut thread, _) = boot_vm_with(vec![arithmetic_class()]);
    let result = call_static(
        &vm,
        &mut thread,
        "pkg/Arith",
        "f2int",
        "(F)I",
        &[Value::Float(input)],
    )
    .unwrap();
    assert_eq!(result, Some(Value::Integer(expected)));
}

#[rstest]
#[case(0, -1)]
#[case(1, 1)]
#[case(2, 2)]
#[case(9, -1)]
fn tableswitch_selects_case(#[case] input: i32, #[case] expected: i32) {
    let (vm, mut thread, _) = boot_vm_with(vec![switch_class()]);
    let result = call_static(
        &vm,
        &mut thread,
        "pkg/Switches",
        "table",
        "(I)I",
        &[Value::Integer(input)],
    )
    .unwrap();
    assert_eq!(result, Some(Value::Integer(expected)));
}

#[rstest]
#[case(7, 1)]
#[case(8, -1)]
fn lookupswitch_matches_pairs(#[case] input: i32, #[case] expected: i32) {
    let (vm, mut thread, _) = boot_vm_with(vec![switch_class()]);
    let result = call_static(
        &vm,
        &mut thread,
        "pkg/Switches",
        "lookup",
        "(I)I",
        &[Value::Integer(input)],
    )
    .unwrap();
    assert_eq!(result, Some(Value::Integer(expected)));
}

#[test]
fn virtual_dispatch_picks_override() {
    let (vm, mut thread, _) = boot_vm_with(dispatch_classes());
    let b_class = lookup_class(&vm, "pkg/B");
    let instance = vm.new_instance(&mut thread, b_class).unwrap();
    let result = call_static(
        &vm,
        &mut thread,
        "pkg/Calls",
        "callFoo",
        "(Lpkg/A;)I",
        &[Value::Ref(instance)],
    )
    .unwrap();
    assert_eq!(result, Some(Value::Integer(2)));
}

#[test]
fn virtual_call_on_null_receiver_raises_npe() {
    let (vm, mut thread, _) = boot_vm_with(dispatch_classes());
    let error = call_static(
        &vm,
        &mut thread,
        "pkg/Calls",
        "callFoo",
        "(Lpkg/A;)I",
        &[Value::Null],
    )
    .unwrap_err();
    assert_eq!(thrown_class(&vm, &error), "java.lang.NullPointerException");
}

#[test]
fn interface_dispatch_reaches_implementation() {
    let (vm, mut thread, _) = boot_vm_with(dispatch_classes());
    let impl_class = lookup_class(&vm, "pkg/Impl");
    let instance = vm.new_instance(&mut thread, impl_class).unwrap();
    let result = call_static(
        &vm,
        &mut thread,
        "pkg/GreetCalls",
        "callGreet",
        "(Lpkg/Greeter;)I",
        &[Value::Ref(instance)],
    )
    .unwrap();
    assert_eq!(result, Some(Value::Integer(5)));

    let direct = vm
        .invoke_interface(&mut thread, "greet", "()I", &[], &[Value::Ref(instance)])
        .unwrap();
    assert_eq!(direct, Some(Value::Integer(5)));
}

#[test]
fn checkcast_and_instanceof_follow_hierarchy() {
    let (vm, mut thread, _) = boot_vm_with(dispatch_classes());
    let b_class = lookup_class(&vm, "pkg/B");
    let object_class = vm.symbols().java_lang_object_id().unwrap();
    let b_instance = vm.new_instance(&mut thread, b_class).unwrap();
    let object_instance = vm.new_instance(&mut thread, object_class).unwrap();

    let cast = call_static(
        &vm,
        &mut thread,
        "pkg/Calls",
        "castToA",
        "(Ljava/lang/Object;)Lpkg/A;",
        &[Value::Ref(b_instance)],
    )
    .unwrap();
    assert_eq!(cast, Some(Value::Ref(b_instance)));

    let error = call_static(
        &vm,
        &mut thread,
        "pkg/Calls",
        "castToA",
        "(Ljava/lang/Object;)Lpkg/A;",
        &[Value::Ref(object_instance)],
    )
    .unwrap_err();
    assert_eq!(thrown_class(&vm, &error), "java.lang.ClassCastException");

    let null_cast = call_static(
        &vm,
        &mut thread,
        "pkg/Calls",
        "castToA",
        "(Ljava/lang/Object;)Lpkg/A;",
        &[Value::Null],
    )
    .unwrap();
    assert_eq!(null_cast, Some(Value::Null));

    let yes = call_static(
        &vm,
        &mut thread,
        "pkg/Calls",
        "isA",
        "(Ljava/lang/Object;)I",
        &[Value::Ref(b_instance)],
    )
    .unwrap();
    assert_eq!(yes, Some(Value::Integer(1)));

    let null_is = call_static(
        &vm,
        &mut thread,
        "pkg/Calls",
        "isA",
        "(Ljava/lang/Object;)I",
        &[Value::Null],
    )
    .unwrap();
    assert_eq!(null_is, Some(Value::Integer(0)));
}

#[test]
fn instance_fields_read_back_after_write() {
    let (vm, mut thread, _) = boot_vm_with(vec![point_class()]);
    let point_class_id = lookup_class(&vm, "pkg/Point");
    let point = vm.new_instance(&mut thread, point_class_id).unwrap();

    let x = call_static(
        &vm,
        &mut thread,
        "pkg/Point",
        "setGetX",
        "(Lpkg/Point;I)I",
        &[Value::Ref(point), Value::Integer(99)],
    )
    .unwrap();
    assert_eq!(x, Some(Value::Integer(99)));

    let y = call_static(
        &vm,
        &mut thread,
        "pkg/Point",
        "setGetY",
        "(Lpkg/Point;J)J",
        &[Value::Ref(point), Value::Long(1 << 40)],
    )
    .unwrap();
    assert_eq!(y, Some(Value::Long(1 << 40)));
}

#[test]
fn primitive_arrays_allocate_store_and_bound_check() {
    let (vm, mut thread, _) = boot_vm_with(vec![array_class()]);
    let result = call_static(
        &vm,
        &mut thread,
        "pkg/Arrays",
        "fillAndSum",
        "(I)I",
        &[Value::Integer(4)],
    )
    .unwrap();
    assert_eq!(result, Some(Value::Integer(11)));

    let error = call_static(
        &vm,
        &mut thread,
        "pkg/Arrays",
        "oob",
        "(I)I",
        &[Value::Integer(5)],
    )
    .unwrap_err();
    assert_eq!(
        thrown_class(&vm, &error),
        "java.lang.ArrayIndexOutOfBoundsException"
    );

    let negative = call_static(
        &vm,
        &mut thread,
        "pkg/Arrays",
        "fillAndSum",
        "(I)I",
        &[Value::Integer(-1)],
    )
    .unwrap_err();
    assert_eq!(
        thrown_class(&vm, &negative),
        "java.lang.NegativeArraySizeException"
    );
}

#[test]
fn multianewarray_builds_nested_arrays() {
    let (vm, mut thread, _) = boot_vm_with(vec![array_class()]);
    let result = call_static(
        &vm,
        &mut thread,
        "pkg/Arrays",
        "grid",
        "(II)[[I",
        &[Value::Integer(3), Value::Integer(2)],
    )
    .unwrap();
    let Some(Value::Ref(outer)) = result else {
        panic!("expected array reference");
    };

    let heap = vm.heap_read();
    assert_eq!(heap.array_length(outer).unwrap(), 3);
    let first = heap.read_array_element(outer, 0).unwrap();
    let Value::Ref(inner) = first else {
        panic!("expected nested array");
    };
    assert_eq!(heap.array_length(inner).unwrap(), 2);
    assert_eq!(
        heap.read_array_element(inner, 1).unwrap(),
        Value::Integer(0)
    );
}

#[test]
fn array_receiver_resolves_object_methods() {
    let (vm, mut thread, _) = boot_vm_with(Vec::new());
    let array = vm.to_vm_ints(&[1, 2, 3]).unwrap();
    let result = vm
        .invoke_virtual(&mut thread, "hashCode", "()I", &[], &[Value::Ref(array)])
        .unwrap();
    assert_eq!(result, Some(Value::Integer(0)));
}

#[test]
fn missing_virtual_method_names_the_receiver() {
    let (vm, mut thread, _) = boot_vm_with(dispatch_classes());
    let b_class = lookup_class(&vm, "pkg/B");
    let instance = vm.new_instance(&mut thread, b_class).unwrap();
    let error = vm
        .invoke_virtual(&mut thread, "missing", "()V", &[], &[Value::Ref(instance)])
        .unwrap_err();
    match &error {
        VmError::Java(throwable) => {
            assert_eq!(throwable.kind, JavaExceptionKind::NoSuchMethod);
            let message = throwable.message.as_deref().unwrap();
            assert!(message.contains("pkg.B.missing()V"), "message: {message}");
        }
        other => panic!("expected NoSuchMethod, got {other}"),
    }
}

#[test]
fn static_resolution_requires_static_bit() {
    let (vm, _, _) = boot_vm_with(dispatch_classes());
    let a_class = lookup_class(&vm, "pkg/A");
    let key = MethodKey::new_with_str("foo", "()I", vm.interner());
    let error = vm
        .method_area_read()
        .resolve_static(a_class, &key)
        .unwrap_err();
    match error {
        VmError::Java(throwable) => {
            assert_eq!(throwable.kind, JavaExceptionKind::IllegalState);
        }
        other => panic!("expected IllegalState, got {other}"),
    }
}
