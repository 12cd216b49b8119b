//! Integration tests for invocations and boxed message sends

use interpose_engine::{
    BoxedValue, HookError, Interceptor, Interposer, Invocation, MethodSignature, Number, Slot,
};
use interpose_runtime::{Imp, MethodId, ObjectRef, Runtime, RuntimeError, Value};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// `add:to:` returning the sum of two `q` arguments
fn adder(runtime: &Runtime, name: &str) -> (ObjectRef, MethodId) {
    let ty = runtime.define_type(name, None).unwrap();
    let m = MethodId::intern("add:to:");
    ty.add_method(
        m,
        Imp::new(|_, _, args| {
            let a = args[0].as_i64().unwrap_or_default();
            let b = args[1].as_i64().unwrap_or_default();
            Ok(Value::I64(a + b))
        }),
        "q32@0:8q16q24",
    )
    .unwrap();
    (runtime.instantiate(&ty), m)
}

fn detached(encoding: &str) -> Invocation {
    let signature = Arc::new(MethodSignature::parse(encoding).unwrap());
    Invocation::new(MethodId::intern("detached"), signature)
}

// ============================================================================
// Slot Round Trip Tests
// ============================================================================

#[test]
fn test_integer_widths_round_trip() {
    let mut invocation = detached("v@:cCsSiIqQ");
    let signed = [i8::MIN as i64, i16::MIN as i64, i32::MIN as i64, i64::MIN];
    let unsigned = [u8::MAX as u64, u16::MAX as u64, u32::MAX as u64, u64::MAX];

    for (width, (s, u)) in signed.iter().zip(unsigned).enumerate() {
        invocation.set(Slot::Argument(width * 2), BoxedValue::from(*s)).unwrap();
        invocation.set(Slot::Argument(width * 2 + 1), BoxedValue::from(u)).unwrap();
    }

    for (width, (s, u)) in signed.iter().zip(unsigned).enumerate() {
        assert_eq!(invocation.get(Slot::Argument(width * 2)).as_i64(), Some(*s));
        assert_eq!(
            invocation.get(Slot::Argument(width * 2 + 1)),
            BoxedValue::Number(Number::UInt(u))
        );
    }
}

#[test]
fn test_aggregate_round_trip_is_byte_identical() {
    let mut invocation = detached("v@:{Rect={Point=dd}{Size=dd}}");
    let bytes: Vec<u8> = (0..32).collect();

    invocation.set(Slot::Argument(0), BoxedValue::Bytes(bytes.clone())).unwrap();
    assert_eq!(invocation.get(Slot::Argument(0)).as_bytes(), Some(bytes.as_slice()));
    assert_eq!(invocation.get_raw(Slot::Argument(0)), &Value::Aggregate(bytes));
}

#[test]
fn test_aggregate_of_wrong_size_rejected() {
    let mut invocation = detached("v@:{Point=dd}");
    let err = invocation
        .set(Slot::Argument(0), BoxedValue::Bytes(vec![0; 8]))
        .unwrap_err();
    assert!(matches!(err, HookError::ValueMismatch { .. }));
}

#[test]
fn test_fresh_invocation_is_zeroed() {
    let invocation = detached("q@:i@*");
    assert_eq!(invocation.argument_count(), 3);
    assert!(!invocation.is_void());
    assert_eq!(invocation.arguments(), &[Value::I32(0), Value::Object(None), Value::CString(None)]);
    assert!(invocation.get(Slot::Argument(1)).is_nil());
    assert!(invocation.target().is_none());
}

#[test]
fn test_text_and_object_slots() {
    let runtime = Runtime::new();
    let ty = runtime.define_type("SlotKinds", None).unwrap();
    let object = runtime.instantiate(&ty);
    let mut invocation = detached("v@:*@");

    invocation.set(Slot::Argument(0), BoxedValue::from("hello")).unwrap();
    invocation.set(Slot::Argument(1), BoxedValue::from(&object)).unwrap();
    assert_eq!(invocation.get(Slot::Argument(0)).as_str(), Some("hello"));
    assert_eq!(invocation.get(Slot::Argument(1)).as_object(), Some(&object));

    let err = invocation
        .set(Slot::Argument(0), BoxedValue::from("nul\0inside"))
        .unwrap_err();
    assert!(matches!(err, HookError::ValueMismatch { .. }));
}

#[test]
#[should_panic(expected = "takes 2 arguments")]
fn test_set_arguments_count_mismatch_panics() {
    let mut invocation = detached("v@:ii");
    let _ = invocation.set_arguments(vec![BoxedValue::from(1i64)]);
}

// ============================================================================
// Invoke Tests
// ============================================================================

#[test]
fn test_invoke_populates_return_slot() {
    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let (object, m) = adder(&runtime, "InvokeAdder");

    let mut invocation = engine.invocation(&object, m).unwrap();
    assert_eq!(invocation.signature().argument_count(), 2);
    invocation
        .set_arguments(vec![BoxedValue::from(2i64), BoxedValue::from(3i64)])
        .unwrap();
    invocation.invoke().unwrap();
    assert_eq!(invocation.get(Slot::Return).as_i64(), Some(5));

    // Replay with a changed argument
    invocation.set(Slot::Argument(1), BoxedValue::from(40i64)).unwrap();
    invocation.invoke().unwrap();
    assert_eq!(invocation.get(Slot::Return).as_i64(), Some(42));
}

#[test]
fn test_invoke_with_other_target() {
    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let (object, m) = adder(&runtime, "InvokeFirst");

    let other_ty = runtime.define_type("InvokeSecond", None).unwrap();
    other_ty
        .add_method(m, Imp::new(|_, _, _| Ok(Value::I64(-1))), "q@:qq")
        .unwrap();
    let other = runtime.instantiate(&other_ty);

    let mut invocation = engine.invocation(&object, m).unwrap();
    invocation.invoke_with(&other).unwrap();
    assert_eq!(invocation.get(Slot::Return).as_i64(), Some(-1));
    assert_eq!(invocation.target(), Some(object));
}

#[test]
fn test_invoke_on_dead_target() {
    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let (object, m) = adder(&runtime, "InvokeDead");

    let mut invocation = engine.invocation(&object, m).unwrap();
    drop(object);
    assert!(matches!(invocation.invoke(), Err(HookError::TargetGone)));
}

#[test]
fn test_invocation_for_unknown_method() {
    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let (object, _) = adder(&runtime, "InvokeUnknown");
    let err = engine.invocation(&object, MethodId::intern("unknown")).unwrap_err();
    assert!(matches!(err, HookError::MethodNotFound { .. }));
}

#[test]
fn test_aggregate_return_is_staged() {
    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let ty = runtime.define_type("AggregateReturn", None).unwrap();
    let m = MethodId::intern("origin");
    ty.add_method(m, Imp::new(|_, _, _| Ok(Value::Aggregate(vec![7; 16]))), "{Point=dd}@:")
        .unwrap();
    let object = runtime.instantiate(&ty);

    let mut invocation = engine.invocation(&object, m).unwrap();
    invocation.invoke().unwrap();
    assert_eq!(invocation.get(Slot::Return).as_bytes(), Some(&[7u8; 16][..]));
}

#[test]
fn test_mismatched_return_value_rejected() {
    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let ty = runtime.define_type("BadReturn", None).unwrap();
    let m = MethodId::intern("badReturn");
    ty.add_method(m, Imp::new(|_, _, _| Ok(Value::Bool(true))), "q@:").unwrap();
    let object = runtime.instantiate(&ty);

    let mut invocation = engine.invocation(&object, m).unwrap();
    assert!(matches!(invocation.invoke(), Err(HookError::ValueMismatch { .. })));
}

#[test]
fn test_captured_call_replays_through_hooks() {
    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let (object, m) = adder(&runtime, "Replay");
    let captured = Arc::new(Mutex::new(None));
    let fired = Arc::new(AtomicUsize::new(0));

    let (sink, counter) = (captured.clone(), fired.clone());
    let _token = engine
        .hook(
            &object.isa(),
            m,
            Interceptor::before(move |call| {
                counter.fetch_add(1, Ordering::SeqCst);
                sink.lock().get_or_insert_with(|| call.invocation());
            }),
        )
        .unwrap();

    object.send(m, &[Value::I64(1), Value::I64(2)]).unwrap();
    let mut invocation = captured.lock().take().unwrap();
    assert_eq!(invocation.arguments(), &[Value::I64(1), Value::I64(2)]);

    invocation.set(Slot::Argument(0), BoxedValue::from(10i64)).unwrap();
    invocation.invoke().unwrap();
    assert_eq!(invocation.get(Slot::Return).as_i64(), Some(12));
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Perform Tests
// ============================================================================

#[test]
fn test_perform_boxes_arguments_and_result() {
    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let (object, m) = adder(&runtime, "PerformAdder");

    let result = engine
        .perform(&object, m, vec![BoxedValue::from(20i64), BoxedValue::from(22i64)])
        .unwrap();
    assert_eq!(result.as_i64(), Some(42));
}

#[test]
fn test_perform_argument_count_mismatch() {
    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let (object, m) = adder(&runtime, "PerformCount");

    let err = engine.perform(&object, m, vec![BoxedValue::from(1i64)]).unwrap_err();
    assert!(matches!(err, HookError::ArgumentCountMismatch { expected: 2, got: 1 }));
}

#[test]
fn test_perform_catches_panics() {
    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let ty = runtime.define_type("PerformPanic", None).unwrap();
    let m = MethodId::intern("explode");
    ty.add_method(m, Imp::new(|_, _, _| panic!("boom")), "v@:").unwrap();
    let object = runtime.instantiate(&ty);

    let err = engine.perform(&object, m, Vec::new()).unwrap_err();
    match err {
        HookError::Runtime(RuntimeError::Panicked(message)) => assert_eq!(message, "boom"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_perform_void_returns_nil() {
    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let ty = runtime.define_type("PerformVoid", None).unwrap();
    let m = MethodId::intern("noop");
    ty.add_method(m, Imp::new(|_, _, _| Ok(Value::Void)), "v@:").unwrap();
    let object = runtime.instantiate(&ty);

    assert!(engine.perform(&object, m, Vec::new()).unwrap().is_nil());
}
