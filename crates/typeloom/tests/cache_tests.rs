use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use typeloom::aspects::CacheOptions;
use typeloom::{
    CallError, CallResult, InterceptCallInfo, InterceptType, Interceptor, Marker, MemberDescriptor,
    ParamDescriptor, TypeDescriptor, TypeFactory, TypeRef, Value, ValueType,
};

// Helper: a calculator whose Square and Get bodies count their runs
fn calculator(runs: &Arc<AtomicUsize>) -> TypeRef {
    let square_runs = runs.clone();
    let int_runs = runs.clone();
    let str_runs = runs.clone();
    TypeDescriptor::abstract_class("Calculator")
        .member(
            MemberDescriptor::method("Square")
                .param(ParamDescriptor::new("x", ValueType::Int))
                .returns(ValueType::Int)
                .marker(Marker::cache())
                .body(move |_, args| {
                    square_runs.fetch_add(1, Ordering::SeqCst);
                    let x = args[0].as_int().unwrap_or(0);
                    Ok(Value::Int(x * x))
                }),
        )
        .member(
            MemberDescriptor::method("Get")
                .param(ParamDescriptor::new("id", ValueType::Int))
                .returns(ValueType::Str)
                .marker(Marker::cache())
                .body(move |_, args| {
                    int_runs.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Str(format!("int:{}", args[0].as_int().unwrap_or(0)).into()))
                }),
        )
        .member(
            MemberDescriptor::method("Get")
                .param(ParamDescriptor::new("key", ValueType::Str))
                .returns(ValueType::Str)
                .marker(Marker::cache())
                .body(move |_, args| {
                    str_runs.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Str(format!("str:{}", args[0].as_str().unwrap_or("")).into()))
                }),
        )
        .member(
            MemberDescriptor::method("ResetSquare")
                .marker(Marker::clear_cache_of(None, "Square"))
                .body(|_, _| Ok(Value::Null)),
        )
        .member(
            MemberDescriptor::method("ResetIntGet")
                .marker(Marker::clear_cache_overload(None, "Get", vec![ValueType::Int]))
                .body(|_, _| Ok(Value::Null)),
        )
        .member(
            MemberDescriptor::method("ResetAll")
                .marker(Marker::clear_cache_all(None))
                .body(|_, _| Ok(Value::Null)),
        )
        .build()
}

// ============================================================================
// Memoization
// ============================================================================

#[test]
fn test_repeated_call_hits_cache() {
    let runs = Arc::new(AtomicUsize::new(0));
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&calculator(&runs)).unwrap();

    assert_eq!(obj.call("Square", vec![Value::Int(3)]).unwrap(), Value::Int(9));
    assert_eq!(obj.call("Square", vec![Value::Int(3)]).unwrap(), Value::Int(9));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    assert_eq!(obj.call("Square", vec![Value::Int(4)]).unwrap(), Value::Int(16));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cache_is_shared_between_instances() {
    let runs = Arc::new(AtomicUsize::new(0));
    let factory = TypeFactory::default();
    let ty = calculator(&runs);
    let a = factory.create_instance(&ty).unwrap();
    let b = factory.create_instance(&ty).unwrap();

    a.call("Square", vec![Value::Int(5)]).unwrap();
    b.call("Square", vec![Value::Int(5)]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_overloads_cache_separately() {
    let runs = Arc::new(AtomicUsize::new(0));
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&calculator(&runs)).unwrap();

    assert_eq!(obj.call("Get", vec![Value::Int(1)]).unwrap(), Value::str("int:1"));
    assert_eq!(obj.call("Get", vec![Value::str("1")]).unwrap(), Value::str("str:1"));
    obj.call("Get", vec![Value::Int(1)]).unwrap();
    obj.call("Get", vec![Value::str("1")]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failed_call_is_not_cached() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = runs.clone();
    let ty = TypeDescriptor::abstract_class("Flaky")
        .member(
            MemberDescriptor::method("Load")
                .returns(ValueType::Int)
                .marker(Marker::cache())
                .body(move |_, _| {
                    if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(CallError::exception("IoError", "first call fails"))
                    } else {
                        Ok(Value::Int(7))
                    }
                }),
        )
        .build();
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&ty).unwrap();

    assert!(obj.call("Load", vec![]).is_err());
    assert_eq!(obj.call("Load", vec![]).unwrap(), Value::Int(7));
    assert_eq!(obj.call("Load", vec![]).unwrap(), Value::Int(7));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_max_entries_evicts_oldest() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = runs.clone();
    let ty = TypeDescriptor::abstract_class("Bounded")
        .member(
            MemberDescriptor::method("Echo")
                .param(ParamDescriptor::new("x", ValueType::Int))
                .returns(ValueType::Int)
                .marker(Marker::cache_with(CacheOptions::default().max_entries(1)))
                .body(move |_, args| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(args[0].clone())
                }),
        )
        .build();
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&ty).unwrap();

    obj.call("Echo", vec![Value::Int(1)]).unwrap();
    obj.call("Echo", vec![Value::Int(2)]).unwrap();
    obj.call("Echo", vec![Value::Int(1)]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[test]
fn test_entries_expire() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = runs.clone();
    let ty = TypeDescriptor::abstract_class("Expiring")
        .member(
            MemberDescriptor::method("Now")
                .returns(ValueType::Int)
                .marker(Marker::cache_with(
                    CacheOptions::default().max_cache_time(Duration::from_millis(30)),
                ))
                .body(move |_, _| Ok(Value::Int(counted.fetch_add(1, Ordering::SeqCst) as i64))),
        )
        .build();
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&ty).unwrap();

    assert_eq!(obj.call("Now", vec![]).unwrap(), Value::Int(0));
    assert_eq!(obj.call("Now", vec![]).unwrap(), Value::Int(0));
    thread::sleep(Duration::from_millis(60));
    assert_eq!(obj.call("Now", vec![]).unwrap(), Value::Int(1));
}

// ============================================================================
// Clearing
// ============================================================================

#[test]
fn test_clear_named_member() {
    let runs = Arc::new(AtomicUsize::new(0));
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&calculator(&runs)).unwrap();

    obj.call("Square", vec![Value::Int(3)]).unwrap();
    obj.call("Get", vec![Value::Int(1)]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    obj.call("ResetSquare", vec![]).unwrap();
    obj.call("Square", vec![Value::Int(3)]).unwrap();
    obj.call("Get", vec![Value::Int(1)]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[test]
fn test_clear_single_overload() {
    let runs = Arc::new(AtomicUsize::new(0));
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&calculator(&runs)).unwrap();

    obj.call("Get", vec![Value::Int(1)]).unwrap();
    obj.call("Get", vec![Value::str("a")]).unwrap();
    obj.call("ResetIntGet", vec![]).unwrap();

    obj.call("Get", vec![Value::str("a")]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    obj.call("Get", vec![Value::Int(1)]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[test]
fn test_clear_all_members() {
    let runs = Arc::new(AtomicUsize::new(0));
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&calculator(&runs)).unwrap();

    obj.call("Square", vec![Value::Int(2)]).unwrap();
    obj.call("Get", vec![Value::Int(2)]).unwrap();
    obj.call("ResetAll", vec![]).unwrap();
    obj.call("Square", vec![Value::Int(2)]).unwrap();
    obj.call("Get", vec![Value::Int(2)]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 4);
}

#[test]
fn test_factory_clear_cache() {
    let runs = Arc::new(AtomicUsize::new(0));
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&calculator(&runs)).unwrap();

    obj.call("Square", vec![Value::Int(6)]).unwrap();
    factory.clear_cache();
    obj.call("Square", vec![Value::Int(6)]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_clear_unknown_member_is_argument_error() {
    let ty = TypeDescriptor::abstract_class("BadClear")
        .member(
            MemberDescriptor::method("Reset")
                .marker(Marker::clear_cache_of(None, "Missing"))
                .body(|_, _| Ok(Value::Null)),
        )
        .build();
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&ty).unwrap();

    match obj.call("Reset", vec![]) {
        Err(CallError::Argument { param, .. }) => assert_eq!(param, "method"),
        other => panic!("expected an argument error, got {:?}", other),
    }
}

#[test]
fn test_clear_from_another_type() {
    let runs = Arc::new(AtomicUsize::new(0));
    let factory = TypeFactory::default();
    let calc = calculator(&runs);
    let obj = factory.create_instance(&calc).unwrap();

    let admin = TypeDescriptor::abstract_class("CacheAdmin")
        .member(
            MemberDescriptor::method("DropSquare")
                .marker(Marker::clear_cache_of(Some(&calc), "Square"))
                .body(|_, _| Ok(Value::Null)),
        )
        .member(
            MemberDescriptor::method("DropStrGet")
                .marker(Marker::clear_cache_overload(Some(&calc), "Get", vec![ValueType::Str]))
                .body(|_, _| Ok(Value::Null)),
        )
        .member(
            MemberDescriptor::method("DropAll")
                .marker(Marker::clear_cache_all(Some(&calc)))
                .body(|_, _| Ok(Value::Null)),
        )
        .build();
    let admin = factory.create_instance(&admin).unwrap();

    obj.call("Square", vec![Value::Int(5)]).unwrap();
    obj.call("Get", vec![Value::Int(5)]).unwrap();
    obj.call("Get", vec![Value::str("k")]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    admin.call("DropSquare", vec![]).unwrap();
    obj.call("Square", vec![Value::Int(5)]).unwrap();
    obj.call("Get", vec![Value::Int(5)]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 4);

    admin.call("DropStrGet", vec![]).unwrap();
    obj.call("Get", vec![Value::Int(5)]).unwrap();
    obj.call("Get", vec![Value::str("k")]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 5);

    admin.call("DropAll", vec![]).unwrap();
    obj.call("Square", vec![Value::Int(5)]).unwrap();
    obj.call("Get", vec![Value::Int(5)]).unwrap();
    obj.call("Get", vec![Value::str("k")]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 8);
}

// ============================================================================
// Interaction with other hooks
// ============================================================================

static OVERRIDE: AtomicBool = AtomicBool::new(false);

#[derive(Default)]
struct Override;

impl Interceptor for Override {
    fn before_call(&self, info: &mut InterceptCallInfo) -> CallResult<()> {
        if OVERRIDE.load(Ordering::SeqCst) {
            info.set_return_value(Value::Int(99));
        }
        Ok(())
    }
}

#[test]
fn test_earlier_short_circuit_wins_over_cache_hit() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = runs.clone();
    let ty = TypeDescriptor::abstract_class("Overridden")
        .member(
            MemberDescriptor::method("Get")
                .param(ParamDescriptor::new("x", ValueType::Int))
                .returns(ValueType::Int)
                .marker(Marker::cache())
                .marker(Marker::intercept::<Override>(InterceptType::BEFORE_CALL, 5000))
                .body(move |_, _| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Int(1))
                }),
        )
        .build();
    let obj = TypeFactory::default().create_instance(&ty).unwrap();

    assert_eq!(obj.call("Get", vec![Value::Int(7)]).unwrap(), Value::Int(1));

    OVERRIDE.store(true, Ordering::SeqCst);
    assert_eq!(obj.call("Get", vec![Value::Int(7)]).unwrap(), Value::Int(99));
    // the overriding value is not cached
    assert_eq!(obj.call("Get", vec![Value::Int(8)]).unwrap(), Value::Int(99));
    OVERRIDE.store(false, Ordering::SeqCst);

    assert_eq!(obj.call("Get", vec![Value::Int(7)]).unwrap(), Value::Int(1));
    assert_eq!(obj.call("Get", vec![Value::Int(8)]).unwrap(), Value::Int(1));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}
