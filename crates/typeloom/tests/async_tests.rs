use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::bounded;
use typeloom::aspects::AsyncResult;
use typeloom::{
    BuildError, CallError, Callable, Marker, MemberDescriptor, ParamDescriptor, TypeDescriptor,
    TypeFactory, TypeRef, Value, ValueType, WeaveError,
};

fn compute_type() -> TypeRef {
    TypeDescriptor::abstract_class("Computer")
        .member(
            MemberDescriptor::method("Compute")
                .param(ParamDescriptor::new("x", ValueType::Int))
                .returns(ValueType::Int)
                .body(|_, args| {
                    thread::sleep(Duration::from_millis(230));
                    Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))
                }),
        )
        .member(
            MemberDescriptor::method("Fail")
                .returns(ValueType::Int)
                .body(|_, _| Err(CallError::exception("Overflow", "too big"))),
        )
        .member(
            MemberDescriptor::method("BeginCompute")
                .param(ParamDescriptor::new("x", ValueType::Int))
                .returns(ValueType::Native)
                .marker(Marker::async_call()),
        )
        .member(
            MemberDescriptor::method("BeginComputeWithCallback")
                .param(ParamDescriptor::new("x", ValueType::Int))
                .param(ParamDescriptor::new("callback", ValueType::Func))
                .param(ParamDescriptor::new("state", ValueType::Any))
                .returns(ValueType::Native)
                .marker(Marker::async_for("Compute", Some(vec![ValueType::Int]))),
        )
        .member(
            MemberDescriptor::method("EndCompute")
                .param(ParamDescriptor::new("result", ValueType::Native))
                .returns(ValueType::Int)
                .marker(Marker::async_call()),
        )
        .member(
            MemberDescriptor::method("BeginFail")
                .returns(ValueType::Native)
                .marker(Marker::async_call()),
        )
        .member(
            MemberDescriptor::method("EndFail")
                .param(ParamDescriptor::new("result", ValueType::Native))
                .returns(ValueType::Int)
                .marker(Marker::async_call()),
        )
        .build()
}

#[test]
fn test_begin_returns_immediately() {
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&compute_type()).unwrap();

    let started = Instant::now();
    let handle = obj.call("BeginCompute", vec![Value::Int(21)]).unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));

    assert_eq!(obj.call("EndCompute", vec![handle]).unwrap(), Value::Int(42));
    assert!(started.elapsed() >= Duration::from_millis(230));
}

#[test]
fn test_callback_receives_handle() {
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&compute_type()).unwrap();
    let (tx, rx) = bounded(1);

    let callback = Callable::new(move |args| {
        let handle = args
            .first()
            .and_then(|v| v.downcast_native::<AsyncResult>())
            .ok_or_else(|| CallError::invalid_operation("no handle"))?;
        let _ = tx.send((handle.wait()?, handle.state().clone()));
        Ok(Value::Null)
    });
    obj.call(
        "BeginComputeWithCallback",
        vec![Value::Int(5), Value::Func(callback), Value::str("tag")],
    )
    .unwrap();

    let (value, state) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(value, Value::Int(10));
    assert_eq!(state, Value::str("tag"));
}

#[test]
fn test_end_returns_error_of_work() {
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&compute_type()).unwrap();

    let handle = obj.call("BeginFail", vec![]).unwrap();
    assert_eq!(
        obj.call("EndFail", vec![handle]).unwrap_err(),
        CallError::exception("Overflow", "too big")
    );
}

#[test]
fn test_end_rejects_foreign_handle() {
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&compute_type()).unwrap();

    match obj.call("EndCompute", vec![Value::Null]) {
        Err(CallError::Argument { param, .. }) => assert_eq!(param, "result"),
        other => panic!("expected an argument error, got {:?}", other),
    }
}

#[test]
fn test_begin_without_target_fails_to_build() {
    let ty = TypeDescriptor::abstract_class("Orphan")
        .member(
            MemberDescriptor::method("BeginMissing")
                .returns(ValueType::Native)
                .marker(Marker::async_call()),
        )
        .build();

    match TypeFactory::default().create_instance(&ty) {
        Err(WeaveError::Build(BuildError::InvalidMarker { .. })) => {}
        other => panic!("expected an invalid-marker error, got {:?}", other),
    }
}

#[test]
fn test_named_overload_longer_than_begin_fails_to_build() {
    let ty = TypeDescriptor::abstract_class("Pair")
        .member(
            MemberDescriptor::method("Work")
                .param(ParamDescriptor::new("a", ValueType::Int))
                .param(ParamDescriptor::new("b", ValueType::Int))
                .returns(ValueType::Int)
                .body(|_, args| {
                    let a = args[0].as_int().unwrap_or(0);
                    let b = args[1].as_int().unwrap_or(0);
                    Ok(Value::Int(a + b))
                }),
        )
        .member(
            MemberDescriptor::method("BeginWork")
                .param(ParamDescriptor::new("a", ValueType::Int))
                .returns(ValueType::Native)
                .marker(Marker::async_for("Work", Some(vec![ValueType::Int, ValueType::Int]))),
        )
        .build();

    match TypeFactory::default().create_instance(&ty) {
        Err(WeaveError::Build(BuildError::InvalidMarker { .. })) => {}
        other => panic!("expected an invalid-marker error, got {:?}", other),
    }
}

#[test]
fn test_named_overload_with_incompatible_prefix_fails_to_build() {
    let ty = TypeDescriptor::abstract_class("Mismatch")
        .member(
            MemberDescriptor::method("Work")
                .param(ParamDescriptor::new("a", ValueType::Int))
                .returns(ValueType::Int)
                .body(|_, args| Ok(args[0].clone())),
        )
        .member(
            MemberDescriptor::method("BeginWork")
                .param(ParamDescriptor::new("a", ValueType::Str))
                .returns(ValueType::Native)
                .marker(Marker::async_for("Work", Some(vec![ValueType::Int]))),
        )
        .build();

    match TypeFactory::default().create_instance(&ty) {
        Err(WeaveError::Build(BuildError::InvalidMarker { .. })) => {}
        other => panic!("expected an invalid-marker error, got {:?}", other),
    }
}
