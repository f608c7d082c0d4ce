use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use typeloom::model::TypeDefinition;
use typeloom::{
    CallError, CallResult, Instance, InterceptCallInfo, InterceptType, Interceptor, Marker,
    MemberDescriptor, ParamDescriptor, TypeDescriptor, TypeFactory, Value, ValueType,
};

fn concat() -> MemberDescriptor {
    MemberDescriptor::method("Concat")
        .param(ParamDescriptor::new("str1", ValueType::Str))
        .param(ParamDescriptor::new("str2", ValueType::Str))
        .returns(ValueType::Str)
        .body(|_, args| {
            let a = args[0].as_str().unwrap_or("");
            let b = args[1].as_str().unwrap_or("");
            Ok(Value::Str(format!("{}{}", a, b).into()))
        })
}

fn create(ty: TypeDefinition) -> Instance {
    TypeFactory::default().create_instance(&ty.build()).unwrap()
}

// ============================================================================
// Not-null
// ============================================================================

#[test]
fn test_member_level_not_null() {
    let obj = create(
        TypeDescriptor::abstract_class("Strings")
            .member(concat().marker(Marker::not_null_msg("Null: {0}"))),
    );

    assert_eq!(
        obj.call("Concat", vec![Value::str("a"), Value::str("b")]).unwrap(),
        Value::str("ab")
    );
    assert_eq!(
        obj.call("Concat", vec![Value::str("a"), Value::Null]).unwrap_err(),
        CallError::Argument {
            param: "str2".to_string(),
            message: "Null: str2".to_string(),
        }
    );
}

#[test]
fn test_parameter_level_not_null() {
    let obj = create(
        TypeDescriptor::abstract_class("Greeter").member(
            MemberDescriptor::method("Greet")
                .param(ParamDescriptor::new("name", ValueType::Str).marker(Marker::not_null()))
                .param(ParamDescriptor::new("title", ValueType::Str))
                .returns(ValueType::Str)
                .body(|_, args| {
                    let name = args[0].as_str().unwrap_or("");
                    Ok(Value::Str(format!("hi {}", name).into()))
                }),
        ),
    );

    assert_eq!(
        obj.call("Greet", vec![Value::str("bo"), Value::Null]).unwrap(),
        Value::str("hi bo")
    );
    match obj.call("Greet", vec![Value::Null, Value::str("dr")]) {
        Err(CallError::Argument { param, message }) => {
            assert_eq!(param, "name");
            assert_eq!(message, "Value cannot be null. Parameter name: name");
        }
        other => panic!("expected an argument error, got {:?}", other),
    }
}

#[test]
fn test_not_null_check_runs_before_body() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = runs.clone();
    let obj = create(
        TypeDescriptor::abstract_class("Guarded").member(
            MemberDescriptor::method("Store")
                .param(ParamDescriptor::new("count", ValueType::Int))
                .param(ParamDescriptor::new("label", ValueType::Any))
                .marker(Marker::not_null())
                .body(move |_, _| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }),
        ),
    );

    assert!(obj.call("Store", vec![Value::Int(0), Value::Null]).is_err());
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    obj.call("Store", vec![Value::Int(0), Value::Bool(false)]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Return-if
// ============================================================================

fn flagged(counter: &Arc<AtomicUsize>) -> TypeDefinition {
    let a = counter.clone();
    let b = counter.clone();
    let c = counter.clone();
    TypeDescriptor::abstract_class("Flags")
        .member(
            MemberDescriptor::method("SkipWhenTrue")
                .param(
                    ParamDescriptor::new("skip", ValueType::Bool).marker(Marker::return_if_true()),
                )
                .returns(ValueType::Int)
                .body(move |_, _| {
                    a.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Int(7))
                }),
        )
        .member(
            MemberDescriptor::method("SkipWhenFalse")
                .param(
                    ParamDescriptor::new("run", ValueType::Bool).marker(Marker::return_if_false()),
                )
                .returns(ValueType::Bool)
                .body(move |_, _| {
                    b.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Bool(true))
                }),
        )
        .member(
            MemberDescriptor::method("SkipWhenNull")
                .param(
                    ParamDescriptor::new("item", ValueType::Str).marker(Marker::return_if_null()),
                )
                .returns(ValueType::Str)
                .body(move |_, args| {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(args[0].clone())
                }),
        )
}

#[test]
fn test_return_if_true() {
    let runs = Arc::new(AtomicUsize::new(0));
    let obj = create(flagged(&runs));

    assert_eq!(obj.call("SkipWhenTrue", vec![Value::Bool(true)]).unwrap(), Value::Int(0));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(obj.call("SkipWhenTrue", vec![Value::Bool(false)]).unwrap(), Value::Int(7));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_return_if_false() {
    let runs = Arc::new(AtomicUsize::new(0));
    let obj = create(flagged(&runs));

    assert_eq!(obj.call("SkipWhenFalse", vec![Value::Bool(false)]).unwrap(), Value::Bool(false));
    assert_eq!(obj.call("SkipWhenFalse", vec![Value::Bool(true)]).unwrap(), Value::Bool(true));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_return_if_null() {
    let runs = Arc::new(AtomicUsize::new(0));
    let obj = create(flagged(&runs));

    assert_eq!(obj.call("SkipWhenNull", vec![Value::Null]).unwrap(), Value::Null);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(obj.call("SkipWhenNull", vec![Value::str("x")]).unwrap(), Value::str("x"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[derive(Default)]
struct Preset;

impl Interceptor for Preset {
    fn before_call(&self, info: &mut InterceptCallInfo) -> CallResult<()> {
        info.set_return_value(Value::Int(5));
        Ok(())
    }
}

#[test]
fn test_return_if_keeps_earlier_short_circuit() {
    let ty = TypeDescriptor::abstract_class("Preset")
        .member(
            MemberDescriptor::method("Pick")
                .param(
                    ParamDescriptor::new("skip", ValueType::Bool).marker(Marker::return_if_true()),
                )
                .returns(ValueType::Int)
                .marker(Marker::intercept::<Preset>(InterceptType::BEFORE_CALL, 20_000))
                .body(|_, _| Ok(Value::Int(7))),
        );
    let obj = create(ty);

    assert_eq!(obj.call("Pick", vec![Value::Bool(true)]).unwrap(), Value::Int(5));
}
