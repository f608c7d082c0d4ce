use std::sync::Arc;

use typeloom::{
    BuildError, CallError, Instance, Marker, MemberDescriptor, ParamDescriptor, TypeDescriptor,
    TypeFactory, TypeRef, Value, ValueType, WeaveError,
};

fn greeter_interface() -> TypeRef {
    TypeDescriptor::interface("IGreeter")
        .member(
            MemberDescriptor::method("Greet")
                .param(ParamDescriptor::new("name", ValueType::Str))
                .returns(ValueType::Str),
        )
        .build()
}

fn english(factory: &TypeFactory) -> Instance {
    let ty = TypeDescriptor::class("English")
        .member(
            MemberDescriptor::method("Greet")
                .param(ParamDescriptor::new("name", ValueType::Str))
                .returns(ValueType::Str)
                .body(|_, args| {
                    let name = args[0].as_str().unwrap_or("");
                    Ok(Value::Str(format!("Hello, {}", name).into()))
                }),
        )
        .member(
            MemberDescriptor::method("Wave")
                .returns(ValueType::Str)
                .body(|_, _| Ok(Value::str("wave"))),
        )
        .build();
    factory.create_instance(&ty).unwrap()
}

fn counter(factory: &TypeFactory) -> Instance {
    let ty = TypeDescriptor::class("Counter")
        .member(
            MemberDescriptor::method("Count")
                .returns(ValueType::Int)
                .body(|_, _| Ok(Value::Int(3))),
        )
        .build();
    factory.create_instance(&ty).unwrap()
}

// ============================================================================
// Single object
// ============================================================================

#[test]
fn test_implement_forwards_calls() {
    let factory = TypeFactory::default();
    let iface = greeter_interface();
    let view = factory.implement(&iface, &english(&factory)).unwrap();

    assert!(view.is_instance_of(&iface));
    assert_eq!(
        view.call("Greet", vec![Value::str("Ada")]).unwrap(),
        Value::str("Hello, Ada")
    );
}

#[test]
fn test_missing_required_member_fails() {
    let factory = TypeFactory::default();
    let iface = greeter_interface();
    let obj = counter(&factory);

    match factory.implement(&iface, &obj) {
        Err(WeaveError::Build(BuildError::DuckTyping { interface, .. })) => {
            assert_eq!(interface, "IGreeter")
        }
        other => panic!("expected a duck-typing error, got {:?}", other),
    }
    assert!(factory.try_implement(&iface, &obj).is_none());
}

#[test]
fn test_optional_member_returns_default() {
    let factory = TypeFactory::default();
    let iface = TypeDescriptor::interface("ICounter")
        .member(MemberDescriptor::method("Count").returns(ValueType::Int))
        .member(
            MemberDescriptor::method("Total")
                .returns(ValueType::Int)
                .marker(Marker::must_implement(false, false, None)),
        )
        .build();
    let view = factory.implement(&iface, &counter(&factory)).unwrap();

    assert_eq!(view.call("Count", vec![]).unwrap(), Value::Int(3));
    assert_eq!(view.call("Total", vec![]).unwrap(), Value::Int(0));
}

#[test]
fn test_optional_member_throws() {
    let factory = TypeFactory::default();
    let iface = TypeDescriptor::interface("IResettable")
        .member(MemberDescriptor::method("Count").returns(ValueType::Int))
        .member(
            MemberDescriptor::method("Reset")
                .marker(Marker::must_implement(false, true, Some("cannot reset"))),
        )
        .build();
    let view = factory.implement(&iface, &counter(&factory)).unwrap();

    assert_eq!(
        view.call("Reset", vec![]).unwrap_err(),
        CallError::InvalidOperation("cannot reset".to_string())
    );
}

#[test]
fn test_implementing_object_returned_unchanged() {
    let factory = TypeFactory::default();
    let iface = greeter_interface();
    let ty = TypeDescriptor::class("Native")
        .implements(&iface)
        .member(
            MemberDescriptor::method("Greet")
                .param(ParamDescriptor::new("name", ValueType::Str))
                .returns(ValueType::Str)
                .body(|_, _| Ok(Value::str("hi"))),
        )
        .build();
    let obj = factory.create_instance(&ty).unwrap();

    let view = factory.implement(&iface, &obj).unwrap();
    assert!(view.ptr_eq(&obj));
}

#[test]
fn test_duck_type_is_cached() {
    let factory = TypeFactory::default();
    let iface = greeter_interface();
    let a = factory.implement(&iface, &english(&factory)).unwrap();
    let b = factory.implement(&iface, &english(&factory)).unwrap();

    assert!(!a.ptr_eq(&b));
    assert!(Arc::ptr_eq(a.generated_type(), b.generated_type()));
}

#[test]
fn test_implement_all() {
    let factory = TypeFactory::default();
    let iface = greeter_interface();
    let objects = vec![english(&factory), counter(&factory)];

    assert!(factory.implement_all(&iface, &objects).is_err());
    let views = factory.try_implement_all(&iface, &objects);
    assert!(views[0].is_some());
    assert!(views[1].is_none());
}

// ============================================================================
// Aggregation
// ============================================================================

#[test]
fn test_aggregate_routes_to_first_provider() {
    let factory = TypeFactory::default();
    let iface = TypeDescriptor::interface("IGreetingCounter")
        .member(
            MemberDescriptor::method("Greet")
                .param(ParamDescriptor::new("name", ValueType::Str))
                .returns(ValueType::Str),
        )
        .member(MemberDescriptor::method("Count").returns(ValueType::Int))
        .build();

    let view = factory
        .aggregate(&iface, &[english(&factory), counter(&factory)])
        .unwrap();
    assert_eq!(view.call("Greet", vec![Value::str("Bo")]).unwrap(), Value::str("Hello, Bo"));
    assert_eq!(view.call("Count", vec![]).unwrap(), Value::Int(3));

    assert!(factory.try_aggregate(&iface, &[english(&factory)]).is_none());
    assert!(factory.try_aggregate(&iface, &[]).is_none());
}
