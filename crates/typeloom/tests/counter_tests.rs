use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use typeloom::aspects::{CounterFactory, DefaultMethodCallCounter, MethodCallCounter};
use typeloom::intercept::with_principal;
use typeloom::{
    CallMethodInfo, Marker, MemberDescriptor, TypeDescriptor, TypeFactory, TypeRef, Value,
    ValueType,
};

fn worker() -> TypeRef {
    TypeDescriptor::abstract_class("Worker")
        .member(
            MemberDescriptor::method("Work")
                .returns(ValueType::Int)
                .marker(Marker::counter())
                .body(|_, _| Ok(Value::Int(1))),
        )
        .member(
            MemberDescriptor::method("InFlight")
                .returns(ValueType::Int)
                .marker(Marker::counter())
                .body(|this, _| {
                    let calls = this
                        .generated_type()
                        .counter("InFlight")
                        .map(|c| c.current_calls())
                        .unwrap_or_default();
                    let principal = calls.first().and_then(|c| c.principal.as_deref());
                    let principal_ok = principal == Some("alice");
                    Ok(Value::Int(if principal_ok { calls.len() as i64 } else { -1 }))
                }),
        )
        .member(
            MemberDescriptor::method("Slow")
                .marker(Marker::counter())
                .body(|_, _| {
                    thread::sleep(Duration::from_millis(5));
                    Ok(Value::Null)
                }),
        )
        .build()
}

#[test]
fn test_counts_calls() {
    let factory = TypeFactory::default();
    let accessor = factory.accessor(&worker()).unwrap();
    let obj = accessor.create_instance().unwrap();

    for _ in 0..10 {
        obj.call("Work", vec![]).unwrap();
    }
    let counter = accessor.counter("Work").unwrap();
    assert_eq!(counter.total_calls(), 10);
    assert!(counter.current_calls().is_empty());

    counter.reset();
    assert_eq!(counter.total_calls(), 0);
}

#[test]
fn test_counts_concurrent_calls() {
    let factory = TypeFactory::default();
    let accessor = factory.accessor(&worker()).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let obj = accessor.create_instance().unwrap();
            thread::spawn(move || {
                for _ in 0..25 {
                    obj.call("Work", vec![]).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(accessor.counter("Work").unwrap().total_calls(), 200);
}

#[test]
fn test_in_flight_snapshot() {
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&worker()).unwrap();

    let seen = with_principal("alice", || obj.call("InFlight", vec![]).unwrap());
    assert_eq!(seen, Value::Int(1));
}

#[test]
fn test_accumulates_time() {
    let factory = TypeFactory::default();
    let accessor = factory.accessor(&worker()).unwrap();
    let obj = accessor.create_instance().unwrap();

    obj.call("Slow", vec![]).unwrap();
    obj.call("Slow", vec![]).unwrap();
    let counter = accessor.counter("Slow").unwrap();
    assert!(counter.total_time() >= Duration::from_millis(10));
    assert!(counter.average_time() >= Duration::from_millis(5));
}

#[test]
fn test_factory_lists_counters() {
    let factory = TypeFactory::default();
    let obj = factory.create_instance(&worker()).unwrap();
    obj.call("Work", vec![]).unwrap();

    let counters = factory.counters();
    assert_eq!(counters.len(), 3);
    assert_eq!(counters.iter().map(|c| c.total_calls()).sum::<u64>(), 1);
}

#[test]
fn test_custom_counter_factory() {
    struct Tracking {
        created: AtomicUsize,
    }

    impl CounterFactory for Tracking {
        fn create(&self, method: &CallMethodInfo) -> Option<Arc<dyn MethodCallCounter>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if method.name() == "Work" {
                Some(Arc::new(DefaultMethodCallCounter::new()))
            } else {
                None
            }
        }
    }

    let tracking = Arc::new(Tracking {
        created: AtomicUsize::new(0),
    });
    let factory = TypeFactory::default();
    factory.set_counter_factory(tracking.clone());

    let accessor = factory.accessor(&worker()).unwrap();
    accessor.create_instance().unwrap().call("Work", vec![]).unwrap();
    assert_eq!(tracking.created.load(Ordering::SeqCst), 3);
    assert_eq!(accessor.counter("Work").unwrap().total_calls(), 1);
}
