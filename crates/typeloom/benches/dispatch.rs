use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use typeloom::{
    Marker, MemberDescriptor, ParamDescriptor, TypeDescriptor, TypeFactory, TypeRef, Value,
    ValueType,
};

fn adder(markers: Vec<Marker>) -> TypeRef {
    let mut add = MemberDescriptor::method("Add")
        .param(ParamDescriptor::new("a", ValueType::Int))
        .param(ParamDescriptor::new("b", ValueType::Int))
        .returns(ValueType::Int)
        .body(|_, args| {
            let a = args[0].as_int().unwrap_or(0);
            let b = args[1].as_int().unwrap_or(0);
            Ok(Value::Int(a + b))
        });
    for marker in markers {
        add = add.marker(marker);
    }
    TypeDescriptor::abstract_class("Adder").member(add).build()
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let factory = TypeFactory::default();

    let variants = [
        ("plain", vec![]),
        ("not_null", vec![Marker::not_null()]),
        ("counter", vec![Marker::counter()]),
        ("cache", vec![Marker::cache()]),
    ];
    for (name, markers) in variants {
        let obj = factory.create_instance(&adder(markers)).unwrap();
        group.bench_with_input(BenchmarkId::new("call", name), &obj, |b, obj| {
            b.iter(|| {
                obj.call("Add", vec![black_box(Value::Int(2)), black_box(Value::Int(3))])
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_synthesis(c: &mut Criterion) {
    let factory = TypeFactory::default();
    let ty = adder(vec![Marker::counter()]);
    factory.generated_type(&ty).unwrap();

    c.bench_function("generated_type_cached", |b| {
        b.iter(|| factory.generated_type(black_box(&ty)).unwrap());
    });

    c.bench_function("generated_type_fresh", |b| {
        b.iter(|| {
            let ty = adder(vec![Marker::counter(), Marker::not_null()]);
            TypeFactory::default().generated_type(&ty).unwrap()
        });
    });
}

criterion_group!(benches, bench_dispatch, bench_synthesis);
criterion_main!(benches);
