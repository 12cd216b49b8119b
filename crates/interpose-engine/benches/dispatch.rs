use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use interpose_engine::{BoxedValue, Interceptor, Interposer, Slot};
use interpose_runtime::{Imp, MethodId, ObjectRef, Runtime, TypeRef, Value};

fn adder(runtime: &Runtime, name: &str) -> (TypeRef, ObjectRef, MethodId) {
    let ty = runtime.define_type(name, None).unwrap();
    let m = MethodId::intern("bench:add:");
    ty.add_method(
        m,
        Imp::new(|_, _, args| {
            let a = args[0].as_i64().unwrap_or_default();
            let b = args[1].as_i64().unwrap_or_default();
            Ok(Value::I64(a + b))
        }),
        "q@:qq",
    )
    .unwrap();
    let object = runtime.instantiate(&ty);
    (ty, object, m)
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let args = [Value::I64(20), Value::I64(22)];

    let runtime = Runtime::new();
    let (_, object, m) = adder(&runtime, "Unhooked");
    group.bench_function("unhooked", |b| {
        b.iter(|| object.send(m, black_box(&args)).unwrap());
    });

    for depth in [1usize, 4, 16] {
        let runtime = Runtime::new();
        let engine = Interposer::new(&runtime);
        let (ty, object, m) = adder(&runtime, "Hooked");
        let tokens: Vec<_> = (0..depth)
            .map(|_| {
                let before = Interceptor::before(|call| {
                    black_box(call.args());
                });
                engine.hook(&ty, m, before).unwrap()
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("before", depth), &depth, |b, _| {
            b.iter(|| object.send(m, black_box(&args)).unwrap());
        });
        drop(tokens);
    }

    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let (ty, object, m) = adder(&runtime, "Instead");
    let _token = engine
        .hook(&ty, m, Interceptor::instead(|call, next| next.proceed(call)))
        .unwrap();
    group.bench_function("instead_passthrough", |b| {
        b.iter(|| object.send(m, black_box(&args)).unwrap());
    });

    group.finish();
}

fn bench_invocation(c: &mut Criterion) {
    let runtime = Runtime::new();
    let engine = Interposer::new(&runtime);
    let (_, object, m) = adder(&runtime, "Invoked");

    c.bench_function("invocation_replay", |b| {
        let mut invocation = engine.invocation(&object, m).unwrap();
        b.iter(|| {
            invocation.set(Slot::Argument(0), BoxedValue::from(black_box(1i64))).unwrap();
            invocation.invoke().unwrap();
            invocation.get(Slot::Return)
        });
    });

    c.bench_function("perform", |b| {
        b.iter(|| {
            engine
                .perform(&object, m, vec![BoxedValue::from(1i64), BoxedValue::from(2i64)])
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_dispatch, bench_invocation);
criterion_main!(benches);
