use criterion::{criterion_group, criterion_main, Criterion};
use heapsnap::heap::HeapConfig;
use heapsnap::runtime::native::NativeRegistry;
use heapsnap::runtime::value::Value;
use heapsnap::runtime::vm::Vm;
use heapsnap::snapshot::{image::ImageView, Snapshot, SnapshotMode, SnapshotOptions};
criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

fn natives() -> NativeRegistry {
    let mut registry = NativeRegistry::new();
    for (i, &name) in ["print", "len", "push", "pop", "keys"].iter().enumerate() {
        registry.register(name, 0x4000 + 0x100 * i as u64);
    }
    registry
}

fn criterion_benchmark(c: &mut Criterion) {
    let registry = natives();
    let options = SnapshotOptions::default();
    let mut initial = Vm::bootstrap(HeapConfig::default(), &registry).unwrap();
    let snapshot = Snapshot::take(&mut initial, SnapshotMode::Builtins, &registry, &options)
        .unwrap()
        .to_bytes();

    c.bench_function("runtime from scratch", |b| {
        b.iter_with_large_drop(|| Vm::bootstrap(HeapConfig::default(), &registry).unwrap());
    });

    c.bench_function("runtime from snapshot", |b| {
        b.iter_with_large_drop(|| {
            let mut vm = Vm::new(HeapConfig::default());
            let view = ImageView::parse(&snapshot).unwrap();
            Snapshot::restore(&view, &mut vm, &registry, &options).unwrap();
            vm
        });
    });

    let mut program_vm = Vm::bootstrap(HeapConfig::default(), &registry).unwrap();
    let env = program_vm.global_env().as_address();
    let items: Vec<Value> = (0..1000)
        .map(|i| {
            let s = program_vm.new_string(&format!("item {}", i % 100)).unwrap();
            Value::encode_object(s)
        })
        .collect();
    let array = program_vm.new_array(&items).unwrap();
    program_vm.set_slot(env, 10, Value::encode_object(array));

    c.bench_function("take program snapshot", |b| {
        b.iter_with_large_drop(|| {
            Snapshot::take(&mut program_vm, SnapshotMode::Program, &registry, &options).unwrap()
        });
    });
}
