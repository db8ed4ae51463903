use heapsnap::heap::space::SpaceKind;
use heapsnap::options::Options;
use heapsnap::runtime::native::{NativeEntry, NativeRegistry};
use heapsnap::runtime::program::{MethodLiteral, Program};
use heapsnap::runtime::type_info::{ObjectKind, SlotKind};
use heapsnap::runtime::value::Value;
use heapsnap::runtime::vm::Vm;
use heapsnap::snapshot::image::MappedImage;
use heapsnap::snapshot::{Snapshot, SnapshotMode};
use heapsnap::Result;
use structopt::StructOpt;

extern "C" fn native_print() {}
extern "C" fn native_gc() {}
extern "C" fn native_now() {}

/// Base of the demo program's method-literal array.
const PROGRAM_BASE: u64 = 0x7f00_0000_0000;
const PROGRAM_METHODS: usize = 4;

fn natives() -> NativeRegistry {
    NativeRegistry::from_entries(&[
        NativeEntry {
            name: "print",
            address: native_print as *const () as usize as u64,
        },
        NativeEntry {
            name: "gc",
            address: native_gc as *const () as usize as u64,
        },
        NativeEntry {
            name: "now",
            address: native_now as *const () as usize as u64,
        },
    ])
}

fn demo_program() -> Program {
    let methods = (0..PROGRAM_METHODS as u32)
        .map(|id| MethodLiteral {
            id,
            num_args: id % 3,
            num_vregs: 4 + id,
            code_size: 64 * (id + 1),
            code_offset: 0x1000 * id as u64,
            flags: 0,
        })
        .collect();
    Program::new(PROGRAM_BASE, methods)
}

/// Populates `vm` with something worth snapshotting in `mode`.
fn build_demo_graph(vm: &mut Vm, mode: SnapshotMode) -> Result<()> {
    let env = vm.global_env().as_address();
    let greeting = vm.intern("hello")?;
    let world = vm.new_string(", world")?;
    let rope = vm.new_tree_string(greeting, world)?;
    let point_shape = vm.new_shape(
        ObjectKind::Plain,
        &[SlotKind::Tagged, SlotKind::Tagged, SlotKind::Double],
    )?;
    let point = vm.new_object_in(SpaceKind::Old, point_shape)?;
    vm.set_slot(point, 0, Value::new_int(3));
    vm.set_slot(point, 1, Value::encode_object(rope));
    vm.set_double_slot(point, 2, 0.5);
    let list = vm.new_array(&[
        Value::encode_object(point),
        Value::encode_object(greeting),
        Value::true_(),
    ])?;

    match mode {
        SnapshotMode::Builtins => {
            vm.set_slot(env, 12, Value::encode_object(list));
        }
        SnapshotMode::Program => {
            let program = demo_program();
            let closure_shape =
                vm.new_shape(ObjectKind::Plain, &[SlotKind::Tagged, SlotKind::Native])?;
            let closure = vm.new_object(closure_shape)?;
            vm.set_slot(closure, 0, Value::encode_object(list));
            vm.set_native_slot(closure, 1, program.method_address(2));
            vm.set_program(program);
            vm.set_slot(env, 12, Value::encode_object(closure));
        }
        SnapshotMode::Aot => {
            let table = vm.new_array_in(
                SpaceKind::Old,
                &[Value::encode_object(list), Value::new_double(2.5)],
            )?;
            vm.set_aot_root(Value::encode_object(table));
        }
    }
    Ok(())
}

fn run(options: &Options) -> Result<()> {
    let registry = natives();
    let snapshot_options = options.snapshot_options();

    let mut vm = Vm::bootstrap(options.heap_config(), &registry)?;
    build_demo_graph(&mut vm, options.mode)?;
    let snapshot = Snapshot::take(&mut vm, options.mode, &registry, &snapshot_options)?;
    snapshot.write_to_file(&options.out)?;
    println!(
        "wrote {} ({} objects, {} regions, {} strings, {} methods)",
        options.out.display(),
        snapshot.stats.objects,
        snapshot.stats.regions,
        snapshot.stats.strings,
        snapshot.stats.methods
    );

    let mapped = MappedImage::open(&options.out)?;
    let mut fresh = match options.mode {
        SnapshotMode::Builtins => Vm::new(options.heap_config()),
        SnapshotMode::Program | SnapshotMode::Aot => Vm::bootstrap(options.heap_config(), &registry)?,
    };
    if options.mode == SnapshotMode::Program {
        fresh.set_program(Program::with_capacity(PROGRAM_BASE, PROGRAM_METHODS));
    }
    let stats = Snapshot::restore(&mapped.view()?, &mut fresh, &registry, &snapshot_options)?;
    println!(
        "restored {} bytes: {} regions, {} objects, {} strings interned, {} reused, {} methods, {} roots",
        mapped.len(),
        stats.regions,
        stats.objects,
        stats.strings_interned,
        stats.strings_reused,
        stats.methods,
        stats.roots
    );
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let options = Options::from_args();
    if let Err(error) = run(&options) {
        log::error!("{}", error);
        std::process::exit(1);
    }
}
