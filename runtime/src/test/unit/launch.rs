//! Launch protocol against the fake runtime.

use crate::test::fakes::{Call, Fixture};
use crate::{
    BenchId, BufferRef, Defines, ErrorKind, Grid, Kernel, LaunchArg, LaunchOptions, LaunchOutcome, ScalarDType, cdiv,
};

const ADD_KERNEL: &str = "buf_buf_buf_i32\nadd(x, y, out, n)";

fn add_args(x: &mut [f32], y: &mut [f32], out: &mut [f32], device: u32) -> Vec<LaunchArg> {
    let n = out.len() as i32;
    vec![
        BufferRef::host(x, device).into(),
        BufferRef::host(y, device).into(),
        BufferRef::host(out, device).into(),
        n.into(),
    ]
}

#[test]
fn test_missing_grid_touches_nothing() {
    let fx = Fixture::new();
    let kernel = Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();
    let before = fx.runtime.calls().len();

    let (mut x, mut y, mut out) = ([1.0f32; 8], [2.0f32; 8], [0.0f32; 8]);
    let err = kernel.launch(&add_args(&mut x, &mut y, &mut out, 0), &LaunchOptions::default()).unwrap_err();

    assert!(matches!(err, crate::Error::MissingGrid { op_id } if op_id == kernel.op_id()));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(fx.runtime.calls().len(), before);
    assert!(kernel.registered_devices().is_empty());
}

#[test]
fn test_launch_without_buffer_has_no_device() {
    let fx = Fixture::new();
    let kernel = Kernel::builder(&fx.jit(), "i32\nnoop(n)").build().unwrap();
    let before = fx.runtime.calls().len();

    let err = kernel.launch(&[LaunchArg::from(4i32)], &LaunchOptions::with_grid([1])).unwrap_err();
    assert!(matches!(err, crate::Error::NoDevice { .. }));
    assert_eq!(fx.runtime.calls().len(), before);
}

#[test]
fn test_device_registration_is_idempotent() {
    let fx = Fixture::new();
    let kernel = Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();
    let (mut x, mut y, mut out) = ([1.0f32; 8], [2.0f32; 8], [0.0f32; 8]);
    let options = LaunchOptions::with_grid([1]);

    for _ in 0..3 {
        let outcome = kernel.launch(&add_args(&mut x, &mut y, &mut out, 0), &options).unwrap();
        assert_eq!(outcome, LaunchOutcome::Enqueued);
    }
    kernel.launch(&add_args(&mut x, &mut y, &mut out, 1), &options).unwrap();

    let op_id = kernel.op_id();
    assert_eq!(fx.runtime.count(|c| matches!(c, Call::RegisterKernel { .. })), 2);
    assert_eq!(
        fx.runtime.count(|c| matches!(c, Call::RegisterKernel { op_id: id, device: 0 } if *id == op_id)),
        1
    );
    assert_eq!(fx.runtime.count(|c| matches!(c, Call::RegisterGrid { .. })), 4);
    assert_eq!(fx.runtime.count(|c| matches!(c, Call::Launch { .. })), 4);
    assert_eq!(kernel.registered_devices(), vec![0, 1]);
}

#[test]
fn test_launch_call_order() {
    let fx = Fixture::new();
    let kernel = Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();
    let before = fx.runtime.calls().len();
    let (mut x, mut y, mut out) = ([1.0f32; 4], [2.0f32; 4], [0.0f32; 4]);

    kernel.launch(&add_args(&mut x, &mut y, &mut out, 3), &LaunchOptions::with_grid([2, 2])).unwrap();

    let op_id = kernel.op_id();
    assert_eq!(
        fx.runtime.calls()[before..],
        [
            Call::RegisterKernel { op_id, device: 3 },
            Call::RegisterGrid { op_id, device: 3, rows: vec![vec![2, 2]] },
            Call::Launch { op_id, device: 3, bench: 0, bench_id: BenchId::NONE, nargs: 4 },
        ]
    );
}

#[test]
fn test_failed_registration_is_not_recorded() {
    let fx = Fixture::new();
    let kernel = Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();
    let (mut x, mut y, mut out) = ([1.0f32; 4], [2.0f32; 4], [0.0f32; 4]);
    let options = LaunchOptions::with_grid([1]);

    fx.runtime.fail_next_registration();
    let err = kernel.launch(&add_args(&mut x, &mut y, &mut out, 0), &options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert!(kernel.registered_devices().is_empty());
    assert_eq!(fx.runtime.count(|c| matches!(c, Call::Launch { .. })), 0);

    kernel.launch(&add_args(&mut x, &mut y, &mut out, 0), &options).unwrap();
    assert_eq!(kernel.registered_devices(), vec![0]);
}

#[test]
fn test_benchmark_launch_reads_back_scalar() {
    let fx = Fixture::new();
    let kernel = Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();
    let (mut x, mut y, mut out) = ([1.0f32; 4], [2.0f32; 4], [0.0f32; 4]);

    let options = LaunchOptions::builder().grid([1]).bench(10).build();
    let first = kernel.launch(&add_args(&mut x, &mut y, &mut out, 0), &options).unwrap();
    let second = kernel.launch(&add_args(&mut x, &mut y, &mut out, 0), &options).unwrap();

    // Fake scalars are `id + 0.25` with ids handed out from zero.
    assert_eq!(first, LaunchOutcome::Benchmark(0.25));
    assert_eq!(second.benchmark(), Some(1.25));

    let launches: Vec<_> = fx
        .runtime
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Launch { bench, bench_id, .. } => Some((bench, bench_id)),
            _ => None,
        })
        .collect();
    assert_eq!(launches, vec![(10, BenchId::new(0)), (10, BenchId::new(1))]);
    assert_eq!(fx.runtime.count(|c| matches!(c, Call::RetrieveScalar(_))), 2);
}

#[test]
fn test_plain_launch_skips_benchmark_store() {
    let fx = Fixture::new();
    let kernel = Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();
    let (mut x, mut y, mut out) = ([1.0f32; 4], [2.0f32; 4], [0.0f32; 4]);

    let outcome = kernel.launch(&add_args(&mut x, &mut y, &mut out, 0), &LaunchOptions::with_grid([1])).unwrap();
    assert_eq!(outcome.benchmark(), None);
    assert_eq!(fx.runtime.count(|c| matches!(c, Call::AllocBenchId(_) | Call::RetrieveScalar(_))), 0);
}

fn registered_grids(fx: &Fixture) -> Vec<Vec<Vec<usize>>> {
    fx.runtime
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::RegisterGrid { rows, .. } => Some(rows),
            _ => None,
        })
        .collect()
}

#[test]
fn test_dynamic_grid_resolves_every_variant() {
    let fx = Fixture::new();
    let defines = Defines::new().with("BLOCK", vec![1024, 512]).with("TYPE", vec![ScalarDType::Float32]);
    let kernel = Kernel::builder(&fx.jit(), ADD_KERNEL).defines(defines).num_warps(vec![4, 8]).build().unwrap();

    let n = 98_432;
    let mut x = vec![0.0f32; n];
    let mut y = vec![0.0f32; n];
    let mut out = vec![0.0f32; n];
    let grid = Grid::dynamic(move |meta| [cdiv(n, meta.int("BLOCK").unwrap_or(1) as usize)]);
    kernel.launch(&add_args(&mut x, &mut y, &mut out, 0), &LaunchOptions::builder().grid(grid).build()).unwrap();

    // Each BLOCK value covers all `n` elements with its own grid.
    assert_eq!(registered_grids(&fx), vec![vec![vec![97], vec![193]]]);
}

#[test]
fn test_dynamic_grid_is_resolved_per_launch() {
    let fx = Fixture::new();
    let defines = Defines::new().with("BLOCK", vec![64, 32]);
    let kernel = Kernel::builder(&fx.jit(), ADD_KERNEL).defines(defines).build().unwrap();

    for n in [64, 128] {
        let (mut x, mut y, mut out) = (vec![0.0f32; n], vec![0.0f32; n], vec![0.0f32; n]);
        let grid = Grid::dynamic(move |meta| [cdiv(n, meta.int("BLOCK").unwrap() as usize)]);
        kernel.launch(&add_args(&mut x, &mut y, &mut out, 0), &LaunchOptions::builder().grid(grid).build()).unwrap();
    }

    assert_eq!(registered_grids(&fx), vec![vec![vec![1], vec![2]], vec![vec![2], vec![4]]]);
}

#[test]
fn test_grid_rank_mismatch_touches_nothing() {
    let fx = Fixture::new();
    let defines = Defines::new().with("BLOCK", vec![64, 32]);
    let kernel = Kernel::builder(&fx.jit(), ADD_KERNEL).defines(defines).build().unwrap();
    let before = fx.runtime.calls().len();

    let grid = Grid::dynamic(|meta| vec![1; if meta.int("BLOCK") == Some(64) { 1 } else { 2 }]);
    let (mut x, mut y, mut out) = ([1.0f32; 4], [2.0f32; 4], [0.0f32; 4]);
    let options = LaunchOptions::builder().grid(grid).build();
    let err = kernel.launch(&add_args(&mut x, &mut y, &mut out, 0), &options).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(fx.runtime.calls().len(), before);
    assert!(kernel.registered_devices().is_empty());
}

#[test]
fn test_concurrent_first_launch_registers_once() {
    let fx = Fixture::new();
    let kernel = Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let (mut x, mut y, mut out) = ([1.0f32; 4], [2.0f32; 4], [0.0f32; 4]);
                kernel.launch(&add_args(&mut x, &mut y, &mut out, 2), &LaunchOptions::with_grid([1])).unwrap();
            });
        }
    });

    assert_eq!(fx.runtime.count(|c| matches!(c, Call::RegisterKernel { .. })), 1);
    assert_eq!(fx.runtime.count(|c| matches!(c, Call::Launch { .. })), 8);
}
