//! Launch protocol.
//!
//! A launch validates the grid, infers the device from the first buffer argument,
//! resolves the grid for every variant of the kernel, specializes the kernel for
//! that device on first use, registers the grid and forwards the call to the
//! operator. Launches are fire-and-forget: the operator
//! enqueues work and results land in the output buffers. With `bench > 0` the
//! operator also records a timing scalar that is read back before returning.

use snafu::OptionExt;
use tessera_device::{BenchId, DeviceIndex, Grid, GridTable, LaunchArg, OpCall, OpId};

use crate::error::{MissingGridSnafu, NoDeviceSnafu, Result};
use crate::kernel::Kernel;

/// Per-launch options.
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct LaunchOptions {
    /// Launch grid. Required.
    #[builder(into)]
    pub grid: Option<Grid>,
    /// Benchmark repetitions, 0 for a plain launch.
    #[builder(default)]
    pub bench: u32,
}

impl LaunchOptions {
    /// Plain launch over `grid`.
    pub fn with_grid(grid: impl Into<Grid>) -> Self {
        Self { grid: Some(grid.into()), bench: 0 }
    }
}

/// What a launch produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaunchOutcome {
    /// Work was enqueued; results appear in the output buffers.
    Enqueued,
    /// Scalar the operator recorded while benchmarking.
    Benchmark(f64),
}

impl LaunchOutcome {
    pub fn benchmark(&self) -> Option<f64> {
        match self {
            Self::Benchmark(value) => Some(*value),
            Self::Enqueued => None,
        }
    }
}

/// A fully resolved launch, as handed to the operator.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub op_id: OpId,
    pub device: DeviceIndex,
    pub bench: u32,
    pub bench_id: BenchId,
    pub args: &'a [LaunchArg],
    /// Grid dimensions per variant, resolved for this launch.
    pub grid: &'a GridTable,
}

impl<'a> LaunchRequest<'a> {
    pub fn call(&self) -> OpCall<'a> {
        OpCall { op_id: self.op_id, device: self.device, bench: self.bench, bench_id: self.bench_id, args: self.args }
    }
}

/// Device of the first buffer argument.
pub fn infer_device(args: &[LaunchArg]) -> Option<DeviceIndex> {
    args.iter().find_map(LaunchArg::device)
}

/// Launch `kernel` with positional `args`.
pub fn dispatch(kernel: &Kernel, args: &[LaunchArg], options: &LaunchOptions) -> Result<LaunchOutcome> {
    let op_id = kernel.op_id();
    let grid = options.grid.as_ref().context(MissingGridSnafu { op_id })?;
    let device = infer_device(args).context(NoDeviceSnafu { op_id })?;
    let grid = grid.resolve_all(kernel.options())?;
    let runtime = kernel.runtime();

    let registered = kernel.devices().register_once(device, || {
        runtime.register_kernel(op_id, device, kernel.source(), kernel.options(), runtime.library().path())?;
        Ok(())
    })?;
    if registered {
        tracing::debug!(kernel.op = %op_id, kernel.device = device, "registered kernel on device");
    }

    let bench_id = if options.bench > 0 { runtime.alloc_bench_id() } else { BenchId::NONE };
    let request = LaunchRequest { op_id, device, bench: options.bench, bench_id, args, grid: &grid };

    runtime.register_grid(op_id, device, request.grid)?;
    tracing::debug!(
        kernel.op = %op_id,
        kernel.device = device,
        launch.args = args.len(),
        launch.bench = options.bench,
        "launching kernel"
    );
    kernel.operator().launch(&request.call())?;

    if options.bench > 0 {
        let value = runtime.retrieve_scalar(request.bench_id)?;
        return Ok(LaunchOutcome::Benchmark(value));
    }
    Ok(LaunchOutcome::Enqueued)
}
