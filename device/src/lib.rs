//! Collaborator interfaces of the kernel cache.
//!
//! This crate describes what the cache needs from the outside world: a kernel
//! compiler that reports signatures and glue source, and a device execution
//! runtime that loads operators, keeps per-device registrations and stores
//! benchmark results. [`dylib`] binds both to a native library over a C ABI.

pub mod dylib;
pub mod error;
pub mod grid;
pub mod launch;
pub mod options;
pub mod runtime;


pub use dylib::{DylibRuntime, NativeNamespace, NativeOperator};
pub use error::{Error, Result};
pub use grid::{Grid, GridDims, GridFn, GridTable, cdiv};
pub use launch::{BenchId, BufferRef, Constant, DeviceIndex, LaunchArg, OpId, RawArg};
pub use options::{CompileOptions, Metaparams};
pub use runtime::{ExecutionRuntime, KernelCompiler, OpCall, Operator, RuntimeLibrary};
