//! Just-in-time build and dispatch cache for compute kernels.
//!
//! A [`Kernel`] is built from kernel source and compile-time [`Defines`]. Its
//! argument signature (reported by the kernel compiler) identifies a native
//! operator; the [`ArtifactCache`] keeps one compiled artifact per signature on
//! disk and rebuilds it when the execution runtime's library is newer. Launching a
//! kernel specializes it for the target device on first use and forwards the call
//! to the operator.
//!
//! # Concurrency
//!
//! Builds of the same signature are serialized by an OS file lock on the cache
//! entry, so concurrent threads and processes compile each artifact once. Device
//! registration is guarded per kernel.

pub mod artifact_cache;
pub mod config;
pub mod define;
pub mod device_registry;
pub mod error;
pub mod jit;
pub mod kernel;
pub mod launch;
pub mod lock;
pub mod toolchain;


pub use artifact_cache::{ArtifactCache, CacheEntry};
pub use config::JitConfig;
pub use define::{DefineValue, Defines};
pub use device_registry::RegisteredDevices;
pub use error::*;
pub use jit::Jit;
pub use kernel::{DEFAULT_NUM_WARPS, Kernel};
pub use launch::{LaunchOptions, LaunchOutcome, LaunchRequest, dispatch};
pub use lock::BuildLock;
pub use toolchain::{Invocation, NativeOpBuilder, SystemToolchain, Toolchain};

pub use tessera_device::{BenchId, BufferRef, Constant, DeviceIndex, Grid, GridTable, LaunchArg, OpId, cdiv};
pub use tessera_dtype::{ArgType, ScalarDType, Signature};
