//! Interfaces of the collaborators a kernel cache drives.
//!
//! - **KernelCompiler**: turns kernel source into an argument signature and
//!   generates the glue source that wraps a signature into a loadable operator.
//! - **ExecutionRuntime**: owns the dynamic operator namespace, per-device kernel
//!   registration, grid and constant registries and the benchmark scalar store.
//! - **Operator**: a compiled, callable entry point living in that namespace.
//!
//! Everything is passed around as trait objects so that tests (and embedders) can
//! substitute in-memory implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use snafu::{OptionExt, ResultExt};
use tessera_dtype::Signature;

use crate::error::{InvalidLibraryPathSnafu, LibraryMetadataSnafu, ResolveLibrarySnafu, Result};
use crate::grid::GridTable;
use crate::launch::{BenchId, Constant, DeviceIndex, LaunchArg, OpId};
use crate::options::CompileOptions;

/// Arguments of a single operator call.
#[derive(Debug, Clone, Copy)]
pub struct OpCall<'a> {
    pub op_id: OpId,
    pub device: DeviceIndex,
    /// Number of benchmark repetitions, 0 for a plain launch.
    pub bench: u32,
    pub bench_id: BenchId,
    pub args: &'a [LaunchArg],
}

/// A compiled operator loaded into the runtime's namespace.
///
/// Launching enqueues work on the device queue and returns without waiting for
/// completion; kernels write their results into output buffers.
pub trait Operator: Send + Sync {
    fn launch(&self, call: &OpCall<'_>) -> Result<()>;

    /// Name the operator was looked up by (its signature key).
    fn name(&self) -> &str;
}

/// Produces signatures and glue source from kernel text.
pub trait KernelCompiler: Send + Sync {
    /// Positional argument types of the kernel in `source` compiled with `options`.
    fn signature_of(&self, source: &str, options: &CompileOptions) -> Result<Signature>;

    /// Glue source exporting an operator called `name` for `signature`.
    fn generate_glue(&self, name: &str, signature: &Signature) -> Result<String>;
}

/// The device execution runtime.
pub trait ExecutionRuntime: Send + Sync {
    /// The runtime's own native library, used for staleness checks and linking.
    fn library(&self) -> &RuntimeLibrary;

    /// Load a compiled artifact into the operator namespace.
    fn load_library(&self, path: &Path) -> Result<()>;

    /// Look up an operator previously made available by [`load_library`](Self::load_library).
    fn operator(&self, name: &str) -> Result<Arc<dyn Operator>>;

    /// Specialize a kernel for a device. Called once per (op, device) pair.
    fn register_kernel(
        &self,
        op_id: OpId,
        device: DeviceIndex,
        source: &str,
        options: &CompileOptions,
        runtime_path: &Path,
    ) -> Result<()>;

    /// Grid dimensions for every variant the runtime may pick for this launch.
    fn register_grid(&self, op_id: OpId, device: DeviceIndex, grid: &GridTable) -> Result<()>;

    fn register_constant(&self, op_id: OpId, name: &str, value: &Constant) -> Result<()>;

    /// Allocate a slot in the benchmark scalar store.
    fn alloc_bench_id(&self) -> BenchId;

    /// Read the scalar an operator recorded under `id`.
    fn retrieve_scalar(&self, id: BenchId) -> Result<f64>;
}

/// Location of the execution runtime's native library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLibrary {
    path: PathBuf,
    dir: PathBuf,
    link_name: String,
}

impl RuntimeLibrary {
    /// Resolve `path` (following symlinks) and derive the linker name from it,
    /// e.g. `/opt/rt/libtessera.so` links as `-ltessera`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path = path.canonicalize().context(ResolveLibrarySnafu { path })?;
        let dir = path.parent().context(InvalidLibraryPathSnafu { path: &path })?.to_path_buf();
        let file_name = path.file_name().and_then(|s| s.to_str()).context(InvalidLibraryPathSnafu { path: &path })?;
        let link_name = link_name(file_name).to_string();
        snafu::ensure!(!link_name.is_empty(), InvalidLibraryPathSnafu { path: &path });

        Ok(Self { path, dir, link_name })
    }

    /// Canonical path of the library file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Installation directory, used as the link search path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Header directory glue source is compiled against.
    pub fn include_dir(&self) -> PathBuf {
        self.dir.join("include")
    }

    pub fn link_name(&self) -> &str {
        &self.link_name
    }

    pub fn modified(&self) -> Result<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .context(LibraryMetadataSnafu { path: &self.path })
    }
}

/// Linker name of a shared library file: `libfoo-1.2.so.3` links as `-lfoo-1.2`.
fn link_name(file_name: &str) -> &str {
    let mut stem = file_name;
    // Numeric version suffixes after the extension, e.g. `.so.1.2`.
    while let Some((head, version)) = stem.rsplit_once('.')
        && !version.is_empty()
        && version.bytes().all(|b| b.is_ascii_digit())
    {
        stem = head;
    }
    let stem = stem.strip_suffix(".so").or_else(|| stem.strip_suffix(".dylib")).unwrap_or(stem);
    stem.strip_prefix("lib").unwrap_or(stem)
}
