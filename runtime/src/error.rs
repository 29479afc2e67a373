//! Error types for building and dispatching kernels.

use std::path::PathBuf;
use std::time::Duration;

use snafu::Snafu;
use tessera_device::OpId;

/// Result type for runtime operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of [`Error`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Argument type outside the closed tag set.
    Signature,
    /// Toolchain failure or filesystem failure while populating a cache entry.
    Build,
    /// Invalid use of the API, detected before any native interaction.
    Configuration,
    /// Build lock could not be acquired or released.
    Lock,
    /// Failure reported by the execution runtime or kernel compiler.
    Runtime,
}

/// Errors that can occur while building, caching or launching kernels.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Kernel signature contains an unknown argument type.
    #[snafu(display("invalid signature: {source}"))]
    Signature { source: tessera_dtype::Error },

    /// Cache entry directory could not be created.
    #[snafu(display("failed to create cache directory {}: {source}", path.display()))]
    CreateDirectory { path: PathBuf, source: std::io::Error },

    /// Glue source could not be written into its cache entry.
    #[snafu(display("failed to write {}: {source}", path.display()))]
    WriteSource { path: PathBuf, source: std::io::Error },

    /// Cache file metadata could not be read.
    #[snafu(display("failed to stat {}: {source}", path.display()))]
    Metadata { path: PathBuf, source: std::io::Error },

    /// Toolchain executable could not be started.
    #[snafu(display("failed to run {program}: {source}. Is a C++ compiler installed?"))]
    ToolchainSpawn { program: String, source: std::io::Error },

    /// Toolchain exited unsuccessfully.
    #[snafu(display("{program} failed ({status}):\n{stderr}"))]
    ToolchainFailed { program: String, status: String, stderr: String },

    /// Toolchain did not finish before the configured deadline and was killed.
    #[snafu(display("{program} did not finish within {timeout:?}"))]
    ToolchainTimeout { program: String, timeout: Duration },

    /// Scratch file for the compiler output could not be created.
    #[snafu(display("failed to create build output in {}: {source}", dir.display()))]
    BuildOutput { dir: PathBuf, source: std::io::Error },

    /// Compiled artifact could not be moved into place.
    #[snafu(display("failed to persist artifact {}: {source}", path.display()))]
    PersistArtifact { path: PathBuf, source: std::io::Error },

    /// Cache entry could not be removed.
    #[snafu(display("failed to evict {}: {source}", path.display()))]
    Evict { path: PathBuf, source: std::io::Error },

    /// Build lock could not be acquired.
    #[snafu(display("failed to lock {}: {source}", path.display()))]
    LockAcquire { path: PathBuf, source: std::io::Error },

    /// Build lock could not be released.
    #[snafu(display("failed to unlock {}: {source}", path.display()))]
    LockRelease { path: PathBuf, source: std::io::Error },

    /// Launch without a grid.
    #[snafu(display("must provide grid for kernel launch ({op_id})"))]
    MissingGrid { op_id: OpId },

    /// Launch without any buffer argument to infer the device from.
    #[snafu(display("cannot infer launch device for {op_id}: no buffer argument"))]
    NoDevice { op_id: OpId },

    /// Define value has no literal form.
    #[snafu(display("unsupported value for define '{name}': {reason}"))]
    UnsupportedDefine { name: String, reason: String },

    /// Default cache root needs a home directory.
    #[snafu(display("cannot determine home directory for the kernel cache"))]
    NoHomeDirectory,

    /// Execution runtime or kernel compiler failure.
    #[snafu(display("{source}"))]
    Runtime { source: tessera_device::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Signature { .. } => ErrorKind::Signature,
            Self::CreateDirectory { .. }
            | Self::WriteSource { .. }
            | Self::Metadata { .. }
            | Self::ToolchainSpawn { .. }
            | Self::ToolchainFailed { .. }
            | Self::ToolchainTimeout { .. }
            | Self::BuildOutput { .. }
            | Self::PersistArtifact { .. }
            | Self::Evict { .. } => ErrorKind::Build,
            Self::LockAcquire { .. } | Self::LockRelease { .. } => ErrorKind::Lock,
            Self::MissingGrid { .. }
            | Self::NoDevice { .. }
            | Self::UnsupportedDefine { .. }
            | Self::NoHomeDirectory
            | Self::Runtime { source: tessera_device::Error::GridRank { .. } } => ErrorKind::Configuration,
            // Signature problems reported through the compiler keep their kind.
            Self::Runtime { source: tessera_device::Error::Signature { .. } } => ErrorKind::Signature,
            Self::Runtime { .. } => ErrorKind::Runtime,
        }
    }
}

impl From<tessera_device::Error> for Error {
    fn from(source: tessera_device::Error) -> Self {
        Self::Runtime { source }
    }
}
