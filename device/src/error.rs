use std::ffi::NulError;
use std::path::PathBuf;
use std::string::FromUtf8Error;

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors reported by the execution runtime, the kernel compiler, or the native
/// libraries that implement them.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Shared library could not be opened.
    #[snafu(display("failed to load shared library {}: {source}", path.display()))]
    Load { path: PathBuf, source: libloading::Error },

    /// Required symbol is missing from a loaded library.
    #[snafu(display("symbol '{name}' not found: {source}"))]
    Symbol { name: String, source: libloading::Error },

    /// No loaded library exports an operator with this name.
    #[snafu(display("operator '{name}' not found in any loaded library"))]
    OperatorNotFound { name: String },

    /// Runtime library path has no usable file name.
    #[snafu(display("invalid runtime library path: {}", path.display()))]
    InvalidLibraryPath { path: PathBuf },

    /// Runtime library path could not be resolved.
    #[snafu(display("failed to resolve runtime library {}: {source}", path.display()))]
    ResolveLibrary { path: PathBuf, source: std::io::Error },

    /// Runtime library metadata could not be read.
    #[snafu(display("failed to stat runtime library {}: {source}", path.display()))]
    LibraryMetadata { path: PathBuf, source: std::io::Error },

    /// A runtime entry point returned a non-zero status.
    #[snafu(display("{call} failed with status {code}"))]
    Status { call: &'static str, code: i32 },

    /// A compiled operator returned a non-zero status.
    #[snafu(display("operator '{name}' failed with status {code}"))]
    OperatorStatus { name: String, code: i32 },

    /// A string handed to native code contains an interior NUL byte.
    #[snafu(display("{what} contains an interior NUL byte: {source}"))]
    InteriorNul { what: &'static str, source: NulError },

    /// Native code returned text that is not UTF-8.
    #[snafu(display("{what} is not valid UTF-8: {source}"))]
    Utf8 { what: &'static str, source: FromUtf8Error },

    /// A dynamic grid returned a different number of dimensions for some variant.
    #[snafu(display("grid of variant {variant} has {found} dimensions, expected {expected}"))]
    GridRank { variant: usize, expected: usize, found: usize },

    /// A value does not fit the integer type of the native ABI.
    #[snafu(display("{what} does not fit the native ABI: {source}"))]
    OutOfRange { what: &'static str, source: std::num::TryFromIntError },

    /// Kernel compiler reported an argument type outside the closed set.
    #[snafu(display("invalid kernel signature: {source}"))]
    Signature { source: tessera_dtype::Error },

    /// Failure reported by a runtime implementation without a more specific kind.
    #[snafu(display("runtime error: {message}"))]
    Runtime { message: String },
}
