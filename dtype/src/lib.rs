//! Scalar data types and kernel argument-type tags.
//!
//! [`ScalarDType`] names the element types that a tensor library hands to kernels
//! (and that compile-time defines may refer to). [`ArgType`] is the closed set of
//! positional argument kinds a compiled operator accepts, and [`Signature`] is an
//! ordered sequence of them whose canonical encoding identifies a compiled variant.

pub mod arg;
pub mod error;
pub mod signature;


pub use arg::ArgType;
pub use error::{Error, Result};
pub use signature::{Signature, decode, encode};

/// Scalar data types (base numeric types).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::VariantArray)]
pub enum ScalarDType {
    Bool,

    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,

    Float16,
    BFloat16,
    Float32,
    Float64,
}

impl ScalarDType {
    /// Native type name used when this dtype appears as a compile-time define.
    ///
    /// Only the types the kernel language can name are mapped; everything else
    /// returns `None` and must be rejected by the caller.
    pub const fn define_name(&self) -> Option<&'static str> {
        match self {
            Self::Int8 => Some("char"),
            Self::Int16 => Some("short"),
            Self::Int32 => Some("int"),
            Self::Int64 => Some("long"),
            Self::Float16 => Some("half"),
            Self::Float32 => Some("float"),
            Self::Float64 => Some("double"),
            Self::Bool
            | Self::UInt8
            | Self::UInt16
            | Self::UInt32
            | Self::UInt64
            | Self::BFloat16 => None,
        }
    }
}
