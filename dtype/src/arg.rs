//! Positional argument tags understood by compiled operators.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, UnknownCodeSnafu, UnknownTagSnafu};

/// Kind of a single positional kernel argument.
///
/// The discriminants are the raw codes the kernel compiler reports, so
/// [`ArgType::from_code`] is the only place a foreign tag can enter the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::VariantArray, strum::FromRepr)]
#[repr(u8)]
pub enum ArgType {
    /// 1-bit integer (boolean).
    Int1 = 0,
    Int8 = 1,
    Int32 = 2,
    Int64 = 3,
    /// IEEE half precision.
    Half = 4,
    Float = 5,
    Double = 6,
    /// Opaque device buffer.
    Buffer = 7,
}

impl ArgType {
    /// Short code used in cache keys.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Int1 => "i1",
            Self::Int8 => "i8",
            Self::Int32 => "i32",
            Self::Int64 => "i64",
            Self::Half => "f16",
            Self::Float => "f32",
            Self::Double => "f64",
            Self::Buffer => "buf",
        }
    }

    /// Decode a raw tag reported by the kernel compiler.
    pub fn from_code(raw: u8) -> Result<Self, Error> {
        Self::from_repr(raw).ok_or_else(|| UnknownTagSnafu { raw }.build())
    }

    pub const fn raw(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ArgType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i1" => Ok(Self::Int1),
            "i8" => Ok(Self::Int8),
            "i32" => Ok(Self::Int32),
            "i64" => Ok(Self::Int64),
            "f16" => Ok(Self::Half),
            "f32" => Ok(Self::Float),
            "f64" => Ok(Self::Double),
            "buf" => Ok(Self::Buffer),
            _ => UnknownCodeSnafu { code: s }.fail(),
        }
    }
}
