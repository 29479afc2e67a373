//! Values passed across the launch protocol: identifiers, positional arguments
//! and constant payloads.

use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use half::f16;
use snafu::ResultExt;
use tessera_dtype::ArgType;

use crate::error::{OutOfRangeSnafu, Result};

/// Index of a physical compute device.
pub type DeviceIndex = u32;

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identifier of a kernel, the join key into runtime registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u64);

impl OpId {
    /// Allocate a fresh id. Ids are never reused within a process.
    pub fn next() -> Self {
        Self(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Slot in the runtime's benchmark scalar store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BenchId(i64);

impl BenchId {
    /// Passed to operators when no benchmark was requested.
    pub const NONE: Self = Self(-1);

    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 < 0
    }
}

/// Opaque device buffer handed to a kernel by the tensor library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRef {
    ptr: *mut c_void,
    device: DeviceIndex,
}

// SAFETY: BufferRef never dereferences the pointer; it only carries the address
// to the operator, which runs on the device queue that owns the memory.
unsafe impl Send for BufferRef {}
unsafe impl Sync for BufferRef {}

impl BufferRef {
    pub fn new(ptr: *mut c_void, device: DeviceIndex) -> Self {
        Self { ptr, device }
    }

    /// Reference host memory, e.g. for CPU devices or tests.
    pub fn host<T>(data: &mut [T], device: DeviceIndex) -> Self {
        Self { ptr: data.as_mut_ptr().cast(), device }
    }

    pub fn ptr(&self) -> *mut c_void {
        self.ptr
    }

    pub fn device(&self) -> DeviceIndex {
        self.device
    }
}

/// One positional kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaunchArg {
    Int1(bool),
    Int8(i8),
    Int32(i32),
    Int64(i64),
    Half(f16),
    Float(f32),
    Double(f64),
    Buffer(BufferRef),
}

impl LaunchArg {
    pub fn arg_type(&self) -> ArgType {
        match self {
            Self::Int1(_) => ArgType::Int1,
            Self::Int8(_) => ArgType::Int8,
            Self::Int32(_) => ArgType::Int32,
            Self::Int64(_) => ArgType::Int64,
            Self::Half(_) => ArgType::Half,
            Self::Float(_) => ArgType::Float,
            Self::Double(_) => ArgType::Double,
            Self::Buffer(_) => ArgType::Buffer,
        }
    }

    /// Device of a buffer argument; scalars live nowhere in particular.
    pub fn device(&self) -> Option<DeviceIndex> {
        match self {
            Self::Buffer(buffer) => Some(buffer.device()),
            _ => None,
        }
    }

    /// C-ABI form handed to compiled operators.
    pub fn to_raw(&self) -> Result<RawArg> {
        let value = match *self {
            Self::Int1(v) => v as u64,
            Self::Int8(v) => v as i64 as u64,
            Self::Int32(v) => v as i64 as u64,
            Self::Int64(v) => v as u64,
            Self::Half(v) => v.to_bits() as u64,
            Self::Float(v) => v.to_bits() as u64,
            Self::Double(v) => v.to_bits(),
            Self::Buffer(buffer) => buffer.ptr() as usize as u64,
        };
        let device = match self.device() {
            Some(device) => i32::try_from(device).context(OutOfRangeSnafu { what: "buffer device index" })?,
            None => -1,
        };
        Ok(RawArg { tag: u32::from(self.arg_type().raw()), device, value })
    }
}

macro_rules! impl_launch_arg_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for LaunchArg {
            fn from(value: $ty) -> Self {
                Self::$variant(value)
            }
        })*
    };
}

impl_launch_arg_from! {
    bool => Int1, i8 => Int8, i32 => Int32, i64 => Int64,
    f16 => Half, f32 => Float, f64 => Double, BufferRef => Buffer,
}

/// `tessera_arg` as laid out for native operators.
///
/// Integers are sign-extended into `value`, floats are stored as their IEEE bit
/// patterns and buffers as their address. `device` is `-1` for scalars.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawArg {
    pub tag: u32,
    pub device: i32,
    pub value: u64,
}

/// Constant payload registered against a kernel, in little-endian byte order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constant(Vec<u8>);

impl Constant {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Constant {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Constant {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

macro_rules! impl_constant_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Constant {
                fn from(value: $ty) -> Self {
                    Self(value.to_le_bytes().to_vec())
                }
            }

            impl From<&[$ty]> for Constant {
                fn from(values: &[$ty]) -> Self {
                    Self(values.iter().flat_map(|v| v.to_le_bytes()).collect())
                }
            }
        )*
    };
}

impl_constant_from!(i8, i16, i32, i64, u16, u32, u64, f16, f32, f64);
