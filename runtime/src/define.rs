//! Compile-time defines and their literal forms.
//!
//! Every define value becomes one or more source literals; a list yields one
//! literal per element, each of which is a candidate variant for the kernel.

use tessera_dtype::ScalarDType;
use tessera_device::CompileOptions;

use crate::error::{Result, UnsupportedDefineSnafu};

/// Value of a single compile-time define.
#[derive(Debug, Clone, PartialEq)]
pub enum DefineValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    DType(ScalarDType),
    Text(String),
    List(Vec<DefineValue>),
}

impl DefineValue {
    /// Literal forms of this value, in order.
    pub fn to_literals(&self, name: &str) -> Result<Vec<String>> {
        match self {
            Self::List(items) => {
                snafu::ensure!(!items.is_empty(), UnsupportedDefineSnafu { name, reason: "empty list" });
                items.iter().map(|item| item.to_scalar_literal(name)).collect()
            }
            scalar => Ok(vec![scalar.to_scalar_literal(name)?]),
        }
    }

    fn to_scalar_literal(&self, name: &str) -> Result<String> {
        match self {
            Self::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
            Self::Int(v) => Ok(v.to_string()),
            Self::UInt(v) => Ok(v.to_string()),
            Self::Float(v) => {
                snafu::ensure!(v.is_finite(), UnsupportedDefineSnafu { name, reason: format!("non-finite float {v}") });
                // Debug keeps the decimal point: 1.0 stays "1.0", not "1".
                Ok(format!("{v:?}"))
            }
            Self::DType(dtype) => dtype.define_name().map(str::to_string).ok_or_else(|| {
                UnsupportedDefineSnafu { name, reason: format!("dtype {dtype:?} has no C type name") }.build()
            }),
            Self::Text(s) => Ok(s.clone()),
            Self::List(_) => UnsupportedDefineSnafu { name, reason: "nested list" }.fail(),
        }
    }
}

impl From<bool> for DefineValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

macro_rules! impl_from_int {
    ($variant:ident: $($ty:ty),*) => {
        $(impl From<$ty> for DefineValue {
            fn from(v: $ty) -> Self {
                Self::$variant(v.into())
            }
        })*
    };
}

impl_from_int!(Int: i8, i16, i32, i64);
impl_from_int!(UInt: u8, u16, u32, u64);
impl_from_int!(Float: f32, f64);

impl From<ScalarDType> for DefineValue {
    fn from(v: ScalarDType) -> Self {
        Self::DType(v)
    }
}

impl From<&str> for DefineValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for DefineValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<DefineValue>> From<Vec<T>> for DefineValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// Ordered set of named defines.
///
/// Names keep their first insertion position; setting a name again replaces its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Defines(Vec<(String, DefineValue)>);

impl Defines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<DefineValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<DefineValue>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DefineValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DefineValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Convert to compile options with the given warp candidates.
    pub fn to_options(&self, num_warps: Vec<u32>) -> Result<CompileOptions> {
        let defines = self
            .0
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.to_literals(name)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(CompileOptions::new(defines, num_warps))
    }
}

impl<K: Into<String>, V: Into<DefineValue>> FromIterator<(K, V)> for Defines {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut defines = Self::new();
        for (name, value) in iter {
            defines.set(name, value);
        }
        defines
    }
}
