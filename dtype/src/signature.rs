//! Canonical encoding of argument-type signatures.
//!
//! A signature key is the `_`-joined sequence of [`ArgType::code`]s, e.g.
//! `buf_buf_buf_i32`. No code contains `_`, so the encoding is injective: two
//! signatures share a key only if they hold the same tags in the same order.

use std::fmt;

use smallvec::SmallVec;

use crate::ArgType;
use crate::error::Result;

/// Key used for a signature with no arguments.
pub const EMPTY_KEY: &str = "noargs";

const SEPARATOR: char = '_';

/// Ordered argument types of a kernel, one per positional argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature(SmallVec<[ArgType; 8]>);

impl Signature {
    pub fn new(types: impl IntoIterator<Item = ArgType>) -> Self {
        Self(types.into_iter().collect())
    }

    /// Build a signature from raw tag codes, rejecting codes outside the closed set.
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        raw.iter().map(|&code| ArgType::from_code(code)).collect::<Result<_>>().map(Self)
    }

    pub fn types(&self) -> &[ArgType] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw tag codes, the inverse of [`Signature::from_raw`].
    pub fn to_raw(&self) -> Vec<u8> {
        self.0.iter().map(ArgType::raw).collect()
    }

    /// Canonical cache key for this signature.
    pub fn key(&self) -> String {
        encode(&self.0)
    }
}

impl FromIterator<ArgType> for Signature {
    fn from_iter<I: IntoIterator<Item = ArgType>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Encode an ordered sequence of argument types into a cache key.
pub fn encode(types: &[ArgType]) -> String {
    if types.is_empty() {
        return EMPTY_KEY.to_string();
    }

    let mut key = String::with_capacity(types.len() * 4);
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            key.push(SEPARATOR);
        }
        key.push_str(ty.code());
    }
    key
}

/// Decode a cache key produced by [`encode`].
pub fn decode(key: &str) -> Result<Signature> {
    if key == EMPTY_KEY {
        return Ok(Signature::default());
    }
    key.split(SEPARATOR).map(str::parse::<ArgType>).collect::<Result<_>>().map(Signature)
}
