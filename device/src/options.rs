//! Compile-time options shared by the kernel compiler and the execution runtime.

use std::collections::BTreeMap;

/// Macro defines and warp candidates a kernel is compiled with.
///
/// Each define maps to an ordered list of literal values; a list with more than
/// one value describes a sweep the runtime may tune over. Options are immutable
/// once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CompileOptions {
    defines: Vec<(String, Vec<String>)>,
    num_warps: Vec<u32>,
}

impl CompileOptions {
    pub fn new(defines: Vec<(String, Vec<String>)>, num_warps: Vec<u32>) -> Self {
        Self { defines, num_warps }
    }

    /// Defines in insertion order.
    pub fn defines(&self) -> &[(String, Vec<String>)] {
        &self.defines
    }

    /// Literal values of a single define.
    pub fn define(&self, name: &str) -> Option<&[String]> {
        self.defines.iter().find(|(key, _)| key == name).map(|(_, values)| values.as_slice())
    }

    /// Warp (parallelism width) candidates.
    pub fn num_warps(&self) -> &[u32] {
        &self.num_warps
    }

    /// Number of distinct variants the runtime may compile from these options.
    pub fn variant_count(&self) -> usize {
        self.defines.iter().map(|(_, values)| values.len().max(1)).product::<usize>() * self.num_warps.len().max(1)
    }

    /// Metaparameters of the first variant: the first value of every define.
    pub fn metaparams(&self) -> Metaparams {
        Metaparams(
            self.defines
                .iter()
                .filter_map(|(name, values)| values.first().map(|value| (name.clone(), value.clone())))
                .collect(),
        )
    }

    /// Metaparameters of every define combination, the last define varying fastest.
    ///
    /// Warp candidates are not part of the metaparameters, so the result has one
    /// entry per define combination rather than [`variant_count`](Self::variant_count).
    pub fn variants(&self) -> Vec<Metaparams> {
        let mut variants = vec![Metaparams::new()];
        for (name, values) in self.defines.iter().filter(|(_, values)| !values.is_empty()) {
            variants = variants
                .iter()
                .flat_map(|meta| values.iter().map(move |value| meta.clone().with(name.clone(), value.clone())))
                .collect();
        }
        variants
    }

    /// Text form used across the native ABI: `NAME=v1,v2;NAME2=v|w1,w2`.
    pub fn encode(&self) -> String {
        let defines = self
            .defines
            .iter()
            .map(|(name, values)| format!("{name}={}", values.join(",")))
            .collect::<Vec<_>>()
            .join(";");
        let warps = self.num_warps.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        format!("{defines}|{warps}")
    }
}

/// Compile-time parameters of one kernel variant, as seen by dynamic grids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metaparams(BTreeMap<String, String>);

impl Metaparams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Integer value of a define, if present and numeric.
    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name)?.parse().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
