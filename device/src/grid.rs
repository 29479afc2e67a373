//! Launch grids: how many kernel instances run in parallel.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use snafu::ensure;

use crate::error::{GridRankSnafu, Result};
use crate::options::{CompileOptions, Metaparams};

/// Grid dimensions; kernels rarely use more than three.
pub type GridDims = SmallVec<[usize; 3]>;

/// Grid computed from the metaparameters of the variant being launched.
pub type GridFn = Arc<dyn Fn(&Metaparams) -> GridDims + Send + Sync>;

/// Launch grid, either fixed or derived from compile-time metaparameters.
///
/// Dynamic grids are resolved on every launch for each variant the runtime may
/// pick, since e.g. `BLOCK` differs between them.
#[derive(Clone)]
pub enum Grid {
    Fixed(GridDims),
    Dynamic(GridFn),
}

impl Grid {
    pub fn fixed(dims: impl IntoIterator<Item = usize>) -> Self {
        Self::Fixed(dims.into_iter().collect())
    }

    pub fn dynamic<F, D>(f: F) -> Self
    where
        F: Fn(&Metaparams) -> D + Send + Sync + 'static,
        D: IntoIterator<Item = usize>,
    {
        Self::Dynamic(Arc::new(move |meta| f(meta).into_iter().collect()))
    }

    pub fn resolve(&self, meta: &Metaparams) -> GridDims {
        match self {
            Self::Fixed(dims) => dims.clone(),
            Self::Dynamic(f) => f(meta),
        }
    }

    /// Resolve against every variant of `options`.
    ///
    /// A fixed grid yields a single row that applies to all variants.
    pub fn resolve_all(&self, options: &CompileOptions) -> Result<GridTable> {
        match self {
            Self::Fixed(dims) => GridTable::from_rows([dims.clone()]),
            Self::Dynamic(_) => GridTable::from_rows(options.variants().iter().map(|meta| self.resolve(meta))),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }
}

/// Grid dimensions of every variant, in [`CompileOptions::variants`] order.
///
/// All rows share one rank; the dimensions are stored row-major, which is also
/// how they cross the native ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridTable {
    rank: usize,
    rows: usize,
    dims: Vec<usize>,
}

impl GridTable {
    pub fn from_rows(rows: impl IntoIterator<Item = GridDims>) -> Result<Self> {
        let mut table = Self { rank: 0, rows: 0, dims: Vec::new() };
        for (variant, row) in rows.into_iter().enumerate() {
            if variant == 0 {
                table.rank = row.len();
            }
            ensure!(row.len() == table.rank, GridRankSnafu { variant, expected: table.rank, found: row.len() });
            table.dims.extend_from_slice(&row);
            table.rows += 1;
        }
        Ok(table)
    }

    /// Dimensions per row.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of rows: 1 for a fixed grid, one per variant otherwise.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn row(&self, index: usize) -> Option<&[usize]> {
        (index < self.rows).then(|| &self.dims[index * self.rank..(index + 1) * self.rank])
    }

    pub fn rows(&self) -> impl Iterator<Item = &[usize]> {
        (0..self.rows).filter_map(|index| self.row(index))
    }

    /// All dimensions, row after row.
    pub fn as_flat(&self) -> &[usize] {
        &self.dims
    }
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(dims) => f.debug_tuple("Fixed").field(dims).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl<const N: usize> From<[usize; N]> for Grid {
    fn from(dims: [usize; N]) -> Self {
        Self::fixed(dims)
    }
}

impl From<Vec<usize>> for Grid {
    fn from(dims: Vec<usize>) -> Self {
        Self::fixed(dims)
    }
}

/// Ceiling division, the usual way to size a grid over `n` elements.
///
/// # Panics
///
/// Panics if `block` is zero.
pub const fn cdiv(n: usize, block: usize) -> usize {
    n.div_ceil(block)
}
