//! GPU architecture generations and their weight layout requirements.
//!
//! Architectures are identified by SM version (compute capability × 10).
//! Tensor-core weight preprocessing is defined for sm_70 up to, but not
//! including, sm_90:
//!
//! - **Volta** (sm_70..sm_75): weights stay row-major, only the
//!   bias/register interleave is applied.
//! - **Turing** (sm_75..sm_80) and **Ampere** (sm_80..sm_90, including Ada
//!   sm_89): rows are permuted for the `ldmatrix` access pattern, the matrix
//!   is transposed to column-major and columns are tile-interleaved. Both
//!   generations share one layout.

use std::fmt;
use std::ops::Range;

use crate::error::{ForgeError, ForgeResult};

/// SM versions accepted by the weight preprocessor (`70 <= sm < 90`)
pub const SUPPORTED_SM_RANGE: Range<u32> = 70..90;

/// A supported compute capability, e.g. `SmVersion::new(80)` for A100
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SmVersion(u32);

impl SmVersion {
    pub fn new(sm: u32) -> ForgeResult<Self> {
        if !SUPPORTED_SM_RANGE.contains(&sm) {
            return Err(ForgeError::UnsupportedArch(sm));
        }
        Ok(SmVersion(sm))
    }

    pub fn from_compute_capability(major: u32, minor: u32) -> ForgeResult<Self> {
        Self::new(major * 10 + minor)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn architecture(&self) -> GpuArchitecture {
        match self.0 {
            70..=74 => GpuArchitecture::Volta,
            75..=79 => GpuArchitecture::Turing,
            _ => GpuArchitecture::Ampere,
        }
    }
}

impl fmt::Display for SmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sm_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuArchitecture {
    Volta,
    Turing,
    Ampere,
}

/// Weight layout a tensor-core kernel of a given generation consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutFamily {
    /// Row-major `(K, N)` with biased, register-interleaved elements
    RowMajor,
    /// Row-permuted, transposed, column-tile-interleaved `(N, K)`
    ColumnTileInterleaved,
}

impl GpuArchitecture {
    /// Map a raw SM version onto a generation, `None` outside the supported range
    pub fn from_sm(sm: u32) -> Option<Self> {
        SmVersion::new(sm).ok().map(|v| v.architecture())
    }

    /// Turing and newer feed B through `ldmatrix` and need the row permutation
    pub fn uses_imma_ldsm(&self) -> bool {
        !matches!(self, GpuArchitecture::Volta)
    }

    pub fn layout_family(&self) -> LayoutFamily {
        if self.uses_imma_ldsm() {
            LayoutFamily::ColumnTileInterleaved
        } else {
            LayoutFamily::RowMajor
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GpuArchitecture::Volta => "Volta",
            GpuArchitecture::Turing => "Turing",
            GpuArchitecture::Ampere => "Ampere",
        }
    }
}
