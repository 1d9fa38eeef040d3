//! Quantization scheme resolution from the scale tensor's shape.

use std::fmt;

use crate::error::ForgeResult;
use crate::quant_scheme_error;

/// Group sizes the group-wise kernels are built for
pub const SUPPORTED_GROUP_SIZES: [usize; 2] = [64, 128];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantScheme {
    /// One scale per output column, scales shape `(n,)`
    PerChannel,
    /// One scale per `group_size` consecutive K elements per column,
    /// scales shape `(k / group_size, n)`
    GroupWise,
}

impl fmt::Display for QuantScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantScheme::PerChannel => write!(f, "per-channel"),
            QuantScheme::GroupWise => write!(f, "group-wise"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantSpec {
    pub scheme: QuantScheme,
    /// Equals `k` for per-channel
    pub group_size: usize,
}

impl QuantSpec {
    /// Number of scale rows, `1` for per-channel
    pub fn num_groups(&self, k: usize) -> usize {
        match self.scheme {
            QuantScheme::PerChannel => 1,
            QuantScheme::GroupWise => k / self.group_size,
        }
    }

    /// Expected scale tensor shape for an `n`-column weight
    pub fn scale_shape(&self, k: usize, n: usize) -> Vec<usize> {
        match self.scheme {
            QuantScheme::PerChannel => vec![n],
            QuantScheme::GroupWise => vec![self.num_groups(k), n],
        }
    }
}

/// Determine per-channel vs group-wise from the scale tensor's shape
pub fn resolve(scale_shape: &[usize], k: usize) -> ForgeResult<QuantSpec> {
    let spec = match scale_shape.len() {
        1 => QuantSpec {
            scheme: QuantScheme::PerChannel,
            group_size: k,
        },
        2 => {
            let groups = scale_shape[0];
            if groups == 0 {
                return Err(quant_scheme_error!("group-wise scales have zero groups"));
            }
            let group_size = k / groups;
            if !SUPPORTED_GROUP_SIZES.contains(&group_size) {
                return Err(quant_scheme_error!(
                    "group size {} (k={} / {} groups) is not supported, expected one of {:?}",
                    group_size,
                    k,
                    groups,
                    SUPPORTED_GROUP_SIZES
                ));
            }
            QuantSpec {
                scheme: QuantScheme::GroupWise,
                group_size,
            }
        }
        rank => {
            return Err(quant_scheme_error!(
                "scales must be rank 1 (per-channel) or rank 2 (group-wise), got rank {}",
                rank
            ))
        }
    };

    if spec.group_size == 0 || k % spec.group_size != 0 {
        return Err(quant_scheme_error!(
            "k={} is not a multiple of group size {}",
            k,
            spec.group_size
        ));
    }
    Ok(spec)
}
