//! Kernel strategies, strategy tags and the parameter blocks handed to kernels.
//!
//! The four `{Int4, Int8} × {PerChannel, GroupWise}` combinations are resolved
//! once per call into a [`StrategyTag`]. The dispatcher turns the tag into a
//! pair of zero-sized marker types ([`WeightElement`] × [`QuantOp`]) so the
//! launch path is monomorphised and never goes through a trait object.

use std::fmt;

use half::f16;

use crate::error::{ForgeError, ForgeResult};
use crate::quant::scheme::QuantScheme;

/// Largest batch served by the batched-vector kernel
pub const GEMV_MAX_BATCH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelStrategy {
    /// Vector-matrix kernel for small batches, no workspace
    BatchedGemv,
    /// Tensor-core tiled GEMM, needs the fixed workspace
    TiledGemm,
}

impl KernelStrategy {
    /// `BatchedGemv` when `m <= threshold`, `TiledGemm` otherwise
    pub fn select(m: usize, threshold: usize) -> Self {
        if m <= threshold {
            KernelStrategy::BatchedGemv
        } else {
            KernelStrategy::TiledGemm
        }
    }

    pub fn needs_workspace(&self) -> bool {
        matches!(self, KernelStrategy::TiledGemm)
    }
}

impl fmt::Display for KernelStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelStrategy::BatchedGemv => write!(f, "batched-gemv"),
            KernelStrategy::TiledGemm => write!(f, "tiled-gemm"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitWidth {
    Int4,
    Int8,
}

impl BitWidth {
    pub fn from_bits(bits: u32) -> ForgeResult<Self> {
        match bits {
            4 => Ok(BitWidth::Int4),
            8 => Ok(BitWidth::Int8),
            other => Err(ForgeError::UnsupportedBitWidth(other)),
        }
    }

    pub fn bits(&self) -> usize {
        match self {
            BitWidth::Int4 => 4,
            BitWidth::Int8 => 8,
        }
    }

    /// Quantized elements packed into one byte
    pub fn elts_per_byte(&self) -> usize {
        8 / self.bits()
    }

    /// Quantized elements packed into one 32-bit register
    pub fn elts_per_word(&self) -> usize {
        32 / self.bits()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyTag {
    Int4PerChannel,
    Int4GroupWise,
    Int8PerChannel,
    Int8GroupWise,
}

impl StrategyTag {
    pub fn from_parts(bits: BitWidth, scheme: QuantScheme) -> Self {
        match (bits, scheme) {
            (BitWidth::Int4, QuantScheme::PerChannel) => StrategyTag::Int4PerChannel,
            (BitWidth::Int4, QuantScheme::GroupWise) => StrategyTag::Int4GroupWise,
            (BitWidth::Int8, QuantScheme::PerChannel) => StrategyTag::Int8PerChannel,
            (BitWidth::Int8, QuantScheme::GroupWise) => StrategyTag::Int8GroupWise,
        }
    }

    pub fn bit_width(&self) -> BitWidth {
        match self {
            StrategyTag::Int4PerChannel | StrategyTag::Int4GroupWise => BitWidth::Int4,
            StrategyTag::Int8PerChannel | StrategyTag::Int8GroupWise => BitWidth::Int8,
        }
    }

    pub fn scheme(&self) -> QuantScheme {
        match self {
            StrategyTag::Int4PerChannel | StrategyTag::Int8PerChannel => QuantScheme::PerChannel,
            StrategyTag::Int4GroupWise | StrategyTag::Int8GroupWise => QuantScheme::GroupWise,
        }
    }
}

/// Quantized weight type as understood by the batched-vector kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightOnlyQuantType {
    Int4b,
    Int8b,
}

/// Scale granularity as understood by the batched-vector kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightOnlyType {
    PerChannel,
    GroupWise,
}

/// Epilogue activation; the dispatch layer always requests `Identity`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationFunction {
    Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationType {
    Fp16,
}

/// Operation on quantization scales applied by the tiled GEMM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightOnlyQuantOp {
    PerColumnScaleOnly,
    FinegrainedScaleOnly,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Int4Weight {}
    impl Sealed for super::Int8Weight {}
    impl Sealed for super::PerColumnScale {}
    impl Sealed for super::FinegrainedScale {}
}

/// Marker for the packed weight element type
pub trait WeightElement: sealed::Sealed + Send + Sync + 'static {
    const BIT_WIDTH: BitWidth;
    const QUANT_TYPE: WeightOnlyQuantType;
}

/// Marker for how scales are applied
pub trait QuantOp: sealed::Sealed + Send + Sync + 'static {
    const SCHEME: QuantScheme;
    const OP: WeightOnlyQuantOp;
    const WEIGHT_ONLY_TYPE: WeightOnlyType;
}

/// Two 4-bit values per byte
#[derive(Debug, Clone, Copy)]
pub struct Int4Weight;

/// One 8-bit value per byte
#[derive(Debug, Clone, Copy)]
pub struct Int8Weight;

/// One scale per output column
#[derive(Debug, Clone, Copy)]
pub struct PerColumnScale;

/// One scale per `(group, column)`
#[derive(Debug, Clone, Copy)]
pub struct FinegrainedScale;

impl WeightElement for Int4Weight {
    const BIT_WIDTH: BitWidth = BitWidth::Int4;
    const QUANT_TYPE: WeightOnlyQuantType = WeightOnlyQuantType::Int4b;
}

impl WeightElement for Int8Weight {
    const BIT_WIDTH: BitWidth = BitWidth::Int8;
    const QUANT_TYPE: WeightOnlyQuantType = WeightOnlyQuantType::Int8b;
}

impl QuantOp for PerColumnScale {
    const SCHEME: QuantScheme = QuantScheme::PerChannel;
    const OP: WeightOnlyQuantOp = WeightOnlyQuantOp::PerColumnScaleOnly;
    const WEIGHT_ONLY_TYPE: WeightOnlyType = WeightOnlyType::PerChannel;
}

impl QuantOp for FinegrainedScale {
    const SCHEME: QuantScheme = QuantScheme::GroupWise;
    const OP: WeightOnlyQuantOp = WeightOnlyQuantOp::FinegrainedScaleOnly;
    const WEIGHT_ONLY_TYPE: WeightOnlyType = WeightOnlyType::GroupWise;
}

/// Parameter block for the batched-vector kernel
#[derive(Debug, Clone, Copy)]
pub struct GemvParams<'a> {
    pub qweight: &'a [u8],
    pub scales: &'a [f16],
    /// Zero points; always `None`, the layer only does symmetric quantization
    pub zeros: Option<&'a [f16]>,
    pub input: &'a [f16],
    /// Activation pre-scale; always `None`
    pub act_scale: Option<&'a [f16]>,
    pub bias: Option<&'a [f16]>,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub group_size: usize,
    pub quant_type: WeightOnlyQuantType,
    pub weight_only_type: WeightOnlyType,
    pub activation: ActivationFunction,
    pub act_type: ActivationType,
}

/// Operands for the tiled GEMM with fused bias epilogue
#[derive(Debug, Clone, Copy)]
pub struct GemmArgs<'a> {
    pub input: &'a [f16],
    pub qweight: &'a [u8],
    pub scales: &'a [f16],
    pub bias: Option<&'a [f16]>,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub group_size: usize,
}
