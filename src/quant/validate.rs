//! Shape, dtype, placement and contiguity validation for `quant_matmul`.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. bit width
//! 2. input and weight ranks
//! 3. problem extents (`k > 0`)
//! 4. quantization scheme from the scale shape
//! 5. `n % 8 == 0`
//! 6. dtypes
//! 7. placement: every operand on the same GPU
//! 8. contiguity
//! 9. exact shapes
//! 10. bias
//!
//! Nothing here allocates or touches a device.

use crate::backend::arch::SmVersion;
use crate::error::{ForgeError, ForgeResult};
use crate::quant::scheme::{self, QuantSpec};
use crate::quant::strategy::{BitWidth, StrategyTag};
use crate::tensor::{DType, Device, Tensor};
use crate::{layout_error, shape_error};

/// Output columns must be a multiple of this
pub const N_ALIGNMENT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

/// A fully validated matmul call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulProblem {
    pub shape: ProblemShape,
    pub quant: QuantSpec,
    pub bits: BitWidth,
    /// GPU ordinal every operand lives on
    pub device: usize,
    pub has_bias: bool,
    /// Architecture the weight was preprocessed for, if recorded
    pub weight_tag: Option<SmVersion>,
}

impl MatmulProblem {
    pub fn strategy_tag(&self) -> StrategyTag {
        StrategyTag::from_parts(self.bits, self.quant.scheme)
    }
}

fn expect_dtype(name: &str, tensor: &Tensor, dtype: DType) -> ForgeResult<()> {
    if tensor.dtype() != dtype {
        return Err(ForgeError::DtypeError(format!(
            "{} must be {}, got {}",
            name,
            dtype,
            tensor.dtype()
        )));
    }
    Ok(())
}

fn expect_gpu(name: &str, tensor: &Tensor) -> ForgeResult<usize> {
    match tensor.device() {
        Device::Gpu(ordinal) => Ok(ordinal),
        Device::Cpu => Err(ForgeError::DeviceError(format!("{} must be on a GPU, got cpu", name))),
    }
}

fn expect_same_device(name: &str, tensor: &Tensor, ordinal: usize) -> ForgeResult<()> {
    let actual = expect_gpu(name, tensor)?;
    if actual != ordinal {
        return Err(ForgeError::DeviceError(format!(
            "{} is on gpu:{} but input is on gpu:{}",
            name, actual, ordinal
        )));
    }
    Ok(())
}

fn expect_contiguous(name: &str, tensor: &Tensor) -> ForgeResult<()> {
    if !tensor.is_contiguous() {
        return Err(layout_error!(
            "{} must be contiguous (shape {:?}, strides {:?})",
            name,
            tensor.shape(),
            tensor.strides()
        ));
    }
    Ok(())
}

fn expect_shape(name: &str, tensor: &Tensor, shape: &[usize]) -> ForgeResult<()> {
    if tensor.shape() != shape {
        return Err(shape_error!(
            "{} must have shape {:?}, got {:?}",
            name,
            shape,
            tensor.shape()
        ));
    }
    Ok(())
}

/// Validate the operands of a quantized matmul and describe the problem
pub fn validate_matmul(
    input: &Tensor,
    weight: &Tensor,
    scales: &Tensor,
    bias: Option<&Tensor>,
    bits: u32,
) -> ForgeResult<MatmulProblem> {
    let bits = BitWidth::from_bits(bits)?;

    if input.rank() != 2 {
        return Err(shape_error!("input must be 2-D (m, k), got shape {:?}", input.shape()));
    }
    if weight.rank() != 2 {
        return Err(shape_error!(
            "weight must be 2-D (n, k / {}), got shape {:?}",
            bits.elts_per_byte(),
            weight.shape()
        ));
    }

    let m = input.size(0)?;
    let k = input.size(1)?;
    let n = weight.size(0)?;
    if k == 0 {
        return Err(shape_error!("k must be positive"));
    }

    let quant = scheme::resolve(scales.shape(), k)?;

    if n % N_ALIGNMENT != 0 {
        return Err(shape_error!("n={} must be a multiple of {}", n, N_ALIGNMENT));
    }

    expect_dtype("input", input, DType::F16)?;
    expect_dtype("weight", weight, DType::I8)?;
    expect_dtype("scales", scales, DType::F16)?;

    let device = expect_gpu("input", input)?;
    expect_same_device("weight", weight, device)?;
    expect_same_device("scales", scales, device)?;

    expect_contiguous("input", input)?;
    expect_contiguous("weight", weight)?;
    expect_contiguous("scales", scales)?;

    let epb = bits.elts_per_byte();
    if k % epb != 0 {
        return Err(shape_error!(
            "k={} must be a multiple of {} for {}-bit weights",
            k,
            epb,
            bits.bits()
        ));
    }
    expect_shape("input", input, &[m, k])?;
    expect_shape("weight", weight, &[n, k / epb])?;
    expect_shape("scales", scales, &quant.scale_shape(k, n))?;

    if let Some(bias) = bias {
        expect_dtype("bias", bias, DType::F16)?;
        expect_same_device("bias", bias, device)?;
        expect_contiguous("bias", bias)?;
        expect_shape("bias", bias, &[n])?;
    }

    tracing::trace!(
        m,
        n,
        k,
        bits = bits.bits(),
        scheme = %quant.scheme,
        "validated quantized matmul"
    );

    Ok(MatmulProblem {
        shape: ProblemShape { m, n, k },
        quant,
        bits,
        device,
        has_bias: bias.is_some(),
        weight_tag: weight.layout_tag(),
    })
}
