//! Offline weight preprocessing into the tensor-core kernel layout.

use crate::backend::arch::{GpuArchitecture, SmVersion};
use crate::error::{ForgeError, ForgeResult};
use crate::quant::layout::apply_pipeline;
use crate::quant::strategy::BitWidth;
use crate::tensor::{DType, Device, Tensor};
use crate::{layout_error, shape_error};

/// Rearrange a packed row-major quantized weight for the kernels of `arch`.
///
/// `weight` is an `I8` host tensor of shape `(rows, cols / (8 / bits))`
/// holding signed values, 4-bit values packed two per byte low nibble
/// first. The result is a new host tensor of shape `(cols, rows / (8 / bits))`
/// tagged with the target architecture. The input is left untouched.
///
/// # Errors
///
/// - `UnsupportedBitWidth` unless `bits` is 4 or 8
/// - `UnsupportedArch` unless `70 <= arch < 90`
/// - `DtypeError`, `DeviceError`, `LayoutError` for a non-`I8`, non-host or
///   non-contiguous input
/// - `ShapeError` for a non-2-D input or dimensions the layout cannot tile
pub fn preprocess_weight(weight: &Tensor, bits: u32, arch: u32) -> ForgeResult<Tensor> {
    let bits = BitWidth::from_bits(bits)?;
    let sm = SmVersion::new(arch)?;

    if weight.dtype() != DType::I8 {
        return Err(ForgeError::DtypeError(format!(
            "quantized weight must be i8, got {}",
            weight.dtype()
        )));
    }
    if !weight.device().is_cpu() {
        return Err(ForgeError::DeviceError(format!(
            "weight preprocessing runs on host tensors, got {}",
            weight.device()
        )));
    }
    if !weight.is_contiguous() {
        return Err(layout_error!(
            "quantized weight must be contiguous (strides {:?})",
            weight.strides()
        ));
    }
    if weight.rank() != 2 {
        return Err(shape_error!(
            "quantized weight must be 2-D, got shape {:?}",
            weight.shape()
        ));
    }

    let epb = bits.elts_per_byte();
    let rows = weight.size(0)?;
    let cols = weight.size(1)? * epb;
    if rows % epb != 0 {
        return Err(shape_error!(
            "rows={} must be a multiple of {} for {}-bit weights",
            rows,
            epb,
            bits.bits()
        ));
    }

    let arch_family = sm.architecture();
    tracing::debug!(
        "Preprocessing {}x{} int{} weight for {} ({})",
        rows,
        cols,
        bits.bits(),
        sm,
        arch_family.name()
    );

    let data = apply_pipeline(weight.as_bytes(), rows, cols, bits, arch_family)?;
    let mut out = Tensor::zeros(&[cols, rows / epb], DType::I8, Device::Cpu);
    out.as_bytes_mut().copy_from_slice(&data);
    Ok(out.with_layout_tag(sm))
}

/// Check a preprocessed weight's tag against the executing device.
///
/// Untagged weights are trusted. A device whose SM version has no known
/// layout family is let through with a warning.
pub fn ensure_layout_compatible(
    weight_tag: Option<SmVersion>,
    device_ordinal: usize,
    device_sm: u32,
) -> ForgeResult<()> {
    let Some(tag) = weight_tag else {
        return Ok(());
    };
    let Some(device_arch) = GpuArchitecture::from_sm(device_sm) else {
        tracing::warn!(
            "gpu:{} reports sm_{}, cannot verify weight preprocessed for {}",
            device_ordinal,
            device_sm,
            tag
        );
        return Ok(());
    };
    if tag.architecture().layout_family() != device_arch.layout_family() {
        return Err(ForgeError::ArchMismatch {
            preprocessed: tag,
            device_ordinal,
            device_sm,
        });
    }
    Ok(())
}
