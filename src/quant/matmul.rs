//! Weight-only quantized matmul entry point.
//!
//! `output = input × dequant(weight, scales) + bias`
//!
//! One call validates the operands, selects the device, allocates the
//! `(m, n)` f16 output on it and launches exactly one kernel. Nothing is
//! allocated before validation succeeds, and nothing is cached across calls.

use crate::backend::device_context::DeviceGuard;
use crate::backend::KernelBackend;
use crate::config::MatmulConfig;
use crate::error::ForgeResult;
use crate::quant::dispatch::{dispatch, DispatchReport};
use crate::quant::preprocess::ensure_layout_compatible;
use crate::quant::validate::validate_matmul;
use crate::tensor::{DType, Device, Tensor};

/// Configured matmul runner bound to a backend
pub struct QuantMatmul<'a, B: KernelBackend> {
    backend: &'a B,
    config: MatmulConfig,
}

impl<'a, B: KernelBackend> QuantMatmul<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            config: MatmulConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MatmulConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &MatmulConfig {
        &self.config
    }

    pub fn run(
        &self,
        input: &Tensor,
        weight: &Tensor,
        scales: &Tensor,
        bias: Option<&Tensor>,
        bits: u32,
    ) -> ForgeResult<Tensor> {
        self.run_with_report(input, weight, scales, bias, bits)
            .map(|(output, _)| output)
    }

    /// Like [`QuantMatmul::run`], also reporting which kernel ran
    pub fn run_with_report(
        &self,
        input: &Tensor,
        weight: &Tensor,
        scales: &Tensor,
        bias: Option<&Tensor>,
        bits: u32,
    ) -> ForgeResult<(Tensor, DispatchReport)> {
        let problem = validate_matmul(input, weight, scales, bias, bits)?;

        if self.config.check_arch_tag {
            let device_sm = self.backend.compute_capability(problem.device)?;
            ensure_layout_compatible(problem.weight_tag, problem.device, device_sm)?;
        }

        let _guard = DeviceGuard::new(self.backend, problem.device)?;
        let mut output = self.backend.allocate(
            Device::Gpu(problem.device),
            DType::F16,
            &[problem.shape.m, problem.shape.n],
        )?;
        let report = dispatch(self.backend, &problem, input, weight, scales, bias, &mut output)?;
        Ok((output, report))
    }
}

/// Compute `input × dequant(weight, scales) + bias` with the default configuration.
///
/// - `input`: `(m, k)` f16 on a GPU
/// - `weight`: `(n, k / (8 / bits))` i8, preprocessed for the device's architecture
/// - `weight_scales`: `(n,)` per-channel or `(k / group_size, n)` group-wise f16
/// - `bias`: optional `(n,)` f16
///
/// All operands must be contiguous and on the same GPU.
pub fn quant_matmul<B: KernelBackend>(
    backend: &B,
    input: &Tensor,
    weight: &Tensor,
    weight_scales: &Tensor,
    bias: Option<&Tensor>,
    bits: u32,
) -> ForgeResult<Tensor> {
    QuantMatmul::new(backend).run(input, weight, weight_scales, bias, bits)
}
