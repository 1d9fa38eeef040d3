//! Host backend: simulated GPUs with CPU reference kernels.
//!
//! Each simulated device reports an SM version, hands out host-backed tensors
//! tagged with its ordinal, and runs the two quantized matmul kernels on the
//! CPU. The kernels read the weight in the layout preprocessed for the
//! device's architecture, so a weight preprocessed for another layout family
//! produces garbage here exactly as it would on hardware.
//!
//! Launch counters and allocation totals are kept in [`HostBackendStats`] for
//! tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use half::f16;
use rayon::prelude::*;

use crate::backend::arch::GpuArchitecture;
use crate::backend::device_context::get_thread_device;
use crate::backend::{KernelBackend, StreamHandle};
use crate::error::{ForgeError, ForgeResult};
use crate::quant::layout::{restore_row_major, unpack_signed};
use crate::quant::scheme::QuantScheme;
use crate::quant::strategy::{
    BitWidth, GemmArgs, GemvParams, QuantOp, WeightElement, WeightOnlyQuantType, WeightOnlyType,
};
use crate::tensor::{DType, Device, Tensor};

/// SM version simulated devices report unless configured otherwise
pub const DEFAULT_SM: u32 = 80;

/// Output rows per GEMM tile
const TILE_M: usize = 16;
/// K elements per GEMM main-loop iteration
const TILE_K: usize = 64;

/// Statistics for testing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostBackendStats {
    pub gemv_launches: usize,
    pub gemm_launches: usize,
    pub allocations: usize,
    pub allocated_bytes: usize,
    pub set_device_calls: usize,
    pub last_workspace_bytes: Option<usize>,
    pub last_launch_device: Option<usize>,
}

#[derive(Debug)]
pub struct HostBackend {
    /// SM version per device ordinal
    devices: Vec<u32>,
    /// Largest single allocation in bytes, `None` for unlimited
    allocation_limit: Option<usize>,
    next_stream_id: AtomicU64,
    stats: Mutex<HostBackendStats>,
}

impl HostBackend {
    /// `count` devices, all reporting [`DEFAULT_SM`]
    pub fn new(count: usize) -> Self {
        Self::with_devices(&vec![DEFAULT_SM; count])
    }

    /// One device per entry, reporting the given SM version
    pub fn with_devices(sm_versions: &[u32]) -> Self {
        Self {
            devices: sm_versions.to_vec(),
            allocation_limit: None,
            next_stream_id: AtomicU64::new(1),
            stats: Mutex::new(HostBackendStats::default()),
        }
    }

    /// Fail any single allocation larger than `bytes`
    pub fn with_allocation_limit(mut self, bytes: usize) -> Self {
        self.allocation_limit = Some(bytes);
        self
    }

    pub fn stats(&self) -> HostBackendStats {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn reset_stats(&self) -> ForgeResult<()> {
        *self.stats.lock()? = HostBackendStats::default();
        Ok(())
    }

    fn check_ordinal(&self, ordinal: usize) -> ForgeResult<()> {
        if ordinal >= self.devices.len() {
            return Err(ForgeError::DeviceNotFound(ordinal));
        }
        Ok(())
    }

    /// Reject launches on a stream that is not on the thread's current device
    fn check_stream(&self, stream: StreamHandle) -> ForgeResult<GpuArchitecture> {
        self.check_ordinal(stream.device)?;
        let current = get_thread_device();
        if current != Some(stream.device) {
            return Err(ForgeError::KernelLaunchFailed(format!(
                "stream {} belongs to gpu:{} but the current device is {:?}",
                stream.id, stream.device, current
            )));
        }
        let sm = self.devices[stream.device];
        GpuArchitecture::from_sm(sm).ok_or_else(|| {
            ForgeError::KernelLaunchFailed(format!("no weight-only kernel built for sm_{}", sm))
        })
    }

    fn record_launch(
        &self,
        stream: StreamHandle,
        workspace_bytes: Option<usize>,
    ) -> ForgeResult<()> {
        let mut stats = self.stats.lock()?;
        match workspace_bytes {
            Some(bytes) => {
                stats.gemm_launches += 1;
                stats.last_workspace_bytes = Some(bytes);
            }
            None => {
                stats.gemv_launches += 1;
                stats.last_workspace_bytes = None;
            }
        }
        stats.last_launch_device = Some(stream.device);
        Ok(())
    }
}

/// Operand views shared by both reference kernels
struct Operands<'a> {
    input: &'a [f16],
    qweight: &'a [u8],
    scales: &'a [f16],
    bias: Option<&'a [f16]>,
    m: usize,
    n: usize,
    k: usize,
    group_size: usize,
    bits: BitWidth,
    scheme: QuantScheme,
}

impl Operands<'_> {
    fn check(&self, output_len: usize) -> ForgeResult<()> {
        let launch_error = |what: &str, got: usize, want: usize| {
            Err(ForgeError::KernelLaunchFailed(format!(
                "{} holds {} elements, kernel expects {}",
                what, got, want
            )))
        };
        if self.group_size == 0 || self.k % self.group_size != 0 {
            return Err(ForgeError::KernelLaunchFailed(format!(
                "group size {} does not divide k={}",
                self.group_size, self.k
            )));
        }
        let scale_rows = match self.scheme {
            QuantScheme::PerChannel => 1,
            QuantScheme::GroupWise => self.k / self.group_size,
        };
        if self.input.len() != self.m * self.k {
            return launch_error("input", self.input.len(), self.m * self.k);
        }
        if self.qweight.len() * 8 != self.k * self.n * self.bits.bits() {
            return launch_error(
                "weight",
                self.qweight.len() * self.bits.elts_per_byte(),
                self.k * self.n,
            );
        }
        if self.scales.len() != scale_rows * self.n {
            return launch_error("scales", self.scales.len(), scale_rows * self.n);
        }
        if let Some(bias) = self.bias {
            if bias.len() != self.n {
                return launch_error("bias", bias.len(), self.n);
            }
        }
        if output_len != self.m * self.n {
            return launch_error("output", output_len, self.m * self.n);
        }
        Ok(())
    }

    /// Decode the kernel layout and apply scales, row-major `(k, n)` in f32
    fn dequantize(&self, arch: GpuArchitecture) -> ForgeResult<Vec<f32>> {
        let packed = restore_row_major(self.qweight, self.k, self.n, self.bits, arch)
            .map_err(|e| ForgeError::KernelLaunchFailed(format!("weight layout: {}", e)))?;
        let values = unpack_signed(&packed, self.bits);
        let mut weights = vec![0f32; self.k * self.n];
        for (kk, row) in weights.chunks_exact_mut(self.n).enumerate() {
            let scale_row = match self.scheme {
                QuantScheme::PerChannel => 0,
                QuantScheme::GroupWise => kk / self.group_size,
            };
            let scales = &self.scales[scale_row * self.n..(scale_row + 1) * self.n];
            let q = &values[kk * self.n..(kk + 1) * self.n];
            for ((w, &q), &s) in row.iter_mut().zip(q).zip(scales) {
                *w = q as f32 * s.to_f32();
            }
        }
        Ok(weights)
    }

    fn bias_at(&self, col: usize) -> f32 {
        self.bias.map_or(0.0, |b| b[col].to_f32())
    }
}

fn bits_for(quant_type: WeightOnlyQuantType) -> BitWidth {
    match quant_type {
        WeightOnlyQuantType::Int4b => BitWidth::Int4,
        WeightOnlyQuantType::Int8b => BitWidth::Int8,
    }
}

fn scheme_for(weight_only_type: WeightOnlyType) -> QuantScheme {
    match weight_only_type {
        WeightOnlyType::PerChannel => QuantScheme::PerChannel,
        WeightOnlyType::GroupWise => QuantScheme::GroupWise,
    }
}

/// One activation row at a time against the whole weight
fn gemv_reference(ops: &Operands<'_>, weights: &[f32], output: &mut [f16]) {
    let n = ops.n;
    let mut acc = vec![0f32; n];
    for (row, out) in output.chunks_exact_mut(n).enumerate() {
        acc.iter_mut().for_each(|a| *a = 0.0);
        let x = &ops.input[row * ops.k..(row + 1) * ops.k];
        for (kk, xv) in x.iter().enumerate() {
            let xv = xv.to_f32();
            let w = &weights[kk * n..(kk + 1) * n];
            for (a, wv) in acc.iter_mut().zip(w) {
                *a += xv * wv;
            }
        }
        for (col, (o, a)) in out.iter_mut().zip(&acc).enumerate() {
            *o = f16::from_f32(a + ops.bias_at(col));
        }
    }
}

/// Output tiles of `TILE_M` rows in parallel, K consumed `TILE_K` at a time
fn gemm_reference(ops: &Operands<'_>, weights: &[f32], output: &mut [f16]) {
    let (n, k) = (ops.n, ops.k);
    output
        .par_chunks_mut(TILE_M * n)
        .enumerate()
        .for_each(|(tile, out)| {
            let row0 = tile * TILE_M;
            let rows = out.len() / n;
            let mut acc = vec![0f32; rows * n];
            let mut partial = vec![0f32; rows * n];
            for k0 in (0..k).step_by(TILE_K) {
                let k1 = (k0 + TILE_K).min(k);
                partial.iter_mut().for_each(|p| *p = 0.0);
                for r in 0..rows {
                    let x = &ops.input[(row0 + r) * k..(row0 + r + 1) * k];
                    let p = &mut partial[r * n..(r + 1) * n];
                    for kk in k0..k1 {
                        let xv = x[kk].to_f32();
                        for (pv, wv) in p.iter_mut().zip(&weights[kk * n..(kk + 1) * n]) {
                            *pv += xv * wv;
                        }
                    }
                }
                for (a, p) in acc.iter_mut().zip(&partial) {
                    *a += p;
                }
            }
            for (i, o) in out.iter_mut().enumerate() {
                *o = f16::from_f32(acc[i] + ops.bias_at(i % n));
            }
        });
}

impl KernelBackend for HostBackend {
    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn compute_capability(&self, ordinal: usize) -> ForgeResult<u32> {
        self.check_ordinal(ordinal)?;
        Ok(self.devices[ordinal])
    }

    fn set_device(&self, ordinal: usize) -> ForgeResult<()> {
        self.check_ordinal(ordinal)?;
        self.stats.lock()?.set_device_calls += 1;
        Ok(())
    }

    fn allocate(&self, device: Device, dtype: DType, shape: &[usize]) -> ForgeResult<Tensor> {
        if let Device::Gpu(ordinal) = device {
            self.check_ordinal(ordinal)?;
        }
        let bytes = shape.iter().product::<usize>() * dtype.size_in_bytes();
        if let Some(limit) = self.allocation_limit {
            if bytes > limit {
                return Err(ForgeError::AllocationFailed(format!(
                    "{} bytes on {} exceeds the {} byte limit",
                    bytes, device, limit
                )));
            }
        }
        let mut stats = self.stats.lock()?;
        stats.allocations += 1;
        stats.allocated_bytes += bytes;
        Ok(Tensor::zeros(shape, dtype, device))
    }

    fn current_stream(&self, ordinal: usize) -> ForgeResult<StreamHandle> {
        self.check_ordinal(ordinal)?;
        Ok(StreamHandle {
            device: ordinal,
            id: self.next_stream_id.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn launch_batched_gemv(
        &self,
        params: &GemvParams<'_>,
        output: &mut [f16],
        stream: StreamHandle,
    ) -> ForgeResult<()> {
        let arch = self.check_stream(stream)?;
        if params.zeros.is_some() || params.act_scale.is_some() {
            return Err(ForgeError::KernelLaunchFailed(
                "zero points and activation scales are not supported".to_string(),
            ));
        }
        let ops = Operands {
            input: params.input,
            qweight: params.qweight,
            scales: params.scales,
            bias: params.bias,
            m: params.m,
            n: params.n,
            k: params.k,
            group_size: params.group_size,
            bits: bits_for(params.quant_type),
            scheme: scheme_for(params.weight_only_type),
        };
        ops.check(output.len())?;
        self.record_launch(stream, None)?;
        if output.is_empty() {
            return Ok(());
        }
        let weights = ops.dequantize(arch)?;
        gemv_reference(&ops, &weights, output);
        Ok(())
    }

    fn launch_gemm_bias<W: WeightElement, Q: QuantOp>(
        &self,
        args: &GemmArgs<'_>,
        output: &mut [f16],
        workspace: &mut [u8],
        stream: StreamHandle,
    ) -> ForgeResult<()> {
        let arch = self.check_stream(stream)?;
        if workspace.is_empty() {
            return Err(ForgeError::KernelLaunchFailed(
                "tiled GEMM launched without a workspace".to_string(),
            ));
        }
        let ops = Operands {
            input: args.input,
            qweight: args.qweight,
            scales: args.scales,
            bias: args.bias,
            m: args.m,
            n: args.n,
            k: args.k,
            group_size: args.group_size,
            bits: W::BIT_WIDTH,
            scheme: Q::SCHEME,
        };
        ops.check(output.len())?;
        self.record_launch(stream, Some(workspace.len()))?;
        if output.is_empty() {
            return Ok(());
        }
        let weights = ops.dequantize(arch)?;
        gemm_reference(&ops, &weights, output);
        Ok(())
    }
}
