//! Device runtime seam
//!
//! The dispatch layer never talks to a GPU runtime directly. Everything it
//! needs from one (device queries, allocation, streams and the two kernel
//! entry points) goes through [`KernelBackend`]. [`HostBackend`] implements
//! it with simulated devices and CPU reference kernels.

pub mod arch;
pub mod device_context;
pub mod host;
pub mod workspace;

pub use arch::{GpuArchitecture, LayoutFamily, SmVersion};
pub use device_context::DeviceGuard;
pub use host::{HostBackend, HostBackendStats};
pub use workspace::{Workspace, WorkspaceProvisioner, GEMM_WORKSPACE_BYTES};

use half::f16;

use crate::error::ForgeResult;
use crate::quant::strategy::{GemmArgs, GemvParams, QuantOp, WeightElement};
use crate::tensor::{DType, Device, Tensor};

/// Stream a kernel is enqueued on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    pub device: usize,
    pub id: u64,
}

pub trait KernelBackend: Send + Sync {
    fn device_count(&self) -> usize;

    /// Raw SM version reported by the device, may be outside the preprocessable range
    fn compute_capability(&self, ordinal: usize) -> ForgeResult<u32>;

    /// Make `ordinal` the calling thread's current device
    fn set_device(&self, ordinal: usize) -> ForgeResult<()>;

    fn allocate(&self, device: Device, dtype: DType, shape: &[usize]) -> ForgeResult<Tensor>;

    /// Stream that is current on `ordinal` for the calling thread
    fn current_stream(&self, ordinal: usize) -> ForgeResult<StreamHandle>;

    /// Batched vector-matrix product for `m <= 4`, writes `m * n` outputs
    fn launch_batched_gemv(
        &self,
        params: &GemvParams<'_>,
        output: &mut [f16],
        stream: StreamHandle,
    ) -> ForgeResult<()>;

    /// Tensor-core GEMM with fused bias, writes `m * n` outputs
    fn launch_gemm_bias<W: WeightElement, Q: QuantOp>(
        &self,
        args: &GemmArgs<'_>,
        output: &mut [f16],
        workspace: &mut [u8],
        stream: StreamHandle,
    ) -> ForgeResult<()>;
}
