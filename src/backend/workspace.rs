//! Scratch workspace for the tiled GEMM path.
//!
//! The tiled GEMM needs a fixed 4 MiB scratch buffer (split-K reduction and
//! tile bookkeeping) on the activation's device. It is allocated per call and
//! dropped when the call returns; the batched-vector path needs none.

use crate::backend::KernelBackend;
use crate::error::{ForgeError, ForgeResult};
use crate::quant::strategy::KernelStrategy;
use crate::tensor::{DType, Device, Tensor};

/// Workspace bytes handed to the tiled GEMM, independent of `m`, `n`, `k`
pub const GEMM_WORKSPACE_BYTES: usize = 1 << 22;

#[derive(Debug)]
pub struct Workspace {
    buffer: Tensor,
}

impl Workspace {
    pub fn size(&self) -> usize {
        self.buffer.byte_len()
    }

    pub fn device(&self) -> Device {
        self.buffer.device()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.buffer.as_bytes_mut()
    }
}

/// Hands out the fixed-size tiled GEMM workspace
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspaceProvisioner;

impl WorkspaceProvisioner {
    /// Allocate the workspace `strategy` needs on GPU `ordinal`, if any
    pub fn provision<B: KernelBackend + ?Sized>(
        &self,
        backend: &B,
        ordinal: usize,
        strategy: KernelStrategy,
    ) -> ForgeResult<Option<Workspace>> {
        if !strategy.needs_workspace() {
            return Ok(None);
        }
        let buffer = backend
            .allocate(Device::Gpu(ordinal), DType::I8, &[GEMM_WORKSPACE_BYTES])
            .map_err(|e| {
                ForgeError::WorkspaceAllocationFailed(format!(
                    "{} bytes on gpu:{}: {}",
                    GEMM_WORKSPACE_BYTES, ordinal, e
                ))
            })?;
        tracing::trace!(
            "Provisioned {} byte workspace on gpu:{}",
            GEMM_WORKSPACE_BYTES,
            ordinal
        );
        Ok(Some(Workspace { buffer }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::host::HostBackend;

    #[test]
    fn test_gemv_needs_no_workspace() {
        let backend = HostBackend::new(1);
        let ws = WorkspaceProvisioner
            .provision(&backend, 0, KernelStrategy::BatchedGemv)
            .unwrap();
        assert!(ws.is_none());
        assert_eq!(backend.stats().allocations, 0);
    }

    #[test]
    fn test_gemm_workspace_is_fixed_size() {
        let backend = HostBackend::new(2);
        let ws = WorkspaceProvisioner
            .provision(&backend, 1, KernelStrategy::TiledGemm)
            .unwrap()
            .unwrap();
        assert_eq!(ws.size(), 1 << 22);
        assert_eq!(ws.device(), Device::Gpu(1));
    }

    #[test]
    fn test_allocation_failure_maps_to_workspace_error() {
        let backend = HostBackend::new(1).with_allocation_limit(1024);
        let err = WorkspaceProvisioner
            .provision(&backend, 0, KernelStrategy::TiledGemm)
            .unwrap_err();
        assert!(matches!(err, ForgeError::WorkspaceAllocationFailed(_)));
        assert!(err.is_backend_error());
    }
}
