//! Kernel strategy dispatch.
//!
//! Picks batched-vector vs tiled GEMM from `m`, provisions the workspace the
//! GEMM needs, and turns the runtime [`StrategyTag`] into a monomorphised
//! `gemm_fp16_int_bias::<W, Q>` call.

use half::f16;

use crate::backend::workspace::{Workspace, WorkspaceProvisioner};
use crate::backend::{KernelBackend, StreamHandle};
use crate::error::ForgeResult;
use crate::internal_error;
use crate::quant::strategy::{
    ActivationFunction, ActivationType, FinegrainedScale, GemmArgs, GemvParams, Int4Weight,
    Int8Weight, KernelStrategy, PerColumnScale, QuantOp, StrategyTag, WeightElement,
    GEMV_MAX_BATCH,
};
use crate::quant::validate::MatmulProblem;
use crate::tensor::Tensor;

/// What a call actually launched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub strategy: KernelStrategy,
    pub tag: StrategyTag,
    /// Workspace handed to the kernel, `None` for the batched-vector path
    pub workspace_bytes: Option<usize>,
    pub device: usize,
}

/// Typed views of the validated operands
struct BoundOperands<'a> {
    input: &'a [f16],
    qweight: &'a [u8],
    scales: &'a [f16],
    bias: Option<&'a [f16]>,
}

fn bind_operands<'a>(
    input: &'a Tensor,
    weight: &'a Tensor,
    scales: &'a Tensor,
    bias: Option<&'a Tensor>,
) -> ForgeResult<BoundOperands<'a>> {
    // the weight is a byte container, the kernels interpret its bits
    weight.typed::<i8>()?;
    Ok(BoundOperands {
        input: input.typed::<f16>()?,
        qweight: weight.as_bytes(),
        scales: scales.typed::<f16>()?,
        bias: bias.map(|b| b.typed::<f16>()).transpose()?,
    })
}

fn gemm_fp16_int_bias<W: WeightElement, Q: QuantOp, B: KernelBackend + ?Sized>(
    backend: &B,
    problem: &MatmulProblem,
    ops: &BoundOperands<'_>,
    output: &mut [f16],
    workspace: Option<&mut Workspace>,
    strategy: KernelStrategy,
    stream: StreamHandle,
) -> ForgeResult<()> {
    let shape = problem.shape;
    match strategy {
        KernelStrategy::BatchedGemv => {
            let params = GemvParams {
                qweight: ops.qweight,
                scales: ops.scales,
                zeros: None,
                input: ops.input,
                act_scale: None,
                bias: ops.bias,
                m: shape.m,
                n: shape.n,
                k: shape.k,
                group_size: problem.quant.group_size,
                quant_type: W::QUANT_TYPE,
                weight_only_type: Q::WEIGHT_ONLY_TYPE,
                activation: ActivationFunction::Identity,
                act_type: ActivationType::Fp16,
            };
            backend.launch_batched_gemv(&params, output, stream)
        }
        KernelStrategy::TiledGemm => {
            let workspace = workspace
                .ok_or_else(|| internal_error!("tiled GEMM dispatched without a workspace"))?;
            let args = GemmArgs {
                input: ops.input,
                qweight: ops.qweight,
                scales: ops.scales,
                bias: ops.bias,
                m: shape.m,
                n: shape.n,
                k: shape.k,
                group_size: problem.quant.group_size,
            };
            backend.launch_gemm_bias::<W, Q>(&args, output, workspace.as_bytes_mut(), stream)
        }
    }
}

/// Launch the kernel for a validated problem, writing into `output`.
///
/// The caller has already made `problem.device` current and allocated
/// `output` as `(m, n)` f16 on it.
pub fn dispatch<B: KernelBackend + ?Sized>(
    backend: &B,
    problem: &MatmulProblem,
    input: &Tensor,
    weight: &Tensor,
    scales: &Tensor,
    bias: Option<&Tensor>,
    output: &mut Tensor,
) -> ForgeResult<DispatchReport> {
    let strategy = KernelStrategy::select(problem.shape.m, GEMV_MAX_BATCH);
    let tag = problem.strategy_tag();
    tracing::debug!(
        m = problem.shape.m,
        n = problem.shape.n,
        k = problem.shape.k,
        group_size = problem.quant.group_size,
        has_bias = problem.has_bias,
        "Dispatching {:?} via {}",
        tag,
        strategy
    );

    let mut workspace = WorkspaceProvisioner.provision(backend, problem.device, strategy)?;
    let workspace_bytes = workspace.as_ref().map(Workspace::size);
    let stream = backend.current_stream(problem.device)?;

    let ops = bind_operands(input, weight, scales, bias)?;
    let out = output.typed_mut::<f16>()?;
    let ws = workspace.as_mut();

    match tag {
        StrategyTag::Int4PerChannel => gemm_fp16_int_bias::<Int4Weight, PerColumnScale, B>(
            backend, problem, &ops, out, ws, strategy, stream,
        ),
        StrategyTag::Int4GroupWise => gemm_fp16_int_bias::<Int4Weight, FinegrainedScale, B>(
            backend, problem, &ops, out, ws, strategy, stream,
        ),
        StrategyTag::Int8PerChannel => gemm_fp16_int_bias::<Int8Weight, PerColumnScale, B>(
            backend, problem, &ops, out, ws, strategy, stream,
        ),
        StrategyTag::Int8GroupWise => gemm_fp16_int_bias::<Int8Weight, FinegrainedScale, B>(
            backend, problem, &ops, out, ws, strategy, stream,
        ),
    }?;

    Ok(DispatchReport {
        strategy,
        tag,
        workspace_bytes,
        device: problem.device,
    })
}
