//! quantforge - weight-only quantized matmul for tensor-core GPUs
//!
//! Dispatch and layout-transform layer for fp16 activations multiplied by
//! 4-bit or 8-bit quantized weights:
//!
//! - [`preprocess_weight`] rearranges a packed row-major weight into the
//!   layout the kernels of a given SM version consume.
//! - [`quant_matmul`] validates operands, picks the batched-vector kernel
//!   (`m <= 4`) or the tiled GEMM, provisions its workspace and launches it
//!   through a [`KernelBackend`].

#![allow(clippy::too_many_arguments)] // Kernel launches need many args
#![allow(clippy::needless_range_loop)] // Index math mirrors the kernel layouts
#![allow(clippy::manual_memcpy)] // Layout moves are written element-wise

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod quant;
pub mod tensor;

pub use backend::{HostBackend, KernelBackend, SmVersion};
pub use config::MatmulConfig;
pub use error::{ErrorCategory, ForgeError, ForgeResult};
pub use logging::{init_logging_default, init_logging_from_env, init_with_config, LoggingConfig};
pub use quant::{preprocess_weight, quant_matmul, DispatchReport, QuantMatmul};
pub use tensor::{DType, Device, Tensor};
