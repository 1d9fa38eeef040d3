//! Weight-only quantized matmul: validation, scheme resolution, weight
//! layout preprocessing and kernel dispatch.

pub mod dispatch;
pub mod layout;
pub mod matmul;
pub mod preprocess;
pub mod scheme;
pub mod strategy;
pub mod validate;

pub use dispatch::DispatchReport;
pub use matmul::{quant_matmul, QuantMatmul};
pub use preprocess::preprocess_weight;
pub use scheme::{QuantScheme, QuantSpec};
pub use strategy::{BitWidth, KernelStrategy, StrategyTag};
pub use validate::{validate_matmul, MatmulProblem, ProblemShape};
