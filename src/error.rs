//! Unified error handling for quantforge
//!
//! Every failure the dispatch layer can detect is reported through
//! [`ForgeError`]. The variants are split so a caller can tell malformed
//! shapes apart from malformed placement:
//! - User errors (bad shapes, dtypes, devices, layouts, quantization setup)
//! - Backend errors (allocation and kernel launch failures reported by the runtime)
//! - Internal errors (bugs, poisoned locks)
//!
//! Validation errors are always raised before any device allocation or
//! kernel launch, and none of them is retried.

use std::fmt;

use crate::backend::arch::SmVersion;

/// Unified error type for quantforge
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForgeError {
    // ========== Validation Errors ==========
    /// Tensor rank, extent or divisibility is wrong
    #[error("Shape error: {0}")]
    ShapeError(String),

    /// Tensor element type is wrong
    #[error("Dtype error: {0}")]
    DtypeError(String),

    /// Tensor lives on the wrong device, or tensors disagree on the device
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Tensor is not contiguous in memory
    #[error("Layout error: {0}")]
    LayoutError(String),

    /// Scale tensor shape or group size is not a supported quantization scheme
    #[error("Quantization scheme error: {0}")]
    QuantSchemeError(String),

    /// Preprocessing target outside the supported SM range
    #[error("Unsupported architecture: sm_{0} (supported: sm_70 <= arch < sm_90)")]
    UnsupportedArch(u32),

    /// Weight bit width other than 4 or 8
    #[error("Unsupported bit width: {0} (supported: 4, 8)")]
    UnsupportedBitWidth(u32),

    /// Weight was preprocessed for a layout family the executing device does not use
    #[error("Weight preprocessed for {preprocessed} but device {device_ordinal} is sm_{device_sm}")]
    ArchMismatch {
        preprocessed: SmVersion,
        device_ordinal: usize,
        device_sm: u32,
    },

    // ========== Backend Errors ==========
    /// Requested device ordinal does not exist
    #[error("Device not found: gpu:{0}")]
    DeviceNotFound(usize),

    /// Device memory allocation failed
    #[error("Device memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Workspace for the tiled GEMM could not be provisioned
    #[error("Workspace allocation failed: {0}")]
    WorkspaceAllocationFailed(String),

    /// Kernel launch was rejected by the runtime
    #[error("Kernel launch failed: {0}")]
    KernelLaunchFailed(String),

    // ========== Internal Errors ==========
    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Lock poisoned (indicates a bug or a panic on another thread)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl ForgeError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            ForgeError::ShapeError(_)
            | ForgeError::DtypeError(_)
            | ForgeError::DeviceError(_)
            | ForgeError::LayoutError(_)
            | ForgeError::QuantSchemeError(_)
            | ForgeError::UnsupportedArch(_)
            | ForgeError::UnsupportedBitWidth(_)
            | ForgeError::ArchMismatch { .. } => ErrorCategory::User,

            ForgeError::DeviceNotFound(_)
            | ForgeError::AllocationFailed(_)
            | ForgeError::WorkspaceAllocationFailed(_)
            | ForgeError::KernelLaunchFailed(_) => ErrorCategory::Backend,

            ForgeError::InternalError(_) | ForgeError::LockPoisoned(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this is a user-facing error (fix the inputs and call again)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if the failure came from the device runtime
    pub fn is_backend_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Backend)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
///
/// - User: malformed input, the caller must fix it
/// - Backend: allocation or launch failure surfaced by the device runtime
/// - Internal: a bug in this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User error - invalid input or configuration
    User,
    /// Backend error - device runtime failure
    Backend,
    /// Internal error - indicates a bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for ForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ForgeError::LockPoisoned(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type ForgeResult<T> = std::result::Result<T, ForgeError>;

/// Create a shape error with context
///
/// # Examples
/// ```ignore
/// return Err(shape_error!("n must be a multiple of 8, got {}", n));
/// ```
#[macro_export]
macro_rules! shape_error {
    ($msg:expr) => {
        $crate::error::ForgeError::ShapeError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ForgeError::ShapeError(format!($fmt, $($arg)*))
    };
}

/// Create a layout (contiguity) error with context
#[macro_export]
macro_rules! layout_error {
    ($msg:expr) => {
        $crate::error::ForgeError::LayoutError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ForgeError::LayoutError(format!($fmt, $($arg)*))
    };
}

/// Create a quantization scheme error with context
#[macro_export]
macro_rules! quant_scheme_error {
    ($msg:expr) => {
        $crate::error::ForgeError::QuantSchemeError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ForgeError::QuantSchemeError(format!($fmt, $($arg)*))
    };
}

/// Create an internal error with context
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::ForgeError::InternalError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ForgeError::InternalError(format!($fmt, $($arg)*))
    };
}
