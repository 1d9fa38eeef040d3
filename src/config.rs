//! Matmul call configuration.
//!
//! The dispatch policy itself is fixed: batches of up to
//! [`GEMV_MAX_BATCH`](crate::quant::strategy::GEMV_MAX_BATCH) rows take the
//! batched-vector kernel and the tiled GEMM always gets
//! [`GEMM_WORKSPACE_BYTES`](crate::backend::workspace::GEMM_WORKSPACE_BYTES).
//! Only the pre-launch weight layout check can be switched off.

use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatmulConfig {
    /// Reject weights preprocessed for another layout family
    pub check_arch_tag: bool,
}

impl Default for MatmulConfig {
    fn default() -> Self {
        MatmulConfig {
            check_arch_tag: true,
        }
    }
}

impl MatmulConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `QUANTFORGE_CHECK_ARCH_TAG`: verify preprocessed weight tags (0/false disables)
    pub fn from_env() -> Self {
        let mut config = MatmulConfig::default();

        if let Ok(value) = env::var("QUANTFORGE_CHECK_ARCH_TAG") {
            match value.trim().to_lowercase().as_str() {
                "0" | "false" | "off" => config.check_arch_tag = false,
                "1" | "true" | "on" => config.check_arch_tag = true,
                _ => tracing::warn!("Ignoring invalid QUANTFORGE_CHECK_ARCH_TAG={}", value),
            }
        }

        config
    }

    pub fn with_check_arch_tag(mut self, check: bool) -> Self {
        self.check_arch_tag = check;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = MatmulConfig::default();
        assert!(config.check_arch_tag);
        assert_eq!(config, MatmulConfig::new());
    }

    #[test]
    fn test_builder() {
        let config = MatmulConfig::new().with_check_arch_tag(false);
        assert!(!config.check_arch_tag);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var("QUANTFORGE_CHECK_ARCH_TAG", "false");
        assert!(!MatmulConfig::from_env().check_arch_tag);

        env::set_var("QUANTFORGE_CHECK_ARCH_TAG", "maybe");
        assert!(MatmulConfig::from_env().check_arch_tag);

        env::remove_var("QUANTFORGE_CHECK_ARCH_TAG");
        assert!(MatmulConfig::from_env().check_arch_tag);
    }
}
