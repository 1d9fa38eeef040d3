//! Common test utilities for quantized matmul tests
//!
//! Provides seeded problem generators, a host-side reference matmul computed
//! from the unquantized-layout values, and tolerance helpers.
//!
//! # Usage
//!
//! ```ignore
//! mod common;
//! use common::{QuantProblem, serial};
//!
//! #[test]
//! #[serial]
//! fn my_test() {
//!     let problem = QuantProblem::new(1, 8, 128, 4).seed(7);
//!     let backend = HostBackend::new(1);
//!     // ...
//! }
//! ```

#![allow(dead_code)]

use half::f16;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quantforge::quant::layout::pack_signed;
use quantforge::quant::BitWidth;
use quantforge::{preprocess_weight, Device, ForgeResult, Tensor};
pub use serial_test::serial;

/// Installs the tracing subscriber once for the whole test binary
pub static LOGGING: Lazy<()> = Lazy::new(quantforge::init_logging_default);

pub fn init_logging() {
    Lazy::force(&LOGGING);
}

/// One randomly generated quantized matmul problem
#[derive(Debug, Clone)]
pub struct QuantProblem {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub bits: u32,
    /// `None` for per-channel scales
    pub group_size: Option<usize>,
    pub with_bias: bool,
    /// Signed weight values, row-major `(k, n)`
    pub values: Vec<i8>,
    /// Row-major `(groups, n)`, one row for per-channel
    pub scales: Vec<f16>,
    /// Row-major `(m, k)`
    pub input: Vec<f16>,
    pub bias: Vec<f16>,
}

impl QuantProblem {
    pub fn new(m: usize, n: usize, k: usize, bits: u32) -> Self {
        Self::generate(m, n, k, bits, None, false, 0)
    }

    pub fn grouped(mut self, group_size: usize) -> Self {
        self.group_size = Some(group_size);
        self.regenerate()
    }

    pub fn with_bias(mut self) -> Self {
        self.with_bias = true;
        self.regenerate()
    }

    pub fn seed(self, seed: u64) -> Self {
        Self::generate(self.m, self.n, self.k, self.bits, self.group_size, self.with_bias, seed)
    }

    fn regenerate(self) -> Self {
        Self::generate(self.m, self.n, self.k, self.bits, self.group_size, self.with_bias, 0)
    }

    fn generate(
        m: usize,
        n: usize,
        k: usize,
        bits: u32,
        group_size: Option<usize>,
        with_bias: bool,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed ^ ((m * 31 + n * 7 + k) as u64));
        let (lo, hi) = if bits == 4 { (-8i8, 7i8) } else { (-127i8, 127i8) };
        let values = (0..k * n).map(|_| rng.gen_range(lo..=hi)).collect();
        let groups = group_size.map_or(1, |g| k / g);
        let scale_base: f32 = if bits == 4 { 0.1 } else { 0.01 };
        let scales = (0..groups * n)
            .map(|_| f16::from_f32(rng.gen_range(0.25f32..1.0) * scale_base))
            .collect();
        let input = (0..m * k)
            .map(|_| f16::from_f32(rng.gen_range(-1.0f32..1.0)))
            .collect();
        let bias = if with_bias {
            (0..n).map(|_| f16::from_f32(rng.gen_range(-1.0f32..1.0))).collect()
        } else {
            Vec::new()
        };
        Self {
            m,
            n,
            k,
            bits,
            group_size,
            with_bias,
            values,
            scales,
            input,
            bias,
        }
    }

    pub fn bit_width(&self) -> BitWidth {
        if self.bits == 4 {
            BitWidth::Int4
        } else {
            BitWidth::Int8
        }
    }

    /// Packed row-major weight on the host, shape `(k, n / (8 / bits))`
    pub fn row_major_weight(&self) -> Tensor {
        let packed: Vec<i8> = pack_signed(&self.values, self.bit_width())
            .expect("values fit the bit width")
            .into_iter()
            .map(|b| b as i8)
            .collect();
        let epb = (8 / self.bits) as usize;
        Tensor::from_slice(&packed, &[self.k, self.n / epb], Device::Cpu).expect("weight shape")
    }

    /// Weight preprocessed for `arch` and placed on `device`
    pub fn weight(&self, arch: u32, device: Device) -> ForgeResult<Tensor> {
        Ok(preprocess_weight(&self.row_major_weight(), self.bits, arch)?.to_device(device))
    }

    pub fn scales_tensor(&self, device: Device) -> Tensor {
        let shape = match self.group_size {
            Some(g) => vec![self.k / g, self.n],
            None => vec![self.n],
        };
        Tensor::from_slice(&self.scales, &shape, device).expect("scale shape")
    }

    pub fn input_tensor(&self, device: Device) -> Tensor {
        Tensor::from_slice(&self.input, &[self.m, self.k], device).expect("input shape")
    }

    pub fn bias_tensor(&self, device: Device) -> Option<Tensor> {
        self.with_bias
            .then(|| Tensor::from_slice(&self.bias, &[self.n], device).expect("bias shape"))
    }

    /// `input × (values * scales) + bias`, accumulated in f64
    pub fn reference(&self) -> Vec<f32> {
        let g = self.group_size.unwrap_or(self.k);
        let mut out = vec![0f32; self.m * self.n];
        for row in 0..self.m {
            for col in 0..self.n {
                let mut acc = 0f64;
                for kk in 0..self.k {
                    let x = self.input[row * self.k + kk].to_f32() as f64;
                    let q = self.values[kk * self.n + col] as f64;
                    let s = self.scales[(kk / g) * self.n + col].to_f32() as f64;
                    acc += x * q * s;
                }
                if self.with_bias {
                    acc += self.bias[col].to_f32() as f64;
                }
                out[row * self.n + col] = acc as f32;
            }
        }
        out
    }
}

/// Assert every element is within `rel` of the expected value, relative to
/// the element magnitude plus the largest magnitude in the output
pub fn assert_close(actual: &[f16], expected: &[f32], rel: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    let scale = expected.iter().fold(0f32, |acc, e| acc.max(e.abs())).max(1e-3);
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let a = a.to_f32();
        let tol = rel * (e.abs() + 0.1 * scale);
        assert!(
            (a - e).abs() <= tol,
            "element {}: got {}, expected {} (tolerance {})",
            i,
            a,
            e,
            tol
        );
    }
}

/// Compare two kernel outputs element by element
pub fn assert_outputs_agree(a: &[f16], b: &[f16], rel: f32) {
    let expected: Vec<f32> = b.iter().map(|v| v.to_f32()).collect();
    assert_close(a, &expected, rel);
}
