//! Quantized Matmul Benchmark Suite
//!
//! Measures weight preprocessing and both dispatch paths (batched vector and
//! tiled GEMM) on the host backend.
//!
//! Run with: `cargo bench --bench dispatch_bench`

use std::hint::black_box;
use std::time::{Duration, Instant};

use half::f16;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quantforge::quant::layout::pack_signed;
use quantforge::quant::BitWidth;
use quantforge::{preprocess_weight, quant_matmul, Device, HostBackend, Tensor};

// ============================================================================
// Benchmark Harness
// ============================================================================

struct Benchmark {
    name: String,
    iterations: usize,
}

impl Benchmark {
    fn new(name: &str, iterations: usize) -> Self {
        Benchmark {
            name: name.to_string(),
            iterations,
        }
    }

    /// One untimed warmup call, then `iterations` timed calls
    fn run_time<F, R>(&self, mut f: F) -> BenchmarkResult
    where
        F: FnMut() -> R,
    {
        black_box(f());
        let mut durations: Vec<Duration> = (0..self.iterations)
            .map(|_| {
                let start = Instant::now();
                black_box(f());
                start.elapsed()
            })
            .collect();
        durations.sort();
        BenchmarkResult {
            name: self.name.clone(),
            durations,
        }
    }
}

/// Sorted per-iteration timings
struct BenchmarkResult {
    name: String,
    durations: Vec<Duration>,
}

impl BenchmarkResult {
    fn median(&self) -> Duration {
        self.durations[self.durations.len() / 2]
    }

    fn report(&self) {
        println!(
            "{:<40} median {:>9.3} ms  min {:>9.3} ms",
            self.name,
            self.median().as_secs_f64() * 1000.0,
            self.durations[0].as_secs_f64() * 1000.0
        );
    }
}

// ============================================================================
// Test Data Generation
// ============================================================================

const N: usize = 1024;
const K: usize = 2048;

fn host_weight(bits: u32, rng: &mut StdRng) -> Tensor {
    let (lo, hi, width) = if bits == 4 {
        (-8i8, 7i8, BitWidth::Int4)
    } else {
        (-127i8, 127i8, BitWidth::Int8)
    };
    let values: Vec<i8> = (0..K * N).map(|_| rng.gen_range(lo..=hi)).collect();
    let packed: Vec<i8> = pack_signed(&values, width)
        .expect("values fit the bit width")
        .into_iter()
        .map(|b| b as i8)
        .collect();
    let epb = (8 / bits) as usize;
    Tensor::from_slice(&packed, &[K, N / epb], Device::Cpu).expect("weight shape")
}

fn f16_tensor(len: usize, shape: &[usize], scale: f32, rng: &mut StdRng) -> Tensor {
    let data: Vec<f16> = (0..len)
        .map(|_| f16::from_f32(rng.gen_range(-1.0f32..1.0) * scale))
        .collect();
    Tensor::from_slice(&data, shape, Device::Gpu(0)).expect("f16 shape")
}

// ============================================================================
// Benchmarks
// ============================================================================

fn benchmark_preprocess(bits: u32, arch: u32) {
    let mut rng = StdRng::seed_from_u64(42);
    let host = host_weight(bits, &mut rng);
    let bench = Benchmark::new(&format!("preprocess int{} {}x{} sm_{}", bits, K, N, arch), 10);
    let result = bench.run_time(|| preprocess_weight(&host, bits, arch).expect("preprocess"));
    result.report();
    let bytes = host.byte_len() as f64;
    println!("{:<40} {:.2} MB/sec", "", bytes / result.median().as_secs_f64() / 1e6);
}

fn benchmark_matmul(m: usize, bits: u32, group_size: Option<usize>) {
    let mut rng = StdRng::seed_from_u64(7);
    let backend = HostBackend::new(1);
    let weight = preprocess_weight(&host_weight(bits, &mut rng), bits, 80)
        .expect("preprocess")
        .to_device(Device::Gpu(0));
    let scales = match group_size {
        Some(g) => f16_tensor(K / g * N, &[K / g, N], 0.01, &mut rng),
        None => f16_tensor(N, &[N], 0.01, &mut rng),
    };
    let input = f16_tensor(m * K, &[m, K], 1.0, &mut rng);

    let scheme = group_size.map_or_else(|| "per-channel".to_string(), |g| format!("group {}", g));
    let bench = Benchmark::new(&format!("matmul m={} int{} {}", m, bits, scheme), 10);
    let result = bench.run_time(|| {
        quant_matmul(&backend, &input, &weight, &scales, None, bits).expect("matmul")
    });
    result.report();
    let flops = 2.0 * (m * N * K) as f64;
    let stats = backend.stats();
    println!(
        "{:<40} {:.2} GFLOP/s ({} batched-vector, {} tiled GEMM launches)",
        "",
        flops / result.median().as_secs_f64() / 1e9,
        stats.gemv_launches,
        stats.gemm_launches
    );
}

fn main() {
    println!("========================================");
    println!("quantforge Dispatch Benchmark Suite");
    println!("========================================");
    println!("\nWeight: K={} N={}", K, N);

    println!("\n========================================");
    println!("WEIGHT PREPROCESSING");
    println!("========================================");
    benchmark_preprocess(4, 70);
    benchmark_preprocess(4, 80);
    benchmark_preprocess(8, 80);

    println!("\n========================================");
    println!("BATCHED VECTOR PATH");
    println!("========================================");
    benchmark_matmul(1, 4, None);
    benchmark_matmul(4, 4, Some(128));
    benchmark_matmul(4, 8, None);

    println!("\n========================================");
    println!("TILED GEMM PATH");
    println!("========================================");
    benchmark_matmul(16, 4, Some(64));
    benchmark_matmul(64, 8, None);
    benchmark_matmul(64, 8, Some(128));
}
