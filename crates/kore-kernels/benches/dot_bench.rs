//! Benchmark: compensated dot product per backend and weight format, against
//! a naive f32 loop.

use kore_core::{DType, PackedSpan, Tensor};
use kore_kernels::{dot_tensor, dot_with, SimdBackend, SimdCapability};
use std::hint::black_box;
use std::time::Instant;

fn bench_naive(w: &[f32], v: &[f32], iters: usize) -> f64 {
    let start = Instant::now();
    for _ in 0..iters {
        let s: f32 = w.iter().zip(v).map(|(a, b)| a * b).sum();
        black_box(s);
    }
    start.elapsed().as_secs_f64() / iters as f64
}

fn bench_backend(backend: SimdBackend, w: &[f32], v: &[f32], iters: usize) -> f64 {
    let ws = PackedSpan::from_units(w);
    let vs = PackedSpan::from_units(v);
    let start = Instant::now();
    for _ in 0..iters {
        let s = dot_with(backend, &ws, 0, &vs, w.len()).unwrap();
        black_box(s);
    }
    start.elapsed().as_secs_f64() / iters as f64
}

fn bench_tensor(t: &Tensor, v: &[f32], iters: usize) -> f64 {
    let start = Instant::now();
    for _ in 0..iters {
        black_box(dot_tensor(t, 0, v));
    }
    start.elapsed().as_secs_f64() / iters as f64
}

fn gflops(n: usize, secs: f64) -> f64 {
    2.0 * n as f64 / secs / 1e9
}

fn main() {
    tracing_subscriber::fmt::init();

    let simd = SimdCapability::detect();
    println!("=== Kore Dot Benchmark ===");
    println!("SIMD: {} (avx2={}, avx512={}, fma={}, neon={})\n",
        simd.best_tier(), simd.avx2, simd.avx512f, simd.fma, simd.neon);

    let backends = SimdBackend::available();
    let sizes: &[usize] = &[1 << 10, 1 << 14, 1 << 18, 1 << 22];

    print!("{:<10} {:>12}", "Size", "Naive GF/s");
    for b in &backends {
        print!(" {:>12}", format!("{b} GF/s"));
    }
    println!();
    println!("{}", "-".repeat(23 + 13 * backends.len()));

    for &n in sizes {
        let w: Vec<f32> = (0..n).map(|i| ((i * 7 + 3) % 13) as f32 * 0.1 - 0.6).collect();
        let v: Vec<f32> = (0..n).map(|i| ((i * 11 + 5) % 17) as f32 * 0.1 - 0.8).collect();
        let iters = (1 << 24) / n;

        print!("{:<10} {:>12.2}", n, gflops(n, bench_naive(&w, &v, iters)));
        for &b in &backends {
            print!(" {:>12.2}", gflops(n, bench_backend(b, &w, &v, iters)));
        }
        println!();
    }

    println!("\n=== Weight formats (n = 2^20, selected backend) ===\n");
    println!("{:<8} {:>10} {:>10}", "DType", "ms", "GF/s");
    println!("{}", "-".repeat(30));

    let n = 1 << 20;
    let data: Vec<f32> = (0..n).map(|i| ((i * 7 + 3) % 13) as f32 * 0.1 - 0.6).collect();
    let v: Vec<f32> = (0..n).map(|i| ((i * 11 + 5) % 17) as f32 * 0.1 - 0.8).collect();
    for dtype in DType::ALL {
        let t = Tensor::from_f32("w", &data, &[n], dtype);
        let secs = bench_tensor(&t, &v, 16);
        println!("{:<8} {:>10.3} {:>10.2}", dtype.to_string(), secs * 1000.0, gflops(n, secs));
    }
}
