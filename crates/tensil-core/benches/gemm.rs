//! GEMM throughput on the CPU backend, single and batched.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tensil_core::{ContextConfig, DeviceContext, Matrix, Queue, Tensor};

fn queue() -> Queue {
    DeviceContext::new(ContextConfig::default())
        .unwrap()
        .default_queue()
        .clone()
}

fn seeded(n: usize) -> Vec<f32> {
    (0..n).map(|i| ((i * 7 + 3) % 13) as f32 * 0.1 - 0.6).collect()
}

fn bench_gemm(c: &mut Criterion) {
    let q = queue();
    let mut group = c.benchmark_group("gemm");
    for &size in &[64usize, 128, 256, 512] {
        let a = Matrix::from_host(&seeded(size * size), size, size, &q).unwrap();
        let b = Matrix::from_host(&seeded(size * size), size, size, &q).unwrap();
        let mut out = Matrix::new(size, size, &q).unwrap();
        group.throughput(Throughput::Elements((2 * size * size * size) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| {
            bench.iter(|| out.gemm(1.0, false, &a, false, &b, &q).unwrap());
        });
    }
    group.finish();
}

fn bench_batched_gemm(c: &mut Criterion) {
    let q = queue();
    let mut group = c.benchmark_group("batched_gemm");
    let size = 64usize;
    for &depth in &[4usize, 16, 64] {
        let a = Matrix::from_host(&seeded(size * size), size, size, &q).unwrap();
        let b = Tensor::from_host(&seeded(size * size * depth), size, size, depth, &q).unwrap();
        let mut out = Tensor::new(size, size, depth, &q).unwrap();
        group.throughput(Throughput::Elements((2 * size * size * size * depth) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |bench, _| {
            bench.iter(|| out.batched_gemm(1.0, false, &a, false, &b, &q).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_gemm, bench_batched_gemm);
criterion_main!(benches);
