//! Kernel suite throughput on the CPU backend.
//!
//! Reports bytes/second per kernel so results read like the CLI's bandwidth
//! table.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use gpustream::prelude::*;

const SIZES: [usize; 2] = [1 << 16, 1 << 22];

fn build(n: usize, residency: Residency) -> Box<dyn Stream<f64>> {
    let mut stream = StreamBuilder::new()
        .backend(Backend::Cpu)
        .array_size(n)
        .residency(residency)
        .build::<f64>()
        .expect("Failed to build CPU stream");
    stream
        .init_arrays(0.1, 0.2, 0.0)
        .expect("Failed to init arrays");
    stream
}

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernels");
    group.sample_size(20);

    for n in SIZES {
        let mut stream = build(n, Residency::DeviceOnly);
        for kernel in [
            Kernel::Copy,
            Kernel::Mul,
            Kernel::Add,
            Kernel::Triad,
            Kernel::Nstream,
            Kernel::Dot,
        ] {
            group.throughput(Throughput::Bytes(kernel.bytes_moved(n, 8)));
            group.bench_with_input(BenchmarkId::new(kernel.name(), n), &kernel, |b, &k| {
                b.iter(|| black_box(stream.run_kernel(k).expect("kernel failed")));
            });
        }
    }

    group.finish();
}

fn bench_residency(c: &mut Criterion) {
    let mut group = c.benchmark_group("triad_residency");
    group.sample_size(20);

    let n = 1 << 20;
    group.throughput(Throughput::Bytes(Kernel::Triad.bytes_moved(n, 8)));
    for residency in Residency::ALL {
        let mut stream = build(n, residency);
        group.bench_function(BenchmarkId::from_parameter(residency), |b| {
            b.iter(|| stream.triad().expect("triad failed"));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_kernels, bench_residency);
criterion_main!(benches);
