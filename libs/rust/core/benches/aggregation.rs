/// Aggregation engine benchmarks.
///
/// Run with: cargo bench --bench aggregation

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use federation_core::{aggregate, privatize, LayerTensor, RoundUpdate, WeightSnapshot};

fn updates(n_participants: usize, n_params: usize) -> BTreeMap<String, RoundUpdate> {
    (0..n_participants)
        .map(|i| {
            let values: Vec<f64> = (0..n_params).map(|j| ((i * n_params + j) as f64).sin()).collect();
            let weights = WeightSnapshot::new()
                .with_layer("layer1", LayerTensor::vector(values))
                .with_layer("bias1", LayerTensor::filled(vec![64], i as f64));
            let update = RoundUpdate { weights, sample_count: 1_000 + i as u64 * 250, training_loss: 0.2, validation_accuracy: 0.9 };
            (format!("org-{i:03}"), update)
        })
        .collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    for &n_participants in &[4usize, 16, 64] {
        for &n_params in &[1_000usize, 100_000] {
            let input = updates(n_participants, n_params);
            let id = format!("{n_participants}p_{n_params}w");
            group.bench_with_input(BenchmarkId::new("fedavg", &id), &input, |b, input| {
                b.iter(|| black_box(aggregate(input).unwrap()))
            });
        }
    }
    group.finish();
}

fn bench_privatize(c: &mut Criterion) {
    let input = updates(1, 100_000);
    let snapshot = aggregate(&input).unwrap();
    c.bench_function("privatize_100k", |b| b.iter(|| black_box(privatize(&snapshot, 1.0, 4).unwrap())));
}

criterion_group!(benches, bench_aggregate, bench_privatize);
criterion_main!(benches);
