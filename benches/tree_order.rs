//! Scenario tree construction, exact against heuristic.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use regdecomp::scenario::ScenarioTree;
use regdecomp::TreeOrdering;
use std::hint::black_box;

fn random_points(n: usize) -> Vec<[f64; 2]> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    (0..n)
        .map(|_| [rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)])
        .collect()
}

fn bench_tree_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenario_tree");
    for &n in &[50usize, 200, 800] {
        let points = random_points(n);
        let distance = |i: usize, j: usize| {
            (points[i][0] - points[j][0]).abs() + (points[i][1] - points[j][1]).abs()
        };
        for ordering in [TreeOrdering::Exact, TreeOrdering::Heuristic] {
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", ordering), n),
                &n,
                |b, &n| b.iter(|| ScenarioTree::build(black_box(n), distance, ordering)),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_tree_order);
criterion_main!(benches);
