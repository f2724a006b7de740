//! Active-set factorization updates against full rebuilds.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use regdecomp::linalg::ActiveSetFactorization;
use std::hint::black_box;

fn random_columns(n: usize, k: usize) -> Vec<Vec<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    (0..k)
        .map(|_| (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn filled(n: usize, columns: &[Vec<f64>]) -> ActiveSetFactorization {
    let mut f = ActiveSetFactorization::new(n, 1e-20);
    for col in columns {
        f.add_column(col.clone());
    }
    f
}

fn bench_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("factorization");
    for &n in &[20usize, 80, 200] {
        let k = n / 2;
        let columns = random_columns(n, k + 1);
        let base = filled(n, &columns[..k]);

        group.bench_with_input(BenchmarkId::new("add_remove", n), &n, |b, _| {
            b.iter(|| {
                let mut f = base.clone();
                f.add_column(black_box(columns[k].clone()));
                f.remove_column(0);
                f
            })
        });
        group.bench_with_input(BenchmarkId::new("fix_release", n), &n, |b, _| {
            b.iter(|| {
                let mut f = base.clone();
                f.fix_variable(black_box(n - 1));
                f.release_variable(n - 1);
                f
            })
        });
        group.bench_with_input(BenchmarkId::new("rebuild", n), &n, |b, _| {
            b.iter(|| {
                let mut f = base.clone();
                f.rebuild();
                f
            })
        });
        group.bench_with_input(BenchmarkId::new("solve_normal", n), &n, |b, _| {
            let rhs: Vec<f64> = (0..k).map(|i| i as f64).collect();
            b.iter(|| {
                let mut x = rhs.clone();
                base.solve_normal(black_box(&mut x));
                x
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_updates);
criterion_main!(benches);
