use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rt_core::LogDensityModel;
use rt_inference::{sample_nuts, NutsConfig};
use std::hint::black_box;
use std::time::Duration;

/// Correlated Gaussian random walk of length `n` with a flat start.
struct RandomWalk {
    n: usize,
    sigma: f64,
}

impl LogDensityModel for RandomWalk {
    fn dim(&self) -> usize {
        self.n
    }

    fn parameter_names(&self) -> Vec<String> {
        (0..self.n).map(|i| format!("x[{i}]")).collect()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        vec![(f64::NEG_INFINITY, f64::INFINITY); self.n]
    }

    fn parameter_init(&self) -> Vec<f64> {
        vec![0.0; self.n]
    }

    fn nll(&self, params: &[f64]) -> rt_core::Result<f64> {
        // Anchor the first point so the density is proper.
        let anchor = 0.5 * params[0] * params[0];
        let steps: f64 = params.windows(2).map(|w| 0.5 * ((w[1] - w[0]) / self.sigma).powi(2)).sum();
        Ok(anchor + steps)
    }

    fn grad_nll(&self, params: &[f64]) -> rt_core::Result<Vec<f64>> {
        let mut g = vec![0.0; self.n];
        g[0] = params[0];
        let s2 = self.sigma * self.sigma;
        for i in 1..self.n {
            let d = (params[i] - params[i - 1]) / s2;
            g[i] += d;
            g[i - 1] -= d;
        }
        Ok(g)
    }
}

fn bench_nuts_random_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("nuts_random_walk");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for n in [10usize, 50] {
        let model = RandomWalk { n, sigma: 0.2 };
        group.bench_with_input(BenchmarkId::new("warmup100_draws100", n), &n, |b, _| {
            b.iter(|| {
                let chain = sample_nuts(&model, 100, 100, 42, &NutsConfig::default()).unwrap();
                black_box(chain.step_size)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_nuts_random_walk);
criterion_main!(benches);
