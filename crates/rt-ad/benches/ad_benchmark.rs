use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rt_ad::tape::Tape;
use std::hint::black_box;

const KERNEL_LEN: usize = 20;

fn kernel() -> Vec<f64> {
    let raw: Vec<f64> = (0..KERNEL_LEN).map(|k| if k == 0 { 0.0 } else { (k as f64) * (-(k as f64) / 4.0).exp() }).collect();
    let s: f64 = raw.iter().sum();
    raw.into_iter().map(|v| v / s).collect()
}

fn bench_renewal_tape(c: &mut Criterion) {
    let mut group = c.benchmark_group("ad_renewal");
    let g = kernel();

    for n_days in [30usize, 120, 365] {
        group.bench_with_input(BenchmarkId::new("build_and_backward", n_days), &n_days, |b, &n| {
            let mut t = Tape::with_capacity(n * 8, n * KERNEL_LEN);
            b.iter(|| {
                t.clear();
                let log_r: Vec<_> = (0..n).map(|i| t.var(1e-3 * i as f64)).collect();
                let seed = t.var(0.02);
                let mut inf = Vec::with_capacity(n);
                inf.push(seed);
                let mut terms = Vec::with_capacity(KERNEL_LEN);
                for day in 1..n {
                    terms.clear();
                    for k in 1..KERNEL_LEN.min(day + 1) {
                        terms.push((inf[day - k], g[k]));
                    }
                    let pressure = t.linear(&terms);
                    let r = t.exp(log_r[day]);
                    inf.push(t.mul(r, pressure));
                }
                let total = t.sum(&inf);
                t.backward(total);
                black_box((t.adjoint(seed), t.adjoint(log_r[n / 2])));
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_renewal_tape);
criterion_main!(benches);
