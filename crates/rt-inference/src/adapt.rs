//! Adaptation for NUTS: step size (dual averaging) and mass matrix (Welford).
//!
//! Implements the Stan warmup schedule: windowed adaptation with step size
//! tuning and diagonal or dense inverse-metric estimation.

use crate::hmc::{LeapfrogIntegrator, Metric};
use crate::posterior::Posterior;
use nalgebra::DMatrix;
use rt_core::LogDensityModel;

/// Dual averaging for step size adaptation (Nesterov 2009, Stan variant).
///
/// Adapts `epsilon` to achieve a target average acceptance probability.
pub struct DualAveraging {
    target_accept: f64,
    log_eps: f64,
    log_eps_bar: f64,
    h_bar: f64,
    mu: f64,
    gamma: f64,
    t0: f64,
    kappa: f64,
    step: usize,
}

impl DualAveraging {
    /// Create with target acceptance rate and initial step size.
    pub fn new(target_accept: f64, init_eps: f64) -> Self {
        // Smoothed step size starts at the current one; starting at 1.0 distorts short warmups.
        let log_eps0 = init_eps.ln();
        Self {
            target_accept,
            log_eps: log_eps0,
            log_eps_bar: log_eps0,
            h_bar: 0.0,
            mu: (10.0 * init_eps).ln(),
            gamma: 0.05,
            t0: 10.0,
            kappa: 0.75,
            step: 0,
        }
    }

    /// Update with observed acceptance probability from one transition.
    pub fn update(&mut self, accept_prob: f64) {
        let accept_prob = if accept_prob.is_finite() { accept_prob.clamp(0.0, 1.0) } else { 0.0 };
        self.step += 1;
        let m = self.step as f64;
        let w = 1.0 / (m + self.t0);
        self.h_bar = (1.0 - w) * self.h_bar + w * (self.target_accept - accept_prob);

        self.log_eps = self.mu - (m.sqrt() / self.gamma) * self.h_bar;
        let m_kappa = m.powf(-self.kappa);
        self.log_eps_bar = m_kappa * self.log_eps + (1.0 - m_kappa) * self.log_eps_bar;
    }

    /// Current step size (during warmup).
    pub fn current_step_size(&self) -> f64 {
        self.log_eps.exp()
    }

    /// Final adapted step size (after warmup, the smoothed version).
    pub fn adapted_step_size(&self) -> f64 {
        self.log_eps_bar.exp()
    }

    /// Reset internal state for a new adaptation window, keeping the current step size.
    pub fn reset(&mut self, init_eps: f64) {
        self.log_eps = init_eps.ln();
        self.log_eps_bar = init_eps.ln();
        self.h_bar = 0.0;
        self.mu = (10.0 * init_eps).ln();
        self.step = 0;
    }
}

/// Online Welford variance estimator (diagonal metric).
pub struct WelfordVariance {
    mean: Vec<f64>,
    m2: Vec<f64>,
    count: usize,
}

impl WelfordVariance {
    /// Create for `dim`-dimensional parameter vector.
    pub fn new(dim: usize) -> Self {
        Self { mean: vec![0.0; dim], m2: vec![0.0; dim], count: 0 }
    }

    /// Number of samples seen since the last reset.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Incorporate a new sample.
    pub fn update(&mut self, x: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for i in 0..x.len() {
            let delta = x[i] - self.mean[i];
            self.mean[i] += delta / n;
            let delta2 = x[i] - self.mean[i];
            self.m2[i] += delta * delta2;
        }
    }

    /// Current variance estimate. Returns `1.0` for each dimension if `count < 2`.
    pub fn variance(&self) -> Vec<f64> {
        if self.count < 2 {
            return vec![1.0; self.mean.len()];
        }
        let n = self.count as f64;
        self.m2.iter().map(|&m| (m / (n - 1.0)).max(1e-10)).collect()
    }

    /// Reset the estimator.
    pub fn reset(&mut self) {
        self.mean.fill(0.0);
        self.m2.fill(0.0);
        self.count = 0;
    }
}

/// Online Welford covariance estimator (dense metric).
///
/// Maintains a running mean and `M2` matrix such that `cov = M2 / (n-1)`.
pub struct WelfordCovariance {
    mean: Vec<f64>,
    m2: Vec<f64>, // row-major dim x dim
    dim: usize,
    count: usize,
}

impl WelfordCovariance {
    /// Create for `dim`-dimensional parameter vector.
    pub fn new(dim: usize) -> Self {
        Self { mean: vec![0.0; dim], m2: vec![0.0; dim * dim], dim, count: 0 }
    }

    /// Number of samples seen since the last reset.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Incorporate a new sample.
    pub fn update(&mut self, x: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        let dim = self.dim;

        let delta: Vec<f64> = (0..dim).map(|i| x[i] - self.mean[i]).collect();
        for i in 0..dim {
            self.mean[i] += delta[i] / n;
        }
        let delta2: Vec<f64> = (0..dim).map(|i| x[i] - self.mean[i]).collect();

        for i in 0..dim {
            for j in 0..dim {
                self.m2[i * dim + j] += delta[i] * delta2[j];
            }
        }
    }

    /// Sample covariance, or `None` with fewer than two samples.
    pub fn covariance(&self) -> Option<DMatrix<f64>> {
        if self.count < 2 {
            return None;
        }
        let denom = (self.count as f64) - 1.0;
        Some(DMatrix::from_row_slice(self.dim, self.dim, &self.m2).map(|v| v / denom))
    }

    /// Reset the estimator.
    pub fn reset(&mut self) {
        self.mean.fill(0.0);
        self.m2.fill(0.0);
        self.count = 0;
    }
}

/// Stan's regularisation of a window estimate towards a small multiple of
/// the identity: `(n/(n+5)) * est + 1e-3 * (5/(n+5))`.
fn regularize(est: f64, count: usize, on_diagonal: bool) -> f64 {
    let n = count as f64;
    let shrunk = (n / (n + 5.0)) * est;
    if on_diagonal {
        shrunk + 1e-3 * (5.0 / (n + 5.0))
    } else {
        shrunk
    }
}

/// Windowed adaptation combining step size + inverse-metric tuning.
///
/// Follows the Stan schedule:
/// ```text
/// n_warmup = 1000 (example):
///   Window 0: iters 0..75     : fast adapt (step size only)
///   Window 1: iters 75..100   : slow (step size + metric at end)
///   Window 2: iters 100..150  : slow (step size + metric at end)
///   ...                       : doubling slow windows
///   Last:     iters 950..1000 : final (step size only, metric locked)
/// ```
pub struct WindowedAdaptation {
    dual_avg: DualAveraging,
    welford: WelfordVariance,
    welford_cov: Option<WelfordCovariance>,
    windows: Vec<(usize, usize)>,
    current_window: usize,
    metric: Metric,
}

impl WindowedAdaptation {
    /// Create windowed adaptation for given dimension and warmup length.
    ///
    /// With `dense = true` the slow windows estimate a full covariance.
    pub fn new(dim: usize, n_warmup: usize, target_accept: f64, init_eps: f64, dense: bool) -> Self {
        Self {
            dual_avg: DualAveraging::new(target_accept, init_eps),
            welford: WelfordVariance::new(dim),
            welford_cov: dense.then(|| WelfordCovariance::new(dim)),
            windows: compute_windows(n_warmup),
            current_window: 0,
            metric: Metric::identity(dim),
        }
    }

    /// Update adaptation with a new sample and its acceptance probability.
    ///
    /// Returns `true` if the metric was updated (at a slow window boundary).
    pub fn update(&mut self, iter: usize, q: &[f64], accept_prob: f64) -> bool {
        self.dual_avg.update(accept_prob);

        let mut metric_updated = false;

        if self.current_window < self.windows.len() {
            let (_start, end) = self.windows[self.current_window];

            // Collect samples in slow windows (skip first and last)
            let is_slow_window =
                self.current_window > 0 && self.current_window < self.windows.len() - 1;
            if is_slow_window {
                match self.welford_cov.as_mut() {
                    Some(wc) => wc.update(q),
                    None => self.welford.update(q),
                }
            }

            if iter + 1 >= end {
                if is_slow_window {
                    self.metric = self.estimate_metric();
                    self.welford.reset();
                    if let Some(wc) = self.welford_cov.as_mut() {
                        wc.reset();
                    }
                    metric_updated = true;
                }

                // Restart dual averaging from the current adapted step size
                let eps = self.dual_avg.adapted_step_size();
                self.dual_avg.reset(eps);
                self.current_window += 1;
            }
        }

        metric_updated
    }

    fn estimate_metric(&self) -> Metric {
        if let Some(wc) = self.welford_cov.as_ref() {
            if let Some(cov) = wc.covariance() {
                let n = cov.nrows();
                let count = wc.count();
                let reg = DMatrix::from_fn(n, n, |i, j| regularize(cov[(i, j)], count, i == j));
                if let Some(ch) = reg.cholesky() {
                    // nalgebra is column-major; Metric wants row-major L.
                    let l = ch.l().transpose();
                    return Metric::DenseCholesky { dim: n, l: l.as_slice().to_vec() };
                }
            }
            // Singular window: keep the current metric.
            return self.metric.clone();
        }

        let count = self.welford.count();
        Metric::Diag(self.welford.variance().into_iter().map(|v| regularize(v, count, true)).collect())
    }

    /// Current step size.
    pub fn step_size(&self) -> f64 {
        self.dual_avg.current_step_size()
    }

    /// Final adapted step size (smoothed).
    pub fn adapted_step_size(&self) -> f64 {
        self.dual_avg.adapted_step_size()
    }

    /// Current metric (inverse mass matrix).
    pub fn metric(&self) -> &Metric {
        &self.metric
    }
}

/// Compute Stan-style adaptation windows.
pub(crate) fn compute_windows(n_warmup: usize) -> Vec<(usize, usize)> {
    // Short warmups give unstable variance estimates; adapt step size only.
    if n_warmup < 50 {
        return vec![(0, n_warmup)];
    }

    let init_buffer = 75.min(n_warmup * 15 / 100);
    let term_buffer = 50.min(n_warmup / 10);
    let slow_end = n_warmup - term_buffer;

    let mut windows = vec![(0, init_buffer)];

    // Doubling slow windows; the last one absorbs the remainder.
    let mut start = init_buffer;
    let mut size = 25usize;
    while start < slow_end {
        let mut end = (start + size).min(slow_end);
        if slow_end - end < 2 * size {
            end = slow_end;
        }
        windows.push((start, end));
        start = end;
        size *= 2;
    }

    windows.push((slow_end, n_warmup));
    windows
}

/// Find a reasonable initial step size by testing energy error.
///
/// Doubles or halves `eps` until the acceptance probability crosses 0.5
/// (Hoffman & Gelman 2014, Algorithm 4).
pub fn find_reasonable_step_size<M: LogDensityModel + ?Sized>(
    posterior: &Posterior<'_, M>,
    q: &[f64],
    metric: &Metric,
) -> f64 {
    let integrator = LeapfrogIntegrator::new(posterior, 1.0, metric.clone());

    let mut state = match integrator.init_state(q.to_vec()) {
        Ok(s) => s,
        Err(_) => return 0.01,
    };
    state.p.fill(1.0);
    let h0 = state.hamiltonian(metric);

    let test_accept = |eps_test: f64| -> Option<f64> {
        let mut s = state.clone();
        integrator.step_with_eps(&mut s, eps_test).ok()?;
        let a = (h0 - s.hamiltonian(metric)).exp();
        if a.is_finite() {
            Some(a.min(1.0))
        } else {
            None
        }
    };

    let mut eps = 0.1;
    let accept0 = match test_accept(eps) {
        Some(a) => a,
        None => {
            eps = 0.001;
            match test_accept(eps) {
                Some(a) => a,
                None => return 0.001,
            }
        }
    };

    let direction: f64 = if accept0 > 0.5 { 1.0 } else { -1.0 };

    for _ in 0..50 {
        let new_eps = eps * 2.0_f64.powf(direction);
        if !(1e-10..=1e3).contains(&new_eps) {
            break;
        }

        match test_accept(new_eps) {
            Some(a) => {
                if direction > 0.0 && a < 0.5 {
                    break;
                }
                if direction < 0.0 && a > 0.5 {
                    eps = new_eps;
                    break;
                }
                eps = new_eps;
            }
            None => break,
        }
    }

    eps.clamp(1e-8, 1e3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dual_averaging_converges() {
        let mut da = DualAveraging::new(0.8, 1.0);
        for _ in 0..100 {
            da.update(0.8);
        }
        let eps = da.adapted_step_size();
        assert!(eps > 0.0 && eps.is_finite(), "Step size should be positive finite: {}", eps);
    }

    #[test]
    fn test_dual_averaging_adapts_direction() {
        let mut da_high = DualAveraging::new(0.8, 0.01);
        for _ in 0..200 {
            da_high.update(0.99);
        }
        let mut da_low = DualAveraging::new(0.8, 1.0);
        for _ in 0..200 {
            da_low.update(0.1);
        }
        assert!(da_high.adapted_step_size() > da_low.adapted_step_size());
    }

    #[test]
    fn test_dual_averaging_ignores_nan() {
        let mut da = DualAveraging::new(0.8, 0.5);
        da.update(f64::NAN);
        assert!(da.current_step_size().is_finite());
    }

    #[test]
    fn test_welford_variance() {
        let mut w = WelfordVariance::new(2);
        let data = [[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0], [5.0, 50.0]];
        for d in &data {
            w.update(d);
        }
        let var = w.variance();
        assert_relative_eq!(var[0], 2.5, epsilon = 1e-10);
        assert_relative_eq!(var[1], 250.0, epsilon = 1e-10);

        w.reset();
        assert_eq!(w.variance(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_welford_covariance() {
        let mut w = WelfordCovariance::new(2);
        for d in [[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0]] {
            w.update(&d);
        }
        let cov = w.covariance().unwrap();
        // var(x) = 5/3, cov(x, 2x) = 10/3, var(2x) = 20/3
        assert_relative_eq!(cov[(0, 0)], 5.0 / 3.0, epsilon = 1e-10);
        assert_relative_eq!(cov[(0, 1)], 10.0 / 3.0, epsilon = 1e-10);
        assert_relative_eq!(cov[(1, 0)], 10.0 / 3.0, epsilon = 1e-10);
        assert_relative_eq!(cov[(1, 1)], 20.0 / 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_compute_windows() {
        for n in [50, 200, 700, 1000] {
            let windows = compute_windows(n);
            assert!(windows.len() >= 3, "n={n}: {:?}", windows);
            assert_eq!(windows[0].0, 0);
            assert_eq!(windows.last().unwrap().1, n);
            for i in 1..windows.len() {
                assert_eq!(windows[i].0, windows[i - 1].1, "n={n}: not contiguous at {i}");
                assert!(windows[i].1 > windows[i].0, "n={n}: empty window {i}");
            }
        }
    }

    #[test]
    fn test_compute_windows_small() {
        assert_eq!(compute_windows(5), vec![(0, 5)]);
        assert_eq!(compute_windows(0), vec![(0, 0)]);
    }

    #[test]
    fn test_dense_adaptation_produces_row_major_factor() {
        // Three-window schedule with a correlated target in the slow window.
        let mut adapt = WindowedAdaptation::new(2, 100, 0.8, 0.1, true);
        for i in 0..100 {
            let x = (i as f64 * 0.37).sin();
            let y = 2.0 * x + 0.1 * (i as f64 * 1.3).cos();
            adapt.update(i, &[x, y], 0.8);
        }
        match adapt.metric() {
            Metric::DenseCholesky { dim, l } => {
                assert_eq!(*dim, 2);
                // Lower triangular in row-major order: upper-right entry is zero.
                assert_eq!(l[1], 0.0);
                assert!(l[2] > 0.0, "positive correlation expected: {:?}", l);
            }
            other => panic!("expected dense metric, got {:?}", other),
        }
    }
}
