//! Hamiltonian Monte Carlo (HMC) leapfrog integrator.
//!
//! This module provides the core building blocks shared by warmup and NUTS:
//! the Euclidean metric, the phase-space state and the leapfrog integrator.

use crate::posterior::Posterior;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use rt_core::{LogDensityModel, Result};

/// Euclidean metric for HMC/NUTS.
///
/// We store the *inverse* mass matrix (a.k.a. precision) because that's what
/// leapfrog needs for the velocity `dq/dt = M^{-1} p` and for the kinetic
/// energy `K = 0.5 * p^T M^{-1} p`.
///
/// For the dense case we store the Cholesky factor `L` of the inverse mass
/// matrix, `M^{-1} = L L^T`, in row-major order. This lets us:
/// - multiply `M^{-1} p` via two triangular multiplies
/// - sample `p ~ N(0, M)` via solving `L^T p = z`, `z ~ N(0, I)`
#[derive(Debug, Clone)]
pub enum Metric {
    /// Diagonal inverse mass matrix.
    Diag(Vec<f64>),
    /// Dense inverse mass matrix stored as its lower Cholesky factor.
    DenseCholesky {
        /// Dimension.
        dim: usize,
        /// Row-major `dim x dim` lower-triangular factor.
        l: Vec<f64>,
    },
}

impl Metric {
    /// Unit metric.
    pub fn identity(dim: usize) -> Self {
        Self::Diag(vec![1.0; dim])
    }

    /// Dimension of the metric.
    pub fn dim(&self) -> usize {
        match self {
            Metric::Diag(v) => v.len(),
            Metric::DenseCholesky { dim, .. } => *dim,
        }
    }

    /// Whether this is a dense metric.
    pub fn is_dense(&self) -> bool {
        matches!(self, Metric::DenseCholesky { .. })
    }

    #[inline]
    fn l_at(l: &[f64], dim: usize, i: usize, j: usize) -> f64 {
        l[i * dim + j]
    }

    /// Multiply by inverse mass: `v = M^{-1} p`.
    pub fn mul_inv_mass(&self, p: &[f64]) -> Vec<f64> {
        match self {
            Metric::Diag(inv_mass_diag) => {
                inv_mass_diag.iter().zip(p.iter()).map(|(&m, &pi)| m * pi).collect()
            }
            Metric::DenseCholesky { dim, l } => {
                let n = *dim;
                debug_assert_eq!(p.len(), n);

                // t = L^T p
                let t: Vec<f64> =
                    (0..n).map(|i| (i..n).map(|k| Self::l_at(l, n, k, i) * p[k]).sum::<f64>()).collect();
                // v = L t
                (0..n).map(|i| (0..=i).map(|k| Self::l_at(l, n, i, k) * t[k]).sum::<f64>()).collect()
            }
        }
    }

    /// Kinetic energy `0.5 * p^T M^{-1} p`.
    pub fn kinetic_energy(&self, p: &[f64]) -> f64 {
        let v = self.mul_inv_mass(p);
        0.5 * p.iter().zip(v.iter()).map(|(&pi, &vi)| pi * vi).sum::<f64>()
    }

    /// Draw a momentum `p ~ N(0, M)`.
    pub fn sample_momentum<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        match self {
            Metric::Diag(inv_mass_diag) => inv_mass_diag
                .iter()
                .map(|&inv_m| {
                    let sigma = if inv_m > 0.0 { (1.0 / inv_m).sqrt() } else { 1.0 };
                    let z: f64 = StandardNormal.sample(rng);
                    sigma * z
                })
                .collect(),
            Metric::DenseCholesky { dim, l } => {
                let n = *dim;
                let z: Vec<f64> = (0..n).map(|_| StandardNormal.sample(rng)).collect();

                // Solve L^T p = z for p (back-substitution).
                let mut p = vec![0.0; n];
                for i in (0..n).rev() {
                    let mut rhs = z[i];
                    for k in (i + 1)..n {
                        rhs -= Self::l_at(l, n, k, i) * p[k];
                    }
                    let diag = Self::l_at(l, n, i, i);
                    p[i] = if !diag.is_finite() || diag.abs() < 1e-14 { z[i] } else { rhs / diag };
                }
                p
            }
        }
    }
}

/// HMC phase-space state: position + momentum + cached potential/gradient.
#[derive(Debug, Clone)]
pub struct HmcState {
    /// Position in unconstrained space.
    pub q: Vec<f64>,
    /// Momentum.
    pub p: Vec<f64>,
    /// Potential energy: `-logpdf_unconstrained(q)`.
    pub potential: f64,
    /// Gradient of potential: `-grad_unconstrained(q)`.
    pub grad_potential: Vec<f64>,
}

impl HmcState {
    /// Total Hamiltonian: `H = U(q) + K(p)`.
    pub fn hamiltonian(&self, metric: &Metric) -> f64 {
        self.potential + metric.kinetic_energy(&self.p)
    }
}

/// Leapfrog integrator for HMC.
pub struct LeapfrogIntegrator<'a, 'b, M: LogDensityModel + ?Sized> {
    posterior: &'a Posterior<'b, M>,
    step_size: f64,
    metric: Metric,
}

impl<'a, 'b, M: LogDensityModel + ?Sized> LeapfrogIntegrator<'a, 'b, M> {
    /// Create a new leapfrog integrator.
    pub fn new(posterior: &'a Posterior<'b, M>, step_size: f64, metric: Metric) -> Self {
        Self { posterior, step_size, metric }
    }

    /// Current step size.
    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Current metric.
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// Initialize an HMC state at position `q` with zero momentum.
    pub fn init_state(&self, q: Vec<f64>) -> Result<HmcState> {
        let (lp, grad_lp) = self.posterior.logpdf_grad_unconstrained(&q)?;
        let grad_potential: Vec<f64> = grad_lp.iter().map(|&g| -g).collect();
        Ok(HmcState { q, p: vec![0.0; grad_potential.len()], potential: -lp, grad_potential })
    }

    /// Single leapfrog step with explicit (possibly negative) step size.
    ///
    /// A non-finite potential is left in the state; callers treat it as a
    /// divergence. `Err` is reserved for model failures.
    pub fn step_with_eps(&self, state: &mut HmcState, eps: f64) -> Result<()> {
        let n = state.q.len();

        for i in 0..n {
            state.p[i] -= 0.5 * eps * state.grad_potential[i];
        }

        let v = self.metric.mul_inv_mass(&state.p);
        for i in 0..n {
            state.q[i] += eps * v[i];
        }

        let (lp, grad_lp) = self.posterior.logpdf_grad_unconstrained(&state.q)?;
        state.potential = -lp;
        for i in 0..n {
            state.grad_potential[i] = -grad_lp[i];
        }

        for i in 0..n {
            state.p[i] -= 0.5 * eps * state.grad_potential[i];
        }

        Ok(())
    }

    /// Single leapfrog step with the configured step size.
    pub fn step(&self, state: &mut HmcState) -> Result<()> {
        self.step_with_eps(state, self.step_size)
    }

    /// Take one leapfrog step in the given direction (`+1` forward, `-1` backward).
    pub fn step_dir(&self, state: &mut HmcState, direction: i32) -> Result<()> {
        debug_assert!(direction == 1 || direction == -1);
        self.step_with_eps(state, self.step_size * (direction as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posterior::tests::NormalExp;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn test_dense_identity_matches_diag() {
        let dense = Metric::DenseCholesky { dim: 2, l: vec![1.0, 0.0, 0.0, 1.0] };
        let diag = Metric::identity(2);
        let p = [0.3, -1.2];
        assert_eq!(dense.mul_inv_mass(&p), diag.mul_inv_mass(&p));
        assert_relative_eq!(dense.kinetic_energy(&p), diag.kinetic_energy(&p), epsilon = 1e-12);
    }

    #[test]
    fn test_dense_mul_inv_mass() {
        // L = [[2, 0], [1, 3]] => L L^T = [[4, 2], [2, 10]]
        let m = Metric::DenseCholesky { dim: 2, l: vec![2.0, 0.0, 1.0, 3.0] };
        let v = m.mul_inv_mass(&[1.0, 1.0]);
        assert_relative_eq!(v[0], 6.0, epsilon = 1e-12);
        assert_relative_eq!(v[1], 12.0, epsilon = 1e-12);
    }

    #[test]
    fn test_diag_momentum_scale() {
        // inv_mass = 4 => p ~ N(0, 1/4)
        let m = Metric::Diag(vec![4.0]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let n = 20_000;
        let var: f64 = (0..n).map(|_| m.sample_momentum(&mut rng)[0].powi(2)).sum::<f64>() / n as f64;
        assert_relative_eq!(var, 0.25, epsilon = 0.02);
    }

    #[test]
    fn test_leapfrog_energy_conservation() {
        let model = NormalExp;
        let post = Posterior::new(&model).unwrap();
        let metric = Metric::identity(2);
        let integrator = LeapfrogIntegrator::new(&post, 0.01, metric.clone());

        let mut state = integrator.init_state(vec![0.5, 0.0]).unwrap();
        state.p = vec![0.4, -0.3];
        let h0 = state.hamiltonian(&metric);
        for _ in 0..100 {
            integrator.step(&mut state).unwrap();
        }
        let h1 = state.hamiltonian(&metric);
        assert!((h1 - h0).abs() < 1e-3, "energy drift: {} -> {}", h0, h1);
    }

    #[test]
    fn test_leapfrog_reversible() {
        let model = NormalExp;
        let post = Posterior::new(&model).unwrap();
        let integrator = LeapfrogIntegrator::new(&post, 0.1, Metric::identity(2));

        let mut state = integrator.init_state(vec![0.5, 0.2]).unwrap();
        state.p = vec![0.4, -0.3];
        let q0 = state.q.clone();
        for _ in 0..10 {
            integrator.step_dir(&mut state, 1).unwrap();
        }
        for p in state.p.iter_mut() {
            *p = -*p;
        }
        for _ in 0..10 {
            integrator.step_dir(&mut state, 1).unwrap();
        }
        for (a, b) in q0.iter().zip(&state.q) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }
}
