//! Posterior distribution for Bayesian inference.
//!
//! Wraps any [`LogDensityModel`] and provides log-posterior density and
//! gradient in both constrained and unconstrained parameterizations. The
//! model's `nll` is the full negative log-posterior (priors included), so the
//! wrapper only adds the change-of-variables term.

use rt_core::{LogDensityModel, Result};
use rt_prob::transforms::ParameterTransform;

/// Posterior wrapping a model with bound-derived transforms.
///
/// - `logpdf(theta) = -model.nll(theta)`
/// - `logpdf_unconstrained(z) = logpdf(transform(z)) + log|J(z)|`
pub struct Posterior<'a, M: LogDensityModel + ?Sized> {
    model: &'a M,
    transform: ParameterTransform,
}

impl<'a, M: LogDensityModel + ?Sized> Posterior<'a, M> {
    /// Create a new posterior; fails if the model declares unsupported bounds.
    pub fn new(model: &'a M) -> Result<Self> {
        let transform = ParameterTransform::from_bounds(&model.parameter_bounds())?;
        Ok(Self { model, transform })
    }

    /// Number of parameters.
    pub fn dim(&self) -> usize {
        self.model.dim()
    }

    /// Reference to the underlying model.
    pub fn model(&self) -> &M {
        self.model
    }

    /// Reference to the parameter transform.
    pub fn transform(&self) -> &ParameterTransform {
        &self.transform
    }

    /// Log-posterior in constrained space.
    pub fn logpdf(&self, theta: &[f64]) -> Result<f64> {
        Ok(-self.model.nll(theta)?)
    }

    /// Gradient of log-posterior in constrained space.
    pub fn grad(&self, theta: &[f64]) -> Result<Vec<f64>> {
        let mut g = self.model.grad_nll(theta)?;
        for gi in g.iter_mut() {
            *gi = -*gi;
        }
        Ok(g)
    }

    /// Log-posterior in unconstrained space: `logpdf(transform(z)) + log|J(z)|`.
    pub fn logpdf_unconstrained(&self, z: &[f64]) -> Result<f64> {
        let theta = self.transform.forward(z);
        let lp = self.logpdf(&theta)?;
        Ok(lp + self.transform.log_abs_det_jacobian(z))
    }

    /// Gradient of log-posterior in unconstrained space.
    ///
    /// Chain rule (diagonal Jacobian):
    /// `grad_z[i] = (dtheta_i/dz_i) * grad_theta[i] + d/dz_i log|J_i|`
    pub fn grad_unconstrained(&self, z: &[f64]) -> Result<Vec<f64>> {
        let theta = self.transform.forward(z);
        let grad_theta = self.grad(&theta)?;
        Ok(self.chain_rule(z, &grad_theta))
    }

    /// Log-posterior and its gradient in unconstrained space from one model
    /// evaluation.
    pub fn logpdf_grad_unconstrained(&self, z: &[f64]) -> Result<(f64, Vec<f64>)> {
        let theta = self.transform.forward(z);
        let (nll, grad_nll) = self.model.nll_grad(&theta)?;
        let grad_theta: Vec<f64> = grad_nll.iter().map(|&g| -g).collect();
        let lp = -nll + self.transform.log_abs_det_jacobian(z);
        Ok((lp, self.chain_rule(z, &grad_theta)))
    }

    fn chain_rule(&self, z: &[f64], grad_theta: &[f64]) -> Vec<f64> {
        let jac_diag = self.transform.jacobian_diag(z);
        let grad_log_jac = self.transform.grad_log_abs_det_jacobian(z);
        grad_theta
            .iter()
            .zip(jac_diag.iter())
            .zip(grad_log_jac.iter())
            .map(|((&gt, &jd), &glj)| gt * jd + glj)
            .collect()
    }

    /// Map constrained -> unconstrained.
    pub fn to_unconstrained(&self, theta: &[f64]) -> Vec<f64> {
        self.transform.inverse(theta)
    }

    /// Map unconstrained -> constrained.
    pub fn to_constrained(&self, z: &[f64]) -> Vec<f64> {
        self.transform.forward(z)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// `x ~ N(1, 2)`, `s ~ Exponential(1)` with `s > 0`.
    pub(crate) struct NormalExp;

    impl LogDensityModel for NormalExp {
        fn dim(&self) -> usize {
            2
        }
        fn parameter_names(&self) -> Vec<String> {
            vec!["x".into(), "s".into()]
        }
        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY), (0.0, f64::INFINITY)]
        }
        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0, 1.0]
        }
        fn nll(&self, p: &[f64]) -> rt_core::Result<f64> {
            if p[1] <= 0.0 {
                return Ok(f64::INFINITY);
            }
            let z = (p[0] - 1.0) / 2.0;
            Ok(0.5 * z * z + p[1])
        }
        fn grad_nll(&self, p: &[f64]) -> rt_core::Result<Vec<f64>> {
            Ok(vec![(p[0] - 1.0) / 4.0, 1.0])
        }
    }

    #[test]
    fn test_flat_transform_equals_neg_nll() {
        let model = NormalExp;
        let post = Posterior::new(&model).unwrap();
        let theta = [0.3, 2.0];
        assert_relative_eq!(post.logpdf(&theta).unwrap(), -model.nll(&theta).unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn test_unconstrained_logpdf_includes_log_jac() {
        let model = NormalExp;
        let post = Posterior::new(&model).unwrap();
        let theta = [0.3, 2.0];
        let z = post.to_unconstrained(&theta);
        assert_relative_eq!(z[1], 2.0f64.ln(), epsilon = 1e-12);

        let lp_z = post.logpdf_unconstrained(&z).unwrap();
        assert_relative_eq!(lp_z, post.logpdf(&theta).unwrap() + z[1], epsilon = 1e-12);
    }

    #[test]
    fn test_fused_matches_separate_and_finite_diff() {
        let model = NormalExp;
        let post = Posterior::new(&model).unwrap();
        let z = vec![0.7, -0.4];

        let (lp, grad) = post.logpdf_grad_unconstrained(&z).unwrap();
        assert_relative_eq!(lp, post.logpdf_unconstrained(&z).unwrap(), epsilon = 1e-12);
        let grad_sep = post.grad_unconstrained(&z).unwrap();

        let eps = 1e-6;
        for i in 0..z.len() {
            assert_relative_eq!(grad[i], grad_sep[i], epsilon = 1e-12);
            let mut zp = z.clone();
            zp[i] += eps;
            let mut zm = z.clone();
            zm[i] -= eps;
            let fd = (post.logpdf_unconstrained(&zp).unwrap() - post.logpdf_unconstrained(&zm).unwrap())
                / (2.0 * eps);
            assert_relative_eq!(grad[i], fd, epsilon = 1e-5);
        }
    }
}
