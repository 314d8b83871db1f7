//! Bijective transforms (bijectors) for unconstrained parameterization.
//!
//! NUTS operates in unconstrained space `z ∈ R^n`. These transforms map
//! between unconstrained `z` and constrained parameters `theta` and provide
//! the Jacobian terms needed for a correct density in `z`.
//!
//! The Rt model only uses real-valued (log-Rt) and positive (seed, dispersion)
//! parameters, so the supported bounds are `(-inf, inf)` and `(a, inf)`.

use rt_core::{Error, Result};

/// A bijective transform from unconstrained `z` to constrained `theta`.
pub trait Bijector: Send + Sync {
    /// Map unconstrained -> constrained: `theta = forward(z)`
    fn forward(&self, z: f64) -> f64;
    /// Map constrained -> unconstrained: `z = inverse(theta)`
    fn inverse(&self, theta: f64) -> f64;
    /// Log absolute determinant of Jacobian: `log|dtheta/dz|`
    fn log_abs_det_jacobian(&self, z: f64) -> f64;
    /// Derivative of log|J| w.r.t. z: `d/dz log|dtheta/dz|`
    fn grad_log_abs_det_jacobian(&self, z: f64) -> f64;
    /// Jacobian element: `dtheta/dz`
    fn jacobian(&self, z: f64) -> f64;
}

/// Identity: `(-inf, inf) -> (-inf, inf)`.
pub struct IdentityBijector;

impl Bijector for IdentityBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        z
    }
    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        theta
    }
    #[inline]
    fn log_abs_det_jacobian(&self, _z: f64) -> f64 {
        0.0
    }
    #[inline]
    fn grad_log_abs_det_jacobian(&self, _z: f64) -> f64 {
        0.0
    }
    #[inline]
    fn jacobian(&self, _z: f64) -> f64 {
        1.0
    }
}

/// Lower bound `a`: `(-inf, inf) -> (a, inf)`, `theta = a + exp(z)`, `log|J| = z`.
///
/// With `a = 0` this is the plain log transform used for positive parameters.
pub struct LowerBoundedBijector {
    lower: f64,
}

impl LowerBoundedBijector {
    /// Create a new lower-bounded bijector with given lower bound.
    pub fn new(lower: f64) -> Self {
        Self { lower }
    }
}

impl Bijector for LowerBoundedBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        self.lower + z.exp()
    }
    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        (theta - self.lower).ln()
    }
    #[inline]
    fn log_abs_det_jacobian(&self, z: f64) -> f64 {
        z
    }
    #[inline]
    fn grad_log_abs_det_jacobian(&self, _z: f64) -> f64 {
        1.0
    }
    #[inline]
    fn jacobian(&self, z: f64) -> f64 {
        z.exp()
    }
}

/// Composite transform for a vector of parameters.
///
/// Each parameter gets its own bijector, selected from bounds.
pub struct ParameterTransform {
    bijectors: Vec<Box<dyn Bijector>>,
}

impl ParameterTransform {
    /// Create transforms from parameter bounds.
    ///
    /// - `(-inf, inf)` -> Identity
    /// - `(a, inf)` with finite `a` -> LowerBounded(a)
    ///
    /// Finite upper bounds are rejected.
    pub fn from_bounds(bounds: &[(f64, f64)]) -> Result<Self> {
        let bijectors = bounds
            .iter()
            .enumerate()
            .map(|(i, &(lo, hi))| -> Result<Box<dyn Bijector>> {
                if hi < f64::INFINITY || lo.is_nan() {
                    return Err(Error::Validation(format!(
                        "parameter {i}: unsupported bounds ({lo}, {hi})"
                    )));
                }
                if lo == f64::NEG_INFINITY {
                    Ok(Box::new(IdentityBijector))
                } else {
                    Ok(Box::new(LowerBoundedBijector::new(lo)))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { bijectors })
    }

    /// Number of parameters.
    pub fn dim(&self) -> usize {
        self.bijectors.len()
    }

    /// Map unconstrained -> constrained.
    pub fn forward(&self, z: &[f64]) -> Vec<f64> {
        z.iter().zip(&self.bijectors).map(|(&zi, b)| b.forward(zi)).collect()
    }

    /// Map constrained -> unconstrained.
    pub fn inverse(&self, theta: &[f64]) -> Vec<f64> {
        theta.iter().zip(&self.bijectors).map(|(&ti, b)| b.inverse(ti)).collect()
    }

    /// Sum of log|J| over all parameters.
    pub fn log_abs_det_jacobian(&self, z: &[f64]) -> f64 {
        z.iter().zip(&self.bijectors).map(|(&zi, b)| b.log_abs_det_jacobian(zi)).sum()
    }

    /// Gradient of sum(log|J|) w.r.t. z.
    pub fn grad_log_abs_det_jacobian(&self, z: &[f64]) -> Vec<f64> {
        z.iter().zip(&self.bijectors).map(|(&zi, b)| b.grad_log_abs_det_jacobian(zi)).collect()
    }

    /// Diagonal Jacobian: `dtheta_i/dz_i` for each parameter.
    pub fn jacobian_diag(&self, z: &[f64]) -> Vec<f64> {
        z.iter().zip(&self.bijectors).map(|(&zi, b)| b.jacobian(zi)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn check_roundtrip(b: &dyn Bijector, z_values: &[f64]) {
        for &z in z_values {
            let z_back = b.inverse(b.forward(z));
            assert_relative_eq!(z, z_back, epsilon = 1e-10 * z.abs().max(1.0));
        }
    }

    fn check_grad_log_jac(b: &dyn Bijector, z_values: &[f64]) {
        let eps = 1e-6;
        for &z in z_values {
            let fd = (b.log_abs_det_jacobian(z + eps) - b.log_abs_det_jacobian(z - eps)) / (2.0 * eps);
            assert_relative_eq!(b.grad_log_abs_det_jacobian(z), fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_identity() {
        let b = IdentityBijector;
        check_roundtrip(&b, &[-5.0, 0.0, 3.3]);
        assert_eq!(b.jacobian(2.0), 1.0);
        assert_eq!(b.log_abs_det_jacobian(2.0), 0.0);
    }

    #[test]
    fn test_lower_bounded() {
        let b = LowerBoundedBijector::new(0.0);
        check_roundtrip(&b, &[-10.0, -1.0, 0.0, 1.0, 5.0]);
        check_grad_log_jac(&b, &[-2.0, 0.0, 2.0]);
        assert!(b.forward(-50.0) > 0.0);

        let shifted = LowerBoundedBijector::new(2.5);
        assert!(shifted.forward(-30.0) > 2.5);
        assert_relative_eq!(shifted.inverse(shifted.forward(0.7)), 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_parameter_transform_from_bounds() {
        let t = ParameterTransform::from_bounds(&[
            (f64::NEG_INFINITY, f64::INFINITY),
            (0.0, f64::INFINITY),
            (1.0, f64::INFINITY),
        ])
        .unwrap();
        assert_eq!(t.dim(), 3);

        let z = [0.3, -1.2, 0.4];
        let theta = t.forward(&z);
        assert_relative_eq!(theta[0], 0.3, epsilon = 1e-12);
        assert_relative_eq!(theta[1], (-1.2f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(theta[2], 1.0 + 0.4f64.exp(), epsilon = 1e-12);

        assert_relative_eq!(t.log_abs_det_jacobian(&z), -1.2 + 0.4, epsilon = 1e-12);
        assert_eq!(t.grad_log_abs_det_jacobian(&z), vec![0.0, 1.0, 1.0]);

        let back = t.inverse(&theta);
        for (a, b) in z.iter().zip(&back) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rejects_upper_bounds() {
        assert!(ParameterTransform::from_bounds(&[(0.0, 1.0)]).is_err());
        assert!(ParameterTransform::from_bounds(&[(f64::NEG_INFINITY, 3.0)]).is_err());
    }
}
