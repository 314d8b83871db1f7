//! Core traits for the Rt estimation engine
//!
//! Inference code (NUTS, diagnostics) depends only on [`LogDensityModel`],
//! never on the concrete epidemic model, so the sampler treats the
//! log-posterior and its gradient as a black box.

use crate::Result;

/// Model interface consumed by the samplers.
///
/// All quantities are expressed in the constrained (model) parameterization;
/// the sampler applies bijective transforms on top.
pub trait LogDensityModel: Send + Sync {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Parameter names (stable order).
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds (min, max) (stable order).
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Suggested initial values (stable order).
    fn parameter_init(&self) -> Vec<f64>;

    /// Negative log-posterior density (up to a constant).
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of NLL.
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>>;

    /// Compute NLL and gradient together.
    ///
    /// The default implementation calls [`Self::nll`] and [`Self::grad_nll`].
    /// Models whose gradient comes out of the same pass (e.g. a reverse-mode
    /// tape) should override this.
    fn nll_grad(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        Ok((self.nll(params)?, self.grad_nll(params)?))
    }
}
