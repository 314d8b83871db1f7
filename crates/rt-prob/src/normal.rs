//! Normal distribution utilities.

use rt_ad::{Tape, Var};
use rt_core::{Error, Result};

/// Natural log of `sqrt(2π)`.
pub const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

fn check_sigma(sigma: f64) -> Result<()> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::Validation(format!("sigma must be finite and > 0, got {}", sigma)));
    }
    Ok(())
}

/// Log-PDF of a Normal distribution `N(mu, sigma)` at `x`.
///
/// `log p(x) = -0.5 * ((x-mu)/sigma)^2 - ln(sigma) - ln(sqrt(2π))`
pub fn logpdf(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    check_sigma(sigma)?;
    let z = (x - mu) / sigma;
    Ok(-0.5 * z * z - sigma.ln() - LN_SQRT_2PI)
}

/// Log-density of a Gaussian random walk with step sd `sigma` and a flat
/// (improper) initial point.
///
/// Only the `n - 1` increments contribute; a path of length <= 1 has density 0.
pub fn random_walk_logpdf(path: &[f64], sigma: f64) -> Result<f64> {
    check_sigma(sigma)?;
    let mut acc = 0.0;
    for w in path.windows(2) {
        acc += logpdf(w[1], w[0], sigma)?;
    }
    Ok(acc)
}

/// [`random_walk_logpdf`] recorded on a tape.
pub fn random_walk_logpdf_ad(tape: &mut Tape, path: &[Var], sigma: f64) -> Result<Var> {
    check_sigma(sigma)?;
    let n_steps = path.len().saturating_sub(1);
    let scale = -0.5 / (sigma * sigma);
    let mut sq = Vec::with_capacity(n_steps);
    for w in path.windows(2) {
        let d = tape.sub(w[1], w[0]);
        sq.push((tape.powi(d, 2), scale));
    }
    let quad = tape.linear(&sq);
    Ok(tape.add_f64(quad, -(n_steps as f64) * (sigma.ln() + LN_SQRT_2PI)))
}
