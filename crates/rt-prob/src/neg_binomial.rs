//! Negative binomial distribution utilities.
//!
//! The observation model uses the mean/shape parameterization: `mu > 0` is the
//! mean and `alpha > 0` the shape, so `Var(Y) = mu + mu^2 / alpha`. Counts may
//! be non-integer after upstream smoothing, hence `k: f64` throughout.

use rt_ad::{Tape, Var};
use rt_core::{Error, Result};
use statrs::function::gamma::ln_gamma;

/// Log-PMF of NB(mean `mu`, shape `alpha`) at count `k`.
///
/// `ln Γ(k+α) - ln Γ(α) - ln Γ(k+1) + α ln(α/(α+μ)) + k ln(μ/(α+μ))`
///
/// A zero mean puts all mass on `k == 0`.
pub fn logpmf_mean_shape(k: f64, mu: f64, alpha: f64) -> Result<f64> {
    if !k.is_finite() || k < 0.0 {
        return Err(Error::Validation(format!("k must be finite and >= 0, got {}", k)));
    }
    if !mu.is_finite() || mu < 0.0 {
        return Err(Error::Validation(format!("mu must be finite and >= 0, got {}", mu)));
    }
    if !alpha.is_finite() || alpha <= 0.0 {
        return Err(Error::Validation(format!("alpha must be finite and > 0, got {}", alpha)));
    }
    if mu == 0.0 {
        return Ok(if k == 0.0 { 0.0 } else { f64::NEG_INFINITY });
    }

    let ln_coeff = ln_gamma(k + alpha) - ln_gamma(alpha) - ln_gamma(k + 1.0);
    let ln_am = (alpha + mu).ln();
    let mut lp = ln_coeff + alpha * (alpha.ln() - ln_am);
    if k > 0.0 {
        lp += k * (mu.ln() - ln_am);
    }
    Ok(lp)
}

/// [`logpmf_mean_shape`] recorded on a tape.
///
/// `k` is data; `mu` and `alpha` are tape nodes. Parameter validity is not
/// checked here: an invalid `mu` surfaces as a non-finite value.
pub fn logpmf_mean_shape_ad(tape: &mut Tape, k: f64, mu: Var, alpha: Var) -> Var {
    let k_alpha = tape.add_f64(alpha, k);
    let lg_ka = tape.ln_gamma(k_alpha);
    let lg_a = tape.ln_gamma(alpha);
    let am = tape.add(alpha, mu);
    let ln_am = tape.ln(am);
    let ln_a = tape.ln(alpha);
    let log_p = tape.sub(ln_a, ln_am);
    let shape_term = tape.mul(alpha, log_p);

    let mut terms = vec![(lg_ka, 1.0), (lg_a, -1.0), (shape_term, 1.0)];
    if k > 0.0 {
        let ln_mu = tape.ln(mu);
        let log_q = tape.sub(ln_mu, ln_am);
        terms.push((log_q, k));
    }
    let body = tape.linear(&terms);
    tape.add_f64(body, -ln_gamma(k + 1.0))
}
