//! Exponential distribution utilities.

use rt_ad::{Tape, Var};
use rt_core::{Error, Result};

fn check_rate(rate: f64) -> Result<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(Error::Validation(format!("rate must be finite and > 0, got {}", rate)));
    }
    Ok(())
}

/// Log-PDF of an Exponential distribution at `x` with rate `rate`.
///
/// Support: `x >= 0`.
pub fn logpdf(x: f64, rate: f64) -> Result<f64> {
    check_rate(rate)?;
    if x < 0.0 {
        return Ok(f64::NEG_INFINITY);
    }
    Ok(rate.ln() - rate * x)
}

/// [`logpdf`] recorded on a tape. `x` is assumed to lie in the support.
pub fn logpdf_ad(tape: &mut Tape, x: Var, rate: f64) -> Result<Var> {
    check_rate(rate)?;
    let rx = tape.mul_f64(x, -rate);
    Ok(tape.add_f64(rx, rate.ln()))
}
