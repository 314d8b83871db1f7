//! Gamma distribution utilities.

use rt_ad::{Tape, Var};
use rt_core::{Error, Result};
use statrs::function::gamma::ln_gamma;

fn check_shape_rate(shape: f64, rate: f64) -> Result<()> {
    if !shape.is_finite() || shape <= 0.0 {
        return Err(Error::Validation(format!("shape must be finite and > 0, got {}", shape)));
    }
    if !rate.is_finite() || rate <= 0.0 {
        return Err(Error::Validation(format!("rate must be finite and > 0, got {}", rate)));
    }
    Ok(())
}

/// Convert a `(mean, sd)` description into `(shape, rate)`.
///
/// `shape = mean² / sd²`, `rate = mean / sd²`; e.g. mean 6, sd 1 gives (36, 6).
pub fn shape_rate_from_mean_sd(mean: f64, sd: f64) -> Result<(f64, f64)> {
    if !mean.is_finite() || mean <= 0.0 {
        return Err(Error::Validation(format!("mean must be finite and > 0, got {}", mean)));
    }
    if !sd.is_finite() || sd <= 0.0 {
        return Err(Error::Validation(format!("sd must be finite and > 0, got {}", sd)));
    }
    let var = sd * sd;
    Ok((mean * mean / var, mean / var))
}

/// Log-PDF of a Gamma distribution with `shape` and `rate` at `x`.
///
/// Parameterization:
/// - `shape > 0`
/// - `rate > 0` (inverse scale)
///
/// Support: `x >= 0`.
pub fn logpdf_shape_rate(x: f64, shape: f64, rate: f64) -> Result<f64> {
    check_shape_rate(shape, rate)?;
    if x < 0.0 {
        return Ok(f64::NEG_INFINITY);
    }
    if x == 0.0 {
        if shape < 1.0 {
            return Ok(f64::INFINITY);
        }
        if shape > 1.0 {
            return Ok(f64::NEG_INFINITY);
        }
        // shape == 1 => exponential
        return Ok(rate.ln());
    }

    let ln_norm = shape * rate.ln() - ln_gamma(shape);
    Ok(ln_norm + (shape - 1.0) * x.ln() - rate * x)
}

/// [`logpdf_shape_rate`] recorded on a tape. `x` must be strictly positive.
pub fn logpdf_shape_rate_ad(tape: &mut Tape, x: Var, shape: f64, rate: f64) -> Result<Var> {
    check_shape_rate(shape, rate)?;
    let ln_x = tape.ln(x);
    let ln_norm = shape * rate.ln() - ln_gamma(shape);
    let body = tape.linear(&[(ln_x, shape - 1.0), (x, -rate)]);
    Ok(tape.add_f64(body, ln_norm))
}
