//! Lognormal distribution utilities and day-level discretisation.

use rt_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, LogNormal};

/// Lognormal `(mu, sigma)` whose distribution has the given `mean` and `std`.
///
/// `mu = ln(mean² / sqrt(std² + mean²))`, `sigma = sqrt(ln(std²/mean² + 1))`.
pub fn params_from_mean_std(mean: f64, std: f64) -> Result<(f64, f64)> {
    if !mean.is_finite() || mean <= 0.0 {
        return Err(Error::Validation(format!("mean must be finite and > 0, got {}", mean)));
    }
    if !std.is_finite() || std <= 0.0 {
        return Err(Error::Validation(format!("std must be finite and > 0, got {}", std)));
    }
    let mu = (mean * mean / (std * std + mean * mean).sqrt()).ln();
    let sigma = ((std * std) / (mean * mean) + 1.0).ln().sqrt();
    Ok((mu, sigma))
}

/// Discretise a lognormal with the given `mean`/`std` onto days `0..horizon`.
///
/// The CDF is evaluated at each integer day, consecutive values are
/// differenced (entry 0 is zero), and the result renormalised to sum 1.
pub fn discretize_mean_std(mean: f64, std: f64, horizon: usize) -> Result<Vec<f64>> {
    if horizon < 2 {
        return Err(Error::Validation(format!("horizon must be >= 2, got {}", horizon)));
    }
    let (mu, sigma) = params_from_mean_std(mean, std)?;
    let dist = LogNormal::new(mu, sigma)
        .map_err(|e| Error::Validation(format!("invalid lognormal ({mu}, {sigma}): {e}")))?;

    let cdf: Vec<f64> = (0..horizon).map(|d| dist.cdf(d as f64)).collect();
    let mut pmf = Vec::with_capacity(horizon);
    pmf.push(0.0);
    pmf.extend(cdf.windows(2).map(|w| w[1] - w[0]));

    let total: f64 = pmf.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(Error::Computation(format!(
            "lognormal({mean}, {std}) has no mass before day {horizon}"
        )));
    }
    Ok(pmf.into_iter().map(|p| p / total).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_params_reproduce_moments() {
        let (mu, sigma) = params_from_mean_std(4.7, 2.9).unwrap();
        let mean = (mu + 0.5 * sigma * sigma).exp();
        let var = ((sigma * sigma).exp() - 1.0) * (2.0 * mu + sigma * sigma).exp();
        assert_relative_eq!(mean, 4.7, epsilon = 1e-10);
        assert_relative_eq!(var.sqrt(), 2.9, epsilon = 1e-10);
    }

    #[test]
    fn test_discretized_shape() {
        let p = discretize_mean_std(4.7, 2.9, 20).unwrap();
        assert_eq!(p.len(), 20);
        assert_eq!(p[0], 0.0);
        assert!(p.iter().all(|&v| v >= 0.0));
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        // Mode sits a few days in.
        let argmax = p.iter().enumerate().fold(0, |best, (i, &v)| if v > p[best] { i } else { best });
        assert!((2..=5).contains(&argmax), "argmax={}", argmax);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(discretize_mean_std(4.7, 2.9, 1).is_err());
        assert!(discretize_mean_std(-1.0, 2.9, 20).is_err());
        assert!(discretize_mean_std(4.7, 0.0, 20).is_err());
    }
}
