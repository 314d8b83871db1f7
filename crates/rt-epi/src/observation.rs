//! Observation model: reporting delay, test-volume exposure and the
//! negative-binomial count likelihood.

use rand::Rng;
use rand_distr::{Distribution, Gamma, Poisson};
use rt_ad::{Tape, Var};
use rt_core::{Error, Result};
use rt_prob::neg_binomial;

/// Exposure floor as a fraction of the largest daily test count.
pub const EXPOSURE_FLOOR: f64 = 0.1;
/// Exposure ceiling.
pub const EXPOSURE_CEILING: f64 = 1e9;

/// `clip(total, 0.1 * max(total), 1e9)`.
pub fn exposure(total: &[f64]) -> Vec<f64> {
    let floor = EXPOSURE_FLOOR * total.iter().copied().fold(0.0, f64::max);
    total.iter().map(|&t| t.clamp(floor, EXPOSURE_CEILING.max(floor))).collect()
}

/// Full convolution of `infections` with `p_delay`, truncated to the
/// length of `infections`.
pub fn convolve_delay(infections: &[f64], p_delay: &[f64]) -> Vec<f64> {
    (0..infections.len())
        .map(|t| {
            let lo = (t + 1).saturating_sub(p_delay.len());
            (lo..=t).map(|j| infections[j] * p_delay[t - j]).sum()
        })
        .collect()
}

/// [`convolve_delay`] recorded on a tape, one linear node per day.
///
/// Zero-probability delay days contribute no terms.
pub fn convolve_delay_on_tape(tape: &mut Tape, infections: &[Var], p_delay: &[f64]) -> Vec<Var> {
    let mut terms = Vec::with_capacity(p_delay.len());
    (0..infections.len())
        .map(|t| {
            terms.clear();
            let lo = (t + 1).saturating_sub(p_delay.len());
            terms.extend((lo..=t).map(|j| (infections[j], p_delay[t - j])).filter(|&(_, w)| w != 0.0));
            tape.linear(&terms)
        })
        .collect()
}

/// Likelihood of observed positives given expected positives.
///
/// Only days with `total > 0` enter the likelihood; the positive count of a
/// day without tests is ignored.
#[derive(Debug, Clone)]
pub struct ObservationModel {
    exposure: Vec<f64>,
    nonzero_days: Vec<usize>,
    nonzero_positive: Vec<f64>,
}

impl ObservationModel {
    /// Bind observed `positive` and `total` series of equal length.
    pub fn new(positive: &[f64], total: &[f64]) -> Result<Self> {
        if positive.len() != total.len() {
            return Err(Error::Data(format!(
                "positive/total length mismatch: {} vs {}",
                positive.len(),
                total.len()
            )));
        }
        let nonzero_days: Vec<usize> = (0..total.len()).filter(|&i| total[i] > 0.0).collect();
        if nonzero_days.is_empty() {
            return Err(Error::Data("no day with tests > 0".to_string()));
        }
        let nonzero_positive = nonzero_days.iter().map(|&i| positive[i]).collect();
        Ok(Self { exposure: exposure(total), nonzero_days, nonzero_positive })
    }

    /// Exposure per day.
    pub fn exposure(&self) -> &[f64] {
        &self.exposure
    }

    /// Indices of days with tests, in date order.
    pub fn nonzero_days(&self) -> &[usize] {
        &self.nonzero_days
    }

    /// Expected positives `exposure * test_adjusted_positive`.
    pub fn expected_positive(&self, test_adjusted_positive: &[f64]) -> Vec<f64> {
        self.exposure.iter().zip(test_adjusted_positive).map(|(e, p)| e * p).collect()
    }

    /// Log-likelihood of the observed counts given expected positives
    /// `positive` (one per day) and dispersion `alpha`.
    pub fn log_likelihood(&self, positive: &[f64], alpha: f64) -> Result<f64> {
        if positive.len() != self.exposure.len() {
            return Err(Error::Validation(format!(
                "expected {} days of positives, got {}",
                self.exposure.len(),
                positive.len()
            )));
        }
        self.nonzero_days.iter().zip(&self.nonzero_positive).try_fold(0.0, |acc, (&i, &k)| {
            Ok(acc + neg_binomial::logpmf_mean_shape(k, positive[i], alpha)?)
        })
    }

    /// Replicated positive counts on the days with tests, drawn from the
    /// negative binomial with mean `positive` and shape `alpha` as a
    /// gamma-Poisson mixture.
    pub fn sample_positive<R: Rng + ?Sized>(&self, positive: &[f64], alpha: f64, rng: &mut R) -> Result<Vec<f64>> {
        if positive.len() != self.exposure.len() {
            return Err(Error::Validation(format!(
                "expected {} days of positives, got {}",
                self.exposure.len(),
                positive.len()
            )));
        }
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(Error::Computation(format!("alpha must be finite and > 0, got {alpha}")));
        }
        self.nonzero_days
            .iter()
            .map(|&i| {
                let mu = positive[i];
                if !(mu.is_finite() && mu >= 0.0) {
                    return Err(Error::Computation(format!("expected positives must be finite and >= 0, got {mu}")));
                }
                if mu == 0.0 {
                    return Ok(0.0);
                }
                let gamma = Gamma::new(alpha, mu / alpha).map_err(|e| Error::Computation(e.to_string()))?;
                let rate: f64 = gamma.sample(rng);
                if rate <= 0.0 {
                    return Ok(0.0);
                }
                let poisson = Poisson::new(rate).map_err(|e| Error::Computation(e.to_string()))?;
                Ok(poisson.sample(rng))
            })
            .collect()
    }

    /// Log-likelihood on a tape, taking test-adjusted positives; the
    /// exposure scaling is applied here.
    pub fn log_likelihood_on_tape(&self, tape: &mut Tape, test_adjusted_positive: &[Var], alpha: Var) -> Var {
        let terms: Vec<(Var, f64)> = self
            .nonzero_days
            .iter()
            .zip(&self.nonzero_positive)
            .map(|(&i, &k)| {
                let mu = tape.mul_f64(test_adjusted_positive[i], self.exposure[i]);
                (neg_binomial::logpmf_mean_shape_ad(tape, k, mu, alpha), 1.0)
            })
            .collect();
        tape.linear(&terms)
    }
}
