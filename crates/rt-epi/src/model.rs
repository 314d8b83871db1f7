//! Generative Rt model for one region.
//!
//! Parameters, in order: `log_r_t` for every date, `seed`, `alpha`.
//!
//! - `log_r_t ~ GaussianRandomWalk(sigma = 0.035)` with a flat initial point
//! - `seed ~ Exponential(rate = 50)`
//! - `alpha ~ Gamma(mean = 6, sd = 1)`
//! - `infections = renewal(exp(log_r_t), seed)`
//! - `test_adjusted_positive = (infections * p_delay)[..L]`
//! - `positive = exposure * test_adjusted_positive`
//! - `observed_positive[d] ~ NB(positive[d], alpha)` for days `d` with tests

use crate::kernel::{DelayCache, DelayDistribution, GenerationInterval};
use crate::observation::{convolve_delay, convolve_delay_on_tape, ObservationModel};
use crate::renewal::ConvolutionKernel;
use crate::series::ObservedSeries;
use chrono::NaiveDate;
use rand::Rng;
use rt_ad::{Tape, Var};
use rt_core::{Error, LogDensityModel, Result};
use rt_prob::{exponential, gamma, normal};
use serde::{Deserialize, Serialize};

/// Step standard deviation of the `log_r_t` random walk.
pub const RANDOM_WALK_SIGMA: f64 = 0.035;
/// Rate of the exponential prior on the seed infections.
pub const SEED_RATE: f64 = 50.0;
/// Prior mean of the negative-binomial shape.
pub const ALPHA_MEAN: f64 = 6.0;
/// Prior standard deviation of the negative-binomial shape.
pub const ALPHA_SD: f64 = 1.0;

/// Model construction options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Zero-count days padded before the first positive report.
    pub buffer_days: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { buffer_days: 10 }
    }
}

/// A named latent or derived quantity and the coordinate axes it spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableInfo {
    /// Variable name.
    pub name: &'static str,
    /// Coordinate axes (empty for scalars).
    pub dims: &'static [&'static str],
}

/// Variables recorded for every posterior draw.
pub const VARIABLES: [VariableInfo; 7] = [
    VariableInfo { name: "r_t", dims: &["date"] },
    VariableInfo { name: "seed", dims: &[] },
    VariableInfo { name: "infections", dims: &["date"] },
    VariableInfo { name: "test_adjusted_positive", dims: &["date"] },
    VariableInfo { name: "exposure", dims: &["date"] },
    VariableInfo { name: "positive", dims: &["date"] },
    VariableInfo { name: "alpha", dims: &[] },
];

/// Replicated observations recorded alongside each posterior draw.
pub const PREDICTIVE_VARIABLE: VariableInfo =
    VariableInfo { name: "nonzero_positive", dims: &["nonzero_date"] };

/// Coordinate axes of a compiled model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coords {
    /// Every modelled day, buffer included.
    pub date: Vec<NaiveDate>,
    /// Days with tests > 0 (the likelihood's support).
    pub nonzero_date: Vec<NaiveDate>,
}

impl Coords {
    /// Axis by name.
    pub fn axis(&self, name: &str) -> Option<&[NaiveDate]> {
        match name {
            "date" => Some(&self.date),
            "nonzero_date" => Some(&self.nonzero_date),
            _ => None,
        }
    }
}

/// The seven named quantities for one parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedQuantities {
    /// `exp(log_r_t)`.
    pub r_t: Vec<f64>,
    /// Infections on the first day.
    pub seed: f64,
    /// Renewal path.
    pub infections: Vec<f64>,
    /// Delay-convolved infections.
    pub test_adjusted_positive: Vec<f64>,
    /// Floored test volume.
    pub exposure: Vec<f64>,
    /// Expected positives.
    pub positive: Vec<f64>,
    /// Negative-binomial shape.
    pub alpha: f64,
}

impl DerivedQuantities {
    /// Values of a variable by name; scalars come back as one-element slices.
    pub fn values(&self, name: &str) -> Option<&[f64]> {
        match name {
            "r_t" => Some(&self.r_t),
            "seed" => Some(std::slice::from_ref(&self.seed)),
            "infections" => Some(&self.infections),
            "test_adjusted_positive" => Some(&self.test_adjusted_positive),
            "exposure" => Some(&self.exposure),
            "positive" => Some(&self.positive),
            "alpha" => Some(std::slice::from_ref(&self.alpha)),
            _ => None,
        }
    }
}

/// Region-bound model definition.
///
/// Owns the prepared (trimmed and buffer-padded) series. [`build`](Self::build)
/// is pure and can be called any number of times.
#[derive(Debug, Clone)]
pub struct GenerativeModel {
    region: String,
    observed: ObservedSeries,
    config: ModelConfig,
}

impl GenerativeModel {
    /// Prepare `observed` for `region`.
    pub fn new(region: impl Into<String>, observed: &ObservedSeries, config: ModelConfig) -> Result<Self> {
        let observed = observed.prepare(config.buffer_days)?;
        Ok(Self { region: region.into(), observed, config })
    }

    /// Region identifier.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Prepared series.
    pub fn observed(&self) -> &ObservedSeries {
        &self.observed
    }

    /// Construction options.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Compile the model against the delay distribution from `delays`.
    pub fn build(&self, delays: &DelayCache) -> Result<CompiledModel> {
        let delay = delays.get()?.clone();
        let generation = GenerationInterval::standard()?;
        let compiled = CompiledModel::new(&self.observed, generation, delay)?;
        tracing::info!(
            region = %self.region,
            days = compiled.len(),
            nonzero_days = compiled.coords.nonzero_date.len(),
            "built generative model"
        );
        Ok(compiled)
    }
}

/// A model bound to one prepared series, ready for sampling.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    coords: Coords,
    kernel: ConvolutionKernel,
    generation: GenerationInterval,
    delay: DelayDistribution,
    observation: ObservationModel,
    observed_positive: Vec<f64>,
    tests: Vec<f64>,
    alpha_shape: f64,
    alpha_rate: f64,
    tape_nodes: usize,
    tape_terms: usize,
}

impl CompiledModel {
    /// Compile for a prepared series and fixed kernels.
    pub fn new(observed: &ObservedSeries, generation: GenerationInterval, delay: DelayDistribution) -> Result<Self> {
        let len = observed.len();
        let kernel = ConvolutionKernel::new(generation.probabilities(), len)?;
        let observation = ObservationModel::new(observed.positive(), observed.total())?;
        let (alpha_shape, alpha_rate) = gamma::shape_rate_from_mean_sd(ALPHA_MEAN, ALPHA_SD)?;

        let dates = observed.dates().to_vec();
        let nonzero_date = observation.nonzero_days().iter().map(|&i| dates[i]).collect();
        let n_obs = observation.nonzero_days().len();

        Ok(Self {
            coords: Coords { date: dates, nonzero_date },
            tape_nodes: 8 * len + 16 * n_obs + 16,
            tape_terms: kernel.nnz() + len * delay.len() + 4 * n_obs + len,
            kernel,
            generation,
            delay,
            observation,
            observed_positive: observed.positive().to_vec(),
            tests: observed.total().to_vec(),
            alpha_shape,
            alpha_rate,
        })
    }

    /// Number of modelled days.
    pub fn len(&self) -> usize {
        self.coords.date.len()
    }

    /// Never true for a compiled model.
    pub fn is_empty(&self) -> bool {
        self.coords.date.is_empty()
    }

    /// Coordinate axes.
    pub fn coords(&self) -> &Coords {
        &self.coords
    }

    /// Variable registry.
    pub fn variables(&self) -> &'static [VariableInfo] {
        &VARIABLES
    }

    /// Generation-interval kernel.
    pub fn generation_interval(&self) -> &GenerationInterval {
        &self.generation
    }

    /// Reporting-delay distribution.
    pub fn delay_distribution(&self) -> &DelayDistribution {
        &self.delay
    }

    /// Observed positive counts, buffer included.
    pub fn observed_positive(&self) -> &[f64] {
        &self.observed_positive
    }

    /// Observed test counts, buffer included.
    pub fn tests(&self) -> &[f64] {
        &self.tests
    }

    fn check_dim(&self, params: &[f64]) -> Result<()> {
        if params.len() != self.dim() {
            return Err(Error::Validation(format!(
                "expected {} parameters, got {}",
                self.dim(),
                params.len()
            )));
        }
        Ok(())
    }

    fn split<'p>(&self, params: &'p [f64]) -> (&'p [f64], f64, f64) {
        let len = self.len();
        (&params[..len], params[len], params[len + 1])
    }

    /// All named quantities for one constrained parameter vector.
    pub fn derived(&self, params: &[f64]) -> Result<DerivedQuantities> {
        self.check_dim(params)?;
        let (log_r_t, seed, alpha) = self.split(params);
        let r_t: Vec<f64> = log_r_t.iter().map(|v| v.exp()).collect();
        let infections = self.kernel.simulate(&r_t, seed)?;
        let test_adjusted_positive = convolve_delay(&infections, self.delay.probabilities());
        let positive = self.observation.expected_positive(&test_adjusted_positive);
        Ok(DerivedQuantities {
            r_t,
            seed,
            infections,
            test_adjusted_positive,
            exposure: self.observation.exposure().to_vec(),
            positive,
            alpha,
        })
    }

    /// One posterior predictive draw of the observed positives on
    /// `nonzero_date`.
    pub fn sample_predictive<R: Rng + ?Sized>(&self, derived: &DerivedQuantities, rng: &mut R) -> Result<Vec<f64>> {
        self.observation.sample_positive(&derived.positive, derived.alpha, rng)
    }

    /// Log posterior density (up to a constant) evaluated without the tape.
    pub fn log_posterior(&self, params: &[f64]) -> Result<f64> {
        let derived = self.derived(params)?;
        let (log_r_t, seed, alpha) = self.split(params);
        Ok(normal::random_walk_logpdf(log_r_t, RANDOM_WALK_SIGMA)?
            + exponential::logpdf(seed, SEED_RATE)?
            + gamma::logpdf_shape_rate(alpha, self.alpha_shape, self.alpha_rate)?
            + self.observation.log_likelihood(&derived.positive, alpha)?)
    }

    /// Record the log posterior; returns the parameter inputs and the output node.
    fn record(&self, tape: &mut Tape, params: &[f64]) -> Result<(Vec<Var>, Var)> {
        let inputs: Vec<Var> = params.iter().map(|&p| tape.var(p)).collect();
        let len = self.len();
        let (log_r_t, seed, alpha) = (&inputs[..len], inputs[len], inputs[len + 1]);

        let lp_walk = normal::random_walk_logpdf_ad(tape, log_r_t, RANDOM_WALK_SIGMA)?;
        let lp_seed = exponential::logpdf_ad(tape, seed, SEED_RATE)?;
        let lp_alpha = gamma::logpdf_shape_rate_ad(tape, alpha, self.alpha_shape, self.alpha_rate)?;

        let r_t: Vec<Var> = log_r_t.iter().map(|&v| tape.exp(v)).collect();
        let infections = self.kernel.simulate_on_tape(tape, &r_t, seed)?;
        let test_adjusted_positive = convolve_delay_on_tape(tape, &infections, self.delay.probabilities());
        let lp_obs = self.observation.log_likelihood_on_tape(tape, &test_adjusted_positive, alpha);

        let lp = tape.sum(&[lp_walk, lp_seed, lp_alpha, lp_obs]);
        Ok((inputs, lp))
    }
}

impl LogDensityModel for CompiledModel {
    fn dim(&self) -> usize {
        self.len() + 2
    }

    fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.coords.date.iter().map(|d| format!("log_r_t[{d}]")).collect();
        names.push("seed".to_string());
        names.push("alpha".to_string());
        names
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        let mut bounds = vec![(f64::NEG_INFINITY, f64::INFINITY); self.len()];
        bounds.push((0.0, f64::INFINITY));
        bounds.push((0.0, f64::INFINITY));
        bounds
    }

    fn parameter_init(&self) -> Vec<f64> {
        let mut init = vec![0.0; self.len()];
        init.push(1.0 / SEED_RATE);
        init.push(ALPHA_MEAN);
        init
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        self.check_dim(params)?;
        let mut tape = Tape::with_capacity(self.tape_nodes, self.tape_terms);
        let (_, lp) = self.record(&mut tape, params)?;
        let nll = -tape.val(lp);
        Ok(if nll.is_finite() { nll } else { f64::INFINITY })
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        Ok(self.nll_grad(params)?.1)
    }

    fn nll_grad(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        self.check_dim(params)?;
        let mut tape = Tape::with_capacity(self.tape_nodes, self.tape_terms);
        let (inputs, lp) = self.record(&mut tape, params)?;
        let nll = -tape.val(lp);
        if !nll.is_finite() {
            return Ok((f64::INFINITY, vec![0.0; inputs.len()]));
        }
        tape.backward(lp);
        Ok((nll, inputs.iter().map(|&v| -tape.adjoint(v)).collect()))
    }
}
