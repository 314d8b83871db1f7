//! Sampling driver: runs multi-chain NUTS over a compiled model and packs
//! the draws into a [`Trace`].

use crate::kernel::DelayCache;
use crate::model::{CompiledModel, GenerativeModel, PREDICTIVE_VARIABLE, VARIABLES};
use crate::trace::{ConstantData, SampleStats, Trace, VariableDraws};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rt_core::{Error, Result, MODEL_VERSION};
use rt_inference::{compute_diagnostics, sample_nuts_multichain, InitStrategy, NutsConfig, SamplerResult};
use serde::{Deserialize, Serialize};

/// Sampler controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Worker threads.
    pub cores: usize,
    /// Independent chains.
    pub chains: usize,
    /// Warmup (adaptation) iterations per chain.
    pub tune: usize,
    /// Kept draws per chain.
    pub draws: usize,
    /// Target acceptance probability for step-size adaptation.
    pub target_accept: f64,
    /// Initialisation and metric strategy.
    pub init: InitStrategy,
    /// Maximum NUTS tree depth.
    pub max_treedepth: usize,
    /// Base seed; chain `i` uses `seed + i` and its predictive draws use
    /// `seed + chains + i`.
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            cores: 4,
            chains: 4,
            tune: 700,
            draws: 200,
            target_accept: 0.95,
            init: InitStrategy::JitterAdaptDiag,
            max_treedepth: 10,
            seed: 42,
        }
    }
}

impl SamplerConfig {
    /// Reject settings the sampler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cores == 0 || self.chains == 0 || self.draws == 0 {
            return Err(Error::Validation(format!(
                "cores, chains and draws must be >= 1 (got {}, {}, {})",
                self.cores, self.chains, self.draws
            )));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(Error::Validation(format!(
                "target_accept must be in (0, 1), got {}",
                self.target_accept
            )));
        }
        Ok(())
    }

    /// NUTS settings for every chain.
    pub fn nuts_config(&self) -> NutsConfig {
        NutsConfig {
            max_treedepth: self.max_treedepth,
            target_accept: self.target_accept,
            init: self.init,
            ..NutsConfig::default()
        }
    }
}

impl GenerativeModel {
    /// Build the model and sample it. Blocks until every chain finished.
    pub fn sample(&self, delays: &DelayCache, config: &SamplerConfig) -> Result<Trace> {
        self.build(delays)?.sample(self.region(), config)
    }
}

impl CompiledModel {
    /// Sample this model for `region`.
    pub fn sample(&self, region: &str, config: &SamplerConfig) -> Result<Trace> {
        config.validate()?;
        tracing::info!(
            region,
            chains = config.chains,
            tune = config.tune,
            draws = config.draws,
            init = %config.init,
            "sampling"
        );
        let result = sample_nuts_multichain(
            self,
            config.chains,
            config.tune,
            config.draws,
            config.seed,
            config.cores,
            &config.nuts_config(),
        )?;
        let trace = assemble(self, region, config, &result)?;

        let diag = compute_diagnostics(&result);
        let min = |v: &[f64]| v.iter().copied().filter(|x| x.is_finite()).fold(f64::INFINITY, f64::min);
        tracing::debug!(
            region,
            min_ess_bulk = min(&diag.ess_bulk),
            min_ess_tail = min(&diag.ess_tail),
            min_ebfmi = min(&diag.ebfmi),
            max_treedepth_rate = diag.max_treedepth_rate,
            "sampler diagnostics"
        );
        tracing::info!(region, n_divergences = trace.n_divergences(), "sampling finished");
        Ok(trace)
    }
}

fn assemble(model: &CompiledModel, region: &str, config: &SamplerConfig, result: &SamplerResult) -> Result<Trace> {
    let mut posterior: Vec<VariableDraws> = VARIABLES
        .iter()
        .map(|v| VariableDraws {
            name: v.name.to_string(),
            dims: v.dims.iter().map(|d| d.to_string()).collect(),
            draws: Vec::with_capacity(result.chains.len()),
        })
        .collect();
    let mut predictive = VariableDraws {
        name: PREDICTIVE_VARIABLE.name.to_string(),
        dims: PREDICTIVE_VARIABLE.dims.iter().map(|d| d.to_string()).collect(),
        draws: Vec::with_capacity(result.chains.len()),
    };

    for (c, chain) in result.chains.iter().enumerate() {
        for var in posterior.iter_mut() {
            var.draws.push(Vec::with_capacity(chain.draws_constrained.len()));
        }
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add((config.chains + c) as u64));
        let mut replicated = Vec::with_capacity(chain.draws_constrained.len());
        for params in &chain.draws_constrained {
            let derived = model.derived(params)?;
            replicated.push(model.sample_predictive(&derived, &mut rng)?);
            for var in posterior.iter_mut() {
                let values = derived
                    .values(&var.name)
                    .ok_or_else(|| Error::Computation(format!("model does not derive {}", var.name)))?;
                if let Some(current) = var.draws.last_mut() {
                    current.push(values.to_vec());
                }
            }
        }
        predictive.draws.push(replicated);
    }

    let chains = &result.chains;
    Ok(Trace {
        region: region.to_string(),
        model_version: MODEL_VERSION.to_string(),
        n_tune: result.n_warmup,
        coords: model.coords().clone(),
        posterior,
        posterior_predictive: vec![predictive],
        constant_data: ConstantData {
            observed_positive: model.observed_positive().to_vec(),
            tests: model.tests().to_vec(),
        },
        sample_stats: SampleStats {
            diverging: chains.iter().map(|c| c.divergences.clone()).collect(),
            tree_depth: chains.iter().map(|c| c.tree_depths.clone()).collect(),
            accept_prob: chains.iter().map(|c| c.accept_probs.clone()).collect(),
            energy: chains.iter().map(|c| c.energies.clone()).collect(),
            step_size: chains.iter().map(|c| c.step_size).collect(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{constant_series, fixed_delay};
    use crate::model::ModelConfig;

    #[test]
    fn test_defaults() {
        let c = SamplerConfig::default();
        assert_eq!((c.cores, c.chains, c.tune, c.draws), (4, 4, 700, 200));
        assert_eq!(c.target_accept, 0.95);
        assert_eq!(c.init, InitStrategy::JitterAdaptDiag);
        let nuts = c.nuts_config();
        assert_eq!(nuts.max_treedepth, 10);
        assert_eq!(nuts.target_accept, 0.95);
    }

    #[test]
    fn test_validate() {
        assert!(SamplerConfig { chains: 0, ..SamplerConfig::default() }.validate().is_err());
        assert!(SamplerConfig { target_accept: 1.0, ..SamplerConfig::default() }.validate().is_err());
        assert!(SamplerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_small_run_shapes() {
        let series = constant_series(15, 30.0, 300.0);
        let gm = GenerativeModel::new("NY", &series, ModelConfig::default()).unwrap();
        let config = SamplerConfig { cores: 2, chains: 2, tune: 10, draws: 6, seed: 3, ..SamplerConfig::default() };
        let trace = gm.sample(&fixed_delay(), &config).unwrap();
        assert_eq!(trace.region(), "NY");
        assert_eq!(trace.model_version(), MODEL_VERSION);
        assert_eq!(trace.n_chains(), 2);
        assert_eq!(trace.n_draws(), 6);
        assert_eq!(trace.n_tune(), 10);
        let r_t = trace.variable("r_t").unwrap();
        assert_eq!(r_t.width(), 25);
        assert!(r_t.pooled_at(12).iter().all(|&r| r > 0.0));
        assert_eq!(trace.variable("alpha").unwrap().width(), 1);
        assert_eq!(trace.constant_data().tests.len(), 25);
        assert_eq!(trace.sample_stats().step_size.len(), 2);
        assert!(trace.validate().is_ok());

        let predictive = &trace.posterior_predictive()[0];
        assert_eq!(predictive.name, "nonzero_positive");
        assert_eq!(predictive.dims, vec!["nonzero_date"]);
        assert_eq!(predictive.draws.len(), 2);
        assert!(predictive.draws.iter().all(|chain| chain.len() == 6));
        assert_eq!(predictive.width(), trace.coords().nonzero_date.len());
        assert!(predictive.draws.iter().flatten().flatten().all(|&k| k >= 0.0 && k.fract() == 0.0));

        // Same seed, same draws.
        let again = gm.sample(&fixed_delay(), &config).unwrap();
        assert_eq!(again.variable("r_t"), trace.variable("r_t"));
        assert_eq!(again.posterior_predictive(), trace.posterior_predictive());
    }
}
