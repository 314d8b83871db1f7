//! Posterior trace: draws, constant data and sampler statistics.
//!
//! A trace is produced once by the sampler and never mutated afterwards. It
//! serialises to JSON and carries the model version it was produced with.

use crate::model::Coords;
use rt_core::{Error, Result, MODEL_VERSION};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Draws of one variable, indexed `[chain][draw][index]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDraws {
    /// Variable name.
    pub name: String,
    /// Coordinate axes of the trailing index (empty for scalars).
    pub dims: Vec<String>,
    /// Draws.
    pub draws: Vec<Vec<Vec<f64>>>,
}

impl VariableDraws {
    /// Length of the trailing index (1 for scalars).
    pub fn width(&self) -> usize {
        self.draws.first().and_then(|c| c.first()).map_or(0, Vec::len)
    }

    /// Per-chain draws at one index.
    pub fn chains_at(&self, idx: usize) -> Vec<Vec<f64>> {
        self.draws.iter().map(|chain| chain.iter().map(|d| d[idx]).collect()).collect()
    }

    /// All draws at one index, chains concatenated.
    pub fn pooled_at(&self, idx: usize) -> Vec<f64> {
        self.draws.iter().flat_map(|chain| chain.iter().map(move |d| d[idx])).collect()
    }

    /// Posterior mean at every index.
    pub fn mean_by_index(&self) -> Vec<f64> {
        let n: usize = self.draws.iter().map(Vec::len).sum();
        let mut acc = vec![0.0; self.width()];
        for draw in self.draws.iter().flatten() {
            for (a, v) in acc.iter_mut().zip(draw) {
                *a += v;
            }
        }
        acc.iter().map(|a| a / n as f64).collect()
    }
}

/// Observed data the model was conditioned on, indexed by `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantData {
    /// Observed positive counts.
    pub observed_positive: Vec<f64>,
    /// Observed test counts.
    pub tests: Vec<f64>,
}

/// Per-transition sampler statistics, indexed `[chain][draw]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    /// Divergent transition flags.
    pub diverging: Vec<Vec<bool>>,
    /// Tree depth.
    pub tree_depth: Vec<Vec<usize>>,
    /// Mean Metropolis acceptance probability of the trajectory.
    pub accept_prob: Vec<Vec<f64>>,
    /// Hamiltonian at the start of the transition.
    pub energy: Vec<Vec<f64>>,
    /// Adapted step size per chain.
    pub step_size: Vec<f64>,
}

/// Immutable result of one sampling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub(crate) region: String,
    pub(crate) model_version: String,
    pub(crate) n_tune: usize,
    pub(crate) coords: Coords,
    pub(crate) posterior: Vec<VariableDraws>,
    #[serde(default)]
    pub(crate) posterior_predictive: Vec<VariableDraws>,
    pub(crate) constant_data: ConstantData,
    pub(crate) sample_stats: SampleStats,
}

impl Trace {
    /// Region identifier.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Model version the trace was produced with.
    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Warmup iterations per chain.
    pub fn n_tune(&self) -> usize {
        self.n_tune
    }

    /// Number of chains.
    pub fn n_chains(&self) -> usize {
        self.sample_stats.diverging.len()
    }

    /// Post-warmup draws per chain.
    pub fn n_draws(&self) -> usize {
        self.sample_stats.diverging.first().map_or(0, Vec::len)
    }

    /// Coordinate axes.
    pub fn coords(&self) -> &Coords {
        &self.coords
    }

    /// All recorded variables, in registry order.
    pub fn posterior(&self) -> &[VariableDraws] {
        &self.posterior
    }

    /// Draws of one variable.
    pub fn variable(&self, name: &str) -> Option<&VariableDraws> {
        self.posterior.iter().find(|v| v.name == name)
    }

    /// Replicated observations drawn from the likelihood, one set per draw.
    pub fn posterior_predictive(&self) -> &[VariableDraws] {
        &self.posterior_predictive
    }

    /// Recorded variable names.
    pub fn variable_names(&self) -> Vec<&str> {
        self.posterior.iter().map(|v| v.name.as_str()).collect()
    }

    /// Conditioning data.
    pub fn constant_data(&self) -> &ConstantData {
        &self.constant_data
    }

    /// Sampler statistics.
    pub fn sample_stats(&self) -> &SampleStats {
        &self.sample_stats
    }

    /// Total divergent transitions across chains.
    pub fn n_divergences(&self) -> usize {
        self.sample_stats.diverging.iter().flatten().filter(|&&d| d).count()
    }

    /// Serialise as JSON.
    pub fn write_json<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Read a JSON trace, refusing traces from another model version or
    /// with draws that do not match the declared shapes.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        let trace: Trace = serde_json::from_reader(reader)?;
        if trace.model_version != MODEL_VERSION {
            return Err(Error::Data(format!(
                "trace model version {} is incompatible with {MODEL_VERSION}",
                trace.model_version
            )));
        }
        trace.validate()?;
        Ok(trace)
    }

    /// Check that every group is rectangular: `[chain][draw]` for sampler
    /// statistics, `[chain][draw][width]` for variables, where the width is
    /// the product of the variable's axis lengths.
    pub fn validate(&self) -> Result<()> {
        let n_chains = self.n_chains();
        let n_draws = self.n_draws();
        if n_chains == 0 || n_draws == 0 {
            return Err(Error::Data("trace has no draws".to_string()));
        }

        let stats = &self.sample_stats;
        check_chains("diverging", &stats.diverging, n_chains, n_draws)?;
        check_chains("tree_depth", &stats.tree_depth, n_chains, n_draws)?;
        check_chains("accept_prob", &stats.accept_prob, n_chains, n_draws)?;
        check_chains("energy", &stats.energy, n_chains, n_draws)?;
        if stats.step_size.len() != n_chains {
            return Err(Error::Data(format!(
                "step_size has {} entries for {n_chains} chains",
                stats.step_size.len()
            )));
        }

        let n_dates = self.coords.date.len();
        for (what, len) in
            [("observed_positive", self.constant_data.observed_positive.len()), ("tests", self.constant_data.tests.len())]
        {
            if len != n_dates {
                return Err(Error::Data(format!("constant data {what} has {len} entries for {n_dates} dates")));
            }
        }

        for var in self.posterior.iter().chain(&self.posterior_predictive) {
            let mut width = 1;
            for dim in &var.dims {
                let axis = self
                    .coords
                    .axis(dim)
                    .ok_or_else(|| Error::Data(format!("variable {} uses unknown axis '{dim}'", var.name)))?;
                width *= axis.len();
            }
            check_chains(&var.name, &var.draws, n_chains, n_draws)?;
            if let Some(bad) = var.draws.iter().flatten().find(|d| d.len() != width) {
                return Err(Error::Data(format!(
                    "variable {} has a draw of width {} where {width} is expected",
                    var.name,
                    bad.len()
                )));
            }
        }
        Ok(())
    }
}

fn check_chains<T>(what: &str, chains: &[Vec<T>], n_chains: usize, n_draws: usize) -> Result<()> {
    if chains.len() != n_chains {
        return Err(Error::Data(format!("{what} has {} chains, expected {n_chains}", chains.len())));
    }
    if let Some((c, chain)) = chains.iter().enumerate().find(|(_, chain)| chain.len() != n_draws) {
        return Err(Error::Data(format!("{what} chain {c} has {} draws, expected {n_draws}", chain.len())));
    }
    Ok(())
}
