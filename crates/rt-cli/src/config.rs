//! Run configuration file (`--config run.yaml` / `run.json`).

use anyhow::{Context, Result};
use rt_epi::{DelayConfig, DiagnosticsGate, ModelConfig, SamplerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything a fit needs besides the observed data. Every section is
/// optional; missing values take the library defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Regions to fit (empty: every region in the input).
    pub regions: Vec<String>,
    /// Model construction.
    pub model: ModelConfig,
    /// Sampler controls.
    pub sampler: SamplerConfig,
    /// Convergence thresholds.
    pub gate: DiagnosticsGate,
    /// Delay distribution source.
    pub delay: DelayConfig,
}

/// Load a run config; `.json` files are JSON, anything else YAML.
pub fn read_run_config(path: &Path) -> Result<RunConfig> {
    let bytes = std::fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: RunConfig = if ext == "json" {
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?
    } else {
        serde_yaml_ng::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?
    };
    Ok(cfg)
}
