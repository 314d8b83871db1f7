//! Generation-interval and reporting-delay kernels.
//!
//! Both kernels are discrete probability vectors indexed by days. The
//! generation interval is derived from a lognormal; the reporting delay is
//! empirical and reaches the model through a [`DelayCache`].

pub mod line_list;

use rt_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub use line_list::LineListConfig;

/// Discrete generation-interval distribution `g[k] = P(interval = k days)`.
///
/// `g[0] == 0`, entries are non-negative and sum to one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationInterval {
    probabilities: Vec<f64>,
}

impl GenerationInterval {
    /// Mean generation interval in days.
    pub const MEAN: f64 = 4.7;
    /// Standard deviation of the generation interval in days.
    pub const STD: f64 = 2.9;
    /// Number of days covered (`0..HORIZON`).
    pub const HORIZON: usize = 20;

    /// Discretise a lognormal with the given mean/std over days `0..horizon`.
    pub fn lognormal(mean: f64, std: f64, horizon: usize) -> Result<Self> {
        let probabilities = rt_prob::lognormal::discretize_mean_std(mean, std, horizon)?;
        Ok(Self { probabilities })
    }

    /// The published COVID-19 interval: lognormal, mean 4.7, sd 2.9, 20 days.
    pub fn standard() -> Result<Self> {
        Self::lognormal(Self::MEAN, Self::STD, Self::HORIZON)
    }

    /// Probabilities by day.
    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// Number of days covered.
    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    /// Never true for a constructed kernel.
    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }
}

/// Discrete infection-to-report delay distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelayDistribution {
    probabilities: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DelayRow {
    p_delay: f64,
}

impl DelayDistribution {
    /// Validate and renormalise a probability vector.
    pub fn from_probabilities(probabilities: Vec<f64>) -> Result<Self> {
        if probabilities.is_empty() {
            return Err(Error::Data("delay distribution is empty".to_string()));
        }
        if let Some(p) = probabilities.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(Error::Data(format!("delay probabilities must be finite and >= 0, got {p}")));
        }
        let sum: f64 = probabilities.iter().sum();
        if sum <= 0.0 {
            return Err(Error::Data("delay distribution has zero mass".to_string()));
        }
        Ok(Self { probabilities: probabilities.into_iter().map(|p| p / sum).collect() })
    }

    /// Histogram of observed onset-to-confirmation delays, left-padded with
    /// `incubation_days` zero-probability days.
    pub fn from_delays(delays: &[u32], incubation_days: usize) -> Result<Self> {
        let Some(&max) = delays.iter().max() else {
            return Err(Error::Data("no usable onset/confirmation delays".to_string()));
        };
        let mut counts = vec![0.0; incubation_days + max as usize + 1];
        for &d in delays {
            counts[incubation_days + d as usize] += 1.0;
        }
        Self::from_probabilities(counts)
    }

    /// Read a single-column `p_delay` CSV.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let probabilities = rdr
            .deserialize()
            .map(|row| row.map(|r: DelayRow| r.p_delay))
            .collect::<std::result::Result<Vec<_>, csv::Error>>()?;
        Self::from_probabilities(probabilities)
    }

    /// Write the distribution as a single-column `p_delay` CSV.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for &p_delay in &self.probabilities {
            wtr.serialize(DelayRow { p_delay })?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Probabilities by day.
    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// Number of days covered.
    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    /// Never true for a constructed distribution.
    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }
}

/// Where the delay distribution comes from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    /// Cached `p_delay` CSV; written after an estimate from the line list.
    pub cache: Option<PathBuf>,
    /// Patient line list used when the cache is missing.
    pub line_list: Option<PathBuf>,
    /// Line-list filtering.
    #[serde(flatten)]
    pub filter: LineListConfig,
}

/// Explicit, memoised source of the reporting-delay distribution.
///
/// The first [`get`](Self::get) reads the cache file, or estimates the
/// distribution from the line list and persists it to the cache path. Later
/// calls return the memoised value.
#[derive(Debug)]
pub struct DelayCache {
    config: DelayConfig,
    value: OnceLock<DelayDistribution>,
}

impl DelayCache {
    /// Cache backed by files.
    pub fn new(config: DelayConfig) -> Self {
        Self { config, value: OnceLock::new() }
    }

    /// Cache holding a fixed in-memory distribution.
    pub fn fixed(dist: DelayDistribution) -> Self {
        Self { config: DelayConfig::default(), value: OnceLock::from(dist) }
    }

    /// Configuration this cache was built from.
    pub fn config(&self) -> &DelayConfig {
        &self.config
    }

    /// The delay distribution, loading or estimating it on first use.
    pub fn get(&self) -> Result<&DelayDistribution> {
        if let Some(dist) = self.value.get() {
            return Ok(dist);
        }
        let dist = self.load()?;
        Ok(self.value.get_or_init(|| dist))
    }

    fn load(&self) -> Result<DelayDistribution> {
        if let Some(path) = self.config.cache.as_deref().filter(|p| p.exists()) {
            tracing::debug!(path = %path.display(), "reading delay distribution cache");
            return DelayDistribution::from_csv_reader(File::open(path)?);
        }

        let Some(line_list) = self.config.line_list.as_deref() else {
            return Err(Error::Data(
                "no delay distribution: cache file missing and no line list configured".to_string(),
            ));
        };
        if !line_list.exists() {
            return Err(Error::Data(format!("line list not found: {}", line_list.display())));
        }

        let delays = line_list::read_delays(File::open(line_list)?, &self.config.filter)?;
        let dist = DelayDistribution::from_delays(&delays, self.config.filter.incubation_days)?;
        tracing::info!(n_delays = delays.len(), days = dist.len(), "estimated delay distribution from line list");

        if let Some(path) = self.config.cache.as_deref() {
            persist(&dist, path)?;
        }
        Ok(dist)
    }
}

fn persist(dist: &DelayDistribution, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    dist.write_csv(File::create(path)?)?;
    tracing::info!(path = %path.display(), "wrote delay distribution cache");
    Ok(())
}
