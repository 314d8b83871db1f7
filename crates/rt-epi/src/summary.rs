//! Per-date summary of a verified trace.

use crate::gate::VerifiedTrace;
use chrono::NaiveDate;
use rt_core::{Error, Result};
use std::io::Write;

/// Probability mass of the credible interval.
pub const HDI_PROB: f64 = 0.8;

/// Column names of the summary CSV.
pub const COLUMNS: [&str; 10] = [
    "date",
    "mean",
    "median",
    "lower_80",
    "upper_80",
    "infections",
    "test_adjusted_positive",
    "test_adjusted_positive_raw",
    "positive",
    "tests",
];

/// One summary row.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    /// Calendar date.
    pub date: NaiveDate,
    /// Posterior mean of Rt.
    pub mean: f64,
    /// Posterior median of Rt.
    pub median: f64,
    /// Lower bound of the 80% HDI of Rt.
    pub lower_80: f64,
    /// Upper bound of the 80% HDI of Rt.
    pub upper_80: f64,
    /// Posterior-mean infections, rescaled to the observed positives.
    pub infections: f64,
    /// Posterior-mean test-adjusted positives, rescaled.
    pub test_adjusted_positive: f64,
    /// Observed positives over floored tests, rescaled.
    pub test_adjusted_positive_raw: f64,
    /// Observed positives.
    pub positive: f64,
    /// Observed tests.
    pub tests: f64,
}

impl SummaryRow {
    fn record(&self) -> [String; 10] {
        [
            self.date.to_string(),
            self.mean.to_string(),
            self.median.to_string(),
            self.lower_80.to_string(),
            self.upper_80.to_string(),
            self.infections.to_string(),
            self.test_adjusted_positive.to_string(),
            self.test_adjusted_positive_raw.to_string(),
            self.positive.to_string(),
            self.tests.to_string(),
        ]
    }
}

/// Summary of one region, one row per date in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    region: String,
    rows: Vec<SummaryRow>,
}

/// Narrowest interval holding `prob` of the samples (ArviZ `hdi`).
pub fn hdi(samples: &[f64], prob: f64) -> (f64, f64) {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let width = ((prob * n as f64).floor() as usize).min(n - 1);
    let start = (0..n - width)
        .min_by(|&a, &b| (sorted[a + width] - sorted[a]).total_cmp(&(sorted[b + width] - sorted[b])))
        .unwrap_or(0);
    (sorted[start], sorted[start + width])
}

fn median(samples: &[f64]) -> f64 {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => 0.5 * (sorted[n / 2 - 1] + sorted[n / 2]),
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Multiply `series` so that its mean matches `target_mean`. Series whose
/// mean is zero or undefined are returned unchanged.
fn scale_to(series: Vec<f64>, target_mean: f64) -> Vec<f64> {
    let factor = target_mean / mean(&series);
    if !factor.is_finite() || factor <= 0.0 {
        return series;
    }
    series.into_iter().map(|v| v * factor).collect()
}

impl SummaryTable {
    /// Reduce a verified trace.
    pub fn from_trace(verified: &VerifiedTrace<'_>) -> Result<Self> {
        let trace = verified.trace();
        let var = |name: &str| {
            trace.variable(name).ok_or_else(|| Error::Data(format!("trace has no variable '{name}'")))
        };
        let r_t = var("r_t")?;
        let dates = &trace.coords().date;
        let data = trace.constant_data();
        let n = dates.len();
        if r_t.width() != n || data.observed_positive.len() != n || data.tests.len() != n {
            return Err(Error::Data(format!("trace shapes disagree with its {n}-day date axis")));
        }

        let target = mean(&data.observed_positive);
        let infections = scale_to(var("infections")?.mean_by_index(), target);
        let tap = scale_to(var("test_adjusted_positive")?.mean_by_index(), target);
        let floor = 0.1 * data.tests.iter().copied().fold(0.0, f64::max);
        let raw = scale_to(
            data.observed_positive.iter().zip(&data.tests).map(|(p, t)| p / t.max(floor)).collect(),
            target,
        );
        let r_mean = r_t.mean_by_index();

        let rows = (0..n)
            .map(|i| {
                let draws = r_t.pooled_at(i);
                let (lower_80, upper_80) = hdi(&draws, HDI_PROB);
                SummaryRow {
                    date: dates[i],
                    mean: r_mean[i],
                    median: median(&draws),
                    lower_80,
                    upper_80,
                    infections: infections[i],
                    test_adjusted_positive: tap[i],
                    test_adjusted_positive_raw: raw[i],
                    positive: data.observed_positive[i],
                    tests: data.tests[i],
                }
            })
            .collect();
        Ok(Self { region: trace.region().to_string(), rows })
    }

    /// Region the table belongs to.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Rows in ascending date order.
    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the table as CSV.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(COLUMNS)?;
        for row in &self.rows {
            wtr.write_record(row.record())?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Concatenate region tables into one CSV with a leading `region` column.
pub fn gather_summaries<W: Write>(tables: &[SummaryTable], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(std::iter::once("region").chain(COLUMNS))?;
    for table in tables {
        for row in &table.rows {
            let record = row.record();
            wtr.write_record(std::iter::once(table.region.as_str()).chain(record.iter().map(String::as_str)))?;
        }
    }
    wtr.flush()?;
    Ok(())
}
