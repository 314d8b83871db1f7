//! Onset-to-confirmation delays from a patient line list.

use chrono::{Days, NaiveDate};
use rt_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Filtering applied to line-list records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineListConfig {
    /// Zero-probability days prepended to the delay histogram.
    pub incubation_days: usize,
    /// Longest delay kept, in days.
    pub max_delay: u32,
    /// Onsets this close to the latest onset are dropped (not all confirmed yet).
    pub recent_onset_days: u32,
    /// Countries whose confirmation dates are unusable.
    pub exclude_countries: Vec<String>,
}

impl Default for LineListConfig {
    fn default() -> Self {
        Self {
            incubation_days: 5,
            max_delay: 60,
            recent_onset_days: 14,
            exclude_countries: vec!["Mexico".to_string()],
        }
    }
}

#[derive(Debug, Deserialize)]
struct PatientRow {
    #[serde(default)]
    country: Option<String>,
    #[serde(default, alias = "date_onset_symptoms")]
    onset: Option<String>,
    #[serde(default, alias = "date_confirmation")]
    confirmed: Option<String>,
}

struct Patient {
    country: String,
    onset: NaiveDate,
    confirmed: NaiveDate,
}

/// Parse a line-list date: exactly ten characters, `DD.MM.YYYY` or ISO.
fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

/// Read a `country,onset,confirmed` CSV and return every usable delay in
/// days.
///
/// Records need all three fields and `confirmed > onset`; excluded
/// countries and recent onsets are dropped, as are delays above
/// `max_delay`. An empty result is a data error.
pub fn read_delays<R: Read>(reader: R, config: &LineListConfig) -> Result<Vec<u32>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut patients = Vec::new();
    for row in rdr.deserialize() {
        let row: PatientRow = row?;
        let (Some(country), Some(onset), Some(confirmed)) = (row.country, row.onset, row.confirmed) else {
            continue;
        };
        let (Some(onset), Some(confirmed)) = (parse_date(&onset), parse_date(&confirmed)) else {
            continue;
        };
        if confirmed > onset && !config.exclude_countries.iter().any(|c| *c == country) {
            patients.push(Patient { country, onset, confirmed });
        }
    }

    let cutoff = patients
        .iter()
        .map(|p| p.onset)
        .max()
        .and_then(|latest| latest.checked_sub_days(Days::new(u64::from(config.recent_onset_days))));
    let delays: Vec<u32> = patients
        .iter()
        .filter(|p| cutoff.is_some_and(|c| p.onset < c))
        .filter_map(|p| u32::try_from((p.confirmed - p.onset).num_days()).ok())
        .filter(|&d| d <= config.max_delay)
        .collect();

    if delays.is_empty() {
        return Err(Error::Data("line list yields no usable onset/confirmation delays".to_string()));
    }
    tracing::debug!(
        n_records = patients.len(),
        n_delays = delays.len(),
        countries = patients.iter().map(|p| p.country.as_str()).collect::<std::collections::BTreeSet<_>>().len(),
        "line list filtered"
    );
    Ok(delays)
}
