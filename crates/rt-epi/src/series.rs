//! Observed daily positive/test counts for one region.

use chrono::{Days, NaiveDate};
use rt_core::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;

/// Date-indexed `(positive, total)` counts with contiguous daily dates.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedSeries {
    dates: Vec<NaiveDate>,
    positive: Vec<f64>,
    total: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct SeriesRow {
    #[serde(default)]
    region: Option<String>,
    date: NaiveDate,
    positive: f64,
    total: f64,
}

impl ObservedSeries {
    /// Validate and wrap a series.
    ///
    /// Dates must increase by exactly one day; counts must be finite and
    /// non-negative.
    pub fn new(dates: Vec<NaiveDate>, positive: Vec<f64>, total: Vec<f64>) -> Result<Self> {
        if dates.is_empty() {
            return Err(Error::Data("observed series is empty".to_string()));
        }
        if positive.len() != dates.len() || total.len() != dates.len() {
            return Err(Error::Data(format!(
                "observed series length mismatch: {} dates, {} positive, {} total",
                dates.len(),
                positive.len(),
                total.len()
            )));
        }
        for (i, w) in dates.windows(2).enumerate() {
            if (w[1] - w[0]).num_days() != 1 {
                return Err(Error::Data(format!(
                    "dates must be contiguous and increasing: {} follows {} at row {}",
                    w[1],
                    w[0],
                    i + 1
                )));
            }
        }
        for (name, col) in [("positive", &positive), ("total", &total)] {
            if let Some((i, v)) = col.iter().enumerate().find(|(_, v)| !v.is_finite() || **v < 0.0) {
                return Err(Error::Data(format!(
                    "{name} must be finite and >= 0, got {v} on {}",
                    dates[i]
                )));
            }
        }
        Ok(Self { dates, positive, total })
    }

    /// Build a series starting at `start` with one row per value.
    pub fn from_start(start: NaiveDate, positive: Vec<f64>, total: Vec<f64>) -> Result<Self> {
        let dates = (0..positive.len())
            .map(|i| {
                start
                    .checked_add_days(Days::new(i as u64))
                    .ok_or_else(|| Error::Data(format!("date overflow at offset {i}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(dates, positive, total)
    }

    /// Read a `date,positive,total` CSV.
    ///
    /// If the file carries a `region` column, `region` selects the rows to
    /// keep (and must then be given).
    pub fn from_csv_reader<R: Read>(reader: R, region: Option<&str>) -> Result<Self> {
        let mut regions = read_rows(reader)?;
        match (region, regions.len()) {
            (_, 0) => Err(Error::Data("observed CSV has no rows".to_string())),
            (Some(name), _) => regions
                .remove(name)
                .ok_or_else(|| Error::Data(format!("region '{name}' not found in observed CSV")))
                .and_then(Self::from_rows),
            (None, 1) => {
                let rows = regions.into_values().next().unwrap_or_default();
                Self::from_rows(rows)
            }
            (None, n) => Err(Error::Validation(format!(
                "observed CSV holds {n} regions; select one"
            ))),
        }
    }

    /// Read every region of a `region,date,positive,total` CSV, sorted by
    /// region name. Rows without a region column are keyed by `""`.
    ///
    /// Each region is validated on its own: a malformed region yields an
    /// `Err` entry and leaves the others usable. Only an unreadable file
    /// fails as a whole.
    pub fn regions_from_csv_reader<R: Read>(reader: R) -> Result<Vec<(String, Result<Self>)>> {
        Ok(read_rows(reader)?
            .into_iter()
            .map(|(name, rows)| (name, Self::from_rows(rows)))
            .collect())
    }

    fn from_rows(mut rows: Vec<SeriesRow>) -> Result<Self> {
        rows.sort_by_key(|r| r.date);
        let dates = rows.iter().map(|r| r.date).collect();
        let positive = rows.iter().map(|r| r.positive).collect();
        let total = rows.iter().map(|r| r.total).collect();
        Self::new(dates, positive, total)
    }

    /// Number of days.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Always false for a validated series.
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Dates.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Positive counts.
    pub fn positive(&self) -> &[f64] {
        &self.positive
    }

    /// Test counts.
    pub fn total(&self) -> &[f64] {
        &self.total
    }

    /// Trim leading days before the first nonzero positive count and prepend
    /// `buffer_days` zero-count days.
    ///
    /// Fails with a data error when no day has a positive count or no
    /// remaining day has tests.
    pub fn prepare(&self, buffer_days: usize) -> Result<Self> {
        let first = self
            .positive
            .iter()
            .position(|&p| p != 0.0)
            .ok_or_else(|| Error::Data("observed series has no nonzero positive counts".to_string()))?;
        let start = self.dates[first]
            .checked_sub_days(Days::new(buffer_days as u64))
            .ok_or_else(|| Error::Data(format!("cannot pad {buffer_days} days before {}", self.dates[first])))?;

        let mut positive = vec![0.0; buffer_days];
        positive.extend_from_slice(&self.positive[first..]);
        let mut total = vec![0.0; buffer_days];
        total.extend_from_slice(&self.total[first..]);

        if !total.iter().any(|&t| t > 0.0) {
            return Err(Error::Data("observed series has no day with tests > 0".to_string()));
        }
        Self::from_start(start, positive, total)
    }
}

fn read_rows<R: Read>(reader: R) -> Result<BTreeMap<String, Vec<SeriesRow>>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut regions: BTreeMap<String, Vec<SeriesRow>> = BTreeMap::new();
    for row in rdr.deserialize() {
        let row: SeriesRow = row?;
        regions.entry(row.region.clone().unwrap_or_default()).or_default().push(row);
    }
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_rejects_gaps_and_negatives() {
        let err = ObservedSeries::new(vec![d("2020-03-01"), d("2020-03-03")], vec![1.0, 2.0], vec![5.0, 5.0]);
        assert!(matches!(err, Err(Error::Data(_))));
        let err = ObservedSeries::from_start(d("2020-03-01"), vec![1.0, -2.0], vec![5.0, 5.0]);
        assert!(matches!(err, Err(Error::Data(_))));
        let err = ObservedSeries::from_start(d("2020-03-01"), vec![1.0], vec![5.0, 5.0]);
        assert!(matches!(err, Err(Error::Data(_))));
        assert!(ObservedSeries::from_start(d("2020-03-01"), vec![], vec![]).is_err());
    }

    #[test]
    fn test_prepare_trims_and_pads() {
        let s = ObservedSeries::from_start(d("2020-03-01"), vec![0.0, 0.0, 3.0, 4.0], vec![1.0, 2.0, 10.0, 20.0])
            .unwrap();
        let p = s.prepare(2).unwrap();
        assert_eq!(p.len(), 4);
        assert_eq!(p.dates()[0], d("2020-03-01"));
        assert_eq!(p.dates()[2], d("2020-03-03"));
        assert_eq!(p.positive(), &[0.0, 0.0, 3.0, 4.0]);
        assert_eq!(p.total(), &[0.0, 0.0, 10.0, 20.0]);

        let p = s.prepare(10).unwrap();
        assert_eq!(p.len(), 12);
        assert_eq!(p.dates()[0], d("2020-02-22"));
    }

    #[test]
    fn test_prepare_requires_signal() {
        let s = ObservedSeries::from_start(d("2020-03-01"), vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        assert!(matches!(s.prepare(10), Err(Error::Data(_))));
        let s = ObservedSeries::from_start(d("2020-03-01"), vec![0.0, 2.0], vec![1.0, 0.0]).unwrap();
        assert!(matches!(s.prepare(10), Err(Error::Data(_))));
    }

    #[test]
    fn test_csv_single_and_multi_region() {
        let csv = "date,positive,total\n2020-03-02,2,10\n2020-03-01,1,10\n";
        let s = ObservedSeries::from_csv_reader(csv.as_bytes(), None).unwrap();
        assert_eq!(s.dates()[0], d("2020-03-01"));
        assert_eq!(s.positive(), &[1.0, 2.0]);

        let csv = "region,date,positive,total\nNY,2020-03-01,1,10\nCA,2020-03-01,5,50\nNY,2020-03-02,2,10\n";
        let ny = ObservedSeries::from_csv_reader(csv.as_bytes(), Some("NY")).unwrap();
        assert_eq!(ny.len(), 2);
        assert!(ObservedSeries::from_csv_reader(csv.as_bytes(), None).is_err());
        assert!(ObservedSeries::from_csv_reader(csv.as_bytes(), Some("TX")).is_err());

        let all = ObservedSeries::regions_from_csv_reader(csv.as_bytes()).unwrap();
        let names: Vec<&str> = all.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["CA", "NY"]);
        assert!(all.iter().all(|(_, s)| s.is_ok()));
    }

    #[test]
    fn test_broken_region_does_not_spoil_others() {
        // BAD skips 2020-03-03.
        let csv = "region,date,positive,total\n\
                   GOOD,2020-03-01,1,10\nGOOD,2020-03-02,2,10\nGOOD,2020-03-03,3,10\n\
                   BAD,2020-03-01,1,10\nBAD,2020-03-02,2,10\nBAD,2020-03-04,3,10\n";
        let all = ObservedSeries::regions_from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(all.len(), 2);
        let (bad, bad_series) = &all[0];
        assert_eq!(bad, "BAD");
        assert!(matches!(bad_series, Err(Error::Data(m)) if m.contains("contiguous")));
        let (good, good_series) = &all[1];
        assert_eq!(good, "GOOD");
        assert_eq!(good_series.as_ref().unwrap().len(), 3);

        // A row that does not parse still fails the whole file.
        let csv = "region,date,positive,total\nGOOD,2020-03-01,one,10\n";
        assert!(ObservedSeries::regions_from_csv_reader(csv.as_bytes()).is_err());
    }
}
