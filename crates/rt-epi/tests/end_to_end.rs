//! Full pipeline on a small constant series: build, sample, gate, summarise.

use chrono::NaiveDate;
use rt_epi::{
    DelayCache, DelayConfig, DiagnosticsGate, GenerativeModel, ModelConfig, ObservedSeries, SamplerConfig,
    SummaryTable, VARIABLES,
};
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../tests/fixtures").join(name)
}

fn delays() -> DelayCache {
    DelayCache::new(DelayConfig { cache: Some(fixture("p_delay.csv")), ..DelayConfig::default() })
}

fn constant_series() -> ObservedSeries {
    let start = NaiveDate::from_ymd_opt(2020, 4, 1).unwrap();
    ObservedSeries::from_start(start, vec![120.0; 40], vec![1500.0; 40]).unwrap()
}

#[test]
fn test_constant_series_end_to_end() {
    let gm = GenerativeModel::new("TEST", &constant_series(), ModelConfig::default()).unwrap();
    let config = SamplerConfig { cores: 2, chains: 2, tune: 5, draws: 7, ..SamplerConfig::default() };
    let trace = gm.sample(&delays(), &config).unwrap();

    for v in VARIABLES.iter() {
        let draws = trace.variable(v.name).unwrap_or_else(|| panic!("missing {}", v.name));
        assert_eq!(draws.draws.len(), 2);
        assert!(draws.draws.iter().all(|c| c.len() == 7));
    }
    assert_eq!(trace.coords().date.len(), 50);
    assert_eq!(trace.coords().nonzero_date.len(), 40);

    let verified = DiagnosticsGate::permissive().check(&trace).unwrap();
    let table = SummaryTable::from_trace(&verified).unwrap();
    assert_eq!(table.len(), 50);
    assert_eq!(table.rows()[0].date, NaiveDate::from_ymd_opt(2020, 3, 22).unwrap());
    for row in table.rows() {
        assert!(row.lower_80 <= row.median && row.median <= row.upper_80, "{row:?}");
    }

    let mut first = Vec::new();
    let mut second = Vec::new();
    table.write_csv(&mut first).unwrap();
    SummaryTable::from_trace(&verified).unwrap().write_csv(&mut second).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_buffer_only_changes_horizon() {
    let delays = delays();
    let a = GenerativeModel::new("A", &constant_series(), ModelConfig { buffer_days: 10 }).unwrap();
    let b = GenerativeModel::new("A", &constant_series(), ModelConfig { buffer_days: 20 }).unwrap();
    assert_eq!(a.build(&delays).unwrap().coords().date.len(), 50);
    assert_eq!(b.build(&delays).unwrap().coords().date.len(), 60);
}

#[test]
#[ignore = "slow: full-length sampling"]
fn test_default_settings_converge_on_growth() {
    let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
    let positive: Vec<f64> = (0..60).map(|t| (20.0 * (0.03 * t as f64).exp()).round()).collect();
    let series = ObservedSeries::from_start(start, positive, vec![2000.0; 60]).unwrap();
    let gm = GenerativeModel::new("GROW", &series, ModelConfig::default()).unwrap();
    let trace = gm.sample(&delays(), &SamplerConfig::default()).unwrap();
    let verified = DiagnosticsGate::default().check(&trace).unwrap();
    let table = SummaryTable::from_trace(&verified).unwrap();
    let late = &table.rows()[table.len() - 20];
    assert!(late.mean > 1.0, "growing epidemic must have Rt > 1, got {}", late.mean);
}
