use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rtlive"))
}

fn repo_root() -> PathBuf {
    // crates/rt-cli -> repo root
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..").canonicalize().unwrap()
}

fn fixture_path(name: &str) -> PathBuf {
    repo_root().join("tests/fixtures").join(name)
}

fn tmp_path(filename: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("rtlive_cli_{}_{}_{}", std::process::id(), nanos, filename));
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

const TINY_SAMPLER: [&str; 10] =
    ["--chains", "2", "--cores", "2", "--tune", "5", "--draws", "6", "--seed", "11"];
const PERMISSIVE_GATE: [&str; 4] = ["--max-divergences", "1000000", "--r-hat-limit", "1e9"];

#[test]
fn fit_writes_region_outputs_and_reports_failures() {
    let input = fixture_path("observed.csv");
    let delay = fixture_path("p_delay.csv");
    assert!(input.exists(), "missing fixture: {}", input.display());
    let out_dir = tmp_path("fit");

    let mut args = vec![
        "fit",
        "--input",
        input.to_str().unwrap(),
        "--delay-cache",
        delay.to_str().unwrap(),
        "--out-dir",
        out_dir.to_str().unwrap(),
        "--region",
        "NY",
        "--region",
        "BAD",
    ];
    args.extend(TINY_SAMPLER);
    args.extend(PERMISSIVE_GATE);
    let out = run(&args);

    // BAD has no positive day and must fail; NY still gets its outputs.
    assert!(!out.status.success(), "fit with a failing region should exit non-zero");
    let status: serde_json::Value = serde_json::from_slice(&out.stdout).expect("stdout should be JSON");
    let regions = status.get("regions").and_then(|r| r.as_array()).unwrap();
    assert_eq!(regions.len(), 2);
    assert_eq!(regions[0]["region"], "NY");
    assert_eq!(regions[0]["status"], "ok");
    assert_eq!(regions[0]["rows"], 40);
    assert_eq!(regions[1]["region"], "BAD");
    assert_eq!(regions[1]["status"], "failed");

    let summary = std::fs::read_to_string(out_dir.join("NY/summary.csv")).unwrap();
    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines.len(), 41);
    assert!(lines[0].starts_with("date,mean,median,lower_80,upper_80"));
    assert!(lines[1].starts_with("2020-02-20,"));

    let trace: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join("NY/trace.json")).unwrap()).unwrap();
    assert_eq!(trace["model_version"], "1.0.0");
    assert_eq!(trace["region"], "NY");

    assert!(!out_dir.join("BAD/summary.csv").exists());
    let joined = std::fs::read_to_string(out_dir.join("joined.csv")).unwrap();
    assert!(joined.starts_with("region,date,"));
    assert_eq!(joined.lines().count(), 41);

    let _ = std::fs::remove_dir_all(&out_dir);
}

#[test]
fn fit_keeps_trace_when_gate_refuses() {
    let input = fixture_path("observed.csv");
    let delay = fixture_path("p_delay.csv");
    let out_dir = tmp_path("gate");

    // Constant quantities report r-hat 1.0, so a limit below 1 always refuses.
    let out = run(&[
        "fit",
        "--input",
        input.to_str().unwrap(),
        "--delay-cache",
        delay.to_str().unwrap(),
        "--out-dir",
        out_dir.to_str().unwrap(),
        "--region",
        "NY",
        "--chains",
        "2",
        "--cores",
        "2",
        "--tune",
        "2",
        "--draws",
        "4",
        "--max-divergences",
        "1000000",
        "--r-hat-limit",
        "0.5",
    ]);
    assert!(!out.status.success());
    assert!(out_dir.join("NY/trace.json").exists(), "trace is kept for inspection");
    assert!(!out_dir.join("NY/summary.csv").exists());

    let _ = std::fs::remove_dir_all(&out_dir);
}

#[test]
fn fit_reads_yaml_config() {
    let input = fixture_path("observed.csv");
    let delay = fixture_path("p_delay.csv");
    let out_dir = tmp_path("yaml");
    let config = tmp_path("run.yaml");
    std::fs::write(
        &config,
        format!(
            "regions: [NY]\n\
             model:\n  buffer_days: 3\n\
             sampler:\n  chains: 2\n  cores: 1\n  tune: 5\n  draws: 5\n  init: adapt_diag\n\
             gate:\n  max_divergences: 1000000\n  r_hat_limit: 1.0e9\n\
             delay:\n  cache: {}\n",
            delay.display()
        ),
    )
    .unwrap();

    let out = run(&[
        "fit",
        "--input",
        input.to_str().unwrap(),
        "--out-dir",
        out_dir.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "fit should succeed, stderr={}", String::from_utf8_lossy(&out.stderr));
    let summary = std::fs::read_to_string(out_dir.join("NY/summary.csv")).unwrap();
    assert_eq!(summary.lines().count(), 34);
    assert!(!out_dir.join("joined.csv").exists());

    let _ = std::fs::remove_dir_all(&out_dir);
    let _ = std::fs::remove_file(&config);
}

#[test]
fn kernels_prints_both_distributions() {
    let delay = fixture_path("p_delay.csv");
    let out = run(&["kernels", "--delay-cache", delay.to_str().unwrap()]);
    assert!(out.status.success(), "kernels should succeed, stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let g = v["generation_interval"].as_array().unwrap();
    assert_eq!(g.len(), 20);
    assert_eq!(g[0].as_f64(), Some(0.0));
    let p = v["p_delay"].as_array().unwrap();
    assert_eq!(p.len(), 30);
    let total: f64 = p.iter().map(|x| x.as_f64().unwrap()).sum();
    assert!((total - 1.0).abs() < 1e-9);
}

#[test]
fn kernels_estimates_and_caches_delay_from_line_list() {
    let line_list = fixture_path("patients.csv");
    let cache = tmp_path("cache").join("p_delay.csv");
    let output = tmp_path("kernels.json");

    let out = run(&[
        "kernels",
        "--delay-cache",
        cache.to_str().unwrap(),
        "--line-list",
        line_list.to_str().unwrap(),
        "--output",
        output.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "kernels should succeed, stderr={}", String::from_utf8_lossy(&out.stderr));
    assert!(cache.exists(), "delay distribution should be persisted");

    let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    let p: Vec<f64> = v["p_delay"].as_array().unwrap().iter().map(|x| x.as_f64().unwrap()).collect();
    assert!(p[..5].iter().all(|&x| x == 0.0), "incubation days carry no mass");
    assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);

    let _ = std::fs::remove_dir_all(cache.parent().unwrap());
    let _ = std::fs::remove_file(&output);
}

#[test]
fn fit_rejects_unknown_init() {
    let input = fixture_path("observed.csv");
    let out = run(&["fit", "--input", input.to_str().unwrap(), "--out-dir", "unused", "--init", "map"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown init strategy"));
}

/// GOOD has 40 contiguous days; BAD skips its third day.
fn write_good_and_broken_input(path: &std::path::Path) {
    let start = chrono::NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
    let mut csv = String::from("region,date,positive,total\n");
    for d in 0..40u64 {
        let date = start + chrono::Days::new(d);
        csv.push_str(&format!("GOOD,{date},{},{}\n", 20 + d % 7, 400 + 5 * d));
    }
    for d in [0u64, 1, 3, 4] {
        let date = start + chrono::Days::new(d);
        csv.push_str(&format!("BAD,{date},10,200\n"));
    }
    std::fs::write(path, csv).unwrap();
}

#[test]
fn fit_continues_past_a_malformed_region() {
    let input = tmp_path("mixed.csv");
    write_good_and_broken_input(&input);
    let delay = fixture_path("p_delay.csv");
    let out_dir = tmp_path("mixed");

    let mut args = vec![
        "fit",
        "--input",
        input.to_str().unwrap(),
        "--delay-cache",
        delay.to_str().unwrap(),
        "--out-dir",
        out_dir.to_str().unwrap(),
    ];
    args.extend(TINY_SAMPLER);
    args.extend(PERMISSIVE_GATE);
    let out = run(&args);

    assert!(!out.status.success(), "a malformed region should make the run exit non-zero");
    let status: serde_json::Value = serde_json::from_slice(&out.stdout).expect("stdout should be JSON");
    let regions = status["regions"].as_array().unwrap();
    assert_eq!(regions.len(), 2);
    assert_eq!(regions[0]["region"], "BAD");
    assert_eq!(regions[0]["status"], "failed");
    assert!(regions[0]["error"].as_str().unwrap().contains("contiguous"));
    assert_eq!(regions[1]["region"], "GOOD");
    assert_eq!(regions[1]["status"], "ok");
    assert!(out_dir.join("GOOD/summary.csv").exists());
    assert!(!out_dir.join("BAD").exists());

    // Selecting only the healthy region succeeds.
    let only_good = tmp_path("only_good");
    let mut args = vec![
        "fit",
        "--input",
        input.to_str().unwrap(),
        "--delay-cache",
        delay.to_str().unwrap(),
        "--out-dir",
        only_good.to_str().unwrap(),
        "--region",
        "GOOD",
    ];
    args.extend(TINY_SAMPLER);
    args.extend(PERMISSIVE_GATE);
    let out = run(&args);
    assert!(out.status.success(), "fit should succeed, stderr={}", String::from_utf8_lossy(&out.stderr));
    assert!(only_good.join("GOOD/summary.csv").exists());

    let _ = std::fs::remove_dir_all(&out_dir);
    let _ = std::fs::remove_dir_all(&only_good);
    let _ = std::fs::remove_file(&input);
}

#[test]
fn fit_refuses_region_names_that_escape_the_output_directory() {
    let base = tmp_path("escape");
    let out_dir = base.join("out");
    std::fs::create_dir_all(&out_dir).unwrap();
    let input = base.join("observed.csv");
    let fixture = std::fs::read_to_string(fixture_path("observed.csv")).unwrap();
    let renamed: String = fixture
        .lines()
        .filter(|l| l.starts_with("region,") || l.starts_with("NY,"))
        .map(|l| format!("{}\n", l.replacen("NY,", "../evil,", 1)))
        .collect();
    std::fs::write(&input, renamed).unwrap();
    let delay = fixture_path("p_delay.csv");

    let mut args = vec![
        "fit",
        "--input",
        input.to_str().unwrap(),
        "--delay-cache",
        delay.to_str().unwrap(),
        "--out-dir",
        out_dir.to_str().unwrap(),
    ];
    args.extend(TINY_SAMPLER);
    args.extend(PERMISSIVE_GATE);
    let out = run(&args);

    assert!(!out.status.success());
    let status: serde_json::Value = serde_json::from_slice(&out.stdout).expect("stdout should be JSON");
    assert_eq!(status["regions"][0]["region"], "../evil");
    assert_eq!(status["regions"][0]["status"], "failed");
    assert!(!base.join("evil").exists(), "nothing may be written outside the output directory");

    let _ = std::fs::remove_dir_all(&base);
}
