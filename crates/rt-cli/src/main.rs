//! rtlive CLI

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{read_run_config, RunConfig};
use rt_epi::{
    gather_summaries, DelayCache, GenerationInterval, GenerativeModel, ObservedSeries, SummaryTable,
};
use rt_inference::InitStrategy;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Component, Path, PathBuf};

#[derive(Parser)]
#[command(name = "rtlive")]
#[command(about = "rtlive - Bayesian estimation of the time-varying reproduction number")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit one or more regions and write trace + summary per region
    Fit {
        /// Observed series CSV (`date,positive,total`, optional `region` column)
        #[arg(short, long)]
        input: PathBuf,

        /// Region(s) to fit. Defaults to the config file list, else every region.
        #[arg(long)]
        region: Vec<String>,

        /// Output directory (one subdirectory per region)
        #[arg(short, long)]
        out_dir: PathBuf,

        /// Run config (YAML, or JSON by extension)
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        delay: DelayArgs,

        /// Leading zero-count days
        #[arg(long)]
        buffer_days: Option<usize>,

        /// Worker threads
        #[arg(long)]
        cores: Option<usize>,

        /// Chains
        #[arg(long)]
        chains: Option<usize>,

        /// Warmup iterations per chain
        #[arg(long)]
        tune: Option<usize>,

        /// Draws per chain
        #[arg(long)]
        draws: Option<usize>,

        /// Target acceptance probability
        #[arg(long)]
        target_accept: Option<f64>,

        /// Init strategy (adapt_diag, jitter+adapt_diag, adapt_full, jitter+adapt_full)
        #[arg(long)]
        init: Option<InitStrategy>,

        /// Base RNG seed
        #[arg(long)]
        seed: Option<u64>,

        /// Tolerated divergent transitions
        #[arg(long)]
        max_divergences: Option<usize>,

        /// Largest tolerated r-hat
        #[arg(long)]
        r_hat_limit: Option<f64>,
    },

    /// Print the generation interval and delay distribution as JSON
    Kernels {
        /// Run config (YAML, or JSON by extension)
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        delay: DelayArgs,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct DelayArgs {
    /// Cached delay distribution CSV (`p_delay` column)
    #[arg(long)]
    delay_cache: Option<PathBuf>,

    /// Patient line list used when the cache is missing
    #[arg(long)]
    line_list: Option<PathBuf>,
}

impl DelayArgs {
    fn apply(self, cfg: &mut RunConfig) {
        if let Some(p) = self.delay_cache {
            cfg.delay.cache = Some(p);
        }
        if let Some(p) = self.line_list {
            cfg.delay.line_list = Some(p);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the JSON status report.
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Fit {
            input,
            region,
            out_dir,
            config,
            delay,
            buffer_days,
            cores,
            chains,
            tune,
            draws,
            target_accept,
            init,
            seed,
            max_divergences,
            r_hat_limit,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            delay.apply(&mut cfg);
            if !region.is_empty() {
                cfg.regions = region;
            }
            let model = &mut cfg.model;
            model.buffer_days = buffer_days.unwrap_or(model.buffer_days);
            let s = &mut cfg.sampler;
            s.cores = cores.unwrap_or(s.cores);
            s.chains = chains.unwrap_or(s.chains);
            s.tune = tune.unwrap_or(s.tune);
            s.draws = draws.unwrap_or(s.draws);
            s.target_accept = target_accept.unwrap_or(s.target_accept);
            s.init = init.unwrap_or(s.init);
            s.seed = seed.unwrap_or(s.seed);
            let g = &mut cfg.gate;
            g.max_divergences = max_divergences.unwrap_or(g.max_divergences);
            g.r_hat_limit = r_hat_limit.unwrap_or(g.r_hat_limit);
            cmd_fit(&input, &out_dir, &cfg)
        }
        Commands::Kernels { config, delay, output } => {
            let mut cfg = load_config(config.as_deref())?;
            delay.apply(&mut cfg);
            cmd_kernels(&cfg, output.as_deref())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(p) => {
            tracing::info!(path = %p.display(), "loading run config");
            read_run_config(p)
        }
        None => Ok(RunConfig::default()),
    }
}

/// A region name and its series, or why it cannot be fitted.
type RegionInput = (String, Result<ObservedSeries>);

/// Region names become output directory names and must be a single plain
/// path component.
fn check_region_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let plain = matches!((components.next(), components.next()), (Some(Component::Normal(_)), None));
    if !plain || name.contains(['/', '\\']) {
        anyhow::bail!("region name '{name}' is not usable as a directory name");
    }
    Ok(())
}

/// Pick the requested regions out of the input. A file without a region
/// column holds a single unnamed series, which takes the requested name.
///
/// Missing, malformed and unusably named regions come back as `Err`
/// entries so that the remaining regions are still fitted.
fn select_regions(
    all: Vec<(String, rt_core::Result<ObservedSeries>)>,
    requested: &[String],
) -> Result<Vec<RegionInput>> {
    let mut all: Vec<RegionInput> =
        all.into_iter().map(|(name, series)| (name, series.map_err(anyhow::Error::from))).collect();
    if all.is_empty() {
        anyhow::bail!("input has no rows");
    }
    if all.len() == 1 && all[0].0.is_empty() {
        let name = match requested {
            [] => "default".to_string(),
            [one] => one.clone(),
            _ => anyhow::bail!("input has no region column but {} regions were requested", requested.len()),
        };
        all[0].0 = name;
    } else if !requested.is_empty() {
        let mut picked = Vec::with_capacity(requested.len());
        for name in requested {
            match all.iter().position(|(n, _)| n == name) {
                Some(pos) => picked.push(all.swap_remove(pos)),
                None => picked.push((name.clone(), Err(anyhow::anyhow!("region '{name}' not found in input")))),
            }
        }
        all = picked;
    }
    Ok(all
        .into_iter()
        .map(|(name, series)| {
            let series = check_region_name(&name).and(series);
            (name, series)
        })
        .collect())
}

fn cmd_fit(input: &Path, out_dir: &Path, cfg: &RunConfig) -> Result<()> {
    cfg.sampler.validate()?;
    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let all = ObservedSeries::regions_from_csv_reader(file).with_context(|| format!("reading {}", input.display()))?;
    let regions = select_regions(all, &cfg.regions)?;
    let n_regions = regions.len();
    let delays = DelayCache::new(cfg.delay.clone());

    let mut tables = Vec::new();
    let mut status = Vec::new();
    for (name, series) in regions {
        match series.and_then(|series| fit_region(&name, &series, &delays, cfg, out_dir)) {
            Ok(table) => {
                status.push(serde_json::json!({ "region": name, "status": "ok", "rows": table.len() }));
                tables.push(table);
            }
            Err(e) => {
                tracing::error!(region = %name, error = %format!("{e:#}"), "region failed");
                status.push(serde_json::json!({ "region": name, "status": "failed", "error": format!("{e:#}") }));
            }
        }
    }

    if n_regions > 1 && !tables.is_empty() {
        let path = out_dir.join("joined.csv");
        gather_summaries(&tables, BufWriter::new(File::create(&path)?))?;
        tracing::info!(path = %path.display(), regions = tables.len(), "wrote joined summary");
    }

    println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "regions": status }))?);

    let failed = n_regions - tables.len();
    if failed > 0 {
        anyhow::bail!("{failed} of {n_regions} regions failed");
    }
    Ok(())
}

fn fit_region(
    name: &str,
    series: &ObservedSeries,
    delays: &DelayCache,
    cfg: &RunConfig,
    out_dir: &Path,
) -> Result<SummaryTable> {
    let gm = GenerativeModel::new(name, series, cfg.model.clone())?;
    let trace = gm.sample(delays, &cfg.sampler)?;

    let dir = out_dir.join(name);
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    trace.write_json(BufWriter::new(File::create(dir.join("trace.json"))?))?;

    let verified = cfg.gate.check(&trace)?;
    let table = SummaryTable::from_trace(&verified)?;
    table.write_csv(BufWriter::new(File::create(dir.join("summary.csv"))?))?;
    tracing::info!(region = name, rows = table.len(), "wrote summary");
    Ok(table)
}

fn cmd_kernels(cfg: &RunConfig, output: Option<&Path>) -> Result<()> {
    let generation = GenerationInterval::standard()?;
    let delays = DelayCache::new(cfg.delay.clone());
    let value = serde_json::json!({
        "generation_interval": generation.probabilities(),
        "p_delay": delays.get()?.probabilities(),
    });
    let text = serde_json::to_string_pretty(&value)?;
    match output {
        Some(path) => std::fs::write(path, text)?,
        None => println!("{text}"),
    }
    Ok(())
}
