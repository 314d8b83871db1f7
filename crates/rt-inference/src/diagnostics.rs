//! MCMC diagnostics: split R-hat, bulk ESS, tail ESS, E-BFMI.
//!
//! This module implements:
//! - Split R-hat (Gelman et al.)
//! - Rank-normalized + folded split R-hat (Vehtari et al. 2021), the default
//!   convergence statistic used by the diagnostics gate
//! - Bulk ESS and tail ESS (Geyer initial monotone sequence on the variogram)

use crate::chain::SamplerResult;
use statrs::function::erf::erfc_inv;
use std::cmp::Ordering;

/// Diagnostics for a multi-chain NUTS run.
#[derive(Debug, Clone)]
pub struct DiagnosticsResult {
    /// Rank-normalized folded split R-hat per parameter.
    pub r_hat: Vec<f64>,
    /// Bulk ESS per parameter.
    pub ess_bulk: Vec<f64>,
    /// Tail ESS per parameter.
    pub ess_tail: Vec<f64>,
    /// Fraction of divergent transitions.
    pub divergence_rate: f64,
    /// Fraction of transitions hitting max treedepth.
    pub max_treedepth_rate: f64,
    /// E-BFMI per chain (energy Bayesian fraction of missing information).
    pub ebfmi: Vec<f64>,
}

/// Split every chain in half and truncate to a common length.
///
/// Returns `None` when any chain is shorter than `min_half * 2`.
fn split_halves<'a, C: AsRef<[f64]>>(chains: &'a [C], min_half: usize) -> Option<Vec<&'a [f64]>> {
    if chains.is_empty() {
        return None;
    }
    let mut halves = Vec::with_capacity(chains.len() * 2);
    for c in chains {
        let c = c.as_ref();
        let mid = c.len() / 2;
        halves.push(&c[..mid]);
        halves.push(&c[mid..]);
    }
    let min_len = halves.iter().map(|h| h.len()).min().unwrap_or(0);
    if min_len < min_half {
        return None;
    }
    Some(halves.into_iter().map(|h| &h[..min_len]).collect())
}

fn mean_and_var(chain: &[f64]) -> (f64, f64) {
    let n = chain.len() as f64;
    let mean = chain.iter().sum::<f64>() / n;
    let var = chain.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n.max(2.0) - 1.0);
    (mean, var)
}

/// `(W, var_hat_plus)` over equal-length sequences.
fn within_and_pooled(seqs: &[&[f64]]) -> (f64, f64) {
    let m = seqs.len() as f64;
    let n = seqs[0].len() as f64;
    let stats: Vec<(f64, f64)> = seqs.iter().map(|c| mean_and_var(c)).collect();
    let grand = stats.iter().map(|s| s.0).sum::<f64>() / m;
    let b = if m > 1.0 {
        stats.iter().map(|s| (s.0 - grand).powi(2)).sum::<f64>() * n / (m - 1.0)
    } else {
        0.0
    };
    let w = stats.iter().map(|s| s.1).sum::<f64>() / m;
    (w, (n - 1.0) / n * w + b / n)
}

/// Compute split R-hat for one parameter across multiple chains.
///
/// Each chain is split in half, giving 2*M half-chains.
/// `R-hat = sqrt(var_hat_plus / W)` where `var_hat_plus = (N-1)/N * W + B/N`.
/// Returns NaN for chains shorter than 4 draws or zero within-chain variance.
pub fn r_hat<C: AsRef<[f64]>>(chains: &[C]) -> f64 {
    let Some(halves) = split_halves(chains, 2) else {
        return f64::NAN;
    };
    let (w, var_hat_plus) = within_and_pooled(&halves);
    if w < 1e-30 {
        return f64::NAN;
    }
    (var_hat_plus / w).sqrt()
}

/// Standard normal quantile.
fn normal_quantile(p: f64) -> f64 {
    -std::f64::consts::SQRT_2 * erfc_inv(2.0 * p)
}

fn sort_f64(v: &mut [f64]) {
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Greater));
}

/// Replace draws by normal scores of their pooled (average, 1-based) ranks.
fn rank_normalize(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut flat: Vec<(f64, usize, usize)> = chains
        .iter()
        .enumerate()
        .flat_map(|(ci, c)| c.iter().enumerate().map(move |(ti, &x)| (x, ci, ti)))
        .collect();
    flat.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Greater));

    let mut out: Vec<Vec<f64>> = chains.iter().map(|c| vec![0.0; c.len()]).collect();
    let n = flat.len();
    let mut i = 0usize;
    while i < n {
        let mut j = i + 1;
        while j < n && flat[j].0 == flat[i].0 {
            j += 1;
        }
        // Ties share the average rank; (rank - 3/8) / (n + 1/4) is the Blom offset.
        let rank = 0.5 * ((i + 1) as f64 + j as f64);
        let p = ((rank - 0.375) / (n as f64 + 0.25)).clamp(1e-12, 1.0 - 1e-12);
        let z = normal_quantile(p);
        for &(_, ci, ti) in &flat[i..j] {
            out[ci][ti] = z;
        }
        i = j;
    }
    out
}

fn median_all(chains: &[Vec<f64>]) -> f64 {
    let mut all: Vec<f64> = chains.iter().flatten().copied().collect();
    if all.is_empty() {
        return f64::NAN;
    }
    sort_f64(&mut all);
    let n = all.len();
    if n % 2 == 1 {
        all[n / 2]
    } else {
        0.5 * (all[n / 2 - 1] + all[n / 2])
    }
}

/// Rank-normalized, folded split R-hat (Vehtari et al. 2021).
///
/// The maximum of the rank-normalized split R-hat of the draws and of the
/// draws folded around their median. NaN when any chain has fewer than 4
/// draws or when every draw is identical.
pub fn r_hat_rank_normalized_folded(chains: &[Vec<f64>]) -> f64 {
    if chains.is_empty() || chains.iter().any(|c| c.len() < 4) {
        return f64::NAN;
    }

    let r_rank = r_hat(&rank_normalize(chains));

    let med = median_all(chains);
    let folded: Vec<Vec<f64>> =
        chains.iter().map(|c| c.iter().map(|&x| (x - med).abs()).collect()).collect();
    let r_fold = r_hat(&rank_normalize(&folded));

    if r_rank.is_nan() {
        r_fold
    } else if r_fold.is_nan() {
        r_rank
    } else {
        r_rank.max(r_fold)
    }
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() as f64 - 1.0);
    let i0 = pos.floor() as usize;
    let i1 = pos.ceil() as usize;
    let f = pos - i0 as f64;
    sorted[i0] * (1.0 - f) + sorted[i1] * f
}

/// Compute effective sample size (ESS) using a multi-chain initial monotone
/// sequence estimator (Geyer) on variogram autocorrelations.
pub fn ess_bulk<C: AsRef<[f64]>>(chains: &[C]) -> f64 {
    let Some(split) = split_halves(chains, 4) else {
        return 0.0;
    };
    let n = split[0].len();
    let total_draws = (split.len() * n) as f64;

    let (_w, var_hat_plus) = within_and_pooled(&split);
    if !var_hat_plus.is_finite() || var_hat_plus < 1e-30 {
        return total_draws;
    }

    // rho_t = 1 - V_t / (2 * var_hat_plus), V_t the mean squared lag-t difference.
    let mut rho: Vec<f64> = Vec::new();
    for lag in 1..n {
        let mut sum = 0.0;
        let mut count = 0usize;
        for c in &split {
            for i in 0..(n - lag) {
                let d = c[i] - c[i + lag];
                sum += d * d;
                count += 1;
            }
        }
        rho.push((1.0 - (sum / count as f64) / (2.0 * var_hat_plus)).clamp(-1.0, 1.0));
        let k = rho.len();
        if k % 2 == 0 && rho[k - 2] + rho[k - 1] < 0.0 {
            break;
        }
    }

    let mut tau = 1.0;
    let mut prev = f64::INFINITY;
    for pair in rho.chunks_exact(2) {
        let g = pair[0] + pair[1];
        if g < 0.0 {
            break;
        }
        let g = g.min(prev);
        tau += 2.0 * g;
        prev = g;
    }
    if !tau.is_finite() || tau <= 0.0 {
        return total_draws;
    }
    (total_draws / tau).clamp(1.0, total_draws)
}

/// Tail ESS: `min(ESS(I[x <= q05]), ESS(I[x >= q95]))`.
pub fn ess_tail<C: AsRef<[f64]>>(chains: &[C]) -> f64 {
    let mut all: Vec<f64> = chains.iter().flat_map(|c| c.as_ref().iter().copied()).collect();
    if all.is_empty() {
        return 0.0;
    }
    sort_f64(&mut all);
    let q05 = quantile_sorted(&all, 0.05);
    let q95 = quantile_sorted(&all, 0.95);

    let indicator = |pred: &dyn Fn(f64) -> bool| -> Vec<Vec<f64>> {
        chains
            .iter()
            .map(|c| c.as_ref().iter().map(|&x| if pred(x) { 1.0 } else { 0.0 }).collect())
            .collect()
    };
    let lower = indicator(&|x| x <= q05);
    let upper = indicator(&|x| x >= q95);
    ess_bulk(&lower).min(ess_bulk(&upper))
}

/// Compute E-BFMI (energy Bayesian fraction of missing information) for one chain.
///
/// Definition (Stan): `mean((E_t - E_{t-1})^2) / var(E_t)`.
pub fn ebfmi(energies: &[f64]) -> f64 {
    let n = energies.len();
    if n < 4 {
        return f64::NAN;
    }
    let (_, var) = mean_and_var(energies);
    if var < 1e-30 {
        return f64::NAN;
    }
    let msd = energies.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    msd / var
}

/// Compute full diagnostics for a [`SamplerResult`].
pub fn compute_diagnostics(result: &SamplerResult) -> DiagnosticsResult {
    let n_params = result.param_names.len();
    let mut r_hat_vals = Vec::with_capacity(n_params);
    let mut ess_bulk_vals = Vec::with_capacity(n_params);
    let mut ess_tail_vals = Vec::with_capacity(n_params);

    for p in 0..n_params {
        let draws = result.param_draws(p);
        r_hat_vals.push(r_hat_rank_normalized_folded(&draws));
        ess_bulk_vals.push(ess_bulk(&rank_normalize(&draws)));
        ess_tail_vals.push(ess_tail(&draws));
    }

    let total: usize = result.chains.iter().map(|c| c.divergences.len()).sum();
    let rate = |count: usize| if total > 0 { count as f64 / total as f64 } else { 0.0 };
    let n_max_depth: usize = result
        .chains
        .iter()
        .map(|c| c.tree_depths.iter().filter(|&&d| d >= c.max_treedepth).count())
        .sum();

    DiagnosticsResult {
        r_hat: r_hat_vals,
        ess_bulk: ess_bulk_vals,
        ess_tail: ess_tail_vals,
        divergence_rate: rate(result.n_divergent()),
        max_treedepth_rate: rate(n_max_depth),
        ebfmi: result.chains.iter().map(|c| ebfmi(&c.energies)).collect(),
    }
}
