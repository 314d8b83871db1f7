//! No-U-Turn Sampler (NUTS).
//!
//! Implements the multinomial NUTS variant with tree doubling and the
//! no-U-turn criterion: every state on the trajectory is weighted by
//! `exp(-(H - H0))`, subtrees are merged by progressive sampling (uniform
//! inside a subtree, biased towards the new half at the top level).

use crate::adapt::{find_reasonable_step_size, WindowedAdaptation};
use crate::chain::Chain;
use crate::hmc::{HmcState, LeapfrogIntegrator, Metric};
use crate::posterior::Posterior;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rt_core::{Error, LogDensityModel, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a chain is initialised and which metric warmup adapts.
///
/// Names follow the PyMC `init=` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InitStrategy {
    /// Start at the model's initial point; adapt a diagonal metric.
    #[serde(rename = "adapt_diag")]
    AdaptDiag,
    /// Jitter the initial point by `U(-1, 1)` in unconstrained space; diagonal metric.
    #[default]
    #[serde(rename = "jitter+adapt_diag")]
    JitterAdaptDiag,
    /// Start at the model's initial point; adapt a dense metric.
    #[serde(rename = "adapt_full")]
    AdaptFull,
    /// Jittered start; dense metric.
    #[serde(rename = "jitter+adapt_full")]
    JitterAdaptFull,
}

impl InitStrategy {
    /// All strategies, in declaration order.
    pub const ALL: [InitStrategy; 4] =
        [Self::AdaptDiag, Self::JitterAdaptDiag, Self::AdaptFull, Self::JitterAdaptFull];

    /// Whether the starting point is jittered.
    pub fn jitter(self) -> bool {
        matches!(self, Self::JitterAdaptDiag | Self::JitterAdaptFull)
    }

    /// Whether warmup adapts a dense metric.
    pub fn dense(self) -> bool {
        matches!(self, Self::AdaptFull | Self::JitterAdaptFull)
    }

    /// PyMC-style name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AdaptDiag => "adapt_diag",
            Self::JitterAdaptDiag => "jitter+adapt_diag",
            Self::AdaptFull => "adapt_full",
            Self::JitterAdaptFull => "jitter+adapt_full",
        }
    }
}

impl fmt::Display for InitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s).ok_or_else(|| {
            Error::Validation(format!(
                "unknown init strategy '{s}' (expected one of: adapt_diag, jitter+adapt_diag, adapt_full, jitter+adapt_full)"
            ))
        })
    }
}

/// NUTS sampler configuration.
#[derive(Debug, Clone)]
pub struct NutsConfig {
    /// Maximum tree depth (default 10).
    pub max_treedepth: usize,
    /// Target acceptance probability (default 0.8).
    pub target_accept: f64,
    /// Initialisation and metric strategy.
    pub init: InitStrategy,
    /// Jittered starts drawn before giving up on a non-finite log density.
    pub max_init_attempts: usize,
}

impl Default for NutsConfig {
    fn default() -> Self {
        Self {
            max_treedepth: 10,
            target_accept: 0.8,
            init: InitStrategy::default(),
            max_init_attempts: 10,
        }
    }
}

impl NutsConfig {
    fn validate(&self) -> Result<()> {
        if self.max_treedepth == 0 {
            return Err(Error::Validation("max_treedepth must be >= 1".to_string()));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(Error::Validation(format!(
                "target_accept must be in (0, 1), got {}",
                self.target_accept
            )));
        }
        Ok(())
    }
}

/// Result of one NUTS transition.
pub(crate) struct NutsTransition {
    pub state: HmcState,
    pub depth: usize,
    pub divergent: bool,
    pub accept_prob: f64,
    pub energy: f64,
    pub n_leapfrog: usize,
}

/// Internal tree node for NUTS tree-building.
struct NutsTree {
    left: HmcState,
    right: HmcState,
    proposal: HmcState,
    log_sum_weight: f64,
    n_leapfrog: usize,
    divergent: bool,
    turning: bool,
    sum_accept_prob: f64,
}

/// Energy error beyond which a trajectory is declared divergent.
const DIVERGENCE_THRESHOLD: f64 = 1000.0;

/// No-U-turn criterion between the two edges of a trajectory.
fn is_turning(left: &HmcState, right: &HmcState, metric: &Metric) -> bool {
    let v_left = metric.mul_inv_mass(&left.p);
    let v_right = metric.mul_inv_mass(&right.p);
    let mut dot_left = 0.0;
    let mut dot_right = 0.0;
    for i in 0..left.q.len() {
        let dq = right.q[i] - left.q[i];
        dot_left += dq * v_left[i];
        dot_right += dq * v_right[i];
    }
    dot_left < 0.0 || dot_right < 0.0
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        f64::NEG_INFINITY
    } else {
        max + ((a - max).exp() + (b - max).exp()).ln()
    }
}

/// Build a single-node tree (one leapfrog step).
fn build_leaf<M: LogDensityModel + ?Sized>(
    integrator: &LeapfrogIntegrator<'_, '_, M>,
    state: &HmcState,
    direction: i32,
    h0: f64,
) -> Result<NutsTree> {
    let mut new_state = state.clone();
    integrator.step_dir(&mut new_state, direction)?;

    let energy_error = new_state.hamiltonian(integrator.metric()) - h0;
    let finite = energy_error.is_finite();
    let divergent = !finite || energy_error.abs() > DIVERGENCE_THRESHOLD;
    let log_weight = if finite { -energy_error } else { f64::NEG_INFINITY };
    let accept_prob = if finite { (-energy_error).exp().min(1.0) } else { 0.0 };

    Ok(NutsTree {
        left: new_state.clone(),
        right: new_state.clone(),
        proposal: new_state,
        log_sum_weight: log_weight,
        n_leapfrog: 1,
        divergent,
        turning: false,
        sum_accept_prob: accept_prob,
    })
}

/// Recursively build a balanced binary tree of depth `depth`.
fn build_tree<M: LogDensityModel + ?Sized, R: Rng + ?Sized>(
    integrator: &LeapfrogIntegrator<'_, '_, M>,
    state: &HmcState,
    depth: usize,
    direction: i32,
    h0: f64,
    rng: &mut R,
) -> Result<NutsTree> {
    if depth == 0 {
        return build_leaf(integrator, state, direction, h0);
    }

    let mut inner = build_tree(integrator, state, depth - 1, direction, h0, rng)?;
    if inner.divergent || inner.turning {
        return Ok(inner);
    }

    let edge = if direction > 0 { &inner.right } else { &inner.left };
    let outer = build_tree(integrator, edge, depth - 1, direction, h0, rng)?;

    inner.n_leapfrog += outer.n_leapfrog;
    inner.sum_accept_prob += outer.sum_accept_prob;
    if outer.divergent || outer.turning {
        inner.divergent |= outer.divergent;
        inner.turning |= outer.turning;
        return Ok(inner);
    }

    // Uniform progressive sampling inside a subtree.
    let new_log_sum_weight = log_sum_exp(inner.log_sum_weight, outer.log_sum_weight);
    let accept_outer = (outer.log_sum_weight - new_log_sum_weight).exp();
    if rng.random::<f64>() < accept_outer {
        inner.proposal = outer.proposal;
    }
    inner.log_sum_weight = new_log_sum_weight;

    if direction > 0 {
        inner.right = outer.right;
    } else {
        inner.left = outer.left;
    }
    inner.turning = is_turning(&inner.left, &inner.right, integrator.metric());
    Ok(inner)
}

/// Run one NUTS transition from the given state.
pub(crate) fn nuts_transition<M: LogDensityModel + ?Sized, R: Rng + ?Sized>(
    integrator: &LeapfrogIntegrator<'_, '_, M>,
    current: &HmcState,
    max_treedepth: usize,
    rng: &mut R,
) -> Result<NutsTransition> {
    let mut start = current.clone();
    start.p = integrator.metric().sample_momentum(rng);
    let h0 = start.hamiltonian(integrator.metric());

    let mut tree = NutsTree {
        left: start.clone(),
        right: start.clone(),
        proposal: start,
        log_sum_weight: 0.0,
        n_leapfrog: 0,
        divergent: false,
        turning: false,
        sum_accept_prob: 0.0,
    };

    // Reported depth counts doublings (Stan convention): 1 = two states.
    let mut depth: usize = 0;
    while depth < max_treedepth {
        let direction: i32 = if rng.random::<bool>() { 1 } else { -1 };
        let edge = if direction > 0 { &tree.right } else { &tree.left };
        let subtree = build_tree(integrator, edge, depth, direction, h0, rng)?;
        depth += 1;

        tree.n_leapfrog += subtree.n_leapfrog;
        tree.sum_accept_prob += subtree.sum_accept_prob;
        if subtree.divergent || subtree.turning {
            tree.divergent = subtree.divergent;
            break;
        }

        // Biased progressive sampling towards the new subtree.
        let accept_subtree = (subtree.log_sum_weight - tree.log_sum_weight).exp().min(1.0);
        if rng.random::<f64>() < accept_subtree {
            tree.proposal = subtree.proposal;
        }
        tree.log_sum_weight = log_sum_exp(tree.log_sum_weight, subtree.log_sum_weight);

        if direction > 0 {
            tree.right = subtree.right;
        } else {
            tree.left = subtree.left;
        }
        if is_turning(&tree.left, &tree.right, integrator.metric()) {
            break;
        }
    }

    let accept_prob = tree.sum_accept_prob / tree.n_leapfrog.max(1) as f64;
    Ok(NutsTransition {
        state: tree.proposal,
        depth,
        divergent: tree.divergent,
        accept_prob,
        energy: h0,
        n_leapfrog: tree.n_leapfrog,
    })
}

/// Pick a finite starting point in unconstrained space.
fn initial_state<M: LogDensityModel + ?Sized>(
    posterior: &Posterior<'_, M>,
    config: &NutsConfig,
    rng: &mut StdRng,
) -> Result<Vec<f64>> {
    let theta0 = posterior.model().parameter_init();
    if theta0.len() != posterior.dim() {
        return Err(Error::Validation(format!(
            "parameter_init has length {}, expected {}",
            theta0.len(),
            posterior.dim()
        )));
    }
    let z0 = posterior.to_unconstrained(&theta0);

    let attempts = if config.init.jitter() { config.max_init_attempts.max(1) } else { 1 };
    for _ in 0..attempts {
        let z: Vec<f64> = if config.init.jitter() {
            z0.iter().map(|&zi| zi + rng.random_range(-1.0..1.0)).collect()
        } else {
            z0.clone()
        };
        let (lp, grad) = posterior.logpdf_grad_unconstrained(&z)?;
        if lp.is_finite() && grad.iter().all(|g| g.is_finite()) {
            return Ok(z);
        }
    }

    Err(Error::Computation(format!(
        "chain initialisation failed: log density is not finite at the starting point ({} attempt(s), init={})",
        attempts, config.init
    )))
}

/// Run NUTS sampling on any [`LogDensityModel`].
///
/// Returns raw chain data: constrained draws plus per-draw sampler
/// statistics (divergences, tree depths, acceptance probabilities, energies).
pub fn sample_nuts<M: LogDensityModel + ?Sized>(
    model: &M,
    n_warmup: usize,
    n_samples: usize,
    seed: u64,
    config: &NutsConfig,
) -> Result<Chain> {
    config.validate()?;
    let posterior = Posterior::new(model)?;
    let dim = posterior.dim();
    let mut rng = StdRng::seed_from_u64(seed);

    let z_init = initial_state(&posterior, config, &mut rng)?;
    let init_eps = find_reasonable_step_size(&posterior, &z_init, &Metric::identity(dim));

    let mut adaptation =
        WindowedAdaptation::new(dim, n_warmup, config.target_accept, init_eps, config.init.dense());
    let mut state = LeapfrogIntegrator::new(&posterior, init_eps, Metric::identity(dim)).init_state(z_init)?;

    for i in 0..n_warmup {
        let integrator =
            LeapfrogIntegrator::new(&posterior, adaptation.step_size(), adaptation.metric().clone());
        let transition = nuts_transition(&integrator, &state, config.max_treedepth, &mut rng)?;
        state = transition.state;
        adaptation.update(i, &state.q, transition.accept_prob);
    }

    let step_size = adaptation.adapted_step_size();
    let integrator = LeapfrogIntegrator::new(&posterior, step_size, adaptation.metric().clone());
    tracing::debug!(
        seed,
        step_size,
        dense = integrator.metric().is_dense(),
        "warmup finished"
    );

    let mut chain = Chain::with_capacity(n_samples, config.max_treedepth, step_size);
    for _ in 0..n_samples {
        let transition = nuts_transition(&integrator, &state, config.max_treedepth, &mut rng)?;
        state = transition.state;

        chain.draws_constrained.push(posterior.to_constrained(&state.q));
        chain.divergences.push(transition.divergent);
        chain.tree_depths.push(transition.depth);
        chain.accept_probs.push(transition.accept_prob);
        chain.energies.push(transition.energy);
        chain.n_leapfrog.push(transition.n_leapfrog);
    }

    Ok(chain)
}
