//! # rt-inference
//!
//! MCMC inference for the Rt estimation engine.
//!
//! This crate provides:
//! - a posterior wrapper mapping any [`rt_core::LogDensityModel`] to
//!   unconstrained space
//! - the No-U-Turn Sampler with Stan-style windowed warmup
//! - a multi-chain runner on a dedicated rayon pool
//! - convergence diagnostics (rank-normalized R-hat, ESS, E-BFMI)

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Adaptation: step-size dual averaging and mass matrix estimation (Welford).
pub mod adapt;
/// Chain storage and multi-chain parallel runner.
pub mod chain;
/// MCMC diagnostics: split R-hat, bulk/tail ESS, E-BFMI.
pub mod diagnostics;
/// HMC leapfrog integrator and Euclidean metrics.
pub mod hmc;
/// NUTS tree-building and sampling.
pub mod nuts;
/// Posterior API: log-pdf, gradient, transforms.
pub mod posterior;

pub use chain::{sample_nuts_multichain, Chain, SamplerResult};
pub use diagnostics::{compute_diagnostics, r_hat_rank_normalized_folded, DiagnosticsResult};
pub use nuts::{sample_nuts, InitStrategy, NutsConfig};
pub use posterior::Posterior;
