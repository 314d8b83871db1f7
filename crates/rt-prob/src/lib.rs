//! Probability building blocks for the Rt estimation engine.
//!
//! This crate hosts the probability math shared by the model and the sampler:
//! - log-densities of the priors and the observation likelihood, each with a
//!   plain `f64` form and a form recorded on an [`rt_ad::Tape`]
//! - discretisation of continuous delay distributions onto whole days
//! - transforms/bijectors (for constrained parameterizations)

pub mod exponential;
pub mod gamma;
pub mod lognormal;
pub mod neg_binomial;
pub mod normal;
pub mod transforms;
