//! # rt-epi
//!
//! Bayesian estimation of the time-varying reproduction number (Rt) from
//! daily positive and test counts.
//!
//! The pipeline for one region:
//! 1. [`ObservedSeries`] is validated and padded with leading buffer days.
//! 2. [`GenerativeModel::build`] composes the generation-interval kernel, the
//!    renewal recurrence ([`renewal`]), the reporting-delay convolution and
//!    the negative-binomial likelihood ([`observation`]) into a
//!    [`CompiledModel`] whose log density and gradient come from an AD tape.
//! 3. [`GenerativeModel::sample`] runs multi-chain NUTS and returns an
//!    immutable [`Trace`].
//! 4. [`DiagnosticsGate::check`] turns a trace into a [`VerifiedTrace`] only
//!    when it has no divergences and every r-hat is within the limit.
//! 5. [`SummaryTable::from_trace`] reduces a verified trace to the per-date
//!    table published downstream.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod driver;
pub mod gate;
pub mod kernel;
pub mod model;
pub mod observation;
pub mod renewal;
pub mod series;
pub mod summary;
pub mod trace;

pub use driver::SamplerConfig;
pub use gate::{DiagnosticReport, DiagnosticsGate, VerifiedTrace};
pub use kernel::{DelayCache, DelayConfig, DelayDistribution, GenerationInterval};
pub use model::{
    CompiledModel, Coords, DerivedQuantities, GenerativeModel, ModelConfig, PREDICTIVE_VARIABLE, VARIABLES,
};
pub use series::ObservedSeries;
pub use summary::{gather_summaries, SummaryRow, SummaryTable};
pub use trace::Trace;
