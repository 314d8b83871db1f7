//! # rt-core
//!
//! Core types, traits, and error handling for the Rt estimation engine.
//!
//! This crate provides:
//! - The error taxonomy shared by every crate ([`Error`], [`Result`])
//! - The [`LogDensityModel`] trait the samplers are written against
//! - The model version tag attached to every posterior

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;

pub use error::{Error, Result};
pub use traits::LogDensityModel;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version tag of the generative model, attached to every trace so that
/// downstream consumers can check compatibility.
pub const MODEL_VERSION: &str = "1.0.0";
