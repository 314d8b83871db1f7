//! # rt-ad
//!
//! Automatic differentiation (AD) primitives for the Rt estimation engine.
//!
//! Provides reverse-mode AD via a computation tape: an arena of typed nodes
//! with explicit parent indices. The renewal recurrence and the delay
//! convolution are recorded as linear-combination nodes, so a full
//! log-posterior gradient costs one forward and one backward sweep.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod tape;

pub use tape::{Tape, Var};
