//! Convergence gate between sampling and summarisation.
//!
//! A fit is usable only if no transition diverged and the rank-normalised
//! split r-hat of every monitored quantity, at every index, is within the
//! limit. Undefined r-hat values (constant draws, very short chains) count
//! as 1.0.

use crate::trace::Trace;
use rt_core::{Error, Result};
use rt_inference::r_hat_rank_normalized_folded;
use serde::{Deserialize, Serialize};

/// Divergence and r-hat thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsGate {
    /// Largest tolerated number of divergent transitions.
    pub max_divergences: usize,
    /// Largest tolerated r-hat.
    pub r_hat_limit: f64,
}

impl Default for DiagnosticsGate {
    fn default() -> Self {
        Self { max_divergences: 0, r_hat_limit: 1.1 }
    }
}

/// Divergences and r-hat per monitored variable and index.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticReport {
    /// Total divergent transitions.
    pub n_divergences: usize,
    /// `(variable, r-hat by index)`, in registry order.
    pub r_hat: Vec<(String, Vec<f64>)>,
}

impl DiagnosticReport {
    /// Compute the report for a trace.
    pub fn from_trace(trace: &Trace) -> Self {
        let r_hat = trace
            .posterior()
            .iter()
            .map(|var| {
                let values = (0..var.width())
                    .map(|i| {
                        let r = r_hat_rank_normalized_folded(&var.chains_at(i));
                        if r.is_nan() {
                            1.0
                        } else {
                            r
                        }
                    })
                    .collect();
                (var.name.clone(), values)
            })
            .collect();
        Self { n_divergences: trace.n_divergences(), r_hat }
    }

    /// Largest r-hat and where it occurred.
    pub fn worst_r_hat(&self) -> Option<(&str, usize, f64)> {
        self.r_hat
            .iter()
            .flat_map(|(name, values)| values.iter().enumerate().map(move |(i, &r)| (name.as_str(), i, r)))
            .max_by(|a, b| a.2.total_cmp(&b.2))
    }
}

/// A trace that passed the gate, with its diagnostics.
#[derive(Debug, Clone)]
pub struct VerifiedTrace<'a> {
    trace: &'a Trace,
    report: DiagnosticReport,
}

impl<'a> VerifiedTrace<'a> {
    /// The underlying trace.
    pub fn trace(&self) -> &'a Trace {
        self.trace
    }

    /// Diagnostics computed by the gate.
    pub fn report(&self) -> &DiagnosticReport {
        &self.report
    }
}

impl DiagnosticsGate {
    /// A gate that passes every trace; for smoke runs with tiny chains.
    pub fn permissive() -> Self {
        Self { max_divergences: usize::MAX, r_hat_limit: f64::INFINITY }
    }

    /// Pass or refuse `trace`. Refusals are [`Error::Convergence`]; the trace
    /// itself stays with the caller for inspection.
    pub fn check<'a>(&self, trace: &'a Trace) -> Result<VerifiedTrace<'a>> {
        let n_div = trace.n_divergences();
        if n_div > self.max_divergences {
            tracing::warn!(region = trace.region(), n_divergences = n_div, "fit rejected: divergences");
            return Err(Error::Convergence(format!(
                "model {} had {n_div} divergences (max {})",
                trace.region(),
                self.max_divergences
            )));
        }

        let report = DiagnosticReport::from_trace(trace);
        if let Some((name, idx, r)) = report.worst_r_hat().filter(|w| w.2 > self.r_hat_limit) {
            tracing::warn!(region = trace.region(), variable = name, index = idx, r_hat = r, "fit rejected: r-hat");
            return Err(Error::Convergence(format!(
                "model {}: r_hat of {name}[{idx}] is {r:.4}, above {}",
                trace.region(),
                self.r_hat_limit
            )));
        }
        Ok(VerifiedTrace { trace, report })
    }
}
