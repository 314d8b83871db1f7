//! Error types for the Rt estimation engine.
//!
//! The variants follow the failure taxonomy of a fit: bad inputs are
//! [`Error::Data`], numerical breakdowns are [`Error::Computation`] and
//! untrustworthy posteriors are [`Error::Convergence`]. None of them are
//! retried by the library.

use thiserror::Error;

/// Engine error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV parsing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid argument or configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing, empty or malformed observed/delay input
    #[error("Data error: {0}")]
    Data(String),

    /// Numerical or model error (degenerate likelihood, chain initialization)
    #[error("Computation error: {0}")]
    Computation(String),

    /// Sampler output failed the convergence gate
    #[error("Convergence error: {0}")]
    Convergence(String),
}

impl Error {
    /// Whether the error was raised after a posterior already existed.
    pub fn is_convergence(&self) -> bool {
        matches!(self, Error::Convergence(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let e = Error::Data("no rows".to_string());
        assert_eq!(e.to_string(), "Data error: no rows");
        let e = Error::Convergence("2 divergences".to_string());
        assert!(e.is_convergence());
        assert!(!Error::Computation("x".into()).is_convergence());
    }

    #[test]
    fn test_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
