//! Error types for the shmloan crate.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type LoanResult<T> = Result<T, LoanError>;

/// Errors surfaced by buffer allocation, hand-off, and release.
#[derive(Debug, Error)]
pub enum LoanError {
    /// A native segment could not be created, opened, or mapped.
    #[error("shared memory allocation failed for segment '{name}': {source}")]
    Allocation {
        /// Name of the segment the native call was attempted on.
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A named segment does not exist. Typically the producer already fully
    /// released it, or the descriptor id is stale.
    #[error("shared memory segment '{name}' does not exist")]
    NotFound { name: String },

    /// An operation violated the ownership state machine.
    #[error("ownership protocol violation: {0}")]
    Protocol(String),
}

impl LoanError {
    pub fn allocation(name: impl Into<String>, source: std::io::Error) -> Self {
        LoanError::Allocation {
            name: name.into(),
            source,
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        LoanError::NotFound { name: name.into() }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        LoanError::Protocol(msg.into())
    }
}
