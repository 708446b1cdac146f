//! Shared error and result types for minter.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, MinterError>;

/// Errors raised by the DOI lifecycle engine
#[derive(Debug, Error)]
pub enum MinterError {
    /// Malformed DOI string (bad prefix, empty suffix)
    #[error("Invalid DOI: {0}")]
    InvalidDoi(String),

    /// Metadata XML rejected before any network call
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// DOI already exists in an incompatible state
    #[error("DOI conflict: {0}")]
    Exists(String),

    /// No record for the requested DOI
    #[error("DOI not found: {0}")]
    NotFound(String),

    /// Failure talking to the registration authority
    #[error("Registration failed: {message}")]
    Registration { message: String, retryable: bool },

    /// Suffix collision retries exhausted
    #[error("DOI generation exhausted after {0} attempts")]
    GenerationExhausted(u32),

    #[error("Database error: {0}")]
    Database(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MinterError {
    /// Build a registration-authority error, flagging whether a retry may help
    pub fn registration(message: impl Into<String>, retryable: bool) -> Self {
        MinterError::Registration {
            message: message.into(),
            retryable,
        }
    }

    /// Whether the asynchronous reconciliation path should retry this error.
    ///
    /// `NotFound` is retryable here: a status-change message can arrive
    /// before the local create lands. The synchronous orchestrator path
    /// never auto-retries regardless of this flag.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MinterError::NotFound(_)
                | MinterError::Database(_)
                | MinterError::Nats(_)
                | MinterError::Registration {
                    retryable: true,
                    ..
                }
        )
    }
}

impl From<rusqlite::Error> for MinterError {
    fn from(e: rusqlite::Error) -> Self {
        MinterError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MinterError::NotFound("10.5072/x".into()).is_retryable());
        assert!(MinterError::Database("locked".into()).is_retryable());
        assert!(MinterError::registration("503", true).is_retryable());
        assert!(!MinterError::registration("401", false).is_retryable());
        assert!(!MinterError::InvalidMetadata("bad".into()).is_retryable());
        assert!(!MinterError::Exists("taken".into()).is_retryable());
    }
}
