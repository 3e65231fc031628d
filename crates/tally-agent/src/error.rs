//! Error types for tally-agent

use thiserror::Error;

/// Result type alias using tally-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during agent operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the completion client
    #[error(transparent)]
    Ai(#[from] tally_ai::Error),

    /// Missing or unusable settings; raised before any iteration runs
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The session was aborted through its handle
    #[error("Cancelled")]
    Cancelled,

    /// Compression could not produce any summary
    #[error("Compression error: {0}")]
    Compression(String),

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error was caused by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Ai(tally_ai::Error::Aborted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::Ai(tally_ai::Error::Aborted).is_cancelled());
        assert!(!Error::Other("boom".into()).is_cancelled());
    }

    #[test]
    fn test_ai_error_is_transparent() {
        let err = Error::from(tally_ai::Error::InvalidApiKey);
        assert_eq!(err.to_string(), "Invalid or missing API key");
    }
}
