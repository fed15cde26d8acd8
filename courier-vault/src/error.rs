//! Error types for vault operations and request outcomes.

use thiserror::Error;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault-specific errors.
///
/// These describe failures of the vault machinery itself (storage,
/// configuration, encoding). Failures of the requests it delivers are
/// [`RequestError`]s.
#[derive(Debug, Error)]
pub enum VaultError {
    /// I/O error while touching durable storage
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Job store error
    #[error("Job store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The parallelism bound was closed
    #[error("Vault is closed")]
    Closed,

    /// Generic error
    #[error("Vault error: {0}")]
    Other(String),
}

/// Classified failure of a delivered request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Connectivity or I/O failure: the backend was never reached.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend asked this client to back off.
    #[error("Client disabled: {0}")]
    ClientDisabled(String),

    /// Synthesized locally when consent is missing at dispatch time.
    #[error("Missing user consent")]
    ConsentWithheld,

    /// The backend permanently rejected the request.
    #[error("Rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Any other failure.
    #[error("Request failed: {0}")]
    Other(String),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
