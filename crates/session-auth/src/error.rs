//! Error types for credential operations

/// Errors from credential storage and grant parsing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("invalid grant: {0}")]
    InvalidGrant(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
