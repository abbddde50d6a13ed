//! Error types for building transports and requests

/// Errors from constructing a transport or a request descriptor.
///
/// Exchange failures are not errors here: they are reported as `Outcome`
/// variants so the pipeline can classify them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid header value: {0}")]
    InvalidHeader(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

/// Result alias for transport setup.
pub type Result<T> = std::result::Result<T, Error>;
