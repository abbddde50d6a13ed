//! Service-specific error types

use thiserror::Error;

/// Errors from a single CLI invocation.
///
/// Startup failures (config, store, transport) go through `anyhow` in
/// `main`; these are the ones whose message is shown to the user as-is.
#[derive(Error, Debug)]
pub enum Error {
    #[error("usage: {0}")]
    Usage(String),

    #[error("SESSION_PASSWORD must be set to log in")]
    MissingPassword,

    #[error(transparent)]
    Session(#[from] session_client::Error),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Message printed for the user.
    pub fn notice(&self) -> String {
        match self {
            Error::Session(e) => e.notice(),
            other => other.to_string(),
        }
    }

    /// Process exit code: 2 for invocation mistakes, 1 for failed requests.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Usage(_) | Error::MissingPassword => 2,
            Error::Session(_) => 1,
        }
    }
}
