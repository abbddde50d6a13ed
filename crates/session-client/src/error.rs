//! Errors surfaced to callers of the request pipeline
//!
//! An HTTP 401 is never surfaced directly: it either resolves into success
//! (renewal + replay) or into `RenewalRejected`.

use transport::Response;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// No response received (connection failure or per-call timeout)
    #[error("network error: {0}")]
    Network(String),

    /// Backend envelope reported a domain failure (`code != 200`)
    #[error("application error {code}: {message}")]
    Application { code: i64, message: String },

    /// Non-401 HTTP failure (403, 404, 5xx, ...)
    #[error("request failed with HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Session is gone; the caller must authenticate again
    #[error("session renewal rejected: {0}")]
    RenewalRejected(String),

    /// Response did not have the expected shape
    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Longest response excerpt carried in a `Status` error.
const MAX_MESSAGE_CHARS: usize = 200;

impl Error {
    /// Build a `Status` error from a non-401 failure response, preferring the
    /// envelope message over the raw body.
    pub fn from_status(response: &Response) -> Self {
        let message = match response.envelope() {
            Some(envelope) => envelope.message().to_owned(),
            None => response.text().chars().take(MAX_MESSAGE_CHARS).collect(),
        };
        Error::Status {
            status: response.status,
            message,
        }
    }

    /// Text suitable for showing to the person behind the request.
    pub fn notice(&self) -> String {
        match self {
            Error::Network(_) => "Network error, please check your connection".into(),
            Error::Application { message, .. } => message.clone(),
            Error::Status { status: 403, .. } => {
                "You do not have permission to access this resource".into()
            }
            Error::Status { status: 404, .. } => "The requested resource does not exist".into(),
            Error::Status { status: 500, .. } => "Internal server error".into(),
            Error::Status { status, .. } => format!("Request failed with status {status}"),
            Error::RenewalRejected(_) => "Your session has expired, please sign in again".into(),
            Error::Protocol(_) | Error::Store(_) | Error::InvalidRequest(_) => {
                "Request could not be completed".into()
            }
        }
    }

    /// True when the caller has to send the user back to the login entry point.
    pub fn requires_login(&self) -> bool {
        matches!(self, Error::RenewalRejected(_))
    }

    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Error::Network(_) => "network",
            Error::Application { .. } => "application",
            Error::Status { .. } => "status",
            Error::RenewalRejected(_) => "renewal_rejected",
            Error::Protocol(_) => "protocol",
            Error::Store(_) => "store",
            Error::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<session_auth::Error> for Error {
    fn from(e: session_auth::Error) -> Self {
        match e {
            session_auth::Error::InvalidGrant(msg) => Error::Protocol(msg),
            other => Error::Store(other.to_string()),
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Error::InvalidRequest(e.to_string())
    }
}
