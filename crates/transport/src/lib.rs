//! Transport boundary for the session client
//!
//! Defines the `Transport` trait that decouples the request pipeline from the
//! HTTP stack. A transport performs exactly one exchange per call and reports
//! the result as an `Outcome` whose category drives the pipeline:
//! - `Success` passes through (after envelope inspection)
//! - `AuthFailure` (HTTP 401) hands the request to renewal
//! - `OtherFailure` (403/404/5xx/...) is surfaced, never retried
//! - `TimedOut` / `Unreachable` mean no response was received
//!
//! `HttpTransport` is the reqwest-backed implementation. Tests substitute
//! scripted transports behind the same trait.

pub mod envelope;
pub mod error;
pub mod http;
pub mod request;
pub mod response;

pub use envelope::{Envelope, SUCCESS_CODE};
pub use error::{Error, Result};
pub use http::HttpTransport;
pub use request::RequestDescriptor;
pub use response::Response;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// HTTP status that marks a missing, expired or invalid access credential.
pub const AUTH_FAILURE_STATUS: u16 = 401;

/// Coarse classification of one exchange, as seen by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    Success,
    AuthFailure,
    OtherFailure,
    NetworkUnreachable,
}

impl StatusCategory {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            StatusCategory::Success => "success",
            StatusCategory::AuthFailure => "auth_failure",
            StatusCategory::OtherFailure => "other_failure",
            StatusCategory::NetworkUnreachable => "network_unreachable",
        }
    }
}

/// Result of a single transport exchange.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// 2xx response
    Success(Response),
    /// 401 response
    AuthFailure(Response),
    /// Any other non-2xx response
    OtherFailure(Response),
    /// The per-call timeout elapsed before a response arrived
    TimedOut,
    /// Connection refused, DNS failure, broken body, ...
    Unreachable(String),
}

impl Outcome {
    /// Classify a received response by its HTTP status.
    pub fn from_response(response: Response) -> Self {
        match response.status {
            AUTH_FAILURE_STATUS => Outcome::AuthFailure(response),
            200..=299 => Outcome::Success(response),
            _ => Outcome::OtherFailure(response),
        }
    }

    pub fn category(&self) -> StatusCategory {
        match self {
            Outcome::Success(_) => StatusCategory::Success,
            Outcome::AuthFailure(_) => StatusCategory::AuthFailure,
            Outcome::OtherFailure(_) => StatusCategory::OtherFailure,
            Outcome::TimedOut | Outcome::Unreachable(_) => StatusCategory::NetworkUnreachable,
        }
    }
}

/// One HTTP exchange per call.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Transport>`). Implementations must not retry: every retry
/// decision belongs to the pipeline.
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "http", "scripted")
    fn id(&self) -> &str;

    /// Send `request` and classify the result. `timeout` bounds the whole
    /// exchange, including reading the body.
    fn send<'a>(
        &'a self,
        request: &'a RequestDescriptor,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>>;
}
