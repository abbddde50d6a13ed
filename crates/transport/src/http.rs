//! reqwest-backed transport
//!
//! Joins the descriptor path onto the backend base URL, applies the per-call
//! timeout and buffers the response body. When the cookie channel is enabled
//! the client keeps a cookie jar, so an HTTP-only refresh cookie set by the
//! backend at login rides along on every later exchange, renewal included.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::request::RequestDescriptor;
use crate::response::Response;
use crate::{Outcome, Transport};

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport for `base_url` with its own client.
    ///
    /// `cookies` enables the cookie jar (implicit refresh credential channel).
    pub fn new(base_url: impl Into<String>, cookies: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(cookies)
            .build()
            .map_err(|e| Error::Client(e.to_string()))?;
        Self::with_client(client, base_url)
    }

    /// Build a transport around an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::InvalidBaseUrl(format!(
                "base URL must start with http:// or https://, got: {base_url}"
            )));
        }
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Absolute URL for a descriptor path.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

impl Transport for HttpTransport {
    fn id(&self) -> &str {
        "http"
    }

    fn send<'a>(
        &'a self,
        request: &'a RequestDescriptor,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>> {
        Box::pin(async move {
            let url = self.url_for(&request.path);
            let mut builder = self
                .client
                .request(request.method.clone(), &url)
                .headers(request.headers.clone())
                .timeout(timeout);
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    warn!(url = %url, timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "request timed out");
                    return Outcome::TimedOut;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "request failed without a response");
                    return Outcome::Unreachable(e.to_string());
                }
            };

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            match response.bytes().await {
                Ok(body) => {
                    debug!(url = %url, status, bytes = body.len(), "response received");
                    Outcome::from_response(Response::new(status, headers, body))
                }
                Err(e) if e.is_timeout() => {
                    warn!(url = %url, status, "timed out reading response body");
                    Outcome::TimedOut
                }
                Err(e) => {
                    warn!(url = %url, status, error = %e, "failed to read response body");
                    Outcome::Unreachable(format!("response body read error: {e}"))
                }
            }
        })
    }
}
