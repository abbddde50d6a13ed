//! Request descriptors
//!
//! A `RequestDescriptor` is plain data: method, path relative to the
//! backend base URL, headers and an optional JSON body. The pipeline keeps the
//! caller's descriptor untouched and derives a credentialed copy for every
//! attempt, so a replay re-sends exactly what the caller asked for.

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path relative to the transport's base URL, e.g. `/user/page`
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body.
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add or replace a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Copy of this request carrying `Authorization: Bearer <token>`.
    ///
    /// With `None` (or an empty token) any caller-supplied Authorization
    /// header is removed and the request goes out unauthenticated. The
    /// pipeline owns this header; callers cannot pin a credential.
    pub fn authorized(&self, token: Option<&str>) -> Result<Self> {
        let mut prepared = self.clone();
        prepared.headers.remove(AUTHORIZATION);
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::InvalidHeader(format!("bearer token: {e}")))?;
            value.set_sensitive(true);
            prepared.headers.insert(AUTHORIZATION, value);
        }
        Ok(prepared)
    }

    /// The bearer token this request carries, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}
