//! Received HTTP responses

use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use crate::envelope::Envelope;

/// A fully-read HTTP response. The body is buffered so the response can be
/// classified, inspected and handed back to the caller unchanged.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Convenience constructor for a JSON body.
    pub fn json_body(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, HeaderMap::new(), Bytes::from(body.to_string()))
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// The application envelope, if the body is one.
    pub fn envelope(&self) -> Option<Envelope> {
        Envelope::inspect(&self.body)
    }
}
