//! Application-level response envelope
//!
//! The backend wraps every JSON answer as `{"code": 200, "msg": "...", "data": ...}`.
//! `code == 200` means success; anything else is a domain failure even when
//! the HTTP status is 200. Some handlers spell the message field `message`.
//! Bodies that are not JSON objects with an integer `code` are not envelopes
//! and pass through untouched.

use serde::de::DeserializeOwned;

/// Envelope code that marks success.
pub const SUCCESS_CODE: i64 = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub code: i64,
    pub msg: Option<String>,
    pub data: serde_json::Value,
}

impl Envelope {
    /// Parse `body` as an envelope. Returns `None` for anything else.
    pub fn inspect(body: &[u8]) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        let object = value.as_object()?;
        let code = object.get("code")?.as_i64()?;
        let msg = object
            .get("msg")
            .or_else(|| object.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_owned);
        let data = object.get("data").cloned().unwrap_or(serde_json::Value::Null);
        Some(Self { code, msg, data })
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Backend message, or a generic fallback when the backend sent none.
    pub fn message(&self) -> &str {
        self.msg.as_deref().unwrap_or("request failed")
    }

    /// Deserialize the `data` payload.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}
