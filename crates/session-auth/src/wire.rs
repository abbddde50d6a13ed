//! Wire types for the login and renewal endpoints
//!
//! Both endpoints answer with the standard envelope; these types describe its
//! `data` payload. The renewal body carries the refresh token only in
//! explicit mode. In cookie mode the exchange has no body and the backend
//! reads the `refresh_token` cookie instead.

use common::Secret;
use serde::Deserialize;

use crate::credentials::{AccessToken, RefreshToken};
use crate::error::{Error, Result};

/// New credentials minted by the login or renewal endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    #[serde(alias = "accessToken", alias = "access_token")]
    pub token: String,
    /// Present only when the backend hands out (or rotates) an explicit
    /// refresh token. Cookie-mode backends rotate the cookie instead.
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
}

impl TokenGrant {
    /// Convert into store types. An empty access token is not a grant.
    pub fn into_credentials(self) -> Result<(AccessToken, Option<RefreshToken>)> {
        if self.token.trim().is_empty() {
            return Err(Error::InvalidGrant("grant carries an empty access token".into()));
        }
        let refresh = self
            .refresh_token
            .filter(|t| !t.trim().is_empty())
            .map(RefreshToken::new);
        Ok((AccessToken::new(self.token), refresh))
    }

    /// Parse the envelope `data` payload of a renewal or login response.
    pub fn from_data(data: &serde_json::Value) -> Result<Self> {
        Self::deserialize(data)
            .map_err(|e| Error::InvalidGrant(format!("unexpected grant payload: {e}")))
    }
}

/// Login response payload: a grant plus the user profile.
#[derive(Debug, Deserialize)]
pub struct LoginGrant {
    #[serde(flatten)]
    pub grant: TokenGrant,
    #[serde(default)]
    pub user: serde_json::Value,
}

impl LoginGrant {
    pub fn from_data(data: &serde_json::Value) -> Result<Self> {
        Self::deserialize(data)
            .map_err(|e| Error::InvalidGrant(format!("unexpected login payload: {e}")))
    }
}

/// Body of the renewal exchange.
///
/// `Some` refresh token: explicit mode, `{"refreshToken": "..."}`.
/// `None`: cookie mode, no body at all.
pub fn renewal_body(refresh: Option<&RefreshToken>) -> Option<serde_json::Value> {
    refresh.map(|t| serde_json::json!({ "refreshToken": t.expose() }))
}

/// Body of the login request.
pub fn login_body(username: &str, password: &Secret<String>) -> serde_json::Value {
    serde_json::json!({
        "username": username,
        "password": password.expose(),
    })
}
