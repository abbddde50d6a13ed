//! Session credentials
//!
//! Holds the access/refresh credential pair and the wire types of the
//! endpoints that mint them. This crate has no HTTP dependency: the request
//! pipeline moves these types over a `transport::Transport`.
//!
//! Credential lifecycle:
//! 1. Login returns an access token (and, in explicit mode, a refresh token)
//! 2. Stored via `CredentialStore::write()`
//! 3. Read on every outgoing request and attached as a bearer header
//! 4. Replaced wholesale by the renewal exchange (`TokenGrant`)
//! 5. Cleared by logout or session termination

pub mod constants;
pub mod credentials;
pub mod error;
pub mod wire;

pub use constants::*;
pub use credentials::{
    AccessToken, CredentialStore, FileCredentialStore, MemoryCredentialStore, RefreshMode,
    RefreshToken, StoreFuture,
};
pub use error::{Error, Result};
pub use wire::{LoginGrant, TokenGrant, login_body, renewal_body};
