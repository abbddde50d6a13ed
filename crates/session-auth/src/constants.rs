//! Backend endpoint defaults
//!
//! Paths are relative to the backend base URL. All three can be overridden
//! through configuration.

/// Renewal exchange endpoint
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Credential login endpoint
pub const DEFAULT_LOGIN_PATH: &str = "/auth/login";

/// Logout endpoint (revokes the refresh credential server-side)
pub const DEFAULT_LOGOUT_PATH: &str = "/auth/logout";

/// Name of the HTTP-only cookie that carries the refresh credential in
/// cookie mode. The client never reads it; the cookie jar replays it.
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";
