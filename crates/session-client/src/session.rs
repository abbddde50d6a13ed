//! Session entry and exit
//!
//! `login` starts a session: it exchanges a username and password for a
//! credential pair, stores it and re-arms the termination notice. `logout`
//! ends one on purpose: the backend is told (best effort) and the store is
//! cleared without the expiry notice.

use common::Secret;
use session_auth::{LoginGrant, RefreshMode, login_body, renewal_body};
use tracing::{info, instrument, warn};
use transport::{Outcome, RequestDescriptor};

use crate::error::{Error, Result};
use crate::pipeline::RequestPipeline;

impl RequestPipeline {
    /// Authenticate and store the issued credentials. Returns the backend's
    /// user profile.
    ///
    /// Sent directly through the transport: a 401 from the login endpoint is
    /// a failed login, not an expired session.
    #[instrument(skip_all, fields(username = %username))]
    pub async fn login(&self, username: &str, password: &Secret<String>) -> Result<serde_json::Value> {
        let settings = self.settings();
        let request = RequestDescriptor::post(settings.login_path.as_str())
            .with_json(login_body(username, password));

        let response = match self
            .transport()
            .send(&request, settings.request_timeout)
            .await
        {
            Outcome::Success(response) => response,
            Outcome::AuthFailure(response) | Outcome::OtherFailure(response) => {
                return Err(Error::from_status(&response));
            }
            Outcome::TimedOut => return Err(Error::Network("login timed out".into())),
            Outcome::Unreachable(msg) => return Err(Error::Network(msg)),
        };

        let envelope = response
            .envelope()
            .ok_or_else(|| Error::Protocol("login response is not an envelope".into()))?;
        if !envelope.is_success() {
            return Err(Error::Application {
                code: envelope.code,
                message: envelope.message().to_owned(),
            });
        }

        let login = LoginGrant::from_data(&envelope.data)?;
        let (access, refresh) = login.grant.into_credentials()?;
        if refresh.is_none() && matches!(settings.refresh_mode, RefreshMode::Explicit) {
            warn!("login returned no refresh token, the session cannot be renewed");
        }

        self.store().write(access, refresh).await?;
        self.terminator().rearm();
        info!("login succeeded");
        Ok(login.user)
    }

    /// End the session. The backend call is best effort; local credentials
    /// are cleared regardless.
    #[instrument(skip_all)]
    pub async fn logout(&self) -> Result<()> {
        let settings = self.settings();
        let access = self.store().read().await;
        let refresh = match settings.refresh_mode {
            RefreshMode::Explicit => self.store().refresh_token().await,
            RefreshMode::Cookie => None,
        };

        let mut request = RequestDescriptor::post(settings.logout_path.as_str());
        if let Some(body) = renewal_body(refresh.as_ref()) {
            request = request.with_json(body);
        }
        let request = request.authorized(access.as_ref().map(|t| t.expose()))?;

        match self
            .transport()
            .send(&request, settings.request_timeout)
            .await
        {
            Outcome::Success(_) => {}
            other => warn!(
                outcome = other.category().label(),
                "logout call failed, clearing local session anyway"
            ),
        }

        self.terminator().disarm();
        self.store().clear().await?;
        info!("logged out");
        Ok(())
    }
}
