//! Request pipeline
//!
//! Public entry point for callers. Every `execute` call:
//! 1. Reads the current access token and attaches it as a bearer header
//! 2. Sends through the transport
//! 3. Inspects the application envelope on success
//! 4. On 401 hands the request to the renewal coordinator, unless the request
//!    is itself the renewal exchange (then it fails as `RenewalRejected`)
//!
//! The pipeline is cheap to clone and safe to call from any number of tasks.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use session_auth::{
    AccessToken, CredentialStore, DEFAULT_LOGIN_PATH, DEFAULT_LOGOUT_PATH, DEFAULT_REFRESH_PATH,
    RefreshMode,
};
use tracing::{debug, instrument, warn};
use transport::{Outcome, RequestDescriptor, Response, Transport};

use crate::coordinator::RenewalCoordinator;
use crate::error::{Error, Result};
use crate::metrics;
use crate::terminator::{SessionTerminator, TerminationHook};

/// Per-call timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub refresh_path: String,
    pub login_path: String,
    pub logout_path: String,
    pub refresh_mode: RefreshMode,
    /// Timeout for each original request and each replay
    pub request_timeout: Duration,
    /// Timeout for the renewal exchange. Elapsing counts as rejection.
    pub renewal_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            refresh_path: DEFAULT_REFRESH_PATH.to_owned(),
            login_path: DEFAULT_LOGIN_PATH.to_owned(),
            logout_path: DEFAULT_LOGOUT_PATH.to_owned(),
            refresh_mode: RefreshMode::Cookie,
            request_timeout: DEFAULT_TIMEOUT,
            renewal_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Result of one credentialed attempt, before renewal decisions.
pub(crate) enum Attempt {
    Done(Result<Response>),
    AuthFailure,
}

struct Shared {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    coordinator: RenewalCoordinator,
    terminator: SessionTerminator,
    settings: PipelineSettings,
}

#[derive(Clone)]
pub struct RequestPipeline {
    shared: Arc<Shared>,
}

pub struct PipelineBuilder {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    hook: Option<Arc<dyn TerminationHook>>,
    settings: PipelineSettings,
}

impl PipelineBuilder {
    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn refresh_mode(mut self, mode: RefreshMode) -> Self {
        self.settings.refresh_mode = mode;
        self
    }

    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.settings.refresh_path = path.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.settings.request_timeout = timeout;
        self
    }

    pub fn renewal_timeout(mut self, timeout: Duration) -> Self {
        self.settings.renewal_timeout = timeout;
        self
    }

    /// Collaborator notified when the session expires.
    pub fn termination_hook(mut self, hook: impl TerminationHook + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> RequestPipeline {
        let hook: Arc<dyn TerminationHook> = match self.hook {
            Some(hook) => hook,
            None => Arc::new(|| warn!("session expired and no termination hook is configured")),
        };
        RequestPipeline {
            shared: Arc::new(Shared {
                terminator: SessionTerminator::new(self.store.clone(), hook),
                transport: self.transport,
                store: self.store,
                coordinator: RenewalCoordinator::new(),
                settings: self.settings,
            }),
        }
    }
}

impl RequestPipeline {
    pub fn builder(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            transport,
            store,
            hook: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.shared.store
    }

    pub fn coordinator(&self) -> &RenewalCoordinator {
        &self.shared.coordinator
    }

    pub fn terminator(&self) -> &SessionTerminator {
        &self.shared.terminator
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.shared.settings
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.shared.transport.as_ref()
    }

    /// Send `request` with the current credential, renewing and replaying
    /// transparently on 401.
    #[instrument(
        skip_all,
        fields(
            request_id = %format!("req_{}", uuid::Uuid::new_v4().as_simple()),
            transport = %self.shared.transport.id(),
            method = %request.method,
            path = %request.path,
        )
    )]
    pub async fn execute(&self, request: RequestDescriptor) -> Result<Response> {
        let presented = self.store().read().await;
        let timeout = self.settings().request_timeout;

        let attempt = self.attempt(&request, presented.as_ref(), timeout).await;
        let result = match attempt {
            Attempt::Done(result) => result,
            Attempt::AuthFailure if self.is_renewal(&request) => {
                warn!("renewal endpoint answered 401, not renewing recursively");
                Err(Error::RenewalRejected(
                    "renewal endpoint rejected the request".into(),
                ))
            }
            Attempt::AuthFailure => {
                debug!("auth failure, handing request to renewal coordinator");
                self.coordinator()
                    .acquire(self, request, presented)
                    .await
            }
        };

        metrics::record_request(metrics::outcome_label(&result));
        result
    }

    /// `execute`, then deserialize the envelope `data` payload (or the whole
    /// body when the response is not an envelope).
    pub async fn execute_data<T: DeserializeOwned>(&self, request: RequestDescriptor) -> Result<T> {
        let response = self.execute(request).await?;
        let parsed = match response.envelope() {
            Some(envelope) => envelope.data_as(),
            None => response.json(),
        };
        parsed.map_err(|e| Error::Protocol(format!("decoding response payload: {e}")))
    }

    /// Second and final attempt for a request that already failed with 401.
    /// Another 401 here is not queued again.
    pub(crate) async fn replay(&self, request: &RequestDescriptor) -> Result<Response> {
        let presented = self.store().read().await;
        match self
            .attempt(request, presented.as_ref(), self.settings().request_timeout)
            .await
        {
            Attempt::Done(result) => result,
            Attempt::AuthFailure => {
                warn!(path = %request.path, "request rejected again after renewal");
                Err(Error::RenewalRejected(
                    "request rejected again after credential renewal".into(),
                ))
            }
        }
    }

    /// One credentialed exchange, classified.
    pub(crate) async fn attempt(
        &self,
        request: &RequestDescriptor,
        token: Option<&AccessToken>,
        timeout: Duration,
    ) -> Attempt {
        let prepared = match request.authorized(token.map(AccessToken::expose)) {
            Ok(p) => p,
            Err(e) => return Attempt::Done(Err(e.into())),
        };

        match self.transport().send(&prepared, timeout).await {
            Outcome::Success(response) => Attempt::Done(check_envelope(response)),
            Outcome::AuthFailure(_) => Attempt::AuthFailure,
            Outcome::OtherFailure(response) => {
                debug!(status = response.status, "request failed");
                Attempt::Done(Err(Error::from_status(&response)))
            }
            Outcome::TimedOut => Attempt::Done(Err(Error::Network(format!(
                "no response within {}ms",
                timeout.as_millis()
            )))),
            Outcome::Unreachable(msg) => Attempt::Done(Err(Error::Network(msg))),
        }
    }

    fn is_renewal(&self, request: &RequestDescriptor) -> bool {
        request.path == self.settings().refresh_path
    }
}

/// Fail successful HTTP responses whose envelope reports a domain error.
fn check_envelope(response: Response) -> Result<Response> {
    match response.envelope() {
        Some(envelope) if !envelope.is_success() => Err(Error::Application {
            code: envelope.code,
            message: envelope.message().to_owned(),
        }),
        _ => Ok(response),
    }
}
