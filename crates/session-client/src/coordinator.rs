//! Single-flight credential renewal
//!
//! The coordinator owns the renewal state machine and the queue of requests
//! waiting on it. Requests that fail with 401 call `acquire`:
//!
//! - `Idle`, credential already replaced since the request was sent: replay
//!   right away, no renewal needed
//! - `Idle`, session ended since the request was sent: `RenewalRejected`
//! - `Idle`, no refresh credential: terminate the session, `RenewalRejected`
//! - `Idle`, refresh credential available: queue the request, start a renewal
//!   cycle, move to `InFlight`
//! - `InFlight`: queue the request behind the running cycle
//!
//! The cycle runs on its own task so a caller that gives up (timeout, drop)
//! does not cancel renewal for everyone else. When the exchange resolves the
//! state goes back to `Idle` in the same critical section that takes the
//! queue, so every queued request belongs to exactly one cycle.
//!
//! Transitions:
//! - Idle → InFlight (first 401 with a refresh credential)
//! - InFlight → Idle (exchange granted: store updated, queue replayed)
//! - InFlight → Idle (exchange rejected or timed out: session terminated once
//!   before leaving InFlight, queue resolved as `RenewalRejected`)
//! - InFlight → Idle (backend unreachable: queue resolved as `Network`, session
//!   kept)

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use session_auth::{AccessToken, RefreshMode, RefreshToken, TokenGrant, renewal_body};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};
use transport::{Outcome, RequestDescriptor, Response};

use crate::error::{Error, Result};
use crate::metrics;
use crate::pipeline::RequestPipeline;

/// A request parked until the running renewal cycle resolves.
struct PendingRequest {
    request: RequestDescriptor,
    completion: oneshot::Sender<Result<Response>>,
    queued_at: Instant,
}

impl PendingRequest {
    fn new(request: RequestDescriptor, completion: oneshot::Sender<Result<Response>>) -> Self {
        Self {
            request,
            completion,
            queued_at: Instant::now(),
        }
    }

    fn resolve(self, result: Result<Response>) {
        let waited_ms = u64::try_from(self.queued_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        if self.completion.send(result).is_err() {
            debug!(path = %self.request.path, waited_ms, "caller gave up before resolution");
        }
    }
}

enum RenewalState {
    Idle,
    InFlight {
        cycle: u64,
        pending: Vec<PendingRequest>,
    },
}

/// Observable phase of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalPhase {
    Idle,
    InFlight,
}

impl RenewalPhase {
    pub fn label(&self) -> &'static str {
        match self {
            RenewalPhase::Idle => "idle",
            RenewalPhase::InFlight => "in_flight",
        }
    }
}

/// What the renewal exchange presents to the backend.
enum RefreshSource {
    /// Refresh token in the request body
    Explicit(RefreshToken),
    /// No body; the transport's cookie jar carries the refresh cookie
    Cookie,
}

enum RenewalOutcome {
    Granted(AccessToken, Option<RefreshToken>),
    Rejected(String),
    Unreachable(String),
}

pub struct RenewalCoordinator {
    state: Mutex<RenewalState>,
    cycles: AtomicU64,
}

impl Default for RenewalCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RenewalCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RenewalState::Idle),
            cycles: AtomicU64::new(0),
        }
    }

    pub async fn phase(&self) -> RenewalPhase {
        match &*self.state.lock().await {
            RenewalState::Idle => RenewalPhase::Idle,
            RenewalState::InFlight { .. } => RenewalPhase::InFlight,
        }
    }

    /// Number of requests waiting on the running cycle.
    pub async fn pending(&self) -> usize {
        match &*self.state.lock().await {
            RenewalState::Idle => 0,
            RenewalState::InFlight { pending, .. } => pending.len(),
        }
    }

    /// Paths of the queued requests, in arrival order.
    pub async fn pending_paths(&self) -> Vec<String> {
        match &*self.state.lock().await {
            RenewalState::Idle => Vec::new(),
            RenewalState::InFlight { pending, .. } => {
                pending.iter().map(|p| p.request.path.clone()).collect()
            }
        }
    }

    /// Renewal exchanges started since creation.
    pub fn cycles_started(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Resolve a request that failed with 401.
    ///
    /// `presented` is the access token the failed attempt carried.
    pub(crate) async fn acquire(
        &self,
        pipeline: &RequestPipeline,
        request: RequestDescriptor,
        presented: Option<AccessToken>,
    ) -> Result<Response> {
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock().await;

            if let RenewalState::InFlight { cycle, pending } = &mut *state {
                debug!(
                    cycle = *cycle,
                    queued = pending.len() + 1,
                    "renewal in flight, queueing request"
                );
                pending.push(PendingRequest::new(request, tx));
            } else {
                let current = pipeline.store().read().await;
                if current.is_none() && presented.is_some() {
                    // The session ended while this request was on the wire
                    return Err(Error::RenewalRejected("session already ended".into()));
                }
                if current.is_some() && current != presented {
                    drop(state);
                    debug!("credential replaced since the request was sent, replaying");
                    let result = pipeline.replay(&request).await;
                    metrics::record_replay(metrics::outcome_label(&result));
                    return result;
                }

                let Some(source) = refresh_source(pipeline).await else {
                    drop(state);
                    warn!("no refresh credential available, terminating session");
                    pipeline.terminator().terminate().await;
                    return Err(Error::RenewalRejected(
                        "no refresh credential available".into(),
                    ));
                };

                let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
                *state = RenewalState::InFlight {
                    cycle,
                    pending: vec![PendingRequest::new(request, tx)],
                };
                info!(
                    cycle,
                    phase = RenewalPhase::InFlight.label(),
                    "starting credential renewal"
                );
                tokio::spawn(run_cycle(pipeline.clone(), cycle, source));
            }
        }

        rx.await.unwrap_or_else(|_| {
            Err(Error::RenewalRejected(
                "renewal cycle ended without resolving the request".into(),
            ))
        })
    }

    /// Leave `InFlight`, handing back the requests queued during the cycle.
    async fn finish(&self) -> Vec<PendingRequest> {
        let mut state = self.state.lock().await;
        match mem::replace(&mut *state, RenewalState::Idle) {
            RenewalState::InFlight { cycle, pending } => {
                debug!(cycle, phase = RenewalPhase::Idle.label(), "renewal cycle closed");
                pending
            }
            RenewalState::Idle => Vec::new(),
        }
    }
}

async fn refresh_source(pipeline: &RequestPipeline) -> Option<RefreshSource> {
    match pipeline.settings().refresh_mode {
        RefreshMode::Cookie => Some(RefreshSource::Cookie),
        RefreshMode::Explicit => pipeline
            .store()
            .refresh_token()
            .await
            .map(RefreshSource::Explicit),
    }
}

/// One renewal cycle: exchange, publish the result, resolve the queue.
async fn run_cycle(pipeline: RequestPipeline, cycle: u64, source: RefreshSource) {
    let started = Instant::now();
    let outcome = exchange(&pipeline, &source).await;
    let coordinator = pipeline.coordinator();

    match outcome {
        RenewalOutcome::Granted(access, refresh) => {
            let rotated = refresh.is_some();
            // Store write happens before leaving InFlight: a 401 arriving after
            // the transition observes the new credential.
            if let Err(e) = pipeline.store().write(access, refresh).await {
                warn!(cycle, error = %e, "failed to persist renewed credentials");
            }
            pipeline.terminator().rearm();
            let pending = coordinator.finish().await;
            metrics::record_renewal("success");
            info!(
                cycle,
                rotated,
                replays = pending.len(),
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "credential renewal succeeded"
            );

            for waiting in pending {
                if waiting.completion.is_closed() {
                    debug!(cycle, path = %waiting.request.path, "skipping replay for abandoned request");
                    continue;
                }
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let result = pipeline.replay(&waiting.request).await;
                    metrics::record_replay(metrics::outcome_label(&result));
                    waiting.resolve(result);
                });
            }
        }
        RenewalOutcome::Unreachable(message) => {
            let pending = coordinator.finish().await;
            metrics::record_renewal("unreachable");
            warn!(cycle, error = %message, queued = pending.len(), "renewal endpoint unreachable, session kept");

            let error = Error::Network(message);
            for waiting in pending {
                waiting.resolve(Err(error.clone()));
            }
        }
        RenewalOutcome::Rejected(reason) => {
            metrics::record_renewal("rejected");
            warn!(cycle, reason = %reason, "credential renewal rejected");
            // Terminate before leaving InFlight so 401s that land while the
            // store is being cleared queue into this cycle.
            pipeline.terminator().terminate().await;
            let pending = coordinator.finish().await;
            debug!(cycle, queued = pending.len(), "resolving queue after rejection");

            let error = Error::RenewalRejected(reason);
            for waiting in pending {
                waiting.resolve(Err(error.clone()));
            }
        }
    }
}

/// POST the renewal endpoint directly through the transport, bypassing the
/// pipeline so a 401 here can never re-enter renewal.
async fn exchange(pipeline: &RequestPipeline, source: &RefreshSource) -> RenewalOutcome {
    let settings = pipeline.settings();
    let refresh = match source {
        RefreshSource::Explicit(token) => Some(token),
        RefreshSource::Cookie => None,
    };

    let mut request = RequestDescriptor::post(settings.refresh_path.as_str());
    if let Some(body) = renewal_body(refresh) {
        request = request.with_json(body);
    }

    match pipeline
        .transport()
        .send(&request, settings.renewal_timeout)
        .await
    {
        Outcome::Success(response) => grant_from(&response),
        Outcome::AuthFailure(response) | Outcome::OtherFailure(response) => {
            RenewalOutcome::Rejected(format!(
                "renewal endpoint answered HTTP {}",
                response.status
            ))
        }
        Outcome::TimedOut => RenewalOutcome::Rejected(format!(
            "renewal exchange timed out after {}ms",
            settings.renewal_timeout.as_millis()
        )),
        Outcome::Unreachable(message) => RenewalOutcome::Unreachable(message),
    }
}

fn grant_from(response: &Response) -> RenewalOutcome {
    let grant = match response.envelope() {
        Some(envelope) if !envelope.is_success() => {
            return RenewalOutcome::Rejected(envelope.message().to_owned());
        }
        Some(envelope) => TokenGrant::from_data(&envelope.data),
        None => response
            .json::<serde_json::Value>()
            .map_err(|e| session_auth::Error::InvalidGrant(e.to_string()))
            .and_then(|value| TokenGrant::from_data(&value)),
    };

    match grant.and_then(TokenGrant::into_credentials) {
        Ok((access, refresh)) => RenewalOutcome::Granted(access, refresh),
        Err(e) => RenewalOutcome::Rejected(e.to_string()),
    }
}
