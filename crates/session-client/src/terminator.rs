//! Session termination
//!
//! Invoked when the session cannot be renewed. Clears the credential store
//! and notifies the collaborator that sends the user back to the login entry
//! point. The hook fires at most once per session: repeated `terminate()`
//! calls (overlapping failures, requests still arriving after termination)
//! only clear the store again. A new session (login or successful renewal)
//! re-arms it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use session_auth::CredentialStore;
use tracing::{debug, info, warn};

use crate::metrics;

/// Notify-then-navigate contract for an expired session.
///
/// Implementations present the "session expired" notice and move the user to
/// the authentication entry point. How (dialog, redirect, log line) is theirs
/// to decide.
pub trait TerminationHook: Send + Sync {
    fn session_expired(&self);
}

impl<F> TerminationHook for F
where
    F: Fn() + Send + Sync,
{
    fn session_expired(&self) {
        self()
    }
}

pub struct SessionTerminator {
    store: Arc<dyn CredentialStore>,
    hook: Arc<dyn TerminationHook>,
    notified: AtomicBool,
    terminations: AtomicU64,
}

impl SessionTerminator {
    pub fn new(store: Arc<dyn CredentialStore>, hook: Arc<dyn TerminationHook>) -> Self {
        Self {
            store,
            hook,
            notified: AtomicBool::new(false),
            terminations: AtomicU64::new(0),
        }
    }

    /// Clear credentials and notify the hook if this session has not been
    /// reported yet.
    pub async fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::Relaxed);
        metrics::record_termination();

        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear credentials during termination");
        }

        if self.notified.swap(true, Ordering::AcqRel) {
            debug!("session already reported as expired, hook not invoked again");
            return;
        }
        info!("session terminated, notifying termination hook");
        self.hook.session_expired();
    }

    /// A new session began; the next termination notifies again.
    pub fn rearm(&self) {
        self.notified.store(false, Ordering::Release);
    }

    /// The session ended on purpose (logout); suppress the expiry notice until
    /// the next session begins.
    pub fn disarm(&self) {
        self.notified.store(true, Ordering::Release);
    }

    /// Number of `terminate()` calls so far.
    pub fn terminations(&self) -> u64 {
        self.terminations.load(Ordering::Relaxed)
    }
}
