//! Session metrics
//!
//! - `session_requests_total` (counter): label `outcome` (`success` or error label)
//! - `session_renewals_total` (counter): label `outcome` (`success`, `rejected`, `unreachable`)
//! - `session_replays_total` (counter): label `outcome`
//! - `session_terminations_total` (counter)
//!
//! Without an installed recorder these calls are no-ops.

use crate::error::Result;

pub(crate) fn outcome_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.label(),
    }
}

pub(crate) fn record_request(outcome: &'static str) {
    metrics::counter!("session_requests_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_renewal(outcome: &'static str) {
    metrics::counter!("session_renewals_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_replay(outcome: &'static str) {
    metrics::counter!("session_replays_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_termination() {
    metrics::counter!("session_terminations_total").increment(1);
}
