//! Prometheus metrics exposition
//!
//! The session client emits its counters through the `metrics` facade:
//!
//! - `session_requests_total` (counter): label `outcome`
//! - `session_renewals_total` (counter): label `outcome`
//! - `session_replays_total` (counter): label `outcome`
//! - `session_terminations_total` (counter)
//!
//! With `--metrics` the CLI prints them after the command finishes.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Sample lines of the session counters, without HELP/TYPE comments.
pub fn session_samples(rendered: &str) -> Vec<&str> {
    rendered
        .lines()
        .filter(|line| line.starts_with("session_"))
        .collect()
}
