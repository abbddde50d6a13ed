//! Session-aware HTTP client
//!
//! Callers send ordinary requests through a `RequestPipeline`; the pipeline
//! attaches the current access token and hides credential expiry from them.
//! When a request fails with 401 the `RenewalCoordinator` runs a single
//! renewal exchange for every request that failed meanwhile, then replays
//! them with the new credential. A rejected renewal hands over to the
//! `SessionTerminator`, which clears the store and notifies the application
//! exactly once.
//!
//! Request lifecycle:
//! 1. `execute` reads the access token from the `CredentialStore`
//! 2. Transport exchange; success and non-401 failures return to the caller
//! 3. 401 → queued on the coordinator (starting a renewal if none is running)
//! 4. Renewal granted → store updated, request replayed once
//! 5. Renewal rejected → session terminated, caller gets `RenewalRejected`

pub mod coordinator;
pub mod error;
mod metrics;
pub mod pipeline;
pub mod session;
pub mod terminator;

#[cfg(test)]
mod test_support;

pub use coordinator::{RenewalCoordinator, RenewalPhase};
pub use error::{Error, Result};
pub use pipeline::{DEFAULT_TIMEOUT, PipelineBuilder, PipelineSettings, RequestPipeline};
pub use terminator::{SessionTerminator, TerminationHook};
