//! Live crawl pipeline.
//!
//! - `Orchestrator::run_scope`: crawl one scope with checkpointing and retries
//! - `run_live`: drive a sequence of scopes
//! - `sync_done_from_log`: rebuild a checkpoint from a run log

pub mod freshness;
pub mod live;
pub mod log_sync;
pub mod orchestrator;
pub mod regions;
pub mod retry;
pub mod stop;
#[cfg(test)]
pub(crate) mod testing;

pub use freshness::FreshnessFilter;
pub use live::run_live;
pub use log_sync::sync_done_from_log;
pub use orchestrator::{Orchestrator, ScopeOptions};
pub use regions::RegionIterator;
pub use retry::{AttemptOutcome, Resolution, RetryReport, RetryScheduler, Sleeper, TokioSleeper};
pub use stop::StopSignal;
