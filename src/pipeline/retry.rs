// src/pipeline/retry.rs

//! Bounded retry rounds over transiently failing items.
//!
//! Each round gives every still-failing item one more attempt. The wait
//! between rounds goes through a [`Sleeper`] so tests run without real
//! sleeping.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{CandidateItem, FailureRecord};
use crate::pipeline::StopSignal;

/// Wait primitive used between retry rounds.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How a successful attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Delivered,
    /// Outside the recency window
    Filtered,
    /// Marked done by another path in the meantime
    AlreadyDone,
}

/// Result of one attempt at an item.
#[derive(Debug)]
pub enum AttemptOutcome {
    Resolved(Resolution),
    Transient(AppError),
    Permanent(AppError),
}

/// What the retry rounds left behind.
#[derive(Debug, Default)]
pub struct RetryReport {
    pub resolved: Vec<(FailureRecord, Resolution)>,
    /// Items that failed permanently or ran out of attempts
    pub permanent: Vec<FailureRecord>,
    /// Items still failing transiently after the last round
    pub remaining: Vec<FailureRecord>,
    pub rounds: u32,
}

/// Replays failing items for a bounded number of rounds.
pub struct RetryScheduler<'a> {
    sleeper: &'a dyn Sleeper,
    attempt_ceiling: u32,
    stop: Option<StopSignal>,
}

impl<'a> RetryScheduler<'a> {
    pub fn new(sleeper: &'a dyn Sleeper, attempt_ceiling: u32) -> Self {
        Self {
            sleeper,
            attempt_ceiling: attempt_ceiling.max(1),
            stop: None,
        }
    }

    /// Stop starting new attempts once the signal is set.
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stopped(&self) -> bool {
        self.stop.as_ref().is_some_and(StopSignal::is_stopped)
    }

    /// Run up to `max_rounds` rounds over `queue`.
    ///
    /// Sleeps `sleep` before each round; a zero duration skips the wait
    /// entirely. An item whose attempt count exceeds the ceiling is moved to
    /// `permanent` instead of being retried again. Errors returned by
    /// `retry_fn` are fatal and end the run immediately.
    pub async fn run<F, Fut>(
        &self,
        queue: Vec<FailureRecord>,
        max_rounds: u32,
        sleep: Duration,
        mut retry_fn: F,
    ) -> Result<RetryReport>
    where
        F: FnMut(CandidateItem) -> Fut,
        Fut: Future<Output = Result<AttemptOutcome>>,
    {
        let mut report = RetryReport::default();
        let mut queue = queue;

        for round in 1..=max_rounds {
            if queue.is_empty() || self.stopped() {
                break;
            }

            if !sleep.is_zero() {
                log::info!(
                    "Waiting {:?} before retry round {}/{} ({} items)",
                    sleep,
                    round,
                    max_rounds,
                    queue.len()
                );
                self.sleeper.sleep(sleep).await;
            }
            report.rounds = round;

            let mut still_failing = Vec::new();
            let mut pending = queue.into_iter();

            for mut record in pending.by_ref() {
                if self.stopped() {
                    still_failing.push(record);
                    break;
                }

                match retry_fn(record.item.clone()).await? {
                    AttemptOutcome::Resolved(resolution) => {
                        log::debug!("Retry resolved {} ({:?})", record.item.id, resolution);
                        report.resolved.push((record, resolution));
                    }
                    AttemptOutcome::Transient(err) => {
                        record.record_attempt(&err);
                        if record.attempt_count > self.attempt_ceiling {
                            log::warn!(
                                "Giving up on {} after {} attempts: {}",
                                record.item.id,
                                record.attempt_count,
                                err
                            );
                            report.permanent.push(record);
                        } else {
                            still_failing.push(record);
                        }
                    }
                    AttemptOutcome::Permanent(err) => {
                        record.record_attempt(&err);
                        report.permanent.push(record);
                    }
                }
            }

            still_failing.extend(pending);
            log::info!(
                "Retry round {}/{} finished: {} still failing",
                round,
                max_rounds,
                still_failing.len()
            );
            queue = still_failing;
        }

        report.remaining = queue;
        Ok(report)
    }
}
