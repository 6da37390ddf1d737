//! Failure records, counters and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, ErrorKind};
use crate::models::{CandidateItem, Scope};

/// An item that failed and may be retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub item: CandidateItem,
    pub error_kind: ErrorKind,
    /// Last error message seen for this item
    pub message: String,
    /// Attempts made so far, including the primary pass
    pub attempt_count: u32,
    pub first_seen_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(item: CandidateItem, error: &AppError) -> Self {
        Self {
            item,
            error_kind: error.kind(),
            message: error.to_string(),
            attempt_count: 1,
            first_seen_at: Utc::now(),
        }
    }

    /// Record another failed attempt.
    pub fn record_attempt(&mut self, error: &AppError) {
        self.attempt_count += 1;
        self.error_kind = error.kind();
        self.message = error.to_string();
    }
}

/// Counters reported for every scope and summed for the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeStats {
    pub delivered: usize,
    pub skipped_done: usize,
    pub filtered_stale: usize,
    pub permanent_failures: usize,
    pub still_failing: usize,
}

impl ScopeStats {
    pub fn add(&mut self, other: &ScopeStats) {
        self.delivered += other.delivered;
        self.skipped_done += other.skipped_done;
        self.filtered_stale += other.filtered_stale;
        self.permanent_failures += other.permanent_failures;
        self.still_failing += other.still_failing;
    }

    /// Items that reached a terminal state in this run.
    pub fn processed(&self) -> usize {
        self.delivered + self.filtered_stale + self.permanent_failures
    }

    pub fn as_summary(&self) -> Vec<(&'static str, String)> {
        vec![
            ("delivered", self.delivered.to_string()),
            ("skipped (already done)", self.skipped_done.to_string()),
            ("filtered (stale)", self.filtered_stale.to_string()),
            ("permanently failed", self.permanent_failures.to_string()),
            ("still failing after retries", self.still_failing.to_string()),
        ]
    }
}

/// Outcome of driving one scope.
#[derive(Debug, Clone)]
pub struct ScopeReport {
    pub scope: Scope,
    pub generation_key: String,
    pub stats: ScopeStats,
    pub permanent: Vec<FailureRecord>,
    /// Items still failing transiently after the last retry round
    pub remaining: Vec<FailureRecord>,
    /// Listing pagination stopped on an error before the source was exhausted
    pub discovery_error: Option<String>,
    /// A stop signal ended the scope early
    pub interrupted: bool,
}

impl ScopeReport {
    pub fn new(scope: Scope, generation_key: String) -> Self {
        Self {
            scope,
            generation_key,
            stats: ScopeStats::default(),
            permanent: Vec::new(),
            remaining: Vec::new(),
            discovery_error: None,
            interrupted: false,
        }
    }
}

/// Outcome of a whole (possibly multi-scope) run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub totals: ScopeStats,
    pub scopes_completed: usize,
    /// Scopes aborted by a fatal error, with the diagnostic
    pub aborted: Vec<(String, String)>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn record(&mut self, report: &ScopeReport) {
        self.totals.add(&report.stats);
        if report.interrupted {
            self.interrupted = true;
        } else {
            self.scopes_completed += 1;
        }
    }

    pub fn record_aborted(&mut self, scope: &Scope, error: &AppError) {
        self.aborted.push((scope.to_string(), error.to_string()));
    }

    /// Process exit status: non-zero on aborted scopes or too many permanent failures.
    pub fn exit_code(&self, max_permanent_failures: usize) -> i32 {
        if !self.aborted.is_empty() || self.totals.permanent_failures > max_permanent_failures {
            1
        } else {
            0
        }
    }
}
