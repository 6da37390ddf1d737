// src/pipeline/orchestrator.rs

//! Single-scope live crawl.
//!
//! Drives one scope end-to-end: paginate candidates, skip the ones already
//! in the checkpoint, fetch and filter the rest, deliver, checkpoint, and
//! finally drain transient failures through bounded retry rounds.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::{AppError, Result};
use crate::models::{CandidateItem, Config, FailureRecord, Scope, ScopeReport};
use crate::pipeline::{
    AttemptOutcome, FreshnessFilter, Resolution, RetryScheduler, Sleeper, StopSignal, TokioSleeper,
};
use crate::services::{Extractor, Sink, discover};
use crate::storage::{CheckpointStore, Generation};
use crate::utils::log as run_log;

static TOKIO_SLEEPER: TokioSleeper = TokioSleeper;

/// Per-scope limits and retry policy.
#[derive(Debug, Clone)]
pub struct ScopeOptions {
    /// Stop paginating after this many listing pages
    pub max_pages: Option<u32>,
    /// Stop after dispatching this many not-yet-done items
    pub limit: Option<usize>,
    pub retry_rounds: u32,
    pub retry_sleep: Duration,
    pub attempt_ceiling: u32,
    /// Items processed concurrently
    pub concurrency: usize,
}

impl Default for ScopeOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ScopeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_pages: None,
            limit: None,
            retry_rounds: config.run.retry_rounds,
            retry_sleep: config.run.retry_sleep(),
            attempt_ceiling: config.run.attempt_ceiling,
            concurrency: config.http.max_concurrent.max(1),
        }
    }
}

/// Drives one scope at a time through the injected collaborators.
pub struct Orchestrator<'a> {
    extractor: &'a dyn Extractor,
    sink: &'a dyn Sink,
    store: &'a dyn CheckpointStore,
    sleeper: &'a dyn Sleeper,
    options: ScopeOptions,
    stop: StopSignal,
    reference_time: Option<DateTime<Utc>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        extractor: &'a dyn Extractor,
        sink: &'a dyn Sink,
        store: &'a dyn CheckpointStore,
        options: ScopeOptions,
    ) -> Self {
        Self {
            extractor,
            sink,
            store,
            sleeper: &TOKIO_SLEEPER,
            options,
            stop: StopSignal::new(),
            reference_time: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Evaluate recency against a fixed time instead of the wall clock.
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.reference_time = Some(now);
        self
    }

    pub fn options(&self) -> &ScopeOptions {
        &self.options
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Drive one scope to completion.
    ///
    /// Only fatal errors are returned: a configuration mismatch or a
    /// checkpoint that cannot be read or written. Everything else ends up in
    /// the report.
    pub async fn run_scope(&self, scope: &Scope) -> Result<ScopeReport> {
        if scope.source != self.extractor.source() {
            return Err(AppError::config(format!(
                "scope {} handed to the {} extractor",
                scope,
                self.extractor.source()
            )));
        }
        if !scope.source.supports(scope.kind) {
            return Err(AppError::config(format!(
                "source '{}' does not support {} scopes",
                scope.source, scope.kind
            )));
        }

        let generation = Generation::for_scope(scope);
        let record = self.store.load(&generation).await?;
        log::info!(
            "Scope {}: generation {} ({}), {} items already done",
            scope,
            generation.key(),
            generation.file_name(),
            record.len()
        );

        let freshness = match self.reference_time {
            Some(now) => FreshnessFilter::at(scope.recency_window_days, now),
            None => FreshnessFilter::new(scope.recency_window_days),
        };

        let mut report = ScopeReport::new(scope.clone(), generation.key().to_string());
        let failures = match self
            .primary_pass(scope, &generation, &freshness, &mut report)
            .await
        {
            Ok(failures) => failures,
            Err(e) => return Err(self.abort(&generation, e).await),
        };
        self.store.flush(&generation).await?;

        if self.stop.is_stopped() {
            report.interrupted = true;
            report.stats.still_failing = failures.len();
            report.remaining = failures;
            log::warn!("Scope {} interrupted, retry rounds skipped", scope);
            return Ok(report);
        }

        if let Err(e) = self
            .drain_retries(&generation, &freshness, failures, &mut report)
            .await
        {
            return Err(self.abort(&generation, e).await);
        }
        self.store.flush(&generation).await?;

        if self.stop.is_stopped() {
            report.interrupted = true;
        }
        Ok(report)
    }

    /// Discover and process every candidate once; returns the transient failures.
    async fn primary_pass(
        &self,
        scope: &Scope,
        generation: &Generation,
        freshness: &FreshnessFilter,
        report: &mut ScopeReport,
    ) -> Result<Vec<FailureRecord>> {
        let concurrency = self.options.concurrency.max(1);
        let mut candidates = discover(self.extractor, scope, self.options.max_pages);
        let mut in_flight = FuturesUnordered::new();
        let mut seen = HashSet::new();
        let mut failures = Vec::new();
        let mut dispatched = 0usize;
        let mut exhausted = false;

        loop {
            while !exhausted && in_flight.len() < concurrency {
                if self.stop.is_stopped() {
                    report.interrupted = true;
                    exhausted = true;
                    break;
                }
                if self.options.limit.is_some_and(|limit| dispatched >= limit) {
                    log::info!("Scope {}: item limit {} reached", scope, dispatched);
                    exhausted = true;
                    break;
                }

                match candidates.next().await {
                    None => exhausted = true,
                    Some(Err(e)) if e.is_fatal() => return Err(e),
                    Some(Err(e)) => {
                        report.discovery_error = Some(e.to_string());
                        exhausted = true;
                    }
                    Some(Ok(item)) => {
                        if !seen.insert(item.id.clone()) {
                            continue;
                        }
                        if self.store.is_done(generation, &item.id).await? {
                            report.stats.skipped_done += 1;
                            continue;
                        }
                        dispatched += 1;
                        in_flight.push(async move {
                            let outcome = self.attempt(generation, freshness, &item).await;
                            (item, outcome)
                        });
                    }
                }
            }

            let Some((item, outcome)) = in_flight.next().await else {
                if exhausted {
                    break;
                }
                continue;
            };
            self.record_outcome(report, &mut failures, item, outcome?);
        }

        log::info!(
            "Scope {}: primary pass done, {} delivered, {} skipped, {} stale, {} transient failures",
            scope,
            report.stats.delivered,
            report.stats.skipped_done,
            report.stats.filtered_stale,
            failures.len()
        );
        Ok(failures)
    }

    /// Hand transient failures to the retry rounds and fold the result into the report.
    async fn drain_retries(
        &self,
        generation: &Generation,
        freshness: &FreshnessFilter,
        failures: Vec<FailureRecord>,
        report: &mut ScopeReport,
    ) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }

        let scheduler = RetryScheduler::new(self.sleeper, self.options.attempt_ceiling)
            .with_stop(self.stop.clone());
        let retried = scheduler
            .run(
                failures,
                self.options.retry_rounds,
                self.options.retry_sleep,
                move |item| async move { self.attempt(generation, freshness, &item).await },
            )
            .await?;

        for (_, resolution) in &retried.resolved {
            match resolution {
                Resolution::Delivered => report.stats.delivered += 1,
                Resolution::Filtered => report.stats.filtered_stale += 1,
                Resolution::AlreadyDone => report.stats.skipped_done += 1,
            }
        }

        // Items that ran out of attempts never went through the permanent path.
        for record in &retried.permanent {
            self.store.mark_done(generation, &record.item.id).await?;
        }
        report.stats.permanent_failures += retried.permanent.len();
        report.permanent.extend(retried.permanent);

        report.stats.still_failing = retried.remaining.len();
        for record in &retried.remaining {
            log::warn!(
                "Still failing after {} attempts: {} ({}): {}",
                record.attempt_count,
                record.item.id,
                record.error_kind,
                record.message
            );
        }
        report.remaining = retried.remaining;
        Ok(())
    }

    /// One attempt at an item: fetch, validate, filter, deliver, checkpoint.
    ///
    /// Only fatal errors are returned as `Err`.
    async fn attempt(
        &self,
        generation: &Generation,
        freshness: &FreshnessFilter,
        item: &CandidateItem,
    ) -> Result<AttemptOutcome> {
        let listing = match self.extractor.fetch_detail(item).await {
            Ok(listing) => listing,
            Err(e) => return self.failed(generation, item, e).await,
        };
        if let Err(e) = listing.validate() {
            return self.failed(generation, item, e).await;
        }

        // Stale items stay out of the checkpoint; a rerun fetches them again.
        if !freshness.accepts(listing.observed_at()) {
            log::debug!("{} is older than {} days", item.id, freshness.window_days());
            return Ok(AttemptOutcome::Resolved(Resolution::Filtered));
        }

        if self.store.is_done(generation, &item.id).await? {
            return Ok(AttemptOutcome::Resolved(Resolution::AlreadyDone));
        }

        match self.sink.deliver(&listing).await {
            Ok(ack) => {
                self.store.mark_done(generation, &item.id).await?;
                if ack.duplicate {
                    log::info!("{} already known to the backend", item.id);
                }
                run_log::delivered(generation.key(), &item.id, &item.url);
                Ok(AttemptOutcome::Resolved(Resolution::Delivered))
            }
            Err(e) => self.failed(generation, item, e).await,
        }
    }

    /// Classify a failed attempt; permanent failures are marked done.
    async fn failed(
        &self,
        generation: &Generation,
        item: &CandidateItem,
        error: AppError,
    ) -> Result<AttemptOutcome> {
        if error.is_fatal() {
            return Err(error);
        }
        if error.is_transient() {
            return Ok(AttemptOutcome::Transient(error));
        }
        self.store.mark_done(generation, &item.id).await?;
        Ok(AttemptOutcome::Permanent(error))
    }

    fn record_outcome(
        &self,
        report: &mut ScopeReport,
        failures: &mut Vec<FailureRecord>,
        item: CandidateItem,
        outcome: AttemptOutcome,
    ) {
        match outcome {
            AttemptOutcome::Resolved(Resolution::Delivered) => report.stats.delivered += 1,
            AttemptOutcome::Resolved(Resolution::Filtered) => report.stats.filtered_stale += 1,
            AttemptOutcome::Resolved(Resolution::AlreadyDone) => report.stats.skipped_done += 1,
            AttemptOutcome::Transient(e) => {
                log::warn!("{} failed transiently, queued for retry: {}", item.id, e);
                failures.push(FailureRecord::new(item, &e));
            }
            AttemptOutcome::Permanent(e) => {
                log::warn!("{} failed permanently: {}", item.id, e);
                report.stats.permanent_failures += 1;
                report.permanent.push(FailureRecord::new(item, &e));
            }
        }
    }

    /// Persist what was committed before giving up on the scope.
    async fn abort(&self, generation: &Generation, error: AppError) -> AppError {
        if !matches!(error, AppError::CheckpointIo { .. }) {
            if let Err(flush_error) = self.store.flush(generation).await {
                log::error!("Checkpoint flush failed while aborting: {}", flush_error);
            }
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::models::{RunSummary, Source};
    use crate::pipeline::testing::{RecordingSleeper, ScriptedExtractor, ScriptedSink};
    use crate::storage::{FileCheckpointStore, MemoryCheckpointStore};

    fn scope(days: u32) -> Scope {
        Scope::city(Source::Otodom, "Gdańsk", Some("pomorskie"), days)
    }

    fn options() -> ScopeOptions {
        ScopeOptions {
            max_pages: None,
            limit: None,
            retry_rounds: 3,
            retry_sleep: Duration::ZERO,
            attempt_ceiling: 10,
            concurrency: 1,
        }
    }

    #[tokio::test]
    async fn test_stale_delivered_and_flaky_item() {
        let extractor = ScriptedExtractor::new(Source::Otodom)
            .with_page(&["old", "fresh", "flaky"])
            .with_age("old", 31)
            .with_age("fresh", 2);
        let sink = ScriptedSink::new().with_transient_failures("flaky", 2);
        let store = MemoryCheckpointStore::new();
        let sleeper = RecordingSleeper::default();
        let mut opts = options();
        opts.retry_sleep = Duration::from_secs(60);

        let orchestrator =
            Orchestrator::new(&extractor, &sink, &store, opts).with_sleeper(&sleeper);
        let report = orchestrator.run_scope(&scope(30)).await.unwrap();

        assert_eq!(report.stats.delivered, 2);
        assert_eq!(report.stats.filtered_stale, 1);
        assert_eq!(report.stats.permanent_failures, 0);
        assert_eq!(report.stats.still_failing, 0);
        assert!(report.remaining.is_empty());
        assert_eq!(sink.delivered(), vec!["fresh", "flaky"]);
        assert_eq!(sink.attempts("flaky"), 3);
        assert_eq!(sleeper.calls().len(), 2);

        let generation = Generation::for_scope(&scope(30));
        let done = store.persisted(&generation).unwrap();
        assert_eq!(done.len(), 2);
        assert!(done.contains("fresh") && done.contains("flaky"));
        assert!(!done.contains("old"));

        let mut summary = RunSummary::default();
        summary.record(&report);
        assert_eq!(summary.exit_code(0), 0);
    }

    #[tokio::test]
    async fn test_done_items_are_neither_fetched_nor_delivered() {
        let generation = Generation::for_scope(&scope(0));
        let extractor = ScriptedExtractor::new(Source::Otodom).with_page(&["aaa", "bbb", "ccc"]);
        let sink = ScriptedSink::new();
        let store = MemoryCheckpointStore::new().with_done(&generation, ["aaa", "ccc"]);

        let report = Orchestrator::new(&extractor, &sink, &store, options())
            .run_scope(&scope(0))
            .await
            .unwrap();

        assert_eq!(report.stats.skipped_done, 2);
        assert_eq!(report.stats.delivered, 1);
        assert_eq!(extractor.fetches(), vec!["bbb"]);
        assert_eq!(sink.delivered(), vec!["bbb"]);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let extractor = ScriptedExtractor::new(Source::Otodom).with_page(&["aaa", "bbb"]);
        let store = MemoryCheckpointStore::new();

        let first_sink = ScriptedSink::new();
        Orchestrator::new(&extractor, &first_sink, &store, options())
            .run_scope(&scope(0))
            .await
            .unwrap();

        let second_sink = ScriptedSink::new();
        let report = Orchestrator::new(&extractor, &second_sink, &store, options())
            .run_scope(&scope(0))
            .await
            .unwrap();

        assert_eq!(report.stats.skipped_done, 2);
        assert!(second_sink.delivered().is_empty());
        assert_eq!(extractor.fetches().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_items_are_refetched_on_rerun() {
        let extractor = ScriptedExtractor::new(Source::Otodom)
            .with_page(&["old", "fresh"])
            .with_age("old", 45)
            .with_age("fresh", 1);
        let store = MemoryCheckpointStore::new();

        let first_sink = ScriptedSink::new();
        let first = Orchestrator::new(&extractor, &first_sink, &store, options())
            .run_scope(&scope(30))
            .await
            .unwrap();
        assert_eq!(first.stats.filtered_stale, 1);

        let second_sink = ScriptedSink::new();
        let second = Orchestrator::new(&extractor, &second_sink, &store, options())
            .run_scope(&scope(30))
            .await
            .unwrap();

        assert_eq!(second.stats.skipped_done, 1);
        assert_eq!(second.stats.filtered_stale, 1);
        assert!(second_sink.delivered().is_empty());
        assert_eq!(extractor.fetches(), vec!["old", "fresh", "old"]);
    }

    #[tokio::test]
    async fn test_recency_windows_use_separate_checkpoints() {
        let extractor = ScriptedExtractor::new(Source::Otodom)
            .with_page(&["aaa"])
            .with_age("aaa", 1);
        let sink = ScriptedSink::new();
        let store = MemoryCheckpointStore::new();

        let windowed = Orchestrator::new(&extractor, &sink, &store, options())
            .run_scope(&scope(30))
            .await
            .unwrap();
        let full = Orchestrator::new(&extractor, &sink, &store, options())
            .run_scope(&scope(0))
            .await
            .unwrap();

        assert_ne!(windowed.generation_key, full.generation_key);
        assert_eq!(windowed.stats.delivered, 1);
        assert_eq!(full.stats.delivered, 1);
        assert_eq!(full.stats.skipped_done, 0);
    }

    #[tokio::test]
    async fn test_always_failing_item_is_reported_not_fatal() {
        let extractor = ScriptedExtractor::new(Source::Otodom)
            .with_page(&["aaa", "bbb"])
            .with_fetch_failures("bbb", 100);
        let sink = ScriptedSink::new();
        let store = MemoryCheckpointStore::new();

        let report = Orchestrator::new(&extractor, &sink, &store, options())
            .run_scope(&scope(0))
            .await
            .unwrap();

        assert_eq!(report.stats.delivered, 1);
        assert_eq!(report.stats.still_failing, 1);
        assert_eq!(report.remaining[0].item.id, "bbb");
        assert_eq!(report.remaining[0].attempt_count, 4);
        assert!(
            !store
                .is_done(&Generation::for_scope(&scope(0)), "bbb")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_permanent_failures_are_marked_done() {
        let extractor = ScriptedExtractor::new(Source::Otodom)
            .with_page(&["aaa", "bbb", "ccc"])
            .with_malformed("aaa");
        let sink = ScriptedSink::new().with_rejection("bbb");
        let store = MemoryCheckpointStore::new();

        let report = Orchestrator::new(&extractor, &sink, &store, options())
            .run_scope(&scope(0))
            .await
            .unwrap();

        assert_eq!(report.stats.permanent_failures, 2);
        assert_eq!(report.stats.delivered, 1);
        assert_eq!(sink.attempts("bbb"), 1);

        let generation = Generation::for_scope(&scope(0));
        assert!(store.is_done(&generation, "aaa").await.unwrap());
        assert!(store.is_done(&generation, "bbb").await.unwrap());

        let mut summary = RunSummary::default();
        summary.record(&report);
        assert_eq!(summary.exit_code(1), 1);
        assert_eq!(summary.exit_code(2), 0);
    }

    #[tokio::test]
    async fn test_limit_counts_new_items_only() {
        let generation = Generation::for_scope(&scope(0));
        let extractor = ScriptedExtractor::new(Source::Otodom)
            .with_page(&["aaa", "bbb", "ccc"])
            .with_page(&["ddd", "eee"]);
        let sink = ScriptedSink::new();
        let store = MemoryCheckpointStore::new().with_done(&generation, ["aaa"]);
        let mut opts = options();
        opts.limit = Some(2);

        let report = Orchestrator::new(&extractor, &sink, &store, opts)
            .run_scope(&scope(0))
            .await
            .unwrap();

        assert_eq!(sink.delivered(), vec!["bbb", "ccc"]);
        assert_eq!(report.stats.skipped_done, 1);
        assert_eq!(extractor.pages_requested(), vec![1]);
    }

    #[tokio::test]
    async fn test_discovery_error_is_reported() {
        let extractor = ScriptedExtractor::new(Source::Otodom)
            .with_page(&["aaa"])
            .with_page_error(AppError::transient_fetch("page 2", "HTTP 503"));
        let sink = ScriptedSink::new();
        let store = MemoryCheckpointStore::new();

        let report = Orchestrator::new(&extractor, &sink, &store, options())
            .run_scope(&scope(0))
            .await
            .unwrap();

        assert_eq!(report.stats.delivered, 1);
        assert!(report.discovery_error.is_some());
    }

    #[tokio::test]
    async fn test_mismatched_source_is_configuration_error() {
        let extractor = ScriptedExtractor::new(Source::Gratka);
        let sink = ScriptedSink::new();
        let store = MemoryCheckpointStore::new();

        let err = Orchestrator::new(&extractor, &sink, &store, options())
            .run_scope(&scope(0))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_concurrent_items_are_all_checkpointed() {
        let ids: Vec<String> = (0..20).map(|i| format!("id{i:02}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let extractor = ScriptedExtractor::new(Source::Otodom).with_page(&id_refs);
        let sink = ScriptedSink::new();
        let store = MemoryCheckpointStore::new();
        let mut opts = options();
        opts.concurrency = 4;

        let report = Orchestrator::new(&extractor, &sink, &store, opts)
            .run_scope(&scope(0))
            .await
            .unwrap();

        assert_eq!(report.stats.delivered, 20);
        let persisted = store.persisted(&Generation::for_scope(&scope(0))).unwrap();
        assert_eq!(persisted.len(), 20);
    }

    #[tokio::test]
    async fn test_interrupted_run_resumes_with_remaining_items() {
        let tmp = TempDir::new().unwrap();
        let ids = ["it1", "it2", "it3", "it4", "it5"];

        let stop = StopSignal::new();
        let extractor = ScriptedExtractor::new(Source::Otodom).with_page(&ids);
        let sink = ScriptedSink::new().stop_after(2, stop.clone());
        let store = FileCheckpointStore::new(tmp.path());
        let first = Orchestrator::new(&extractor, &sink, &store, options())
            .with_stop(stop)
            .run_scope(&scope(0))
            .await
            .unwrap();

        assert!(first.interrupted);
        assert_eq!(first.stats.delivered, 2);

        // Fresh process: new store instance reading the same directory.
        let extractor = ScriptedExtractor::new(Source::Otodom).with_page(&ids);
        let sink = ScriptedSink::new();
        let store = FileCheckpointStore::new(tmp.path());
        let second = Orchestrator::new(&extractor, &sink, &store, options())
            .run_scope(&scope(0))
            .await
            .unwrap();

        assert_eq!(second.generation_key, first.generation_key);
        assert_eq!(second.stats.skipped_done, 2);
        assert_eq!(second.stats.delivered, 3);
        assert_eq!(sink.delivered(), vec!["it3", "it4", "it5"]);
        assert_eq!(extractor.fetches().len(), 3);
        assert!(!second.interrupted);
    }
}
