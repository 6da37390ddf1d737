// src/pipeline/live.rs

//! Multi-scope live runs.

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{RunSummary, ScopeReport};
use crate::pipeline::{Orchestrator, RegionIterator};
use crate::utils::log as run_log;

/// Drive every scope of `scopes` in order, one at a time.
///
/// A fatal checkpoint error aborts the affected scope and the run moves on;
/// a configuration error aborts the whole run. A raised stop signal ends the
/// run after the current scope.
pub async fn run_live(orchestrator: &Orchestrator<'_>, scopes: RegionIterator) -> Result<RunSummary> {
    let start_time = Utc::now();
    let total = scopes.total();
    let stop = orchestrator.stop_signal().clone();
    let mut summary = RunSummary::default();

    for (index, scope) in scopes.enumerate() {
        if stop.is_stopped() {
            summary.interrupted = true;
            break;
        }

        run_log::header(&format!("[{}/{}] {}", index + 1, total, scope));
        match orchestrator.run_scope(&scope).await {
            Ok(report) => {
                log_report(&report);
                summary.record(&report);
            }
            Err(e @ AppError::CheckpointIo { .. }) => {
                log::error!("Scope {} aborted: {}", scope, e);
                summary.record_aborted(&scope, &e);
            }
            Err(e) => return Err(e),
        }
    }

    let elapsed = Utc::now() - start_time;
    let mut items = summary.totals.as_summary();
    items.push(("scopes completed", format!("{}/{}", summary.scopes_completed, total)));
    items.push(("scopes aborted", summary.aborted.len().to_string()));
    items.push(("elapsed", format!("{}s", elapsed.num_seconds())));
    run_log::summary("Live run", &items);
    if summary.interrupted {
        log::warn!("Run interrupted; rerun the same command to resume");
    }
    Ok(summary)
}

fn log_report(report: &ScopeReport) {
    run_log::summary(&report.scope.to_string(), &report.stats.as_summary());
    if let Some(error) = &report.discovery_error {
        run_log::sub_item(&format!("pagination stopped early: {error}"));
    }
    for record in &report.permanent {
        run_log::sub_item(&format!(
            "permanent {} {}: {}",
            record.item.id, record.error_kind, record.message
        ));
    }
    for record in &report.remaining {
        run_log::sub_item(&format!(
            "still failing {} after {} attempts: {}",
            record.item.id, record.attempt_count, record.message
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::models::{Scope, ScopeKind, Source};
    use crate::pipeline::testing::{ScriptedExtractor, ScriptedSink};
    use crate::pipeline::{ScopeOptions, StopSignal};
    use crate::storage::{FileCheckpointStore, MemoryCheckpointStore};

    fn options() -> ScopeOptions {
        ScopeOptions {
            max_pages: Some(1),
            limit: None,
            retry_rounds: 1,
            retry_sleep: Duration::ZERO,
            attempt_ceiling: 5,
            concurrency: 2,
        }
    }

    #[tokio::test]
    async fn test_runs_every_region_in_order() {
        let extractor = ScriptedExtractor::new(Source::Otodom).with_page(&["aaa", "bbb"]);
        let sink = ScriptedSink::new();
        let store = MemoryCheckpointStore::new();
        let orchestrator = Orchestrator::new(&extractor, &sink, &store, options());

        let scopes = RegionIterator::new(Source::Otodom, ScopeKind::Region, 0).unwrap();
        let total = scopes.total();
        let summary = run_live(&orchestrator, scopes).await.unwrap();

        assert_eq!(summary.scopes_completed, total);
        // Every region is its own generation, so the same ids deliver once per region.
        assert_eq!(summary.totals.delivered, 2 * total);
        assert!(!summary.interrupted);
        assert_eq!(summary.exit_code(0), 0);
    }

    #[tokio::test]
    async fn test_stop_ends_run_after_current_scope() {
        let stop = StopSignal::new();
        let extractor = ScriptedExtractor::new(Source::Otodom).with_page(&["aaa", "bbb"]);
        let sink = ScriptedSink::new().stop_after(1, stop.clone());
        let store = MemoryCheckpointStore::new();
        let orchestrator =
            Orchestrator::new(&extractor, &sink, &store, options()).with_stop(stop);

        let scopes = RegionIterator::new(Source::Otodom, ScopeKind::Region, 0).unwrap();
        let summary = run_live(&orchestrator, scopes).await.unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.scopes_completed, 0);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_aborts_scope_only() {
        let tmp = TempDir::new().unwrap();
        let scope = Scope::city(Source::Otodom, "Sopot", Some("pomorskie"), 0);
        let store = FileCheckpointStore::new(tmp.path());
        std::fs::write(store.path_for(&crate::storage::Generation::for_scope(&scope)), "{oops")
            .unwrap();

        let extractor = ScriptedExtractor::new(Source::Otodom).with_page(&["aaa"]);
        let sink = ScriptedSink::new();
        let orchestrator = Orchestrator::new(&extractor, &sink, &store, options());

        let summary = run_live(&orchestrator, RegionIterator::single(scope).unwrap())
            .await
            .unwrap();

        assert_eq!(summary.aborted.len(), 1);
        assert_eq!(summary.exit_code(100), 1);
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_configuration_error_aborts_run() {
        let extractor = ScriptedExtractor::new(Source::Morizon);
        let sink = ScriptedSink::new();
        let store = MemoryCheckpointStore::new();
        let orchestrator = Orchestrator::new(&extractor, &sink, &store, options());

        let scopes = RegionIterator::new(Source::Otodom, ScopeKind::Country, 0).unwrap();
        assert!(run_live(&orchestrator, scopes).await.is_err());
    }
}
