//! Entry points used by the trigger surfaces.
//!
//! [`Engine`] owns the collaborators of one deployment: the index store, the
//! run ledger and the throttle cache. Every call is sequential; concurrent
//! calls are not excluded from each other, only the cache discourages them.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::cache::{Clock, ScanCache, SystemClock};
use crate::config::IndexerConfig;
use crate::error::AppError;
use crate::health::{check, HealthReport};
use crate::ledger::{RunHandle, RunHistory, RunKind, RunLedger, RunStatus, INDEXER_COMPONENT};
use crate::models::DatabaseStats;
use crate::reconcile::{plan, ReconcileReport, ReconcileStats, Reconciler, Scope};
use crate::scanner::Scanner;
use crate::store::IndexStore;

/// Parameters of one index pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRequest {
    pub scope: Scope,
    /// Ignore the throttle window.
    pub force: bool,
    /// Compute counters without writing to the index.
    pub dry_run: bool,
}

/// Result of a completed index pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub dry_run: bool,
    pub stats: ReconcileStats,
    pub processed: Vec<String>,
}

/// What [`Engine::index`] did with a request.
#[derive(Debug, Clone)]
pub enum Indexed {
    /// A pass ran.
    Fresh(Arc<IndexOutcome>),
    /// The previous pass is still inside the throttle window.
    Throttled(Arc<IndexOutcome>),
}

impl Indexed {
    pub fn outcome(&self) -> &Arc<IndexOutcome> {
        match self {
            Indexed::Fresh(outcome) | Indexed::Throttled(outcome) => outcome,
        }
    }
}

pub struct Engine<S, C = SystemClock> {
    store: S,
    config: IndexerConfig,
    scanner: Scanner,
    ledger: RunLedger,
    cache: ScanCache<IndexOutcome, HealthReport, C>,
}

impl<S: IndexStore> Engine<S, SystemClock> {
    pub fn new(store: S, config: IndexerConfig) -> Self {
        Self::with_clock(store, config, SystemClock)
    }
}

impl<S: IndexStore, C: Clock> Engine<S, C> {
    pub fn with_clock(store: S, config: IndexerConfig, clock: C) -> Self {
        let cache = ScanCache::new(clock, config.index_window, config.health_window);
        Self {
            scanner: Scanner::new(config.image_extensions.clone()),
            ledger: RunLedger::new(config.run_logs_path.clone()),
            store,
            config,
            cache,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Reconciles the index with the content root.
    ///
    /// Every pass that starts is recorded in the run ledger. On error the
    /// record is marked failed and the error is returned; whatever was
    /// committed before the failure stays in the index.
    pub async fn index(&self, request: &IndexRequest) -> Result<Indexed, AppError> {
        if !request.dry_run {
            if let Some(previous) = self.cache.index(request.force) {
                return Ok(Indexed::Throttled(previous));
            }
        }

        let kind = if request.dry_run {
            RunKind::DryRun
        } else {
            RunKind::Sync
        };
        let metadata = json!({
            "content_root": self.config.content_root.display().to_string(),
            "force": request.force,
        });
        let handle = self
            .ledger
            .begin(INDEXER_COMPONENT, kind, &request.scope.to_string(), metadata);

        let report = match self.run_index(request, &handle).await {
            Ok(report) => report,
            Err(e) => {
                error!("Index pass {} failed: {}", handle.run_id(), e);
                handle.fail(e.to_string());
                return Err(e);
            }
        };

        handle.update_stats(&report.stats);
        if !request.dry_run {
            handle.record_files_written(report.stats.pages_added as u64);
        }
        if report.partial {
            handle.mark_partial("entries were skipped while scanning or reconciling");
        } else {
            handle.succeed();
        }

        let outcome = Arc::new(IndexOutcome {
            run_id: handle.run_id(),
            status: handle.status(),
            dry_run: request.dry_run,
            stats: report.stats,
            processed: report.processed,
        });
        info!(
            "Index pass {}: +{} titles, +{} chapters, +{} pages, -{} titles, -{} chapters, -{} pages",
            outcome.run_id,
            outcome.stats.titles_added,
            outcome.stats.chapters_added,
            outcome.stats.pages_added,
            outcome.stats.titles_removed,
            outcome.stats.chapters_removed,
            outcome.stats.pages_removed
        );

        if !request.dry_run {
            self.cache.store_index(Arc::clone(&outcome));
        }
        Ok(Indexed::Fresh(outcome))
    }

    async fn run_index(
        &self,
        request: &IndexRequest,
        handle: &RunHandle,
    ) -> Result<ReconcileReport, AppError> {
        let snapshot = self.scanner.scan(&self.config.content_root)?;

        if request.dry_run {
            let view = self.store.load_view().await?;
            let report = plan(
                &snapshot,
                &view,
                &request.scope,
                &self.config.page_url_prefix,
            );
            for slug in &report.processed {
                handle.record_processed(slug);
            }
            return Ok(report);
        }

        Reconciler::new(&self.store, &self.config.page_url_prefix)
            .run(&snapshot, &request.scope, |slug, stats| {
                handle.update_stats(stats);
                handle.record_processed(slug);
            })
            .await
    }

    /// Compares the content root with the index without changing either.
    ///
    /// A missing root is reported as an empty tree. Index read errors are
    /// returned.
    pub async fn health(&self, force: bool) -> Result<Arc<HealthReport>, AppError> {
        if let Some(previous) = self.cache.health(force) {
            return Ok(previous);
        }

        let snapshot = self.scanner.scan_or_empty(&self.config.content_root);
        let index = self.store.load_view().await?;
        let report = Arc::new(check(&snapshot, &index, &self.config.page_url_prefix));
        info!(
            "Health check: {} titles, {} chapters, {} pages missing on disk; {} chapters, {} images missing in index; {} broken chapters",
            report.missing_on_disk.titles.len(),
            report.missing_on_disk.chapters.len(),
            report.missing_on_disk.pages.len(),
            report.missing_in_db.chapters.len(),
            report.missing_in_db.images.len(),
            report.broken_chapters.len()
        );

        self.cache.store_health(Arc::clone(&report));
        Ok(report)
    }

    pub async fn stats(&self) -> Result<DatabaseStats, AppError> {
        self.store.stats().await
    }

    pub fn history(&self, limit: usize) -> RunHistory {
        self.ledger.history(limit)
    }
}

/// Response of the index trigger.
///
/// `status` is 1 for a complete pass, 2 for a partial one and 0 when nothing
/// ran: either the pass was throttled or it failed, in which case `error` is
/// set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub status: u8,
    pub titles_scanned: usize,
    pub chapters_added: usize,
    pub pages_added: usize,
    pub titles_removed: usize,
    pub chapters_removed: usize,
    pub titles_added: usize,
    pub pages_removed: usize,
    pub pages_updated: usize,
    pub run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TriggerResponse {
    pub const SKIPPED: u8 = 0;
    pub const SUCCESS: u8 = 1;
    pub const PARTIAL: u8 = 2;

    pub fn from_result(result: &Result<Indexed, AppError>) -> Self {
        match result {
            Ok(Indexed::Fresh(outcome)) => Self::from_outcome(outcome),
            Ok(Indexed::Throttled(previous)) => Self {
                status: Self::SKIPPED,
                run_id: Some(previous.run_id),
                ..Self::default()
            },
            Err(e) => Self {
                status: Self::SKIPPED,
                error: Some(e.to_string()),
                ..Self::default()
            },
        }
    }

    fn from_outcome(outcome: &IndexOutcome) -> Self {
        let stats = &outcome.stats;
        Self {
            status: match outcome.status {
                RunStatus::Partial => Self::PARTIAL,
                _ => Self::SUCCESS,
            },
            titles_scanned: stats.titles,
            chapters_added: stats.chapters_added,
            pages_added: stats.pages_added,
            titles_removed: stats.titles_removed,
            chapters_removed: stats.chapters_removed,
            titles_added: stats.titles_added,
            pages_removed: stats.pages_removed,
            pages_updated: stats.pages_updated,
            run_id: Some(outcome.run_id),
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn outcome(status: RunStatus) -> Arc<IndexOutcome> {
        Arc::new(IndexOutcome {
            run_id: Uuid::new_v4(),
            status,
            dry_run: false,
            stats: ReconcileStats {
                titles: 3,
                chapters_added: 4,
                pages_added: 40,
                pages_updated: 2,
                chapters_removed: 1,
                pages_removed: 9,
                ..ReconcileStats::default()
            },
            processed: vec!["berserk".to_string()],
        })
    }

    #[test]
    fn test_response_for_success() {
        let outcome = outcome(RunStatus::Success);
        let response = TriggerResponse::from_result(&Ok(Indexed::Fresh(Arc::clone(&outcome))));
        assert_eq!(response.status, TriggerResponse::SUCCESS);
        assert_eq!(response.titles_scanned, 3);
        assert_eq!(response.chapters_added, 4);
        assert_eq!(response.pages_added, 40);
        assert_eq!(response.pages_removed, 9);
        assert_eq!(response.run_id, Some(outcome.run_id));
        assert!(!response.is_error());
    }

    #[test]
    fn test_response_for_partial() {
        let response = TriggerResponse::from_result(&Ok(Indexed::Fresh(outcome(RunStatus::Partial))));
        assert_eq!(response.status, TriggerResponse::PARTIAL);
    }

    #[test]
    fn test_response_for_throttled() {
        let previous = outcome(RunStatus::Success);
        let response = TriggerResponse::from_result(&Ok(Indexed::Throttled(Arc::clone(&previous))));
        assert_eq!(response.status, TriggerResponse::SKIPPED);
        assert_eq!(response.pages_added, 0);
        assert_eq!(response.run_id, Some(previous.run_id));
        assert!(!response.is_error());
    }

    #[test]
    fn test_response_for_error() {
        let err = AppError::RootUnavailable(PathBuf::from("/srv/manga"));
        let response = TriggerResponse::from_result(&Err(err));
        assert_eq!(response.status, TriggerResponse::SKIPPED);
        assert!(response.is_error());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], 0);
        assert_eq!(json["error"], "Content root unavailable: /srv/manga");
        assert_eq!(json["titlesScanned"], 0);
    }

    #[test]
    fn test_response_field_names() {
        let response = TriggerResponse::from_result(&Ok(Indexed::Fresh(outcome(RunStatus::Success))));
        let json = serde_json::to_value(&response).unwrap();
        for key in [
            "status",
            "titlesScanned",
            "chaptersAdded",
            "pagesAdded",
            "titlesRemoved",
            "chaptersRemoved",
            "titlesAdded",
            "pagesRemoved",
            "pagesUpdated",
            "runId",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_indexed_outcome() {
        let previous = outcome(RunStatus::Success);
        let indexed = Indexed::Throttled(Arc::clone(&previous));
        assert!(Arc::ptr_eq(indexed.outcome(), &previous));
    }
}
