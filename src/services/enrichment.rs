//! Address enrichment service
//!
//! Entry point for one run: extract the archive, hand the extracted tables
//! to the orchestrator and fold the outcomes into a `RunReport`. Archive
//! and staging failures abort the run before any file is processed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::archive;
use crate::config::EnrichConfig;
use crate::database::DictionaryStore;
use crate::error::EnrichResult;
use crate::services::batch_writer::WriteMode;
use crate::services::orchestrator::{Orchestrator, PipelineSettings};
use crate::services::report::RunReport;
use crate::source::SourceSchema;

/// Result of asking for a background run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
}

/// Holds the run flag for as long as a run is in flight
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl RunGuard {
    fn acquire(running: &Arc<AtomicBool>) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                running: running.clone(),
            })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct AddressEnrichmentService {
    config: EnrichConfig,
    store: Arc<dyn DictionaryStore>,
    write_mode: WriteMode,
    running: Arc<AtomicBool>,
}

impl AddressEnrichmentService {
    pub fn new(config: EnrichConfig, store: Arc<dyn DictionaryStore>) -> Self {
        Self {
            config,
            store,
            write_mode: WriteMode::default(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn config(&self) -> &EnrichConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Claim the run flag; `None` while another run holds it.
    pub fn begin_run(&self) -> Option<RunGuard> {
        RunGuard::acquire(&self.running)
    }

    /// Start a run in the background unless one is already in flight.
    ///
    /// The outcome of the run only reaches the logs.
    pub fn trigger(self: &Arc<Self>) -> TriggerOutcome {
        let Some(guard) = self.begin_run() else {
            warn!("Enrichment run requested while another is in flight");
            return TriggerOutcome::AlreadyRunning;
        };

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            match service.run().await {
                Ok(report) if report.is_clean() => {}
                Ok(report) => warn!(
                    run_id = %report.run_id,
                    failed_files = report.failed_files,
                    "Enrichment run finished with failed files"
                ),
                Err(err) => error!(error = %err, "Enrichment run aborted"),
            }
        });

        TriggerOutcome::Started
    }

    /// Run one enrichment to completion.
    pub async fn run(&self) -> EnrichResult<RunReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("enrichment_run", %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> EnrichResult<RunReport> {
        let started_at = Utc::now();
        self.config.validate()?;

        let archive_path = self.config.archive_path();
        let staging_parent = self.config.archive_dir.clone();
        info!(
            archive = %archive_path.display(),
            dry_run = self.write_mode == WriteMode::DryRun,
            "Starting enrichment run"
        );

        let staging = tokio::task::spawn_blocking(move || {
            archive::extract_sources(&archive_path, &staging_parent)
        })
        .await??;

        let orchestrator = Orchestrator::new(
            self.store.clone(),
            PipelineSettings {
                schema: SourceSchema::default(),
                chunk_size: self.config.chunk_size,
                ambiguity_policy: self.config.ambiguity_policy,
                write_mode: self.write_mode,
            },
            self.config.worker_pool_size,
        );
        let outcomes = orchestrator.run(staging.files()).await;
        info!(files = outcomes.len(), "Zip archive processed");

        if let Err(err) = staging.close() {
            warn!(error = %err, "Failed to remove staging directory");
        }

        let report = RunReport::from_outcomes(run_id, started_at, outcomes);
        for (file, cause) in report.failures() {
            error!(
                file,
                kind = ?cause.kind,
                state = ?cause.state,
                cause = %cause.message,
                "File failed"
            );
        }
        info!(
            processed = report.processed,
            matched = report.matched,
            rows_written = report.rows_written,
            succeeded_files = report.succeeded_files,
            failed_files = report.failed_files,
            "Enrichment run complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryDictionaryStore;
    use crate::error::EnrichError;

    fn service(dir: &std::path::Path) -> Arc<AddressEnrichmentService> {
        Arc::new(AddressEnrichmentService::new(
            EnrichConfig::new(dir, "fias_dbf.zip"),
            Arc::new(InMemoryDictionaryStore::new()),
        ))
    }

    #[tokio::test]
    async fn missing_archive_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let err = service(dir.path()).run().await.unwrap_err();
        assert!(matches!(err, EnrichError::ArchiveNotFound { .. }));
    }

    #[tokio::test]
    async fn invalid_config_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let service = AddressEnrichmentService::new(
            EnrichConfig::new(dir.path(), "fias_dbf.zip").with_chunk_size(0),
            Arc::new(InMemoryDictionaryStore::new()),
        );
        assert!(matches!(service.run().await, Err(EnrichError::Config(_))));
    }

    #[test]
    fn config_is_kept_as_given() {
        let dir = tempfile::tempdir().unwrap();
        let service = AddressEnrichmentService::new(
            EnrichConfig::new(dir.path(), "fias_dbf.zip").with_worker_pool_size(3),
            Arc::new(InMemoryDictionaryStore::new()),
        );
        assert_eq!(service.config().worker_pool_size, 3);
        assert_eq!(
            service.config().archive_path(),
            dir.path().join("fias_dbf.zip")
        );
    }

    #[test]
    fn run_guard_is_exclusive_and_released_on_drop() {
        let running = Arc::new(AtomicBool::new(false));
        let guard = RunGuard::acquire(&running).unwrap();
        assert!(RunGuard::acquire(&running).is_none());
        drop(guard);
        assert!(RunGuard::acquire(&running).is_some());
    }

    #[tokio::test]
    async fn trigger_refuses_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let guard = service.begin_run().unwrap();

        assert!(service.is_running());
        assert_eq!(service.trigger(), TriggerOutcome::AlreadyRunning);
        drop(guard);
        assert!(!service.is_running());
    }
}
