//! File task orchestration
//!
//! Each extracted file becomes one task. Tasks run on a bounded pool (a
//! semaphore permit is taken before a task is spawned), and every task owns
//! its own reconciliation engine, staging buffer and writer. Decoding runs
//! on the blocking pool and feeds the task through a bounded channel, so
//! records are still consumed strictly in source order.
//!
//! A task that fails or panics is reported as a failure outcome; it never
//! cancels its siblings.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, Instrument};

use crate::config::AmbiguityPolicy;
use crate::database::DictionaryStore;
use crate::error::{EnrichResult, FormatError};
use crate::models::ExternalRecord;
use crate::services::batch_writer::{BatchWriter, WriteMode};
use crate::services::reconciliation::ReconciliationEngine;
use crate::services::report::{
    FailureCause, FailureKind, FileOutcome, FileResult, FileState, FileStats,
};
use crate::services::staging::StagingBuffer;
use crate::source::{RecordSource, SourceSchema};

/// Decoded records buffered between the reader and the matcher
pub const RECORD_CHANNEL_CAPACITY: usize = 1024;

/// Settings shared by every file task in a run
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub schema: SourceSchema,
    pub chunk_size: usize,
    pub ambiguity_policy: AmbiguityPolicy,
    pub write_mode: WriteMode,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            schema: SourceSchema::default(),
            chunk_size: crate::config::DEFAULT_CHUNK_SIZE,
            ambiguity_policy: AmbiguityPolicy::default(),
            write_mode: WriteMode::default(),
        }
    }
}

/// Sequential pipeline for one file
struct FilePipeline {
    path: PathBuf,
    name: String,
    schema: SourceSchema,
    state: FileState,
    stats: FileStats,
    engine: ReconciliationEngine,
    buffer: StagingBuffer,
    writer: BatchWriter,
}

impl FilePipeline {
    fn new(path: PathBuf, store: Arc<dyn DictionaryStore>, settings: PipelineSettings) -> Self {
        let name = display_name(&path);
        Self {
            path,
            name,
            schema: settings.schema,
            state: FileState::Pending,
            stats: FileStats::default(),
            engine: ReconciliationEngine::new(store.clone(), settings.ambiguity_policy),
            buffer: StagingBuffer::new(settings.chunk_size),
            writer: BatchWriter::new(store, settings.write_mode),
        }
    }

    fn transition(&mut self, next: FileState) {
        debug!(file = %self.name, from = ?self.state, to = ?next, "File task state");
        self.state = next;
    }

    async fn run(mut self) -> FileOutcome {
        let started = Instant::now();
        info!(file = %self.name, "Processing file");

        let executed = self.execute().await;
        self.stats.matches = self.engine.counters();

        let result = match executed {
            Ok(()) => {
                self.transition(FileState::Done);
                info!(
                    file = %self.name,
                    flushes = self.stats.flushes,
                    rows_written = self.stats.rows_written,
                    "Processed {} DBF records ({} matches)",
                    self.stats.processed,
                    self.stats.matches.matched
                );
                FileResult::Success(self.stats)
            }
            Err(err) => {
                let failed_in = self.state;
                self.transition(FileState::Failed);
                error!(
                    file = %self.name,
                    state = ?failed_in,
                    processed = self.stats.processed,
                    error = %err,
                    "File task failed"
                );
                FileResult::Failure {
                    cause: FailureCause {
                        kind: FailureKind::from(&err),
                        state: failed_in,
                        message: err.to_string(),
                    },
                    partial: self.stats,
                }
            }
        };

        FileOutcome {
            file: self.name,
            result,
            elapsed_ms: elapsed_ms(started),
        }
    }

    async fn execute(&mut self) -> EnrichResult<()> {
        self.transition(FileState::ExtractingRecords);
        let path = self.path.clone();
        let schema = self.schema;
        let source = tokio::task::spawn_blocking(move || RecordSource::open(&path, &schema)).await??;
        self.stats.total_records = source.total_records();
        debug!(file = %self.name, total_records = self.stats.total_records, "Opened source table");

        let (tx, mut rx) = mpsc::channel::<Result<ExternalRecord, FormatError>>(RECORD_CHANNEL_CAPACITY);
        let producer = tokio::task::spawn_blocking(move || {
            for item in source {
                let stop = item.is_err();
                // A closed channel means the matcher gave up on this file.
                if tx.blocking_send(item).is_err() || stop {
                    break;
                }
            }
        });

        self.transition(FileState::Matching);
        while let Some(item) = rx.recv().await {
            let record = item?;
            self.stats.processed += 1;
            self.buffer.record_processed();
            self.engine.reconcile(&record, &mut self.buffer).await?;

            if self.buffer.should_flush() {
                self.flush().await?;
                self.transition(FileState::Matching);
            }
        }
        producer.await?;

        self.flush().await
    }

    async fn flush(&mut self) -> EnrichResult<()> {
        self.transition(FileState::Flushing);
        let flushed = self.writer.flush(&mut self.buffer).await?;
        if flushed.staged > 0 {
            self.stats.flushes += 1;
            self.stats.rows_written += flushed.written;
        }
        Ok(())
    }
}

/// Runs file tasks on a bounded pool
pub struct Orchestrator {
    store: Arc<dyn DictionaryStore>,
    settings: PipelineSettings,
    pool_size: usize,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn DictionaryStore>, settings: PipelineSettings, pool_size: usize) -> Self {
        Self {
            store,
            settings,
            pool_size: pool_size.max(1),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Process every file and return one outcome per file, in input order.
    pub async fn run(&self, files: &[PathBuf]) -> Vec<FileOutcome> {
        let permits = Arc::new(Semaphore::new(self.pool_size));
        let mut tasks = JoinSet::new();
        let mut outcomes: Vec<Option<FileOutcome>> = vec![None; files.len()];

        info!(files = files.len(), pool_size = self.pool_size, "Dispatching file tasks");

        for (index, path) in files.iter().enumerate() {
            let name = display_name(path);
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    outcomes[index] = Some(internal_failure(name, err.to_string(), 0));
                    continue;
                }
            };

            let pipeline = FilePipeline::new(path.clone(), self.store.clone(), self.settings);
            let span = tracing::info_span!("file_task", file = %name);
            tasks.spawn(
                async move {
                    let _permit = permit;
                    let started = Instant::now();
                    let outcome = match AssertUnwindSafe(pipeline.run()).catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(panic) => {
                            let message = panic_message(panic.as_ref());
                            error!(file = %name, panic = %message, "File task panicked");
                            internal_failure(name, message, elapsed_ms(started))
                        }
                    };
                    (index, outcome)
                }
                .instrument(span),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(err) => error!(error = %err, "File task could not be joined"),
            }
        }

        outcomes
            .into_iter()
            .zip(files)
            .map(|(outcome, path)| {
                outcome.unwrap_or_else(|| {
                    internal_failure(display_name(path), "task did not report".to_string(), 0)
                })
            })
            .collect()
    }
}

fn internal_failure(file: String, message: String, elapsed_ms: u64) -> FileOutcome {
    FileOutcome {
        file,
        result: FileResult::Failure {
            cause: FailureCause {
                kind: FailureKind::Internal,
                state: FileState::Failed,
                message,
            },
            partial: FileStats::default(),
        },
        elapsed_ms,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
