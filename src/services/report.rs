//! Per-file outcomes and the aggregate run report

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{EnrichError, FormatError};
use crate::services::reconciliation::MatchCounters;

/// Lifecycle of one file task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileState {
    Pending,
    ExtractingRecords,
    Matching,
    Flushing,
    Done,
    Failed,
}

/// Counters for one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileStats {
    /// Record count declared by the table header
    pub total_records: u32,
    /// Live records read and reconciled
    pub processed: u64,
    #[serde(flatten)]
    pub matches: MatchCounters,
    pub rows_written: u64,
    pub flushes: u32,
}

/// Error class of a failed file task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Format,
    Store,
    Ambiguity,
    Io,
    Internal,
}

impl From<&EnrichError> for FailureKind {
    fn from(err: &EnrichError) -> Self {
        match err {
            EnrichError::Format(FormatError::Io(_)) => FailureKind::Io,
            EnrichError::Format(_) => FailureKind::Format,
            EnrichError::Store(_) => FailureKind::Store,
            EnrichError::LookupAmbiguity { .. } => FailureKind::Ambiguity,
            EnrichError::Io(_) | EnrichError::Archive(_) | EnrichError::ArchiveNotFound { .. } => {
                FailureKind::Io
            }
            EnrichError::Config(_) | EnrichError::Join(_) => FailureKind::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCause {
    pub kind: FailureKind,
    /// State the task was in when it failed
    pub state: FileState,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileResult {
    Success(FileStats),
    /// Flushes committed before the failure stay committed; `partial`
    /// counts what the task got through.
    Failure {
        cause: FailureCause,
        partial: FileStats,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub file: String,
    pub result: FileResult,
    pub elapsed_ms: u64,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, FileResult::Success(_))
    }
}

/// Aggregate of one enrichment run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records processed by files that completed
    pub processed: u64,
    /// Rows stamped by files that completed
    pub matched: u64,
    pub rows_written: u64,
    pub succeeded_files: usize,
    pub failed_files: usize,
    pub files: Vec<FileOutcome>,
}

impl RunReport {
    pub fn from_outcomes(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        files: Vec<FileOutcome>,
    ) -> Self {
        let mut report = Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            processed: 0,
            matched: 0,
            rows_written: 0,
            succeeded_files: 0,
            failed_files: 0,
            files: Vec::new(),
        };

        for outcome in &files {
            match &outcome.result {
                FileResult::Success(stats) => {
                    report.succeeded_files += 1;
                    report.processed += stats.processed;
                    report.matched += stats.matches.matched;
                    report.rows_written += stats.rows_written;
                }
                FileResult::Failure { .. } => report.failed_files += 1,
            }
        }
        report.files = files;
        report
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &FailureCause)> {
        self.files.iter().filter_map(|outcome| match &outcome.result {
            FileResult::Failure { cause, .. } => Some((outcome.file.as_str(), cause)),
            FileResult::Success(_) => None,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.failed_files == 0
    }
}
