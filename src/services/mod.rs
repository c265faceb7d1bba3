//! Services layer for the enrichment pipeline

pub mod batch_writer;
pub mod enrichment;
pub mod orchestrator;
pub mod reconciliation;
pub mod report;
pub mod staging;

pub use batch_writer::{BatchWriter, FlushStats, WriteMode};
pub use enrichment::{AddressEnrichmentService, RunGuard, TriggerOutcome};
pub use orchestrator::{Orchestrator, PipelineSettings};
pub use reconciliation::{MatchCounters, MatchOutcome, ReconciliationEngine};
pub use report::{FailureCause, FailureKind, FileOutcome, FileResult, FileState, FileStats, RunReport};
pub use staging::{StagedBatch, StagingBuffer};
