pub mod json;

pub use json::JsonFileStore;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{CheckUpdate, RecordId, TradeRecord, ValidatedAnalysis};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown analysis record {0}")]
    UnknownRecord(RecordId),
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode records: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Effect of a `save_check` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Nothing to change: the record is terminal or the update is stale.
    Unchanged,
}

/// Read/write contract with the storage collaborator that owns analysis
/// records.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn create(&self, analysis: ValidatedAnalysis) -> Result<TradeRecord>;

    /// Snapshot of every non-terminal record.
    async fn open_records(&self) -> Result<Vec<TradeRecord>>;

    async fn records_by_ids(&self, ids: &[RecordId]) -> Result<Vec<TradeRecord>>;

    /// Writes one pass's result for one record. Idempotent: terminal records
    /// are never modified again, so replays of the same outcome are no-ops.
    async fn save_check(&self, id: &RecordId, update: &CheckUpdate) -> Result<WriteOutcome>;
}
