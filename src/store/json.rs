use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::{CheckUpdate, RecordId, TradeRecord, ValidatedAnalysis};
use crate::store::{ResultSink, StoreError, WriteOutcome};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    counter: u64,
    records: BTreeMap<RecordId, TradeRecord>,
}

/// Anything `load_records` accepts: a store file or a bare record list.
#[derive(Deserialize)]
#[serde(untagged)]
enum RecordsFile {
    Store(StoreState),
    List(Vec<TradeRecord>),
}

/// Record store kept in memory and mirrored to a pretty-printed JSON file
/// after every mutation. Without a path it is memory-only.
pub struct JsonFileStore {
    path: Option<PathBuf>,
    state: RwLock<StoreState>,
}

impl JsonFileStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Opens `path`, loading any records already there. A missing file starts
    /// empty; an unreadable one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let state: StoreState = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            info!("Loaded {} analysis record(s) from {}", state.records.len(), path.display());
            state
        } else {
            StoreState::default()
        };

        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    /// Reads records from a file written by a store, or from a plain JSON
    /// array of records.
    pub fn load_records(path: &Path) -> Result<Vec<TradeRecord>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file: RecordsFile = serde_json::from_str(&content).with_context(|| {
            format!("{} is neither a record store nor a record list", path.display())
        })?;
        Ok(match file {
            RecordsFile::Store(state) => state.records.into_values().collect(),
            RecordsFile::List(records) => records,
        })
    }

    /// Seeds records directly, keeping their ids.
    pub async fn insert(&self, record: TradeRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.records.insert(record.id.clone(), record);
        self.persist(&state)?;
        Ok(())
    }

    pub async fn all_records(&self) -> Vec<TradeRecord> {
        self.state.read().await.records.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<TradeRecord> {
        self.state.read().await.records.get(id).cloned()
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(state)?;
        write_atomic(path, &json).map_err(|source| StoreError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[async_trait]
impl ResultSink for JsonFileStore {
    async fn create(&self, analysis: ValidatedAnalysis) -> Result<TradeRecord> {
        let mut state = self.state.write().await;
        state.counter += 1;
        let id = format!("{}-{:06}", analysis.symbol.to_lowercase(), state.counter);
        let record = analysis.into_record(id.clone(), Utc::now());
        state.records.insert(id, record.clone());

        if let Err(e) = self.persist(&state) {
            state.records.remove(&record.id);
            return Err(e.into());
        }
        debug!("Created analysis {} ({} {})", record.id, record.symbol, record.direction);
        Ok(record)
    }

    async fn open_records(&self) -> Result<Vec<TradeRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect())
    }

    async fn records_by_ids(&self, ids: &[RecordId]) -> Result<Vec<TradeRecord>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect())
    }

    async fn save_check(&self, id: &RecordId, update: &CheckUpdate) -> Result<WriteOutcome> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownRecord(id.clone()))?;

        let before = record.clone();
        if !record.apply_check(update) {
            return Ok(WriteOutcome::Unchanged);
        }

        if let Err(e) = self.persist(&state) {
            // Roll back so the record is re-evaluated on the next pass
            warn!("Persisting check for {} failed: {}", id, e);
            state.records.insert(id.clone(), before);
            return Err(e.into());
        }
        Ok(WriteOutcome::Applied)
    }
}
