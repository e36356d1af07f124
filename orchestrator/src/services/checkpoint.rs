//! Checkpoint store implementations
//!
//! The durable store is an append-only JSONL file: one record per line,
//! loaded into an in-memory index on open. Duplicate writes for the same
//! unit are harmless; the index keeps the latest record, so a crash between
//! "call succeeded" and "checkpoint persisted" just means that unit is
//! retried on resume. The in-memory store backs tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use shared::{CheckpointRecord, TripleKey, WorkUnit};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::CheckpointStore;

fn sorted_triple_records(
    index: &HashMap<String, CheckpointRecord>,
    triple: &TripleKey,
) -> Vec<CheckpointRecord> {
    let mut records: Vec<CheckpointRecord> = index
        .values()
        .filter(|record| record.unit.triple() == *triple)
        .cloned()
        .collect();
    records.sort_by_key(|record| record.unit.prompt_index);
    records
}

/// In-memory checkpoint store for tests and dry runs
#[derive(Default)]
pub struct MemoryCheckpointStore {
    records: Arc<RwLock<HashMap<String, CheckpointRecord>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn has(&self, unit: &WorkUnit) -> OrchestratorResult<bool> {
        Ok(self.records.read().await.contains_key(&unit.key()))
    }

    async fn put(&self, record: CheckpointRecord) -> OrchestratorResult<()> {
        self.records
            .write()
            .await
            .insert(record.unit.key(), record);
        Ok(())
    }

    async fn completed_records(
        &self,
        triple: &TripleKey,
    ) -> OrchestratorResult<Vec<CheckpointRecord>> {
        Ok(sorted_triple_records(&*self.records.read().await, triple))
    }

    async fn completed_count(&self) -> OrchestratorResult<usize> {
        Ok(self.records.read().await.len())
    }
}

/// Durable JSONL-backed checkpoint store
pub struct JsonlCheckpointStore {
    path: PathBuf,
    index: Arc<RwLock<HashMap<String, CheckpointRecord>>>,
    writer: Arc<Mutex<File>>,
}

impl JsonlCheckpointStore {
    /// Open (or create) the store at `path`, loading any existing records.
    ///
    /// A corrupt line (typically a torn final write from a crash) is logged
    /// and skipped; the unit it would have marked simply re-executes.
    pub async fn open(path: &Path) -> OrchestratorResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut index = HashMap::new();
        match tokio::fs::read_to_string(path).await {
            Ok(existing) => {
                for (line_no, line) in existing.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<CheckpointRecord>(line) {
                        Ok(record) => {
                            index.insert(record.unit.key(), record);
                        }
                        Err(e) => {
                            warn!(
                                "⚠️ Skipping corrupt checkpoint line {} in {}: {}",
                                line_no + 1,
                                path.display(),
                                e
                            );
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        info!(
            "💾 Checkpoint store opened: {} ({} records)",
            path.display(),
            index.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            index: Arc::new(RwLock::new(index)),
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for JsonlCheckpointStore {
    async fn has(&self, unit: &WorkUnit) -> OrchestratorResult<bool> {
        Ok(self.index.read().await.contains_key(&unit.key()))
    }

    async fn put(&self, record: CheckpointRecord) -> OrchestratorResult<()> {
        let mut line =
            serde_json::to_string(&record).map_err(|e| OrchestratorError::SerializationError {
                message: format!("checkpoint record: {e}"),
            })?;
        line.push('\n');

        {
            let mut writer = self.writer.lock().await;
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        self.index.write().await.insert(record.unit.key(), record);
        Ok(())
    }

    async fn completed_records(
        &self,
        triple: &TripleKey,
    ) -> OrchestratorResult<Vec<CheckpointRecord>> {
        Ok(sorted_triple_records(&*self.index.read().await, triple))
    }

    async fn completed_count(&self) -> OrchestratorResult<usize> {
        Ok(self.index.read().await.len())
    }
}
