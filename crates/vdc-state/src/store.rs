//! Durable checkpoint storage keyed by migration unit

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::fs;
use vdc_shared_types::UnitId;

use crate::context::ContextSnapshot;
use crate::error::StateError;
use crate::tasks::TaskRecord;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Everything needed to resume a unit: the context document and the task records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub unit: UnitId,
    pub saved_at: DateTime<Utc>,
    pub context: ContextSnapshot,
    pub tasks: BTreeMap<String, TaskRecord>,
}

impl Checkpoint {
    pub fn new(
        unit: UnitId,
        context: ContextSnapshot,
        tasks: BTreeMap<String, TaskRecord>,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            unit,
            saved_at: Utc::now(),
            context,
            tasks,
        }
    }
}

/// Opaque persistence keyed by migration-unit identity.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn load(&self, unit: &UnitId) -> Result<Option<Checkpoint>, StateError>;
    async fn save(&self, unit: &UnitId, checkpoint: &Checkpoint) -> Result<(), StateError>;
    async fn remove(&self, unit: &UnitId) -> Result<(), StateError>;
}

/// One JSON document per unit inside a state directory.
///
/// Saves go to a temporary sibling first and are renamed over the previous
/// checkpoint, so a failed write leaves the last durable state intact.
pub struct FileMetadataStore {
    state_dir: PathBuf,
}

impl FileMetadataStore {
    pub async fn new(state_dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let state_dir = state_dir.into();
        if !state_dir.exists() {
            fs::create_dir_all(&state_dir).await?;
        }
        Ok(Self { state_dir })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn checkpoint_path(&self, unit: &UnitId) -> PathBuf {
        self.state_dir.join(format!("{}.json", unit.storage_key()))
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn load(&self, unit: &UnitId) -> Result<Option<Checkpoint>, StateError> {
        let path = self.checkpoint_path(unit);
        let data = match fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: Checkpoint =
            serde_json::from_str(&data).map_err(|e| StateError::CorruptCheckpoint {
                unit: unit.to_string(),
                message: format!("{}: {}", path.display(), e),
            })?;
        if checkpoint.version > CHECKPOINT_VERSION {
            return Err(StateError::CorruptCheckpoint {
                unit: unit.to_string(),
                message: format!("unsupported checkpoint version {}", checkpoint.version),
            });
        }

        info!(
            "[{}] loaded checkpoint from {} ({} tasks)",
            unit,
            path.display(),
            checkpoint.tasks.len()
        );
        Ok(Some(checkpoint))
    }

    async fn save(&self, unit: &UnitId, checkpoint: &Checkpoint) -> Result<(), StateError> {
        let path = self.checkpoint_path(unit);
        let tmp_path = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(checkpoint)?;

        fs::write(&tmp_path, data).await?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        debug!("[{}] checkpoint written to {}", unit, path.display());
        Ok(())
    }

    async fn remove(&self, unit: &UnitId) -> Result<(), StateError> {
        match fs::remove_file(self.checkpoint_path(unit)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store for tests and dry runs, with save-failure injection.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    checkpoints: Mutex<HashMap<UnitId, Checkpoint>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        let store = Self::new();
        store
            .checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(checkpoint.unit.clone(), checkpoint);
        store
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn checkpoint(&self, unit: &UnitId) -> Option<Checkpoint> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(unit)
            .cloned()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn load(&self, unit: &UnitId) -> Result<Option<Checkpoint>, StateError> {
        Ok(self.checkpoint(unit))
    }

    async fn save(&self, unit: &UnitId, checkpoint: &Checkpoint) -> Result<(), StateError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StateError::Io(std::io::Error::new(
                ErrorKind::Other,
                "metadata store unavailable",
            )));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(unit.clone(), checkpoint.clone());
        Ok(())
    }

    async fn remove(&self, unit: &UnitId) -> Result<(), StateError> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(unit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vdc_shared_types::TaskStatus;

    fn sample_checkpoint(unit: &UnitId) -> Checkpoint {
        let mut context = BTreeMap::new();
        context.insert("isT0Connected".to_string(), serde_json::json!(true));
        let mut tasks = BTreeMap::new();
        let mut record = TaskRecord::new("orgVdcValidations");
        record.status = TaskStatus::Succeeded;
        tasks.insert(record.name.clone(), record);
        Checkpoint::new(unit.clone(), ContextSnapshot(context), tasks)
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileMetadataStore::new(temp_dir.path().join("state"))
            .await
            .unwrap();
        let unit = UnitId::new("acme", "vdc-1");

        assert!(store.load(&unit).await.unwrap().is_none());

        let checkpoint = sample_checkpoint(&unit);
        store.save(&unit, &checkpoint).await.unwrap();
        assert!(store.checkpoint_path(&unit).exists());
        assert!(!store.checkpoint_path(&unit).with_extension("json.tmp").exists());

        let loaded = store.load(&unit).await.unwrap().unwrap();
        assert_eq!(loaded, checkpoint);

        store.remove(&unit).await.unwrap();
        assert!(store.load(&unit).await.unwrap().is_none());
        // removing twice is fine
        store.remove(&unit).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileMetadataStore::new(temp_dir.path()).await.unwrap();
        let unit = UnitId::new("acme", "vdc-1");
        std::fs::write(store.checkpoint_path(&unit), "{ not json").unwrap();

        let err = store.load(&unit).await.unwrap_err();
        assert!(matches!(err, StateError::CorruptCheckpoint { .. }));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_checkpoint() {
        let store = InMemoryMetadataStore::new();
        let unit = UnitId::new("acme", "vdc-1");
        let first = sample_checkpoint(&unit);
        store.save(&unit, &first).await.unwrap();

        store.set_fail_saves(true);
        let mut second = first.clone();
        second.tasks.clear();
        assert!(store.save(&unit, &second).await.is_err());

        assert_eq!(store.checkpoint(&unit), Some(first));
        assert_eq!(store.save_count(), 1);
    }
}
