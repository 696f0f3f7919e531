//! Idempotent task bookkeeping
//!
//! A task recorded as succeeded never runs its side effects again, on this
//! run or on a resumed one. Every top-level result flushes the context and
//! the task records to the metadata store as one checkpoint.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use vdc_shared_types::{TaskStatus, UnitId};

use crate::context::ValidationContext;
use crate::error::StateError;
use crate::store::{Checkpoint, MetadataStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub sub_results: BTreeMap<String, TaskStatus>,
    #[serde(default)]
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::NotStarted,
            sub_results: BTreeMap::new(),
            attempts: 0,
            updated_at: Utc::now(),
        }
    }
}

/// What a fan-out task did on this invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubTaskSummary {
    pub attempted: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct TaskResultStore {
    unit: UnitId,
    context: ValidationContext,
    store: Arc<dyn MetadataStore>,
    records: Mutex<BTreeMap<String, TaskRecord>>,
    flush_lock: tokio::sync::Mutex<()>,
    persistence_failures: Mutex<Vec<String>>,
}

impl TaskResultStore {
    /// Fresh bookkeeping for a new run, ignoring any stored checkpoint.
    pub fn new(context: ValidationContext, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            unit: context.unit().clone(),
            context,
            store,
            records: Mutex::new(BTreeMap::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            persistence_failures: Mutex::new(Vec::new()),
        }
    }

    /// Resume from the stored checkpoint of the context's unit, if any. The
    /// context is restored from the same checkpoint.
    pub async fn open(
        context: ValidationContext,
        store: Arc<dyn MetadataStore>,
    ) -> Result<Self, StateError> {
        let tasks = Self::new(context, store);
        if let Some(checkpoint) = tasks.store.load(&tasks.unit).await? {
            let completed = checkpoint
                .tasks
                .values()
                .filter(|r| r.status.is_succeeded())
                .count();
            info!(
                "[{}] resuming: {} task(s) recorded, {} succeeded",
                tasks.unit,
                checkpoint.tasks.len(),
                completed
            );
            tasks.context.restore(checkpoint.context);
            *tasks.lock_records() = checkpoint.tasks;
        }
        Ok(tasks)
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, TaskRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn context(&self) -> &ValidationContext {
        &self.context
    }

    pub fn has_completed(&self, name: &str) -> bool {
        self.lock_records()
            .get(name)
            .map(|r| r.status.is_succeeded())
            .unwrap_or(false)
    }

    pub fn has_completed_sub(&self, parent: &str, sub: &str) -> bool {
        self.lock_records()
            .get(parent)
            .and_then(|r| r.sub_results.get(sub))
            .map(|s| s.is_succeeded())
            .unwrap_or(false)
    }

    pub fn status(&self, name: &str) -> TaskStatus {
        self.lock_records()
            .get(name)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn records(&self) -> Vec<TaskRecord> {
        self.lock_records().values().cloned().collect()
    }

    pub fn mark_in_progress(&self, name: &str) {
        let mut records = self.lock_records();
        let record = records
            .entry(name.to_string())
            .or_insert_with(|| TaskRecord::new(name));
        record.status = TaskStatus::InProgress;
        record.attempts += 1;
        record.updated_at = Utc::now();
    }

    /// Record the outcome of a top-level task and flush a checkpoint.
    ///
    /// When the flush fails the in-memory record stays authoritative for this
    /// process; the failure is logged, kept for
    /// [`TaskResultStore::take_persistence_failures`] and returned.
    pub async fn record_result(&self, name: &str, success: bool) -> Result<(), StateError> {
        {
            let mut records = self.lock_records();
            let record = records
                .entry(name.to_string())
                .or_insert_with(|| TaskRecord::new(name));
            record.status = TaskStatus::from_outcome(success);
            record.updated_at = Utc::now();
        }
        debug!(
            "[{}] task '{}' recorded as {:?}",
            self.unit,
            name,
            TaskStatus::from_outcome(success)
        );
        self.flush().await
    }

    /// Record partial completion of a fan-out task.
    pub async fn record_sub_result(
        &self,
        parent: &str,
        sub: &str,
        success: bool,
    ) -> Result<(), StateError> {
        {
            let mut records = self.lock_records();
            let record = records
                .entry(parent.to_string())
                .or_insert_with(|| TaskRecord::new(parent));
            record
                .sub_results
                .insert(sub.to_string(), TaskStatus::from_outcome(success));
            record.updated_at = Utc::now();
        }
        self.flush().await
    }

    /// Persist context and records as one checkpoint. Flushes are serialized,
    /// and each one snapshots under the flush lock, so a later flush always
    /// writes state at least as new as an earlier one.
    pub async fn flush(&self) -> Result<(), StateError> {
        let _guard = self.flush_lock.lock().await;
        let checkpoint = Checkpoint::new(
            self.unit.clone(),
            self.context.snapshot(),
            self.lock_records().clone(),
        );

        match self.store.save(&self.unit, &checkpoint).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = StateError::Persistence {
                    unit: self.unit.to_string(),
                    message: e.to_string(),
                };
                error!("[{}] {}", self.unit, err);
                self.persistence_failures
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(err.to_string());
                Err(err)
            }
        }
    }

    /// Forget that `name` ran, so its side effect is applied again on the next
    /// run. Used once that side effect has been undone.
    pub async fn invalidate(&self, name: &str) -> Result<(), StateError> {
        let removed = self.lock_records().remove(name).is_some();
        if !removed {
            return Ok(());
        }
        debug!("[{}] task '{}' invalidated", self.unit, name);
        self.flush().await
    }

    pub fn take_persistence_failures(&self) -> Vec<String> {
        std::mem::take(
            &mut *self
                .persistence_failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Forget everything about this unit, in memory and in the store.
    pub async fn clear(&self) -> Result<(), StateError> {
        let _guard = self.flush_lock.lock().await;
        self.lock_records().clear();
        self.context.reset();
        self.store.remove(&self.unit).await
    }

    /// Run `task` unless `name` already succeeded. Returns `Ok(None)` for the
    /// skipped case. A persistence failure after the task ran does not turn
    /// its success into an error; it is surfaced through the failure list.
    pub async fn run_once<T, E, Fut>(&self, name: &str, task: Fut) -> Result<Option<T>, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        if self.has_completed(name) {
            debug!("[{}] task '{}' already succeeded, skipping", self.unit, name);
            return Ok(None);
        }

        self.mark_in_progress(name);
        match task.await {
            Ok(value) => {
                let _ = self.record_result(name, true).await;
                Ok(Some(value))
            }
            Err(e) => {
                let _ = self.record_result(name, false).await;
                Err(e)
            }
        }
    }

    /// Run the sub-tasks of `parent` that have not succeeded yet. All remaining
    /// sub-tasks are attempted even when some fail; the parent is recorded as
    /// succeeded only when every sub-task has.
    pub async fn run_sub_tasks<E, Fut>(
        &self,
        parent: &str,
        items: Vec<(String, Fut)>,
    ) -> Result<SubTaskSummary, StateError>
    where
        E: Display,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut summary = SubTaskSummary::default();
        if self.has_completed(parent) {
            debug!("[{}] task '{}' already succeeded, skipping", self.unit, parent);
            summary.skipped = items.into_iter().map(|(sub, _)| sub).collect();
            return Ok(summary);
        }

        self.mark_in_progress(parent);
        let mut failures = Vec::new();
        for (sub, item) in items {
            if self.has_completed_sub(parent, &sub) {
                summary.skipped.push(sub);
                continue;
            }

            summary.attempted.push(sub.clone());
            let outcome = item.await;
            if let Err(e) = &outcome {
                warn!("[{}] {}/{} failed: {}", self.unit, parent, sub, e);
                failures.push(format!("{}: {}", sub, e));
            }
            let _ = self.record_sub_result(parent, &sub, outcome.is_ok()).await;
        }

        let _ = self.record_result(parent, failures.is_empty()).await;
        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(StateError::SubTasksFailed {
                parent: parent.to_string(),
                failures,
            })
        }
    }
}
