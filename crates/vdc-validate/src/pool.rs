//! Bounded worker pool for fan-out over remote entities
//!
//! Every work item runs to completion; one failing item never cancels its
//! siblings. Results are keyed by entity name, failures are logged with the
//! unit label and collected so the caller can raise one consolidated error.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, error};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use vdc_migrator_core::CheckError;

pub const DEFAULT_POOL_SIZE: usize = 8;

/// Shared, adjustable pool size.
///
/// Checks that must not overload a remote endpoint lower it for their own
/// fan-out with [`PoolSize::override_with`]; the previous value comes back when
/// the guard drops, whichever way the call site exits.
#[derive(Debug, Clone)]
pub struct PoolSize(Arc<AtomicUsize>);

impl PoolSize {
    pub fn new(size: usize) -> Self {
        Self(Arc::new(AtomicUsize::new(size.max(1))))
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, size: usize) {
        self.0.store(size.max(1), Ordering::SeqCst);
    }

    #[must_use = "the previous size is restored as soon as the guard is dropped"]
    pub fn override_with(&self, size: usize) -> PoolSizeGuard {
        let previous = self.0.swap(size.max(1), Ordering::SeqCst);
        debug!("pool size overridden: {} -> {}", previous, size.max(1));
        PoolSizeGuard {
            size: self.clone(),
            previous,
        }
    }

    /// Run `fut` with the pool size temporarily set to `size`.
    pub async fn with_size<F: Future>(&self, size: usize, fut: F) -> F::Output {
        let _guard = self.override_with(size);
        fut.await
    }
}

impl Default for PoolSize {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

pub struct PoolSizeGuard {
    size: PoolSize,
    previous: usize,
}

impl Drop for PoolSizeGuard {
    fn drop(&mut self) {
        self.size.0.store(self.previous, Ordering::SeqCst);
    }
}

/// A work item that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkFailure {
    pub key: Option<String>,
    pub message: String,
}

type Joined<T, E> = (Option<String>, Result<Result<T, E>, Box<dyn Any + Send>>);

pub struct WorkerPool<T, E = CheckError> {
    label: String,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<Joined<T, E>>,
    results: HashMap<String, T>,
    completed: usize,
    failures: Vec<WorkFailure>,
}

impl<T, E> WorkerPool<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    /// Pool bounded by the current value of `size`; `label` prefixes log lines.
    pub fn new(label: impl Into<String>, size: &PoolSize) -> Self {
        Self {
            label: label.into(),
            semaphore: Arc::new(Semaphore::new(size.get())),
            tasks: JoinSet::new(),
            results: HashMap::new(),
            completed: 0,
            failures: Vec::new(),
        }
    }

    pub fn spawn<F>(&mut self, key: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.spawn_item(Some(key.into()), fut);
    }

    /// Like [`WorkerPool::spawn`] for items whose result nobody looks up.
    pub fn spawn_unkeyed<F>(&mut self, fut: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.spawn_item(None, fut);
    }

    fn spawn_item<F>(&mut self, key: Option<String>, fut: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        self.tasks.spawn(async move {
            // the semaphore is never closed, so acquiring cannot fail
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = AssertUnwindSafe(fut).catch_unwind().await;
            (key, outcome)
        });
    }

    /// Wait for every spawned item.
    pub async fn join(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((key, Ok(Ok(value)))) => {
                    self.completed += 1;
                    if let Some(key) = key {
                        self.results.insert(key, value);
                    }
                }
                Ok((key, Ok(Err(e)))) => self.fail(key, e.to_string()),
                Ok((key, Err(panic))) => {
                    self.fail(key, format!("panicked: {}", panic_message(panic.as_ref())))
                }
                Err(e) => self.fail(None, e.to_string()),
            }
        }
    }

    fn fail(&mut self, key: Option<String>, message: String) {
        error!(
            "[{}] work item '{}' failed: {}",
            self.label,
            key.as_deref().unwrap_or("<unkeyed>"),
            message
        );
        self.failures.push(WorkFailure { key, message });
    }

    pub fn any_failed(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failures(&self) -> &[WorkFailure] {
        &self.failures
    }

    pub fn results(&self) -> &HashMap<String, T> {
        &self.results
    }

    pub fn into_results(self) -> HashMap<String, T> {
        self.results
    }

    /// Number of items that finished successfully, keyed or not.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// `"<key>: <message>"` for every failure, joined with `"; "`.
    pub fn failure_summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.key.as_deref().unwrap_or("<unkeyed>"), f.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
