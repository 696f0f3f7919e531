//! Compensation log for guarded side effects
//!
//! A check that mutates the source environment (disabling the Org VDC,
//! disabling affinity rules) registers the undo action before touching
//! anything. When the unit fails validation every registered action runs
//! exactly once; when it passes the log is discarded.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

/// Type alias for boxed future
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Undo action; consumed when it runs.
pub type CompensationAction = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Lifecycle of one unit within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    NotStarted,
    Validating,
    ValidationFailed,
    ValidationPassed,
}

/// What a compensation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationReport {
    pub executed: Vec<String>,
    pub failed: Vec<String>,
}

impl CompensationReport {
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.failed.is_empty()
    }
}

struct LogInner {
    state: UnitState,
    actions: Vec<(String, CompensationAction)>,
}

/// Cloneable handle shared by the orchestrator and the checks of one unit.
#[derive(Clone)]
pub struct CompensationLog {
    label: String,
    inner: Arc<Mutex<LogInner>>,
}

impl CompensationLog {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            inner: Arc::new(Mutex::new(LogInner {
                state: UnitState::NotStarted,
                actions: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> UnitState {
        self.lock().state
    }

    /// Enter `Validating`. Actions left over from an earlier pass are kept.
    pub fn begin(&self) {
        self.lock().state = UnitState::Validating;
    }

    /// Register an undo action. Registering a name twice keeps the first one,
    /// so a side effect is never compensated twice.
    pub fn register<F>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let mut inner = self.lock();
        if inner.actions.iter().any(|(existing, _)| *existing == name) {
            warn!("[{}] compensation '{}' already registered", self.label, name);
            return;
        }
        info!("[{}] compensation '{}' registered", self.label, name);
        inner.actions.push((name, Box::new(action)));
    }

    pub fn pending(&self) -> Vec<String> {
        self.lock()
            .actions
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Enter `ValidationFailed` and run every registered action, most recent
    /// first. The log is drained before anything runs, so a second call finds
    /// nothing to do. A failing action is logged and does not stop the others.
    pub async fn compensate(&self) -> CompensationReport {
        let actions = {
            let mut inner = self.lock();
            inner.state = UnitState::ValidationFailed;
            std::mem::take(&mut inner.actions)
        };

        let mut report = CompensationReport::default();
        for (name, action) in actions.into_iter().rev() {
            match action().await {
                Ok(()) => {
                    info!("[{}] compensation '{}' executed", self.label, name);
                    report.executed.push(name);
                }
                Err(e) => {
                    error!(
                        "[{}] compensation '{}' failed, manual cleanup required: {:#}",
                        self.label, name, e
                    );
                    report.failed.push(name);
                }
            }
        }
        report
    }

    /// Enter `ValidationPassed`; the guarded side effects stay in place.
    pub fn discard(&self) {
        let mut inner = self.lock();
        inner.state = UnitState::ValidationPassed;
        if !inner.actions.is_empty() {
            info!(
                "[{}] validation passed, dropping {} compensation(s)",
                self.label,
                inner.actions.len()
            );
        }
        inner.actions.clear();
    }
}

impl fmt::Debug for CompensationLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompensationLog")
            .field("label", &self.label)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(
        counter: &Arc<AtomicUsize>,
    ) -> impl FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send + 'static {
        let counter = Arc::clone(counter);
        move || -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_compensation_runs_exactly_once() {
        let log = CompensationLog::new("acme/vdc");
        let counter = Arc::new(AtomicUsize::new(0));
        log.begin();
        log.register("reenableOrgVdc", counting(&counter));
        log.register("reenableOrgVdc", counting(&counter));

        let first = log.compensate().await;
        let second = log.compensate().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(first.executed, vec!["reenableOrgVdc".to_string()]);
        assert!(second.is_empty());
        assert_eq!(log.state(), UnitState::ValidationFailed);
    }

    #[tokio::test]
    async fn test_failing_action_does_not_stop_the_rest() {
        let log = CompensationLog::new("acme/vdc");
        let counter = Arc::new(AtomicUsize::new(0));
        log.register("reenableOrgVdc", counting(&counter));
        log.register("reenableAffinityRules", || -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(async { Err::<(), _>(anyhow::anyhow!("rule locked")) })
        });

        let report = log.compensate().await;
        assert_eq!(report.failed, vec!["reenableAffinityRules".to_string()]);
        assert_eq!(report.executed, vec!["reenableOrgVdc".to_string()]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_discard_keeps_side_effects() {
        let log = CompensationLog::new("acme/vdc");
        let counter = Arc::new(AtomicUsize::new(0));
        log.begin();
        log.register("reenableOrgVdc", counting(&counter));
        log.discard();

        assert_eq!(log.state(), UnitState::ValidationPassed);
        assert!(log.pending().is_empty());
        assert!(log.compensate().await.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
