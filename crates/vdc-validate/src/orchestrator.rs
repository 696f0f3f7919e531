//! Runs the validation groups of one unit
//!
//! Each group is one idempotent task: skipped when an earlier run recorded it
//! as succeeded, otherwise the session is refreshed, its checks run stage by
//! stage on the worker pool and the findings are merged into one verdict. A
//! failing group triggers the compensation log before the error propagates.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use log::{debug, error, info, warn};
use vdc_event_bus::EventBus;
use vdc_migrator_core::{
    AssessmentReport, CheckError, CheckOutcome, ErrorAggregator, GroupPolicy, GroupReport,
    GroupStatus, MigrationError,
};
use vdc_shared_types::{Finding, Severity, SystemEvent};

use crate::check::{CheckEnv, ValidationGroup};
use crate::checks::register_persisted_compensations;
use crate::compensation::CompensationReport;
use crate::platform::SessionProvider;
use crate::pool::WorkerPool;
use crate::registry::CheckRegistry;

pub struct Orchestrator {
    env: CheckEnv,
    session: Arc<dyn SessionProvider>,
    registry: CheckRegistry,
    events: Option<EventBus>,
}

impl Orchestrator {
    pub fn new(env: CheckEnv, session: Arc<dyn SessionProvider>, registry: CheckRegistry) -> Self {
        Self {
            env,
            session,
            registry,
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn env(&self) -> &CheckEnv {
        &self.env
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    /// Run every group in order.
    ///
    /// Enforce mode stops at the first failing group and returns its error.
    /// Assessment mode collects every finding into the report and only stops
    /// on unexpected errors.
    pub async fn run(&self) -> Result<AssessmentReport, MigrationError> {
        let label = self.env.label();
        let mut report = AssessmentReport::new(self.env.context.unit().clone(), self.env.mode);
        info!(
            "[{}] validation run {} started in {:?} mode",
            label, report.run_id, self.env.mode
        );

        self.env.compensation.begin();
        if self.env.enforcing() {
            let restored = register_persisted_compensations(&self.env)
                .map_err(|e| MigrationError::Fatal(e.into()))?;
            if !restored.is_empty() {
                info!(
                    "[{}] compensation(s) restored from checkpoint: {}",
                    label,
                    restored.join(", ")
                );
            }
        }

        for group in self.registry.groups() {
            let group_report = self.run_group(group).await?;
            report.push(group_report);
        }

        if report.is_success() {
            self.env.compensation.discard();
        } else {
            let compensation = self.env.compensation.compensate().await;
            self.after_compensation(&compensation).await;
        }
        report.finish();
        info!(
            "[{}] validation run {} finished: {} error(s), {} warning(s), {} advisory note(s)",
            label,
            report.run_id,
            report.errors().len(),
            report.warnings().len(),
            report.advisories().len()
        );
        Ok(report)
    }

    /// Run one group as an idempotent task.
    pub async fn run_group(&self, group: &ValidationGroup) -> Result<GroupReport, MigrationError> {
        let unit = self.env.context.unit().clone();
        let label = self.env.label();
        let name = group.name();
        let enforcing = self.env.enforcing();

        if enforcing && self.env.tasks.has_completed(name) {
            info!("[{}] {} already succeeded, skipping", label, name);
            self.publish(SystemEvent::GroupSkipped {
                unit,
                group: name.to_string(),
            })
            .await;
            return Ok(GroupReport::skipped(name));
        }

        info!("[{}] {} started", label, name);
        self.publish(SystemEvent::GroupStarted {
            unit: unit.clone(),
            group: name.to_string(),
        })
        .await;
        if enforcing {
            self.env.tasks.mark_in_progress(name);
        }

        match self.execute_group(group).await {
            Ok(mut report) => {
                if enforcing && report.status == GroupStatus::Passed {
                    // a failed flush is collected below, memory stays authoritative
                    let _ = self.env.tasks.record_result(name, true).await;
                }
                for failure in self.env.tasks.take_persistence_failures() {
                    report.findings.push(Finding::warning("checkpoint", failure));
                }

                info!(
                    "[{}] {} finished ({:?}, {} finding(s))",
                    label,
                    name,
                    report.status,
                    report.findings.len()
                );
                self.publish(SystemEvent::GroupCompleted {
                    unit,
                    group: name.to_string(),
                    warnings: report.count(Severity::Warning),
                    at: Utc::now(),
                })
                .await;
                Ok(report)
            }
            Err(err) => {
                error!("[{}] {} failed: {}", label, name, err);
                if enforcing {
                    let _ = self.env.tasks.record_result(name, false).await;
                }

                let compensation = self.env.compensation.compensate().await;
                self.after_compensation(&compensation).await;

                self.publish(SystemEvent::GroupFailed {
                    unit,
                    group: name.to_string(),
                    message: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    async fn execute_group(&self, group: &ValidationGroup) -> Result<GroupReport, MigrationError> {
        self.session
            .ensure_valid_session(self.env.context.unit())
            .await
            .map_err(MigrationError::Fatal)?;

        let label = self.env.label();
        let policy = if self.env.enforcing() {
            group.policy()
        } else {
            GroupPolicy::CollectAndContinue
        };
        let mut aggregator = ErrorAggregator::new(label.clone(), group.name(), policy);
        // checks that returned an error; their dependents cannot run
        let mut failed: HashSet<&'static str> = HashSet::new();

        for stage in group.stages()? {
            let mut runnable = Vec::new();
            for check in stage {
                if let Some(dep) = check.depends_on().iter().find(|d| failed.contains(*d)) {
                    debug!(
                        "[{}] {}/{} skipped, dependency {} failed",
                        label,
                        group.name(),
                        check.name(),
                        dep
                    );
                    failed.insert(check.name());
                    continue;
                }
                if check.side_effecting() && (!self.env.enforcing() || aggregator.has_errors()) {
                    debug!(
                        "[{}] {}/{} not executed, no side effects in this state",
                        label,
                        group.name(),
                        check.name()
                    );
                    continue;
                }
                runnable.push(check);
            }

            let mut pool: WorkerPool<Result<CheckOutcome, CheckError>, Infallible> =
                WorkerPool::new(label.clone(), &self.env.pool_size);
            for check in &runnable {
                let check = Arc::clone(check);
                let env = self.env.clone();
                pool.spawn(check.name(), async move {
                    Ok::<_, Infallible>(check.run(&env).await)
                });
            }
            pool.join().await;
            let aborted = pool.any_failed().then(|| pool.failure_summary());

            let mut results = pool.into_results();
            let mut unexpected: Option<anyhow::Error> = None;
            for check in &runnable {
                match results.remove(check.name()) {
                    Some(Ok(outcome)) => aggregator.record(check.name(), outcome),
                    Some(Err(err)) => {
                        failed.insert(check.name());
                        if let Err(source) = aggregator.record_error(check.name(), err) {
                            if unexpected.is_some() {
                                warn!(
                                    "[{}] {}/{}: additional unexpected error: {:#}",
                                    label,
                                    group.name(),
                                    check.name(),
                                    source
                                );
                            } else {
                                unexpected = Some(source);
                            }
                        }
                    }
                    None => {
                        failed.insert(check.name());
                    }
                }
            }

            if let Some(source) = unexpected {
                return Err(MigrationError::Fatal(source));
            }
            if let Some(summary) = aborted {
                return Err(MigrationError::Fatal(anyhow!(
                    "{}: check aborted: {}",
                    group.name(),
                    summary
                )));
            }
        }

        aggregator.finish()
    }

    /// Undo the guarded side effects recorded in the checkpoint, for units
    /// that passed validation but will not be migrated after all.
    pub async fn rollback(&self) -> Result<CompensationReport, MigrationError> {
        self.session
            .ensure_valid_session(self.env.context.unit())
            .await
            .map_err(MigrationError::Fatal)?;

        let registered = register_persisted_compensations(&self.env)
            .map_err(|e| MigrationError::Fatal(e.into()))?;
        if registered.is_empty() {
            info!("[{}] nothing to roll back", self.env.label());
        }

        let report = self.env.compensation.compensate().await;
        self.after_compensation(&report).await;
        Ok(report)
    }

    async fn after_compensation(&self, report: &CompensationReport) {
        if report.is_empty() {
            return;
        }
        if self.env.enforcing() {
            // the cleared prior-state flags must survive a restart
            let _ = self.env.tasks.flush().await;
        }
        if !report.failed.is_empty() {
            error!(
                "[{}] compensation incomplete, manual cleanup required for: {}",
                self.env.label(),
                report.failed.join(", ")
            );
        }
        self.publish(SystemEvent::CompensationExecuted {
            unit: self.env.context.unit().clone(),
            actions: report.executed.clone(),
        })
        .await;
    }

    async fn publish(&self, event: SystemEvent) {
        if let Some(events) = &self.events {
            events.notify(event).await;
        }
    }
}
