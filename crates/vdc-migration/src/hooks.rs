//! Progress listeners bound to the shared event bus.

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::sync::RwLock;
use vdc_event_bus::{EventBus, EventBusResult, EventListener};
use vdc_shared_types::SystemEvent;

/// Counters of one CLI invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressStats {
    pub groups_started: usize,
    pub groups_completed: usize,
    pub groups_skipped: usize,
    pub groups_failed: usize,
    pub compensations: usize,
}

/// Logs every event and keeps counters for the final summary line.
#[derive(Clone, Default)]
pub struct ProgressLogger {
    stats: Arc<RwLock<ProgressStats>>,
}

impl ProgressLogger {
    pub const NAME: &'static str = "progress-logger";

    pub fn new() -> Self {
        Self::default()
    }

    /// Register a clone of this logger; the returned handle keeps reading
    /// the same counters.
    pub async fn bind_event_bus(&self, bus: &EventBus) -> EventBusResult<()> {
        bus.register_listener(Self::NAME, self.clone()).await
    }

    pub async fn stats(&self) -> ProgressStats {
        self.stats.read().await.clone()
    }
}

#[async_trait]
impl EventListener for ProgressLogger {
    async fn on_event(&self, event: &SystemEvent) -> anyhow::Result<()> {
        let mut stats = self.stats.write().await;
        match event {
            SystemEvent::GroupStarted { unit, group } => {
                stats.groups_started += 1;
                info!("[{}] >> {}", unit, group);
            }
            SystemEvent::GroupSkipped { unit, group } => {
                stats.groups_skipped += 1;
                info!("[{}] == {} (completed by an earlier run)", unit, group);
            }
            SystemEvent::GroupCompleted {
                unit,
                group,
                warnings,
                ..
            } => {
                stats.groups_completed += 1;
                if *warnings > 0 {
                    warn!("[{}] << {} passed with {} warning(s)", unit, group, warnings);
                } else {
                    info!("[{}] << {} passed", unit, group);
                }
            }
            SystemEvent::GroupFailed { unit, group, .. } => {
                stats.groups_failed += 1;
                error!("[{}] !! {} failed", unit, group);
            }
            SystemEvent::CompensationExecuted { unit, actions } => {
                stats.compensations += actions.len();
                warn!("[{}] undone: {}", unit, actions.join(", "));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdc_shared_types::UnitId;

    #[tokio::test]
    async fn test_counts_follow_events() {
        let bus = EventBus::new();
        let logger = ProgressLogger::new();
        logger.bind_event_bus(&bus).await.unwrap();
        let unit = UnitId::new("acme", "acme-vdc-01");

        bus.notify(SystemEvent::GroupSkipped {
            unit: unit.clone(),
            group: "orgVdcValidations".to_string(),
        })
        .await;
        bus.notify(SystemEvent::GroupStarted {
            unit: unit.clone(),
            group: "vappValidations".to_string(),
        })
        .await;
        bus.notify(SystemEvent::CompensationExecuted {
            unit: unit.clone(),
            actions: vec!["reenableSourceOrgVdc".to_string()],
        })
        .await;
        bus.notify(SystemEvent::GroupFailed {
            unit,
            group: "vappValidations".to_string(),
            message: "fencing is enabled".to_string(),
        })
        .await;

        assert_eq!(
            logger.stats().await,
            ProgressStats {
                groups_started: 1,
                groups_completed: 0,
                groups_skipped: 1,
                groups_failed: 1,
                compensations: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_second_binding_is_rejected() {
        let bus = EventBus::new();
        let logger = ProgressLogger::new();
        logger.bind_event_bus(&bus).await.unwrap();
        assert!(logger.bind_event_bus(&bus).await.is_err());
    }
}
