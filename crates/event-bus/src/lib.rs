//! Asynchronous event bus broadcasting validation progress ([`SystemEvent`])
//! from the orchestrator to reporting and logging listeners.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use log::warn;
use thiserror::Error;
use tokio::sync::RwLock;
use vdc_shared_types::SystemEvent;

pub type EventBusResult<T> = Result<T, EventBusError>;

/// Contract implemented by listeners interested in [`SystemEvent`] notifications.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &SystemEvent) -> anyhow::Result<()>;
}

/// Shared bus; listeners receive events in registration order.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<IndexMap<String, Arc<dyn EventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under a unique name.
    pub async fn register_listener<L>(
        &self,
        name: impl Into<String>,
        listener: L,
    ) -> EventBusResult<()>
    where
        L: EventListener + 'static,
    {
        let name = name.into();
        let mut guard = self.listeners.write().await;
        if guard.contains_key(&name) {
            return Err(EventBusError::ListenerExists(name));
        }
        guard.insert(name, Arc::new(listener));
        Ok(())
    }

    pub async fn unregister_listener(&self, name: &str) -> EventBusResult<()> {
        let mut guard = self.listeners.write().await;
        guard
            .shift_remove(name)
            .map(|_| ())
            .ok_or_else(|| EventBusError::ListenerNotFound(name.to_string()))
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Deliver an event to every listener. A failing listener does not stop
    /// delivery to the others; all failures come back as one error.
    pub async fn publish(&self, event: &SystemEvent) -> EventBusResult<()> {
        let listeners: Vec<(String, Arc<dyn EventListener>)> = {
            let guard = self.listeners.read().await;
            guard
                .iter()
                .map(|(name, listener)| (name.clone(), Arc::clone(listener)))
                .collect()
        };

        let mut failures = Vec::new();
        for (name, listener) in listeners {
            if let Err(err) = listener.on_event(event).await {
                warn!("[{}] event listener '{}' failed: {}", event.unit(), name, err);
                failures.push(ListenerFailure {
                    listener: name,
                    error: err.to_string(),
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EventBusError::ListenerFailures(ListenerFailureReport(
                failures,
            )))
        }
    }

    /// Publish for callers whose own outcome must not depend on listeners.
    /// Failures were already logged by [`EventBus::publish`].
    pub async fn notify(&self, event: SystemEvent) {
        let _ = self.publish(&event).await;
    }
}

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("listener '{0}' already registered")]
    ListenerExists(String),
    #[error("listener '{0}' not found")]
    ListenerNotFound(String),
    #[error("one or more listeners failed: {0}")]
    ListenerFailures(ListenerFailureReport),
}

impl EventBusError {
    pub fn listener_failures(&self) -> Option<&[ListenerFailure]> {
        match self {
            EventBusError::ListenerFailures(report) => Some(&report.0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListenerFailure {
    pub listener: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct ListenerFailureReport(pub Vec<ListenerFailure>);

impl fmt::Display for ListenerFailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|failure| format!("{}: {}", failure.listener, failure.error))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use vdc_shared_types::UnitId;

    struct RecordingListener {
        tag: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventListener for RecordingListener {
        async fn on_event(&self, event: &SystemEvent) -> anyhow::Result<()> {
            if let SystemEvent::GroupStarted { group, .. } = event {
                self.seen
                    .lock()
                    .unwrap()
                    .push(format!("{}:{}", self.tag, group));
            }
            Ok(())
        }
    }

    struct FailingListener;

    #[async_trait]
    impl EventListener for FailingListener {
        async fn on_event(&self, _event: &SystemEvent) -> anyhow::Result<()> {
            anyhow::bail!("listener broken")
        }
    }

    fn started(group: &str) -> SystemEvent {
        SystemEvent::GroupStarted {
            unit: UnitId::new("acme", "vdc-1"),
            group: group.to_string(),
        }
    }

    #[tokio::test]
    async fn test_delivery_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            bus.register_listener(
                tag,
                RecordingListener {
                    tag,
                    seen: Arc::clone(&seen),
                },
            )
            .await
            .unwrap();
        }

        bus.publish(&started("orgVdcValidations")).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "first:orgVdcValidations".to_string(),
                "second:orgVdcValidations".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.register_listener("broken", FailingListener).await.unwrap();
        bus.register_listener(
            "recorder",
            RecordingListener {
                tag: "rec",
                seen: Arc::clone(&seen),
            },
        )
        .await
        .unwrap();

        let err = bus.publish(&started("vappValidations")).await.unwrap_err();
        assert_eq!(err.listener_failures().unwrap().len(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let bus = EventBus::new();
        bus.register_listener("broken", FailingListener).await.unwrap();
        let err = bus
            .register_listener("broken", FailingListener)
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::ListenerExists(_)));

        bus.unregister_listener("broken").await.unwrap();
        assert_eq!(bus.listener_count().await, 0);
    }
}
