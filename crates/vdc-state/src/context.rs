//! Shared validation context for one migration unit
//!
//! Checks record discovered facts here (external network mappings, conflict
//! sets, per-gateway routing decisions, ...) and later checks and phases read
//! them back. Keys are typed: the Rust type bound to a [`ContextKey`] is the
//! schema of the stored value, so a flag stored as `bool` never comes back as
//! the string `"True"`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vdc_shared_types::UnitId;

use crate::error::ContextError;

/// Write discipline of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Written once by the check that discovers it, read-only afterwards
    Discovery,
    /// Accumulated by several writers (error lists keyed by entity, ...)
    Cumulative,
}

/// Typed handle to one context entry.
pub struct ContextKey<T> {
    name: &'static str,
    kind: KeyKind,
    _value: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn discovery(name: &'static str) -> Self {
        Self {
            name,
            kind: KeyKind::Discovery,
            _value: PhantomData,
        }
    }

    pub const fn cumulative(name: &'static str) -> Self {
        Self {
            name,
            kind: KeyKind::Cumulative,
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextKey")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Serializable copy of the whole context, persisted with every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSnapshot(pub BTreeMap<String, Value>);

impl ContextSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Default)]
struct Entries {
    values: BTreeMap<String, Value>,
    /// Keys written during this process; restored keys are not in here
    written: HashSet<String>,
}

/// Cloneable handle; every clone refers to the same underlying document.
#[derive(Clone)]
pub struct ValidationContext {
    unit: UnitId,
    entries: Arc<RwLock<Entries>>,
}

impl ValidationContext {
    pub fn new(unit: UnitId) -> Self {
        Self {
            unit,
            entries: Arc::new(RwLock::new(Entries::default())),
        }
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    /// Label prefixed to log lines of this unit.
    pub fn label(&self) -> String {
        self.unit.to_string()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &ContextKey<T>) -> Result<Option<T>, ContextError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.values.get(key.name) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|source| ContextError::Decode {
                    key: key.name,
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Like [`ValidationContext::get`] for keys a declared dependency must have written.
    pub fn require<T: DeserializeOwned>(&self, key: &ContextKey<T>) -> Result<T, ContextError> {
        self.get(key)?
            .ok_or(ContextError::Missing { key: key.name })
    }

    pub fn contains<T>(&self, key: &ContextKey<T>) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values
            .contains_key(key.name)
    }

    /// Store a value. Within one run a discovery key accepts a second write
    /// only when it is identical to the first. A value restored from a
    /// checkpoint may be re-discovered once, since the operator may have fixed
    /// the environment between runs.
    pub fn put<T: Serialize>(&self, key: &ContextKey<T>, value: &T) -> Result<(), ContextError> {
        let encoded = serde_json::to_value(value).map_err(|source| ContextError::Encode {
            key: key.name,
            source,
        })?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if key.kind == KeyKind::Discovery && entries.written.contains(key.name) {
            return match entries.values.get(key.name) {
                Some(existing) if *existing != encoded => {
                    Err(ContextError::AlreadyWritten { key: key.name })
                }
                _ => Ok(()),
            };
        }
        debug!("[{}] context: {} written", self.unit, key.name);
        entries.values.insert(key.name.to_string(), encoded);
        entries.written.insert(key.name.to_string());
        Ok(())
    }

    /// Atomic read-modify-write of a cumulative key. Concurrent callers are
    /// serialized, so no writer's contribution is lost.
    pub fn update<T, R, F>(&self, key: &ContextKey<T>, f: F) -> Result<R, ContextError>
    where
        T: Default + Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> R,
    {
        if key.kind != KeyKind::Cumulative {
            return Err(ContextError::NotCumulative { key: key.name });
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut current: T = match entries.values.get(key.name) {
            Some(value) => {
                serde_json::from_value(value.clone()).map_err(|source| ContextError::Decode {
                    key: key.name,
                    source,
                })?
            }
            None => T::default(),
        };

        let result = f(&mut current);
        let encoded = serde_json::to_value(&current).map_err(|source| ContextError::Encode {
            key: key.name,
            source,
        })?;
        entries.values.insert(key.name.to_string(), encoded);
        entries.written.insert(key.name.to_string());
        Ok(result)
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot(
            self.entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values
                .clone(),
        )
    }

    /// Replace the whole document, used once when resuming from a checkpoint.
    pub fn restore(&self, snapshot: ContextSnapshot) {
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = Entries {
            values: snapshot.0,
            written: HashSet::new(),
        };
    }

    /// Start over for a brand-new run.
    pub fn reset(&self) {
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = Entries::default();
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values
            .keys()
            .cloned()
            .collect()
    }
}

impl fmt::Debug for ValidationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationContext")
            .field("unit", &self.unit)
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    const IS_T0_CONNECTED: ContextKey<bool> = ContextKey::discovery("isT0Connected");
    const GATEWAY_ERRORS: ContextKey<BTreeMap<String, Vec<String>>> =
        ContextKey::cumulative("gatewayErrors");
    const SEEN: ContextKey<BTreeSet<u32>> = ContextKey::cumulative("seen");

    fn context() -> ValidationContext {
        ValidationContext::new(UnitId::new("acme", "vdc-1"))
    }

    #[test]
    fn test_discovery_keys_are_write_once() {
        let ctx = context();
        ctx.put(&IS_T0_CONNECTED, &true).unwrap();
        // identical re-discovery is accepted
        ctx.put(&IS_T0_CONNECTED, &true).unwrap();

        let err = ctx.put(&IS_T0_CONNECTED, &false).unwrap_err();
        assert!(matches!(err, ContextError::AlreadyWritten { key: "isT0Connected" }));
        assert_eq!(ctx.get(&IS_T0_CONNECTED).unwrap(), Some(true));
    }

    #[test]
    fn test_typed_values_keep_their_type() {
        let ctx = context();
        ctx.put(&IS_T0_CONNECTED, &true).unwrap();
        assert_eq!(
            ctx.snapshot().get("isT0Connected"),
            Some(&Value::Bool(true))
        );

        const AS_TEXT: ContextKey<String> = ContextKey::discovery("isT0Connected");
        assert!(matches!(
            ctx.get(&AS_TEXT),
            Err(ContextError::Decode { .. })
        ));
    }

    #[test]
    fn test_require_reports_missing_dependency() {
        let ctx = context();
        assert!(matches!(
            ctx.require(&IS_T0_CONNECTED),
            Err(ContextError::Missing { key: "isT0Connected" })
        ));
    }

    #[test]
    fn test_update_rejects_discovery_keys() {
        let ctx = context();
        let err = ctx
            .update(&IS_T0_CONNECTED, |flag| *flag = true)
            .unwrap_err();
        assert!(matches!(err, ContextError::NotCumulative { .. }));
    }

    #[test]
    fn test_cumulative_update_accumulates() {
        let ctx = context();
        ctx.update(&GATEWAY_ERRORS, |map| {
            map.entry("edge-01".to_string())
                .or_default()
                .push("l2vpn enabled".to_string())
        })
        .unwrap();
        ctx.update(&GATEWAY_ERRORS, |map| {
            map.entry("edge-01".to_string())
                .or_default()
                .push("sslvpn enabled".to_string())
        })
        .unwrap();

        let errors = ctx.require(&GATEWAY_ERRORS).unwrap();
        assert_eq!(errors["edge-01"].len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_writers_lose_nothing() {
        let ctx = context();
        let mut handles = Vec::new();
        for i in 0..64u32 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                tokio::task::yield_now().await;
                ctx.update(&SEEN, |seen| {
                    seen.insert(i);
                })
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let seen = ctx.require(&SEEN).unwrap();
        assert_eq!(seen.len(), 64);
        assert_eq!(seen, (0..64).collect::<BTreeSet<u32>>());
    }

    #[test]
    fn test_snapshot_restore_and_reset() {
        let ctx = context();
        ctx.put(&IS_T0_CONNECTED, &false).unwrap();
        let snapshot = ctx.snapshot();

        let resumed = context();
        resumed.restore(snapshot);
        assert_eq!(resumed.get(&IS_T0_CONNECTED).unwrap(), Some(false));

        // a restored value may be re-discovered once, then it is locked again
        resumed.put(&IS_T0_CONNECTED, &true).unwrap();
        assert!(resumed.put(&IS_T0_CONNECTED, &false).is_err());

        resumed.reset();
        assert!(!resumed.contains(&IS_T0_CONNECTED));
        assert!(resumed.snapshot().is_empty());
    }
}
