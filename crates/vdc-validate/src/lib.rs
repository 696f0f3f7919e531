//! Org VDC migration validation
//!
//! Validation groups of checks run against one migration unit through a
//! [`PlatformAdapter`]. Results are merged per group, recorded as idempotent
//! tasks and guarded side effects are undone when a unit fails.

pub mod check;
pub mod checks;
pub mod compensation;
pub mod fake;
pub mod keys;
pub mod orchestrator;
pub mod platform;
pub mod pool;
pub mod registry;

pub use check::{Check, CheckEnv, ValidationGroup};
pub use compensation::{BoxFuture, CompensationLog, CompensationReport, UnitState};
pub use fake::FakePlatform;
pub use orchestrator::Orchestrator;
pub use platform::{NoSession, PlatformAdapter, SessionProvider};
pub use pool::{PoolSize, PoolSizeGuard, WorkFailure, WorkerPool, DEFAULT_POOL_SIZE};
pub use registry::CheckRegistry;

use std::sync::Arc;

use vdc_migrator_state::{MetadataStore, StateError, TaskResultStore, ValidationContext};
use vdc_shared_types::{RunMode, UnitSettings};

/// Build the environment of one unit. Enforce runs resume from the stored
/// checkpoint; assessment runs always start from a clean context and never
/// write to the store.
pub async fn open_unit(
    settings: UnitSettings,
    platform: Arc<dyn PlatformAdapter>,
    store: Arc<dyn MetadataStore>,
    pool_size: PoolSize,
    mode: RunMode,
) -> Result<CheckEnv, StateError> {
    let context = ValidationContext::new(settings.id());
    let tasks = match mode {
        RunMode::Enforce => TaskResultStore::open(context.clone(), store).await?,
        RunMode::Assessment => TaskResultStore::new(context.clone(), store),
    };
    let compensation = CompensationLog::new(context.label());

    Ok(CheckEnv {
        settings: Arc::new(settings),
        context,
        platform,
        tasks: Arc::new(tasks),
        compensation,
        pool_size,
        mode,
    })
}
