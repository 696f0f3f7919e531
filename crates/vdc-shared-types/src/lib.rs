pub mod error;
pub mod events;
pub mod findings;
pub mod migration;
pub mod tasks;

pub use error::{SharedResult, SharedTypeError};
pub use events::SystemEvent;
pub use findings::{Finding, Severity};
pub use migration::{FeatureFlags, RunMode, UnitId, UnitSettings};
pub use tasks::TaskStatus;
