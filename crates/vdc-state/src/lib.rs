//! Org VDC migration state
//!
//! The shared validation context, the idempotent task records and the
//! checkpoint persistence that makes runs resumable.

pub mod context;
pub mod error;
pub mod store;
pub mod tasks;

pub use context::{ContextKey, ContextSnapshot, KeyKind, ValidationContext};
pub use error::{ContextError, StateError};
pub use store::{Checkpoint, FileMetadataStore, InMemoryMetadataStore, MetadataStore};
pub use tasks::{SubTaskSummary, TaskRecord, TaskResultStore};

/// Result type for state operations
pub type Result<T> = std::result::Result<T, StateError>;
