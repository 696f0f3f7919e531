//! Org VDC migration core
//!
//! The error taxonomy, per-check outcomes and the policy that merges many
//! small finding lists into one verdict per validation group.

pub mod aggregate;
pub mod error;
pub mod outcome;
pub mod report;

pub use aggregate::{ErrorAggregator, GroupPolicy};
pub use error::{CheckError, MigrationError};
pub use outcome::CheckOutcome;
pub use report::{AssessmentReport, GroupReport, GroupStatus};
pub use vdc_shared_types::{Finding, Severity};

/// Result type for run-level operations
pub type Result<T> = std::result::Result<T, MigrationError>;
