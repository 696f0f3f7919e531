//! Error types for context and persistence operations

use thiserror::Error;
use vdc_migrator_core::{CheckError, MigrationError};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context key '{key}' was already written with a different value")]
    AlreadyWritten { key: &'static str },

    #[error("context key '{key}' has not been populated by an earlier check")]
    Missing { key: &'static str },

    #[error("context key '{key}' is write-once and cannot be updated in place")]
    NotCumulative { key: &'static str },

    #[error("context key '{key}' holds a value of an unexpected shape: {source}")]
    Decode {
        key: &'static str,
        source: serde_json::Error,
    },

    #[error("value for context key '{key}' cannot be encoded: {source}")]
    Encode {
        key: &'static str,
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("checkpoint for {unit} could not be persisted, resume is compromised: {message}")]
    Persistence { unit: String, message: String },

    #[error("checkpoint for {unit} is unreadable: {message}")]
    CorruptCheckpoint { unit: String, message: String },

    #[error("task '{parent}' incomplete, failed sub-tasks: {}", failures.join("; "))]
    SubTasksFailed {
        parent: String,
        failures: Vec<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ContextError> for CheckError {
    fn from(err: ContextError) -> Self {
        CheckError::Unexpected(err.into())
    }
}

impl From<StateError> for CheckError {
    fn from(err: StateError) -> Self {
        CheckError::Unexpected(err.into())
    }
}

impl From<StateError> for MigrationError {
    fn from(err: StateError) -> Self {
        MigrationError::Fatal(err.into())
    }
}
