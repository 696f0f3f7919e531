//! Error types for validation runs

use thiserror::Error;
use vdc_shared_types::{Finding, Severity};

/// Error returned by a single check.
///
/// `Validation` and `Configuration` are expected outcomes that the group
/// aggregator turns into findings. Everything else travels as `Unexpected`
/// and is propagated unchanged.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{entity}: {message}")]
    Validation { entity: String, message: String },

    #[error("{entity}: {message}")]
    Configuration { entity: String, message: String },

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl CheckError {
    pub fn validation(entity: impl Into<String>, message: impl Into<String>) -> Self {
        CheckError::Validation {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn configuration(entity: impl Into<String>, message: impl Into<String>) -> Self {
        CheckError::Configuration {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// The finding for expected failures, `None` for unexpected ones.
    pub fn as_finding(&self) -> Option<Finding> {
        match self {
            CheckError::Validation { entity, message } => {
                Some(Finding::validation(entity.clone(), message.clone()))
            }
            CheckError::Configuration { entity, message } => {
                Some(Finding::configuration(entity.clone(), message.clone()))
            }
            CheckError::Unexpected(_) => None,
        }
    }
}

/// Run-level error surfaced to the CLI and report generator.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("validation failed in {group}:\n{message}")]
    Validation {
        group: String,
        message: String,
        findings: Vec<Finding>,
    },

    #[error("configuration error in {group}, fix the environment before re-running:\n{message}")]
    Configuration {
        group: String,
        message: String,
        findings: Vec<Finding>,
    },

    #[error("invalid check registry: {0}")]
    Registry(String),

    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl MigrationError {
    pub fn severity(&self) -> Severity {
        match self {
            MigrationError::Validation { .. } => Severity::ValidationError,
            MigrationError::Configuration { .. } => Severity::ConfigurationError,
            MigrationError::Registry(_) | MigrationError::Fatal(_) => Severity::Fatal,
        }
    }

    pub fn findings(&self) -> &[Finding] {
        match self {
            MigrationError::Validation { findings, .. }
            | MigrationError::Configuration { findings, .. } => findings,
            _ => &[],
        }
    }

    pub fn group(&self) -> Option<&str> {
        match self {
            MigrationError::Validation { group, .. }
            | MigrationError::Configuration { group, .. } => Some(group),
            _ => None,
        }
    }
}
