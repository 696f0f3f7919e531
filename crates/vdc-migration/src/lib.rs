//! Org VDC migration control
//!
//! Configuration, REST access to the cloud management API and the runner
//! that drives validation groups for each configured unit.

pub mod adapter;
pub mod config;
pub mod hooks;
pub mod remote_client;
pub mod runner;
pub mod session;

pub use adapter::RestPlatformAdapter;
pub use config::{ConfigError, EndpointConfig, MigrationConfig};
pub use hooks::{ProgressLogger, ProgressStats};
pub use remote_client::{HttpRemoteClient, MockRemoteClient, RemoteClient, RemoteError};
pub use runner::Runner;
pub use session::TokenSessionProvider;

use thiserror::Error;
use vdc_event_bus::EventBusError;
use vdc_migrator_core::{AssessmentReport, MigrationError};
use vdc_migrator_state::StateError;
use vdc_shared_types::Severity;

/// Process exit codes of the control tool.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION: i32 = 1;
    pub const CONFIGURATION: i32 = 2;
    pub const FATAL: i32 = 3;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote API error: {0}")]
    Remote(#[from] RemoteError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Event bus error: {0}")]
    Event(#[from] EventBusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output error: {0}")]
    Output(String),
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => exit::CONFIGURATION,
            Error::Migration(e) => severity_exit_code(e.severity()),
            _ => exit::FATAL,
        }
    }
}

fn severity_exit_code(severity: Severity) -> i32 {
    match severity {
        Severity::Advisory | Severity::Warning => exit::SUCCESS,
        Severity::ValidationError => exit::VALIDATION,
        Severity::ConfigurationError => exit::CONFIGURATION,
        Severity::Fatal => exit::FATAL,
    }
}

/// Exit code of a finished run, from its most severe finding.
pub fn report_exit_code(report: &AssessmentReport) -> i32 {
    report
        .errors()
        .iter()
        .map(|f| severity_exit_code(f.severity))
        .max()
        .unwrap_or(exit::SUCCESS)
}

pub type Result<T> = std::result::Result<T, Error>;
