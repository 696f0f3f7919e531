use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::migration::UnitId;

/// Progress of a validation run, broadcast to interested listeners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SystemEvent {
    /// A validation group started executing its checks
    GroupStarted { unit: UnitId, group: String },
    /// A group was already recorded as succeeded by an earlier run
    GroupSkipped { unit: UnitId, group: String },
    /// A group finished and its success was recorded
    GroupCompleted {
        unit: UnitId,
        group: String,
        warnings: usize,
        at: DateTime<Utc>,
    },
    /// A group aborted; the message lists every problem found
    GroupFailed {
        unit: UnitId,
        group: String,
        message: String,
    },
    /// Registered compensating actions were executed
    CompensationExecuted { unit: UnitId, actions: Vec<String> },
}

impl SystemEvent {
    pub fn unit(&self) -> &UnitId {
        match self {
            SystemEvent::GroupStarted { unit, .. }
            | SystemEvent::GroupSkipped { unit, .. }
            | SystemEvent::GroupCompleted { unit, .. }
            | SystemEvent::GroupFailed { unit, .. }
            | SystemEvent::CompensationExecuted { unit, .. } => unit,
        }
    }
}
