use serde::{Deserialize, Serialize};

/// Lifecycle of a named idempotent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_succeeded(self) -> bool {
        matches!(self, TaskStatus::Succeeded)
    }

    /// Outcome of a finished attempt.
    pub fn from_outcome(success: bool) -> Self {
        if success {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Failed
        }
    }
}
