use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SharedTypeError;

/// Problem classes, declared in ascending order of severity so that `Ord`
/// compares them the way the aggregation policy does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// Manual follow-up after migration, never blocks it
    Advisory,
    /// Degraded but functional outcome
    Warning,
    /// Fixable by the operator changing the input configuration
    ValidationError,
    /// The environment must be fixed outside of the migration tool
    ConfigurationError,
    /// Unexpected failure
    Fatal,
}

impl Severity {
    /// Whether findings of this severity abort a group in enforce mode.
    pub fn is_blocking(self) -> bool {
        self >= Severity::ValidationError
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Advisory => "advisory",
            Severity::Warning => "warning",
            Severity::ValidationError => "validation-error",
            Severity::ConfigurationError => "configuration-error",
            Severity::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = SharedTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "advisory" => Ok(Severity::Advisory),
            "warning" => Ok(Severity::Warning),
            "validation-error" | "validation" => Ok(Severity::ValidationError),
            "configuration-error" | "configuration" => Ok(Severity::ConfigurationError),
            "fatal" => Ok(Severity::Fatal),
            _ => Err(SharedTypeError::InvalidValue {
                field: "severity",
                value: s.to_string(),
            }),
        }
    }
}

/// A single classified problem, tagged with the entity it was found on
/// (gateway name, network name, rule id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub entity: String,
    pub message: String,
}

impl Finding {
    pub fn new(severity: Severity, entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn advisory(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Advisory, entity, message)
    }

    pub fn warning(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, entity, message)
    }

    pub fn validation(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::ValidationError, entity, message)
    }

    pub fn configuration(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::ConfigurationError, entity, message)
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entity.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.entity, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Advisory < Severity::Warning);
        assert!(Severity::Warning < Severity::ValidationError);
        assert!(Severity::ValidationError < Severity::ConfigurationError);
        assert!(Severity::ConfigurationError < Severity::Fatal);
        assert!(!Severity::Warning.is_blocking());
        assert!(Severity::ValidationError.is_blocking());
    }

    #[test]
    fn test_severity_parsing() {
        assert_eq!(
            "validation_error".parse::<Severity>().unwrap(),
            Severity::ValidationError
        );
        assert_eq!("Warning".parse::<Severity>().unwrap(), Severity::Warning);
        assert!("bogus".parse::<Severity>().is_err());
    }

    #[test]
    fn test_finding_display_carries_entity() {
        let finding = Finding::validation("vapp-web", "fencing is enabled");
        assert_eq!(finding.to_string(), "vapp-web: fencing is enabled");
        assert_eq!(Finding::warning("", "bare").to_string(), "bare");
    }
}
