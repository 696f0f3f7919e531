//! Merge policy turning per-check findings into one verdict per group

use chrono::Utc;
use log::{error, info, warn};
use vdc_shared_types::{Finding, Severity};

use crate::error::{CheckError, MigrationError};
use crate::outcome::CheckOutcome;
use crate::report::{GroupReport, GroupStatus};

/// What a group does with hard errors once all of its checks ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPolicy {
    /// Raise one aggregated error listing every problem
    AbortOnErrors,
    /// Record everything in the report and carry on (assessment runs)
    CollectAndContinue,
}

/// Collects findings of every check of one group.
///
/// Findings are logged as they arrive, duplicates (same severity, entity and
/// message, as produced by overlapping sub-checks) are kept once.
#[derive(Debug)]
pub struct ErrorAggregator {
    unit: String,
    group: String,
    policy: GroupPolicy,
    checks: Vec<String>,
    findings: Vec<Finding>,
}

impl ErrorAggregator {
    pub fn new(unit: impl Into<String>, group: impl Into<String>, policy: GroupPolicy) -> Self {
        Self {
            unit: unit.into(),
            group: group.into(),
            policy,
            checks: Vec::new(),
            findings: Vec::new(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn policy(&self) -> GroupPolicy {
        self.policy
    }

    pub fn record<P>(&mut self, check: &str, outcome: CheckOutcome<P>) {
        self.checks.push(check.to_string());
        for finding in outcome.into_findings() {
            self.add(check, finding);
        }
    }

    /// Expected check failures become findings; an unexpected error is handed
    /// back untouched so the caller can propagate it.
    pub fn record_error(&mut self, check: &str, err: CheckError) -> Result<(), anyhow::Error> {
        self.checks.push(check.to_string());
        match err {
            CheckError::Unexpected(source) => {
                error!(
                    "[{}] {}/{} failed unexpectedly: {:#}",
                    self.unit, self.group, check, source
                );
                Err(source)
            }
            expected => {
                if let Some(finding) = expected.as_finding() {
                    self.add(check, finding);
                }
                Ok(())
            }
        }
    }

    pub fn push(&mut self, check: &str, finding: Finding) {
        self.add(check, finding);
    }

    fn add(&mut self, check: &str, finding: Finding) {
        if self.findings.contains(&finding) {
            return;
        }
        match finding.severity {
            Severity::Advisory => info!(
                "[{}] {}/{} advisory: {}",
                self.unit, self.group, check, finding
            ),
            Severity::Warning => warn!(
                "[{}] {}/{} warning: {}",
                self.unit, self.group, check, finding
            ),
            _ => error!(
                "[{}] {}/{} {}: {}",
                self.unit, self.group, check, finding.severity, finding
            ),
        }
        self.findings.push(finding);
    }

    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity.is_blocking())
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Apply the group policy.
    pub fn finish(self) -> Result<GroupReport, MigrationError> {
        let has_errors = self.has_errors();
        if has_errors && self.policy == GroupPolicy::AbortOnErrors {
            return Err(self.into_error());
        }

        Ok(GroupReport {
            group: self.group,
            status: if has_errors {
                GroupStatus::Failed
            } else {
                GroupStatus::Passed
            },
            checks: self.checks,
            findings: self.findings,
            finished_at: Utc::now(),
        })
    }

    /// One error naming every blocking problem. Configuration errors dominate
    /// the kind, validation errors found alongside are still listed.
    pub fn into_error(self) -> MigrationError {
        let blocking: Vec<Finding> = self
            .findings
            .into_iter()
            .filter(|f| f.severity.is_blocking())
            .collect();
        let message = aggregate_message(&blocking);
        let configuration = blocking
            .iter()
            .any(|f| f.severity == Severity::ConfigurationError);

        if configuration {
            MigrationError::Configuration {
                group: self.group,
                message,
                findings: blocking,
            }
        } else {
            MigrationError::Validation {
                group: self.group,
                message,
                findings: blocking,
            }
        }
    }
}

/// Newline-joined, entity-prefixed list of findings.
pub fn aggregate_message(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| format!("  - {}", f))
        .collect::<Vec<_>>()
        .join("\n")
}
