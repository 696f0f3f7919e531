//! Per-group and per-run result structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vdc_shared_types::{Finding, RunMode, Severity, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupStatus {
    Passed,
    Failed,
    /// Already recorded as succeeded by an earlier run
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub group: String,
    pub status: GroupStatus,
    /// Checks that ran, in completion order of their stages
    pub checks: Vec<String>,
    pub findings: Vec<Finding>,
    pub finished_at: DateTime<Utc>,
}

impl GroupReport {
    pub fn skipped(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            status: GroupStatus::Skipped,
            checks: Vec::new(),
            findings: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }
}

/// Everything one run found for one migration unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentReport {
    pub run_id: Uuid,
    pub unit: UnitId,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub groups: Vec<GroupReport>,
}

impl AssessmentReport {
    pub fn new(unit: UnitId, mode: RunMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            unit,
            mode,
            started_at: Utc::now(),
            finished_at: None,
            groups: Vec::new(),
        }
    }

    pub fn push(&mut self, group: GroupReport) {
        self.groups.push(group);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.groups.iter().flat_map(|g| g.findings.iter())
    }

    pub fn errors(&self) -> Vec<&Finding> {
        self.findings().filter(|f| f.severity.is_blocking()).collect()
    }

    pub fn warnings(&self) -> Vec<&Finding> {
        self.findings()
            .filter(|f| f.severity == Severity::Warning)
            .collect()
    }

    pub fn advisories(&self) -> Vec<&Finding> {
        self.findings()
            .filter(|f| f.severity == Severity::Advisory)
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.errors().is_empty()
            && self
                .groups
                .iter()
                .all(|g| g.status != GroupStatus::Failed)
    }

    pub fn group(&self, name: &str) -> Option<&GroupReport> {
        self.groups.iter().find(|g| g.group == name)
    }

    /// Human readable multi-line summary for the CLI.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Unit {} ({:?}): {} error(s), {} warning(s), {} advisory note(s)",
            self.unit,
            self.mode,
            self.errors().len(),
            self.warnings().len(),
            self.advisories().len()
        )];
        for group in &self.groups {
            lines.push(format!("  {} [{:?}]", group.group, group.status));
            for finding in &group.findings {
                lines.push(format!("    {:<20} {}", finding.severity.as_str(), finding));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_by_severity() {
        let mut report = AssessmentReport::new(UnitId::new("acme", "vdc"), RunMode::Assessment);
        report.push(GroupReport {
            group: "servicesValidations".into(),
            status: GroupStatus::Passed,
            checks: vec!["edgeGatewayServices".into()],
            findings: vec![
                Finding::warning("edge-01", "ssh enabled"),
                Finding::advisory("syslog", "reconfigure"),
            ],
            finished_at: Utc::now(),
        });
        report.push(GroupReport::skipped("orgVdcValidations"));

        assert!(report.is_success());
        assert_eq!(report.warnings().len(), 1);
        assert_eq!(report.advisories().len(), 1);
        assert!(report.summary().contains("edge-01: ssh enabled"));
        assert_eq!(
            report.group("orgVdcValidations").unwrap().status,
            GroupStatus::Skipped
        );
    }
}
