//! Result of a single validation check

use vdc_shared_types::{Finding, Severity};

/// Findings of one check plus an optional typed payload for downstream
/// consumers. An outcome without blocking findings means the check passed.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome<P = ()> {
    findings: Vec<Finding>,
    payload: Option<P>,
}

impl<P> Default for CheckOutcome<P> {
    fn default() -> Self {
        Self {
            findings: Vec::new(),
            payload: None,
        }
    }
}

impl<P> CheckOutcome<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: P) -> Self {
        Self {
            findings: Vec::new(),
            payload: Some(payload),
        }
    }

    pub fn set_payload(&mut self, payload: P) {
        self.payload = Some(payload);
    }

    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }

    pub fn take_payload(&mut self) -> Option<P> {
        self.payload.take()
    }

    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn error(&mut self, entity: impl Into<String>, message: impl Into<String>) {
        self.push(Finding::validation(entity, message));
    }

    pub fn configuration_error(&mut self, entity: impl Into<String>, message: impl Into<String>) {
        self.push(Finding::configuration(entity, message));
    }

    pub fn warning(&mut self, entity: impl Into<String>, message: impl Into<String>) {
        self.push(Finding::warning(entity, message));
    }

    pub fn advisory(&mut self, entity: impl Into<String>, message: impl Into<String>) {
        self.push(Finding::advisory(entity, message));
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }

    /// Hard failures (validation and configuration errors).
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity.is_blocking())
    }

    /// Warnings and advisories.
    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !f.severity.is_blocking())
    }

    pub fn passed(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    /// Fold a sub-check's findings into this outcome and hand back its payload.
    pub fn absorb<Q>(&mut self, other: CheckOutcome<Q>) -> Option<Q> {
        self.findings.extend(other.findings);
        other.payload
    }

    /// Drop the payload, keeping the findings.
    pub fn without_payload(self) -> CheckOutcome {
        CheckOutcome {
            findings: self.findings,
            payload: None,
        }
    }
}

impl<P> From<Vec<Finding>> for CheckOutcome<P> {
    fn from(findings: Vec<Finding>) -> Self {
        Self {
            findings,
            payload: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_outcome_passes() {
        let outcome: CheckOutcome = CheckOutcome::new();
        assert!(outcome.passed());
        assert_eq!(outcome.max_severity(), None);
    }

    #[test]
    fn test_warnings_do_not_fail_the_check() {
        let mut outcome: CheckOutcome = CheckOutcome::new();
        outcome.warning("edge-01", "BGP graceful restart differs");
        outcome.advisory("catalog-a", "re-publish manually");
        assert!(outcome.passed());
        assert_eq!(outcome.warnings().count(), 2);
        assert_eq!(outcome.max_severity(), Some(Severity::Warning));
    }

    #[test]
    fn test_absorb_returns_sub_payload() {
        let mut outcome: CheckOutcome = CheckOutcome::new();
        let mut sub = CheckOutcome::with_payload(42usize);
        sub.error("net-a", "overlaps net-b");

        assert_eq!(outcome.absorb(sub), Some(42));
        assert!(!outcome.passed());
        assert_eq!(outcome.errors().count(), 1);
    }
}
