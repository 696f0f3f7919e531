//! Check abstraction and dependency staging of validation groups

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use vdc_migrator_core::{CheckError, CheckOutcome, GroupPolicy, MigrationError};
use vdc_migrator_state::{TaskResultStore, ValidationContext};
use vdc_shared_types::{RunMode, UnitSettings};

use crate::compensation::CompensationLog;
use crate::platform::PlatformAdapter;
use crate::pool::PoolSize;

/// Everything a check may use for one unit. Cheap to clone.
#[derive(Clone)]
pub struct CheckEnv {
    pub settings: Arc<UnitSettings>,
    pub context: ValidationContext,
    pub platform: Arc<dyn PlatformAdapter>,
    pub tasks: Arc<TaskResultStore>,
    pub compensation: CompensationLog,
    pub pool_size: PoolSize,
    pub mode: RunMode,
}

impl CheckEnv {
    /// Label prefixed to every log line of the unit.
    pub fn label(&self) -> String {
        self.context.label()
    }

    pub fn enforcing(&self) -> bool {
        self.mode == RunMode::Enforce
    }
}

impl fmt::Debug for CheckEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckEnv")
            .field("unit", self.context.unit())
            .field("mode", &self.mode)
            .field("pool_size", &self.pool_size.get())
            .finish()
    }
}

/// One validation step.
///
/// Expected problems are reported as findings in the outcome or as a
/// `CheckError::Validation`/`Configuration`; anything else is unexpected and
/// aborts the run.
#[async_trait]
pub trait Check: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checks of the same group that must finish first.
    fn depends_on(&self) -> &'static [&'static str] {
        &[]
    }

    /// Checks that mutate the source environment. They only run in enforce
    /// mode and only while their group has no blocking finding yet.
    fn side_effecting(&self) -> bool {
        false
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError>;
}

/// Ordered set of checks sharing one verdict and one task record.
pub struct ValidationGroup {
    name: String,
    policy: GroupPolicy,
    checks: Vec<Arc<dyn Check>>,
}

impl fmt::Debug for ValidationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationGroup")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field(
                "checks",
                &self.checks.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ValidationGroup {
    pub fn new(name: impl Into<String>, policy: GroupPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            checks: Vec::new(),
        }
    }

    pub fn with_check(mut self, check: impl Check + 'static) -> Self {
        self.checks.push(Arc::new(check));
        self
    }

    pub fn add_check(&mut self, check: Arc<dyn Check>) {
        self.checks.push(check);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> GroupPolicy {
        self.policy
    }

    pub fn checks(&self) -> &[Arc<dyn Check>] {
        &self.checks
    }

    /// Dependency layers: every check of a stage depends only on checks of
    /// earlier stages. Ties keep registration order.
    pub fn stages(&self) -> Result<Vec<Vec<Arc<dyn Check>>>, MigrationError> {
        let mut names = HashSet::new();
        for check in &self.checks {
            if !names.insert(check.name()) {
                return Err(MigrationError::Registry(format!(
                    "check '{}' registered twice in group '{}'",
                    check.name(),
                    self.name
                )));
            }
        }
        for check in &self.checks {
            for dep in check.depends_on() {
                if !names.contains(dep) {
                    return Err(MigrationError::Registry(format!(
                        "check '{}' in group '{}' depends on unknown check '{}'",
                        check.name(),
                        self.name,
                        dep
                    )));
                }
            }
        }

        let mut placed: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&Arc<dyn Check>> = self.checks.iter().collect();
        let mut stages = Vec::new();
        while !remaining.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = remaining
                .into_iter()
                .partition(|check| check.depends_on().iter().all(|dep| placed.contains(dep)));

            if ready.is_empty() {
                let cycle: Vec<&str> = blocked.iter().map(|c| c.name()).collect();
                return Err(MigrationError::Registry(format!(
                    "dependency cycle in group '{}' between: {}",
                    self.name,
                    cycle.join(", ")
                )));
            }

            placed.extend(ready.iter().map(|c| c.name()));
            stages.push(ready.into_iter().cloned().collect());
            remaining = blocked;
        }
        Ok(stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, &'static [&'static str]);

    #[async_trait]
    impl Check for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn depends_on(&self) -> &'static [&'static str] {
            self.1
        }

        async fn run(&self, _env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
            Ok(CheckOutcome::new())
        }
    }

    fn stage_names(group: &ValidationGroup) -> Vec<Vec<&'static str>> {
        group
            .stages()
            .unwrap()
            .iter()
            .map(|stage| stage.iter().map(|c| c.name()).collect())
            .collect()
    }

    #[test]
    fn test_stages_follow_dependencies_and_keep_order() {
        let group = ValidationGroup::new("g", GroupPolicy::AbortOnErrors)
            .with_check(Named("c", &["a"]))
            .with_check(Named("a", &[]))
            .with_check(Named("b", &[]))
            .with_check(Named("d", &["c", "b"]));

        assert_eq!(
            stage_names(&group),
            vec![vec!["a", "b"], vec!["c"], vec!["d"]]
        );
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let group = ValidationGroup::new("g", GroupPolicy::AbortOnErrors)
            .with_check(Named("a", &["missing"]));
        let Err(err) = group.stages() else {
            panic!("unknown dependency accepted");
        };
        assert!(err.to_string().contains("unknown check 'missing'"));
    }

    #[test]
    fn test_cycle_rejected() {
        let group = ValidationGroup::new("g", GroupPolicy::AbortOnErrors)
            .with_check(Named("root", &[]))
            .with_check(Named("a", &["b"]))
            .with_check(Named("b", &["a"]));
        let Err(err) = group.stages() else {
            panic!("cycle accepted");
        };
        assert!(matches!(err, MigrationError::Registry(_)));
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let group = ValidationGroup::new("g", GroupPolicy::AbortOnErrors)
            .with_check(Named("a", &[]))
            .with_check(Named("a", &[]));
        assert!(group.stages().is_err());
    }
}
