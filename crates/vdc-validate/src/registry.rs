//! Ordered registry of validation groups

use indexmap::IndexMap;
use vdc_migrator_core::{GroupPolicy, MigrationError};

use crate::check::ValidationGroup;
use crate::checks::{
    AffinityRules, Catalogs, DisableSourceOrgVdc, DistributedFirewall, EdgeGatewayServices,
    ExternalNetworks, IndependentDisks, OrgVdcNetworks, SharedNetworks, SourceOrgVdc,
    StaticRoutes, TargetProviderVdc, Vapps,
};

pub const ORG_VDC_GROUP: &str = "orgVdcValidations";
pub const SERVICES_GROUP: &str = "servicesValidations";
pub const VAPP_GROUP: &str = "vappValidations";
pub const SHARED_NETWORK_GROUP: &str = "sharedNetworkValidations";

/// Groups run in registration order, each as one idempotent task.
#[derive(Debug, Default)]
pub struct CheckRegistry {
    groups: IndexMap<String, ValidationGroup>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group after validating its dependency graph.
    pub fn add_group(&mut self, group: ValidationGroup) -> Result<(), MigrationError> {
        if self.groups.contains_key(group.name()) {
            return Err(MigrationError::Registry(format!(
                "group '{}' registered twice",
                group.name()
            )));
        }
        group.stages()?;
        self.groups.insert(group.name().to_string(), group);
        Ok(())
    }

    pub fn groups(&self) -> impl Iterator<Item = &ValidationGroup> {
        self.groups.values()
    }

    pub fn group(&self, name: &str) -> Option<&ValidationGroup> {
        self.groups.get(name)
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    /// The production check set.
    pub fn standard() -> Result<Self, MigrationError> {
        let mut registry = Self::new();

        registry.add_group(
            ValidationGroup::new(ORG_VDC_GROUP, GroupPolicy::AbortOnErrors)
                .with_check(SourceOrgVdc)
                .with_check(TargetProviderVdc)
                .with_check(ExternalNetworks)
                .with_check(OrgVdcNetworks)
                .with_check(IndependentDisks)
                .with_check(Catalogs)
                .with_check(DisableSourceOrgVdc),
        )?;

        registry.add_group(
            ValidationGroup::new(SERVICES_GROUP, GroupPolicy::AbortOnErrors)
                .with_check(EdgeGatewayServices)
                .with_check(StaticRoutes)
                .with_check(DistributedFirewall),
        )?;

        registry.add_group(
            ValidationGroup::new(VAPP_GROUP, GroupPolicy::AbortOnErrors)
                .with_check(Vapps)
                .with_check(AffinityRules),
        )?;

        registry.add_group(
            ValidationGroup::new(SHARED_NETWORK_GROUP, GroupPolicy::AbortOnErrors)
                .with_check(SharedNetworks),
        )?;

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_order_and_stages() {
        let registry = CheckRegistry::standard().unwrap();
        assert_eq!(
            registry.group_names(),
            vec![ORG_VDC_GROUP, SERVICES_GROUP, VAPP_GROUP, SHARED_NETWORK_GROUP]
        );

        let stages = registry.group(ORG_VDC_GROUP).unwrap().stages().unwrap();
        let last = stages.last().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].name(), "disableSourceOrgVdc");
        assert!(last[0].side_effecting());

        let services = registry.group(SERVICES_GROUP).unwrap().stages().unwrap();
        assert_eq!(services[1][0].name(), "staticRoutes");
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let mut registry = CheckRegistry::new();
        registry
            .add_group(ValidationGroup::new("g", GroupPolicy::AbortOnErrors))
            .unwrap();
        assert!(registry
            .add_group(ValidationGroup::new("g", GroupPolicy::CollectAndContinue))
            .is_err());
    }
}
