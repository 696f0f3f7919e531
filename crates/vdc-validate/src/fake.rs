//! In-memory platform for tests and offline demos
//!
//! Every call is recorded as `"<method>:<argument>"`; any such key can be
//! made to fail with [`FakePlatform::fail_on`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use vdc_shared_types::UnitId;

use crate::platform::{
    AffinityRule, Catalog, DfwRule, EdgeGateway, ExternalNetwork, GatewayService,
    IndependentDisk, NetworkConsumer, OrgVdc, OrgVdcNetwork, PlatformAdapter, ProviderVdc,
    ServiceConfig, Vapp, VappSummary,
};

#[derive(Default)]
struct FakeState {
    org_vdc: Option<OrgVdc>,
    provider_vdcs: BTreeMap<String, ProviderVdc>,
    gateways: Vec<EdgeGateway>,
    external_networks: Vec<ExternalNetwork>,
    networks: Vec<OrgVdcNetwork>,
    disks: Vec<IndependentDisk>,
    catalogs: Vec<Catalog>,
    services: HashMap<(String, GatewayService), ServiceConfig>,
    dfw_rules: Vec<DfwRule>,
    vapps: Vec<Vapp>,
    affinity_rules: Vec<AffinityRule>,
    consumers: HashMap<String, Vec<NetworkConsumer>>,
    failing: HashSet<String>,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn new(org_vdc: OrgVdc) -> Self {
        let platform = Self::default();
        platform.lock().org_vdc = Some(org_vdc);
        platform
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_provider_vdc(self, provider_vdc: ProviderVdc) -> Self {
        self.lock()
            .provider_vdcs
            .insert(provider_vdc.name.clone(), provider_vdc);
        self
    }

    pub fn with_gateway(self, gateway: EdgeGateway) -> Self {
        self.lock().gateways.push(gateway);
        self
    }

    pub fn with_external_network(self, network: ExternalNetwork) -> Self {
        self.lock().external_networks.push(network);
        self
    }

    pub fn with_network(self, network: OrgVdcNetwork) -> Self {
        self.lock().networks.push(network);
        self
    }

    pub fn with_disk(self, disk: IndependentDisk) -> Self {
        self.lock().disks.push(disk);
        self
    }

    pub fn with_catalog(self, catalog: Catalog) -> Self {
        self.lock().catalogs.push(catalog);
        self
    }

    /// Services not configured here are reported as disabled.
    pub fn with_service(self, gateway_id: &str, config: ServiceConfig) -> Self {
        self.lock()
            .services
            .insert((gateway_id.to_string(), config.service), config);
        self
    }

    pub fn with_dfw_rule(self, rule: DfwRule) -> Self {
        self.lock().dfw_rules.push(rule);
        self
    }

    pub fn with_vapp(self, vapp: Vapp) -> Self {
        self.lock().vapps.push(vapp);
        self
    }

    pub fn with_affinity_rule(self, rule: AffinityRule) -> Self {
        self.lock().affinity_rules.push(rule);
        self
    }

    pub fn with_consumers(self, network_id: &str, consumers: Vec<NetworkConsumer>) -> Self {
        self.lock()
            .consumers
            .insert(network_id.to_string(), consumers);
        self
    }

    /// Make calls recorded as `call` fail, e.g. `"get_vapp:vapp-2"`.
    pub fn fail_on(&self, call: impl Into<String>) {
        self.lock().failing.insert(call.into());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn org_vdc_enabled(&self) -> Option<bool> {
        self.lock().org_vdc.as_ref().map(|v| v.enabled)
    }

    pub fn affinity_rule_enabled(&self, rule_id: &str) -> Option<bool> {
        self.lock()
            .affinity_rules
            .iter()
            .find(|r| r.id == rule_id)
            .map(|r| r.enabled)
    }

    /// Record the call and fail it when configured to.
    fn enter(&self, method: &str, argument: &str) -> anyhow::Result<std::sync::MutexGuard<'_, FakeState>> {
        let call = format!("{}:{}", method, argument);
        let mut state = self.lock();
        state.calls.push(call.clone());
        if state.failing.contains(&call) {
            bail!("injected failure for {}", call);
        }
        Ok(state)
    }
}

#[async_trait]
impl PlatformAdapter for FakePlatform {
    async fn get_org_vdc(&self, unit: &UnitId) -> anyhow::Result<OrgVdc> {
        let state = self.enter("get_org_vdc", &unit.org_vdc)?;
        state
            .org_vdc
            .clone()
            .filter(|v| v.name == unit.org_vdc)
            .ok_or_else(|| anyhow!("Org VDC '{}' not found", unit))
    }

    async fn get_provider_vdc(&self, name: &str) -> anyhow::Result<Option<ProviderVdc>> {
        let state = self.enter("get_provider_vdc", name)?;
        Ok(state.provider_vdcs.get(name).cloned())
    }

    async fn list_edge_gateways(&self, org_vdc_id: &str) -> anyhow::Result<Vec<EdgeGateway>> {
        Ok(self.enter("list_edge_gateways", org_vdc_id)?.gateways.clone())
    }

    async fn list_external_networks(&self) -> anyhow::Result<Vec<ExternalNetwork>> {
        Ok(self.enter("list_external_networks", "")?.external_networks.clone())
    }

    async fn list_org_vdc_networks(&self, org_vdc_id: &str) -> anyhow::Result<Vec<OrgVdcNetwork>> {
        Ok(self.enter("list_org_vdc_networks", org_vdc_id)?.networks.clone())
    }

    async fn list_independent_disks(
        &self,
        org_vdc_id: &str,
    ) -> anyhow::Result<Vec<IndependentDisk>> {
        Ok(self.enter("list_independent_disks", org_vdc_id)?.disks.clone())
    }

    async fn list_catalogs(&self, org: &str) -> anyhow::Result<Vec<Catalog>> {
        Ok(self.enter("list_catalogs", org)?.catalogs.clone())
    }

    async fn get_gateway_service(
        &self,
        gateway_id: &str,
        service: GatewayService,
    ) -> anyhow::Result<ServiceConfig> {
        let state = self.enter(
            "get_gateway_service",
            &format!("{}/{}", gateway_id, service),
        )?;
        Ok(state
            .services
            .get(&(gateway_id.to_string(), service))
            .cloned()
            .unwrap_or_else(|| ServiceConfig::disabled(service)))
    }

    async fn list_dfw_rules(&self, org_vdc_id: &str) -> anyhow::Result<Vec<DfwRule>> {
        Ok(self.enter("list_dfw_rules", org_vdc_id)?.dfw_rules.clone())
    }

    async fn list_vapps(&self, org_vdc_id: &str) -> anyhow::Result<Vec<VappSummary>> {
        let state = self.enter("list_vapps", org_vdc_id)?;
        Ok(state
            .vapps
            .iter()
            .map(|v| VappSummary {
                id: v.id.clone(),
                name: v.name.clone(),
            })
            .collect())
    }

    async fn get_vapp(&self, vapp_id: &str) -> anyhow::Result<Vapp> {
        let state = self.enter("get_vapp", vapp_id)?;
        state
            .vapps
            .iter()
            .find(|v| v.id == vapp_id)
            .cloned()
            .ok_or_else(|| anyhow!("vApp '{}' not found", vapp_id))
    }

    async fn list_affinity_rules(&self, org_vdc_id: &str) -> anyhow::Result<Vec<AffinityRule>> {
        Ok(self.enter("list_affinity_rules", org_vdc_id)?.affinity_rules.clone())
    }

    async fn list_network_consumers(
        &self,
        network_id: &str,
    ) -> anyhow::Result<Vec<NetworkConsumer>> {
        let state = self.enter("list_network_consumers", network_id)?;
        Ok(state.consumers.get(network_id).cloned().unwrap_or_default())
    }

    async fn set_org_vdc_enabled(&self, org_vdc_id: &str, enabled: bool) -> anyhow::Result<()> {
        let mut state = self.enter("set_org_vdc_enabled", &format!("{}={}", org_vdc_id, enabled))?;
        match state.org_vdc.as_mut().filter(|v| v.id == org_vdc_id) {
            Some(org_vdc) => {
                org_vdc.enabled = enabled;
                Ok(())
            }
            None => bail!("Org VDC '{}' not found", org_vdc_id),
        }
    }

    async fn set_affinity_rule_enabled(&self, rule_id: &str, enabled: bool) -> anyhow::Result<()> {
        let mut state = self.enter(
            "set_affinity_rule_enabled",
            &format!("{}={}", rule_id, enabled),
        )?;
        match state.affinity_rules.iter_mut().find(|r| r.id == rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                Ok(())
            }
            None => bail!("affinity rule '{}' not found", rule_id),
        }
    }
}
