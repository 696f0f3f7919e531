//! Platform seam: what the checks need to know about the source environment
//!
//! The checks never talk HTTP. They ask a [`PlatformAdapter`] for typed
//! entities and call its two guarded mutations; the REST implementation lives
//! with the CLI, tests use [`crate::fake::FakePlatform`].

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use vdc_shared_types::UnitId;

/// Networking backend an entity is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backing {
    /// The backend being migrated away from
    Legacy,
    /// The backend being migrated to
    Overlay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgVdc {
    pub id: String,
    pub name: String,
    pub org: String,
    pub enabled: bool,
    pub backing: Backing,
    pub provider_vdc: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPool {
    pub name: String,
    pub backing: Backing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderVdc {
    pub name: String,
    pub enabled: bool,
    pub backing: Backing,
    pub network_pool: Option<NetworkPool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeGateway {
    pub id: String,
    pub name: String,
    /// Names of the external networks this gateway is connected to
    pub uplinks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalNetwork {
    pub name: String,
    pub backing: Backing,
    /// Backed by a tier-0 router on the target side
    #[serde(default)]
    pub tier0_backed: bool,
    #[serde(default)]
    pub subnets: Vec<IpNet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NetworkKind {
    Routed { gateway: String },
    Isolated,
    Direct { external_network: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgVdcNetwork {
    pub id: String,
    pub name: String,
    pub kind: NetworkKind,
    pub subnet: IpNet,
    #[serde(default)]
    pub shared: bool,
    /// Routed through the distributed router rather than the gateway itself
    #[serde(default = "default_true")]
    pub distributed: bool,
}

fn default_true() -> bool {
    true
}

impl OrgVdcNetwork {
    pub fn gateway(&self) -> Option<&str> {
        match &self.kind {
            NetworkKind::Routed { gateway } => Some(gateway),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndependentDisk {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub attached_vms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub name: String,
    #[serde(default)]
    pub published: bool,
}

/// Services configured on an edge gateway, fetched one by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatewayService {
    Dhcp,
    Firewall,
    Nat,
    Routing,
    LoadBalancer,
    Dns,
    Syslog,
    Ssh,
    Ipsec,
    L2Vpn,
    SslVpn,
}

impl GatewayService {
    pub const ALL: [GatewayService; 11] = [
        GatewayService::Dhcp,
        GatewayService::Firewall,
        GatewayService::Nat,
        GatewayService::Routing,
        GatewayService::LoadBalancer,
        GatewayService::Dns,
        GatewayService::Syslog,
        GatewayService::Ssh,
        GatewayService::Ipsec,
        GatewayService::L2Vpn,
        GatewayService::SslVpn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayService::Dhcp => "dhcp",
            GatewayService::Firewall => "firewall",
            GatewayService::Nat => "nat",
            GatewayService::Routing => "routing",
            GatewayService::LoadBalancer => "load-balancer",
            GatewayService::Dns => "dns",
            GatewayService::Syslog => "syslog",
            GatewayService::Ssh => "ssh",
            GatewayService::Ipsec => "ipsec",
            GatewayService::L2Vpn => "l2-vpn",
            GatewayService::SslVpn => "ssl-vpn",
        }
    }
}

impl fmt::Display for GatewayService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpConfig {
    pub enabled: bool,
    pub local_as: u32,
    #[serde(default)]
    pub graceful_restart: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub network: IpNet,
    pub next_hop: IpAddr,
}

/// Configuration of one service on one gateway.
///
/// `unsupported` lists the configured items the target backend has no
/// equivalent for (a DHCP relay, a NAT64 rule, ...), as reported by the
/// platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service: GatewayService,
    pub enabled: bool,
    #[serde(default)]
    pub rule_count: usize,
    #[serde(default)]
    pub unsupported: Vec<String>,
    #[serde(default)]
    pub bgp: Option<BgpConfig>,
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
}

impl ServiceConfig {
    pub fn disabled(service: GatewayService) -> Self {
        Self {
            service,
            enabled: false,
            rule_count: 0,
            unsupported: Vec::new(),
            bgp: None,
            static_routes: Vec::new(),
        }
    }

    pub fn enabled(service: GatewayService) -> Self {
        Self {
            enabled: true,
            ..Self::disabled(service)
        }
    }
}

/// Reference from a distributed firewall rule to some grouping object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DfwObject {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DfwRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sources: Vec<DfwObject>,
    #[serde(default)]
    pub destinations: Vec<DfwObject>,
    #[serde(default)]
    pub applied_to: Vec<DfwObject>,
}

impl DfwRule {
    pub fn objects(&self) -> impl Iterator<Item = &DfwObject> {
        self.sources
            .iter()
            .chain(self.destinations.iter())
            .chain(self.applied_to.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VappSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VappNetworkKind {
    Bridged { parent: String },
    Routed { parent: Option<String> },
    Isolated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VappNetwork {
    pub name: String,
    pub kind: VappNetworkKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VmPowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub name: String,
    pub power_state: VmPowerState,
    #[serde(default)]
    pub media_attached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vapp {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fenced: bool,
    #[serde(default)]
    pub networks: Vec<VappNetwork>,
    #[serde(default)]
    pub vms: Vec<Vm>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

/// A vApp attached to an Org VDC network.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkConsumer {
    pub org: String,
    pub org_vdc: String,
    pub vapp: String,
}

/// Typed queries and guarded mutations against the cloud management platform.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    async fn get_org_vdc(&self, unit: &UnitId) -> anyhow::Result<OrgVdc>;
    async fn get_provider_vdc(&self, name: &str) -> anyhow::Result<Option<ProviderVdc>>;
    async fn list_edge_gateways(&self, org_vdc_id: &str) -> anyhow::Result<Vec<EdgeGateway>>;
    async fn list_external_networks(&self) -> anyhow::Result<Vec<ExternalNetwork>>;
    async fn list_org_vdc_networks(&self, org_vdc_id: &str) -> anyhow::Result<Vec<OrgVdcNetwork>>;
    async fn list_independent_disks(&self, org_vdc_id: &str)
        -> anyhow::Result<Vec<IndependentDisk>>;
    async fn list_catalogs(&self, org: &str) -> anyhow::Result<Vec<Catalog>>;
    async fn get_gateway_service(
        &self,
        gateway_id: &str,
        service: GatewayService,
    ) -> anyhow::Result<ServiceConfig>;
    async fn list_dfw_rules(&self, org_vdc_id: &str) -> anyhow::Result<Vec<DfwRule>>;
    async fn list_vapps(&self, org_vdc_id: &str) -> anyhow::Result<Vec<VappSummary>>;
    async fn get_vapp(&self, vapp_id: &str) -> anyhow::Result<Vapp>;
    async fn list_affinity_rules(&self, org_vdc_id: &str) -> anyhow::Result<Vec<AffinityRule>>;
    async fn list_network_consumers(&self, network_id: &str)
        -> anyhow::Result<Vec<NetworkConsumer>>;

    async fn set_org_vdc_enabled(&self, org_vdc_id: &str, enabled: bool) -> anyhow::Result<()>;
    async fn set_affinity_rule_enabled(&self, rule_id: &str, enabled: bool) -> anyhow::Result<()>;
}

/// Keeps the remote session of a unit alive. Called before every group.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn ensure_valid_session(&self, unit: &UnitId) -> anyhow::Result<()>;
}

/// Session provider for platforms that need no login.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSession;

#[async_trait]
impl SessionProvider for NoSession {
    async fn ensure_valid_session(&self, _unit: &UnitId) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_decodes_with_defaults() {
        let network: OrgVdcNetwork = serde_json::from_str(
            r#"{"id":"n1","name":"web","kind":{"type":"routed","gateway":"edge-01"},
                "subnet":"10.0.1.0/24"}"#,
        )
        .unwrap();
        assert_eq!(network.gateway(), Some("edge-01"));
        assert!(network.distributed);
        assert!(!network.shared);
    }

    #[test]
    fn test_service_names() {
        assert_eq!(GatewayService::ALL.len(), 11);
        assert_eq!(GatewayService::LoadBalancer.to_string(), "load-balancer");
        assert_eq!(
            serde_json::to_string(&GatewayService::SslVpn).unwrap(),
            "\"ssl-vpn\""
        );
    }
}
