//! Context keys written and read by the checks
//!
//! Discovery keys are written by exactly one check; checks reading them
//! declare that check as a dependency. Cumulative keys collect contributions
//! from concurrent workers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use vdc_migrator_state::ContextKey;

use crate::platform::{EdgeGateway, NetworkConsumer, OrgVdc, OrgVdcNetwork, ProviderVdc, StaticRoute};

/// Two Org VDC networks whose subnets overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConflict {
    pub first: String,
    pub second: String,
}

/// How one gateway's routing configuration will be carried over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub bgp_enabled: bool,
    pub migrate_bgp: bool,
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
}

pub const SOURCE_ORG_VDC: ContextKey<OrgVdc> = ContextKey::discovery("sourceOrgVdc");

pub const SOURCE_EDGE_GATEWAYS: ContextKey<Vec<EdgeGateway>> =
    ContextKey::discovery("sourceEdgeGateways");

pub const TARGET_PROVIDER_VDC: ContextKey<ProviderVdc> = ContextKey::discovery("targetProviderVdc");

/// Source external network to target external network, for every uplink in use
pub const EXTERNAL_NETWORK_MAPPINGS: ContextKey<BTreeMap<String, String>> =
    ContextKey::discovery("externalNetworkMappings");

pub const IS_T0_CONNECTED: ContextKey<bool> = ContextKey::discovery("isT0Connected");

pub const ORG_VDC_NETWORKS: ContextKey<Vec<OrgVdcNetwork>> = ContextKey::discovery("orgVdcNetworks");

pub const CONFLICT_NETWORKS: ContextKey<Vec<NetworkConflict>> =
    ContextKey::discovery("conflictNetworks");

/// Gateway name to routing decision, one entry per gateway worker
pub const GATEWAY_ROUTING: ContextKey<BTreeMap<String, RoutingDecision>> =
    ContextKey::cumulative("gatewayRouting");

/// Shared network name to the vApps of other Org VDCs attached to it
pub const SHARED_NETWORK_CONSUMERS: ContextKey<BTreeMap<String, Vec<NetworkConsumer>>> =
    ContextKey::discovery("sharedNetworkConsumers");

/// Set just before this tool disables the Org VDC; cleared when re-enabled.
pub const ORG_VDC_DISABLED_BY_TOOL: ContextKey<bool> = ContextKey::cumulative("orgVdcDisabledByTool");

/// Ids of affinity rules this tool disabled and has not re-enabled yet.
pub const AFFINITY_RULES_DISABLED_BY_TOOL: ContextKey<BTreeSet<String>> =
    ContextKey::cumulative("affinityRulesDisabledByTool");
