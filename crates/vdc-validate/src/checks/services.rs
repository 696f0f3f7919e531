//! Edge gateway services, static routing and the distributed firewall

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use ipnet::IpNet;
use log::debug;
use vdc_migrator_core::{CheckError, CheckOutcome};

use crate::check::{Check, CheckEnv};
use crate::keys::{
    RoutingDecision, GATEWAY_ROUTING, IS_T0_CONNECTED, ORG_VDC_NETWORKS, SOURCE_EDGE_GATEWAYS,
    SOURCE_ORG_VDC,
};
use crate::platform::{EdgeGateway, GatewayService, ServiceConfig};
use crate::pool::WorkerPool;

/// Grouping objects the target firewall can express.
const SUPPORTED_DFW_OBJECTS: [&str; 5] = ["ip-set", "security-group", "network", "vm", "vapp"];

/// Fetches every service of every gateway, one pool item per gateway and one
/// nested pool item per service.
pub struct EdgeGatewayServices;

#[async_trait]
impl Check for EdgeGatewayServices {
    fn name(&self) -> &'static str {
        "edgeGatewayServices"
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let gateways = env.context.require(&SOURCE_EDGE_GATEWAYS)?;
        let t0_connected = env.context.get(&IS_T0_CONNECTED)?.unwrap_or(false);
        // decisions of a resumed run may name gateways that no longer exist
        env.context.update(&GATEWAY_ROUTING, |decisions| decisions.clear())?;

        let mut pool: WorkerPool<CheckOutcome> = WorkerPool::new(env.label(), &env.pool_size);
        for gateway in &gateways {
            let env = env.clone();
            let gateway = gateway.clone();
            pool.spawn(gateway.name.clone(), async move {
                inspect_gateway(&env, &gateway, t0_connected).await
            });
        }
        pool.join().await;

        if pool.any_failed() {
            return Err(anyhow!(
                "{} of {} edge gateway(s) could not be inspected: {}",
                pool.failures().len(),
                gateways.len(),
                pool.failure_summary()
            )
            .into());
        }

        let mut results = pool.into_results();
        let mut outcome = CheckOutcome::new();
        for gateway in &gateways {
            if let Some(gateway_outcome) = results.remove(&gateway.name) {
                outcome.absorb(gateway_outcome);
            }
        }
        Ok(outcome)
    }
}

async fn inspect_gateway(
    env: &CheckEnv,
    gateway: &EdgeGateway,
    t0_connected: bool,
) -> Result<CheckOutcome, CheckError> {
    let mut fetches: WorkerPool<ServiceConfig> =
        WorkerPool::new(format!("{} {}", env.label(), gateway.name), &env.pool_size);
    for service in GatewayService::ALL {
        let platform = Arc::clone(&env.platform);
        let gateway_id = gateway.id.clone();
        fetches.spawn(service.as_str(), async move {
            let config = platform.get_gateway_service(&gateway_id, service).await?;
            Ok::<_, CheckError>(config)
        });
    }
    fetches.join().await;
    if fetches.any_failed() {
        return Err(anyhow!("{}", fetches.failure_summary()).into());
    }

    let configs = fetches.into_results();
    let mut outcome = CheckOutcome::new();
    let mut routing = RoutingDecision::default();
    for service in GatewayService::ALL {
        if let Some(config) = configs.get(service.as_str()) {
            classify_service(env, gateway, config, t0_connected, &mut outcome, &mut routing);
        }
    }

    debug!(
        "[{}] {}: bgp={} migrate_bgp={} static_routes={}",
        env.label(),
        gateway.name,
        routing.bgp_enabled,
        routing.migrate_bgp,
        routing.static_routes.len()
    );
    env.context.update(&GATEWAY_ROUTING, |decisions| {
        decisions.insert(gateway.name.clone(), routing);
    })?;
    Ok(outcome)
}

fn classify_service(
    env: &CheckEnv,
    gateway: &EdgeGateway,
    config: &ServiceConfig,
    t0_connected: bool,
    outcome: &mut CheckOutcome,
    routing: &mut RoutingDecision,
) {
    let entity = gateway.name.as_str();
    if config.service == GatewayService::Routing {
        // static routes are configured independently of dynamic routing
        routing.static_routes = config.static_routes.clone();
    }
    if !config.enabled {
        return;
    }

    for item in &config.unsupported {
        outcome.error(
            entity,
            format!("{}: {} is not supported on the target backend", config.service, item),
        );
    }

    match config.service {
        GatewayService::Routing => {
            let Some(bgp) = config.bgp.as_ref().filter(|bgp| bgp.enabled) else {
                return;
            };
            routing.bgp_enabled = true;
            if env.settings.features.skip_bgp_migration {
                outcome.advisory(
                    entity,
                    format!("BGP (AS {}) is configured and will not be migrated", bgp.local_as),
                );
                return;
            }
            routing.migrate_bgp = true;
            if !t0_connected {
                outcome.error(
                    entity,
                    "BGP cannot be migrated, no mapped external network is backed by a tier-0 router",
                );
            }
            if bgp.graceful_restart {
                outcome.warning(
                    entity,
                    "BGP graceful restart timers differ on the target and should be reviewed",
                );
            }
        }
        GatewayService::LoadBalancer => outcome.warning(
            entity,
            "load balancer virtual services need a service engine group on the target",
        ),
        GatewayService::Syslog => outcome.advisory(
            entity,
            "syslog servers must be configured again after migration",
        ),
        GatewayService::Ssh => outcome.warning(
            entity,
            "SSH access to the gateway is not available on the target backend",
        ),
        GatewayService::L2Vpn | GatewayService::SslVpn => outcome.error(
            entity,
            format!("{} is enabled and has no equivalent on the target backend", config.service),
        ),
        GatewayService::Dhcp
        | GatewayService::Firewall
        | GatewayService::Nat
        | GatewayService::Dns
        | GatewayService::Ipsec => {}
    }
}

pub struct StaticRoutes;

#[async_trait]
impl Check for StaticRoutes {
    fn name(&self) -> &'static str {
        "staticRoutes"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["edgeGatewayServices"]
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let routing = env.context.get(&GATEWAY_ROUTING)?.unwrap_or_default();
        if routing.values().all(|decision| decision.static_routes.is_empty()) {
            return Ok(CheckOutcome::new());
        }

        let gateways = env.context.require(&SOURCE_EDGE_GATEWAYS)?;
        let networks = env.context.require(&ORG_VDC_NETWORKS)?;
        let external: HashMap<String, Vec<IpNet>> = env
            .platform
            .list_external_networks()
            .await?
            .into_iter()
            .map(|n| (n.name, n.subnets))
            .collect();

        let mut outcome = CheckOutcome::new();
        for gateway in &gateways {
            let Some(decision) = routing.get(&gateway.name) else {
                continue;
            };
            let mut reachable: Vec<IpNet> = networks
                .iter()
                .filter(|n| n.gateway() == Some(gateway.name.as_str()))
                .map(|n| n.subnet)
                .collect();
            for uplink in &gateway.uplinks {
                reachable.extend(external.get(uplink).into_iter().flatten().copied());
            }

            for route in &decision.static_routes {
                if !reachable.iter().any(|net| net.contains(&route.next_hop)) {
                    outcome.error(
                        &gateway.name,
                        format!(
                            "static route {} has next hop {} outside every connected network",
                            route.network, route.next_hop
                        ),
                    );
                }
            }
        }
        Ok(outcome)
    }
}

pub struct DistributedFirewall;

#[async_trait]
impl Check for DistributedFirewall {
    fn name(&self) -> &'static str {
        "distributedFirewall"
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let org_vdc = env.context.require(&SOURCE_ORG_VDC)?;
        let rules = env.platform.list_dfw_rules(&org_vdc.id).await?;

        let mut outcome = CheckOutcome::new();
        let limit = env.settings.features.dfw_rule_limit;
        if rules.len() > limit {
            outcome.warning(
                "distributed firewall",
                format!("{} rules exceed the limit of {} per Org VDC", rules.len(), limit),
            );
        }

        for rule in &rules {
            let unsupported: Vec<String> = rule
                .objects()
                .filter(|o| !SUPPORTED_DFW_OBJECTS.contains(&o.kind.as_str()))
                .map(|o| format!("{} '{}'", o.kind, o.name))
                .collect();
            if !unsupported.is_empty() {
                outcome.error(
                    format!("rule {}", rule.id),
                    format!(
                        "'{}' references unsupported objects: {}",
                        rule.name,
                        unsupported.join(", ")
                    ),
                );
            }
        }
        Ok(outcome)
    }
}
