//! Checks of the source Org VDC itself and its placement on the target

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use log::info;
use vdc_migrator_core::{CheckError, CheckOutcome};

use crate::check::{Check, CheckEnv};
use crate::compensation::BoxFuture;
use crate::keys::{
    NetworkConflict, CONFLICT_NETWORKS, EXTERNAL_NETWORK_MAPPINGS, IS_T0_CONNECTED,
    ORG_VDC_DISABLED_BY_TOOL, ORG_VDC_NETWORKS, SOURCE_EDGE_GATEWAYS, SOURCE_ORG_VDC,
    TARGET_PROVIDER_VDC,
};
use crate::platform::{Backing, NetworkKind};
use crate::registry::ORG_VDC_GROUP;

/// Interfaces a gateway offers to networks that are not distributed.
pub const GATEWAY_INTERFACE_LIMIT: usize = 9;

pub const DISABLE_ORG_VDC_TASK: &str = "disableSourceOrgVdc";
pub const REENABLE_ORG_VDC: &str = "reenableSourceOrgVdc";

pub struct SourceOrgVdc;

#[async_trait]
impl Check for SourceOrgVdc {
    fn name(&self) -> &'static str {
        "sourceOrgVdc"
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let org_vdc = env.platform.get_org_vdc(env.context.unit()).await?;
        let gateways = env.platform.list_edge_gateways(&org_vdc.id).await?;

        env.context.put(&SOURCE_ORG_VDC, &org_vdc)?;
        env.context.put(&SOURCE_EDGE_GATEWAYS, &gateways)?;

        let mut outcome = CheckOutcome::new();
        if org_vdc.backing == Backing::Overlay {
            outcome.error(
                &org_vdc.name,
                "Org VDC is already backed by the target networking backend",
            );
        }
        Ok(outcome)
    }
}

pub struct TargetProviderVdc;

#[async_trait]
impl Check for TargetProviderVdc {
    fn name(&self) -> &'static str {
        "targetProviderVdc"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["sourceOrgVdc"]
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let name = &env.settings.target_provider_vdc;
        let provider_vdc = env
            .platform
            .get_provider_vdc(name)
            .await?
            .ok_or_else(|| CheckError::configuration(name, "target provider VDC does not exist"))?;
        env.context.put(&TARGET_PROVIDER_VDC, &provider_vdc)?;

        let mut outcome = CheckOutcome::new();
        if !provider_vdc.enabled {
            outcome.configuration_error(name, "target provider VDC is disabled");
        }
        if provider_vdc.backing != Backing::Overlay {
            outcome.configuration_error(
                name,
                "target provider VDC is not backed by the target networking backend",
            );
        }
        if env.settings.features.clone_overlay_ids {
            match &provider_vdc.network_pool {
                Some(pool) if pool.backing == Backing::Overlay => {}
                Some(pool) => outcome.configuration_error(
                    name,
                    format!(
                        "overlay IDs can only be cloned into an overlay-backed network pool, '{}' is not",
                        pool.name
                    ),
                ),
                None => outcome.configuration_error(
                    name,
                    "overlay IDs can only be cloned when a network pool is assigned",
                ),
            }
        }
        Ok(outcome)
    }
}

pub struct ExternalNetworks;

#[async_trait]
impl Check for ExternalNetworks {
    fn name(&self) -> &'static str {
        "externalNetworks"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["sourceOrgVdc"]
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let gateways = env.context.require(&SOURCE_EDGE_GATEWAYS)?;
        let targets: HashMap<String, _> = env
            .platform
            .list_external_networks()
            .await?
            .into_iter()
            .map(|n| (n.name.clone(), n))
            .collect();

        let mut outcome = CheckOutcome::new();
        let mut mappings = BTreeMap::new();
        let mut t0_connected = false;
        for gateway in &gateways {
            for uplink in &gateway.uplinks {
                let Some(target_name) = env.settings.external_network_map.get(uplink) else {
                    outcome.error(
                        &gateway.name,
                        format!("uplink '{}' has no target external network mapping", uplink),
                    );
                    continue;
                };
                match targets.get(target_name) {
                    None => outcome.error(
                        &gateway.name,
                        format!("target external network '{}' does not exist", target_name),
                    ),
                    Some(target) if target.backing != Backing::Overlay => outcome.error(
                        &gateway.name,
                        format!(
                            "target external network '{}' is not backed by the target networking backend",
                            target_name
                        ),
                    ),
                    Some(target) => {
                        t0_connected |= target.tier0_backed;
                        mappings.insert(uplink.clone(), target_name.clone());
                    }
                }
            }
        }

        env.context.put(&EXTERNAL_NETWORK_MAPPINGS, &mappings)?;
        env.context.put(&IS_T0_CONNECTED, &t0_connected)?;
        Ok(outcome)
    }
}

fn overlaps(a: &IpNet, b: &IpNet) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

pub struct OrgVdcNetworks;

#[async_trait]
impl Check for OrgVdcNetworks {
    fn name(&self) -> &'static str {
        "orgVdcNetworks"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["sourceOrgVdc"]
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let org_vdc = env.context.require(&SOURCE_ORG_VDC)?;
        let networks = env.platform.list_org_vdc_networks(&org_vdc.id).await?;
        env.context.put(&ORG_VDC_NETWORKS, &networks)?;

        let mut outcome = CheckOutcome::new();

        // direct networks belong to the provider and may overlap freely
        let owned: Vec<_> = networks
            .iter()
            .filter(|n| !matches!(n.kind, NetworkKind::Direct { .. }))
            .collect();
        let mut conflicts = Vec::new();
        for (i, first) in owned.iter().enumerate() {
            for second in &owned[i + 1..] {
                if overlaps(&first.subnet, &second.subnet) {
                    outcome.error(
                        &first.name,
                        format!(
                            "subnet {} overlaps {} of network '{}'",
                            first.subnet, second.subnet, second.name
                        ),
                    );
                    conflicts.push(NetworkConflict {
                        first: first.name.clone(),
                        second: second.name.clone(),
                    });
                }
            }
        }
        env.context.put(&CONFLICT_NETWORKS, &conflicts)?;

        let mut routed_per_gateway: BTreeMap<&str, usize> = BTreeMap::new();
        for gateway in networks.iter().filter_map(|n| n.gateway()) {
            *routed_per_gateway.entry(gateway).or_default() += 1;
        }
        let non_distributed = env.settings.features.non_distributed_networks;
        for (gateway, count) in routed_per_gateway {
            if count <= GATEWAY_INTERFACE_LIMIT {
                continue;
            }
            if non_distributed {
                outcome.error(
                    gateway,
                    format!(
                        "{} routed networks exceed the {} interfaces available to non-distributed networks",
                        count, GATEWAY_INTERFACE_LIMIT
                    ),
                );
            } else {
                outcome.warning(
                    gateway,
                    format!(
                        "{} routed networks exceed {} gateway interfaces; they will be migrated as distributed networks",
                        count, GATEWAY_INTERFACE_LIMIT
                    ),
                );
            }
        }
        Ok(outcome)
    }
}

pub struct IndependentDisks;

#[async_trait]
impl Check for IndependentDisks {
    fn name(&self) -> &'static str {
        "independentDisks"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["sourceOrgVdc"]
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let org_vdc = env.context.require(&SOURCE_ORG_VDC)?;
        let mut outcome = CheckOutcome::new();
        for disk in env.platform.list_independent_disks(&org_vdc.id).await? {
            if disk.shared {
                outcome.error(&disk.name, "independent disk is shared between VMs");
            }
        }
        Ok(outcome)
    }
}

pub struct Catalogs;

#[async_trait]
impl Check for Catalogs {
    fn name(&self) -> &'static str {
        "catalogs"
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let mut outcome = CheckOutcome::new();
        for catalog in env.platform.list_catalogs(&env.settings.org).await? {
            if catalog.published {
                outcome.advisory(
                    &catalog.name,
                    "catalog is published, subscribers must re-sync after migration",
                );
            }
        }
        Ok(outcome)
    }
}

/// Disables the source Org VDC so nothing is deployed into it while it is
/// being migrated. Only an Org VDC this tool disabled is re-enabled later.
pub struct DisableSourceOrgVdc;

#[async_trait]
impl Check for DisableSourceOrgVdc {
    fn name(&self) -> &'static str {
        DISABLE_ORG_VDC_TASK
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &[
            "sourceOrgVdc",
            "targetProviderVdc",
            "externalNetworks",
            "orgVdcNetworks",
            "independentDisks",
            "catalogs",
        ]
    }

    fn side_effecting(&self) -> bool {
        true
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let org_vdc = env.context.require(&SOURCE_ORG_VDC)?;
        register_reenable_org_vdc(env, org_vdc.id.clone());

        let label = env.label();
        env.tasks
            .run_once(DISABLE_ORG_VDC_TASK, async {
                if !org_vdc.enabled {
                    info!("[{}] source Org VDC already disabled, leaving it as is", label);
                    return Ok(());
                }
                // recorded before the call: a crash in between must still re-enable it
                env.context.update(&ORG_VDC_DISABLED_BY_TOOL, |flag| *flag = true)?;
                let _ = env.tasks.flush().await;
                env.platform.set_org_vdc_enabled(&org_vdc.id, false).await?;
                info!("[{}] source Org VDC '{}' disabled", label, org_vdc.name);
                Ok::<(), CheckError>(())
            })
            .await?;
        Ok(CheckOutcome::new())
    }
}

/// Register the undo of [`DisableSourceOrgVdc`]. The action consults the
/// recorded flag when it runs, so it is a no-op unless this tool disabled the
/// Org VDC.
pub fn register_reenable_org_vdc(env: &CheckEnv, org_vdc_id: String) {
    let context = env.context.clone();
    let platform = Arc::clone(&env.platform);
    let tasks = Arc::clone(&env.tasks);
    let label = env.label();

    env.compensation
        .register(REENABLE_ORG_VDC, move || -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(async move {
                if !context.get(&ORG_VDC_DISABLED_BY_TOOL)?.unwrap_or(false) {
                    return Ok(());
                }
                platform.set_org_vdc_enabled(&org_vdc_id, true).await?;
                context.update(&ORG_VDC_DISABLED_BY_TOOL, |flag| *flag = false)?;
                info!("[{}] source Org VDC re-enabled", label);

                // undone, so the next run must disable it again; flush failures are logged
                let _ = tasks.invalidate(DISABLE_ORG_VDC_TASK).await;
                let _ = tasks.invalidate(ORG_VDC_GROUP).await;
                Ok(())
            })
        });
}
