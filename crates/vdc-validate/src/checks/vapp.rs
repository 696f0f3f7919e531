//! vApp checks and the affinity rule side effect

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};
use vdc_migrator_core::{CheckError, CheckOutcome};

use crate::check::{Check, CheckEnv};
use crate::compensation::BoxFuture;
use crate::keys::{AFFINITY_RULES_DISABLED_BY_TOOL, SOURCE_ORG_VDC};
use crate::platform::{Vapp, VappNetworkKind, VmPowerState};
use crate::pool::WorkerPool;
use crate::registry::VAPP_GROUP;

pub const DISABLE_AFFINITY_RULES_TASK: &str = "disableAffinityRules";
pub const REENABLE_AFFINITY_RULES: &str = "reenableAffinityRules";

/// Upper bound on concurrent full vApp document fetches, the heaviest read
/// the management API serves.
pub const VAPP_FETCH_CONCURRENCY: usize = 4;

pub struct Vapps;

#[async_trait]
impl Check for Vapps {
    fn name(&self) -> &'static str {
        "vapps"
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let org_vdc = env.context.require(&SOURCE_ORG_VDC)?;
        let summaries = env.platform.list_vapps(&org_vdc.id).await?;

        let size = env.pool_size.get().min(VAPP_FETCH_CONCURRENCY);
        let pool = env
            .pool_size
            .with_size(size, async {
                let mut pool: WorkerPool<CheckOutcome> =
                    WorkerPool::new(env.label(), &env.pool_size);
                for summary in &summaries {
                    let platform = Arc::clone(&env.platform);
                    let vapp_id = summary.id.clone();
                    pool.spawn(summary.name.clone(), async move {
                        let vapp = platform.get_vapp(&vapp_id).await?;
                        Ok::<_, CheckError>(inspect_vapp(&vapp))
                    });
                }
                pool.join().await;
                pool
            })
            .await;

        if pool.any_failed() {
            return Err(anyhow!(
                "{} of {} vApp(s) could not be inspected: {}",
                pool.failures().len(),
                summaries.len(),
                pool.failure_summary()
            )
            .into());
        }

        let mut results = pool.into_results();
        let mut outcome = CheckOutcome::new();
        for summary in &summaries {
            if let Some(vapp_outcome) = results.remove(&summary.name) {
                outcome.absorb(vapp_outcome);
            }
        }
        Ok(outcome)
    }
}

fn inspect_vapp(vapp: &Vapp) -> CheckOutcome {
    let mut outcome = CheckOutcome::new();
    if vapp.fenced {
        outcome.error(&vapp.name, "fencing is enabled");
    }
    for network in &vapp.networks {
        if let VappNetworkKind::Routed { .. } = network.kind {
            outcome.error(
                &vapp.name,
                format!("vApp routed network '{}' is not supported", network.name),
            );
        }
    }
    for vm in &vapp.vms {
        let entity = format!("{}/{}", vapp.name, vm.name);
        if vm.power_state == VmPowerState::Suspended {
            outcome.error(&entity, "VM is suspended");
        }
        if vm.media_attached {
            outcome.warning(&entity, "attached media will be ejected");
        }
    }
    outcome
}

/// Disables the enabled affinity rules of the Org VDC, one sub-task per rule,
/// so placement does not fight the migration.
pub struct AffinityRules;

#[async_trait]
impl Check for AffinityRules {
    fn name(&self) -> &'static str {
        "affinityRules"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["vapps"]
    }

    fn side_effecting(&self) -> bool {
        true
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let org_vdc = env.context.require(&SOURCE_ORG_VDC)?;
        register_reenable_affinity_rules(env);

        let rules = env.platform.list_affinity_rules(&org_vdc.id).await?;
        let items: Vec<(String, _)> = rules
            .into_iter()
            .filter(|rule| rule.enabled)
            .map(|rule| {
                let key = rule.id.clone();
                let platform = Arc::clone(&env.platform);
                let context = env.context.clone();
                let fut = async move {
                    platform.set_affinity_rule_enabled(&rule.id, false).await?;
                    context.update(&AFFINITY_RULES_DISABLED_BY_TOOL, |ids| {
                        ids.insert(rule.id.clone());
                    })?;
                    Ok::<(), anyhow::Error>(())
                };
                (key, fut)
            })
            .collect();

        let summary = env
            .tasks
            .run_sub_tasks(DISABLE_AFFINITY_RULES_TASK, items)
            .await?;
        if !summary.attempted.is_empty() {
            info!(
                "[{}] disabled {} affinity rule(s)",
                env.label(),
                summary.attempted.len()
            );
        }
        Ok(CheckOutcome::new())
    }
}

/// Register the undo of [`AffinityRules`]: re-enable exactly the rules
/// recorded as disabled by this tool.
pub fn register_reenable_affinity_rules(env: &CheckEnv) {
    let context = env.context.clone();
    let platform = Arc::clone(&env.platform);
    let tasks = Arc::clone(&env.tasks);
    let label = env.label();

    env.compensation.register(
        REENABLE_AFFINITY_RULES,
        move || -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(async move {
                let disabled = context
                    .get(&AFFINITY_RULES_DISABLED_BY_TOOL)?
                    .unwrap_or_default();
                if disabled.is_empty() {
                    return Ok(());
                }

                let mut failed = Vec::new();
                for rule_id in disabled {
                    match platform.set_affinity_rule_enabled(&rule_id, true).await {
                        Ok(()) => {
                            context.update(&AFFINITY_RULES_DISABLED_BY_TOOL, |ids| {
                                ids.remove(&rule_id);
                            })?;
                        }
                        Err(e) => {
                            warn!("[{}] affinity rule {} not re-enabled: {:#}", label, rule_id, e);
                            failed.push(rule_id);
                        }
                    }
                }

                let _ = tasks.invalidate(DISABLE_AFFINITY_RULES_TASK).await;
                let _ = tasks.invalidate(VAPP_GROUP).await;
                if failed.is_empty() {
                    info!("[{}] affinity rules re-enabled", label);
                    Ok(())
                } else {
                    Err(anyhow!("affinity rules still disabled: {}", failed.join(", ")))
                }
            })
        },
    );
}
