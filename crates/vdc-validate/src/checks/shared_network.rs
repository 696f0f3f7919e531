//! Shared Org VDC networks consumed outside the unit

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use vdc_migrator_core::{CheckError, CheckOutcome};

use crate::check::{Check, CheckEnv};
use crate::keys::{ORG_VDC_NETWORKS, SHARED_NETWORK_CONSUMERS};
use crate::platform::NetworkConsumer;
use crate::pool::WorkerPool;

pub struct SharedNetworks;

#[async_trait]
impl Check for SharedNetworks {
    fn name(&self) -> &'static str {
        "sharedNetworks"
    }

    async fn run(&self, env: &CheckEnv) -> Result<CheckOutcome, CheckError> {
        let networks = env.context.require(&ORG_VDC_NETWORKS)?;
        let shared: Vec<_> = networks.into_iter().filter(|n| n.shared).collect();

        let mut pool: WorkerPool<Vec<NetworkConsumer>> =
            WorkerPool::new(env.label(), &env.pool_size);
        for network in &shared {
            let platform = Arc::clone(&env.platform);
            let network_id = network.id.clone();
            pool.spawn(network.name.clone(), async move {
                let consumers = platform.list_network_consumers(&network_id).await?;
                Ok::<_, CheckError>(consumers)
            });
        }
        pool.join().await;
        if pool.any_failed() {
            return Err(anyhow!(
                "consumers of {} shared network(s) could not be listed: {}",
                pool.failures().len(),
                pool.failure_summary()
            )
            .into());
        }

        let unit = env.context.unit();
        let allow = env.settings.features.allow_cross_org_shared_networks;
        let mut results = pool.into_results();
        let mut foreign_by_network = BTreeMap::new();
        let mut outcome = CheckOutcome::new();
        for network in &shared {
            let mut foreign: Vec<NetworkConsumer> = results
                .remove(&network.name)
                .unwrap_or_default()
                .into_iter()
                .filter(|c| c.org != unit.org || c.org_vdc != unit.org_vdc)
                .collect();
            if foreign.is_empty() {
                continue;
            }
            foreign.sort();

            for consumer in &foreign {
                let message = format!(
                    "shared network is used by vApp '{}' of Org VDC {}/{}",
                    consumer.vapp, consumer.org, consumer.org_vdc
                );
                if allow {
                    outcome.warning(&network.name, message);
                } else {
                    outcome.error(&network.name, message);
                }
            }
            foreign_by_network.insert(network.name.clone(), foreign);
        }

        env.context.put(&SHARED_NETWORK_CONSUMERS, &foreign_by_network)?;
        Ok(outcome)
    }
}
