//! Concrete validation checks

mod org_vdc;
mod services;
mod shared_network;
mod vapp;

pub use org_vdc::{
    register_reenable_org_vdc, Catalogs, DisableSourceOrgVdc, ExternalNetworks,
    IndependentDisks, OrgVdcNetworks, SourceOrgVdc, TargetProviderVdc, DISABLE_ORG_VDC_TASK,
    GATEWAY_INTERFACE_LIMIT, REENABLE_ORG_VDC,
};
pub use services::{DistributedFirewall, EdgeGatewayServices, StaticRoutes};
pub use shared_network::SharedNetworks;
pub use vapp::{
    register_reenable_affinity_rules, AffinityRules, Vapps, DISABLE_AFFINITY_RULES_TASK,
    REENABLE_AFFINITY_RULES,
};

use vdc_migrator_state::ContextError;

use crate::check::CheckEnv;
use crate::keys::{AFFINITY_RULES_DISABLED_BY_TOOL, ORG_VDC_DISABLED_BY_TOOL, SOURCE_ORG_VDC};

/// Register the undo actions of side effects recorded in the context by an
/// earlier run, so a resumed run that fails still restores the source.
/// Returns the names of the registered actions.
pub fn register_persisted_compensations(env: &CheckEnv) -> Result<Vec<String>, ContextError> {
    let mut registered = Vec::new();

    if env.context.get(&ORG_VDC_DISABLED_BY_TOOL)?.unwrap_or(false) {
        let org_vdc = env.context.require(&SOURCE_ORG_VDC)?;
        register_reenable_org_vdc(env, org_vdc.id);
        registered.push(REENABLE_ORG_VDC.to_string());
    }

    let rules = env
        .context
        .get(&AFFINITY_RULES_DISABLED_BY_TOOL)?
        .unwrap_or_default();
    if !rules.is_empty() {
        register_reenable_affinity_rules(env);
        registered.push(REENABLE_AFFINITY_RULES.to_string());
    }

    Ok(registered)
}
