//! Wiring of configuration, platform access and state for one unit at a time

use std::sync::Arc;
use std::time::Duration;

use log::info;
use vdc_event_bus::EventBus;
use vdc_migrator_core::AssessmentReport;
use vdc_migrator_state::{Checkpoint, FileMetadataStore, MetadataStore};
use vdc_migrator_validate::{
    open_unit, CheckRegistry, CompensationReport, Orchestrator, PlatformAdapter, PoolSize,
    SessionProvider,
};
use vdc_shared_types::{RunMode, UnitId};

use crate::adapter::RestPlatformAdapter;
use crate::config::MigrationConfig;
use crate::remote_client::{HttpRemoteClient, RemoteClient};
use crate::session::TokenSessionProvider;
use crate::Result;

pub struct Runner {
    config: Arc<MigrationConfig>,
    platform: Arc<dyn PlatformAdapter>,
    session: Arc<dyn SessionProvider>,
    store: Arc<dyn MetadataStore>,
    events: EventBus,
    pool_size: PoolSize,
}

impl Runner {
    pub fn new(
        config: Arc<MigrationConfig>,
        platform: Arc<dyn PlatformAdapter>,
        session: Arc<dyn SessionProvider>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        let pool_size = PoolSize::new(config.worker_pool_size);
        Self {
            config,
            platform,
            session,
            store,
            events: EventBus::new(),
            pool_size,
        }
    }

    /// Production wiring: HTTP client, token sessions and file checkpoints.
    pub async fn connect(config: Arc<MigrationConfig>) -> Result<Self> {
        let endpoint = &config.endpoint;
        let client: Arc<dyn RemoteClient> = Arc::new(HttpRemoteClient::new(
            endpoint.base_url.clone(),
            Duration::from_secs(endpoint.timeout_secs),
        )?);
        let session = Arc::new(TokenSessionProvider::new(
            Arc::clone(&client),
            endpoint.username.clone(),
            endpoint.password.clone(),
            Duration::from_secs(endpoint.session_ttl_secs),
        ));
        let platform = Arc::new(RestPlatformAdapter::new(client));
        let store = Arc::new(FileMetadataStore::new(config.state_dir.clone()).await?);
        Ok(Self::new(config, platform, session, store))
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    async fn orchestrator(&self, unit: &UnitId, mode: RunMode) -> Result<Orchestrator> {
        let settings = self.config.unit(unit)?.clone();
        let env = open_unit(
            settings,
            Arc::clone(&self.platform),
            Arc::clone(&self.store),
            self.pool_size.clone(),
            mode,
        )
        .await?;
        Ok(
            Orchestrator::new(env, Arc::clone(&self.session), CheckRegistry::standard()?)
                .with_event_bus(self.events.clone()),
        )
    }

    /// Enforce run: stops at the first failing group and undoes guarded side
    /// effects before returning its error.
    pub async fn validate(&self, unit: &UnitId) -> Result<AssessmentReport> {
        let orchestrator = self.orchestrator(unit, RunMode::Enforce).await?;
        Ok(orchestrator.run().await?)
    }

    /// Assessment run: every finding of every group, no side effects, no
    /// checkpoint writes.
    pub async fn assess(&self, unit: &UnitId) -> Result<AssessmentReport> {
        let orchestrator = self.orchestrator(unit, RunMode::Assessment).await?;
        Ok(orchestrator.run().await?)
    }

    pub async fn status(&self, unit: &UnitId) -> Result<Option<Checkpoint>> {
        self.config.unit(unit)?;
        Ok(self.store.load(unit).await?)
    }

    /// Forget the checkpoint so the next run starts from scratch.
    pub async fn reset(&self, unit: &UnitId) -> Result<()> {
        self.config.unit(unit)?;
        self.store.remove(unit).await?;
        info!("[{}] checkpoint removed", unit);
        Ok(())
    }

    /// Undo the guarded side effects recorded in the checkpoint of a unit.
    pub async fn rollback(&self, unit: &UnitId) -> Result<CompensationReport> {
        let orchestrator = self.orchestrator(unit, RunMode::Enforce).await?;
        Ok(orchestrator.rollback().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::remote_client::MockRemoteClient;
    use crate::Error;
    use serde_json::{json, Value};
    use vdc_migrator_core::MigrationError;
    use vdc_migrator_state::InMemoryMetadataStore;
    use vdc_migrator_validate::registry::{
        ORG_VDC_GROUP, SERVICES_GROUP, SHARED_NETWORK_GROUP, VAPP_GROUP,
    };
    use vdc_migrator_validate::NoSession;
    use vdc_shared_types::{TaskStatus, UnitSettings};

    fn unit() -> UnitId {
        UnitId::new("acme", "acme-vdc-01")
    }

    fn config() -> Arc<MigrationConfig> {
        let mut settings = UnitSettings::new("acme", "acme-vdc-01", "pvdc-overlay");
        settings
            .external_network_map
            .insert("ext-legacy".to_string(), "ext-overlay".to_string());
        Arc::new(MigrationConfig {
            worker_pool_size: 4,
            units: vec![settings],
            ..MigrationConfig::default()
        })
    }

    fn page(values: Value) -> Value {
        json!({ "values": values, "page": 1, "pageCount": 1 })
    }

    /// API of a unit with one gateway, nothing else in it and no blockers.
    fn healthy_api() -> MockRemoteClient {
        let mut client = MockRemoteClient::new();
        client.add_json(
            "GET /api/orgs/acme/vdcs/acme-vdc-01",
            json!({
                "id": "vdc-1",
                "name": "acme-vdc-01",
                "org": "acme",
                "enabled": true,
                "backing": "legacy",
                "provider_vdc": "pvdc-legacy"
            }),
        );
        client.add_json(
            "GET /api/vdcs/vdc-1/edge-gateways?page=1",
            page(json!([{"id": "gw-1", "name": "edge-01", "uplinks": ["ext-legacy"]}])),
        );
        client.add_json(
            "GET /api/external-networks?page=1",
            page(json!([{
                "name": "ext-overlay",
                "backing": "overlay",
                "tier0_backed": true,
                "subnets": ["198.51.100.0/24"]
            }])),
        );
        for collection in [
            "networks",
            "disks",
            "dfw-rules",
            "vapps",
            "affinity-rules",
        ] {
            client.add_json(
                format!("GET /api/vdcs/vdc-1/{}?page=1", collection),
                page(json!([])),
            );
        }
        client.add_json("GET /api/orgs/acme/catalogs?page=1", page(json!([])));
        client.add_json("PUT /api/vdcs/vdc-1/enabled", json!({}));
        client
    }

    fn runner(client: MockRemoteClient) -> (Arc<MockRemoteClient>, Arc<InMemoryMetadataStore>, Runner) {
        let client = Arc::new(client);
        let store = Arc::new(InMemoryMetadataStore::new());
        let runner = Runner::new(
            config(),
            Arc::new(RestPlatformAdapter::new(client.clone())),
            Arc::new(NoSession),
            store.clone(),
        );
        (client, store, runner)
    }

    fn with_provider_vdc(mut client: MockRemoteClient) -> MockRemoteClient {
        client.add_json(
            "GET /api/provider-vdcs/pvdc-overlay",
            json!({"name": "pvdc-overlay", "enabled": true, "backing": "overlay"}),
        );
        client
    }

    #[tokio::test]
    async fn test_validate_status_rollback_reset() {
        let (client, _, runner) = runner(with_provider_vdc(healthy_api()));

        let report = runner.validate(&unit()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(client.count("PUT /api/vdcs/vdc-1/enabled"), 1);
        // services without a document read as disabled
        assert_eq!(client.count("GET /api/edge-gateways/gw-1/services/"), 11);

        let checkpoint = runner.status(&unit()).await.unwrap().unwrap();
        for task in [
            ORG_VDC_GROUP,
            SERVICES_GROUP,
            VAPP_GROUP,
            SHARED_NETWORK_GROUP,
            "disableSourceOrgVdc",
        ] {
            assert_eq!(checkpoint.tasks[task].status, TaskStatus::Succeeded, "{}", task);
        }

        let undone = runner.rollback(&unit()).await.unwrap();
        assert_eq!(undone.executed, vec!["reenableSourceOrgVdc".to_string()]);
        let last = client.requests().pop().unwrap();
        assert_eq!(last.body, Some(json!({"enabled": true})));

        runner.reset(&unit()).await.unwrap();
        assert!(runner.status(&unit()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assess_touches_nothing() {
        let (client, store, runner) = runner(with_provider_vdc(healthy_api()));

        let report = runner.assess(&unit()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(client.count("PUT "), 0);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_provider_vdc_maps_to_configuration_exit() {
        let (client, _, runner) = runner(healthy_api());

        let err = runner.validate(&unit()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Migration(MigrationError::Configuration { .. })
        ));
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("target provider VDC does not exist"));
        assert_eq!(client.count("PUT "), 0);
    }

    #[tokio::test]
    async fn test_unknown_unit_is_rejected_before_any_call() {
        let (client, _, runner) = runner(healthy_api());

        let err = runner
            .validate(&UnitId::new("acme", "not-configured"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::UnknownUnit(_))));
        assert!(client.requests().is_empty());
    }
}
