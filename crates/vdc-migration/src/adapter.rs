//! REST implementation of the platform adapter
//!
//! Collections are paginated as `{"values": [...], "page": n, "pageCount": m}`
//! and fetched page by page until the last one.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use vdc_migrator_validate::platform::{
    AffinityRule, Catalog, DfwRule, EdgeGateway, ExternalNetwork, GatewayService,
    IndependentDisk, NetworkConsumer, OrgVdc, OrgVdcNetwork, PlatformAdapter, ProviderVdc,
    ServiceConfig, Vapp, VappSummary,
};
use vdc_shared_types::UnitId;

use crate::remote_client::{RemoteClient, RemoteRequest};

/// Upper bound on pages read from one collection.
const MAX_PAGES: u32 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    values: Vec<T>,
    #[serde(default = "first_page")]
    page: u32,
    #[serde(default = "first_page")]
    page_count: u32,
}

fn first_page() -> u32 {
    1
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

pub struct RestPlatformAdapter {
    client: Arc<dyn RemoteClient>,
}

impl RestPlatformAdapter {
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self { client }
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let response = self
            .client
            .get(path)
            .await
            .with_context(|| format!("GET {}", path))?;
        Ok(response.json().with_context(|| format!("GET {}", path))?)
    }

    async fn fetch_all<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<Vec<T>> {
        let mut values = Vec::new();
        let mut page = 1;
        loop {
            let request = RemoteRequest::new(Method::GET, path).with_query("page", page);
            let response = self
                .client
                .call(&request)
                .await
                .with_context(|| format!("GET {}", request.target()))?;
            let body: Page<T> = response
                .json()
                .with_context(|| format!("GET {}", request.target()))?;

            values.extend(body.values);
            if body.page >= body.page_count || page >= MAX_PAGES {
                break;
            }
            page = body.page + 1;
        }
        Ok(values)
    }

    async fn set_enabled(&self, path: &str, enabled: bool) -> anyhow::Result<()> {
        self.client
            .put(path, json!({ "enabled": enabled }))
            .await
            .with_context(|| format!("PUT {}", path))?;
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for RestPlatformAdapter {
    async fn get_org_vdc(&self, unit: &UnitId) -> anyhow::Result<OrgVdc> {
        self.fetch(&format!(
            "/api/orgs/{}/vdcs/{}",
            segment(&unit.org),
            segment(&unit.org_vdc)
        ))
        .await
    }

    async fn get_provider_vdc(&self, name: &str) -> anyhow::Result<Option<ProviderVdc>> {
        let path = format!("/api/provider-vdcs/{}", segment(name));
        match self.client.get(&path).await {
            Ok(response) => Ok(Some(response.json()?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e).with_context(|| format!("GET {}", path)),
        }
    }

    async fn list_edge_gateways(&self, org_vdc_id: &str) -> anyhow::Result<Vec<EdgeGateway>> {
        self.fetch_all(&format!("/api/vdcs/{}/edge-gateways", segment(org_vdc_id)))
            .await
    }

    async fn list_external_networks(&self) -> anyhow::Result<Vec<ExternalNetwork>> {
        self.fetch_all("/api/external-networks").await
    }

    async fn list_org_vdc_networks(&self, org_vdc_id: &str) -> anyhow::Result<Vec<OrgVdcNetwork>> {
        self.fetch_all(&format!("/api/vdcs/{}/networks", segment(org_vdc_id)))
            .await
    }

    async fn list_independent_disks(
        &self,
        org_vdc_id: &str,
    ) -> anyhow::Result<Vec<IndependentDisk>> {
        self.fetch_all(&format!("/api/vdcs/{}/disks", segment(org_vdc_id)))
            .await
    }

    async fn list_catalogs(&self, org: &str) -> anyhow::Result<Vec<Catalog>> {
        self.fetch_all(&format!("/api/orgs/{}/catalogs", segment(org)))
            .await
    }

    async fn get_gateway_service(
        &self,
        gateway_id: &str,
        service: GatewayService,
    ) -> anyhow::Result<ServiceConfig> {
        let path = format!(
            "/api/edge-gateways/{}/services/{}",
            segment(gateway_id),
            service
        );
        match self.client.get(&path).await {
            Ok(response) => Ok(response.json()?),
            // gateways without the service licensed report it as absent
            Err(e) if e.is_not_found() => Ok(ServiceConfig::disabled(service)),
            Err(e) => Err(e).with_context(|| format!("GET {}", path)),
        }
    }

    async fn list_dfw_rules(&self, org_vdc_id: &str) -> anyhow::Result<Vec<DfwRule>> {
        self.fetch_all(&format!("/api/vdcs/{}/dfw-rules", segment(org_vdc_id)))
            .await
    }

    async fn list_vapps(&self, org_vdc_id: &str) -> anyhow::Result<Vec<VappSummary>> {
        self.fetch_all(&format!("/api/vdcs/{}/vapps", segment(org_vdc_id)))
            .await
    }

    async fn get_vapp(&self, vapp_id: &str) -> anyhow::Result<Vapp> {
        self.fetch(&format!("/api/vapps/{}", segment(vapp_id))).await
    }

    async fn list_affinity_rules(&self, org_vdc_id: &str) -> anyhow::Result<Vec<AffinityRule>> {
        self.fetch_all(&format!("/api/vdcs/{}/affinity-rules", segment(org_vdc_id)))
            .await
    }

    async fn list_network_consumers(
        &self,
        network_id: &str,
    ) -> anyhow::Result<Vec<NetworkConsumer>> {
        self.fetch_all(&format!("/api/networks/{}/consumers", segment(network_id)))
            .await
    }

    async fn set_org_vdc_enabled(&self, org_vdc_id: &str, enabled: bool) -> anyhow::Result<()> {
        self.set_enabled(&format!("/api/vdcs/{}/enabled", segment(org_vdc_id)), enabled)
            .await
    }

    async fn set_affinity_rule_enabled(&self, rule_id: &str, enabled: bool) -> anyhow::Result<()> {
        self.set_enabled(
            &format!("/api/affinity-rules/{}/enabled", segment(rule_id)),
            enabled,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_client::MockRemoteClient;
    use serde_json::json;

    fn adapter(client: MockRemoteClient) -> (Arc<MockRemoteClient>, RestPlatformAdapter) {
        let client = Arc::new(client);
        (client.clone(), RestPlatformAdapter::new(client))
    }

    #[tokio::test]
    async fn test_pages_are_concatenated() {
        let mut client = MockRemoteClient::new();
        client.add_json(
            "GET /api/vdcs/vdc-1/vapps?page=1",
            json!({"values": [{"id": "vapp-1", "name": "web"}], "page": 1, "pageCount": 2}),
        );
        client.add_json(
            "GET /api/vdcs/vdc-1/vapps?page=2",
            json!({"values": [{"id": "vapp-2", "name": "db"}], "page": 2, "pageCount": 2}),
        );
        let (client, adapter) = adapter(client);

        let vapps = adapter.list_vapps("vdc-1").await.unwrap();
        let names: Vec<_> = vapps.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["web", "db"]);
        assert_eq!(client.count("GET /api/vdcs/vdc-1/vapps"), 2);
    }

    #[tokio::test]
    async fn test_missing_provider_vdc_is_none() {
        let (_, adapter) = adapter(MockRemoteClient::new());
        assert_eq!(adapter.get_provider_vdc("pvdc gold").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_absent_service_reads_as_disabled() {
        let mut client = MockRemoteClient::new();
        client.add_json(
            "GET /api/edge-gateways/gw-1/services/routing",
            json!({
                "service": "routing",
                "enabled": true,
                "bgp": {"enabled": true, "local_as": 65001}
            }),
        );
        let (_, adapter) = adapter(client);

        let routing = adapter
            .get_gateway_service("gw-1", GatewayService::Routing)
            .await
            .unwrap();
        assert!(routing.enabled);
        assert_eq!(routing.bgp.unwrap().local_as, 65001);

        let dns = adapter
            .get_gateway_service("gw-1", GatewayService::Dns)
            .await
            .unwrap();
        assert_eq!(dns, ServiceConfig::disabled(GatewayService::Dns));
    }

    #[tokio::test]
    async fn test_server_errors_keep_their_cause() {
        let mut client = MockRemoteClient::new();
        client.add_error("GET /api/vapps/vapp-9", 503, "maintenance");
        let (_, adapter) = adapter(client);

        let err = adapter.get_vapp("vapp-9").await.unwrap_err();
        assert_eq!(err.to_string(), "GET /api/vapps/vapp-9");
        assert!(format!("{:#}", err).contains("503 - maintenance"));
    }

    #[tokio::test]
    async fn test_toggles_send_the_new_state() {
        let mut client = MockRemoteClient::new();
        client.add_json("PUT /api/vdcs/vdc-1/enabled", json!({}));
        let (client, adapter) = adapter(client);

        adapter.set_org_vdc_enabled("vdc-1", false).await.unwrap();
        let request = &client.requests()[0];
        assert_eq!(request.body, Some(json!({"enabled": false})));
        // the rule endpoint has no canned response
        assert!(adapter.set_affinity_rule_enabled("rule-1", true).await.is_err());
    }
}
