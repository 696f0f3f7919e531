//! Migration configuration management
//!
//! One file describes the cloud endpoint, where checkpoints live and the
//! migration units to validate. Environment variables prefixed with
//! `VDC_MIGRATION__` override file values, e.g.
//! `VDC_MIGRATION__ENDPOINT__PASSWORD`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vdc_migrator_validate::DEFAULT_POOL_SIZE;
use vdc_shared_types::{FeatureFlags, UnitId, UnitSettings};

pub const ENV_PREFIX: &str = "VDC_MIGRATION";

/// Locations searched by [`MigrationConfig::load_with_defaults`], in order.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] =
    ["/etc/vdc-migration/config.toml", "./vdc-migration.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Endpoint configuration error: {0}")]
    EndpointConfig(String),

    #[error("no migration units configured")]
    NoUnits,

    #[error("migration unit {0} is configured more than once")]
    DuplicateUnit(String),

    #[error("migration unit {0} is not configured")]
    UnknownUnit(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Connection to the cloud management API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    /// Timeout of a single API call (seconds)
    pub timeout_secs: u64,
    pub username: String,
    /// Usually supplied through `VDC_MIGRATION__ENDPOINT__PASSWORD`
    pub password: Option<String>,
    /// Lifetime of a session token before it is renewed (seconds)
    pub session_ttl_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "https://vcd.example.com".to_string(),
            timeout_secs: 60,
            username: "administrator@system".to_string(),
            password: None,
            session_ttl_secs: 1500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Directory holding one checkpoint per unit
    pub state_dir: PathBuf,
    /// Default number of concurrent remote calls per fan-out
    pub worker_pool_size: usize,
    pub endpoint: EndpointConfig,
    pub units: Vec<UnitSettings>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/vdc-migration/state"),
            worker_pool_size: DEFAULT_POOL_SIZE,
            endpoint: EndpointConfig::default(),
            units: Vec::new(),
        }
    }
}

impl MigrationConfig {
    /// Load configuration from file, then apply environment overrides.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: MigrationConfig = settings.try_deserialize()?;
        Ok(config)
    }

    /// Load the first readable file of [`DEFAULT_CONFIG_PATHS`], falling back
    /// to defaults.
    pub fn load_with_defaults() -> Result<Self, ConfigError> {
        for path in DEFAULT_CONFIG_PATHS {
            if !Path::new(path).exists() {
                continue;
            }
            match Self::load_from_file(path) {
                Ok(config) => return Ok(config),
                Err(e) => log::warn!("Failed to load config from {}: {}", path, e),
            }
        }
        Ok(Self::default())
    }

    /// A commented-by-example configuration with one unit, written by
    /// `generate-config`.
    pub fn example() -> Self {
        let mut unit = UnitSettings::new("acme", "acme-vdc-01", "pvdc-overlay-gold");
        unit.external_network_map = BTreeMap::from([(
            "ext-legacy-internet".to_string(),
            "ext-t0-internet".to_string(),
        )]);
        unit.features = FeatureFlags::default();

        Self {
            units: vec![unit],
            ..Self::default()
        }
    }

    /// Reject configurations no run could succeed with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.base_url.trim().is_empty() {
            return Err(ConfigError::EndpointConfig("base_url is empty".to_string()));
        }
        if self.endpoint.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "endpoint.timeout_secs",
                message: "must be at least 1".to_string(),
            });
        }
        if self.worker_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_pool_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.units.is_empty() {
            return Err(ConfigError::NoUnits);
        }

        let mut seen = HashSet::new();
        for unit in &self.units {
            if !seen.insert(unit.id()) {
                return Err(ConfigError::DuplicateUnit(unit.id().to_string()));
            }
            if unit.target_provider_vdc.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "units.target_provider_vdc",
                    message: format!("empty for {}", unit.id()),
                });
            }
        }
        Ok(())
    }

    pub fn unit(&self, id: &UnitId) -> Result<&UnitSettings, ConfigError> {
        self.units
            .iter()
            .find(|u| u.org == id.org && u.org_vdc == id.org_vdc)
            .ok_or_else(|| ConfigError::UnknownUnit(id.to_string()))
    }

    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.units.iter().map(UnitSettings::id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = MigrationConfig::default();
        assert_eq!(config.worker_pool_size, DEFAULT_POOL_SIZE);
        assert!(config.endpoint.password.is_none());
        assert!(matches!(config.validate(), Err(ConfigError::NoUnits)));
        assert!(MigrationConfig::example().validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vdc-migration.toml");
        std::fs::write(
            &path,
            r#"
state_dir = "/tmp/vdc-state"
worker_pool_size = 4

[endpoint]
base_url = "https://cloud.internal"
username = "migrator@system"

[[units]]
org = "acme"
org_vdc = "acme-vdc-01"
target_provider_vdc = "pvdc-gold"

[units.external_network_map]
ext-legacy = "ext-overlay"

[units.features]
skip_bgp_migration = true
"#,
        )
        .unwrap();

        let config = MigrationConfig::load_from_file(&path).unwrap();
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.endpoint.base_url, "https://cloud.internal");
        // unspecified endpoint settings keep their defaults
        assert_eq!(config.endpoint.timeout_secs, 60);

        let unit = config.unit(&UnitId::new("acme", "acme-vdc-01")).unwrap();
        assert_eq!(unit.external_network_map["ext-legacy"], "ext-overlay");
        assert!(unit.features.skip_bgp_migration);
        assert_eq!(unit.features.dfw_rule_limit, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_configs() {
        let mut config = MigrationConfig::example();
        config.units.push(config.units[0].clone());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateUnit(unit)) if unit == "acme/acme-vdc-01"
        ));

        let mut config = MigrationConfig::example();
        config.worker_pool_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "worker_pool_size", .. })
        ));

        let mut config = MigrationConfig::example();
        config.endpoint.base_url = " ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::EndpointConfig(_))));
    }

    #[test]
    fn test_unknown_unit() {
        let config = MigrationConfig::example();
        let err = config.unit(&UnitId::new("acme", "other")).unwrap_err();
        assert_eq!(err.to_string(), "migration unit acme/other is not configured");
    }

    #[test]
    fn test_example_survives_toml_round_trip() {
        let example = MigrationConfig::example();
        let text = toml::to_string_pretty(&example).unwrap();
        let parsed: MigrationConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, example);
    }
}
