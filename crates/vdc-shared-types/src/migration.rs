use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SharedTypeError;

/// How findings are treated by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Abort a group on hard errors and perform guarded side effects
    #[default]
    Enforce,
    /// Collect every finding into a report, never abort, never touch the source
    Assessment,
}

impl FromStr for RunMode {
    type Err = SharedTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enforce" | "validate" => Ok(RunMode::Enforce),
            "assessment" | "assess" | "dry-run" => Ok(RunMode::Assessment),
            _ => Err(SharedTypeError::InvalidValue {
                field: "mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Identity of a migration unit: one Org VDC inside one organization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId {
    pub org: String,
    pub org_vdc: String,
}

impl UnitId {
    pub fn new(org: impl Into<String>, org_vdc: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            org_vdc: org_vdc.into(),
        }
    }

    /// Name usable as a file stem or metadata key.
    pub fn storage_key(&self) -> String {
        format!("{}__{}", sanitize(&self.org), sanitize(&self.org_vdc))
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.org_vdc)
    }
}

impl FromStr for UnitId {
    type Err = SharedTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((org, vdc)) if !org.is_empty() && !vdc.is_empty() => Ok(UnitId::new(org, vdc)),
            _ => Err(SharedTypeError::ParseError(format!(
                "expected <org>/<org-vdc>, got '{}'",
                s
            ))),
        }
    }
}

/// Per-unit feature flags referenced throughout the checks. Read-only after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub skip_bgp_migration: bool,
    #[serde(default)]
    pub clone_overlay_ids: bool,
    #[serde(default)]
    pub non_distributed_networks: bool,
    #[serde(default)]
    pub allow_cross_org_shared_networks: bool,
    #[serde(default = "default_dfw_rule_limit")]
    pub dfw_rule_limit: usize,
}

fn default_dfw_rule_limit() -> usize {
    1000
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            skip_bgp_migration: false,
            clone_overlay_ids: false,
            non_distributed_networks: false,
            allow_cross_org_shared_networks: false,
            dfw_rule_limit: default_dfw_rule_limit(),
        }
    }
}

/// Operator-supplied description of one unit to migrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSettings {
    pub org: String,
    pub org_vdc: String,
    pub target_provider_vdc: String,
    /// Source external network name to target external network name
    #[serde(default)]
    pub external_network_map: BTreeMap<String, String>,
    #[serde(default)]
    pub features: FeatureFlags,
}

impl UnitSettings {
    pub fn new(
        org: impl Into<String>,
        org_vdc: impl Into<String>,
        target_provider_vdc: impl Into<String>,
    ) -> Self {
        Self {
            org: org.into(),
            org_vdc: org_vdc.into(),
            target_provider_vdc: target_provider_vdc.into(),
            external_network_map: BTreeMap::new(),
            features: FeatureFlags::default(),
        }
    }

    pub fn id(&self) -> UnitId {
        UnitId::new(self.org.clone(), self.org_vdc.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id_parsing() {
        let unit: UnitId = "acme/acme-vdc-01".parse().unwrap();
        assert_eq!(unit, UnitId::new("acme", "acme-vdc-01"));
        assert_eq!(unit.to_string(), "acme/acme-vdc-01");
        assert!("no-slash".parse::<UnitId>().is_err());
        assert!("/vdc".parse::<UnitId>().is_err());
    }

    #[test]
    fn test_storage_key_is_path_safe() {
        let unit = UnitId::new("acme corp", "vdc/1");
        assert_eq!(unit.storage_key(), "acme_corp__vdc_1");
    }

    #[test]
    fn test_feature_flags_defaults_from_empty_json() {
        let flags: FeatureFlags = serde_json::from_str("{}").unwrap();
        assert_eq!(flags, FeatureFlags::default());
        assert_eq!(flags.dfw_rule_limit, 1000);
    }

    #[test]
    fn test_unit_settings_from_json() {
        let settings: UnitSettings = serde_json::from_str(
            r#"{"org":"acme","org_vdc":"vdc-1","target_provider_vdc":"pvdc-t",
                "external_network_map":{"ext-v":"ext-t"},
                "features":{"skip_bgp_migration":true}}"#,
        )
        .unwrap();
        assert_eq!(settings.id(), UnitId::new("acme", "vdc-1"));
        assert_eq!(settings.external_network_map["ext-v"], "ext-t");
        assert!(settings.features.skip_bgp_migration);
        assert_eq!(settings.features.dfw_rule_limit, 1000);
    }

    #[test]
    fn test_run_mode_parsing() {
        assert_eq!("assess".parse::<RunMode>().unwrap(), RunMode::Assessment);
        assert_eq!("enforce".parse::<RunMode>().unwrap(), RunMode::Enforce);
    }
}
