use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::{
    entitlement,
    entitlement::Entitlement,
    entity::{EntityType, EntityUrl},
    identity::Identity,
};

/// Authorization configuration.
///
/// ```toml
/// [authorization]
/// trusted_internal_callers = true
///
/// [authorization.driver]
/// type = "rbac"
///
/// [[authorization.driver.groups]]
/// name = "network-admins"
/// members = ["tls:4c1f...e2", "oidc:jane@example.com"]
///
/// [[authorization.driver.groups.permissions]]
/// entity = "/1.0/projects/demo"
/// entitlement = "can_edit_networks"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorizationConfig {
    /// Active authorization driver.
    #[serde(default)]
    pub driver: DriverConfig,

    /// Allow `unix` and `cluster` callers without consulting the driver.
    #[serde(default = "default_true")]
    pub trusted_internal_callers: bool,

    /// Audit logging for authorization decisions.
    #[serde(default)]
    pub audit: AuthzAuditConfig,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            driver: DriverConfig::default(),
            trusted_internal_callers: true,
            audit: AuthzAuditConfig::default(),
        }
    }
}

impl AuthorizationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.driver.validate()
    }
}

/// Which driver decides allow/deny.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum DriverConfig {
    /// Allow every check.
    #[default]
    Open,

    /// Group-based grants defined in this file.
    Rbac(RbacDriverConfig),

    /// Delegate to an external policy decision point.
    #[cfg(feature = "external-driver")]
    External(ExternalDriverConfig),
}

impl DriverConfig {
    pub fn name(&self) -> &'static str {
        match self {
            DriverConfig::Open => "open",
            DriverConfig::Rbac(_) => "rbac",
            #[cfg(feature = "external-driver")]
            DriverConfig::External(_) => "external",
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            DriverConfig::Open => Ok(()),
            DriverConfig::Rbac(c) => c.validate(),
            #[cfg(feature = "external-driver")]
            DriverConfig::External(c) => c.validate(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RbacDriverConfig {
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

impl RbacDriverConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for (i, group) in self.groups.iter().enumerate() {
            if group.name.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Group {i}: name cannot be empty"
                )));
            }
            if !names.insert(group.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Group '{}' is defined more than once",
                    group.name
                )));
            }
            group.validate().map_err(|e| {
                ConfigError::Validation(format!("Group {i} ({}): {e}", group.name))
            })?;
        }
        Ok(())
    }
}

/// A named set of identities sharing a set of permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Members as `<authentication method>:<identifier>`.
    #[serde(default)]
    pub members: Vec<String>,

    /// Identity provider groups mapped onto this group.
    #[serde(default)]
    pub idp_groups: Vec<String>,

    #[serde(default)]
    pub permissions: Vec<PermissionConfig>,
}

impl GroupConfig {
    fn validate(&self) -> Result<(), String> {
        for member in &self.members {
            Identity::parse_key(member).map_err(|e| format!("member '{member}': {e}"))?;
        }
        for permission in &self.permissions {
            entitlement::validate(permission.entity.entity_type(), permission.entitlement)
                .map_err(|e| format!("permission on {}: {e}", permission.entity))?;
        }
        Ok(())
    }
}

/// An entitlement granted on one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionConfig {
    pub entity: EntityUrl,
    pub entitlement: Entitlement,
}

impl PermissionConfig {
    pub fn new(entity: EntityUrl, entitlement: Entitlement) -> Self {
        Self {
            entity,
            entitlement,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity.entity_type()
    }
}

/// External policy decision point.
#[cfg(feature = "external-driver")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalDriverConfig {
    /// Base URL; `/check` and `/list-objects` are appended.
    pub endpoint: String,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long decisions are cached, in milliseconds. 0 disables caching.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Upper bound on cached decisions.
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
}

#[cfg(feature = "external-driver")]
impl ExternalDriverConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: None,
            timeout_ms: default_timeout_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
            max_cache_entries: default_max_cache_entries(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::Validation(format!(
                "External driver endpoint '{}' is not a valid URL: {e}",
                self.endpoint
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "External driver endpoint must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "External driver timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(feature = "external-driver")]
fn default_timeout_ms() -> u64 {
    2000
}

#[cfg(feature = "external-driver")]
fn default_cache_ttl_ms() -> u64 {
    5000
}

#[cfg(feature = "external-driver")]
fn default_max_cache_entries() -> usize {
    10_000
}

/// Audit logging configuration for authorization decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthzAuditConfig {
    /// Log allowed authorization decisions.
    /// Defaults to false (only denied decisions are logged).
    #[serde(default)]
    pub log_allowed: bool,

    /// Log denied authorization decisions.
    #[serde(default = "default_true")]
    pub log_denied: bool,
}

impl Default for AuthzAuditConfig {
    fn default() -> Self {
        Self {
            log_allowed: false,
            log_denied: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_open() {
        let config: AuthorizationConfig = toml::from_str("").unwrap();
        assert!(matches!(config.driver, DriverConfig::Open));
        assert!(config.trusted_internal_callers);
        assert!(!config.audit.log_allowed);
        assert!(config.audit.log_denied);
    }

    #[test]
    fn test_rbac_groups_parse() {
        let config: AuthorizationConfig = toml::from_str(
            r#"
            [driver]
            type = "rbac"

            [[driver.groups]]
            name = "viewers"
            members = ["tls:abc"]

            [[driver.groups.permissions]]
            entity = "/1.0/networks/net1?project=demo"
            entitlement = "can_view"
        "#,
        )
        .unwrap();
        config.validate().unwrap();

        let DriverConfig::Rbac(rbac) = &config.driver else {
            panic!("expected rbac driver");
        };
        assert_eq!(rbac.groups.len(), 1);
        assert_eq!(
            rbac.groups[0].permissions[0],
            PermissionConfig::new(
                EntityUrl::network("demo", "net1").unwrap(),
                Entitlement::CanView
            )
        );
    }

    #[test]
    fn test_invalid_entitlement_for_entity_rejected() {
        let config: AuthorizationConfig = toml::from_str(
            r#"
            [driver]
            type = "rbac"

            [[driver.groups]]
            name = "bad"

            [[driver.groups.permissions]]
            entity = "/1.0/networks/net1?project=demo"
            entitlement = "can_exec"
        "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("bad"), "{err}");
        assert!(err.contains("can_exec"), "{err}");
    }

    #[test]
    fn test_bad_member_rejected() {
        let config = RbacDriverConfig {
            groups: vec![GroupConfig {
                name: "g".into(),
                description: None,
                members: vec!["no-method".into()],
                idp_groups: vec![],
                permissions: vec![],
            }],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let group = GroupConfig {
            name: "g".into(),
            description: None,
            members: vec![],
            idp_groups: vec![],
            permissions: vec![],
        };
        let config = RbacDriverConfig {
            groups: vec![group.clone(), group],
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("more than once"));
    }

    #[test]
    fn test_unknown_entity_url_fails_parse() {
        let result = toml::from_str::<AuthorizationConfig>(
            r#"
            [driver]
            type = "rbac"

            [[driver.groups]]
            name = "g"

            [[driver.groups.permissions]]
            entity = "/1.0/widgets/w1"
            entitlement = "can_view"
        "#,
        );
        assert!(result.is_err());
    }

    #[cfg(feature = "external-driver")]
    #[test]
    fn test_external_endpoint_validated() {
        let config = DriverConfig::External(ExternalDriverConfig::new("ftp://pdp.local"));
        assert!(config.validate().is_err());

        let config = DriverConfig::External(ExternalDriverConfig::new("https://pdp.local:8080"));
        config.validate().unwrap();
    }
}
