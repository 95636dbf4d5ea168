//! Entitlements and the per-entity-type registry of which ones are valid.
//!
//! The registry is a set of static tables: it never changes after the
//! binary is built and can be read from any thread without locking.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{authz::AuthzError, entity::EntityType};

macro_rules! entitlements {
    ($($variant:ident => $name:literal,)+) => {
        /// A named permission checked against an identity and an entity.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum Entitlement {
            $($variant,)+
        }

        impl Entitlement {
            pub const ALL: &'static [Entitlement] = &[$(Entitlement::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Entitlement::$variant => $name,)+
                }
            }
        }

        impl FromStr for Entitlement {
            type Err = AuthzError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Entitlement::$variant),)+
                    other => Err(AuthzError::InvalidEntitlement {
                        entity_type: None,
                        entitlement: other.to_string(),
                    }),
                }
            }
        }
    };
}

entitlements! {
    Admin => "admin",
    Operator => "operator",
    User => "user",
    Viewer => "viewer",
    CanView => "can_view",
    CanEdit => "can_edit",
    CanDelete => "can_delete",

    // Server
    CanCreateProjects => "can_create_projects",
    CanCreateStoragePools => "can_create_storage_pools",
    CanCreateIdentities => "can_create_identities",
    CanCreateGroups => "can_create_groups",
    CanCreateCertificates => "can_create_certificates",
    CanViewResources => "can_view_resources",
    CanViewMetrics => "can_view_metrics",
    CanViewWarnings => "can_view_warnings",
    CanViewProjects => "can_view_projects",

    // Project collections
    CanCreateInstances => "can_create_instances",
    CanViewInstances => "can_view_instances",
    CanEditInstances => "can_edit_instances",
    CanDeleteInstances => "can_delete_instances",
    CanOperateInstances => "can_operate_instances",
    CanCreateNetworks => "can_create_networks",
    CanViewNetworks => "can_view_networks",
    CanEditNetworks => "can_edit_networks",
    CanDeleteNetworks => "can_delete_networks",
    CanCreateNetworkAcls => "can_create_network_acls",
    CanViewNetworkAcls => "can_view_network_acls",
    CanEditNetworkAcls => "can_edit_network_acls",
    CanDeleteNetworkAcls => "can_delete_network_acls",
    CanCreateNetworkZones => "can_create_network_zones",
    CanViewNetworkZones => "can_view_network_zones",
    CanEditNetworkZones => "can_edit_network_zones",
    CanDeleteNetworkZones => "can_delete_network_zones",
    CanCreateProfiles => "can_create_profiles",
    CanViewProfiles => "can_view_profiles",
    CanEditProfiles => "can_edit_profiles",
    CanDeleteProfiles => "can_delete_profiles",
    CanCreateImages => "can_create_images",
    CanViewImages => "can_view_images",
    CanEditImages => "can_edit_images",
    CanDeleteImages => "can_delete_images",
    CanCreateImageAliases => "can_create_image_aliases",
    CanViewImageAliases => "can_view_image_aliases",
    CanEditImageAliases => "can_edit_image_aliases",
    CanDeleteImageAliases => "can_delete_image_aliases",
    CanCreateStorageVolumes => "can_create_storage_volumes",
    CanViewStorageVolumes => "can_view_storage_volumes",
    CanEditStorageVolumes => "can_edit_storage_volumes",
    CanDeleteStorageVolumes => "can_delete_storage_volumes",
    CanCreateStorageBuckets => "can_create_storage_buckets",
    CanViewStorageBuckets => "can_view_storage_buckets",
    CanEditStorageBuckets => "can_edit_storage_buckets",
    CanDeleteStorageBuckets => "can_delete_storage_buckets",
    CanViewOperations => "can_view_operations",
    CanViewEvents => "can_view_events",

    // Instances
    CanUpdateState => "can_update_state",
    CanExec => "can_exec",
    CanAccessConsole => "can_access_console",
    CanAccessFiles => "can_access_files",
    CanConnectSftp => "can_connect_sftp",

    // Instances and storage volumes
    CanManageSnapshots => "can_manage_snapshots",
    CanManageBackups => "can_manage_backups",
}

impl Entitlement {
    /// Read-only entitlements, implied by a `viewer` role.
    pub fn is_view(&self) -> bool {
        matches!(self, Entitlement::Viewer) || self.as_str().starts_with("can_view")
    }
}

impl fmt::Display for Entitlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use Entitlement::*;

const SERVER: &[Entitlement] = &[
    Admin,
    Viewer,
    CanView,
    CanEdit,
    CanCreateProjects,
    CanViewProjects,
    CanCreateStoragePools,
    CanCreateIdentities,
    CanCreateGroups,
    CanCreateCertificates,
    CanViewResources,
    CanViewMetrics,
    CanViewWarnings,
];

const PROJECT: &[Entitlement] = &[
    Operator,
    Viewer,
    CanView,
    CanEdit,
    CanDelete,
    CanCreateInstances,
    CanViewInstances,
    CanEditInstances,
    CanDeleteInstances,
    CanOperateInstances,
    CanCreateNetworks,
    CanViewNetworks,
    CanEditNetworks,
    CanDeleteNetworks,
    CanCreateNetworkAcls,
    CanViewNetworkAcls,
    CanEditNetworkAcls,
    CanDeleteNetworkAcls,
    CanCreateNetworkZones,
    CanViewNetworkZones,
    CanEditNetworkZones,
    CanDeleteNetworkZones,
    CanCreateProfiles,
    CanViewProfiles,
    CanEditProfiles,
    CanDeleteProfiles,
    CanCreateImages,
    CanViewImages,
    CanEditImages,
    CanDeleteImages,
    CanCreateImageAliases,
    CanViewImageAliases,
    CanEditImageAliases,
    CanDeleteImageAliases,
    CanCreateStorageVolumes,
    CanViewStorageVolumes,
    CanEditStorageVolumes,
    CanDeleteStorageVolumes,
    CanCreateStorageBuckets,
    CanViewStorageBuckets,
    CanEditStorageBuckets,
    CanDeleteStorageBuckets,
    CanViewOperations,
    CanViewEvents,
];

const INSTANCE: &[Entitlement] = &[
    User,
    Operator,
    CanView,
    CanEdit,
    CanDelete,
    CanUpdateState,
    CanExec,
    CanAccessConsole,
    CanAccessFiles,
    CanConnectSftp,
    CanManageSnapshots,
    CanManageBackups,
];

const STORAGE_VOLUME: &[Entitlement] = &[
    CanView,
    CanEdit,
    CanDelete,
    CanManageSnapshots,
    CanManageBackups,
];

const BASIC: &[Entitlement] = &[CanView, CanEdit, CanDelete];

/// Entitlements that may be checked or granted on entities of `entity_type`.
///
/// Every type supports `can_view`.
pub fn valid_entitlements(entity_type: EntityType) -> &'static [Entitlement] {
    match entity_type {
        EntityType::Server => SERVER,
        EntityType::Project => PROJECT,
        EntityType::Instance => INSTANCE,
        EntityType::StorageVolume => STORAGE_VOLUME,
        EntityType::Identity
        | EntityType::AuthGroup
        | EntityType::Certificate
        | EntityType::StoragePool
        | EntityType::InstanceSnapshot
        | EntityType::Network
        | EntityType::NetworkForward
        | EntityType::NetworkAcl
        | EntityType::NetworkZone
        | EntityType::Profile
        | EntityType::Image
        | EntityType::ImageAlias
        | EntityType::StorageBucket => BASIC,
    }
}

pub fn is_valid(entity_type: EntityType, entitlement: Entitlement) -> bool {
    valid_entitlements(entity_type).contains(&entitlement)
}

/// Like [`is_valid`], but as an error suitable for `?`.
pub fn validate(entity_type: EntityType, entitlement: Entitlement) -> Result<(), AuthzError> {
    if is_valid(entity_type, entitlement) {
        Ok(())
    } else {
        Err(AuthzError::InvalidEntitlement {
            entity_type: Some(entity_type),
            entitlement: entitlement.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_supports_can_view() {
        for t in EntityType::ALL {
            assert!(is_valid(t, CanView), "{t} must support can_view");
        }
    }

    #[test]
    fn test_every_entitlement_is_valid_somewhere() {
        for ent in Entitlement::ALL {
            assert!(
                EntityType::ALL.iter().any(|t| is_valid(*t, *ent)),
                "{ent} is not valid for any entity type"
            );
        }
    }

    #[test]
    fn test_invalid_combinations() {
        assert!(!is_valid(EntityType::Network, CanExec));
        assert!(!is_valid(EntityType::Server, CanDelete));
        assert!(!is_valid(EntityType::Instance, CanOperateInstances));
        assert!(is_valid(EntityType::Project, CanOperateInstances));

        let err = validate(EntityType::Network, CanExec).unwrap_err();
        assert!(matches!(
            err,
            AuthzError::InvalidEntitlement {
                entity_type: Some(EntityType::Network),
                ..
            }
        ));
    }

    #[test]
    fn test_string_roundtrip() {
        for ent in Entitlement::ALL {
            assert_eq!(ent.as_str().parse::<Entitlement>().unwrap(), *ent);
        }
        assert!("can_fly".parse::<Entitlement>().is_err());
    }

    #[test]
    fn test_serde_snake_case_matches_as_str() {
        for ent in Entitlement::ALL {
            let json = serde_json::to_string(ent).unwrap();
            assert_eq!(json, format!("\"{}\"", ent.as_str()));
        }
    }

    #[test]
    fn test_is_view() {
        assert!(CanView.is_view());
        assert!(CanViewNetworks.is_view());
        assert!(Viewer.is_view());
        assert!(!CanEdit.is_view());
        assert!(!Operator.is_view());
    }
}
