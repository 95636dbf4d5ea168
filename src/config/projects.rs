use serde::{Deserialize, Serialize};

use crate::{
    entity::{DEFAULT_PROJECT, EntityType},
    request::EffectiveProjectMap,
};

/// Per-project settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub features: ProjectFeatures,
}

/// Which resource collections a project keeps to itself.
///
/// A disabled feature means the project shares the `default` project's
/// collection, so policy on those entities is governed by `default`.
/// Defaults match a freshly created project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectFeatures {
    #[serde(default = "default_true")]
    pub images: bool,

    #[serde(default = "default_true")]
    pub profiles: bool,

    #[serde(default)]
    pub networks: bool,

    #[serde(default, alias = "networks.zones")]
    pub network_zones: bool,

    #[serde(default = "default_true", alias = "storage.volumes")]
    pub storage_volumes: bool,

    #[serde(default = "default_true", alias = "storage.buckets")]
    pub storage_buckets: bool,
}

impl Default for ProjectFeatures {
    fn default() -> Self {
        Self {
            images: true,
            profiles: true,
            networks: false,
            network_zones: false,
            storage_volumes: true,
            storage_buckets: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl ProjectFeatures {
    /// Every feature enabled: the project owns all of its collections.
    pub fn all_enabled() -> Self {
        Self {
            images: true,
            profiles: true,
            networks: true,
            network_zones: true,
            storage_volumes: true,
            storage_buckets: true,
        }
    }

    /// Entity types whose ownership follows each feature flag.
    fn delegations(&self) -> [(bool, &'static [EntityType]); 6] {
        [
            (self.images, &[EntityType::Image, EntityType::ImageAlias]),
            (self.profiles, &[EntityType::Profile]),
            (
                self.networks,
                &[
                    EntityType::Network,
                    EntityType::NetworkForward,
                    EntityType::NetworkAcl,
                ],
            ),
            (self.network_zones, &[EntityType::NetworkZone]),
            (self.storage_volumes, &[EntityType::StorageVolume]),
            (self.storage_buckets, &[EntityType::StorageBucket]),
        ]
    }

    /// Build the effective-project overrides for requests against `project`.
    pub fn effective_project_map(&self, project: &str) -> EffectiveProjectMap {
        let mut map = EffectiveProjectMap::new();
        if project == DEFAULT_PROJECT {
            return map;
        }

        for (enabled, types) in self.delegations() {
            if !enabled {
                for t in types {
                    map.insert(*t, DEFAULT_PROJECT);
                }
            }
        }
        map
    }
}
