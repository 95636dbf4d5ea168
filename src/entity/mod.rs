//! Entity addressing.
//!
//! Every resource the control plane manages is addressed by an [`EntityUrl`]:
//! an entity type, the project that owns it (empty for global resources), and
//! the ordered path segments that locate it inside its collection.
//!
//! The canonical string form mirrors the REST API paths:
//!
//! ```text
//! /1.0                                              server
//! /1.0/projects/demo                                project
//! /1.0/networks/lxdbr0?project=demo                 network
//! /1.0/networks/lxdbr0/forwards/10.0.0.1?project=demo
//! /1.0/storage-pools/default/volumes/custom/data?project=demo
//! ```

mod url;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
pub use url::EntityUrl;

use crate::authz::AuthzError;

/// API version prefix shared by every entity URL.
pub const API_PREFIX: &str = "/1.0";

/// The project used when a project-scoped URL does not name one.
pub const DEFAULT_PROJECT: &str = "default";

/// One component of an entity path template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathPart {
    /// Fixed collection name (e.g. `networks`).
    Literal(&'static str),
    /// Caller-supplied segment, named for error messages.
    Segment(&'static str),
}

use PathPart::{Literal, Segment};

/// Kind of resource an entity URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Server,
    Project,
    Identity,
    AuthGroup,
    Certificate,
    StoragePool,
    Instance,
    InstanceSnapshot,
    Network,
    NetworkForward,
    NetworkAcl,
    NetworkZone,
    Profile,
    Image,
    ImageAlias,
    StorageVolume,
    StorageBucket,
}

impl EntityType {
    /// All entity types, in a stable order.
    pub const ALL: [EntityType; 17] = [
        EntityType::Server,
        EntityType::Project,
        EntityType::Identity,
        EntityType::AuthGroup,
        EntityType::Certificate,
        EntityType::StoragePool,
        EntityType::Instance,
        EntityType::InstanceSnapshot,
        EntityType::Network,
        EntityType::NetworkForward,
        EntityType::NetworkAcl,
        EntityType::NetworkZone,
        EntityType::Profile,
        EntityType::Image,
        EntityType::ImageAlias,
        EntityType::StorageVolume,
        EntityType::StorageBucket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Server => "server",
            EntityType::Project => "project",
            EntityType::Identity => "identity",
            EntityType::AuthGroup => "auth_group",
            EntityType::Certificate => "certificate",
            EntityType::StoragePool => "storage_pool",
            EntityType::Instance => "instance",
            EntityType::InstanceSnapshot => "instance_snapshot",
            EntityType::Network => "network",
            EntityType::NetworkForward => "network_forward",
            EntityType::NetworkAcl => "network_acl",
            EntityType::NetworkZone => "network_zone",
            EntityType::Profile => "profile",
            EntityType::Image => "image",
            EntityType::ImageAlias => "image_alias",
            EntityType::StorageVolume => "storage_volume",
            EntityType::StorageBucket => "storage_bucket",
        }
    }

    /// Whether entities of this type live inside a project.
    ///
    /// Global types (server, projects themselves, identities, groups,
    /// certificates, storage pools) always carry an empty project.
    pub fn is_project_scoped(&self) -> bool {
        !matches!(
            self,
            EntityType::Server
                | EntityType::Project
                | EntityType::Identity
                | EntityType::AuthGroup
                | EntityType::Certificate
                | EntityType::StoragePool
        )
    }

    /// Whether a project can delegate ownership of this type to another project.
    ///
    /// When a project does not enable the matching `features.*` flag, entities
    /// of these types referenced from it are owned by the default project.
    pub fn supports_project_delegation(&self) -> bool {
        matches!(
            self,
            EntityType::Image
                | EntityType::ImageAlias
                | EntityType::Profile
                | EntityType::Network
                | EntityType::NetworkForward
                | EntityType::NetworkAcl
                | EntityType::NetworkZone
                | EntityType::StorageVolume
                | EntityType::StorageBucket
        )
    }

    /// The type that contains entities of this type, for nested resources.
    pub fn parent(&self) -> Option<EntityType> {
        match self {
            EntityType::InstanceSnapshot => Some(EntityType::Instance),
            EntityType::NetworkForward => Some(EntityType::Network),
            EntityType::StorageVolume | EntityType::StorageBucket => Some(EntityType::StoragePool),
            _ => None,
        }
    }

    /// Path template below [`API_PREFIX`].
    pub(crate) fn path_template(&self) -> &'static [PathPart] {
        match self {
            EntityType::Server => &[],
            EntityType::Project => &[Literal("projects"), Segment("project")],
            EntityType::Identity => &[
                Literal("auth"),
                Literal("identities"),
                Segment("authentication method"),
                Segment("identity"),
            ],
            EntityType::AuthGroup => &[Literal("auth"), Literal("groups"), Segment("group")],
            EntityType::Certificate => &[Literal("certificates"), Segment("fingerprint")],
            EntityType::StoragePool => &[Literal("storage-pools"), Segment("pool")],
            EntityType::Instance => &[Literal("instances"), Segment("instance")],
            EntityType::InstanceSnapshot => &[
                Literal("instances"),
                Segment("instance"),
                Literal("snapshots"),
                Segment("snapshot"),
            ],
            EntityType::Network => &[Literal("networks"), Segment("network")],
            EntityType::NetworkForward => &[
                Literal("networks"),
                Segment("network"),
                Literal("forwards"),
                Segment("listen address"),
            ],
            EntityType::NetworkAcl => &[Literal("network-acls"), Segment("acl")],
            EntityType::NetworkZone => &[Literal("network-zones"), Segment("zone")],
            EntityType::Profile => &[Literal("profiles"), Segment("profile")],
            EntityType::Image => &[Literal("images"), Segment("fingerprint")],
            EntityType::ImageAlias => &[Literal("images"), Literal("aliases"), Segment("alias")],
            EntityType::StorageVolume => &[
                Literal("storage-pools"),
                Segment("pool"),
                Literal("volumes"),
                Segment("volume type"),
                Segment("volume"),
            ],
            EntityType::StorageBucket => &[
                Literal("storage-pools"),
                Segment("pool"),
                Literal("buckets"),
                Segment("bucket"),
            ],
        }
    }

    /// Number of caller-supplied path segments.
    pub fn segment_count(&self) -> usize {
        self.path_template()
            .iter()
            .filter(|part| matches!(part, Segment(_)))
            .count()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AuthzError::InvalidEntity(format!("Unknown entity type '{s}'")))
    }
}
