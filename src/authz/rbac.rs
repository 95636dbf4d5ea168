//! Group-based authorization driver.
//!
//! Groups come from configuration. Each group lists its members and the
//! entitlements it holds on specific entities. A grant also implies
//! entitlements elsewhere in the hierarchy:
//!
//! - server `admin` implies everything, server `viewer` every view entitlement
//! - project `operator` implies everything inside the project, project
//!   `viewer` every view entitlement inside it
//! - project `can_<verb>_<collection>` implies `can_<verb>` on that
//!   collection's entities; `can_operate_instances` implies the instance
//!   operation entitlements
//! - instance `user`/`operator` imply the instance operation entitlements
//! - any entitlement on an entity implies `can_view` on it
//! - snapshots and network forwards inherit from their parent
//!
//! `devlxd` identities never receive server-wide grants.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Instant,
};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{AuthorizationDriver, AuthzError, DriverChecker};
use crate::{
    config::{GroupConfig, RbacDriverConfig},
    entitlement::{Entitlement, valid_entitlements},
    entity::{EntityType, EntityUrl},
    identity::{AuthenticationMethod, Identity},
    request::RequestContext,
};

const MAX_CACHED_IDENTITIES: usize = 4096;
/// Least recently used entries dropped at once when the cache is full.
const EVICTION_BATCH_SIZE: usize = 256;

struct Group {
    name: String,
    members: HashSet<String>,
    idp_groups: HashSet<String>,
    grants: Vec<(EntityUrl, Entitlement)>,
}

impl Group {
    fn from_config(config: &GroupConfig) -> Self {
        Self {
            name: config.name.clone(),
            members: config.members.iter().cloned().collect(),
            idp_groups: config.idp_groups.iter().cloned().collect(),
            grants: config
                .permissions
                .iter()
                .map(|p| (p.entity.clone(), p.entitlement))
                .collect(),
        }
    }

    fn contains(&self, identity: &Identity, key: &str) -> bool {
        self.members.contains(key)
            || identity
                .idp_groups
                .iter()
                .any(|g| self.idp_groups.contains(g))
    }
}

/// Everything one identity was granted directly, with the server-wide roles
/// pulled out so the hot path can short-circuit on them.
#[derive(Debug, Default)]
struct Grants {
    direct: HashMap<EntityUrl, HashSet<Entitlement>>,
    server_admin: bool,
    server_viewer: bool,
}

impl Grants {
    fn new(direct: HashMap<EntityUrl, HashSet<Entitlement>>) -> Self {
        let server = direct.get(&EntityUrl::server());
        let server_admin = server.is_some_and(|s| s.contains(&Entitlement::Admin));
        let server_viewer = server.is_some_and(|s| s.contains(&Entitlement::Viewer));
        Self {
            direct,
            server_admin,
            server_viewer,
        }
    }

    fn has(&self, entity: &EntityUrl, entitlement: Entitlement) -> bool {
        self.direct
            .get(entity)
            .is_some_and(|set| set.contains(&entitlement))
    }

    fn allows(&self, entity: &EntityUrl, entitlement: Entitlement) -> bool {
        if self.server_admin {
            return true;
        }
        if self.server_viewer && entitlement.is_view() {
            return true;
        }
        self.allows_scoped(entity, entitlement)
    }

    fn allows_scoped(&self, entity: &EntityUrl, entitlement: Entitlement) -> bool {
        let entity_type = entity.entity_type();

        if self.has(entity, entitlement) {
            return true;
        }

        if roles_implying(entity_type, entitlement)
            .iter()
            .any(|role| self.has(entity, *role))
        {
            return true;
        }

        if entitlement == Entitlement::CanView
            && valid_entitlements(entity_type)
                .iter()
                .filter(|e| **e != Entitlement::CanView)
                .any(|e| self.allows_scoped(entity, *e))
        {
            return true;
        }

        if let Some(parent_entitlement) = parent_entitlement(entity_type, entitlement)
            && let Some(parent) = entity.parent()
            && parent.entity_type().is_project_scoped()
            && self.allows_scoped(&parent, parent_entitlement)
        {
            return true;
        }

        if entity_type != EntityType::Project
            && let Some(project) = entity.project_url()
        {
            if self.has(&project, Entitlement::Operator) {
                return true;
            }
            if entitlement.is_view() && self.has(&project, Entitlement::Viewer) {
                return true;
            }
            if project_entitlements_implying(entity_type, entitlement)
                .iter()
                .any(|pe| self.allows_scoped(&project, *pe))
            {
                return true;
            }
        }

        false
    }
}

/// Roles held on the same entity that imply `entitlement`.
fn roles_implying(entity_type: EntityType, entitlement: Entitlement) -> &'static [Entitlement] {
    use Entitlement::*;

    match (entity_type, entitlement) {
        (EntityType::Project, Operator) => &[],
        (EntityType::Project, e) if e.is_view() => &[Operator, Viewer],
        (EntityType::Project, _) => &[Operator],
        (EntityType::Instance, User) => &[Operator],
        (EntityType::Instance, CanManageSnapshots | CanManageBackups) => &[Operator],
        (
            EntityType::Instance,
            CanView | CanUpdateState | CanConnectSftp | CanExec | CanAccessConsole | CanAccessFiles,
        ) => &[User, Operator],
        _ => &[],
    }
}

/// Entitlement on the parent entity that implies `entitlement` on a child.
fn parent_entitlement(entity_type: EntityType, entitlement: Entitlement) -> Option<Entitlement> {
    use Entitlement::*;

    match (entity_type, entitlement) {
        (EntityType::InstanceSnapshot, CanView) => Some(CanView),
        (EntityType::InstanceSnapshot, CanEdit | CanDelete) => Some(CanManageSnapshots),
        (EntityType::NetworkForward, CanView) => Some(CanView),
        (EntityType::NetworkForward, CanEdit | CanDelete) => Some(CanEdit),
        _ => None,
    }
}

/// Project-level entitlements that imply `entitlement` on an entity of
/// `entity_type` inside that project.
fn project_entitlements_implying(
    entity_type: EntityType,
    entitlement: Entitlement,
) -> &'static [Entitlement] {
    use Entitlement::*;

    match (entity_type, entitlement) {
        (EntityType::Instance, CanView) => &[CanViewInstances, CanOperateInstances],
        (EntityType::Instance, CanEdit) => &[CanEditInstances],
        (EntityType::Instance, CanDelete) => &[CanDeleteInstances],
        (
            EntityType::Instance,
            User | Operator | CanUpdateState | CanConnectSftp | CanExec | CanAccessConsole
            | CanAccessFiles | CanManageSnapshots | CanManageBackups,
        ) => &[CanOperateInstances],

        (EntityType::Network, CanView) => &[CanViewNetworks],
        (EntityType::Network, CanEdit) => &[CanEditNetworks],
        (EntityType::Network, CanDelete) => &[CanDeleteNetworks],

        (EntityType::NetworkAcl, CanView) => &[CanViewNetworkAcls],
        (EntityType::NetworkAcl, CanEdit) => &[CanEditNetworkAcls],
        (EntityType::NetworkAcl, CanDelete) => &[CanDeleteNetworkAcls],

        (EntityType::NetworkZone, CanView) => &[CanViewNetworkZones],
        (EntityType::NetworkZone, CanEdit) => &[CanEditNetworkZones],
        (EntityType::NetworkZone, CanDelete) => &[CanDeleteNetworkZones],

        (EntityType::Profile, CanView) => &[CanViewProfiles],
        (EntityType::Profile, CanEdit) => &[CanEditProfiles],
        (EntityType::Profile, CanDelete) => &[CanDeleteProfiles],

        (EntityType::Image, CanView) => &[CanViewImages],
        (EntityType::Image, CanEdit) => &[CanEditImages],
        (EntityType::Image, CanDelete) => &[CanDeleteImages],

        (EntityType::ImageAlias, CanView) => &[CanViewImageAliases],
        (EntityType::ImageAlias, CanEdit) => &[CanEditImageAliases],
        (EntityType::ImageAlias, CanDelete) => &[CanDeleteImageAliases],

        (EntityType::StorageVolume, CanView) => &[CanViewStorageVolumes],
        (EntityType::StorageVolume, CanEdit | CanManageSnapshots | CanManageBackups) => {
            &[CanEditStorageVolumes]
        }
        (EntityType::StorageVolume, CanDelete) => &[CanDeleteStorageVolumes],

        (EntityType::StorageBucket, CanView) => &[CanViewStorageBuckets],
        (EntityType::StorageBucket, CanEdit) => &[CanEditStorageBuckets],
        (EntityType::StorageBucket, CanDelete) => &[CanDeleteStorageBuckets],

        _ => &[],
    }
}

/// Cache key covering every identity attribute group membership depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GrantsKey {
    method: AuthenticationMethod,
    identifier: String,
    idp_groups: Vec<String>,
}

impl GrantsKey {
    fn new(identity: &Identity) -> Self {
        let mut idp_groups = identity.idp_groups.clone();
        idp_groups.sort();
        idp_groups.dedup();
        Self {
            method: identity.method,
            identifier: identity.identifier.clone(),
            idp_groups,
        }
    }
}

struct CachedGrants {
    grants: Arc<Grants>,
    last_accessed: Instant,
}

/// Restrictive driver backed by configured groups.
pub struct RbacDriver {
    groups: Vec<Group>,
    /// Grant sets by identity. Groups never change for the lifetime of the
    /// driver, so entries never go stale.
    cache: DashMap<GrantsKey, CachedGrants>,
}

impl RbacDriver {
    pub fn new(config: &RbacDriverConfig) -> Self {
        let groups: Vec<Group> = config.groups.iter().map(Group::from_config).collect();
        tracing::info!(groups = groups.len(), "RBAC authorization driver initialized");
        Self {
            groups,
            cache: DashMap::new(),
        }
    }

    fn grants_for(&self, identity: &Identity) -> Arc<Grants> {
        let cache_key = GrantsKey::new(identity);

        if let Some(mut entry) = self.cache.get_mut(&cache_key) {
            entry.last_accessed = Instant::now();
            return Arc::clone(&entry.grants);
        }

        let grants = Arc::new(self.compute_grants(identity, &identity.key()));
        self.evict_if_needed();
        self.cache.insert(
            cache_key,
            CachedGrants {
                grants: Arc::clone(&grants),
                last_accessed: Instant::now(),
            },
        );
        grants
    }

    fn evict_if_needed(&self) {
        let current_len = self.cache.len();
        if current_len < MAX_CACHED_IDENTITIES {
            return;
        }

        let target_size = MAX_CACHED_IDENTITIES.saturating_sub(EVICTION_BATCH_SIZE);
        let to_evict = current_len.saturating_sub(target_size);

        let mut entries: Vec<(GrantsKey, Instant)> = self
            .cache
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_accessed))
            .collect();
        entries.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (key, _) in entries.into_iter().take(to_evict) {
            self.cache.remove(&key);
        }
        tracing::debug!(evicted = to_evict, "Evicted cached RBAC grants");
    }

    fn compute_grants(&self, identity: &Identity, key: &str) -> Grants {
        let restricted = identity.method == AuthenticationMethod::DevLxd;
        let mut direct: HashMap<EntityUrl, HashSet<Entitlement>> = HashMap::new();
        let mut matched = Vec::new();

        for group in self.groups.iter().filter(|g| g.contains(identity, key)) {
            matched.push(group.name.as_str());
            for (entity, entitlement) in &group.grants {
                if restricted && entity.entity_type() == EntityType::Server {
                    continue;
                }
                direct
                    .entry(entity.clone())
                    .or_default()
                    .insert(*entitlement);
            }
        }

        tracing::debug!(
            identity = %key,
            groups = ?matched,
            entities = direct.len(),
            restricted,
            "Computed RBAC grants"
        );

        Grants::new(direct)
    }
}

#[async_trait]
impl AuthorizationDriver for RbacDriver {
    fn name(&self) -> &'static str {
        "rbac"
    }

    async fn check(
        &self,
        _ctx: &RequestContext,
        identity: &Identity,
        entity: &EntityUrl,
        entitlement: Entitlement,
    ) -> Result<bool, AuthzError> {
        Ok(self.grants_for(identity).allows(entity, entitlement))
    }

    async fn build_checker(
        &self,
        _ctx: &RequestContext,
        identity: &Identity,
        entitlement: Entitlement,
        _entity_type: EntityType,
    ) -> Result<DriverChecker, AuthzError> {
        let grants = self.grants_for(identity);
        Ok(Box::new(move |entity: &EntityUrl| {
            grants.allows(entity, entitlement)
        }))
    }
}
