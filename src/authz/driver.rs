//! The pluggable decision backend behind [`Authorizer`](super::Authorizer).

use async_trait::async_trait;

use super::AuthzError;
use crate::{
    entitlement::Entitlement,
    entity::{EntityType, EntityUrl},
    identity::Identity,
    request::RequestContext,
};

/// Decision function for one identity, entitlement and entity type.
///
/// Holds whatever the driver precomputed; evaluating it must not block.
pub type DriverChecker = Box<dyn Fn(&EntityUrl) -> bool + Send + Sync>;

/// A backend that decides whether an identity holds an entitlement.
///
/// Drivers see entity URLs after effective-project resolution and never
/// produce denial errors themselves: they answer `true`/`false`, or fail when
/// they cannot answer at all.
#[async_trait]
pub trait AuthorizationDriver: Send + Sync {
    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Decide a single check.
    async fn check(
        &self,
        ctx: &RequestContext,
        identity: &Identity,
        entity: &EntityUrl,
        entitlement: Entitlement,
    ) -> Result<bool, AuthzError>;

    /// Precompute a checker for many entities of `entity_type`.
    ///
    /// The checker must agree with [`check`](Self::check) for every entity of
    /// that type for the lifetime of the request.
    async fn build_checker(
        &self,
        ctx: &RequestContext,
        identity: &Identity,
        entitlement: Entitlement,
        entity_type: EntityType,
    ) -> Result<DriverChecker, AuthzError>;
}
