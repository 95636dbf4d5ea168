use async_trait::async_trait;

use super::{AuthorizationDriver, AuthzError, DriverChecker};
use crate::{
    entitlement::Entitlement,
    entity::{EntityType, EntityUrl},
    identity::Identity,
    request::RequestContext,
};

/// Allows every check. Used when no access-control policy is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenDriver;

#[async_trait]
impl AuthorizationDriver for OpenDriver {
    fn name(&self) -> &'static str {
        "open"
    }

    async fn check(
        &self,
        _ctx: &RequestContext,
        _identity: &Identity,
        _entity: &EntityUrl,
        _entitlement: Entitlement,
    ) -> Result<bool, AuthzError> {
        Ok(true)
    }

    async fn build_checker(
        &self,
        _ctx: &RequestContext,
        _identity: &Identity,
        _entitlement: Entitlement,
        _entity_type: EntityType,
    ) -> Result<DriverChecker, AuthzError> {
        Ok(Box::new(|_: &EntityUrl| true))
    }
}
