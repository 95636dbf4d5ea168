//! Authorization: the [`Authorizer`] facade and its pluggable drivers.
//!
//! The authorization flow for a single check:
//! 1. Validate the entitlement against the entity type
//! 2. Substitute the effective project for delegable entity types
//! 3. Short-circuit trusted internal callers (`unix`, `cluster`)
//! 4. Ask the active driver, racing the request's cancellation and deadline
//! 5. Map a denial to `NotFound` (no view access) or `Forbidden`

mod driver;
mod error;
#[cfg(feature = "external-driver")]
mod external;
mod open;
mod rbac;
pub mod reporter;
mod resolver;

use std::sync::Arc;

pub use driver::{AuthorizationDriver, DriverChecker};
pub use error::{AuthzError, CancelReason, ErrorInfo, ErrorResponse, is_denied_error};
#[cfg(feature = "external-driver")]
pub use external::ExternalDriver;
pub use open::OpenDriver;
use parking_lot::RwLock;
pub use rbac::RbacDriver;
pub use resolver::effective_entity_url;

use crate::{
    config::{AuthorizationConfig, AuthzAuditConfig, ConfigError, DriverConfig},
    entitlement::{self, Entitlement},
    entity::{EntityType, EntityUrl},
    identity::Identity,
    request::RequestContext,
};

/// Instantiate the driver selected by configuration.
pub fn build_driver(config: &DriverConfig) -> Result<Arc<dyn AuthorizationDriver>, ConfigError> {
    Ok(match config {
        DriverConfig::Open => Arc::new(OpenDriver),
        DriverConfig::Rbac(c) => Arc::new(RbacDriver::new(c)),
        #[cfg(feature = "external-driver")]
        DriverConfig::External(c) => Arc::new(ExternalDriver::new(c)?),
    })
}

/// Facade behaviour that does not depend on the driver.
#[derive(Debug, Clone)]
pub struct AuthorizerOptions {
    /// Allow `unix` and `cluster` callers without asking the driver.
    pub trusted_internal_callers: bool,
    pub audit: AuthzAuditConfig,
}

impl Default for AuthorizerOptions {
    fn default() -> Self {
        Self {
            trusted_internal_callers: true,
            audit: AuthzAuditConfig::default(),
        }
    }
}

/// Single entry point for permission checks.
///
/// Cheap to share behind an `Arc`; the active driver can be replaced at
/// runtime with [`swap_driver`](Self::swap_driver). Checks already in flight
/// finish against the driver they started with.
pub struct Authorizer {
    driver: RwLock<Arc<dyn AuthorizationDriver>>,
    options: AuthorizerOptions,
}

impl Authorizer {
    pub fn new(driver: Arc<dyn AuthorizationDriver>) -> Self {
        Self::with_options(driver, AuthorizerOptions::default())
    }

    pub fn with_options(driver: Arc<dyn AuthorizationDriver>, options: AuthorizerOptions) -> Self {
        Self {
            driver: RwLock::new(driver),
            options,
        }
    }

    pub fn from_config(config: &AuthorizationConfig) -> Result<Self, ConfigError> {
        let driver = build_driver(&config.driver)?;
        Ok(Self::with_options(
            driver,
            AuthorizerOptions {
                trusted_internal_callers: config.trusted_internal_callers,
                audit: config.audit.clone(),
            },
        ))
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.read().name()
    }

    /// Replace the active driver.
    pub fn swap_driver(&self, driver: Arc<dyn AuthorizationDriver>) {
        let mut current = self.driver.write();
        tracing::info!(
            from = current.name(),
            to = driver.name(),
            "Switching authorization driver"
        );
        *current = driver;
    }

    fn driver(&self) -> Arc<dyn AuthorizationDriver> {
        self.driver.read().clone()
    }

    fn is_trusted(&self, identity: &Identity) -> bool {
        self.options.trusted_internal_callers && identity.method.is_internal()
    }

    /// Check that the caller holds `entitlement` on `entity`.
    ///
    /// Delegable entity types are checked against their effective project.
    /// Returns `NotFound` when the caller cannot view the entity at all and
    /// `Forbidden` when it can view it but lacks `entitlement`.
    pub async fn check_permission(
        &self,
        ctx: &RequestContext,
        entity: &EntityUrl,
        entitlement: Entitlement,
    ) -> Result<(), AuthzError> {
        let resolved = effective_entity_url(ctx, entity);
        self.check_resolved(ctx, &resolved, entitlement).await
    }

    /// Like [`check_permission`](Self::check_permission), but `entity` is
    /// used as given.
    ///
    /// Only for callers that already selected the owning project themselves;
    /// resolving again would substitute twice.
    pub async fn check_permission_without_effective_project(
        &self,
        ctx: &RequestContext,
        entity: &EntityUrl,
        entitlement: Entitlement,
    ) -> Result<(), AuthzError> {
        self.check_resolved(ctx, entity, entitlement).await
    }

    async fn check_resolved(
        &self,
        ctx: &RequestContext,
        entity: &EntityUrl,
        entitlement: Entitlement,
    ) -> Result<(), AuthzError> {
        entitlement::validate(entity.entity_type(), entitlement)?;

        let identity = ctx.identity();
        if self.is_trusted(identity) {
            self.audit(ctx, entity, entitlement, None);
            return Ok(());
        }

        let driver = self.driver();
        let allowed = ctx
            .run_cancellable(driver.check(ctx, identity, entity, entitlement))
            .await?;
        if allowed {
            self.audit(ctx, entity, entitlement, None);
            return Ok(());
        }

        let denial = if entitlement == Entitlement::CanView {
            AuthzError::NotFound
        } else {
            let can_view = ctx
                .run_cancellable(driver.check(ctx, identity, entity, Entitlement::CanView))
                .await?;
            if can_view {
                AuthzError::Forbidden
            } else {
                AuthzError::NotFound
            }
        };

        self.audit(ctx, entity, entitlement, Some(&denial));
        Err(denial)
    }

    /// Build a checker for many entities of `entity_type`.
    ///
    /// The driver's decision function is built once; each entity passed to
    /// the checker is resolved to its effective project first.
    pub async fn get_permission_checker<'ctx>(
        &self,
        ctx: &'ctx RequestContext,
        entitlement: Entitlement,
        entity_type: EntityType,
    ) -> Result<PermissionChecker<'ctx>, AuthzError> {
        let decide = self.driver_checker(ctx, entitlement, entity_type).await?;
        Ok(PermissionChecker::new(
            entity_type,
            entitlement,
            Box::new(move |entity: &EntityUrl| {
                decide(&*effective_entity_url(ctx, entity))
            }),
        ))
    }

    /// Like [`get_permission_checker`](Self::get_permission_checker), without
    /// effective-project resolution.
    pub async fn get_permission_checker_without_effective_project<'ctx>(
        &self,
        ctx: &'ctx RequestContext,
        entitlement: Entitlement,
        entity_type: EntityType,
    ) -> Result<PermissionChecker<'ctx>, AuthzError> {
        let decide = self.driver_checker(ctx, entitlement, entity_type).await?;
        Ok(PermissionChecker::new(entity_type, entitlement, decide))
    }

    async fn driver_checker(
        &self,
        ctx: &RequestContext,
        entitlement: Entitlement,
        entity_type: EntityType,
    ) -> Result<DriverChecker, AuthzError> {
        entitlement::validate(entity_type, entitlement)?;

        let identity = ctx.identity();
        if self.is_trusted(identity) {
            return Ok(Box::new(|_: &EntityUrl| true));
        }

        let driver = self.driver();
        ctx.run_cancellable(driver.build_checker(ctx, identity, entitlement, entity_type))
            .await
    }

    fn audit(
        &self,
        ctx: &RequestContext,
        entity: &EntityUrl,
        entitlement: Entitlement,
        denial: Option<&AuthzError>,
    ) {
        match denial {
            None if self.options.audit.log_allowed => tracing::info!(
                target: "hvm_authz::audit",
                request_id = %ctx.request_id(),
                identity = %ctx.identity().key(),
                entity = %entity,
                entitlement = %entitlement,
                decision = "allow",
                "Authorization decision"
            ),
            Some(err) if self.options.audit.log_denied => tracing::info!(
                target: "hvm_authz::audit",
                request_id = %ctx.request_id(),
                identity = %ctx.identity().key(),
                entity = %entity,
                entitlement = %entitlement,
                decision = "deny",
                reason = err.error_code(),
                "Authorization decision"
            ),
            _ => {}
        }
    }
}

/// Reusable decision function for one entitlement on one entity type.
///
/// Borrows the request context it was built for, so it cannot outlive the
/// request.
pub struct PermissionChecker<'ctx> {
    entity_type: EntityType,
    entitlement: Entitlement,
    decide: Box<dyn Fn(&EntityUrl) -> bool + Send + Sync + 'ctx>,
}

impl<'ctx> PermissionChecker<'ctx> {
    fn new(
        entity_type: EntityType,
        entitlement: Entitlement,
        decide: Box<dyn Fn(&EntityUrl) -> bool + Send + Sync + 'ctx>,
    ) -> Self {
        Self {
            entity_type,
            entitlement,
            decide,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn entitlement(&self) -> Entitlement {
        self.entitlement
    }

    /// Whether the caller holds the entitlement on `entity`.
    ///
    /// Entities of another type are never allowed.
    pub fn check(&self, entity: &EntityUrl) -> bool {
        if entity.entity_type() != self.entity_type {
            tracing::warn!(
                expected = %self.entity_type,
                actual = %entity.entity_type(),
                entity = %entity,
                "Permission checker used with the wrong entity type"
            );
            return false;
        }
        (self.decide)(entity)
    }
}

impl std::fmt::Debug for PermissionChecker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionChecker")
            .field("entity_type", &self.entity_type)
            .field("entitlement", &self.entitlement)
            .finish_non_exhaustive()
    }
}
