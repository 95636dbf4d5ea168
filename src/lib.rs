//! Authorization for a multi-tenant container and VM hypervisor control plane.
//!
//! Every API handler asks an [`Authorizer`] whether the caller's [`Identity`]
//! holds an [`Entitlement`] on an entity addressed by its [`EntityUrl`]. The
//! decision is delegated to a pluggable [`AuthorizationDriver`]:
//!
//! - `open` allows everything
//! - `rbac` evaluates statically configured groups
//! - `external` asks an HTTP policy decision point (feature `external-driver`)
//!
//! Denials are masked: callers that cannot view an entity get
//! [`AuthzError::NotFound`] instead of [`AuthzError::Forbidden`].

pub mod authz;
pub mod config;
pub mod entitlement;
pub mod entity;
pub mod identity;
#[cfg(feature = "cli")]
pub mod observability;
pub mod request;

pub use authz::{
    AuthorizationDriver, Authorizer, AuthorizerOptions, AuthzError, PermissionChecker,
    is_denied_error,
};
pub use config::{Config, ConfigError};
pub use entitlement::Entitlement;
pub use entity::{EntityType, EntityUrl};
pub use identity::{AuthenticationMethod, Identity};
pub use request::{RequestContext, RequestContextBuilder};
