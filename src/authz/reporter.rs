//! Annotating API representations with the caller's entitlements.
//!
//! Best effort: a failure while computing entitlements is logged and the
//! representation is left without hints.

use futures::future::join_all;

use super::{Authorizer, AuthzError};
use crate::{
    entitlement::{Entitlement, valid_entitlements},
    entity::{EntityType, EntityUrl},
    request::RequestContext,
};

/// Implemented by API representations that can carry entitlement hints.
pub trait EntitlementReporter {
    fn report_entitlements(&mut self, entitlements: Vec<String>);
}

fn requested_or_all(entity_type: EntityType, requested: &[Entitlement]) -> Vec<Entitlement> {
    let valid = valid_entitlements(entity_type);
    if requested.is_empty() {
        return valid.to_vec();
    }
    requested
        .iter()
        .copied()
        .filter(|e| {
            let ok = valid.contains(e);
            if !ok {
                tracing::debug!(entity_type = %entity_type, entitlement = %e, "Skipping entitlement not valid for entity type");
            }
            ok
        })
        .collect()
}

/// Entitlements from `requested` (all valid ones when empty) that the caller
/// holds on `entity`.
pub async fn allowed_entitlements(
    authorizer: &Authorizer,
    ctx: &RequestContext,
    entity: &EntityUrl,
    requested: &[Entitlement],
) -> Result<Vec<Entitlement>, AuthzError> {
    let candidates = requested_or_all(entity.entity_type(), requested);
    let results = join_all(
        candidates
            .iter()
            .map(|e| authorizer.check_permission(ctx, entity, *e)),
    )
    .await;

    let mut allowed = Vec::new();
    for (entitlement, result) in candidates.into_iter().zip(results) {
        match result {
            Ok(()) => allowed.push(entitlement),
            Err(e) if e.is_denied() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(allowed)
}

/// Compute the caller's entitlements on `entity` and hand them to `reporter`.
pub async fn report_entitlements<R>(
    authorizer: &Authorizer,
    ctx: &RequestContext,
    entity: &EntityUrl,
    requested: &[Entitlement],
    reporter: &mut R,
) where
    R: EntitlementReporter + ?Sized,
{
    match allowed_entitlements(authorizer, ctx, entity, requested).await {
        Ok(allowed) => {
            reporter.report_entitlements(allowed.iter().map(|e| e.to_string()).collect());
        }
        Err(e) => {
            tracing::warn!(
                request_id = %ctx.request_id(),
                entity = %entity,
                error = %e,
                "Failed to compute entitlements"
            );
        }
    }
}

/// Like [`report_entitlements`] for a list of entities of one type.
///
/// Builds one permission checker per entitlement and applies it to every
/// item.
pub async fn report_entitlements_for_all<T, F>(
    authorizer: &Authorizer,
    ctx: &RequestContext,
    entity_type: EntityType,
    requested: &[Entitlement],
    items: &mut [T],
    url_of: F,
) where
    T: EntitlementReporter,
    F: Fn(&T) -> EntityUrl,
{
    let candidates = requested_or_all(entity_type, requested);
    let checkers = join_all(
        candidates
            .iter()
            .map(|e| authorizer.get_permission_checker(ctx, *e, entity_type)),
    )
    .await;

    let checkers = match checkers.into_iter().collect::<Result<Vec<_>, _>>() {
        Ok(checkers) => checkers,
        Err(e) => {
            tracing::warn!(
                request_id = %ctx.request_id(),
                entity_type = %entity_type,
                error = %e,
                "Failed to compute entitlements"
            );
            return;
        }
    };

    for item in items.iter_mut() {
        let url = url_of(item);
        let allowed = checkers
            .iter()
            .filter(|checker| checker.check(&url))
            .map(|checker| checker.entitlement().to_string())
            .collect();
        item.report_entitlements(allowed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        authz::{AuthorizationDriver, DriverChecker, OpenDriver, RbacDriver},
        config::{GroupConfig, PermissionConfig, RbacDriverConfig},
        identity::{AuthenticationMethod, Identity},
    };

    #[derive(Debug, Default)]
    struct NetworkView {
        name: String,
        access_entitlements: Option<Vec<String>>,
    }

    impl EntitlementReporter for NetworkView {
        fn report_entitlements(&mut self, entitlements: Vec<String>) {
            self.access_entitlements = Some(entitlements);
        }
    }

    struct FailingDriver;

    #[async_trait]
    impl AuthorizationDriver for FailingDriver {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn check(
            &self,
            _ctx: &RequestContext,
            _identity: &Identity,
            _entity: &EntityUrl,
            _entitlement: Entitlement,
        ) -> Result<bool, AuthzError> {
            Err(AuthzError::policy_unavailable("store offline"))
        }

        async fn build_checker(
            &self,
            _ctx: &RequestContext,
            _identity: &Identity,
            _entitlement: Entitlement,
            _entity_type: EntityType,
        ) -> Result<DriverChecker, AuthzError> {
            Err(AuthzError::policy_unavailable("store offline"))
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::builder(Identity::new(AuthenticationMethod::Tls, "alice")).build()
    }

    fn net(name: &str) -> EntityUrl {
        EntityUrl::network("demo", name).unwrap()
    }

    fn rbac_viewer_of(entity: EntityUrl) -> Authorizer {
        Authorizer::new(Arc::new(RbacDriver::new(&RbacDriverConfig {
            groups: vec![GroupConfig {
                name: "viewers".into(),
                description: None,
                members: vec!["tls:alice".into()],
                idp_groups: vec![],
                permissions: vec![PermissionConfig::new(entity, Entitlement::CanView)],
            }],
        })))
    }

    #[tokio::test]
    async fn test_open_driver_reports_everything() {
        let authorizer = Authorizer::new(Arc::new(OpenDriver));
        let mut view = NetworkView::default();
        report_entitlements(&authorizer, &ctx(), &net("net1"), &[], &mut view).await;
        assert_eq!(
            view.access_entitlements.unwrap(),
            vec!["can_view", "can_edit", "can_delete"]
        );
    }

    #[tokio::test]
    async fn test_reports_only_allowed_subset() {
        let authorizer = rbac_viewer_of(net("net1"));
        let mut view = NetworkView::default();
        report_entitlements(
            &authorizer,
            &ctx(),
            &net("net1"),
            &[Entitlement::CanView, Entitlement::CanEdit],
            &mut view,
        )
        .await;
        assert_eq!(view.access_entitlements.unwrap(), vec!["can_view"]);
    }

    #[tokio::test]
    async fn test_invalid_requested_entitlements_are_skipped() {
        let authorizer = Authorizer::new(Arc::new(OpenDriver));
        let allowed = allowed_entitlements(
            &authorizer,
            &ctx(),
            &net("net1"),
            &[Entitlement::CanExec, Entitlement::CanView],
        )
        .await
        .unwrap();
        assert_eq!(allowed, vec![Entitlement::CanView]);
    }

    #[tokio::test]
    async fn test_failure_leaves_representation_untouched() {
        let authorizer = Authorizer::new(Arc::new(FailingDriver));
        let mut view = NetworkView::default();
        report_entitlements(&authorizer, &ctx(), &net("net1"), &[], &mut view).await;
        assert!(view.access_entitlements.is_none());

        let mut views = vec![NetworkView::default()];
        report_entitlements_for_all(
            &authorizer,
            &ctx(),
            EntityType::Network,
            &[],
            &mut views,
            |_| net("net1"),
        )
        .await;
        assert!(views[0].access_entitlements.is_none());
    }

    #[tokio::test]
    async fn test_report_for_all_items() {
        let authorizer = rbac_viewer_of(net("net1"));
        let mut views = vec![
            NetworkView {
                name: "net1".into(),
                ..Default::default()
            },
            NetworkView {
                name: "net2".into(),
                ..Default::default()
            },
        ];

        report_entitlements_for_all(
            &authorizer,
            &ctx(),
            EntityType::Network,
            &[],
            &mut views,
            |v| net(&v.name),
        )
        .await;

        assert_eq!(
            views[0].access_entitlements.as_deref(),
            Some(&["can_view".to_string()][..])
        );
        assert_eq!(views[1].access_entitlements.as_deref(), Some(&[][..]));
    }
}
