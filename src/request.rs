//! Per-request state threaded through every authorization call.

use std::{collections::HashMap, future::Future, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    authz::{AuthzError, CancelReason},
    config::ProjectFeatures,
    entity::EntityType,
    identity::Identity,
};

/// Per-request overrides of which project governs an entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveProjectMap {
    entries: HashMap<EntityType, String>,
}

impl EffectiveProjectMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity_type: EntityType, project: impl Into<String>) {
        self.entries.insert(entity_type, project.into());
    }

    pub fn get(&self, entity_type: EntityType) -> Option<&str> {
        self.entries.get(&entity_type).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Everything the authorizer needs to know about the current request.
///
/// Built once with [`RequestContextBuilder`] before the first check and
/// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    identity: Identity,
    effective_projects: EffectiveProjectMap,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn builder(identity: Identity) -> RequestContextBuilder {
        RequestContextBuilder::new(identity)
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn effective_projects(&self) -> &EffectiveProjectMap {
        &self.effective_projects
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drive `fut` to completion unless the request is cancelled or its
    /// deadline passes first.
    ///
    /// Cancellation is checked before the future is polled, so a request
    /// that is already cancelled never reaches the driver.
    pub async fn run_cancellable<F, T>(&self, fut: F) -> Result<T, AuthzError>
    where
        F: Future<Output = Result<T, AuthzError>>,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => {
                Err(AuthzError::Cancelled(CancelReason::Cancelled))
            }
            _ = deadline => {
                Err(AuthzError::Cancelled(CancelReason::DeadlineExceeded))
            }
            result = fut => result,
        }
    }
}

pub struct RequestContextBuilder {
    request_id: Option<Uuid>,
    identity: Identity,
    effective_projects: EffectiveProjectMap,
    cancellation: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl RequestContextBuilder {
    fn new(identity: Identity) -> Self {
        Self {
            request_id: None,
            identity,
            effective_projects: EffectiveProjectMap::new(),
            cancellation: None,
            deadline: None,
        }
    }

    pub fn request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_effective_project(
        mut self,
        entity_type: EntityType,
        project: impl Into<String>,
    ) -> Self {
        self.effective_projects.insert(entity_type, project);
        self
    }

    /// Derive overrides from the feature flags of the project the request
    /// targets.
    pub fn with_project_features(mut self, project: &str, features: &ProjectFeatures) -> Self {
        self.effective_projects = features.effective_project_map(project);
        self
    }

    pub fn with_effective_projects(mut self, map: EffectiveProjectMap) -> Self {
        self.effective_projects = map;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn build(self) -> RequestContext {
        RequestContext {
            request_id: self.request_id.unwrap_or_else(Uuid::new_v4),
            identity: self.identity,
            effective_projects: self.effective_projects,
            cancellation: self.cancellation.unwrap_or_default(),
            deadline: self.deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::identity::AuthenticationMethod;

    fn ctx() -> RequestContextBuilder {
        RequestContext::builder(Identity::new(AuthenticationMethod::Tls, "abc"))
    }

    #[tokio::test]
    async fn test_run_cancellable_passes_result_through() {
        let ctx = ctx().build();
        let value = ctx.run_cancellable(async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_polls() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ctx().with_cancellation(token).build();
        let polled = AtomicBool::new(false);

        let result = ctx
            .run_cancellable(async {
                polled.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(AuthzError::Cancelled(CancelReason::Cancelled))
        ));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_blocked_future() {
        let ctx = ctx().with_timeout(Duration::from_millis(50)).build();

        let result: Result<(), _> = ctx
            .run_cancellable(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(AuthzError::Cancelled(CancelReason::DeadlineExceeded))
        ));
    }

    #[tokio::test]
    async fn test_cancel_while_blocked() {
        let token = CancellationToken::new();
        let ctx = ctx().with_cancellation(token.clone()).build();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let result: Result<(), _> = ctx.run_cancellable(std::future::pending()).await;
        assert!(matches!(
            result,
            Err(AuthzError::Cancelled(CancelReason::Cancelled))
        ));
        canceller.await.unwrap();
    }

    #[test]
    fn test_project_features_populate_map() {
        let features = ProjectFeatures {
            profiles: false,
            ..Default::default()
        };
        let ctx = ctx().with_project_features("proj-a", &features).build();
        assert_eq!(
            ctx.effective_projects().get(EntityType::Profile),
            Some("default")
        );
        assert_eq!(ctx.effective_projects().get(EntityType::Instance), None);
    }
}
