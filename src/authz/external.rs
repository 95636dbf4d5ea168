//! Driver that delegates decisions to an external policy decision point.
//!
//! The decision point speaks a small OpenFGA-style JSON protocol:
//!
//! - `POST {endpoint}/check` with `{"user", "relation", "object"}`, answering
//!   `{"allowed": bool}`
//! - `POST {endpoint}/list-objects` with `{"user", "relation", "type"}`,
//!   answering `{"objects": [...]}`
//!
//! Users are `identity:<method>:<identifier>`, relations are entitlement
//! names and objects are `<entity type>:<entity URL>`.

use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{AuthorizationDriver, AuthzError, DriverChecker};
use crate::{
    config::{ConfigError, ExternalDriverConfig},
    entitlement::Entitlement,
    entity::{EntityType, EntityUrl},
    identity::Identity,
    request::RequestContext,
};

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    user: &'a str,
    relation: &'a str,
    object: &'a str,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    allowed: bool,
}

#[derive(Debug, Serialize)]
struct ListObjectsRequest<'a> {
    user: &'a str,
    relation: &'a str,
    #[serde(rename = "type")]
    object_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct ListObjectsResponse {
    objects: Vec<String>,
}

struct CachedDecision {
    allowed: bool,
    expires_at: Instant,
}

fn user_id(identity: &Identity) -> String {
    format!("identity:{}", identity.key())
}

fn object_id(entity: &EntityUrl) -> String {
    format!("{}:{}", entity.entity_type(), entity)
}

pub struct ExternalDriver {
    client: reqwest::Client,
    check_url: String,
    list_objects_url: String,
    api_token: Option<String>,
    cache_ttl: Duration,
    max_cache_entries: usize,
    cache: DashMap<(String, Entitlement, String), CachedDecision>,
}

impl ExternalDriver {
    pub fn new(config: &ExternalDriverConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                ConfigError::Validation(format!("Failed to build policy service client: {e}"))
            })?;

        let base = config.endpoint.trim_end_matches('/');
        tracing::info!(endpoint = %base, "External authorization driver initialized");

        Ok(Self {
            client,
            check_url: format!("{base}/check"),
            list_objects_url: format!("{base}/list-objects"),
            api_token: config.api_token.clone(),
            cache_ttl: Duration::from_millis(config.cache_ttl_ms),
            max_cache_entries: config.max_cache_entries,
            cache: DashMap::new(),
        })
    }

    async fn post<Req, Resp>(&self, url: &str, body: &Req) -> Result<Resp, AuthzError>
    where
        Req: Serialize + ?Sized,
        Resp: for<'de> Deserialize<'de>,
    {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Policy service request failed");
            AuthzError::policy_unavailable(format!("request to {url} failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = %status, "Policy service returned an error");
            return Err(AuthzError::policy_unavailable(format!(
                "{url} returned {status}"
            )));
        }

        response.json::<Resp>().await.map_err(|e| {
            AuthzError::policy_unavailable(format!("invalid response from {url}: {e}"))
        })
    }

    fn cached(&self, key: &(String, Entitlement, String)) -> Option<bool> {
        let entry = self.cache.get(key)?;
        (Instant::now() < entry.expires_at).then_some(entry.allowed)
    }

    fn remember(&self, key: (String, Entitlement, String), allowed: bool) {
        if self.cache_ttl.is_zero() || self.max_cache_entries == 0 {
            return;
        }

        if self.cache.len() >= self.max_cache_entries {
            let now = Instant::now();
            self.cache.retain(|_, entry| entry.expires_at > now);
            if self.cache.len() >= self.max_cache_entries {
                self.cache.clear();
            }
        }

        self.cache.insert(
            key,
            CachedDecision {
                allowed,
                expires_at: Instant::now() + self.cache_ttl,
            },
        );
    }
}

#[async_trait]
impl AuthorizationDriver for ExternalDriver {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn check(
        &self,
        _ctx: &RequestContext,
        identity: &Identity,
        entity: &EntityUrl,
        entitlement: Entitlement,
    ) -> Result<bool, AuthzError> {
        let user = user_id(identity);
        let object = object_id(entity);
        let key = (user, entitlement, object);

        if let Some(allowed) = self.cached(&key) {
            return Ok(allowed);
        }

        let body = CheckRequest {
            user: &key.0,
            relation: entitlement.as_str(),
            object: &key.2,
        };
        let response: CheckResponse = self.post(&self.check_url, &body).await?;

        tracing::debug!(
            user = %key.0,
            relation = %entitlement,
            object = %key.2,
            allowed = response.allowed,
            "Policy service decision"
        );

        self.remember(key, response.allowed);
        Ok(response.allowed)
    }

    async fn build_checker(
        &self,
        _ctx: &RequestContext,
        identity: &Identity,
        entitlement: Entitlement,
        entity_type: EntityType,
    ) -> Result<DriverChecker, AuthzError> {
        let user = user_id(identity);
        let body = ListObjectsRequest {
            user: &user,
            relation: entitlement.as_str(),
            object_type: entity_type.as_str(),
        };
        let response: ListObjectsResponse = self.post(&self.list_objects_url, &body).await?;

        let prefix = format!("{entity_type}:");
        let mut allowed = HashSet::with_capacity(response.objects.len());
        for object in &response.objects {
            match object
                .strip_prefix(&prefix)
                .ok_or_else(|| AuthzError::InvalidEntity(object.clone()))
                .and_then(EntityUrl::parse)
            {
                Ok(url) if url.entity_type() == entity_type => {
                    allowed.insert(url);
                }
                Ok(_) | Err(_) => {
                    tracing::warn!(object = %object, "Ignoring unexpected object from policy service");
                }
            }
        }

        tracing::debug!(
            user = %user,
            relation = %entitlement,
            entity_type = %entity_type,
            allowed = allowed.len(),
            "Built checker from policy service"
        );

        Ok(Box::new(move |entity: &EntityUrl| allowed.contains(entity)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path},
    };

    use super::*;
    use crate::identity::AuthenticationMethod;

    fn config(server: &MockServer) -> ExternalDriverConfig {
        ExternalDriverConfig::new(server.uri())
    }

    fn alice() -> Identity {
        Identity::new(AuthenticationMethod::Tls, "alice")
    }

    fn ctx() -> RequestContext {
        RequestContext::builder(alice()).build()
    }

    #[tokio::test]
    async fn test_check_sends_tuple_and_reads_decision() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check"))
            .and(body_json(json!({
                "user": "identity:tls:alice",
                "relation": "can_edit",
                "object": "network:/1.0/networks/net1?project=demo",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"allowed": true})))
            .expect(1)
            .mount(&server)
            .await;

        let driver = ExternalDriver::new(&config(&server)).unwrap();
        let net1 = EntityUrl::network("demo", "net1").unwrap();
        let allowed = driver
            .check(&ctx(), &alice(), &net1, Entitlement::CanEdit)
            .await
            .unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn test_decisions_are_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"allowed": false})))
            .expect(1)
            .mount(&server)
            .await;

        let driver = ExternalDriver::new(&config(&server)).unwrap();
        let net1 = EntityUrl::network("demo", "net1").unwrap();
        for _ in 0..3 {
            let allowed = driver
                .check(&ctx(), &alice(), &net1, Entitlement::CanView)
                .await
                .unwrap();
            assert!(!allowed);
        }
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"allowed": true})))
            .expect(2)
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.cache_ttl_ms = 0;
        let driver = ExternalDriver::new(&config).unwrap();
        let net1 = EntityUrl::network("demo", "net1").unwrap();
        for _ in 0..2 {
            driver
                .check(&ctx(), &alice(), &net1, Entitlement::CanView)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_bearer_token_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check"))
            .and(header("authorization", "Bearer pdp-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"allowed": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.api_token = Some("pdp-token".into());
        let driver = ExternalDriver::new(&config).unwrap();
        assert!(
            driver
                .check(&ctx(), &alice(), &EntityUrl::server(), Entitlement::CanView)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_server_error_is_policy_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let driver = ExternalDriver::new(&config(&server)).unwrap();
        let err = driver
            .check(&ctx(), &alice(), &EntityUrl::server(), Entitlement::CanView)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::PolicyUnavailable(_)));
        assert!(!err.is_denied());
    }

    #[tokio::test]
    async fn test_timeout_is_policy_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"allowed": true}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.timeout_ms = 50;
        let driver = ExternalDriver::new(&config).unwrap();
        let err = driver
            .check(&ctx(), &alice(), &EntityUrl::server(), Entitlement::CanView)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::PolicyUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_is_policy_unavailable() {
        let driver = ExternalDriver::new(&ExternalDriverConfig::new("http://127.0.0.1:1")).unwrap();
        let err = driver
            .check(&ctx(), &alice(), &EntityUrl::server(), Entitlement::CanView)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::PolicyUnavailable(_)));
    }

    #[tokio::test]
    async fn test_checker_from_list_objects() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/list-objects"))
            .and(body_json(json!({
                "user": "identity:tls:alice",
                "relation": "can_view",
                "type": "network",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "objects": [
                    "network:/1.0/networks/net1?project=demo",
                    "network:/1.0/networks/uplink?project=default",
                    "instance:/1.0/instances/c1?project=demo",
                    "garbage",
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let driver = ExternalDriver::new(&config(&server)).unwrap();
        let checker = driver
            .build_checker(&ctx(), &alice(), Entitlement::CanView, EntityType::Network)
            .await
            .unwrap();

        assert!(checker(&EntityUrl::network("demo", "net1").unwrap()));
        assert!(checker(&EntityUrl::network("default", "uplink").unwrap()));
        assert!(!checker(&EntityUrl::network("demo", "net2").unwrap()));
        assert!(!checker(&EntityUrl::network("other", "net1").unwrap()));
    }

    #[tokio::test]
    async fn test_list_objects_server_error_is_policy_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/list-objects"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let driver = ExternalDriver::new(&config(&server)).unwrap();
        let result = driver
            .build_checker(&ctx(), &alice(), Entitlement::CanView, EntityType::Network)
            .await;
        let Err(err) = result else {
            panic!("checker built despite a failing decision point");
        };
        assert!(matches!(err, AuthzError::PolicyUnavailable(_)), "{err:?}");
        assert!(!err.is_denied());
    }
}
