use std::{borrow::Cow, fmt, str::FromStr};

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use super::{API_PREFIX, DEFAULT_PROJECT, EntityType, PathPart};
use crate::authz::AuthzError;

/// Characters escaped inside a single path segment or query value.
const SEGMENT_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'/')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn encode_segment(segment: &str) -> impl fmt::Display + '_ {
    utf8_percent_encode(segment, SEGMENT_SET)
}

fn decode_segment(raw: &str) -> Result<Cow<'_, str>, AuthzError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map_err(|e| AuthzError::InvalidEntity(format!("Invalid UTF-8 in '{raw}': {e}")))
}

/// Canonical, immutable address of a single resource.
///
/// Segments are stored decoded; the percent-encoded form only exists in the
/// string representation, so two addresses built from the same inputs are
/// always equal and always render to the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityUrl {
    entity_type: EntityType,
    project: String,
    path: Vec<String>,
}

impl EntityUrl {
    fn new(entity_type: EntityType, project: String, path: Vec<String>) -> Self {
        debug_assert_eq!(
            entity_type.is_project_scoped(),
            !project.is_empty(),
            "project must be set iff {entity_type} is project scoped"
        );
        debug_assert_eq!(path.len(), entity_type.segment_count());
        Self {
            entity_type,
            project,
            path,
        }
    }

    /// Build an entity URL from its parts, validating every required field.
    ///
    /// `project` must be empty for global types and non-empty for
    /// project-scoped ones. `path` holds the raw (unencoded) segments in
    /// template order.
    pub fn from_parts(
        entity_type: EntityType,
        project: impl Into<String>,
        path: Vec<String>,
    ) -> Result<Self, AuthzError> {
        let project = project.into();

        if entity_type.is_project_scoped() && project.is_empty() {
            return Err(AuthzError::InvalidEntity(format!(
                "A project is required to address a {entity_type}"
            )));
        }
        if !entity_type.is_project_scoped() && !project.is_empty() {
            return Err(AuthzError::InvalidEntity(format!(
                "Entity type {entity_type} is not project scoped (got project '{project}')"
            )));
        }

        let names: Vec<&str> = entity_type
            .path_template()
            .iter()
            .filter_map(|part| match part {
                PathPart::Segment(name) => Some(*name),
                PathPart::Literal(_) => None,
            })
            .collect();

        if path.len() != names.len() {
            return Err(AuthzError::InvalidEntity(format!(
                "A {entity_type} URL requires {} path segment(s), got {}",
                names.len(),
                path.len()
            )));
        }
        if let Some((name, _)) = names.iter().zip(&path).find(|(_, seg)| seg.is_empty()) {
            return Err(AuthzError::InvalidEntity(format!(
                "Missing {name} for {entity_type} URL"
            )));
        }

        Ok(Self::new(entity_type, project, path))
    }

    pub fn server() -> Self {
        Self::new(EntityType::Server, String::new(), Vec::new())
    }

    pub fn for_project(name: &str) -> Result<Self, AuthzError> {
        Self::from_parts(EntityType::Project, "", vec![name.to_string()])
    }

    pub fn identity(authentication_method: &str, name: &str) -> Result<Self, AuthzError> {
        Self::from_parts(
            EntityType::Identity,
            "",
            vec![authentication_method.to_string(), name.to_string()],
        )
    }

    pub fn auth_group(name: &str) -> Result<Self, AuthzError> {
        Self::from_parts(EntityType::AuthGroup, "", vec![name.to_string()])
    }

    pub fn certificate(fingerprint: &str) -> Result<Self, AuthzError> {
        Self::from_parts(EntityType::Certificate, "", vec![fingerprint.to_string()])
    }

    pub fn storage_pool(name: &str) -> Result<Self, AuthzError> {
        Self::from_parts(EntityType::StoragePool, "", vec![name.to_string()])
    }

    pub fn instance(project: &str, name: &str) -> Result<Self, AuthzError> {
        Self::from_parts(EntityType::Instance, project, vec![name.to_string()])
    }

    pub fn instance_snapshot(
        project: &str,
        instance: &str,
        snapshot: &str,
    ) -> Result<Self, AuthzError> {
        Self::from_parts(
            EntityType::InstanceSnapshot,
            project,
            vec![instance.to_string(), snapshot.to_string()],
        )
    }

    pub fn network(project: &str, name: &str) -> Result<Self, AuthzError> {
        Self::from_parts(EntityType::Network, project, vec![name.to_string()])
    }

    pub fn network_forward(
        project: &str,
        network: &str,
        listen_address: &str,
    ) -> Result<Self, AuthzError> {
        Self::from_parts(
            EntityType::NetworkForward,
            project,
            vec![network.to_string(), listen_address.to_string()],
        )
    }

    pub fn network_acl(project: &str, name: &str) -> Result<Self, AuthzError> {
        Self::from_parts(EntityType::NetworkAcl, project, vec![name.to_string()])
    }

    pub fn network_zone(project: &str, name: &str) -> Result<Self, AuthzError> {
        Self::from_parts(EntityType::NetworkZone, project, vec![name.to_string()])
    }

    pub fn profile(project: &str, name: &str) -> Result<Self, AuthzError> {
        Self::from_parts(EntityType::Profile, project, vec![name.to_string()])
    }

    pub fn image(project: &str, fingerprint: &str) -> Result<Self, AuthzError> {
        Self::from_parts(EntityType::Image, project, vec![fingerprint.to_string()])
    }

    pub fn image_alias(project: &str, alias: &str) -> Result<Self, AuthzError> {
        Self::from_parts(EntityType::ImageAlias, project, vec![alias.to_string()])
    }

    pub fn storage_volume(
        project: &str,
        pool: &str,
        volume_type: &str,
        name: &str,
    ) -> Result<Self, AuthzError> {
        Self::from_parts(
            EntityType::StorageVolume,
            project,
            vec![pool.to_string(), volume_type.to_string(), name.to_string()],
        )
    }

    pub fn storage_bucket(project: &str, pool: &str, name: &str) -> Result<Self, AuthzError> {
        Self::from_parts(
            EntityType::StorageBucket,
            project,
            vec![pool.to_string(), name.to_string()],
        )
    }

    /// Parse the canonical string form (`/1.0/...[?project=...]`).
    ///
    /// A project-scoped URL without a `project` query parameter refers to the
    /// default project. A `project` parameter on a global type is ignored.
    pub fn parse(raw: &str) -> Result<Self, AuthzError> {
        let (path, query) = match raw.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (raw, None),
        };

        let rest = path
            .strip_prefix(API_PREFIX)
            .ok_or_else(|| AuthzError::InvalidEntity(format!("'{raw}' is not an API URL")))?
            .trim_end_matches('/');

        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.strip_prefix('/')
                .ok_or_else(|| AuthzError::InvalidEntity(format!("'{raw}' is not an API URL")))?
                .split('/')
                .collect()
        };

        let project = match query {
            Some(query) => project_param(query)?,
            None => None,
        };

        for entity_type in EntityType::ALL {
            let Some(segments) = match_template(entity_type.path_template(), &parts)? else {
                continue;
            };

            let project = if entity_type.is_project_scoped() {
                project.unwrap_or_else(|| DEFAULT_PROJECT.to_string())
            } else {
                String::new()
            };

            return Self::from_parts(entity_type, project, segments);
        }

        Err(AuthzError::InvalidEntity(format!(
            "'{raw}' does not address a known entity type"
        )))
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Owning project; empty for global entity types.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Decoded path segments in template order.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Last path segment (the entity's own name), if any.
    pub fn name(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }

    /// Return a copy of this URL owned by a different project.
    ///
    /// Global URLs are returned unchanged.
    pub fn with_project(&self, project: &str) -> Self {
        if !self.entity_type.is_project_scoped() || project.is_empty() {
            return self.clone();
        }
        Self::new(self.entity_type, project.to_string(), self.path.clone())
    }

    /// The resource this one is nested under, if any.
    pub fn parent(&self) -> Option<Self> {
        let parent_type = self.entity_type.parent()?;
        let project = if parent_type.is_project_scoped() {
            self.project.clone()
        } else {
            String::new()
        };
        let path = self.path[..parent_type.segment_count()].to_vec();
        Some(Self::new(parent_type, project, path))
    }

    /// URL of the project that owns this entity (or the project itself).
    pub fn project_url(&self) -> Option<Self> {
        match self.entity_type {
            EntityType::Project => Some(self.clone()),
            t if t.is_project_scoped() => Some(Self::new(
                EntityType::Project,
                String::new(),
                vec![self.project.clone()],
            )),
            _ => None,
        }
    }
}

fn project_param(query: &str) -> Result<Option<String>, AuthzError> {
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("project=") {
            let project = decode_segment(value)?;
            return Ok((!project.is_empty()).then(|| project.into_owned()));
        }
    }
    Ok(None)
}

fn match_template(
    template: &[PathPart],
    parts: &[&str],
) -> Result<Option<Vec<String>>, AuthzError> {
    if template.len() != parts.len() {
        return Ok(None);
    }

    let mut segments = Vec::new();
    for (part, raw) in template.iter().zip(parts) {
        match part {
            PathPart::Literal(literal) if literal != raw => return Ok(None),
            PathPart::Literal(_) => {}
            PathPart::Segment(_) => segments.push(decode_segment(raw)?.into_owned()),
        }
    }
    Ok(Some(segments))
}

impl fmt::Display for EntityUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(API_PREFIX)?;

        let mut segments = self.path.iter();
        for part in self.entity_type.path_template() {
            match part {
                PathPart::Literal(literal) => write!(f, "/{literal}")?,
                PathPart::Segment(_) => {
                    // Length is checked at construction.
                    if let Some(segment) = segments.next() {
                        write!(f, "/{}", encode_segment(segment))?;
                    }
                }
            }
        }

        if !self.project.is_empty() {
            write!(f, "?project={}", encode_segment(&self.project))?;
        }
        Ok(())
    }
}

impl FromStr for EntityUrl {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityUrl {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EntityUrl> for String {
    fn from(url: EntityUrl) -> Self {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_identical_inputs_are_equal() {
        let a = EntityUrl::network("demo", "lxdbr0").unwrap();
        let b = EntityUrl::network("demo", "lxdbr0").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());

        let parsed = EntityUrl::parse(&a.to_string()).unwrap();
        assert_eq!(parsed, a);
    }

    #[rstest]
    #[case(EntityUrl::server(), "/1.0")]
    #[case(EntityUrl::for_project("demo").unwrap(), "/1.0/projects/demo")]
    #[case(EntityUrl::instance("demo", "c1").unwrap(), "/1.0/instances/c1?project=demo")]
    #[case(
        EntityUrl::network_forward("demo", "lxdbr0", "10.0.0.1").unwrap(),
        "/1.0/networks/lxdbr0/forwards/10.0.0.1?project=demo"
    )]
    #[case(
        EntityUrl::storage_volume("demo", "default", "custom", "data").unwrap(),
        "/1.0/storage-pools/default/volumes/custom/data?project=demo"
    )]
    #[case(
        EntityUrl::image_alias("default", "ubuntu/24.04").unwrap(),
        "/1.0/images/aliases/ubuntu%2F24.04?project=default"
    )]
    #[case(
        EntityUrl::identity("tls", "jane doe").unwrap(),
        "/1.0/auth/identities/tls/jane%20doe"
    )]
    fn test_canonical_string(#[case] url: EntityUrl, #[case] expected: &str) {
        assert_eq!(url.to_string(), expected);
        assert_eq!(EntityUrl::parse(expected).unwrap(), url);
    }

    #[test]
    fn test_segments_are_percent_encoded() {
        let url = EntityUrl::profile("my project", "a/b?c=d&e").unwrap();
        let rendered = url.to_string();
        assert_eq!(
            rendered,
            "/1.0/profiles/a%2Fb%3Fc%3Dd%26e?project=my%20project"
        );
        assert_eq!(url.name(), Some("a/b?c=d&e"));
        assert_eq!(url.project(), "my project");
    }

    #[test]
    fn test_missing_required_field_is_invalid_entity() {
        let err = EntityUrl::instance("demo", "").unwrap_err();
        assert!(matches!(err, AuthzError::InvalidEntity(_)));
        assert!(err.to_string().contains("instance"));

        let err = EntityUrl::from_parts(EntityType::NetworkForward, "demo", vec!["net".into()])
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidEntity(_)));
    }

    #[test]
    fn test_project_invariant_enforced() {
        assert!(matches!(
            EntityUrl::network("", "lxdbr0"),
            Err(AuthzError::InvalidEntity(_))
        ));
        assert!(matches!(
            EntityUrl::from_parts(EntityType::StoragePool, "demo", vec!["default".into()]),
            Err(AuthzError::InvalidEntity(_))
        ));
    }

    #[test]
    fn test_parse_defaults_project() {
        let url = EntityUrl::parse("/1.0/networks/lxdbr0").unwrap();
        assert_eq!(url.project(), DEFAULT_PROJECT);
        assert_eq!(url, EntityUrl::network("default", "lxdbr0").unwrap());
    }

    #[test]
    fn test_parse_ignores_project_on_global_types() {
        let url = EntityUrl::parse("/1.0/storage-pools/default?project=demo").unwrap();
        assert_eq!(url, EntityUrl::storage_pool("default").unwrap());
    }

    #[rstest]
    #[case("/2.0/networks/lxdbr0")]
    #[case("/1.0x")]
    #[case("/1.0/widgets/foo")]
    #[case("/1.0/networks/lxdbr0/forwards")]
    #[case("/1.0/instances//snapshots/snap0")]
    fn test_parse_rejects_unknown_urls(#[case] raw: &str) {
        assert!(matches!(
            EntityUrl::parse(raw),
            Err(AuthzError::InvalidEntity(_))
        ));
    }

    #[test]
    fn test_parent_and_project_url() {
        let forward = EntityUrl::network_forward("demo", "lxdbr0", "10.0.0.1").unwrap();
        assert_eq!(
            forward.parent().unwrap(),
            EntityUrl::network("demo", "lxdbr0").unwrap()
        );
        assert_eq!(
            forward.project_url().unwrap(),
            EntityUrl::for_project("demo").unwrap()
        );

        let volume = EntityUrl::storage_volume("demo", "fast", "custom", "data").unwrap();
        assert_eq!(
            volume.parent().unwrap(),
            EntityUrl::storage_pool("fast").unwrap()
        );

        assert!(EntityUrl::server().parent().is_none());
        assert!(EntityUrl::server().project_url().is_none());
    }

    #[test]
    fn test_with_project_returns_new_url() {
        let profile = EntityUrl::profile("demo", "base").unwrap();
        let moved = profile.with_project("default");
        assert_eq!(profile.project(), "demo");
        assert_eq!(moved.project(), "default");
        assert_eq!(moved.path(), profile.path());

        let pool = EntityUrl::storage_pool("fast").unwrap();
        assert_eq!(pool.with_project("demo"), pool);
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let url = EntityUrl::network("demo", "lxdbr0").unwrap();
        let json = serde_json::to_string(&url).unwrap();
        assert_eq!(json, "\"/1.0/networks/lxdbr0?project=demo\"");
        let back: EntityUrl = serde_json::from_str(&json).unwrap();
        assert_eq!(back, url);
    }
}
