//! Authenticated callers as seen by the authorization layer.
//!
//! Identities are produced by the authentication layer; this crate only reads
//! them.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::authz::AuthzError;

/// How the caller proved who it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationMethod {
    /// Another cluster member, over mutual TLS.
    Cluster,
    /// Local caller on the unix socket.
    Unix,
    /// Client certificate signed by a configured PKI.
    Pki,
    /// Workload talking to the guest-facing service API.
    #[serde(rename = "devlxd")]
    DevLxd,
    /// Trusted client certificate.
    Tls,
    /// OpenID Connect bearer token.
    Oidc,
}

impl AuthenticationMethod {
    pub const ALL: [AuthenticationMethod; 6] = [
        AuthenticationMethod::Cluster,
        AuthenticationMethod::Unix,
        AuthenticationMethod::Pki,
        AuthenticationMethod::DevLxd,
        AuthenticationMethod::Tls,
        AuthenticationMethod::Oidc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthenticationMethod::Cluster => "cluster",
            AuthenticationMethod::Unix => "unix",
            AuthenticationMethod::Pki => "pki",
            AuthenticationMethod::DevLxd => "devlxd",
            AuthenticationMethod::Tls => "tls",
            AuthenticationMethod::Oidc => "oidc",
        }
    }

    /// Callers that run with the privileges of the control plane itself.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AuthenticationMethod::Cluster | AuthenticationMethod::Unix
        )
    }
}

impl fmt::Display for AuthenticationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthenticationMethod {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuthenticationMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                AuthzError::InvalidEntity(format!("Unknown authentication method '{s}'"))
            })
    }
}

/// The already-authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub method: AuthenticationMethod,
    /// Stable identifier, e.g. a certificate fingerprint or OIDC subject.
    pub identifier: String,
    /// Display name, if the authentication layer knows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Groups asserted by the identity provider.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub idp_groups: Vec<String>,
}

impl Identity {
    pub fn new(method: AuthenticationMethod, identifier: impl Into<String>) -> Self {
        Self {
            method,
            identifier: identifier.into(),
            name: None,
            idp_groups: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_idp_groups(mut self, groups: Vec<String>) -> Self {
        self.idp_groups = groups;
        self
    }

    /// `<method>:<identifier>`, the form used for group membership.
    pub fn key(&self) -> String {
        format!("{}:{}", self.method, self.identifier)
    }

    /// Parse a `<method>:<identifier>` key.
    pub fn parse_key(key: &str) -> Result<Self, AuthzError> {
        let (method, identifier) = key.split_once(':').ok_or_else(|| {
            AuthzError::InvalidEntity(format!(
                "Identity '{key}' must have the form <method>:<identifier>"
            ))
        })?;
        if identifier.is_empty() {
            return Err(AuthzError::InvalidEntity(format!(
                "Identity '{key}' has an empty identifier"
            )));
        }
        Ok(Self::new(method.parse()?, identifier))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.key()),
            None => f.write_str(&self.key()),
        }
    }
}
