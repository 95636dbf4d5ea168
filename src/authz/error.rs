//! Authorization errors.

use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::EntityType;

/// Why a check stopped before the driver answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The request's cancellation token fired.
    Cancelled,
    /// The request's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => f.write_str("request cancelled"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthzError {
    /// Malformed or incomplete entity URL.
    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    /// Entitlement not defined for the entity type.
    #[error("{}", invalid_entitlement_message(.entity_type, .entitlement))]
    InvalidEntitlement {
        entity_type: Option<EntityType>,
        entitlement: String,
    },

    /// The caller may not even see the entity.
    #[error("Not found")]
    NotFound,

    /// The caller can see the entity but lacks the requested entitlement.
    #[error("Forbidden")]
    Forbidden,

    /// The backing policy store could not be reached.
    #[error("Policy unavailable: {0}")]
    PolicyUnavailable(String),

    #[error("Authorization check aborted: {0}")]
    Cancelled(CancelReason),
}

fn invalid_entitlement_message(entity_type: &Option<EntityType>, entitlement: &str) -> String {
    match entity_type {
        Some(t) => format!("Entitlement '{entitlement}' is not valid for entity type {t}"),
        None => format!("Unknown entitlement '{entitlement}'"),
    }
}

impl AuthzError {
    pub fn policy_unavailable(reason: impl Into<String>) -> Self {
        Self::PolicyUnavailable(reason.into())
    }

    /// True for the two masked denial kinds.
    pub fn is_denied(&self) -> bool {
        matches!(self, AuthzError::NotFound | AuthzError::Forbidden)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthzError::InvalidEntity(_) | AuthzError::InvalidEntitlement { .. } => {
                StatusCode::BAD_REQUEST
            }
            AuthzError::NotFound => StatusCode::NOT_FOUND,
            AuthzError::Forbidden => StatusCode::FORBIDDEN,
            AuthzError::PolicyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthzError::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
        }
    }

    /// Machine-readable code used in API error bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthzError::InvalidEntity(_) => "invalid_entity",
            AuthzError::InvalidEntitlement { .. } => "invalid_entitlement",
            AuthzError::NotFound => "not_found",
            AuthzError::Forbidden => "forbidden",
            AuthzError::PolicyUnavailable(_) => "policy_unavailable",
            AuthzError::Cancelled(_) => "cancelled",
        }
    }
}

/// Whether `err` is a permission denial (either masked kind).
pub fn is_denied_error(err: &AuthzError) -> bool {
    err.is_denied()
}

/// API error body: `{"error": {"type": "...", "message": "...", "param": null, "code": "..."}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn with_type(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.into(),
                message: message.into(),
                param: None,
                code: Some(code.into()),
            },
        }
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        let (error_type, message) = match &self {
            AuthzError::InvalidEntity(_) | AuthzError::InvalidEntitlement { .. } => {
                ("invalid_request_error", self.to_string())
            }
            // Denials carry no detail about the entity or the policy.
            AuthzError::NotFound => ("not_found_error", "Not found".to_string()),
            AuthzError::Forbidden => ("permission_error", "Forbidden".to_string()),
            AuthzError::PolicyUnavailable(reason) => {
                tracing::error!(reason = %reason, "Authorization policy backend unavailable");
                (
                    "server_error",
                    "Authorization service temporarily unavailable".to_string(),
                )
            }
            AuthzError::Cancelled(reason) => ("timeout_error", format!("Request aborted: {reason}")),
        };

        let body = ErrorResponse::with_type(error_type, code, message);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(AuthzError::InvalidEntity("x".into()), StatusCode::BAD_REQUEST, false)]
    #[case(
        AuthzError::InvalidEntitlement { entity_type: None, entitlement: "x".into() },
        StatusCode::BAD_REQUEST,
        false
    )]
    #[case(AuthzError::NotFound, StatusCode::NOT_FOUND, true)]
    #[case(AuthzError::Forbidden, StatusCode::FORBIDDEN, true)]
    #[case(
        AuthzError::PolicyUnavailable("down".into()),
        StatusCode::SERVICE_UNAVAILABLE,
        false
    )]
    #[case(
        AuthzError::Cancelled(CancelReason::DeadlineExceeded),
        StatusCode::REQUEST_TIMEOUT,
        false
    )]
    fn test_status_and_denial_classification(
        #[case] err: AuthzError,
        #[case] status: StatusCode,
        #[case] denied: bool,
    ) {
        assert_eq!(err.status_code(), status);
        assert_eq!(is_denied_error(&err), denied);
        assert_eq!(err.into_response().status(), status);
    }

    #[test]
    fn test_invalid_entitlement_message() {
        let err = AuthzError::InvalidEntitlement {
            entity_type: Some(EntityType::Network),
            entitlement: "can_exec".into(),
        };
        assert_eq!(
            err.to_string(),
            "Entitlement 'can_exec' is not valid for entity type network"
        );
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorResponse::with_type("permission_error", "forbidden", "Forbidden");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["type"], "permission_error");
        assert_eq!(json["error"]["code"], "forbidden");
        assert!(json["error"]["param"].is_null());
    }
}
