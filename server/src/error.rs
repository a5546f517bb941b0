//! HTTP error mapping: `{"errors":[{"kind","code","message"}]}`.

use crate::auth::PolicyError;
use crate::config::ConfigError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use opsdeck_bundle::{BundleError, SecurityError};
use opsdeck_registry::RegistryError;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Failure to bring the server's services up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Request-level failure, rendered as a JSON error body.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BundleError> for ServerError {
    fn from(e: BundleError) -> Self {
        Self::Registry(e.into())
    }
}

impl From<SecurityError> for ServerError {
    fn from(e: SecurityError) -> Self {
        Self::Registry(BundleError::Security(e).into())
    }
}

impl ServerError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registry(e) => e.kind(),
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "validation",
            Self::Io(_) => "io",
        }
    }

    pub fn status(&self) -> StatusCode {
        if let Self::Registry(RegistryError::Bundle(BundleError::Security(
            SecurityError::UploadTooLarge { .. },
        ))) = self
        {
            return StatusCode::PAYLOAD_TOO_LARGE;
        }
        match self.kind() {
            "validation" | "security" | "archive_corrupt" => StatusCode::BAD_REQUEST,
            "forbidden" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            "mount" | "registration" => StatusCode::UNPROCESSABLE_ENTITY,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// One entry per problem. Manifest validation reports every field.
    fn details(&self) -> Vec<ErrorDetail> {
        match self {
            Self::Registry(RegistryError::Bundle(BundleError::Validation(invalid))) => invalid
                .errors
                .iter()
                .map(|e| ErrorDetail {
                    kind: "validation",
                    code: Some(e.kind()),
                    message: e.to_string(),
                })
                .collect(),
            Self::Registry(RegistryError::Validation(e)) => vec![ErrorDetail {
                kind: "validation",
                code: Some(e.kind()),
                message: e.to_string(),
            }],
            Self::Registry(RegistryError::Bundle(BundleError::Security(e))) => vec![ErrorDetail {
                kind: "security",
                code: Some(e.code()),
                message: e.to_string(),
            }],
            other => vec![ErrorDetail {
                kind: other.kind(),
                code: None,
                message: other.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    errors: Vec<ErrorDetail>,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(kind = self.kind(), error = %self, "Request failed");
        }
        (status, Json(ErrorBody { errors: self.details() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsdeck_types::{ManifestInvalid, ValidationError};

    #[test]
    fn statuses_follow_kinds() {
        let too_big: ServerError = SecurityError::UploadTooLarge { limit: 1 }.into();
        assert_eq!(too_big.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let traversal: ServerError = SecurityError::ParentTraversal("../x".into()).into();
        assert_eq!(traversal.status(), StatusCode::BAD_REQUEST);

        let conflict = ServerError::Registry(RegistryError::BuiltinProtected("demo".into()));
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let timeout: ServerError = BundleError::Timeout { limit_ms: 5 }.into();
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);

        assert_eq!(ServerError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn manifest_errors_are_listed_individually() {
        let invalid = ManifestInvalid {
            errors: vec![
                ValidationError::InvalidSlug("Bad!".into()),
                ValidationError::MissingField("name"),
            ],
        };
        let err: ServerError = BundleError::Validation(invalid).into();
        let details = err.details();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].code, Some("invalid_slug"));
        assert_eq!(details[1].code, Some("missing_field"));
    }
}
