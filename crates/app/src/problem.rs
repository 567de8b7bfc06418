use std::fmt;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::error;

use orgsvc_core::{ErrorKind, ServiceError};

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    status: u16,
    detail: String,
    service: &'static str,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    extensions: Map<String, Value>,
}

/// `application/problem+json` error response.
#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(
        service: &'static str,
        status: StatusCode,
        problem_type: &'static str,
        detail: S,
    ) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                status: status.as_u16(),
                detail: detail.into(),
                service,
                timestamp: Utc::now(),
                extensions: Map::new(),
            },
        }
    }

    pub fn with_extension(mut self, key: &str, value: Value) -> Self {
        self.body.extensions.insert(key.to_string(), value);
        self
    }

    /// Renders a service error. This is the only place error kinds turn into
    /// HTTP statuses.
    pub fn from_service_error(service: &'static str, err: ServiceError) -> Self {
        let kind = err.kind();
        counter!("http_problems_total", "kind" => kind.as_str()).increment(1);

        let (status, problem_type) = status_for(kind);
        let detail = err.to_string();
        match err {
            ServiceError::NotFound {
                resource,
                field,
                value,
            }
            | ServiceError::DuplicateKey {
                resource,
                field,
                value,
            } => Self::new(service, status, problem_type, detail)
                .with_extension("resource", json!(resource))
                .with_extension("field", json!(field))
                .with_extension("value", json!(value)),
            ServiceError::ReferencedEntityNotFound { resource, id } => {
                Self::new(service, status, problem_type, detail)
                    .with_extension("referencedResource", json!(resource))
                    .with_extension("referencedId", json!(id))
            }
            ServiceError::UpstreamUnavailable {
                service: upstream,
                status: upstream_status,
                ..
            } => {
                let problem = Self::new(service, status, problem_type, detail)
                    .with_extension("upstreamService", json!(upstream));
                match upstream_status {
                    Some(code) => problem.with_extension("upstreamStatus", json!(code)),
                    None => problem,
                }
            }
            ServiceError::BusinessRuleViolation { code, .. } => {
                Self::new(service, status, problem_type, detail).with_extension("code", json!(code))
            }
            ServiceError::Validation { violations } => {
                Self::new(service, status, problem_type, "Request validation failed")
                    .with_extension("violations", json!(violations))
            }
            ServiceError::Internal { detail } => {
                error!(stage = "http", service, error = %detail, "request failed");
                Self::new(service, status, problem_type, "An unexpected error occurred")
            }
        }
    }

    /// Renders an extractor rejection (malformed JSON, bad path or query).
    pub fn rejected(service: &'static str, rejection: impl fmt::Display) -> Self {
        counter!("http_problems_total", "kind" => ErrorKind::Validation.as_str()).increment(1);
        let (status, problem_type) = status_for(ErrorKind::Validation);
        Self::new(service, status, problem_type, rejection.to_string())
    }
}

fn status_for(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not-found"),
        ErrorKind::DuplicateKey => (StatusCode::CONFLICT, "duplicate-resource"),
        ErrorKind::ReferencedEntityNotFound => {
            (StatusCode::NOT_FOUND, "referenced-entity-not-found")
        }
        ErrorKind::UpstreamUnavailable => (StatusCode::BAD_GATEWAY, "upstream-unavailable"),
        ErrorKind::BusinessRuleViolation => (StatusCode::CONFLICT, "business-rule-violation"),
        ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation-error"),
        ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal-error"),
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
