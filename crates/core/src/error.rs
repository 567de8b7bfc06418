use serde::Serialize;
use thiserror::Error;

/// Discriminant of [`ServiceError`], used for metrics labels and response mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    DuplicateKey,
    ReferencedEntityNotFound,
    UpstreamUnavailable,
    BusinessRuleViolation,
    Validation,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::DuplicateKey => "duplicate_key",
            Self::ReferencedEntityNotFound => "referenced_entity_not_found",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::BusinessRuleViolation => "business_rule_violation",
            Self::Validation => "validation",
            Self::Internal => "internal",
        }
    }
}

/// A single rejected field of a request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_value: Option<String>,
}

impl FieldViolation {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
            rejected_value: None,
        }
    }

    pub fn rejecting(mut self, value: impl Into<String>) -> Self {
        self.rejected_value = Some(value.into());
        self
    }
}

/// Every failure a service operation can surface to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("{resource} not found with {field}: {value}")]
    NotFound {
        resource: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("{resource} already exists with {field}: {value}")]
    DuplicateKey {
        resource: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("referenced {resource} not found with id: {id}")]
    ReferencedEntityNotFound { resource: &'static str, id: i64 },
    #[error("{service} is unavailable: {detail}")]
    UpstreamUnavailable {
        service: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[error("{message}")]
    BusinessRuleViolation { code: &'static str, message: String },
    #[error("validation failed")]
    Validation { violations: Vec<FieldViolation> },
    #[error("internal error: {detail}")]
    Internal { detail: String },
}

impl ServiceError {
    pub fn not_found(resource: &'static str, id: i64) -> Self {
        Self::NotFound {
            resource,
            field: "id",
            value: id.to_string(),
        }
    }

    pub fn not_found_by(resource: &'static str, field: &'static str, value: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            field,
            value: value.into(),
        }
    }

    pub fn duplicate(resource: &'static str, field: &'static str, value: impl Into<String>) -> Self {
        Self::DuplicateKey {
            resource,
            field,
            value: value.into(),
        }
    }

    pub fn validation(violations: Vec<FieldViolation>) -> Self {
        Self::Validation { violations }
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::validation(vec![FieldViolation::new(field, message)])
    }

    pub fn internal(detail: impl ToString) -> Self {
        Self::Internal {
            detail: detail.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Self::ReferencedEntityNotFound { .. } => ErrorKind::ReferencedEntityNotFound,
            Self::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Self::BusinessRuleViolation { .. } => ErrorKind::BusinessRuleViolation,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}
