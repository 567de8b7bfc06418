//! Classification of calls made to a peer service before or after a local write.
//!
//! Every remote lookup funnels through [`resolve`] together with the
//! [`FailurePolicy`] of its call site:
//!
//! * [`FailurePolicy::FailOpen`]: dependent probes before a delete. An
//!   unreachable peer never blocks the delete.
//! * [`FailurePolicy::FailClosed`]: foreign key checks before a write. A
//!   missing target and an unreachable peer are rejected with different
//!   error kinds.
//! * [`FailurePolicy::SilentOmit`]: response enrichment. Failures only drop
//!   the decoration.

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::ServiceError;

/// Failure reported by a peer service client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote resource not found")]
    NotFound,
    #[error("remote call failed: {detail}")]
    Unavailable { status: Option<u16>, detail: String },
}

impl RemoteError {
    pub fn unavailable(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::Unavailable {
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    FailOpen,
    FailClosed,
    SilentOmit,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailOpen => "fail_open",
            Self::FailClosed => "fail_closed",
            Self::SilentOmit => "silent_omit",
        }
    }
}

/// The remote entity a call is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTarget {
    pub service: &'static str,
    pub resource: &'static str,
    pub id: i64,
}

impl RemoteTarget {
    pub fn new(service: &'static str, resource: &'static str, id: i64) -> Self {
        Self {
            service,
            resource,
            id,
        }
    }

    fn unavailable(&self, status: Option<u16>, detail: impl Into<String>) -> ServiceError {
        ServiceError::UpstreamUnavailable {
            service: self.service,
            status,
            detail: detail.into(),
        }
    }
}

/// A remote outcome after the call site's policy has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved<T> {
    Found(T),
    /// The peer answered that the resource does not exist.
    Missing,
    /// The peer could not be asked; only produced by tolerant policies.
    Unknown,
}

impl<T> Resolved<T> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::Missing => "missing",
            Self::Unknown => "unknown",
        }
    }
}

/// Applies `policy` to the result of a remote call.
///
/// Only [`FailurePolicy::FailClosed`] ever returns an error.
pub fn resolve<T>(
    policy: FailurePolicy,
    target: RemoteTarget,
    result: Result<T, RemoteError>,
) -> Result<Resolved<T>, ServiceError> {
    let err = match result {
        Ok(value) => return Ok(Resolved::Found(value)),
        Err(err) => err,
    };

    match (policy, err) {
        (FailurePolicy::FailClosed, RemoteError::NotFound) => {
            Err(ServiceError::ReferencedEntityNotFound {
                resource: target.resource,
                id: target.id,
            })
        }
        (FailurePolicy::FailClosed, RemoteError::Unavailable { status, detail }) => {
            error!(
                stage = "referential",
                policy = policy.as_str(),
                service = target.service,
                resource = target.resource,
                id = target.id,
                status,
                error = %detail,
                "remote validation failed"
            );
            Err(target.unavailable(status, detail))
        }
        (_, RemoteError::NotFound) => {
            debug!(
                stage = "referential",
                policy = policy.as_str(),
                service = target.service,
                resource = target.resource,
                id = target.id,
                "remote resource reported missing"
            );
            Ok(Resolved::Missing)
        }
        (_, RemoteError::Unavailable { status, detail }) => {
            warn!(
                stage = "referential",
                policy = policy.as_str(),
                service = target.service,
                resource = target.resource,
                id = target.id,
                status,
                error = %detail,
                "remote call failed; continuing without it"
            );
            Ok(Resolved::Unknown)
        }
    }
}

/// Outcome of probing a peer for entities that depend on a local parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    ConfirmedAbsent,
    ConfirmedPresent(u64),
    Unknown,
}

impl CheckOutcome {
    /// Whether the parent may be removed.
    pub fn allows_delete(self) -> bool {
        !matches!(self, Self::ConfirmedPresent(_))
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::ConfirmedAbsent => "confirmed_absent",
            Self::ConfirmedPresent(_) => "confirmed_present",
            Self::Unknown => "unknown",
        }
    }
}

/// Fail-open classification of a dependent count probe.
pub fn probe_dependents(target: RemoteTarget, result: Result<u64, RemoteError>) -> CheckOutcome {
    match resolve(FailurePolicy::FailOpen, target, result) {
        Ok(Resolved::Found(0)) | Ok(Resolved::Missing) => CheckOutcome::ConfirmedAbsent,
        Ok(Resolved::Found(count)) => CheckOutcome::ConfirmedPresent(count),
        Ok(Resolved::Unknown) | Err(_) => CheckOutcome::Unknown,
    }
}

/// Fail-closed existence check of a foreign key target.
pub fn require_reference<T>(
    target: RemoteTarget,
    result: Result<T, RemoteError>,
) -> Result<T, ServiceError> {
    match resolve(FailurePolicy::FailClosed, target, result)? {
        Resolved::Found(value) => Ok(value),
        Resolved::Missing | Resolved::Unknown => Err(target.unavailable(None, "no answer")),
    }
}

/// Silent-omit lookup used to decorate a response.
pub fn enrichment<T>(target: RemoteTarget, result: Result<T, RemoteError>) -> Option<T> {
    match resolve(FailurePolicy::SilentOmit, target, result) {
        Ok(Resolved::Found(value)) => Some(value),
        _ => None,
    }
}
