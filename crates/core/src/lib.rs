//! Domain layer shared by the department, employee and product services.
//!
//! Nothing in here performs I/O: HTTP clients and repositories live in their
//! own crates and hand their results to the routines defined here.

pub mod error;
pub mod idempotency;
pub mod referential;
pub mod types;

pub use error::{ErrorKind, FieldViolation, ServiceError};
pub use idempotency::{Guarded, IdempotencyGuard};
pub use referential::{CheckOutcome, FailurePolicy, RemoteError, RemoteTarget, Resolved};
