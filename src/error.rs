//! Error types for the attribute engine.
//!
//! `AttributeError` is the single error type returned by every facade entry
//! point. It groups into four families:
//!
//! - **Catalog**: `UnknownAttribute`, the attribute id has no descriptor.
//! - **Registry**: `InstanceNotFound`, `DuplicateInstance`,
//!   `InvalidInstanceName`, `NotRepeated`. Surfaced immediately; callers that
//!   want to avoid them check `instance_exists` first.
//! - **Policy**: `Rejected`, carrying the [`Rejection`] reason from the
//!   coercion and range policy. A coerced value is *not* an error; it is
//!   reported through `SetOutcome::Coerced`.
//! - **Device**: `DeviceTimeout`, `Transport`, `DeviceReportedError`. The
//!   store is always rolled back to its pre-call state before one of these is
//!   returned.
//!
//! Nothing in the engine retries; every failure goes straight back to the
//! caller.

use std::time::Duration;
use thiserror::Error;

use crate::capability::CapabilityClass;
use crate::coercion::Rejection;
use crate::descriptor::AttributeId;
use crate::transport::DeviceError;

/// Convenience alias for results using the engine error type.
pub type AttributeResult<T> = std::result::Result<T, AttributeError>;

/// Every failure a facade operation can report.
#[derive(Error, Debug)]
pub enum AttributeError {
    /// The catalog has no descriptor for this id.
    #[error("Unknown attribute {0}")]
    UnknownAttribute(AttributeId),

    /// No live instance of the attribute's class has this name.
    #[error("No {class} instance named '{name}'")]
    InstanceNotFound {
        /// Class the attribute belongs to.
        class: CapabilityClass,
        /// Name that failed to resolve.
        name: String,
    },

    /// The name is already live in the class.
    #[error("A {class} instance named '{name}' already exists")]
    DuplicateInstance {
        /// Class the name was registered in.
        class: CapabilityClass,
        /// The already-live name.
        name: String,
    },

    /// Instance names must be non-empty.
    #[error("Instance names for {class} must be non-empty")]
    InvalidInstanceName {
        /// Class the empty name was offered to.
        class: CapabilityClass,
    },

    /// Global has no named instances to register.
    #[error("Capability class '{0}' has no named instances")]
    NotRepeated(CapabilityClass),

    /// The coercion and range policy refused the value, or the device
    /// answered a Get with a value the descriptor does not admit.
    #[error("Attribute {attribute} rejected: {reason}")]
    Rejected {
        /// Attribute being set, checked or read.
        attribute: AttributeId,
        /// First check that failed.
        reason: Rejection,
    },

    /// The device did not answer within the timeout.
    #[error("Device did not respond to attribute {attribute} within {timeout:?}")]
    DeviceTimeout {
        /// Attribute being written or queried.
        attribute: AttributeId,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The transport collaborator failed.
    #[error("Transport error on attribute {attribute}: {cause:#}")]
    Transport {
        /// Attribute being written or queried.
        attribute: AttributeId,
        /// Error returned by the transport.
        cause: anyhow::Error,
    },

    /// The device error queue was non-empty after a flushed write.
    #[error("Device reported {} error(s) after writing attribute {attribute}: {}", errors.len(), join_errors(errors))]
    DeviceReportedError {
        /// Attribute whose write preceded the poll.
        attribute: AttributeId,
        /// Drained queue entries, oldest first.
        errors: Vec<DeviceError>,
    },
}

impl AttributeError {
    /// The policy rejection reason, if this is a `Rejected` error.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AttributeError::Rejected { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

fn join_errors(errors: &[DeviceError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
