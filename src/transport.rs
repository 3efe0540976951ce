//! Device collaborator traits.
//!
//! The engine never formats commands or moves bytes itself. It hands
//! `(attribute, ordinal, value)` triples to an [`AttributeTransport`], which
//! owns the mapping to the instrument's command syntax and the I/O link, and
//! consults an [`ErrorQueue`] after flushed writes when status checking is on.
//!
//! Both traits follow the adapter convention of returning `anyhow::Result`;
//! the session wraps failures into `AttributeError::Transport` and applies its
//! own timeout around every call.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capability::Ordinal;
use crate::descriptor::AttributeId;
use crate::value::AttributeValue;

/// Command/query link to the instrument.
///
/// Calls are issued one at a time; the session serialises access.
#[async_trait]
pub trait AttributeTransport: Send {
    /// Write `value` to `attribute` on instance `ordinal`.
    async fn send(
        &mut self,
        attribute: AttributeId,
        ordinal: Ordinal,
        value: &AttributeValue,
    ) -> Result<()>;

    /// Read the current value of `attribute` on instance `ordinal`.
    async fn query(&mut self, attribute: AttributeId, ordinal: Ordinal) -> Result<AttributeValue>;
}

/// Instrument error queue (`SYST:ERR?` style).
#[async_trait]
pub trait ErrorQueue: Send {
    /// Drain and return every queued device error. Empty means no error.
    async fn poll_errors(&mut self) -> Result<Vec<DeviceError>>;
}

/// One entry of the instrument's error queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceError {
    /// Instrument error code (negative for standard SCPI errors).
    pub code: i32,
    /// Instrument error message.
    pub message: String,
}

impl DeviceError {
    /// Create a device error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},\"{}\"", self.code, self.message)
    }
}

/// Error queue for links that cannot report device errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoErrorQueue;

#[async_trait]
impl ErrorQueue for NoErrorQueue {
    async fn poll_errors(&mut self) -> Result<Vec<DeviceError>> {
        Ok(Vec::new())
    }
}
