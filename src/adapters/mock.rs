//! Simulated instrument for testing
//!
//! [`MockDevice`] implements both collaborator traits against an in-memory
//! attribute map, so the engine can be exercised without physical hardware.
//! It provides:
//! - Pre-seeded device values
//! - Controllable failure injection
//! - Simulated link latency (to provoke timeouts)
//! - A pushable device error queue
//! - Call logging for test verification
//!
//! Clones share state, so a test can keep one handle for inspection while the
//! session owns another.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::capability::Ordinal;
use crate::descriptor::AttributeId;
use crate::transport::{AttributeTransport, DeviceError, ErrorQueue};
use crate::value::AttributeValue;

/// Mock instrument for testing
///
/// # Example
///
/// ```
/// use specan_attrs::adapters::MockDevice;
/// use specan_attrs::capability::Ordinal;
/// use specan_attrs::descriptor::AttributeId;
///
/// let device = MockDevice::new().with_value(AttributeId(1), Ordinal(0), 2.5);
/// assert_eq!(device.device_value(AttributeId(1), Ordinal(0)), Some(2.5.into()));
/// assert!(device.call_log().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct MockDevice {
    values: Arc<Mutex<HashMap<(AttributeId, Ordinal), AttributeValue>>>,
    errors: Arc<Mutex<VecDeque<DeviceError>>>,
    latency_ms: Arc<AtomicU64>,
    should_fail_next: Arc<AtomicBool>,
    call_log: Arc<Mutex<Vec<String>>>,
}

impl MockDevice {
    /// Create a mock device with no latency and no stored values
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a device-side value
    pub fn with_value(
        self,
        attribute: AttributeId,
        ordinal: Ordinal,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.set_device_value(attribute, ordinal, value);
        self
    }

    /// Set simulated latency in milliseconds
    pub fn with_latency(self, ms: u64) -> Self {
        self.latency_ms.store(ms, Ordering::SeqCst);
        self
    }

    /// Change a device-side value behind the engine's back
    pub fn set_device_value(
        &self,
        attribute: AttributeId,
        ordinal: Ordinal,
        value: impl Into<AttributeValue>,
    ) {
        self.values.lock().insert((attribute, ordinal), value.into());
    }

    /// Current device-side value
    pub fn device_value(&self, attribute: AttributeId, ordinal: Ordinal) -> Option<AttributeValue> {
        self.values.lock().get(&(attribute, ordinal)).cloned()
    }

    /// Queue an error for the next error-queue poll
    pub fn push_error(&self, error: DeviceError) {
        self.errors.lock().push_back(error);
    }

    /// Inject a failure for the next send or query
    pub fn inject_next_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    fn check_failure(&self) -> bool {
        self.should_fail_next.swap(false, Ordering::SeqCst)
    }

    /// Get the call log
    pub fn call_log(&self) -> Vec<String> {
        self.call_log.lock().clone()
    }

    /// Number of logged calls starting with `prefix`
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.call_log
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        self.call_log.lock().clear();
    }

    fn log_call(&self, call: String) {
        self.call_log.lock().push(call);
    }

    async fn simulate_latency(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }
}

#[async_trait]
impl AttributeTransport for MockDevice {
    async fn send(
        &mut self,
        attribute: AttributeId,
        ordinal: Ordinal,
        value: &AttributeValue,
    ) -> Result<()> {
        self.log_call(format!("send {} {} {}", attribute, ordinal, value));
        self.simulate_latency().await;

        if self.check_failure() {
            return Err(anyhow!("Injected failure"));
        }

        self.values.lock().insert((attribute, ordinal), value.clone());
        Ok(())
    }

    async fn query(&mut self, attribute: AttributeId, ordinal: Ordinal) -> Result<AttributeValue> {
        self.log_call(format!("query {} {}", attribute, ordinal));
        self.simulate_latency().await;

        if self.check_failure() {
            return Err(anyhow!("Injected failure"));
        }

        self.device_value(attribute, ordinal)
            .ok_or_else(|| anyhow!("No device value for attribute {} on {}", attribute, ordinal))
    }
}

#[async_trait]
impl ErrorQueue for MockDevice {
    async fn poll_errors(&mut self) -> Result<Vec<DeviceError>> {
        self.log_call("poll_errors".to_string());
        Ok(self.errors.lock().drain(..).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_updates_device_value() {
        let mut device = MockDevice::new();
        device
            .send(AttributeId(1), Ordinal(2), &AttributeValue::Flag(true))
            .await
            .unwrap();
        assert_eq!(
            device.device_value(AttributeId(1), Ordinal(2)),
            Some(AttributeValue::Flag(true))
        );
        assert_eq!(device.call_log(), vec!["send 1 #2 true"]);
    }

    #[tokio::test]
    async fn test_query_missing_value_fails() {
        let mut device = MockDevice::new();
        assert!(device.query(AttributeId(1), Ordinal(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_injection_is_one_shot() {
        let mut device = MockDevice::new().with_value(AttributeId(1), Ordinal(0), 1i64);
        device.inject_next_failure();
        assert!(device.query(AttributeId(1), Ordinal(0)).await.is_err());
        assert_eq!(
            device.query(AttributeId(1), Ordinal(0)).await.unwrap(),
            AttributeValue::Integer(1)
        );
    }

    #[tokio::test]
    async fn test_error_queue_drains() {
        let mut device = MockDevice::new();
        device.push_error(DeviceError::new(-222, "Data out of range"));
        assert_eq!(device.poll_errors().await.unwrap().len(), 1);
        assert!(device.poll_errors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let device = MockDevice::new();
        let mut handle = device.clone();
        handle
            .send(AttributeId(5), Ordinal(0), &AttributeValue::Integer(3))
            .await
            .unwrap();
        assert_eq!(device.count_calls("send"), 1);
        device.clear_log();
        assert!(handle.call_log().is_empty());
    }
}
