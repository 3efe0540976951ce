//! Engine facade.
//!
//! A [`Session`] owns one descriptor table, one capability registry, one
//! attribute store and one device link. Every feature-level accessor of the
//! instrument is a call-through to the generic [`Session::set`],
//! [`Session::get`] and [`Session::check`] (or their typed wrappers), which
//! chain:
//!
//! ```text
//! DescriptorTable::lookup -> CapabilityRegistry::resolve -> CoercionPolicy::evaluate
//!     -> AttributeStore -> SyncPolicy -> AttributeTransport / ErrorQueue
//! ```
//!
//! The device link is held behind a `tokio::sync::Mutex` for the whole of an
//! operation, so facade calls on one session run one at a time, each to
//! completion. Device failures roll the touched cell back to its pre-call
//! state before the error is returned.
//!
//! # Example
//!
//! ```
//! use specan_attrs::adapters::MockDevice;
//! use specan_attrs::capability::CapabilityClass;
//! use specan_attrs::descriptor::{AttributeId, Descriptor, DescriptorTable};
//! use specan_attrs::session::{SessionBuilder, SetOutcome};
//! use specan_attrs::value::ValueKind;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! const REF_LEVEL: AttributeId = AttributeId(1150001);
//!
//! let table = DescriptorTable::new([Descriptor::builder(
//!     REF_LEVEL,
//!     "REF_LEVEL",
//!     ValueKind::Real,
//!     CapabilityClass::Window,
//! )
//! .real_range(-130.0, 30.0)
//! .coercible()
//! .build()
//! .unwrap()])
//! .unwrap();
//!
//! let session = SessionBuilder::new(table).with_device(MockDevice::new()).build();
//! session.register_instance(CapabilityClass::Window, "Win1").await.unwrap();
//!
//! let outcome = session.set_real("Win1", REF_LEVEL, 45.0).await.unwrap();
//! assert!(matches!(outcome, SetOutcome::Coerced { .. }));
//! assert_eq!(session.get_real("Win1", REF_LEVEL).await.unwrap(), 30.0);
//! # }
//! ```

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::capability::{CapabilityClass, Ordinal};
use crate::catalog::{CatalogError, TomlCatalog};
use crate::coercion::{CoercionOutcome, CoercionPolicy, Rejection};
use crate::config::SessionConfig;
use crate::descriptor::{AttributeId, Descriptor, DescriptorTable};
use crate::error::{AttributeError, AttributeResult};
use crate::registry::CapabilityRegistry;
use crate::store::{AttributeStore, CellKey};
use crate::sync::{ReadAction, SessionFlags, SyncPolicy, WriteAction};
use crate::transport::{AttributeTransport, DeviceError, ErrorQueue, NoErrorQueue};
use crate::value::{AttributeValue, Handle};

/// Default device I/O timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default coercion record capacity.
pub const DEFAULT_RECORD_CAPACITY: usize = 64;

/// Result of an accepted Set.
#[derive(Debug, Clone, PartialEq)]
pub enum SetOutcome {
    /// The value was stored as given.
    Accepted(AttributeValue),
    /// The value was adjusted before being stored.
    Coerced {
        /// Value the caller supplied.
        original: AttributeValue,
        /// Value that was stored.
        value: AttributeValue,
    },
}

impl SetOutcome {
    /// The value now held by the store.
    pub fn value(&self) -> &AttributeValue {
        match self {
            SetOutcome::Accepted(value) | SetOutcome::Coerced { value, .. } => value,
        }
    }

    /// Whether the value was adjusted.
    pub fn is_coerced(&self) -> bool {
        matches!(self, SetOutcome::Coerced { .. })
    }
}

/// One coercion that happened on a Set.
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionRecord {
    /// Attribute that was written.
    pub attribute: AttributeId,
    /// Class of the addressed instance.
    pub class: CapabilityClass,
    /// Instance name as given by the caller.
    pub instance: String,
    /// Value the caller supplied.
    pub original: AttributeValue,
    /// Value that was stored.
    pub coerced: AttributeValue,
}

struct DeviceLink {
    transport: Box<dyn AttributeTransport>,
    errors: Box<dyn ErrorQueue>,
}

/// Transport for sessions built without a device.
struct Unattached;

#[async_trait]
impl AttributeTransport for Unattached {
    async fn send(
        &mut self,
        _attribute: AttributeId,
        _ordinal: Ordinal,
        _value: &AttributeValue,
    ) -> anyhow::Result<()> {
        Err(anyhow!("no device transport attached to this session"))
    }

    async fn query(
        &mut self,
        _attribute: AttributeId,
        _ordinal: Ordinal,
    ) -> anyhow::Result<AttributeValue> {
        Err(anyhow!("no device transport attached to this session"))
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    table: DescriptorTable,
    transport: Box<dyn AttributeTransport>,
    errors: Box<dyn ErrorQueue>,
    flags: SessionFlags,
    io_timeout: Duration,
    record_capacity: usize,
}

impl SessionBuilder {
    /// Start a session over `table` with default flags and no device.
    pub fn new(table: DescriptorTable) -> Self {
        Self {
            table,
            transport: Box::new(Unattached),
            errors: Box::new(NoErrorQueue),
            flags: SessionFlags::default(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            record_capacity: DEFAULT_RECORD_CAPACITY,
        }
    }

    /// Start from a loaded configuration.
    ///
    /// When `catalog_path` is set the descriptor table is read from it;
    /// otherwise the table is empty until [`SessionBuilder::table`] is called.
    pub fn from_config(config: &SessionConfig) -> Result<Self, CatalogError> {
        let table = match &config.catalog_path {
            Some(path) => DescriptorTable::from_loader(&TomlCatalog::from_path(path)?)?,
            None => DescriptorTable::new(Vec::new())?,
        };
        Ok(Self::new(table)
            .flags(config.flags)
            .timeout(config.io_timeout())
            .record_capacity(config.coercion_records.capacity))
    }

    /// Replace the descriptor table.
    pub fn table(mut self, table: DescriptorTable) -> Self {
        self.table = table;
        self
    }

    /// Attach the command/transport collaborator.
    pub fn with_transport(mut self, transport: impl AttributeTransport + 'static) -> Self {
        self.transport = Box::new(transport);
        self
    }

    /// Attach the device error-queue collaborator.
    pub fn with_error_queue(mut self, errors: impl ErrorQueue + 'static) -> Self {
        self.errors = Box::new(errors);
        self
    }

    /// Attach one device object as both transport and error queue.
    pub fn with_device<D>(self, device: D) -> Self
    where
        D: AttributeTransport + ErrorQueue + Clone + 'static,
    {
        self.with_transport(device.clone()).with_error_queue(device)
    }

    /// Session flags.
    pub fn flags(mut self, flags: SessionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Default timeout of flushed writes and device queries.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Coercion records kept before the oldest is dropped.
    pub fn record_capacity(mut self, capacity: usize) -> Self {
        self.record_capacity = capacity.max(1);
        self
    }

    /// Finish the session.
    pub fn build(self) -> Session {
        debug!(
            attributes = self.table.len(),
            flags = ?self.flags,
            timeout = ?self.io_timeout,
            "Attribute session created"
        );
        Session {
            table: Arc::new(self.table),
            registry: RwLock::new(CapabilityRegistry::new()),
            store: AttributeStore::new(),
            link: tokio::sync::Mutex::new(DeviceLink {
                transport: self.transport,
                errors: self.errors,
            }),
            sync: SyncPolicy::new(self.flags),
            coercion: CoercionPolicy::new(self.flags.range_check),
            io_timeout: self.io_timeout,
            records: Mutex::new(VecDeque::new()),
            record_capacity: self.record_capacity,
        }
    }
}

/// One attribute engine bound to one device link.
pub struct Session {
    table: Arc<DescriptorTable>,
    registry: RwLock<CapabilityRegistry>,
    store: AttributeStore,
    link: tokio::sync::Mutex<DeviceLink>,
    sync: SyncPolicy,
    coercion: CoercionPolicy,
    io_timeout: Duration,
    records: Mutex<VecDeque<CoercionRecord>>,
    record_capacity: usize,
}

impl Session {
    /// The flags this session runs with.
    pub fn flags(&self) -> SessionFlags {
        self.sync.flags()
    }

    /// Default device I/O timeout.
    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// The session's descriptor table.
    pub fn descriptors(&self) -> &DescriptorTable {
        &self.table
    }

    fn address(
        &self,
        instance: &str,
        attribute: AttributeId,
    ) -> AttributeResult<(Arc<Descriptor>, CellKey)> {
        let descriptor = Arc::clone(self.table.lookup(attribute)?);
        let ordinal = self.registry.read().resolve(descriptor.class, instance)?;
        let key = CellKey::new(attribute, descriptor.class, ordinal);
        Ok((descriptor, key))
    }

    // ------------------------------------------------------------------
    // Set
    // ------------------------------------------------------------------

    /// Write `value` to `attribute` on `instance` with the session timeout.
    ///
    /// Global attributes are addressed with the empty instance name.
    pub async fn set(
        &self,
        instance: &str,
        attribute: AttributeId,
        value: impl Into<AttributeValue>,
    ) -> AttributeResult<SetOutcome> {
        self.set_with_timeout(instance, attribute, value, self.io_timeout)
            .await
    }

    /// [`Session::set`] with a per-call device timeout.
    pub async fn set_with_timeout(
        &self,
        instance: &str,
        attribute: AttributeId,
        value: impl Into<AttributeValue>,
        timeout: Duration,
    ) -> AttributeResult<SetOutcome> {
        let value = value.into();
        let mut link = self.link.lock().await;
        let (descriptor, key) = self.address(instance, attribute)?;

        let outcome = match self.coercion.evaluate(&descriptor, value) {
            CoercionOutcome::Accepted(value) => SetOutcome::Accepted(value),
            CoercionOutcome::Coerced { original, value } => {
                debug!(
                    attribute = %descriptor.name,
                    instance,
                    %original,
                    coerced = %value,
                    "Value coerced"
                );
                SetOutcome::Coerced { original, value }
            }
            CoercionOutcome::Rejected(reason) => {
                debug!(attribute = %descriptor.name, instance, %reason, "Set rejected");
                return Err(AttributeError::Rejected { attribute, reason });
            }
        };

        let snapshot = self.store.snapshot(key);
        self.store
            .write(key, outcome.value().clone(), outcome.is_coerced());

        match self.sync.on_set(&descriptor) {
            WriteAction::Local => {
                trace!(attribute = %descriptor.name, instance, "Set stored locally (simulate)");
            }
            WriteAction::Defer => {
                trace!(attribute = %descriptor.name, instance, "Set deferred until commit");
            }
            WriteAction::Flush => {
                if let Err(err) = self.flush(&mut link, key, outcome.value(), timeout).await {
                    self.store.restore(key, snapshot);
                    warn!(
                        attribute = %descriptor.name,
                        instance,
                        error = %err,
                        "Device write failed, cache rolled back"
                    );
                    return Err(err);
                }
                self.store.clear_dirty(key);
                trace!(attribute = %descriptor.name, instance, "Set flushed");
            }
        }

        if let SetOutcome::Coerced { original, value } = &outcome {
            self.record_coercion(CoercionRecord {
                attribute,
                class: key.class,
                instance: instance.to_string(),
                original: original.clone(),
                coerced: value.clone(),
            });
        }

        Ok(outcome)
    }

    async fn flush(
        &self,
        link: &mut DeviceLink,
        key: CellKey,
        value: &AttributeValue,
        timeout: Duration,
    ) -> AttributeResult<()> {
        let attribute = key.attribute;
        match tokio::time::timeout(timeout, link.transport.send(attribute, key.ordinal, value))
            .await
        {
            Err(_) => return Err(AttributeError::DeviceTimeout { attribute, timeout }),
            Ok(Err(cause)) => return Err(AttributeError::Transport { attribute, cause }),
            Ok(Ok(())) => {}
        }

        if self.sync.poll_after_flush() {
            let errors: Vec<DeviceError> =
                match tokio::time::timeout(timeout, link.errors.poll_errors()).await {
                    Err(_) => return Err(AttributeError::DeviceTimeout { attribute, timeout }),
                    Ok(Err(cause)) => return Err(AttributeError::Transport { attribute, cause }),
                    Ok(Ok(errors)) => errors,
                };
            if !errors.is_empty() {
                return Err(AttributeError::DeviceReportedError { attribute, errors });
            }
        }
        Ok(())
    }

    fn record_coercion(&self, record: CoercionRecord) {
        if !self.sync.flags().record_coercions {
            return;
        }
        let mut records = self.records.lock();
        if records.len() >= self.record_capacity {
            if let Some(dropped) = records.pop_front() {
                warn!(
                    attribute = %dropped.attribute,
                    instance = %dropped.instance,
                    capacity = self.record_capacity,
                    "Coercion record queue full, dropping oldest record"
                );
            }
        }
        records.push_back(record);
    }

    // ------------------------------------------------------------------
    // Get
    // ------------------------------------------------------------------

    /// Read `attribute` on `instance` with the session timeout.
    pub async fn get(&self, instance: &str, attribute: AttributeId) -> AttributeResult<AttributeValue> {
        self.get_with_timeout(instance, attribute, self.io_timeout)
            .await
    }

    /// [`Session::get`] with a per-call device timeout.
    pub async fn get_with_timeout(
        &self,
        instance: &str,
        attribute: AttributeId,
        timeout: Duration,
    ) -> AttributeResult<AttributeValue> {
        let mut link = self.link.lock().await;
        let (descriptor, key) = self.address(instance, attribute)?;
        let cell = self.store.peek(key, &descriptor.default);

        match self.sync.on_get(&descriptor, &cell) {
            ReadAction::Cache | ReadAction::Local => {
                trace!(attribute = %descriptor.name, instance, "Get served from cache");
                Ok(self.store.read(key, &descriptor.default).value)
            }
            ReadAction::Query => {
                let value = match tokio::time::timeout(
                    timeout,
                    link.transport.query(attribute, key.ordinal),
                )
                .await
                {
                    Err(_) => Err(AttributeError::DeviceTimeout { attribute, timeout }),
                    Ok(Err(cause)) => Err(AttributeError::Transport { attribute, cause }),
                    Ok(Ok(value)) => Ok(value),
                }
                .map_err(|err| {
                    warn!(attribute = %descriptor.name, instance, error = %err, "Device query failed");
                    err
                })?;

                if value.kind() != descriptor.kind {
                    warn!(
                        attribute = %descriptor.name,
                        instance,
                        expected = %descriptor.kind,
                        actual = %value.kind(),
                        "Device returned a value of the wrong kind"
                    );
                    return Err(AttributeError::Rejected {
                        attribute,
                        reason: Rejection::TypeMismatch {
                            expected: descriptor.kind,
                            actual: value.kind(),
                        },
                    });
                }

                if !descriptor.validity.admits(&value) {
                    let reason = descriptor.validity.violation();
                    warn!(
                        attribute = %descriptor.name,
                        instance,
                        %value,
                        %reason,
                        "Device returned a value outside the attribute's validity"
                    );
                    return Err(AttributeError::Rejected { attribute, reason });
                }

                trace!(attribute = %descriptor.name, instance, %value, "Get queried device");
                self.store.write_from_device(key, value.clone());
                Ok(value)
            }
        }
    }

    // ------------------------------------------------------------------
    // Check
    // ------------------------------------------------------------------

    /// Report what a Set of `value` would do, without storing or sending it.
    ///
    /// Policy rejections come back as `Ok(CoercionOutcome::Rejected(_))`;
    /// only addressing failures are errors.
    pub fn check(
        &self,
        instance: &str,
        attribute: AttributeId,
        value: impl Into<AttributeValue>,
    ) -> AttributeResult<CoercionOutcome> {
        let (descriptor, _) = self.address(instance, attribute)?;
        Ok(self.coercion.evaluate(&descriptor, value.into()))
    }

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    /// Live instance names of `class`, in registration order.
    pub fn list_instance_names(&self, class: CapabilityClass) -> Vec<String> {
        self.registry.read().list_instances(class)
    }

    /// Whether `name` is a live instance of `class`.
    pub fn instance_exists(&self, class: CapabilityClass, name: &str) -> bool {
        self.registry.read().contains(class, name)
    }

    /// Register a new instance, returning its ordinal.
    pub async fn register_instance(
        &self,
        class: CapabilityClass,
        name: &str,
    ) -> AttributeResult<Ordinal> {
        let _link = self.link.lock().await;
        let ordinal = self.registry.write().register(class, name)?;
        info!(%class, name, %ordinal, "Instance registered");
        Ok(ordinal)
    }

    /// Remove an instance and drop every cached value it owned.
    pub async fn unregister_instance(&self, class: CapabilityClass, name: &str) -> AttributeResult<()> {
        let _link = self.link.lock().await;
        let ordinal = self.registry.write().unregister(class, name)?;
        let dropped = self.store.invalidate_instance(class, ordinal);
        info!(%class, name, %ordinal, cells = dropped, "Instance unregistered");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cache maintenance
    // ------------------------------------------------------------------

    /// Flush every deferred Set to the device, in key order.
    ///
    /// Stops at the first failure; cells already flushed stay flushed and the
    /// rest stay dirty. Returns the number of cells flushed.
    pub async fn commit(&self) -> AttributeResult<usize> {
        let mut link = self.link.lock().await;
        let pending = self.store.dirty_cells();

        if self.sync.flags().simulate {
            for (key, _) in &pending {
                self.store.clear_dirty(*key);
            }
            debug!(cells = pending.len(), "Commit cleared pending writes (simulate)");
            return Ok(pending.len());
        }

        let mut flushed = 0;
        for (key, value) in pending {
            if let Err(err) = self.flush(&mut link, key, &value, self.io_timeout).await {
                warn!(
                    attribute = %key.attribute,
                    ordinal = %key.ordinal,
                    flushed,
                    error = %err,
                    "Commit stopped at failed write"
                );
                return Err(err);
            }
            self.store.clear_dirty(key);
            flushed += 1;
        }
        debug!(cells = flushed, "Commit flushed pending writes");
        Ok(flushed)
    }

    /// Make the next Get of every clean cell query the device.
    pub fn invalidate_all(&self) {
        self.store.invalidate_all();
        debug!("Attribute cache invalidated");
    }

    /// Make the next Get of one attribute query the device.
    pub fn invalidate_attribute(&self, instance: &str, attribute: AttributeId) -> AttributeResult<()> {
        let (_, key) = self.address(instance, attribute)?;
        self.store.invalidate(key);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Coercion records
    // ------------------------------------------------------------------

    /// Pop the oldest coercion record.
    pub fn next_coercion_record(&self) -> Option<CoercionRecord> {
        self.records.lock().pop_front()
    }

    /// Drop every coercion record.
    pub fn clear_coercion_records(&self) {
        self.records.lock().clear();
    }
}

macro_rules! typed_entry_points {
    ($($kind:literal: $ty:ty => $set:ident, $get:ident, $check:ident, $access:ident;)*) => {
        impl Session {
            $(
                #[doc = concat!("[`Session::set`] for ", $kind, " attributes.")]
                pub async fn $set(
                    &self,
                    instance: &str,
                    attribute: AttributeId,
                    value: $ty,
                ) -> AttributeResult<SetOutcome> {
                    self.set(instance, attribute, value).await
                }

                #[doc = concat!("[`Session::get`] for ", $kind, " attributes.")]
                pub async fn $get(&self, instance: &str, attribute: AttributeId) -> AttributeResult<$ty> {
                    let value = self.get(instance, attribute).await?;
                    value
                        .$access()
                        .map(|v| v.to_owned())
                        .map_err(|reason| AttributeError::Rejected { attribute, reason })
                }

                #[doc = concat!("[`Session::check`] for ", $kind, " attributes.")]
                pub fn $check(
                    &self,
                    instance: &str,
                    attribute: AttributeId,
                    value: $ty,
                ) -> AttributeResult<CoercionOutcome> {
                    self.check(instance, attribute, value)
                }
            )*
        }
    };
}

typed_entry_points! {
    "integer": i64 => set_integer, get_integer, check_integer, as_integer;
    "real": f64 => set_real, get_real, check_real, as_real;
    "text": String => set_text, get_text, check_text, as_text;
    "flag": bool => set_flag, get_flag, check_flag, as_flag;
    "handle": Handle => set_handle, get_handle, check_handle, as_handle;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockDevice;
    use crate::descriptor::SyncMode;
    use crate::value::ValueKind;
    use tracing_test::traced_test;

    const REF_LEVEL: AttributeId = AttributeId(1);
    const TRIGGER: AttributeId = AttributeId(2);
    const SWEEP_POINTS: AttributeId = AttributeId(3);
    const MARKER_X: AttributeId = AttributeId(4);

    fn table() -> DescriptorTable {
        DescriptorTable::new([
            Descriptor::builder(REF_LEVEL, "REF_LEVEL", ValueKind::Real, CapabilityClass::Window)
                .real_range(-130.0, 30.0)
                .coercible()
                .default_value(-20.0)
                .build()
                .unwrap(),
            Descriptor::builder(TRIGGER, "TRIGGER", ValueKind::Flag, CapabilityClass::Global)
                .sync(SyncMode::AlwaysWrite)
                .build()
                .unwrap(),
            Descriptor::builder(SWEEP_POINTS, "SWEEP_POINTS", ValueKind::Integer, CapabilityClass::Global)
                .integer_range(101, 100_001)
                .default_value(1001i64)
                .build()
                .unwrap(),
            Descriptor::builder(MARKER_X, "MARKER_X", ValueKind::Real, CapabilityClass::Marker)
                .real_range(0.0, 26.5e9)
                .sync(SyncMode::Volatile)
                .build()
                .unwrap(),
        ])
        .unwrap()
    }

    async fn session_with(device: &MockDevice, flags: SessionFlags) -> Session {
        let session = SessionBuilder::new(table())
            .with_device(device.clone())
            .flags(flags)
            .build();
        session
            .register_instance(CapabilityClass::Window, "Win1")
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_deferred_set_is_flushed_by_commit() {
        let device = MockDevice::new();
        let session = session_with(&device, SessionFlags::default()).await;

        session.set_real("Win1", REF_LEVEL, -10.0).await.unwrap();
        assert_eq!(device.count_calls("send"), 0);

        assert_eq!(session.commit().await.unwrap(), 1);
        assert_eq!(
            device.device_value(REF_LEVEL, Ordinal(0)),
            Some(AttributeValue::Real(-10.0))
        );
        assert_eq!(session.commit().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_always_write_is_flushed_immediately() {
        let device = MockDevice::new();
        let session = session_with(&device, SessionFlags::default()).await;
        session.set_flag("", TRIGGER, true).await.unwrap();
        assert_eq!(device.call_log(), vec!["send 2 #0 true"]);
    }

    #[tokio::test]
    async fn test_global_attribute_needs_empty_name() {
        let device = MockDevice::new();
        let session = session_with(&device, SessionFlags::default()).await;
        let err = session.set_integer("Win1", SWEEP_POINTS, 201).await.unwrap_err();
        assert!(matches!(err, AttributeError::InstanceNotFound { .. }));
        let err = session.get_real("", REF_LEVEL).await.unwrap_err();
        assert!(matches!(err, AttributeError::InstanceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_wrong_typed_accessor_is_type_mismatch() {
        let device = MockDevice::new();
        let session = session_with(&device, SessionFlags::default()).await;
        let err = session.set_integer("Win1", REF_LEVEL, 5).await.unwrap_err();
        assert!(matches!(
            err.rejection(),
            Some(Rejection::TypeMismatch {
                expected: ValueKind::Real,
                actual: ValueKind::Integer
            })
        ));

        session.set_real("Win1", REF_LEVEL, 5.0).await.unwrap();
        assert!(session.get_flag("Win1", REF_LEVEL).await.is_err());
    }

    #[tokio::test]
    async fn test_check_does_not_touch_store_or_device() {
        let device = MockDevice::new();
        let session = session_with(&device, SessionFlags::default()).await;
        let outcome = session.check_real("Win1", REF_LEVEL, 99.0).unwrap();
        assert!(outcome.is_coerced());
        let outcome = session.check_integer("", SWEEP_POINTS, 5).unwrap();
        assert_eq!(outcome, CoercionOutcome::Rejected(Rejection::OutOfRange));
        assert!(session.store.is_empty());
        assert!(device.call_log().is_empty());
    }

    #[tokio::test]
    async fn test_session_without_device_reports_transport_error() {
        let session = SessionBuilder::new(table()).build();
        let err = session.get_integer("", SWEEP_POINTS).await.unwrap_err();
        assert!(matches!(err, AttributeError::Transport { .. }));
        assert!(session.store.is_empty());
    }

    #[tokio::test]
    async fn test_query_of_wrong_kind_leaves_store_unchanged() {
        let device = MockDevice::new().with_value(SWEEP_POINTS, Ordinal::GLOBAL, "many");
        let session = session_with(&device, SessionFlags::default()).await;
        let err = session.get("", SWEEP_POINTS).await.unwrap_err();
        assert!(matches!(
            err.rejection(),
            Some(Rejection::TypeMismatch { .. })
        ));
        assert!(session.store.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_attribute_forces_requery() {
        let device = MockDevice::new().with_value(SWEEP_POINTS, Ordinal::GLOBAL, 401i64);
        let session = session_with(&device, SessionFlags::default()).await;

        assert_eq!(session.get_integer("", SWEEP_POINTS).await.unwrap(), 401);
        device.set_device_value(SWEEP_POINTS, Ordinal::GLOBAL, 801i64);
        assert_eq!(session.get_integer("", SWEEP_POINTS).await.unwrap(), 401);

        session.invalidate_attribute("", SWEEP_POINTS).unwrap();
        assert_eq!(session.get_integer("", SWEEP_POINTS).await.unwrap(), 801);
        assert_eq!(device.count_calls("query"), 2);
    }

    #[tokio::test]
    async fn test_records_are_bounded() {
        let device = MockDevice::new();
        let session = SessionBuilder::new(table())
            .with_device(device)
            .flags(SessionFlags {
                record_coercions: true,
                ..SessionFlags::default()
            })
            .record_capacity(2)
            .build();
        session
            .register_instance(CapabilityClass::Window, "Win1")
            .await
            .unwrap();

        for level in [40.0, 50.0, 60.0] {
            session.set_real("Win1", REF_LEVEL, level).await.unwrap();
        }
        let first = session.next_coercion_record().unwrap();
        assert_eq!(first.original, AttributeValue::Real(50.0));
        assert_eq!(first.coerced, AttributeValue::Real(30.0));
        assert!(session.next_coercion_record().is_some());
        assert!(session.next_coercion_record().is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rollback_is_logged() {
        let device = MockDevice::new();
        let session = session_with(&device, SessionFlags::default()).await;
        device.inject_next_failure();
        let err = session.set_flag("", TRIGGER, true).await.unwrap_err();
        assert!(matches!(err, AttributeError::Transport { .. }));
        assert!(logs_contain("cache rolled back"));
        assert!(logs_contain("Injected failure"));
    }

    #[tokio::test]
    async fn test_volatile_set_reaches_device_before_next_get() {
        let device = MockDevice::new().with_value(MARKER_X, Ordinal(0), 1.0);
        let session = session_with(&device, SessionFlags::default()).await;
        session
            .register_instance(CapabilityClass::Marker, "Mkr1")
            .await
            .unwrap();

        session.set_real("Mkr1", MARKER_X, 5.0e9).await.unwrap();
        assert_eq!(device.count_calls("send"), 1);
        assert_eq!(session.get_real("Mkr1", MARKER_X).await.unwrap(), 5.0e9);
        assert_eq!(session.commit().await.unwrap(), 0);
        assert_eq!(
            device.device_value(MARKER_X, Ordinal(0)),
            Some(AttributeValue::Real(5.0e9))
        );
    }

    #[tokio::test]
    async fn test_query_outside_validity_is_rejected_and_not_cached() {
        let device = MockDevice::new().with_value(SWEEP_POINTS, Ordinal::GLOBAL, 5i64);
        let session = session_with(&device, SessionFlags::default()).await;

        let err = session.get_integer("", SWEEP_POINTS).await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::OutOfRange));
        assert!(session.store.is_empty());

        device.set_device_value(SWEEP_POINTS, Ordinal::GLOBAL, 401i64);
        assert_eq!(session.get_integer("", SWEEP_POINTS).await.unwrap(), 401);
        assert_eq!(device.count_calls("query"), 2);
    }
}
