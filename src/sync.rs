//! Synchronization policy between the store and the device.
//!
//! Decides per attribute and per operation whether a Set is flushed now or
//! deferred, and whether a Get may be answered from the cache. The decision is
//! driven by the session's [`SessionFlags`] and the descriptor's
//! [`SyncMode`]; nothing here performs I/O.

use serde::{Deserialize, Serialize};

use crate::descriptor::{Descriptor, SyncMode};
use crate::store::StoreCell;

/// Session-wide behaviour switches.
///
/// Held by each session, so two sessions can run with different policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFlags {
    /// Serve Gets from the cache and defer Sets where allowed.
    pub cache: bool,
    /// Never touch the device.
    pub simulate: bool,
    /// Range-check values, clamping coercible attributes.
    pub range_check: bool,
    /// Poll the device error queue after every flushed Set.
    pub query_instrument_status: bool,
    /// Keep a queue of coercion records.
    pub record_coercions: bool,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            cache: true,
            simulate: false,
            range_check: true,
            query_instrument_status: false,
            record_coercions: false,
        }
    }
}

/// What to do with an accepted Set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    /// Send to the device before returning.
    Flush,
    /// Keep in the store until the next commit.
    Defer,
    /// Simulation: store only, never send.
    Local,
}

/// Where a Get is answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAction {
    /// Return the cached value.
    Cache,
    /// Query the device and refresh the cache.
    Query,
    /// Simulation: return the cached or default value.
    Local,
}

/// Pure decision function over flags, descriptor and cell state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    flags: SessionFlags,
}

impl SyncPolicy {
    /// Create a policy from session flags.
    pub fn new(flags: SessionFlags) -> Self {
        Self { flags }
    }

    /// Decision for an accepted Set.
    pub fn on_set(&self, descriptor: &Descriptor) -> WriteAction {
        if self.flags.simulate {
            WriteAction::Local
        } else if !self.flags.cache || descriptor.sync != SyncMode::Cached {
            // Volatile cells are re-queried on every Get; nothing may stay pending.
            WriteAction::Flush
        } else {
            WriteAction::Defer
        }
    }

    /// Decision for a Get, given the current cell.
    pub fn on_get(&self, descriptor: &Descriptor, cell: &StoreCell) -> ReadAction {
        if self.flags.simulate {
            return ReadAction::Local;
        }
        let never_read = !cell.is_dirty && !cell.is_valid;
        if !self.flags.cache || never_read || descriptor.sync == SyncMode::Volatile {
            ReadAction::Query
        } else {
            ReadAction::Cache
        }
    }

    /// Whether a flushed Set is followed by an error-queue poll.
    pub fn poll_after_flush(&self) -> bool {
        self.flags.query_instrument_status && !self.flags.simulate
    }

    /// The flags this policy was built from.
    pub fn flags(&self) -> SessionFlags {
        self.flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityClass;
    use crate::descriptor::AttributeId;
    use crate::value::{AttributeValue, ValueKind};

    fn descriptor(sync: SyncMode) -> Descriptor {
        Descriptor::builder(AttributeId(1), "ATTR", ValueKind::Real, CapabilityClass::Global)
            .sync(sync)
            .build()
            .unwrap()
    }

    fn cell(is_valid: bool, is_dirty: bool) -> StoreCell {
        StoreCell {
            value: AttributeValue::Real(1.0),
            is_valid,
            was_coerced: false,
            is_dirty,
        }
    }

    #[test]
    fn test_set_is_deferred_with_cache() {
        let policy = SyncPolicy::new(SessionFlags::default());
        assert_eq!(policy.on_set(&descriptor(SyncMode::Cached)), WriteAction::Defer);
        assert_eq!(policy.on_set(&descriptor(SyncMode::AlwaysWrite)), WriteAction::Flush);
    }

    #[test]
    fn test_volatile_set_is_flushed_immediately() {
        let policy = SyncPolicy::new(SessionFlags::default());
        assert_eq!(policy.on_set(&descriptor(SyncMode::Volatile)), WriteAction::Flush);
    }

    #[test]
    fn test_set_is_flushed_without_cache() {
        let policy = SyncPolicy::new(SessionFlags {
            cache: false,
            ..SessionFlags::default()
        });
        assert_eq!(policy.on_set(&descriptor(SyncMode::Cached)), WriteAction::Flush);
    }

    #[test]
    fn test_get_queries_when_never_read() {
        let policy = SyncPolicy::new(SessionFlags::default());
        let d = descriptor(SyncMode::Cached);
        assert_eq!(policy.on_get(&d, &cell(false, false)), ReadAction::Query);
        assert_eq!(policy.on_get(&d, &cell(true, false)), ReadAction::Cache);
        assert_eq!(policy.on_get(&d, &cell(true, true)), ReadAction::Cache);
    }

    #[test]
    fn test_volatile_always_queries() {
        let policy = SyncPolicy::new(SessionFlags::default());
        assert_eq!(
            policy.on_get(&descriptor(SyncMode::Volatile), &cell(true, false)),
            ReadAction::Query
        );
    }

    #[test]
    fn test_simulate_never_touches_device() {
        let policy = SyncPolicy::new(SessionFlags {
            simulate: true,
            cache: false,
            query_instrument_status: true,
            ..SessionFlags::default()
        });
        let d = descriptor(SyncMode::AlwaysWrite);
        assert_eq!(policy.on_set(&d), WriteAction::Local);
        assert_eq!(policy.on_get(&d, &cell(false, false)), ReadAction::Local);
        assert!(!policy.poll_after_flush());
    }
}
