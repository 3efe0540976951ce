//! Repeated-capability classes and instance ordinals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A family of addressable sub-objects of the analyzer.
///
/// `Global` is the sentinel for attributes that are not scoped to any
/// instance; it has exactly one implicit instance addressed by the empty name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityClass {
    /// Not scoped to any instance.
    Global,
    /// Measurement window.
    Window,
    /// Trace within a window.
    Trace,
    /// Normal marker.
    Marker,
    /// Delta marker.
    DeltaMarker,
    /// Limit line.
    LimitLine,
    /// Display line.
    DisplayLine,
    /// Transducer factor set.
    TransducerSet,
    /// Measurement channel.
    Channel,
}

impl CapabilityClass {
    /// Whether this class has named instances.
    pub fn is_repeated(self) -> bool {
        self != CapabilityClass::Global
    }
}

impl fmt::Display for CapabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CapabilityClass::Global => "global",
            CapabilityClass::Window => "window",
            CapabilityClass::Trace => "trace",
            CapabilityClass::Marker => "marker",
            CapabilityClass::DeltaMarker => "delta_marker",
            CapabilityClass::LimitLine => "limit_line",
            CapabilityClass::DisplayLine => "display_line",
            CapabilityClass::TransducerSet => "transducer_set",
            CapabilityClass::Channel => "channel",
        };
        f.write_str(name)
    }
}

/// Stable index of one live instance within its class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ordinal(pub u32);

impl Ordinal {
    /// The single implicit instance of `Global`.
    pub const GLOBAL: Ordinal = Ordinal(0);
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
