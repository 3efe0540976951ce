//! Attribute descriptors and the immutable descriptor table.
//!
//! A [`Descriptor`] is the static record for one attribute id: its value kind,
//! the capability class it is scoped to, its validity predicate, access flags,
//! cache behaviour and default value. Descriptors are built once (by hand via
//! [`DescriptorBuilder`] or from a catalog file, see [`crate::catalog`]) and
//! then frozen inside a [`DescriptorTable`], which needs no locking.
//!
//! # Example
//!
//! ```
//! use specan_attrs::capability::CapabilityClass;
//! use specan_attrs::descriptor::{AttributeId, Descriptor, DescriptorTable};
//! use specan_attrs::value::ValueKind;
//!
//! let ref_level = Descriptor::builder(AttributeId(1150001), "REF_LEVEL", ValueKind::Real, CapabilityClass::Window)
//!     .real_range(-130.0, 30.0)
//!     .default_value(-20.0)
//!     .coercible()
//!     .build()
//!     .unwrap();
//!
//! let table = DescriptorTable::new(vec![ref_level]).unwrap();
//! assert_eq!(table.lookup(AttributeId(1150001)).unwrap().name, "REF_LEVEL");
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::capability::CapabilityClass;
use crate::catalog::CatalogError;
use crate::coercion::Rejection;
use crate::error::{AttributeError, AttributeResult};
use crate::value::{AttributeValue, ValueKind};

/// Process-wide unique attribute identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeId(pub u32);

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validity predicate of an attribute.
#[derive(Debug, Clone)]
pub enum Validity {
    /// Every value of the attribute's kind is valid.
    Any,
    /// Inclusive integer range.
    IntegerRange {
        /// Lower bound (inclusive).
        min: i64,
        /// Upper bound (inclusive).
        max: i64,
    },
    /// Inclusive real range. NaN is never inside it.
    RealRange {
        /// Lower bound (inclusive).
        min: f64,
        /// Upper bound (inclusive).
        max: f64,
    },
    /// Closed set of admissible values.
    Enumerated(Vec<AttributeValue>),
    /// Full-match regular expression for text values.
    Pattern(Regex),
}

impl Validity {
    /// Whether `value` satisfies the predicate. Kind is not checked here.
    pub fn admits(&self, value: &AttributeValue) -> bool {
        match (self, value) {
            (Validity::Any, _) => true,
            (Validity::IntegerRange { min, max }, AttributeValue::Integer(v)) => {
                v >= min && v <= max
            }
            (Validity::RealRange { min, max }, AttributeValue::Real(v)) => {
                !v.is_nan() && v >= min && v <= max
            }
            (Validity::Enumerated(members), candidate) => members.iter().any(|m| m == candidate),
            (Validity::Pattern(re), AttributeValue::Text(text)) => re.is_match(text),
            _ => false,
        }
    }

    /// Rejection reported for a value this predicate does not admit.
    pub fn violation(&self) -> Rejection {
        match self {
            Validity::Enumerated(_) => Rejection::InvalidEnumValue,
            Validity::Pattern(_) => Rejection::InvalidFormat,
            Validity::Any | Validity::IntegerRange { .. } | Validity::RealRange { .. } => {
                Rejection::OutOfRange
            }
        }
    }

    /// Compile a pattern so that it must match the whole string.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(&format!("^(?:{})$", pattern)).map(Validity::Pattern)
    }
}

/// How an attribute's value relates to the device's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Persisted device setting; cacheable in both directions.
    #[default]
    Cached,
    /// Action or trigger with no persisted state; every Set is flushed.
    AlwaysWrite,
    /// Changes on the device without a local Set; every Get re-queries and
    /// every Set is flushed.
    Volatile,
}

/// Static description of one attribute.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Attribute identifier.
    pub id: AttributeId,
    /// Symbolic name, for logs and error messages.
    pub name: String,
    /// Kind every value of this attribute has.
    pub kind: ValueKind,
    /// Class the attribute is addressed through.
    pub class: CapabilityClass,
    /// Validity predicate.
    pub validity: Validity,
    /// Rejects every Set when true.
    pub read_only: bool,
    /// Out-of-range values may be clamped instead of rejected.
    pub coercible: bool,
    /// Cache behaviour.
    pub sync: SyncMode,
    /// Value a store cell starts with.
    pub default: AttributeValue,
}

impl Descriptor {
    /// Start building a descriptor.
    pub fn builder(
        id: AttributeId,
        name: impl Into<String>,
        kind: ValueKind,
        class: CapabilityClass,
    ) -> DescriptorBuilder {
        DescriptorBuilder::new(id, name, kind, class)
    }
}

/// Fluent builder for [`Descriptor`]; `build` checks internal consistency.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    id: AttributeId,
    name: String,
    kind: ValueKind,
    class: CapabilityClass,
    validity: Validity,
    pattern_source: Option<String>,
    read_only: bool,
    coercible: bool,
    sync: SyncMode,
    default: Option<AttributeValue>,
}

impl DescriptorBuilder {
    /// Create a builder with `Validity::Any` and `SyncMode::Cached`.
    pub fn new(
        id: AttributeId,
        name: impl Into<String>,
        kind: ValueKind,
        class: CapabilityClass,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            class,
            validity: Validity::Any,
            pattern_source: None,
            read_only: false,
            coercible: false,
            sync: SyncMode::Cached,
            default: None,
        }
    }

    /// Inclusive integer range.
    pub fn integer_range(mut self, min: i64, max: i64) -> Self {
        self.validity = Validity::IntegerRange { min, max };
        self
    }

    /// Inclusive real range.
    pub fn real_range(mut self, min: f64, max: f64) -> Self {
        self.validity = Validity::RealRange { min, max };
        self
    }

    /// Closed set of admissible values.
    pub fn choices<V: Into<AttributeValue>>(mut self, choices: impl IntoIterator<Item = V>) -> Self {
        self.validity = Validity::Enumerated(choices.into_iter().map(Into::into).collect());
        self
    }

    /// Full-match pattern for text values (compiled in `build`).
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern_source = Some(pattern.into());
        self
    }

    /// Explicit validity predicate.
    pub fn validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    /// Value store cells start with.
    pub fn default_value(mut self, value: impl Into<AttributeValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Mark read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Allow out-of-range values to be clamped.
    pub fn coercible(mut self) -> Self {
        self.coercible = true;
        self
    }

    /// Cache behaviour.
    pub fn sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }

    /// Validate and freeze the descriptor.
    ///
    /// Fails when the predicate does not fit the kind, a range is inverted,
    /// or the default has the wrong kind or violates the predicate. Without
    /// an explicit default, the first enumerated member or the kind's zero
    /// (clamped into range) is used.
    pub fn build(self) -> Result<Descriptor, CatalogError> {
        let id = self.id;
        let invalid = |reason: String| CatalogError::InvalidDescriptor { id, reason };

        let validity = match self.pattern_source {
            Some(source) => Validity::pattern(&source)
                .map_err(|e| invalid(format!("bad pattern '{}': {}", source, e)))?,
            None => self.validity,
        };

        match (&validity, self.kind) {
            (Validity::Any, _) => {}
            (Validity::IntegerRange { min, max }, ValueKind::Integer) => {
                if min > max {
                    return Err(invalid(format!("inverted range [{}, {}]", min, max)));
                }
            }
            (Validity::RealRange { min, max }, ValueKind::Real) => {
                if min.is_nan() || max.is_nan() || min > max {
                    return Err(invalid(format!("inverted range [{}, {}]", min, max)));
                }
            }
            (Validity::Enumerated(members), kind) => {
                if members.is_empty() {
                    return Err(invalid("empty choice list".to_string()));
                }
                if let Some(bad) = members.iter().find(|m| m.kind() != kind) {
                    return Err(invalid(format!("choice {} is not {}", bad, kind)));
                }
            }
            (Validity::Pattern(_), ValueKind::Text) => {}
            (other, kind) => {
                return Err(invalid(format!("{:?} cannot constrain {} values", other, kind)));
            }
        }

        let default = match self.default {
            Some(value) => value,
            None => implied_default(&validity, self.kind),
        };
        if default.kind() != self.kind {
            return Err(invalid(format!(
                "default {} is {}, expected {}",
                default,
                default.kind(),
                self.kind
            )));
        }
        if !validity.admits(&default) {
            return Err(invalid(format!("default {} violates its own validity", default)));
        }

        Ok(Descriptor {
            id,
            name: self.name,
            kind: self.kind,
            class: self.class,
            validity,
            read_only: self.read_only,
            coercible: self.coercible,
            sync: self.sync,
            default,
        })
    }
}

fn implied_default(validity: &Validity, kind: ValueKind) -> AttributeValue {
    match validity {
        Validity::Enumerated(members) => members
            .first()
            .cloned()
            .unwrap_or_else(|| AttributeValue::zero(kind)),
        Validity::IntegerRange { min, max } => AttributeValue::Integer(0_i64.clamp(*min, *max)),
        Validity::RealRange { min, max } if *min <= *max => {
            AttributeValue::Real(0.0_f64.clamp(*min, *max))
        }
        _ => AttributeValue::zero(kind),
    }
}

/// Immutable map from attribute id to descriptor.
#[derive(Debug, Default)]
pub struct DescriptorTable {
    descriptors: HashMap<AttributeId, Arc<Descriptor>>,
}

impl DescriptorTable {
    /// Freeze a set of descriptors. Duplicate ids are rejected.
    pub fn new(descriptors: impl IntoIterator<Item = Descriptor>) -> Result<Self, CatalogError> {
        let mut map = HashMap::new();
        for descriptor in descriptors {
            let id = descriptor.id;
            if map.insert(id, Arc::new(descriptor)).is_some() {
                return Err(CatalogError::DuplicateAttribute(id));
            }
        }
        Ok(Self { descriptors: map })
    }

    /// Look up the descriptor of `id`.
    pub fn lookup(&self, id: AttributeId) -> AttributeResult<&Arc<Descriptor>> {
        self.descriptors
            .get(&id)
            .ok_or(AttributeError::UnknownAttribute(id))
    }

    /// Number of attributes in the table.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptors scoped to `class`, ordered by id.
    pub fn in_class(&self, class: CapabilityClass) -> Vec<&Arc<Descriptor>> {
        let mut scoped: Vec<_> = self
            .descriptors
            .values()
            .filter(|d| d.class == class)
            .collect();
        scoped.sort_by_key(|d| d.id);
        scoped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ref_level() -> DescriptorBuilder {
        Descriptor::builder(
            AttributeId(1150001),
            "REF_LEVEL",
            ValueKind::Real,
            CapabilityClass::Window,
        )
        .real_range(-130.0, 30.0)
    }

    #[test]
    fn test_builder_defaults() {
        let d = ref_level().build().unwrap();
        assert_eq!(d.default, AttributeValue::Real(0.0));
        assert_eq!(d.sync, SyncMode::Cached);
        assert!(!d.read_only);
        assert!(!d.coercible);
    }

    #[test]
    fn test_implied_default_clamped_into_range() {
        let d = Descriptor::builder(
            AttributeId(7),
            "FREQ_CENTER",
            ValueKind::Real,
            CapabilityClass::Global,
        )
        .real_range(9.0e3, 7.0e9)
        .build()
        .unwrap();
        assert_eq!(d.default, AttributeValue::Real(9.0e3));
    }

    #[test]
    fn test_default_must_satisfy_validity() {
        let err = ref_level().default_value(45.0).build().unwrap_err();
        assert!(err.to_string().contains("violates"));
    }

    #[test]
    fn test_default_must_match_kind() {
        let err = ref_level().default_value(true).build().unwrap_err();
        assert!(err.to_string().contains("expected real"));
    }

    #[test]
    fn test_range_on_text_is_rejected() {
        let err = Descriptor::builder(AttributeId(9), "TITLE", ValueKind::Text, CapabilityClass::Window)
            .real_range(0.0, 1.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_pattern_is_full_match() {
        let d = Descriptor::builder(AttributeId(9), "TITLE", ValueKind::Text, CapabilityClass::Window)
            .pattern("[A-Z]+")
            .default_value("SPAN")
            .build()
            .unwrap();
        assert!(d.validity.admits(&AttributeValue::from("ABC")));
        assert!(!d.validity.admits(&AttributeValue::from("ABC1")));
    }

    #[test]
    fn test_violation_matches_predicate() {
        assert_eq!(
            Validity::Enumerated(vec![AttributeValue::Integer(1)]).violation(),
            Rejection::InvalidEnumValue
        );
        assert_eq!(
            ref_level().build().unwrap().validity.violation(),
            Rejection::OutOfRange
        );
    }

    #[test]
    fn test_enumerated_default_is_first_member() {
        let d = Descriptor::builder(
            AttributeId(11),
            "DETECTOR",
            ValueKind::Integer,
            CapabilityClass::Trace,
        )
        .choices([3i64, 1, 2])
        .build()
        .unwrap();
        assert_eq!(d.default, AttributeValue::Integer(3));
    }

    #[test]
    fn test_table_rejects_duplicates_and_unknown_ids() {
        let err = DescriptorTable::new(vec![ref_level().build().unwrap(), ref_level().build().unwrap()])
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateAttribute(AttributeId(1150001))));

        let table = DescriptorTable::new(vec![ref_level().build().unwrap()]).unwrap();
        assert_eq!(table.len(), 1);
        assert!(matches!(
            table.lookup(AttributeId(42)),
            Err(AttributeError::UnknownAttribute(AttributeId(42)))
        ));
        assert_eq!(table.in_class(CapabilityClass::Window).len(), 1);
        assert!(table.in_class(CapabilityClass::Marker).is_empty());
    }
}
