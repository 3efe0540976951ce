//! Coercion and range policy.
//!
//! A pure decision over one candidate value and its descriptor:
//!
//! 1. read-only attributes reject every write;
//! 2. the candidate must have the descriptor's kind;
//! 3. the validity predicate is applied. Numeric ranges may clamp to the
//!    violated bound when the descriptor is coercible *and* range checking is
//!    enabled for the session. Enumerations and patterns never coerce.
//!
//! Clamping lands exactly on a bound, which is inside the range, so feeding a
//! coerced value back in is accepted unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::descriptor::{Descriptor, Validity};
use crate::value::{AttributeValue, ValueKind};

/// Why a candidate value was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    /// The attribute cannot be written.
    ReadOnlyAttribute,
    /// The candidate's kind differs from the attribute's kind.
    TypeMismatch {
        /// Kind the attribute requires.
        expected: ValueKind,
        /// Kind that was supplied.
        actual: ValueKind,
    },
    /// Numeric value outside the attribute's range and not coerced.
    OutOfRange,
    /// Value is not a member of the attribute's enumeration.
    InvalidEnumValue,
    /// Text does not match the attribute's pattern.
    InvalidFormat,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::ReadOnlyAttribute => f.write_str("attribute is read-only"),
            Rejection::TypeMismatch { expected, actual } => {
                write!(f, "expected a {} value, got {}", expected, actual)
            }
            Rejection::OutOfRange => f.write_str("value out of range"),
            Rejection::InvalidEnumValue => f.write_str("value is not a valid choice"),
            Rejection::InvalidFormat => f.write_str("value does not match the required format"),
        }
    }
}

/// Result of evaluating a candidate value.
#[derive(Debug, Clone, PartialEq)]
pub enum CoercionOutcome {
    /// Candidate is valid as given.
    Accepted(AttributeValue),
    /// Candidate was adjusted to the nearest valid value.
    Coerced {
        /// Value the caller supplied.
        original: AttributeValue,
        /// Value that will be stored.
        value: AttributeValue,
    },
    /// Candidate cannot be written.
    Rejected(Rejection),
}

impl CoercionOutcome {
    /// Value that would be stored, if any.
    pub fn value(&self) -> Option<&AttributeValue> {
        match self {
            CoercionOutcome::Accepted(value) | CoercionOutcome::Coerced { value, .. } => Some(value),
            CoercionOutcome::Rejected(_) => None,
        }
    }

    /// Whether the candidate was adjusted.
    pub fn is_coerced(&self) -> bool {
        matches!(self, CoercionOutcome::Coerced { .. })
    }
}

/// Session-scoped policy settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoercionPolicy {
    /// Range checking with coercion of coercible attributes.
    pub range_check: bool,
}

impl CoercionPolicy {
    /// Create a policy.
    pub fn new(range_check: bool) -> Self {
        Self { range_check }
    }

    /// Decide what happens to `candidate` when written to `descriptor`.
    pub fn evaluate(&self, descriptor: &Descriptor, candidate: AttributeValue) -> CoercionOutcome {
        if descriptor.read_only {
            return CoercionOutcome::Rejected(Rejection::ReadOnlyAttribute);
        }
        if candidate.kind() != descriptor.kind {
            return CoercionOutcome::Rejected(Rejection::TypeMismatch {
                expected: descriptor.kind,
                actual: candidate.kind(),
            });
        }

        let may_coerce = descriptor.coercible && self.range_check;
        match (&descriptor.validity, &candidate) {
            (Validity::Any, _) => CoercionOutcome::Accepted(candidate),

            (Validity::IntegerRange { min, max }, AttributeValue::Integer(v)) => {
                if (*min..=*max).contains(v) {
                    CoercionOutcome::Accepted(candidate)
                } else if may_coerce {
                    let clamped = (*v).clamp(*min, *max);
                    coerced(candidate, AttributeValue::Integer(clamped))
                } else {
                    CoercionOutcome::Rejected(Rejection::OutOfRange)
                }
            }

            (Validity::RealRange { min, max }, AttributeValue::Real(v)) => {
                if v.is_nan() {
                    CoercionOutcome::Rejected(Rejection::OutOfRange)
                } else if *v >= *min && *v <= *max {
                    CoercionOutcome::Accepted(candidate)
                } else if may_coerce {
                    // Snap to the violated bound itself, never past it.
                    let bound = if *v > *max { *max } else { *min };
                    coerced(candidate, AttributeValue::Real(bound))
                } else {
                    CoercionOutcome::Rejected(Rejection::OutOfRange)
                }
            }

            (Validity::Enumerated(members), _) => {
                if members.iter().any(|m| m == &candidate) {
                    CoercionOutcome::Accepted(candidate)
                } else {
                    CoercionOutcome::Rejected(Rejection::InvalidEnumValue)
                }
            }

            (Validity::Pattern(re), AttributeValue::Text(text)) => {
                if re.is_match(text) {
                    CoercionOutcome::Accepted(candidate)
                } else {
                    CoercionOutcome::Rejected(Rejection::InvalidFormat)
                }
            }

            // Descriptor construction guarantees the predicate fits the kind.
            _ => CoercionOutcome::Rejected(Rejection::TypeMismatch {
                expected: descriptor.kind,
                actual: candidate.kind(),
            }),
        }
    }
}

impl Default for CoercionPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

fn coerced(original: AttributeValue, value: AttributeValue) -> CoercionOutcome {
    if original.same_bits(&value) {
        CoercionOutcome::Accepted(value)
    } else {
        CoercionOutcome::Coerced { original, value }
    }
}
