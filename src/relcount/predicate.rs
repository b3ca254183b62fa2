//! Per-property value constraints.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Token a wildcard predicate is rendered as in serialized descriptors.
/// A concrete value spelled the same way is escaped there.
pub const ANY_TOKEN: &str = "*";

/// Constraint on a single property of a relationship.
///
/// Ordering and hashing are structural; the semantic "covers" relation lives
/// in [`Predicate::covers`] and at the descriptor level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Predicate {
    /// The property has exactly this value.
    Concrete(String),
    /// The property has any value, or none at all.
    Any,
    /// The property is absent.
    Undefined,
}

/// How a descriptor treats keys it does not mention.
///
/// Cached descriptors always describe concrete relationship shapes, so a
/// missing key there means "this relationship has no such property". A query
/// may instead mean "I don't care about this property".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TreatMissingAs {
    Undefined,
    Any,
}

impl TreatMissingAs {
    pub fn predicate(self) -> Predicate {
        match self {
            TreatMissingAs::Undefined => Predicate::Undefined,
            TreatMissingAs::Any => Predicate::Any,
        }
    }
}

impl Predicate {
    pub fn equal_to(value: impl Into<String>) -> Self {
        Predicate::Concrete(value.into())
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Predicate::Any)
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, Predicate::Concrete(_))
    }

    /// True if every relationship satisfying `other` also satisfies `self`.
    pub fn covers(&self, other: &Predicate) -> bool {
        self.is_any() || self == other
    }

    /// True if some relationship could satisfy both predicates.
    pub fn compatible(&self, other: &Predicate) -> bool {
        self.is_any() || other.is_any() || self == other
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Concrete(v) => f.write_str(v),
            Predicate::Any => f.write_str(ANY_TOKEN),
            Predicate::Undefined => f.write_str("<undefined>"),
        }
    }
}

impl From<&str> for Predicate {
    fn from(v: &str) -> Self {
        Predicate::Concrete(v.to_string())
    }
}

impl From<String> for Predicate {
    fn from(v: String) -> Self {
        Predicate::Concrete(v)
    }
}
