//! Per-node descriptor → degree map.

use std::collections::BTreeMap;

use super::descriptor::RelationshipDescriptor;
use super::predicate::TreatMissingAs;

/// Cached degrees of one node, most specific descriptors first.
pub type DegreeMap = BTreeMap<RelationshipDescriptor, i64>;

/// The cached degrees of one node.
///
/// Plain bookkeeping on exact descriptors; covering lookups and out-of-sync
/// detection belong to [`super::CachingNode`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DegreeCache {
    degrees: DegreeMap,
}

impl DegreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(degrees: DegreeMap) -> Self {
        Self { degrees }
    }

    pub fn get(&self, descriptor: &RelationshipDescriptor) -> Option<i64> {
        self.degrees.get(descriptor).copied()
    }

    pub fn contains(&self, descriptor: &RelationshipDescriptor) -> bool {
        self.degrees.contains_key(descriptor)
    }

    /// The most specific cached descriptor that is more general than, or
    /// equal to, `descriptor`.
    pub fn find_covering(&self, descriptor: &RelationshipDescriptor) -> Option<&RelationshipDescriptor> {
        self.degrees
            .keys()
            .find(|cached| cached.is_more_general_than(descriptor, TreatMissingAs::Undefined))
    }

    /// Adds `delta` to the entry for `descriptor`, creating it if needed.
    /// Returns the new degree.
    pub fn increment(&mut self, descriptor: RelationshipDescriptor, delta: i64) -> i64 {
        let degree = self.degrees.entry(descriptor).or_insert(0);
        *degree += delta;
        *degree
    }

    /// Subtracts `delta` from the entry for `descriptor`. An entry that
    /// reaches zero or below is removed. Returns the new degree, which is
    /// negative when more was subtracted than was cached.
    pub fn decrement(&mut self, descriptor: &RelationshipDescriptor, delta: i64) -> i64 {
        let remaining = self.get(descriptor).unwrap_or(0) - delta;
        if remaining <= 0 {
            self.degrees.remove(descriptor);
        } else {
            self.degrees.insert(descriptor.clone(), remaining);
        }
        remaining
    }

    pub fn delete(&mut self, descriptor: &RelationshipDescriptor) -> Option<i64> {
        self.degrees.remove(descriptor)
    }

    pub fn len(&self) -> usize {
        self.degrees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.degrees.is_empty()
    }

    /// Sum of all cached degrees.
    pub fn total(&self) -> i64 {
        self.degrees.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RelationshipDescriptor, &i64)> {
        self.degrees.iter()
    }

    pub fn as_map(&self) -> &DegreeMap {
        &self.degrees
    }

    pub fn into_map(self) -> DegreeMap {
        self.degrees
    }
}
