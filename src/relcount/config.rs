//! Module configuration and the policies that turn a relationship into a
//! descriptor.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::model::{Direction, NodeId, Relationship};

use super::cache::{DegreeCachingStrategy, SingleNodePropertyCaching};
use super::compact::{CompactionStrategy, ThresholdBasedCompaction};
use super::descriptor::RelationshipDescriptor;

/// Default number of nodes rebuilt per transaction by `initialize`.
pub const DEFAULT_INITIALIZE_BATCH_SIZE: usize = 100;

// ============================================================================
// Policies
// ============================================================================

/// Weight a relationship adds to the degree of `pov`.
pub trait WeighingStrategy: Send + Sync + fmt::Debug {
    fn weight(&self, rel: &Relationship, pov: NodeId) -> i64;
}

/// Every relationship counts once.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneForEach;

impl WeighingStrategy for OneForEach {
    fn weight(&self, _rel: &Relationship, _pov: NodeId) -> i64 {
        1
    }
}

/// Which relationships are counted at all.
pub trait RelationshipInclusionPolicy: Send + Sync + fmt::Debug {
    fn include(&self, rel: &Relationship) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeAllRelationships;

impl RelationshipInclusionPolicy for IncludeAllRelationships {
    fn include(&self, _rel: &Relationship) -> bool {
        true
    }
}

/// Which relationship properties become part of the descriptor.
pub trait PropertyInclusionPolicy: Send + Sync + fmt::Debug {
    fn include(&self, key: &str, rel: &Relationship) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeAllProperties;

impl PropertyInclusionPolicy for IncludeAllProperties {
    fn include(&self, _key: &str, _rel: &Relationship) -> bool {
        true
    }
}

/// Count by type and direction only.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeNoProperties;

impl PropertyInclusionPolicy for IncludeNoProperties {
    fn include(&self, _key: &str, _rel: &Relationship) -> bool {
        false
    }
}

/// Every property except the listed keys.
#[derive(Debug, Clone, Default)]
pub struct ExcludeProperties {
    keys: BTreeSet<String>,
}

impl ExcludeProperties {
    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { keys: keys.into_iter().map(Into::into).collect() }
    }
}

impl PropertyInclusionPolicy for ExcludeProperties {
    fn include(&self, key: &str, _rel: &Relationship) -> bool {
        !self.keys.contains(key)
    }
}

/// Last chance to rewrite the string properties of a relationship, seen
/// from `pov`, before they become predicates.
pub trait PropertyExtractionStrategy: Send + Sync + fmt::Debug {
    fn extract(
        &self,
        properties: BTreeMap<String, String>,
        rel: &Relationship,
        pov: NodeId,
    ) -> BTreeMap<String, String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractAsIs;

impl PropertyExtractionStrategy for ExtractAsIs {
    fn extract(
        &self,
        properties: BTreeMap<String, String>,
        _rel: &Relationship,
        _pov: NodeId,
    ) -> BTreeMap<String, String> {
        properties
    }
}

/// When compaction of a node that gained a descriptor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionMode {
    /// In the committing transaction, before the degrees are flushed.
    #[default]
    Inline,
    /// On a background worker, in a transaction of its own, after commit.
    ///
    /// The worker and committing transactions of the same module take turns
    /// on the cache. Call [`RelcountModule::shutdown`](crate::RelcountModule::shutdown)
    /// to wait for queued compactions before reading the raw cache.
    Deferred,
}

// ============================================================================
// RelcountConfig
// ============================================================================

/// Immutable module configuration, built with `with_*` methods.
#[derive(Debug, Clone)]
pub struct RelcountConfig {
    compaction: Arc<dyn CompactionStrategy>,
    caching: Arc<dyn DegreeCachingStrategy>,
    weighing: Arc<dyn WeighingStrategy>,
    relationship_inclusion: Arc<dyn RelationshipInclusionPolicy>,
    property_inclusion: Arc<dyn PropertyInclusionPolicy>,
    property_extraction: Arc<dyn PropertyExtractionStrategy>,
    compaction_mode: CompactionMode,
    initialize_batch_size: usize,
}

impl Default for RelcountConfig {
    fn default() -> Self {
        Self {
            compaction: Arc::new(ThresholdBasedCompaction::default()),
            caching: Arc::new(SingleNodePropertyCaching),
            weighing: Arc::new(OneForEach),
            relationship_inclusion: Arc::new(IncludeAllRelationships),
            property_inclusion: Arc::new(IncludeAllProperties),
            property_extraction: Arc::new(ExtractAsIs),
            compaction_mode: CompactionMode::Inline,
            initialize_batch_size: DEFAULT_INITIALIZE_BATCH_SIZE,
        }
    }
}

impl RelcountConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Threshold-based compaction with the default generalization.
    pub fn with_threshold(self, threshold: usize) -> Self {
        self.with_compaction(Arc::new(ThresholdBasedCompaction::new(threshold)))
    }

    pub fn with_compaction(mut self, compaction: Arc<dyn CompactionStrategy>) -> Self {
        self.compaction = compaction;
        self
    }

    pub fn with_caching(mut self, caching: Arc<dyn DegreeCachingStrategy>) -> Self {
        self.caching = caching;
        self
    }

    pub fn with_weighing(mut self, weighing: Arc<dyn WeighingStrategy>) -> Self {
        self.weighing = weighing;
        self
    }

    pub fn with_relationship_inclusion(mut self, policy: Arc<dyn RelationshipInclusionPolicy>) -> Self {
        self.relationship_inclusion = policy;
        self
    }

    pub fn with_property_inclusion(mut self, policy: Arc<dyn PropertyInclusionPolicy>) -> Self {
        self.property_inclusion = policy;
        self
    }

    pub fn with_property_extraction(mut self, strategy: Arc<dyn PropertyExtractionStrategy>) -> Self {
        self.property_extraction = strategy;
        self
    }

    pub fn with_compaction_mode(mut self, mode: CompactionMode) -> Self {
        self.compaction_mode = mode;
        self
    }

    /// Nodes per transaction during (re)initialization. Zero is treated as one.
    pub fn with_initialize_batch_size(mut self, size: usize) -> Self {
        self.initialize_batch_size = size.max(1);
        self
    }

    pub fn compaction(&self) -> &dyn CompactionStrategy {
        self.compaction.as_ref()
    }

    pub fn caching(&self) -> &dyn DegreeCachingStrategy {
        self.caching.as_ref()
    }

    pub fn caching_handle(&self) -> Arc<dyn DegreeCachingStrategy> {
        Arc::clone(&self.caching)
    }

    pub fn compaction_mode(&self) -> CompactionMode {
        self.compaction_mode
    }

    pub fn initialize_batch_size(&self) -> usize {
        self.initialize_batch_size
    }

    pub fn includes(&self, rel: &Relationship) -> bool {
        self.relationship_inclusion.include(rel)
    }

    pub fn weight(&self, rel: &Relationship, pov: NodeId) -> i64 {
        self.weighing.weight(rel, pov)
    }

    /// The descriptor `rel` is counted under for `pov`, seen in `direction`.
    pub fn describe(&self, rel: &Relationship, pov: NodeId, direction: Direction) -> RelationshipDescriptor {
        let properties: BTreeMap<String, String> = rel
            .properties
            .iter()
            .filter(|(key, _)| self.property_inclusion.include(key, rel))
            .map(|(key, value)| (key.clone(), value.to_property_string()))
            .collect();
        let properties = self.property_extraction.extract(properties, rel, pov);
        RelationshipDescriptor::with_properties(rel.rel_type.as_str(), direction, properties)
    }
}
