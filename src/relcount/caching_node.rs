//! Transaction-scoped degree buffer for one node.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::model::{Direction, NodeId};
use crate::storage::StorageBackend;
use crate::{Error, Result};

use super::cache::{DegreeCachingStrategy, PropertyBuffer};
use super::degree_cache::{DegreeCache, DegreeMap};
use super::descriptor::{DescriptorFormat, RelationshipDescriptor};

/// One node's cached degrees, loaded once per transaction, mutated in memory
/// and flushed once.
///
/// Deltas are routed to the most specific cached descriptor covering them.
/// Only descriptors touched since the last flush are written back.
#[derive(Debug)]
pub struct CachingNode {
    id: NodeId,
    cache: DegreeCache,
    props: PropertyBuffer,
    updated: BTreeSet<RelationshipDescriptor>,
    removed: BTreeSet<RelationshipDescriptor>,
    created_new: bool,
}

impl CachingNode {
    pub async fn load<B: StorageBackend>(
        backend: &B,
        tx: &B::Tx,
        id: NodeId,
        strategy: &dyn DegreeCachingStrategy,
        format: &DescriptorFormat,
    ) -> Result<Self> {
        let props = PropertyBuffer::load(backend, tx, id).await?;
        Self::from_buffer(props, strategy, format)
    }

    pub fn from_buffer(
        props: PropertyBuffer,
        strategy: &dyn DegreeCachingStrategy,
        format: &DescriptorFormat,
    ) -> Result<Self> {
        let cache = DegreeCache::from_map(strategy.read_degrees(&props, format)?);
        Ok(Self {
            id: props.node(),
            cache,
            props,
            updated: BTreeSet::new(),
            removed: BTreeSet::new(),
            created_new: false,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn cache(&self) -> &DegreeCache {
        &self.cache
    }

    pub fn degrees(&self) -> &DegreeMap {
        self.cache.as_map()
    }

    /// True once an increment had to cache a descriptor nothing covered.
    pub fn created_new(&self) -> bool {
        self.created_new
    }

    pub fn is_dirty(&self) -> bool {
        !self.updated.is_empty() || !self.removed.is_empty() || self.props.is_dirty()
    }

    /// Adds `delta` to the cached descriptor covering `descriptor`, or caches
    /// `descriptor` itself. Returns true in the latter case.
    pub fn increment(&mut self, descriptor: RelationshipDescriptor, delta: i64) -> Result<bool> {
        if descriptor.direction() == Direction::Both {
            return Err(Error::InvalidDescriptor(format!(
                "cannot cache a degree without a direction: {descriptor}"
            )));
        }
        match self.cache.find_covering(&descriptor).cloned() {
            Some(covering) => {
                self.cache.increment(covering.clone(), delta);
                self.mark_updated(covering);
                Ok(false)
            }
            None => {
                self.cache.increment(descriptor.clone(), delta);
                self.mark_updated(descriptor);
                self.created_new = true;
                Ok(true)
            }
        }
    }

    /// Subtracts `delta` from the cached descriptor covering `descriptor`.
    ///
    /// Fails with [`Error::NeedsInitialization`] if nothing covers it or the
    /// degree would drop below zero. The exhausted entry is deleted either
    /// way, so no negative degree is ever stored.
    pub fn decrement(&mut self, descriptor: &RelationshipDescriptor, delta: i64) -> Result<()> {
        let Some(covering) = self.cache.find_covering(descriptor).cloned() else {
            warn!(node = %self.id, %descriptor, "no cached degree to decrement, cache out of sync");
            return Err(self.out_of_sync(descriptor));
        };

        let remaining = self.cache.decrement(&covering, delta);
        if remaining > 0 {
            self.mark_updated(covering);
            return Ok(());
        }
        self.mark_removed(covering);
        if remaining < 0 {
            warn!(node = %self.id, %descriptor, remaining, "cached degree dropped below zero, cache out of sync");
            return Err(self.out_of_sync(descriptor));
        }
        Ok(())
    }

    /// Replaces the `covered` entries by a single `generalization` entry
    /// holding their summed degree. Returns the degree of the merged entry.
    pub fn merge(&mut self, generalization: RelationshipDescriptor, covered: &[RelationshipDescriptor]) -> i64 {
        let mut sum = 0;
        for descriptor in covered {
            if let Some(degree) = self.cache.delete(descriptor) {
                sum += degree;
                self.mark_removed(descriptor.clone());
            }
        }
        debug!(node = %self.id, %generalization, merged = covered.len(), degree = sum, "merging cached degrees");
        let degree = self.cache.increment(generalization.clone(), sum);
        self.mark_updated(generalization);
        degree
    }

    /// Hand the touched descriptors to `strategy` for encoding into the
    /// property buffer, without writing anything to the backend.
    pub fn stage(&mut self, strategy: &dyn DegreeCachingStrategy, format: &DescriptorFormat) -> Result<()> {
        if self.updated.is_empty() && self.removed.is_empty() {
            return Ok(());
        }
        strategy.write_degrees(&mut self.props, format, self.cache.as_map(), &self.updated, &self.removed)?;
        self.updated.clear();
        self.removed.clear();
        Ok(())
    }

    /// Persist every change since the last flush in one batched write.
    /// Flushing a clean node writes nothing.
    pub async fn flush<B: StorageBackend>(
        &mut self,
        backend: &B,
        tx: &mut B::Tx,
        strategy: &dyn DegreeCachingStrategy,
        format: &DescriptorFormat,
    ) -> Result<()> {
        self.stage(strategy, format)?;
        self.props.commit(backend, tx).await?;
        self.created_new = false;
        Ok(())
    }

    fn mark_updated(&mut self, descriptor: RelationshipDescriptor) {
        self.removed.remove(&descriptor);
        self.updated.insert(descriptor);
    }

    fn mark_removed(&mut self, descriptor: RelationshipDescriptor) {
        self.updated.remove(&descriptor);
        self.removed.insert(descriptor);
    }

    fn out_of_sync(&self, descriptor: &RelationshipDescriptor) -> Error {
        Error::NeedsInitialization {
            node: self.id,
            descriptor: descriptor.to_string(),
        }
    }
}
