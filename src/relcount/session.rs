//! Per-operation arena of caching nodes.

use hashbrown::hash_map::{Entry, HashMap};

use crate::model::NodeId;
use crate::storage::StorageBackend;
use crate::Result;

use super::caching_node::CachingNode;
use super::config::{CompactionMode, RelcountConfig};
use super::descriptor::{DescriptorFormat, RelationshipDescriptor};

/// The caching nodes touched by one transaction (or one initialization
/// batch), each loaded on first use and flushed exactly once by
/// [`CachingSession::finish`].
pub struct CachingSession<'c> {
    config: &'c RelcountConfig,
    format: &'c DescriptorFormat,
    nodes: HashMap<NodeId, CachingNode>,
}

impl<'c> CachingSession<'c> {
    pub fn new(config: &'c RelcountConfig, format: &'c DescriptorFormat) -> Self {
        Self {
            config,
            format,
            nodes: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub async fn node<B: StorageBackend>(&mut self, backend: &B, tx: &B::Tx, id: NodeId) -> Result<&mut CachingNode> {
        Ok(match self.nodes.entry(id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let node = CachingNode::load(backend, tx, id, self.config.caching(), self.format).await?;
                e.insert(node)
            }
        })
    }

    pub async fn increment<B: StorageBackend>(
        &mut self,
        backend: &B,
        tx: &B::Tx,
        id: NodeId,
        descriptor: RelationshipDescriptor,
        delta: i64,
    ) -> Result<()> {
        self.node(backend, tx, id).await?.increment(descriptor, delta)?;
        Ok(())
    }

    pub async fn decrement<B: StorageBackend>(
        &mut self,
        backend: &B,
        tx: &B::Tx,
        id: NodeId,
        descriptor: &RelationshipDescriptor,
        delta: i64,
    ) -> Result<()> {
        self.node(backend, tx, id).await?.decrement(descriptor, delta)
    }

    /// Compact the nodes that gained a descriptor, then flush every node.
    ///
    /// In [`CompactionMode::Deferred`] nothing is compacted here; the nodes
    /// that would have been are returned instead, in id order.
    pub async fn finish<B: StorageBackend>(
        self,
        backend: &B,
        tx: &mut B::Tx,
        mode: CompactionMode,
    ) -> Result<Vec<NodeId>> {
        let mut nodes: Vec<CachingNode> = self.nodes.into_values().collect();
        nodes.sort_by_key(CachingNode::id);

        let mut deferred = Vec::new();
        for node in &mut nodes {
            if node.created_new() {
                match mode {
                    CompactionMode::Inline => {
                        self.config.compaction().compact(node);
                    }
                    CompactionMode::Deferred => deferred.push(node.id()),
                }
            }
            node.flush(backend, tx, self.config.caching(), self.format).await?;
        }
        Ok(deferred)
    }
}
