//! Persistence of cached degrees on the node they belong to.
//!
//! Degrees live in node properties under the module's key prefix. A
//! [`DegreeCachingStrategy`] decides the encoding; a [`PropertyBuffer`]
//! collects the resulting writes so that they reach the backend in a single
//! batched call.

mod node_properties;
mod single_property;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::model::{NodeId, PropertyMap, Value};
use crate::storage::StorageBackend;
use crate::{Error, Result};

use super::degree_cache::DegreeMap;
use super::descriptor::{DescriptorFormat, RelationshipDescriptor};

pub use node_properties::NodePropertiesCaching;
pub use single_property::SingleNodePropertyCaching;

// ============================================================================
// PropertyBuffer
// ============================================================================

/// Buffered writer over the properties of one node.
///
/// Reads see pending writes first, then the snapshot taken at load time.
/// Nothing reaches the backend until [`PropertyBuffer::commit`].
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyBuffer {
    node: NodeId,
    base: PropertyMap,
    pending_writes: BTreeMap<String, Value>,
    pending_deletes: BTreeSet<String>,
}

impl PropertyBuffer {
    /// Snapshot the current properties of `node`.
    pub async fn load<B: StorageBackend>(backend: &B, tx: &B::Tx, node: NodeId) -> Result<Self> {
        let snapshot = backend
            .get_node(tx, node)
            .await?
            .ok_or_else(|| Error::NotFound(format!("node {node}")))?;
        Ok(Self::from_properties(node, snapshot.properties))
    }

    pub fn from_properties(node: NodeId, base: PropertyMap) -> Self {
        Self {
            node,
            base,
            pending_writes: BTreeMap::new(),
            pending_deletes: BTreeSet::new(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.pending_writes.get(key) {
            return Some(v);
        }
        if self.pending_deletes.contains(key) {
            return None;
        }
        self.base.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.pending_deletes.remove(&key);
        self.pending_writes.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.pending_writes.remove(key);
        if self.base.contains_key(key) {
            self.pending_deletes.insert(key.to_string());
        }
    }

    /// Visible property keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: BTreeSet<&String> = self
            .base
            .keys()
            .filter(|k| k.starts_with(prefix) && !self.pending_deletes.contains(*k))
            .collect();
        keys.extend(self.pending_writes.keys().filter(|k| k.starts_with(prefix)));
        keys.into_iter().cloned().collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending_writes.is_empty() || !self.pending_deletes.is_empty()
    }

    /// Write all pending changes through `tx` in one batch, then fold them
    /// into the snapshot. A clean buffer writes nothing.
    pub async fn commit<B: StorageBackend>(&mut self, backend: &B, tx: &mut B::Tx) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let writes: Vec<(String, Value)> = self
            .pending_writes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let removals: Vec<String> = self.pending_deletes.iter().cloned().collect();

        backend.write_node_properties(tx, self.node, writes, removals).await?;

        for key in std::mem::take(&mut self.pending_deletes) {
            self.base.remove(&key);
        }
        self.base.extend(std::mem::take(&mut self.pending_writes));
        Ok(())
    }
}

// ============================================================================
// DegreeCachingStrategy
// ============================================================================

/// Encoding of a node's cached degrees in its properties.
///
/// Implementations are interchangeable: what one writes, only it reads, but
/// [`super::CachingNode`] and [`super::CachedRelationshipCounter`] work with
/// any of them.
pub trait DegreeCachingStrategy: Send + Sync + fmt::Debug {
    fn read_degrees(&self, props: &PropertyBuffer, format: &DescriptorFormat) -> Result<DegreeMap>;

    /// Persist the outcome of one transaction: `degrees` is the full cache
    /// after it, `updated` and `removed` what changed.
    fn write_degrees(
        &self,
        props: &mut PropertyBuffer,
        format: &DescriptorFormat,
        degrees: &DegreeMap,
        updated: &BTreeSet<RelationshipDescriptor>,
        removed: &BTreeSet<RelationshipDescriptor>,
    ) -> Result<()>;

    /// Remove every cached degree from the node.
    fn clear(&self, props: &mut PropertyBuffer, format: &DescriptorFormat) {
        for key in props.keys_with_prefix(format.prefix()) {
            props.remove(&key);
        }
    }
}
