//! In-memory storage backend.
//!
//! This is the reference implementation of `StorageBackend`.
//! It uses simple HashMaps protected by RwLock.
//!
//! ## Limitations
//!
//! - **No real transactions**: `commit_tx()` and `rollback_tx()` are no-ops.
//!   Writes are applied immediately. Rollback does NOT undo mutations.
//!   Transactions only *record* relationship changes for event handlers.
//! - **Single-writer only**: Per-collection locks mean multi-step mutations
//!   are NOT atomic, except `write_node_properties`, which applies a whole
//!   batch under one node lock.
//!
//! Use this backend for:
//! - Testing the degree cache end to end
//! - Embedding in applications that don't need persistence

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use async_trait::async_trait;

use crate::model::*;
use crate::tx::{Transaction, TransactionData, TxMode, TxId};
use crate::{Error, Result};
use super::StorageBackend;

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory property graph storage.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    nodes: RwLock<HashMap<NodeId, Node>>,
    relationships: RwLock<HashMap<RelId, Relationship>>,
    /// node_id → list of relationship IDs
    adjacency: RwLock<HashMap<NodeId, Vec<RelId>>>,
    next_node_id: AtomicU64,
    next_rel_id: AtomicU64,
    next_tx_id: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                nodes: RwLock::new(HashMap::new()),
                relationships: RwLock::new(HashMap::new()),
                adjacency: RwLock::new(HashMap::new()),
                next_node_id: AtomicU64::new(0),
                next_rel_id: AtomicU64::new(0),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// In-memory transaction: an id, a mode and the recorded relationship changes.
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    data: TransactionData,
}

impl MemoryTx {
    fn check_writable(&self) -> Result<()> {
        match self.mode {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(Error::TxError(format!("transaction {} is read-only", self.id.0))),
        }
    }
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
    fn data(&self) -> &TransactionData { &self.data }
    fn data_mut(&mut self) -> &mut TransactionData { &mut self.data }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

#[async_trait]
impl StorageBackend for MemoryBackend {
    type Tx = MemoryTx;

    async fn shutdown(&self) -> Result<()> { Ok(()) }

    async fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed));
        Ok(MemoryTx { id, mode, data: TransactionData::default() })
    }

    /// No-op: memory backend applies writes immediately, not on commit.
    async fn commit_tx(&self, _tx: MemoryTx) -> Result<()> { Ok(()) }

    /// WARNING: No-op. Memory backend has no write-ahead log.
    /// Mutations applied during this transaction are NOT reverted.
    async fn rollback_tx(&self, _tx: MemoryTx) -> Result<()> { Ok(()) }

    // ========================================================================
    // Node CRUD
    // ========================================================================

    async fn create_node(
        &self,
        tx: &mut MemoryTx,
        labels: &[&str],
        props: PropertyMap,
    ) -> Result<NodeId> {
        tx.check_writable()?;
        let id = NodeId(self.inner.next_node_id.fetch_add(1, Ordering::Relaxed));
        let node = Node {
            id,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            properties: props,
        };

        self.inner.nodes.write().insert(id, node);
        self.inner.adjacency.write().insert(id, Vec::new());

        Ok(id)
    }

    async fn get_node(&self, _tx: &MemoryTx, id: NodeId) -> Result<Option<Node>> {
        Ok(self.inner.nodes.read().get(&id).cloned())
    }

    async fn delete_node(&self, tx: &mut MemoryTx, id: NodeId) -> Result<bool> {
        tx.check_writable()?;
        // Check for existing relationships (Neo4j semantics: can't delete connected node)
        {
            let adj = self.inner.adjacency.read();
            if let Some(rels) = adj.get(&id) {
                if !rels.is_empty() {
                    return Err(Error::ConstraintViolation(
                        format!("Cannot delete node {id} with {} relationships. Delete relationships first.", rels.len())
                    ));
                }
            }
        }

        let removed = self.inner.nodes.write().remove(&id);
        self.inner.adjacency.write().remove(&id);

        if removed.is_some() {
            tx.data.record_node_deleted(id);
        }
        Ok(removed.is_some())
    }

    async fn set_node_property(
        &self,
        tx: &mut MemoryTx,
        id: NodeId,
        key: &str,
        val: Value,
    ) -> Result<()> {
        tx.check_writable()?;
        let mut nodes = self.inner.nodes.write();
        let node = nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        node.properties.insert(key.to_string(), val);
        Ok(())
    }

    async fn remove_node_property(
        &self,
        tx: &mut MemoryTx,
        id: NodeId,
        key: &str,
    ) -> Result<()> {
        tx.check_writable()?;
        let mut nodes = self.inner.nodes.write();
        let node = nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        node.properties.remove(key);
        Ok(())
    }

    async fn write_node_properties(
        &self,
        tx: &mut MemoryTx,
        id: NodeId,
        writes: Vec<(String, Value)>,
        removals: Vec<String>,
    ) -> Result<()> {
        tx.check_writable()?;
        let mut nodes = self.inner.nodes.write();
        let node = nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        for key in removals {
            node.properties.remove(&key);
        }
        node.properties.extend(writes);
        Ok(())
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    async fn create_relationship(
        &self,
        tx: &mut MemoryTx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId> {
        tx.check_writable()?;
        // Verify both nodes exist
        {
            let nodes = self.inner.nodes.read();
            if !nodes.contains_key(&src) {
                return Err(Error::NotFound(format!("Source node {src}")));
            }
            if !nodes.contains_key(&dst) {
                return Err(Error::NotFound(format!("Target node {dst}")));
            }
        }

        let id = RelId(self.inner.next_rel_id.fetch_add(1, Ordering::Relaxed));
        let rel = Relationship {
            id,
            src,
            dst,
            rel_type: rel_type.to_string(),
            properties: props,
        };

        self.inner.relationships.write().insert(id, rel.clone());

        // Update adjacency for both endpoints
        {
            let mut adj = self.inner.adjacency.write();
            adj.entry(src).or_default().push(id);
            if src != dst {
                adj.entry(dst).or_default().push(id);
            }
        }

        tx.data.record_created(rel);
        Ok(id)
    }

    async fn get_relationship(&self, _tx: &MemoryTx, id: RelId) -> Result<Option<Relationship>> {
        Ok(self.inner.relationships.read().get(&id).cloned())
    }

    async fn set_relationship_property(
        &self,
        tx: &mut MemoryTx,
        id: RelId,
        key: &str,
        val: Value,
    ) -> Result<()> {
        tx.check_writable()?;
        let (previous, current) = {
            let mut rels = self.inner.relationships.write();
            let rel = rels.get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
            let previous = rel.clone();
            rel.properties.insert(key.to_string(), val);
            (previous, rel.clone())
        };
        tx.data.record_changed(previous, current);
        Ok(())
    }

    async fn remove_relationship_property(
        &self,
        tx: &mut MemoryTx,
        id: RelId,
        key: &str,
    ) -> Result<()> {
        tx.check_writable()?;
        let (previous, current) = {
            let mut rels = self.inner.relationships.write();
            let rel = rels.get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
            let previous = rel.clone();
            rel.properties.remove(key);
            (previous, rel.clone())
        };
        tx.data.record_changed(previous, current);
        Ok(())
    }

    async fn delete_relationship(&self, tx: &mut MemoryTx, id: RelId) -> Result<bool> {
        tx.check_writable()?;
        let removed = self.inner.relationships.write().remove(&id);
        if let Some(rel) = &removed {
            {
                let mut adj = self.inner.adjacency.write();
                if let Some(rels) = adj.get_mut(&rel.src) {
                    rels.retain(|rid| *rid != id);
                }
                if rel.src != rel.dst {
                    if let Some(rels) = adj.get_mut(&rel.dst) {
                        rels.retain(|rid| *rid != id);
                    }
                }
            }
            tx.data.record_deleted(rel.clone());
        }
        Ok(removed.is_some())
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    async fn get_relationships(
        &self,
        _tx: &MemoryTx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>> {
        let adj = self.inner.adjacency.read();
        let rels = self.inner.relationships.read();

        let rel_ids = adj.get(&node).cloned().unwrap_or_default();
        let mut result = Vec::new();

        for rid in rel_ids {
            if let Some(rel) = rels.get(&rid) {
                // Direction filter
                let matches_dir = match dir {
                    Direction::Outgoing => rel.src == node,
                    Direction::Incoming => rel.dst == node,
                    Direction::Both => true,
                };
                // Type filter
                let matches_type = rel_type.is_none_or(|t| rel.rel_type == t);

                if matches_dir && matches_type {
                    result.push(rel.clone());
                }
            }
        }

        Ok(result)
    }

    // ========================================================================
    // Scan
    // ========================================================================

    async fn all_nodes(&self, _tx: &MemoryTx) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self.inner.nodes.read().values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    async fn node_count(&self, _tx: &MemoryTx) -> Result<u64> {
        Ok(self.inner.nodes.read().len() as u64)
    }

    async fn relationship_count(&self, _tx: &MemoryTx) -> Result<u64> {
        Ok(self.inner.relationships.read().len() as u64)
    }
}

// ============================================================================
// Tests
// ============================================================================
