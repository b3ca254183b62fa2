//! Transaction management.
//!
//! Backends record what a transaction did to relationships in a
//! [`TransactionData`]; registered [`TransactionEventHandler`]s see it
//! right before the transaction commits.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{NodeId, RelId, Relationship};
use crate::storage::StorageBackend;
use crate::Result;

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub u64);

/// Transaction trait that all backends must implement.
pub trait Transaction: Send + Sync {
    fn mode(&self) -> TxMode;
    fn id(&self) -> TxId;

    /// Relationship changes made so far in this transaction.
    fn data(&self) -> &TransactionData;
    fn data_mut(&mut self) -> &mut TransactionData;

    /// Detach the recorded changes, leaving an empty record behind.
    fn take_data(&mut self) -> TransactionData {
        std::mem::take(self.data_mut())
    }
}

// ============================================================================
// Transaction data
// ============================================================================

/// Before/after snapshot of a changed entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change<T> {
    pub previous: T,
    pub current: T,
}

/// Net relationship changes of one transaction.
///
/// Recording is normalising: a relationship created and deleted in the
/// same transaction disappears, and repeated property changes collapse
/// into one [`Change`] from the first-seen state to the latest one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionData {
    created: BTreeMap<RelId, Relationship>,
    deleted: BTreeMap<RelId, Relationship>,
    changed: BTreeMap<RelId, Change<Relationship>>,
    deleted_nodes: BTreeSet<NodeId>,
}

impl TransactionData {
    pub fn record_created(&mut self, rel: Relationship) {
        self.created.insert(rel.id, rel);
    }

    pub fn record_deleted(&mut self, rel: Relationship) {
        if self.created.remove(&rel.id).is_some() {
            return;
        }
        match self.changed.remove(&rel.id) {
            Some(change) => { self.deleted.insert(rel.id, change.previous); }
            None => { self.deleted.insert(rel.id, rel); }
        }
    }

    pub fn record_changed(&mut self, previous: Relationship, current: Relationship) {
        if let Some(created) = self.created.get_mut(&current.id) {
            *created = current;
            return;
        }
        match self.changed.get_mut(&current.id) {
            Some(change) => change.current = current,
            None => {
                self.changed.insert(current.id, Change { previous, current });
            }
        }
    }

    pub fn record_node_deleted(&mut self, id: NodeId) {
        self.deleted_nodes.insert(id);
    }

    pub fn created(&self) -> impl Iterator<Item = &Relationship> {
        self.created.values()
    }

    pub fn deleted(&self) -> impl Iterator<Item = &Relationship> {
        self.deleted.values()
    }

    /// Changes whose property set actually differs.
    pub fn changed(&self) -> impl Iterator<Item = &Change<Relationship>> {
        self.changed.values().filter(|c| c.previous != c.current)
    }

    pub fn has_node_been_deleted(&self, id: NodeId) -> bool {
        self.deleted_nodes.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty() && self.changed().next().is_none()
    }
}

// ============================================================================
// Event handlers
// ============================================================================

/// Hook into the commit path of a [`crate::Graph`].
///
/// `before_commit` runs inside the committing transaction and may write
/// through it; an error there rolls the transaction back.
#[async_trait]
pub trait TransactionEventHandler<B: StorageBackend>: Send + Sync {
    async fn before_commit(
        &self,
        backend: &B,
        tx: &mut B::Tx,
        data: &TransactionData,
    ) -> Result<()>;

    async fn after_commit(&self, _backend: &B, _tx: TxId) {}

    async fn after_rollback(&self, _backend: &B, _tx: TxId) {}
}
