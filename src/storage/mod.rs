//! # Storage Backend Trait
//!
//! This is THE contract between the degree cache and the graph it counts.
//! The cache needs very little from a backend: node property reads and
//! writes (its persistence substrate), relationship enumeration (for full
//! rebuilds) and transactions that record relationship changes.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-memory for testing/embedding |

pub mod memory;

use async_trait::async_trait;
use crate::model::*;
use crate::tx::{Transaction, TxMode};
use crate::{Error, Result};

pub use memory::MemoryBackend;

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// The universal storage contract.
///
/// Mutating calls take the transaction mutably so that backends can record
/// relationship changes in [`Transaction::data_mut`].
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// The transaction type for this backend.
    type Tx: Transaction;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Shut down the backend, flushing any pending writes.
    async fn shutdown(&self) -> Result<()>;

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a new transaction.
    async fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Commit a transaction.
    async fn commit_tx(&self, tx: Self::Tx) -> Result<()>;

    /// Roll back a transaction.
    async fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Node CRUD
    // ========================================================================

    /// Create a node with the given labels and properties.
    async fn create_node(
        &self,
        tx: &mut Self::Tx,
        labels: &[&str],
        props: PropertyMap,
    ) -> Result<NodeId>;

    /// Get a node by ID. Returns None if not found.
    async fn get_node(&self, tx: &Self::Tx, id: NodeId) -> Result<Option<Node>>;

    /// Delete a node. Returns true if it existed.
    /// Fails if the node still has relationships (Neo4j semantics).
    async fn delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<bool>;

    /// Set a property on a node (upsert).
    async fn set_node_property(
        &self,
        tx: &mut Self::Tx,
        id: NodeId,
        key: &str,
        val: Value,
    ) -> Result<()>;

    /// Remove a property from a node.
    async fn remove_node_property(
        &self,
        tx: &mut Self::Tx,
        id: NodeId,
        key: &str,
    ) -> Result<()>;

    /// Apply a batch of property writes and removals to one node.
    ///
    /// Default falls back to sequential calls. Backends that can apply the
    /// batch under a single lock should override this so that a batch is
    /// never observed half-applied.
    async fn write_node_properties(
        &self,
        tx: &mut Self::Tx,
        id: NodeId,
        writes: Vec<(String, Value)>,
        removals: Vec<String>,
    ) -> Result<()> {
        for (key, val) in writes {
            self.set_node_property(tx, id, &key, val).await?;
        }
        for key in removals {
            self.remove_node_property(tx, id, &key).await?;
        }
        Ok(())
    }

    /// Delete a node and all its relationships in one operation.
    /// Neo4j: `DETACH DELETE n`
    ///
    /// Default: get all relationships, delete each, then delete the node.
    async fn detach_delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<bool> {
        let rels = self.get_relationships(tx, id, Direction::Both, None).await?;
        for rel in &rels {
            self.delete_relationship(tx, rel.id).await?;
        }
        self.delete_node(tx, id).await
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    /// Create a relationship between two nodes.
    async fn create_relationship(
        &self,
        tx: &mut Self::Tx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId>;

    /// Get a relationship by ID.
    async fn get_relationship(&self, tx: &Self::Tx, id: RelId) -> Result<Option<Relationship>>;

    /// Delete a relationship. Returns true if it existed.
    async fn delete_relationship(&self, tx: &mut Self::Tx, id: RelId) -> Result<bool>;

    /// Set a property on a relationship (upsert).
    ///
    /// Default returns an error; override for backends with relationship property CRUD.
    async fn set_relationship_property(
        &self,
        _tx: &mut Self::Tx,
        _id: RelId,
        _key: &str,
        _val: Value,
    ) -> Result<()> {
        Err(Error::StorageError("relationship property set not supported".into()))
    }

    /// Remove a property from a relationship.
    ///
    /// Default returns an error; override for backends with relationship property CRUD.
    async fn remove_relationship_property(
        &self,
        _tx: &mut Self::Tx,
        _id: RelId,
        _key: &str,
    ) -> Result<()> {
        Err(Error::StorageError("relationship property remove not supported".into()))
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Get all relationships of a node, optionally filtered by direction and type.
    ///
    /// A loop is returned once, whatever the direction filter.
    async fn get_relationships(
        &self,
        tx: &Self::Tx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>>;

    // ========================================================================
    // Scan
    // ========================================================================

    /// Return all nodes.
    async fn all_nodes(&self, tx: &Self::Tx) -> Result<Vec<Node>>;

    /// Total number of nodes.
    async fn node_count(&self, tx: &Self::Tx) -> Result<u64>;

    /// Total number of relationships.
    async fn relationship_count(&self, tx: &Self::Tx) -> Result<u64>;
}
