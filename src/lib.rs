//! # neo4j-relcount: Relationship Degree Cache for a Property Graph
//!
//! Counts relationships per node by type, direction and properties without
//! traversing them, by caching the counts on the node itself.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` is the contract between the cache and storage
//! 2. **Clean DTOs**: `Node`, `Relationship`, `Value` cross all boundaries
//! 3. **Commit-path only**: the cache changes exactly when relationships commit
//! 4. **Bounded**: specific counts are merged into general ones past a threshold
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relcount::{Graph, PropertyMap, TxMode, props};
//! use relcount::{RelcountConfig, RelcountModule, RelationshipDescriptor};
//!
//! # async fn example() -> relcount::Result<()> {
//! let graph = Graph::open_memory().await?;
//! let module = RelcountModule::register(&graph, RelcountConfig::default());
//!
//! let mut tx = graph.begin(TxMode::ReadWrite).await?;
//! let ada = tx.create_node(&["Person"], PropertyMap::new()).await?;
//! let bob = tx.create_node(&["Person"], PropertyMap::new()).await?;
//! tx.create_relationship(ada, bob, "FRIEND_OF", props([("since", 2012)])).await?;
//! tx.commit().await?;
//!
//! let query: RelationshipDescriptor = "FRIEND_OF#OUTGOING".parse()?;
//! assert_eq!(module.count(ada, &query).await?, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Memory | (default) | In-memory graph for testing/embedding |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod relcount;
pub mod storage;
pub mod tx;

use std::sync::Arc;

use parking_lot::RwLock;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, Relationship, Value, PropertyMap, props,
    NodeId, RelId, Direction,
};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{MemoryBackend, StorageBackend};

// ============================================================================
// Re-exports: Transactions
// ============================================================================

pub use tx::{Transaction, TransactionData, TransactionEventHandler, TxMode, TxId};

// ============================================================================
// Re-exports: Degree cache
// ============================================================================

pub use relcount::{
    CachedRelationshipCounter, CompactionMode, Predicate, RelationshipDescriptor,
    RelcountConfig, RelcountModule, TreatMissingAs,
};

// ============================================================================
// Top-level Graph handle
// ============================================================================

/// The primary entry point. A `Graph` wraps a storage backend and runs the
/// registered [`TransactionEventHandler`]s on every commit.
pub struct Graph<B: StorageBackend> {
    backend: Arc<B>,
    handlers: RwLock<Vec<Arc<dyn TransactionEventHandler<B>>>>,
}

impl<B: StorageBackend> Graph<B> {
    /// Create a Graph with the given backend.
    pub fn with_backend(backend: B) -> Self {
        Self::with_shared_backend(Arc::new(backend))
    }

    pub fn with_shared_backend(backend: Arc<B>) -> Self {
        Self {
            backend,
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Run `handler` on every transaction committed from now on.
    pub fn register_handler(&self, handler: Arc<dyn TransactionEventHandler<B>>) {
        self.handlers.write().push(handler);
    }

    /// Begin an explicit transaction.
    pub async fn begin(&self, mode: TxMode) -> Result<ExplicitTx<'_, B>> {
        let tx = self.backend.begin_tx(mode).await?;
        Ok(ExplicitTx { graph: self, tx })
    }

    /// Access the underlying backend (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Shared handle to the backend, for components that outlive a call.
    pub fn backend_handle(&self) -> Arc<B> {
        Arc::clone(&self.backend)
    }

    fn handlers(&self) -> Vec<Arc<dyn TransactionEventHandler<B>>> {
        self.handlers.read().clone()
    }
}

/// In-memory graph for testing and embedding.
impl Graph<storage::MemoryBackend> {
    pub async fn open_memory() -> Result<Self> {
        let backend = storage::MemoryBackend::new();
        Ok(Self::with_backend(backend))
    }
}

/// Explicit transaction handle.
pub struct ExplicitTx<'g, B: StorageBackend> {
    graph: &'g Graph<B>,
    tx: B::Tx,
}

impl<'g, B: StorageBackend> ExplicitTx<'g, B> {
    pub fn tx(&self) -> &B::Tx {
        &self.tx
    }

    pub async fn create_node(&mut self, labels: &[&str], props: PropertyMap) -> Result<NodeId> {
        self.graph.backend.create_node(&mut self.tx, labels, props).await
    }

    pub async fn get_node(&self, id: NodeId) -> Result<Option<Node>> {
        self.graph.backend.get_node(&self.tx, id).await
    }

    pub async fn delete_node(&mut self, id: NodeId) -> Result<bool> {
        self.graph.backend.delete_node(&mut self.tx, id).await
    }

    pub async fn detach_delete_node(&mut self, id: NodeId) -> Result<bool> {
        self.graph.backend.detach_delete_node(&mut self.tx, id).await
    }

    pub async fn set_node_property(&mut self, id: NodeId, key: &str, val: impl Into<Value>) -> Result<()> {
        self.graph.backend.set_node_property(&mut self.tx, id, key, val.into()).await
    }

    pub async fn create_relationship(
        &mut self,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId> {
        self.graph.backend.create_relationship(&mut self.tx, src, dst, rel_type, props).await
    }

    pub async fn get_relationship(&self, id: RelId) -> Result<Option<Relationship>> {
        self.graph.backend.get_relationship(&self.tx, id).await
    }

    pub async fn delete_relationship(&mut self, id: RelId) -> Result<bool> {
        self.graph.backend.delete_relationship(&mut self.tx, id).await
    }

    pub async fn set_relationship_property(&mut self, id: RelId, key: &str, val: impl Into<Value>) -> Result<()> {
        self.graph.backend.set_relationship_property(&mut self.tx, id, key, val.into()).await
    }

    pub async fn remove_relationship_property(&mut self, id: RelId, key: &str) -> Result<()> {
        self.graph.backend.remove_relationship_property(&mut self.tx, id, key).await
    }

    pub async fn get_relationships(
        &self,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>> {
        self.graph.backend.get_relationships(&self.tx, node, dir, rel_type).await
    }

    /// Run every handler's `before_commit`, then commit. If a handler fails
    /// the transaction is rolled back and the handler's error returned.
    pub async fn commit(mut self) -> Result<()> {
        let graph = self.graph;
        let backend = graph.backend.as_ref();
        let handlers = graph.handlers();
        let data = self.tx.take_data();
        let id = self.tx.id();

        for handler in &handlers {
            if let Err(e) = handler.before_commit(backend, &mut self.tx, &data).await {
                backend.rollback_tx(self.tx).await?;
                for h in &handlers {
                    h.after_rollback(backend, id).await;
                }
                return Err(e);
            }
        }

        backend.commit_tx(self.tx).await?;
        for handler in &handlers {
            handler.after_commit(backend, id).await;
        }
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        let graph = self.graph;
        let backend = graph.backend.as_ref();
        let id = self.tx.id();
        backend.rollback_tx(self.tx).await?;
        for handler in &graph.handlers() {
            handler.after_rollback(backend, id).await;
        }
        Ok(())
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to count: {0}")]
    UnableToCount(String),

    #[error("Degree cache of node {node} out of sync at {descriptor}, reinitialization needed")]
    NeedsInitialization { node: NodeId, descriptor: String },

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Transaction error: {0}")]
    TxError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
