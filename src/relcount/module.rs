//! The relationship count module: wires the degree cache into a graph's
//! commit path and keeps it in step with the relationships.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::model::{Direction, NodeId, Relationship};
use crate::storage::StorageBackend;
use crate::tx::{Transaction, TransactionData, TransactionEventHandler, TxId, TxMode};
use crate::{Error, Graph, Result};

use super::cache::PropertyBuffer;
use super::compact::AsyncCompactor;
use super::config::{CompactionMode, RelcountConfig};
use super::counter::CachedRelationshipCounter;
use super::descriptor::{DescriptorFormat, RelationshipDescriptor};
use super::session::CachingSession;

/// Module id used when none is given.
pub const DEFAULT_MODULE_ID: &str = "FRC";

/// Degree cache of one graph.
///
/// As a [`TransactionEventHandler`] it turns the relationship changes of
/// every committing transaction into degree deltas of the nodes involved:
/// the start node sees an outgoing relationship, the end node an incoming
/// one, and a loop both on the same node.
pub struct RelcountModule<B: StorageBackend> {
    id: String,
    format: DescriptorFormat,
    config: Arc<RelcountConfig>,
    backend: Arc<B>,
    compactor: Option<AsyncCompactor>,
    /// Held while degrees are loaded and flushed, by committing transactions
    /// and by the compaction worker alike.
    flush_gate: Arc<AsyncMutex<()>>,
    /// Nodes awaiting deferred compaction, per transaction still committing.
    deferred: Mutex<HashMap<TxId, Vec<NodeId>>>,
}

impl<B: StorageBackend> RelcountModule<B> {
    pub fn new(backend: Arc<B>, config: RelcountConfig) -> Self {
        Self::build(DEFAULT_MODULE_ID.to_string(), backend, config)
    }

    /// A module with its own id and therefore its own key prefix, so that
    /// several modules can cache degrees on the same nodes.
    ///
    /// The id must be non-empty ASCII letters and digits; the `_` closing
    /// the prefix then never occurs inside an id, and no module's prefix is
    /// a prefix of another's.
    ///
    /// With [`CompactionMode::Deferred`] this spawns the compaction worker
    /// and must be called from within a tokio runtime.
    pub fn with_id(id: impl Into<String>, backend: Arc<B>, config: RelcountConfig) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::ConstraintViolation(format!(
                "module id '{id}' must consist of ASCII letters and digits"
            )));
        }
        Ok(Self::build(id, backend, config))
    }

    fn build(id: String, backend: Arc<B>, config: RelcountConfig) -> Self {
        let format = DescriptorFormat::for_module(&id);
        let config = Arc::new(config);
        let flush_gate = Arc::new(AsyncMutex::new(()));
        let compactor = match config.compaction_mode() {
            CompactionMode::Inline => None,
            CompactionMode::Deferred => Some(AsyncCompactor::spawn(
                Arc::clone(&backend),
                Arc::clone(&config),
                format.clone(),
                Arc::clone(&flush_gate),
            )),
        };
        Self {
            id,
            format,
            config,
            backend,
            compactor,
            flush_gate,
            deferred: Mutex::new(HashMap::new()),
        }
    }

    /// Create a module over `graph`'s backend and register it with `graph`.
    pub fn register(graph: &Graph<B>, config: RelcountConfig) -> Arc<Self> {
        let module = Arc::new(Self::new(graph.backend_handle(), config));
        graph.register_handler(module.clone());
        module
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn format(&self) -> &DescriptorFormat {
        &self.format
    }

    pub fn config(&self) -> &RelcountConfig {
        &self.config
    }

    pub fn counter(&self) -> CachedRelationshipCounter {
        CachedRelationshipCounter::new(self.config.caching_handle(), self.format.clone())
    }

    /// Wildcard count in a read-only transaction of its own.
    pub async fn count(&self, node: NodeId, query: &RelationshipDescriptor) -> Result<i64> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let result = self.counter().count(self.backend.as_ref(), &tx, node, query).await;
        self.backend.commit_tx(tx).await?;
        result
    }

    /// Literal count in a read-only transaction of its own.
    pub async fn count_literally(&self, node: NodeId, query: &RelationshipDescriptor) -> Result<i64> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let result = self.counter().count_literally(self.backend.as_ref(), &tx, node, query).await;
        self.backend.commit_tx(tx).await?;
        result
    }

    // ========================================================================
    // (Re)initialization
    // ========================================================================

    /// Build the cache from the relationships already in the graph.
    ///
    /// Nodes are processed in batches of
    /// [`RelcountConfig::initialize_batch_size`], one transaction per batch.
    /// Existing cached degrees are added to, not replaced; see
    /// [`RelcountModule::reinitialize`].
    pub async fn initialize(&self) -> Result<()> {
        let nodes = self.all_node_ids().await?;
        info!(module = %self.id, nodes = nodes.len(), "building relationship count cache");

        for batch in nodes.chunks(self.config.initialize_batch_size()) {
            let _gate = self.flush_gate.lock().await;
            let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
            match self.initialize_batch(&mut tx, batch).await {
                Ok(()) => self.backend.commit_tx(tx).await?,
                Err(e) => {
                    self.backend.rollback_tx(tx).await?;
                    return Err(e);
                }
            }
            debug!(module = %self.id, batch = batch.len(), "initialized batch");
        }
        info!(module = %self.id, "relationship count cache built");
        Ok(())
    }

    /// Drop every cached degree of this module, then [`initialize`](Self::initialize).
    /// The way back from [`crate::Error::NeedsInitialization`].
    pub async fn reinitialize(&self) -> Result<()> {
        let nodes = self.all_node_ids().await?;
        info!(module = %self.id, nodes = nodes.len(), "clearing relationship count cache");

        for batch in nodes.chunks(self.config.initialize_batch_size()) {
            let _gate = self.flush_gate.lock().await;
            let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
            for &id in batch {
                let mut props = PropertyBuffer::load(self.backend.as_ref(), &tx, id).await?;
                self.config.caching().clear(&mut props, &self.format);
                props.commit(self.backend.as_ref(), &mut tx).await?;
            }
            self.backend.commit_tx(tx).await?;
        }
        self.initialize().await
    }

    /// Stop the deferred compaction worker, waiting at most `timeout` for
    /// queued work. True if nothing was abandoned.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        match &self.compactor {
            Some(compactor) => compactor.shutdown(timeout).await,
            None => true,
        }
    }

    async fn all_node_ids(&self) -> Result<Vec<NodeId>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let nodes = self.backend.all_nodes(&tx).await?;
        self.backend.commit_tx(tx).await?;
        Ok(nodes.into_iter().map(|n| n.id).collect())
    }

    async fn initialize_batch(&self, tx: &mut B::Tx, batch: &[NodeId]) -> Result<()> {
        let backend = self.backend.as_ref();
        let mut session = CachingSession::new(&self.config, &self.format);
        for &id in batch {
            let rels = backend.get_relationships(tx, id, Direction::Both, None).await?;
            for rel in rels.iter().filter(|r| self.config.includes(r)) {
                for direction in rel.directions_from(id) {
                    let descriptor = self.config.describe(rel, id, direction);
                    session.increment(backend, tx, id, descriptor, self.config.weight(rel, id)).await?;
                }
            }
        }
        session.finish(backend, tx, CompactionMode::Inline).await?;
        Ok(())
    }

    // ========================================================================
    // Event routing
    // ========================================================================

    async fn apply_created(&self, session: &mut CachingSession<'_>, backend: &B, tx: &B::Tx, rel: &Relationship) -> Result<()> {
        if !self.config.includes(rel) {
            return Ok(());
        }
        for (node, direction) in rel.perspectives() {
            let descriptor = self.config.describe(rel, node, direction);
            session.increment(backend, tx, node, descriptor, self.config.weight(rel, node)).await?;
        }
        Ok(())
    }

    async fn apply_deleted(
        &self,
        session: &mut CachingSession<'_>,
        backend: &B,
        tx: &B::Tx,
        data: &TransactionData,
        rel: &Relationship,
    ) -> Result<()> {
        if !self.config.includes(rel) {
            return Ok(());
        }
        for (node, direction) in rel.perspectives() {
            // a node deleted in the same transaction takes its degrees with it
            if data.has_node_been_deleted(node) {
                continue;
            }
            let descriptor = self.config.describe(rel, node, direction);
            session.decrement(backend, tx, node, &descriptor, self.config.weight(rel, node)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<B: StorageBackend> TransactionEventHandler<B> for RelcountModule<B> {
    async fn before_commit(&self, backend: &B, tx: &mut B::Tx, data: &TransactionData) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        // the worker rewrites whole caches; keep it out until ours is flushed
        let _gate = match self.compactor {
            Some(_) => Some(self.flush_gate.lock().await),
            None => None,
        };

        let mut session = CachingSession::new(&self.config, &self.format);
        for rel in data.created() {
            self.apply_created(&mut session, backend, tx, rel).await?;
        }
        for rel in data.deleted() {
            self.apply_deleted(&mut session, backend, tx, data, rel).await?;
        }
        for change in data.changed() {
            self.apply_deleted(&mut session, backend, tx, data, &change.previous).await?;
            self.apply_created(&mut session, backend, tx, &change.current).await?;
        }

        let deferred = session.finish(backend, tx, self.config.compaction_mode()).await?;
        if !deferred.is_empty() {
            self.deferred.lock().entry(tx.id()).or_default().extend(deferred);
        }
        Ok(())
    }

    async fn after_commit(&self, _backend: &B, tx: TxId) {
        let Some(nodes) = self.deferred.lock().remove(&tx) else {
            return;
        };
        let Some(compactor) = &self.compactor else {
            return;
        };
        for node in nodes {
            if let Err(e) = compactor.submit(node) {
                warn!(%node, error = %e, "could not queue deferred compaction");
            }
        }
    }

    async fn after_rollback(&self, _backend: &B, tx: TxId) {
        self.deferred.lock().remove(&tx);
    }
}
