//! Deferred compaction on a background task.
//!
//! Nodes are compacted one at a time, in submission order, each in a
//! read-write transaction of its own. A single worker means two compactions
//! of the same node never overlap. Each compaction holds the module's flush
//! gate, so it never interleaves with a committing transaction flushing the
//! same cache.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::model::NodeId;
use crate::relcount::caching_node::CachingNode;
use crate::relcount::config::RelcountConfig;
use crate::relcount::descriptor::DescriptorFormat;
use crate::storage::StorageBackend;
use crate::tx::TxMode;
use crate::{Error, Result};

use super::CompactionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionMessage {
    Compact(NodeId),
    Shutdown,
}

/// Load, compact and flush one node in a fresh transaction.
pub async fn compact_in_own_transaction<B: StorageBackend>(
    backend: &B,
    config: &RelcountConfig,
    format: &DescriptorFormat,
    node: NodeId,
) -> Result<CompactionOutcome> {
    let mut tx = backend.begin_tx(TxMode::ReadWrite).await?;
    let result = async {
        let mut caching = CachingNode::load(backend, &tx, node, config.caching(), format).await?;
        let outcome = config.compaction().compact(&mut caching);
        caching.flush(backend, &mut tx, config.caching(), format).await?;
        Ok::<_, Error>(outcome)
    }
    .await;

    match result {
        Ok(outcome) => {
            backend.commit_tx(tx).await?;
            Ok(outcome)
        }
        Err(e) => {
            backend.rollback_tx(tx).await?;
            Err(e)
        }
    }
}

/// Handle to the background compaction task.
pub struct AsyncCompactor {
    sender: mpsc::UnboundedSender<CompactionMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncCompactor {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn spawn<B: StorageBackend>(
        backend: Arc<B>,
        config: Arc<RelcountConfig>,
        format: DescriptorFormat,
        gate: Arc<AsyncMutex<()>>,
    ) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                let node = match message {
                    CompactionMessage::Compact(node) => node,
                    CompactionMessage::Shutdown => break,
                };
                let _gate = gate.lock().await;
                match compact_in_own_transaction(backend.as_ref(), &config, &format, node).await {
                    Ok(outcome) => debug!(%node, ?outcome, "deferred compaction done"),
                    Err(e) => warn!(%node, error = %e, "deferred compaction failed"),
                }
            }
            debug!("compaction worker stopped");
        });

        Self {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue `node` for compaction.
    pub fn submit(&self, node: NodeId) -> Result<()> {
        self.sender
            .send(CompactionMessage::Compact(node))
            .map_err(|_| Error::TxError("compaction worker has stopped".into()))
    }

    /// Let the worker drain what was submitted so far, then stop it.
    ///
    /// Returns false if the worker did not finish within `timeout`; queued
    /// work is then abandoned.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        // the worker may already be gone, in which case there is nothing to wait for
        let _ = self.sender.send(CompactionMessage::Shutdown);
        let Some(handle) = self.handle.lock().take() else {
            return true;
        };
        let abort = handle.abort_handle();
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "compaction worker ended abnormally");
                true
            }
            Err(_) => {
                warn!(?timeout, "compaction worker did not finish in time, abandoning queued work");
                abort.abort();
                false
            }
        }
    }
}

impl Drop for AsyncCompactor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
