//! Durable offline mutation queue.
//!
//! The queue is the ordered record of mutations awaiting replication to
//! the server. Items are appended alongside the entity mutation they
//! describe, survive restarts, and are drained sequentially inside a sync
//! cycle - one request at a time, in enqueue order, so per-entity
//! replication order is preserved and the server-side write rate stays
//! bounded.

use crate::config::{RetryConfig, SyncSettings};
use crate::error::SyncResult;
use crate::keys;
use crate::network::NetworkStatus;
use crate::transport::{HttpTransport, Method};
use parking_lot::RwLock;
use satchel_protocol::{OfflineQueueItem, QueueItemStatus, QueueOperation};
use satchel_storage::StoreBackend;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of one queue processing pass.
#[derive(Debug, Default)]
pub struct QueueOutcome {
    /// Items attempted this pass.
    pub attempted: usize,
    /// Items that replicated successfully.
    pub completed: usize,
    /// Items that failed and remain queued.
    pub failed: usize,
    /// Items pruned after exhausting their retry budget.
    ///
    /// These are terminal errors; callers must surface them, never drop
    /// them silently.
    pub terminal: Vec<OfflineQueueItem>,
}

/// The durable, ordered record of mutations awaiting replication.
pub struct OfflineQueue {
    backend: Arc<dyn StoreBackend>,
    items: RwLock<Vec<OfflineQueueItem>>,
    retry: RetryConfig,
    // Serializes snapshot persists so a slow write cannot clobber a newer one
    persist_lock: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
    /// Loads the queue persisted in the store, or starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn load(backend: Arc<dyn StoreBackend>, retry: RetryConfig) -> SyncResult<Self> {
        let items = match backend.get(keys::QUEUE).await? {
            Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(Self {
            backend,
            items: RwLock::new(items),
            retry,
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Appends an item; queue order is replication order.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be persisted.
    pub async fn enqueue(&self, item: OfflineQueueItem) -> SyncResult<()> {
        self.items.write().push(item);
        self.persist_latest().await
    }

    /// Returns a snapshot of all queued items.
    #[must_use]
    pub fn items(&self) -> Vec<OfflineQueueItem> {
        self.items.read().clone()
    }

    /// Returns the number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Returns true if a `delete` for the given entity is still queued.
    ///
    /// The queue doubles as the tombstone record for optimistic local
    /// deletes.
    #[must_use]
    pub fn has_pending_delete(&self, entity_id: &str) -> bool {
        self.items.read().iter().any(|item| {
            item.operation == QueueOperation::Delete
                && item.entity_id == entity_id
                && item.status != QueueItemStatus::Completed
        })
    }

    /// Runs one sequential replication pass.
    ///
    /// A pass with an unusable network, or with zero eligible items, is a
    /// no-op. After the pass, completed and retry-exhausted items are
    /// pruned; exhausted items come back in [`QueueOutcome::terminal`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the queue cannot be persisted afterwards;
    /// per-item failures are recorded on the items themselves.
    pub async fn process(
        &self,
        transport: &dyn HttpTransport,
        network: &NetworkStatus,
        settings: &SyncSettings,
    ) -> SyncResult<QueueOutcome> {
        let mut outcome = QueueOutcome::default();

        if !network.usable(settings.wifi_only) {
            return Ok(outcome);
        }

        let now = crate::now_millis();
        let mut batch = self.items.read().clone();
        let batch_ids: HashSet<String> = batch.iter().map(|i| i.id.clone()).collect();

        for item in batch.iter_mut() {
            if !item.eligible(now) {
                continue;
            }

            outcome.attempted += 1;
            item.status = QueueItemStatus::Processing;
            item.retry_count += 1;

            let (method, path) = replication_request(item);
            let call = transport.request(method, &path, item.payload.clone());
            let result = tokio::time::timeout(settings.call_timeout(), call).await;

            let failure = match result {
                Ok(Ok(response)) if response.is_success() => None,
                Ok(Ok(response)) => Some(format!("server returned status {}", response.status)),
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("request timed out".to_string()),
            };

            match failure {
                None => {
                    item.mark_completed();
                    outcome.completed += 1;
                }
                Some(message) => {
                    let delay = self.retry.delay_for_attempt(item.retry_count);
                    item.mark_failed(message, now + delay.as_millis() as i64);
                    outcome.failed += 1;
                }
            }
        }

        // Prune, keeping anything enqueued while the pass was replicating
        let mut kept = Vec::with_capacity(batch.len());
        for item in batch {
            if item.status == QueueItemStatus::Completed {
                continue;
            }
            if item.retries_exhausted() {
                tracing::warn!(
                    entity_id = %item.entity_id,
                    operation = item.operation.as_str(),
                    attempts = item.retry_count,
                    "queue item exhausted its retry budget"
                );
                outcome.terminal.push(item);
                continue;
            }
            kept.push(item);
        }

        {
            let mut guard = self.items.write();
            let late: Vec<OfflineQueueItem> = guard
                .iter()
                .filter(|i| !batch_ids.contains(&i.id))
                .cloned()
                .collect();
            kept.extend(late);
            *guard = kept;
        }

        self.persist_latest().await?;
        Ok(outcome)
    }

    /// Persists the current snapshot, newest write wins.
    async fn persist_latest(&self) -> SyncResult<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.items.read().clone();
        let bytes = serde_json::to_vec(&snapshot)?;
        self.backend.set(keys::QUEUE, bytes).await?;
        Ok(())
    }
}

/// Maps a queue item to its replication request.
fn replication_request(item: &OfflineQueueItem) -> (Method, String) {
    match item.operation {
        QueueOperation::Create => (Method::Post, format!("/{}", item.entity_type)),
        QueueOperation::Update => (
            Method::Put,
            format!("/{}/{}", item.entity_type, item.entity_id),
        ),
        QueueOperation::Delete => (
            Method::Delete,
            format!("/{}/{}", item.entity_type, item.entity_id),
        ),
    }
}
