//! Offline queue items.

use crate::entity::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The mutation a queue item replicates to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOperation {
    /// Entity was created locally.
    Create,
    /// Entity was updated locally.
    Update,
    /// Entity was deleted locally.
    Delete,
}

impl QueueOperation {
    /// Returns the wire name of this operation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::Create => "create",
            QueueOperation::Update => "update",
            QueueOperation::Delete => "delete",
        }
    }
}

/// Processing state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    /// Waiting for a processing pass.
    Pending,
    /// Currently being replicated.
    Processing,
    /// Last attempt failed; eligible again once its backoff passes.
    Failed,
    /// Replicated successfully; pruned on the next pass.
    Completed,
}

/// An intent to replicate one local mutation to the server.
///
/// Queue items are created atomically alongside the entity mutation they
/// describe and carry a snapshot of the payload as it was at enqueue time.
/// Retry bookkeeping lives on the item itself so the queue survives
/// restarts without losing progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineQueueItem {
    /// Unique item id.
    pub id: String,
    /// Which mutation to replay.
    pub operation: QueueOperation,
    /// Target entity type.
    pub entity_type: EntityKind,
    /// Target entity id.
    pub entity_id: String,
    /// Payload snapshot at enqueue time; absent for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Attempts made so far.
    pub retry_count: u32,
    /// Attempts allowed before the item is dropped as a terminal error.
    pub max_retries: u32,
    /// Current processing state.
    pub status: QueueItemStatus,
    /// Enqueue time, epoch millis.
    pub enqueued_at: i64,
    /// Earliest time the next attempt may run, epoch millis.
    #[serde(default)]
    pub next_retry_at: i64,
    /// Message from the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl OfflineQueueItem {
    /// Creates a new pending queue item.
    pub fn new(
        operation: QueueOperation,
        entity_type: EntityKind,
        entity_id: impl Into<String>,
        payload: Option<Value>,
        max_retries: u32,
        now: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation,
            entity_type,
            entity_id: entity_id.into(),
            payload,
            retry_count: 0,
            max_retries,
            status: QueueItemStatus::Pending,
            enqueued_at: now,
            next_retry_at: now,
            last_error: None,
        }
    }

    /// Returns true if the retry budget is spent.
    #[must_use]
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Returns true if a processing pass at `now` should attempt this item.
    #[must_use]
    pub fn eligible(&self, now: i64) -> bool {
        matches!(
            self.status,
            QueueItemStatus::Pending | QueueItemStatus::Failed
        ) && !self.retries_exhausted()
            && now >= self.next_retry_at
    }

    /// Marks the item replicated.
    pub fn mark_completed(&mut self) {
        self.status = QueueItemStatus::Completed;
        self.last_error = None;
    }

    /// Marks the attempt failed and schedules the next one.
    pub fn mark_failed(&mut self, error: impl Into<String>, next_retry_at: i64) {
        self.status = QueueItemStatus::Failed;
        self.last_error = Some(error.into());
        self.next_retry_at = next_retry_at;
    }
}
