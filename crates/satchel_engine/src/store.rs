//! Versioned, checksummed entity store.
//!
//! The entity store is the durable source of truth for application data.
//! Every mutation is written to the persisted store before the call
//! returns and appends a matching offline queue item, so a crash
//! immediately after a mutation loses neither the data nor the intent to
//! replicate it.

use crate::config::SettingsHandle;
use crate::error::{SyncError, SyncResult};
use crate::keys;
use crate::queue::OfflineQueue;
use satchel_protocol::{
    payload_checksum, EntityKind, OfflineQueueItem, QueueOperation, SyncStatus, SyncableEntity,
};
use satchel_storage::StoreBackend;
use serde_json::Value;
use std::sync::Arc;

/// CRUD over versioned, checksummed entities backed by the persisted store.
pub struct EntityStore {
    backend: Arc<dyn StoreBackend>,
    queue: Arc<OfflineQueue>,
    device_id: String,
    settings: SettingsHandle,
}

impl EntityStore {
    /// Creates an entity store over the given backend and queue.
    pub(crate) fn new(
        backend: Arc<dyn StoreBackend>,
        queue: Arc<OfflineQueue>,
        device_id: String,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            backend,
            queue,
            device_id,
            settings,
        }
    }

    /// The id of the device this store writes as.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Saves an entity: checksum, `pending` status, bumped version, and a
    /// matching queue item.
    ///
    /// Saving an existing id behaves as an update.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the store write fails.
    pub async fn save(
        &self,
        entity_type: EntityKind,
        id: &str,
        payload: Value,
    ) -> SyncResult<SyncableEntity> {
        let now = crate::now_millis();
        let existing = self.entity(id).await?;

        let (entity, operation) = match existing {
            Some(mut entity) => {
                entity.apply_local_update(payload.clone(), self.device_id.clone(), now)?;
                (entity, QueueOperation::Update)
            }
            None => {
                let entity = SyncableEntity::create(
                    entity_type,
                    id,
                    payload.clone(),
                    self.device_id.clone(),
                    now,
                )?;
                (entity, QueueOperation::Create)
            }
        };

        self.write(&entity).await?;
        self.enqueue(operation, entity_type, id, Some(payload), now)
            .await?;

        Ok(entity)
    }

    /// Updates an entity; a missing id behaves as a fresh save.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the store write fails.
    pub async fn update(
        &self,
        entity_type: EntityKind,
        id: &str,
        payload: Value,
    ) -> SyncResult<SyncableEntity> {
        self.save(entity_type, id, payload).await
    }

    /// Deletes an entity locally and enqueues the delete for replication.
    ///
    /// The local copy is removed immediately (optimistic delete); the
    /// queued item doubles as the tombstone a later reconciliation checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn delete(&self, entity_type: EntityKind, id: &str) -> SyncResult<()> {
        self.backend.remove(&keys::entity(id)).await?;
        let now = crate::now_millis();
        self.enqueue(QueueOperation::Delete, entity_type, id, None, now)
            .await
    }

    /// Returns an entity's payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub async fn get(&self, id: &str) -> SyncResult<Option<Value>> {
        Ok(self.entity(id).await?.map(|e| e.payload))
    }

    /// Returns all payloads of the given type.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub async fn get_all(&self, entity_type: EntityKind) -> SyncResult<Vec<Value>> {
        Ok(self
            .entities()
            .await?
            .into_iter()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| e.payload)
            .collect())
    }

    /// Returns an entity's full record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub async fn entity(&self, id: &str) -> SyncResult<Option<SyncableEntity>> {
        match self.backend.get(&keys::entity(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns all stored entity records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub async fn entities(&self) -> SyncResult<Vec<SyncableEntity>> {
        let mut entities = Vec::new();

        for key in self.backend.keys().await? {
            if !key.starts_with(keys::ENTITY_PREFIX) {
                continue;
            }
            let Some(bytes) = self.backend.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<SyncableEntity>(&bytes) {
                Ok(entity) => entities.push(entity),
                Err(e) => {
                    // Quarantine the bad record rather than failing every
                    // caller that lists entities
                    tracing::warn!(key = %key, error = %e, "skipping unreadable entity record");
                }
            }
        }

        entities.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(entities)
    }

    /// Returns all entities with unsynced local changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub async fn pending(&self) -> SyncResult<Vec<SyncableEntity>> {
        Ok(self
            .entities()
            .await?
            .into_iter()
            .filter(|e| e.sync_status == SyncStatus::Pending)
            .collect())
    }

    /// Stores a server copy of an entity, marked synced.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StaleWrite`] if the stored version is equal or
    /// newer, or an error if the store write fails.
    pub async fn store_remote(&self, mut remote: SyncableEntity) -> SyncResult<SyncableEntity> {
        if let Some(existing) = self.entity(&remote.id).await? {
            if remote.version <= existing.version {
                return Err(SyncError::StaleWrite {
                    entity_id: remote.id,
                    attempted: remote.version,
                    current: existing.version,
                });
            }
        }

        // The checksum invariant is local; never trust the wire copy's
        remote.checksum = payload_checksum(&remote.payload)?;
        remote.sync_status = SyncStatus::Synced;
        remote.last_synced = Some(crate::now_millis());

        self.write(&remote).await?;
        Ok(remote)
    }

    /// Records a successful upload acknowledgment for an entity.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EntityNotFound`] if the entity is gone, or an
    /// error if the store write fails.
    pub async fn acknowledge_upload(
        &self,
        id: &str,
        server_version: Option<u64>,
    ) -> SyncResult<SyncableEntity> {
        let mut entity = self
            .entity(id)
            .await?
            .ok_or_else(|| SyncError::EntityNotFound(id.to_string()))?;

        entity.mark_synced(server_version, crate::now_millis());
        self.write(&entity).await?;
        Ok(entity)
    }

    /// Re-marks an entity pending with its version bumped past `floor`.
    ///
    /// Used when a conflict resolves as keep-local: the next push uploads
    /// the local payload under a version the server will accept.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EntityNotFound`] if the entity is gone, or an
    /// error if the store write fails.
    pub async fn mark_pending_above(&self, id: &str, floor: u64) -> SyncResult<SyncableEntity> {
        let mut entity = self
            .entity(id)
            .await?
            .ok_or_else(|| SyncError::EntityNotFound(id.to_string()))?;

        entity.version = entity.version.max(floor) + 1;
        entity.sync_status = SyncStatus::Pending;
        entity.updated_at = entity.updated_at.max(crate::now_millis());

        self.write(&entity).await?;
        Ok(entity)
    }

    /// Adopts a remote payload over the local copy, marked synced.
    ///
    /// Upserts: a missing local copy is created from the remote payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the store write fails.
    pub async fn adopt_remote_payload(
        &self,
        entity_type: EntityKind,
        id: &str,
        payload: Value,
        remote_version: Option<u64>,
    ) -> SyncResult<SyncableEntity> {
        let now = crate::now_millis();

        let mut entity = match self.entity(id).await? {
            Some(mut entity) => {
                entity.checksum = payload_checksum(&payload)?;
                entity.payload = payload;
                entity.version = entity.version.max(remote_version.unwrap_or(0));
                entity.updated_at = entity.updated_at.max(now);
                entity
            }
            None => {
                let mut entity =
                    SyncableEntity::create(entity_type, id, payload, "remote", now)?;
                entity.version = remote_version.unwrap_or(1).max(1);
                entity
            }
        };

        entity.sync_status = SyncStatus::Synced;
        entity.last_synced = Some(now);

        self.write(&entity).await?;
        Ok(entity)
    }

    /// Applies an externally merged payload, pending re-upload, with the
    /// version bumped past `floor`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the store write fails.
    pub async fn apply_merged(
        &self,
        entity_type: EntityKind,
        id: &str,
        payload: Value,
        floor: u64,
    ) -> SyncResult<SyncableEntity> {
        let now = crate::now_millis();

        let entity = match self.entity(id).await? {
            Some(mut entity) => {
                entity.checksum = payload_checksum(&payload)?;
                entity.payload = payload;
                entity.version = entity.version.max(floor) + 1;
                entity.updated_at = entity.updated_at.max(now);
                entity.sync_status = SyncStatus::Pending;
                entity
            }
            None => {
                let mut entity = SyncableEntity::create(
                    entity_type,
                    id,
                    payload,
                    self.device_id.clone(),
                    now,
                )?;
                entity.version = floor + 1;
                entity
            }
        };

        self.write(&entity).await?;
        Ok(entity)
    }

    /// Drops the local copy without queuing a replication item.
    ///
    /// Used when a conflict resolves in favor of a remote delete.
    pub(crate) async fn remove_local(&self, id: &str) -> SyncResult<()> {
        self.backend.remove(&keys::entity(id)).await?;
        Ok(())
    }

    /// Serializes and writes one entity record.
    async fn write(&self, entity: &SyncableEntity) -> SyncResult<()> {
        let bytes = serde_json::to_vec(entity)?;
        self.backend.set(&keys::entity(&entity.id), bytes).await?;
        Ok(())
    }

    /// Appends the queue item matching a mutation.
    async fn enqueue(
        &self,
        operation: QueueOperation,
        entity_type: EntityKind,
        id: &str,
        payload: Option<Value>,
        now: i64,
    ) -> SyncResult<()> {
        let max_retries = self.settings.read().max_retry_attempts;
        self.queue
            .enqueue(OfflineQueueItem::new(
                operation,
                entity_type,
                id,
                payload,
                max_retries,
                now,
            ))
            .await
    }
}
