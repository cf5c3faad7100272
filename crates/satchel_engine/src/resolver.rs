//! Conflict queue and resolution.
//!
//! Divergences found during reconciliation are recorded here, never
//! auto-discarded. Under the default `ask_user` strategy they stay queued
//! until an explicit [`ConflictResolver::resolve`] call; the automatic
//! strategies resolve at record time. `merge_smart` is an extension point:
//! it consults a per-entity-kind merge function registry and leaves the
//! conflict pending when none is registered.

use crate::error::{SyncError, SyncResult};
use crate::keys;
use crate::store::EntityStore;
use parking_lot::RwLock;
use satchel_protocol::{ConflictResolution, EntityKind, ResolutionStrategy, SyncConflict};
use satchel_storage::StoreBackend;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Merge function applied by the `merge_smart` strategy.
///
/// Receives the local and remote payloads and returns the merged payload.
pub type MergeFn = dyn Fn(&Value, &Value) -> Value + Send + Sync;

/// Records conflicts and applies resolutions.
pub struct ConflictResolver {
    backend: Arc<dyn StoreBackend>,
    conflicts: RwLock<Vec<SyncConflict>>,
    mergers: RwLock<HashMap<EntityKind, Box<MergeFn>>>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl ConflictResolver {
    /// Loads the conflict queue persisted in the store, or starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn load(backend: Arc<dyn StoreBackend>) -> SyncResult<Self> {
        let conflicts = match backend.get(keys::CONFLICTS).await? {
            Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(Self {
            backend,
            conflicts: RwLock::new(conflicts),
            mergers: RwLock::new(HashMap::new()),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Registers the merge function `merge_smart` uses for a kind.
    pub fn register_merge(&self, kind: EntityKind, merge: Box<MergeFn>) {
        self.mergers.write().insert(kind, merge);
    }

    /// Returns all conflicts still awaiting a decision.
    #[must_use]
    pub fn pending(&self) -> Vec<SyncConflict> {
        self.conflicts
            .read()
            .iter()
            .filter(|c| !c.is_resolved())
            .cloned()
            .collect()
    }

    /// Returns the full conflict history, resolved entries included.
    #[must_use]
    pub fn all(&self) -> Vec<SyncConflict> {
        self.conflicts.read().clone()
    }

    /// Records a conflict, auto-resolving it if the strategy allows.
    ///
    /// Returns the conflict in its final state for this call.
    pub(crate) async fn record_with_strategy(
        &self,
        store: &EntityStore,
        conflict: SyncConflict,
        strategy: ResolutionStrategy,
    ) -> SyncResult<SyncConflict> {
        // One record per live divergence: a re-detection refreshes the
        // payloads on the existing unresolved record instead of appending
        let conflict = {
            let mut conflicts = self.conflicts.write();
            match conflicts.iter_mut().find(|c| {
                !c.is_resolved()
                    && c.entity_id == conflict.entity_id
                    && c.conflict_type == conflict.conflict_type
            }) {
                Some(existing) => {
                    existing.local_data = conflict.local_data;
                    existing.local_version = conflict.local_version;
                    existing.remote_data = conflict.remote_data;
                    existing.remote_version = conflict.remote_version;
                    existing.clone()
                }
                None => {
                    tracing::info!(
                        entity_id = %conflict.entity_id,
                        kind = ?conflict.conflict_type,
                        "conflict recorded"
                    );
                    conflicts.push(conflict.clone());
                    conflict
                }
            }
        };
        self.persist_latest().await?;

        match strategy.resolution() {
            None => Ok(conflict),
            Some(ConflictResolution::Merge) => {
                let merged = {
                    let mergers = self.mergers.read();
                    match (
                        mergers.get(&conflict.entity_type),
                        &conflict.local_data,
                        &conflict.remote_data,
                    ) {
                        (Some(merge), Some(local), Some(remote)) => Some(merge(local, remote)),
                        _ => None,
                    }
                };

                match merged {
                    Some(payload) => {
                        self.resolve(store, &conflict.id, ConflictResolution::Merge, Some(payload))
                            .await
                    }
                    // No merge function registered for this kind; the
                    // conflict stays queued for an explicit decision
                    None => Ok(conflict),
                }
            }
            Some(resolution) => self.resolve(store, &conflict.id, resolution, None).await,
        }
    }

    /// Applies an explicit resolution to a queued conflict.
    ///
    /// - `keep_local` re-marks the local entity pending with its version
    ///   bumped past the server's
    /// - `keep_remote` overwrites the local copy with the remote payload
    ///   and marks it synced
    /// - `merge` applies the supplied merged payload, pending re-upload
    /// - `manual` records the decision without touching the entity
    ///
    /// Resolving an already-resolved conflict is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConflictNotFound`] for an unknown id,
    /// [`SyncError::MergeRequired`] for a `merge` without a payload, or an
    /// error if applying the decision fails.
    pub async fn resolve(
        &self,
        store: &EntityStore,
        conflict_id: &str,
        resolution: ConflictResolution,
        merged: Option<Value>,
    ) -> SyncResult<SyncConflict> {
        let conflict = self
            .conflicts
            .read()
            .iter()
            .find(|c| c.id == conflict_id)
            .cloned()
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;

        if conflict.is_resolved() {
            return Ok(conflict);
        }

        match resolution {
            ConflictResolution::KeepLocal => {
                if store.entity(&conflict.entity_id).await?.is_some() {
                    store
                        .mark_pending_above(
                            &conflict.entity_id,
                            conflict.remote_version.unwrap_or(0),
                        )
                        .await?;
                }
                // Locally deleted entity: the queued delete intent stands
            }
            ConflictResolution::KeepRemote => match &conflict.remote_data {
                Some(remote) => {
                    store
                        .adopt_remote_payload(
                            conflict.entity_type,
                            &conflict.entity_id,
                            remote.clone(),
                            conflict.remote_version,
                        )
                        .await?;
                }
                // Remote side deleted: drop the local copy
                None => store.remove_local(&conflict.entity_id).await?,
            },
            ConflictResolution::Merge => {
                let payload = merged.ok_or(SyncError::MergeRequired)?;
                let floor = conflict
                    .local_version
                    .unwrap_or(0)
                    .max(conflict.remote_version.unwrap_or(0));
                store
                    .apply_merged(conflict.entity_type, &conflict.entity_id, payload, floor)
                    .await?;
            }
            ConflictResolution::Manual => {}
        }

        let now = crate::now_millis();
        let resolved = {
            let mut conflicts = self.conflicts.write();
            let entry = conflicts
                .iter_mut()
                .find(|c| c.id == conflict_id)
                .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;
            entry.resolve(resolution, now);
            entry.clone()
        };

        self.persist_latest().await?;
        Ok(resolved)
    }

    async fn persist_latest(&self) -> SyncResult<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.conflicts.read().clone();
        let bytes = serde_json::to_vec(&snapshot)?;
        self.backend.set(keys::CONFLICTS, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, SyncSettings};
    use crate::queue::OfflineQueue;
    use satchel_protocol::{ConflictKind, SyncStatus};
    use satchel_storage::MemoryStore;
    use serde_json::json;

    async fn fixtures() -> (EntityStore, ConflictResolver) {
        let backend: Arc<dyn StoreBackend> = Arc::new(MemoryStore::new());
        let queue = Arc::new(
            OfflineQueue::load(Arc::clone(&backend), RetryConfig::immediate())
                .await
                .unwrap(),
        );
        let settings = Arc::new(RwLock::new(SyncSettings::default()));
        let store = EntityStore::new(Arc::clone(&backend), queue, "device-a".into(), settings);
        let resolver = ConflictResolver::load(backend).await.unwrap();
        (store, resolver)
    }

    fn update_conflict(local: Value, local_v: u64, remote: Value, remote_v: u64) -> SyncConflict {
        SyncConflict::new(
            ConflictKind::UpdateConflict,
            EntityKind::Document,
            "doc-1",
            Some(local),
            Some(local_v),
            Some(remote),
            Some(remote_v),
            crate::now_millis(),
        )
    }

    #[tokio::test]
    async fn ask_user_leaves_conflict_and_entity_untouched() {
        let (store, resolver) = fixtures().await;
        store
            .save(EntityKind::Document, "doc-1", json!({"v": "local"}))
            .await
            .unwrap();

        let conflict = update_conflict(json!({"v": "local"}), 1, json!({"v": "remote"}), 3);
        let recorded = resolver
            .record_with_strategy(&store, conflict, ResolutionStrategy::AskUser)
            .await
            .unwrap();

        assert!(!recorded.is_resolved());
        assert_eq!(resolver.pending().len(), 1);
        assert_eq!(
            store.get("doc-1").await.unwrap(),
            Some(json!({"v": "local"}))
        );
    }

    #[tokio::test]
    async fn keep_local_bumps_past_remote_version() {
        let (store, resolver) = fixtures().await;
        store
            .save(EntityKind::Document, "doc-1", json!({"v": "local"}))
            .await
            .unwrap();

        let conflict = update_conflict(json!({"v": "local"}), 1, json!({"v": "remote"}), 3);
        let recorded = resolver
            .record_with_strategy(&store, conflict, ResolutionStrategy::AskUser)
            .await
            .unwrap();

        resolver
            .resolve(&store, &recorded.id, ConflictResolution::KeepLocal, None)
            .await
            .unwrap();

        let entity = store.entity("doc-1").await.unwrap().unwrap();
        assert_eq!(entity.payload, json!({"v": "local"}));
        assert_eq!(entity.version, 4);
        assert_eq!(entity.sync_status, SyncStatus::Pending);
        assert!(resolver.pending().is_empty());
    }

    #[tokio::test]
    async fn keep_remote_overwrites_and_marks_synced() {
        let (store, resolver) = fixtures().await;
        store
            .save(EntityKind::Document, "doc-1", json!({"v": "local"}))
            .await
            .unwrap();

        let conflict = update_conflict(json!({"v": "local"}), 1, json!({"v": "remote"}), 3);
        let recorded = resolver
            .record_with_strategy(&store, conflict, ResolutionStrategy::AskUser)
            .await
            .unwrap();

        resolver
            .resolve(&store, &recorded.id, ConflictResolution::KeepRemote, None)
            .await
            .unwrap();

        let entity = store.entity("doc-1").await.unwrap().unwrap();
        assert_eq!(entity.payload, json!({"v": "remote"}));
        assert_eq!(entity.version, 3);
        assert_eq!(entity.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn merge_requires_a_payload() {
        let (store, resolver) = fixtures().await;
        store
            .save(EntityKind::Document, "doc-1", json!({"v": "local"}))
            .await
            .unwrap();

        let conflict = update_conflict(json!({"v": "local"}), 1, json!({"v": "remote"}), 3);
        let recorded = resolver
            .record_with_strategy(&store, conflict, ResolutionStrategy::AskUser)
            .await
            .unwrap();

        let err = resolver
            .resolve(&store, &recorded.id, ConflictResolution::Merge, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MergeRequired));

        let merged = resolver
            .resolve(
                &store,
                &recorded.id,
                ConflictResolution::Merge,
                Some(json!({"v": "merged"})),
            )
            .await
            .unwrap();
        assert!(merged.is_resolved());

        let entity = store.entity("doc-1").await.unwrap().unwrap();
        assert_eq!(entity.payload, json!({"v": "merged"}));
        assert_eq!(entity.version, 4);
        assert_eq!(entity.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn auto_keep_remote_resolves_at_record_time() {
        let (store, resolver) = fixtures().await;
        store
            .save(EntityKind::Document, "doc-1", json!({"v": "local"}))
            .await
            .unwrap();

        let conflict = update_conflict(json!({"v": "local"}), 1, json!({"v": "remote"}), 3);
        let recorded = resolver
            .record_with_strategy(&store, conflict, ResolutionStrategy::KeepRemote)
            .await
            .unwrap();

        assert!(recorded.is_resolved());
        assert_eq!(
            store.get("doc-1").await.unwrap(),
            Some(json!({"v": "remote"}))
        );
        // The record stays in the history for auditing
        assert_eq!(resolver.all().len(), 1);
    }

    #[tokio::test]
    async fn merge_smart_uses_registered_merger_or_stays_pending() {
        let (store, resolver) = fixtures().await;
        store
            .save(EntityKind::Document, "doc-1", json!({"a": 1}))
            .await
            .unwrap();

        // No merger registered: the conflict stays pending
        let conflict = update_conflict(json!({"a": 1}), 1, json!({"b": 2}), 3);
        let recorded = resolver
            .record_with_strategy(&store, conflict, ResolutionStrategy::MergeSmart)
            .await
            .unwrap();
        assert!(!recorded.is_resolved());

        resolver.register_merge(
            EntityKind::Document,
            Box::new(|local, remote| {
                let mut merged = local.as_object().cloned().unwrap_or_default();
                if let Some(remote) = remote.as_object() {
                    for (k, v) in remote {
                        merged.insert(k.clone(), v.clone());
                    }
                }
                Value::Object(merged)
            }),
        );

        let conflict = update_conflict(json!({"a": 1}), 1, json!({"b": 2}), 3);
        let recorded = resolver
            .record_with_strategy(&store, conflict, ResolutionStrategy::MergeSmart)
            .await
            .unwrap();
        assert!(recorded.is_resolved());

        let entity = store.entity("doc-1").await.unwrap().unwrap();
        assert_eq!(entity.payload, json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn conflicts_survive_restart() {
        let backend: Arc<dyn StoreBackend> = Arc::new(MemoryStore::new());
        {
            let resolver = ConflictResolver::load(Arc::clone(&backend)).await.unwrap();
            resolver
                .conflicts
                .write()
                .push(update_conflict(json!(1), 1, json!(2), 2));
            resolver.persist_latest().await.unwrap();
        }

        let resolver = ConflictResolver::load(backend).await.unwrap();
        assert_eq!(resolver.pending().len(), 1);
    }

    #[tokio::test]
    async fn unknown_conflict_id_errors() {
        let (store, resolver) = fixtures().await;
        let err = resolver
            .resolve(&store, "nope", ConflictResolution::Manual, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ConflictNotFound(_)));
    }
}
