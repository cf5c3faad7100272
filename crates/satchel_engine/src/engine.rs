//! Sync engine state machine.
//!
//! One cycle runs pull, apply-remote, push, queue drain, and checkpoint in
//! order. A single atomic flag enforces at most one cycle in flight
//! process-wide; a second trigger gets an immediate [`SyncError::Busy`]
//! rather than queuing. Per-call timeouts abort only the call that hit
//! them, and the in-flight flag is released by a drop guard on every exit
//! path.

use crate::config::{RetryConfig, SettingsHandle, SyncSettings};
use crate::device;
use crate::error::{SyncError, SyncResult};
use crate::keys;
use crate::network::NetworkMonitor;
use crate::queue::OfflineQueue;
use crate::resolver::ConflictResolver;
use crate::store::EntityStore;
use crate::transport::{HttpTransport, Method};
use parking_lot::RwLock;
use satchel_protocol::{
    ChangesResponse, ConflictKind, SyncConflict, SyncStatus, SyncableEntity, UploadAck,
    UploadConflict,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One problem recorded during a sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncIssue {
    /// The entity involved, when the problem is per-entity.
    pub entity_id: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// True when the item was given up on, not just deferred.
    pub terminal: bool,
}

impl SyncIssue {
    fn new(entity_id: Option<String>, message: impl Into<String>, terminal: bool) -> Self {
        Self {
            entity_id,
            message: message.into(),
            terminal,
        }
    }
}

/// Result of one sync cycle.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// True iff the error list is empty; partial progress is kept either
    /// way.
    pub success: bool,
    /// Entities stored or acknowledged this cycle.
    pub entities_synced: u64,
    /// Conflicts detected this cycle, in their final state.
    pub conflicts: Vec<SyncConflict>,
    /// Problems recorded this cycle.
    pub errors: Vec<SyncIssue>,
    /// Wall-clock duration of the cycle.
    pub duration: Duration,
    /// The checkpoint written, absent when a fatal error prevented it.
    pub checkpoint: Option<i64>,
}

/// Cumulative statistics across cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles completed, successfully or not.
    pub cycles_completed: u64,
    /// Entities applied from pulls.
    pub entities_pulled: u64,
    /// Entities acknowledged by pushes.
    pub entities_pushed: u64,
    /// Conflicts detected.
    pub conflicts_encountered: u64,
    /// Message of the most recent cycle error, if the last cycle had any.
    pub last_error: Option<String>,
}

/// Releases the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates synchronization between the local store and the server.
///
/// Constructed once at application start with its collaborators injected,
/// then shared by handle. Entity mutations go through [`SyncEngine::store`]
/// and never wait on sync activity.
pub struct SyncEngine {
    backend: Arc<dyn satchel_storage::StoreBackend>,
    transport: Arc<dyn HttpTransport>,
    monitor: Arc<NetworkMonitor>,
    store: Arc<EntityStore>,
    queue: Arc<OfflineQueue>,
    resolver: Arc<ConflictResolver>,
    settings: SettingsHandle,
    syncing: AtomicBool,
    last_sync_time: RwLock<Option<i64>>,
    stats: RwLock<SyncStats>,
}

impl SyncEngine {
    /// Opens an engine over the given collaborators, loading persisted
    /// settings, queue, conflicts, checkpoint, and device identity.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted state cannot be read.
    pub async fn open(
        backend: Arc<dyn satchel_storage::StoreBackend>,
        transport: Arc<dyn HttpTransport>,
        monitor: Arc<NetworkMonitor>,
    ) -> SyncResult<Arc<Self>> {
        Self::open_with_retry(backend, transport, monitor, RetryConfig::default()).await
    }

    /// [`SyncEngine::open`] with explicit retry pacing for the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted state cannot be read.
    pub async fn open_with_retry(
        backend: Arc<dyn satchel_storage::StoreBackend>,
        transport: Arc<dyn HttpTransport>,
        monitor: Arc<NetworkMonitor>,
        retry: RetryConfig,
    ) -> SyncResult<Arc<Self>> {
        let settings = Arc::new(RwLock::new(SyncSettings::load(backend.as_ref()).await?));
        let device_id = device::device_id(backend.as_ref()).await?;
        let queue = Arc::new(OfflineQueue::load(Arc::clone(&backend), retry).await?);
        let store = Arc::new(EntityStore::new(
            Arc::clone(&backend),
            Arc::clone(&queue),
            device_id,
            Arc::clone(&settings),
        ));
        let resolver = Arc::new(ConflictResolver::load(Arc::clone(&backend)).await?);

        let last_sync_time = match backend.get(keys::CHECKPOINT).await? {
            Some(bytes) => serde_json::from_slice(&bytes).ok(),
            None => None,
        };

        Ok(Arc::new(Self {
            backend,
            transport,
            monitor,
            store,
            queue,
            resolver,
            settings,
            syncing: AtomicBool::new(false),
            last_sync_time: RwLock::new(last_sync_time),
            stats: RwLock::new(SyncStats::default()),
        }))
    }

    /// The entity store this engine owns.
    #[must_use]
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// The offline queue this engine drains.
    #[must_use]
    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// The conflict resolver this engine records into.
    #[must_use]
    pub fn resolver(&self) -> &Arc<ConflictResolver> {
        &self.resolver
    }

    /// The network monitor this engine consults.
    #[must_use]
    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    /// Returns a copy of the current settings.
    #[must_use]
    pub fn settings(&self) -> SyncSettings {
        self.settings.read().clone()
    }

    /// Mutates the settings and persists the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be persisted.
    pub async fn update_settings(
        &self,
        mutate: impl FnOnce(&mut SyncSettings),
    ) -> SyncResult<SyncSettings> {
        let updated = {
            let mut settings = self.settings.write();
            mutate(&mut settings);
            settings.clone()
        };
        updated.persist(self.backend.as_ref()).await?;
        Ok(updated)
    }

    /// The checkpoint of the last successfully completed cycle.
    #[must_use]
    pub fn last_sync_time(&self) -> Option<i64> {
        *self.last_sync_time.read()
    }

    /// Cumulative statistics across cycles.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a cycle is in flight.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Returns true if network state and policy allow a cycle right now.
    #[must_use]
    pub fn can_sync(&self) -> bool {
        let wifi_only = self.settings.read().wifi_only;
        self.monitor.current().usable(wifi_only)
    }

    /// Runs one full sync cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Busy`] immediately if a cycle is already in
    /// flight, [`SyncError::NetworkUnavailable`] if preconditions fail, or
    /// a storage error if persisted state cannot be read at all. Per-item
    /// problems never fail the call; they land in the report's error list.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::Busy);
        }
        let _guard = InFlightGuard(&self.syncing);

        if !self.can_sync() {
            return Err(SyncError::NetworkUnavailable);
        }

        tracing::info!(since = ?self.last_sync_time(), "sync cycle started");
        let started = Instant::now();
        let result = self.run_cycle().await;

        match &result {
            Ok(report) => {
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.conflicts_encountered += report.conflicts.len() as u64;
                stats.last_error = report.errors.first().map(|e| e.message.clone());
                tracing::info!(
                    success = report.success,
                    synced = report.entities_synced,
                    conflicts = report.conflicts.len(),
                    errors = report.errors.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "sync cycle finished"
                );
            }
            Err(e) => {
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.last_error = Some(e.to_string());
                tracing::warn!(error = %e, "sync cycle failed");
            }
        }

        result.map(|mut report| {
            report.duration = started.elapsed();
            report
        })
    }

    async fn run_cycle(&self) -> SyncResult<SyncReport> {
        let settings = self.settings();
        let timeout = settings.call_timeout();

        let mut report = SyncReport {
            success: false,
            entities_synced: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
            duration: Duration::ZERO,
            checkpoint: None,
        };
        let mut fatal = false;

        // 1. Pull changes since the last checkpoint
        let since = self.last_sync_time().unwrap_or(0);
        let path = format!("/sync/changes?since={since}");
        let pulled = match self.timed(timeout, Method::Get, &path, None).await {
            Ok(response) if response.is_success() => {
                match serde_json::from_value::<ChangesResponse>(response.body) {
                    Ok(changes) => changes.entities,
                    Err(e) => {
                        fatal = true;
                        report
                            .errors
                            .push(SyncIssue::new(None, format!("pull decode failed: {e}"), false));
                        Vec::new()
                    }
                }
            }
            Ok(response) => {
                report.errors.push(SyncIssue::new(
                    None,
                    format!("pull failed with status {}", response.status),
                    false,
                ));
                Vec::new()
            }
            Err(e) => {
                report
                    .errors
                    .push(SyncIssue::new(None, format!("pull failed: {e}"), false));
                Vec::new()
            }
        };

        // 2. Apply remote changes through the conflict rules
        for remote in pulled {
            let entity_id = remote.id.clone();
            match self.apply_remote(remote, &settings, &mut report).await {
                Ok(applied) => {
                    if applied {
                        report.entities_synced += 1;
                        self.stats.write().entities_pulled += 1;
                    }
                }
                Err(e) => {
                    fatal |= e.is_fatal();
                    report.errors.push(SyncIssue::new(
                        Some(entity_id),
                        format!("apply failed: {e}"),
                        false,
                    ));
                }
            }
        }

        // 3. Push local pending entities, holding back anything with an
        // unresolved conflict - resolution decides what uploads next
        let conflicted: std::collections::HashSet<String> = self
            .resolver
            .pending()
            .into_iter()
            .map(|c| c.entity_id)
            .collect();
        match self.store.pending().await {
            Ok(pending) => {
                for entity in pending {
                    if conflicted.contains(&entity.id) {
                        continue;
                    }
                    let entity_id = entity.id.clone();
                    match self.push_entity(entity, &settings, &mut report).await {
                        Ok(acknowledged) => {
                            if acknowledged {
                                report.entities_synced += 1;
                                self.stats.write().entities_pushed += 1;
                            }
                        }
                        Err(e) => {
                            fatal |= e.is_fatal();
                            report.errors.push(SyncIssue::new(
                                Some(entity_id),
                                format!("upload failed: {e}"),
                                false,
                            ));
                        }
                    }
                }
            }
            Err(e) => {
                fatal = true;
                report.errors.push(SyncIssue::new(
                    None,
                    format!("listing pending entities failed: {e}"),
                    false,
                ));
            }
        }

        // 4. Drain the offline queue
        let network = self.monitor.current();
        match self
            .queue
            .process(self.transport.as_ref(), &network, &settings)
            .await
        {
            Ok(outcome) => {
                for item in outcome.terminal {
                    report.errors.push(SyncIssue::new(
                        Some(item.entity_id.clone()),
                        format!(
                            "{} of {} {} gave up after {} attempts: {}",
                            item.operation.as_str(),
                            item.entity_type,
                            item.entity_id,
                            item.retry_count,
                            item.last_error.as_deref().unwrap_or("unknown error"),
                        ),
                        true,
                    ));
                }
            }
            Err(e) => {
                fatal |= e.is_fatal();
                report.errors.push(SyncIssue::new(
                    None,
                    format!("queue drain failed: {e}"),
                    false,
                ));
            }
        }

        // 5. Checkpoint, unless a fatal error poisoned the cycle
        if !fatal {
            let now = crate::now_millis();
            match self.set_checkpoint(now).await {
                Ok(()) => report.checkpoint = Some(now),
                Err(e) => {
                    report.errors.push(SyncIssue::new(
                        None,
                        format!("checkpoint write failed: {e}"),
                        false,
                    ));
                }
            }
        }

        report.success = report.errors.is_empty();
        Ok(report)
    }

    /// Applies one pulled entity; returns true if it was stored.
    async fn apply_remote(
        &self,
        remote: SyncableEntity,
        settings: &SyncSettings,
        report: &mut SyncReport,
    ) -> SyncResult<bool> {
        let local = self.store.entity(&remote.id).await?;

        match local {
            None => {
                if self.queue.has_pending_delete(&remote.id) {
                    // Locally deleted while the server moved on: the
                    // queued delete is the tombstone
                    let conflict = SyncConflict::new(
                        ConflictKind::DeleteConflict,
                        remote.entity_type,
                        &remote.id,
                        None,
                        None,
                        Some(remote.payload.clone()),
                        Some(remote.version),
                        crate::now_millis(),
                    );
                    let stored = self
                        .resolver
                        .record_with_strategy(
                            &self.store,
                            conflict,
                            settings.conflict_resolution_strategy,
                        )
                        .await?;
                    report.conflicts.push(stored);
                    Ok(false)
                } else {
                    self.store.store_remote(remote).await?;
                    Ok(true)
                }
            }
            Some(local) => {
                if local.version >= remote.version {
                    // Local already current or ahead
                    return Ok(false);
                }

                if local.sync_status == SyncStatus::Pending {
                    // Unsynced local edits: never overwrite
                    let conflict = SyncConflict::new(
                        ConflictKind::UpdateConflict,
                        remote.entity_type,
                        &remote.id,
                        Some(local.payload.clone()),
                        Some(local.version),
                        Some(remote.payload.clone()),
                        Some(remote.version),
                        crate::now_millis(),
                    );
                    let stored = self
                        .resolver
                        .record_with_strategy(
                            &self.store,
                            conflict,
                            settings.conflict_resolution_strategy,
                        )
                        .await?;
                    report.conflicts.push(stored);
                    Ok(false)
                } else {
                    self.store.store_remote(remote).await?;
                    Ok(true)
                }
            }
        }
    }

    /// Uploads one pending entity; returns true if it was acknowledged.
    async fn push_entity(
        &self,
        entity: SyncableEntity,
        settings: &SyncSettings,
        report: &mut SyncReport,
    ) -> SyncResult<bool> {
        let body = serde_json::to_value(&entity)?;
        let response = self
            .timed(
                settings.call_timeout(),
                Method::Post,
                "/sync/upload",
                Some(body),
            )
            .await?;

        if response.is_success() {
            let server_version = serde_json::from_value::<UploadAck>(response.body)
                .ok()
                .map(|ack| ack.version);
            self.store
                .acknowledge_upload(&entity.id, server_version)
                .await?;
            return Ok(true);
        }

        if response.status == 409 {
            // A misshapen 409 body is still a conflict; fall back to
            // treating the whole body as the remote payload
            let upload_conflict: UploadConflict = serde_json::from_value(response.body.clone())
                .unwrap_or(UploadConflict {
                    remote_data: response.body,
                });
            let (remote_payload, remote_version) = match upload_conflict.remote_entity() {
                Some(remote) => (remote.payload, Some(remote.version)),
                None => (upload_conflict.remote_data, None),
            };

            let conflict = SyncConflict::new(
                ConflictKind::UpdateConflict,
                entity.entity_type,
                &entity.id,
                Some(entity.payload.clone()),
                Some(entity.version),
                Some(remote_payload),
                remote_version,
                crate::now_millis(),
            );
            let stored = self
                .resolver
                .record_with_strategy(
                    &self.store,
                    conflict,
                    settings.conflict_resolution_strategy,
                )
                .await?;
            report.conflicts.push(stored);
            return Ok(false);
        }

        Err(SyncError::Http {
            status: response.status,
        })
    }

    /// Runs one transport call under the configured timeout.
    async fn timed(
        &self,
        timeout: Duration,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> SyncResult<crate::transport::HttpResponse> {
        match tokio::time::timeout(timeout, self.transport.request(method, path, body)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        }
    }

    async fn set_checkpoint(&self, now: i64) -> SyncResult<()> {
        let bytes = serde_json::to_vec(&now)?;
        self.backend.set(keys::CHECKPOINT, bytes).await?;
        *self.last_sync_time.write() = Some(now);
        Ok(())
    }
}
