//! Configuration for the sync engine.

use crate::error::SyncResult;
use crate::keys;
use satchel_protocol::ResolutionStrategy;
use satchel_storage::StoreBackend;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shared, runtime-mutable settings handle.
pub(crate) type SettingsHandle = std::sync::Arc<parking_lot::RwLock<SyncSettings>>;

/// User-facing synchronization settings.
///
/// Loaded once at startup, mutable at runtime through the engine, and
/// persisted on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Whether the scheduler triggers cycles automatically.
    pub auto_sync_enabled: bool,
    /// Minutes between automatic sync cycles.
    pub sync_interval_minutes: u64,
    /// Restrict syncing to wifi connections.
    pub wifi_only: bool,
    /// Byte budget for the local cache, in megabytes.
    pub max_offline_storage_mb: u64,
    /// How conflicts are resolved when detected.
    pub conflict_resolution_strategy: ResolutionStrategy,
    /// Attempts allowed per offline queue item.
    pub max_retry_attempts: u32,
    /// Per-network-call timeout, in seconds.
    pub sync_timeout_seconds: u64,
}

impl SyncSettings {
    /// Sets automatic syncing on or off.
    pub fn with_auto_sync(mut self, enabled: bool) -> Self {
        self.auto_sync_enabled = enabled;
        self
    }

    /// Sets the automatic sync interval.
    pub fn with_sync_interval_minutes(mut self, minutes: u64) -> Self {
        self.sync_interval_minutes = minutes;
        self
    }

    /// Restricts syncing to wifi connections.
    pub fn with_wifi_only(mut self, wifi_only: bool) -> Self {
        self.wifi_only = wifi_only;
        self
    }

    /// Sets the cache byte budget in megabytes.
    pub fn with_max_offline_storage_mb(mut self, mb: u64) -> Self {
        self.max_offline_storage_mb = mb;
        self
    }

    /// Sets the conflict resolution strategy.
    pub fn with_conflict_resolution(mut self, strategy: ResolutionStrategy) -> Self {
        self.conflict_resolution_strategy = strategy;
        self
    }

    /// Sets the retry budget for offline queue items.
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Sets the per-call network timeout.
    pub fn with_sync_timeout_seconds(mut self, seconds: u64) -> Self {
        self.sync_timeout_seconds = seconds;
        self
    }

    /// The per-call network timeout as a [`Duration`].
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_seconds)
    }

    /// Loads settings from the store, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails; a missing or unreadable record
    /// yields the defaults rather than an error.
    pub async fn load(backend: &dyn StoreBackend) -> SyncResult<Self> {
        match backend.get(keys::SETTINGS).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
            None => Ok(Self::default()),
        }
    }

    /// Persists these settings to the store.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the store write fails.
    pub async fn persist(&self, backend: &dyn StoreBackend) -> SyncResult<()> {
        let bytes = serde_json::to_vec(self)?;
        backend.set(keys::SETTINGS, bytes).await?;
        Ok(())
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync_enabled: true,
            sync_interval_minutes: 15,
            wifi_only: false,
            max_offline_storage_mb: 50,
            conflict_resolution_strategy: ResolutionStrategy::AskUser,
            max_retry_attempts: 3,
            sync_timeout_seconds: 30,
        }
    }
}

/// Pacing for retries of failed queue items.
///
/// Retries happen across sync cycles, never tight-looped within one pass: a
/// failed item carries a `next_retry_at` deadline computed from this
/// configuration and is skipped until the deadline passes.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Initial delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates the standard backoff configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// A configuration with no delays, for tests that drive retries fast.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculates the delay after a given attempt count (1-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple deterministic "jitter" (no external RNG dependency).
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
