//! # Satchel Engine
//!
//! Offline-first entity synchronization engine for mobile clients.
//!
//! The engine keeps an application fully usable while disconnected -
//! reads, creates, updates, and deletes all run against a local versioned
//! store - then reconciles with the server once connectivity returns.
//!
//! This crate provides:
//! - Versioned, checksummed entity CRUD over a persisted key/value store
//! - A durable offline queue that replays mutations in order
//! - A sync cycle state machine (pull, apply, push, drain, checkpoint)
//! - Conflict detection with explicit, auditable resolution
//! - A TTL- and tag-addressable bounded cache
//! - Network monitoring with edge-triggered reconnect events
//! - Automatic scheduling on a periodic timer and on reconnect
//!
//! ## Architecture
//!
//! One cycle runs **pull-then-push**:
//! 1. Pull entities changed on the server since the last checkpoint
//! 2. Apply them locally, routing divergences to the conflict queue
//! 3. Push locally pending entities
//! 4. Drain the offline queue, one item at a time
//! 5. Advance the checkpoint, unless a fatal error poisoned the cycle
//!
//! ## Key Invariants
//!
//! - At most one cycle in flight; concurrent triggers fail fast with
//!   [`SyncError::Busy`]
//! - Entity versions only increase; stale writes are rejected
//! - Unsynced local edits are never overwritten by a pull
//! - Conflicts are recorded, never silently discarded
//! - Mutations are durable before their call returns and never wait on a
//!   running cycle
//!
//! ## Construction
//!
//! Collaborators - the persisted store, the HTTP transport, and the
//! network monitor - are injected at [`SyncEngine::open`] time, so tests
//! substitute in-memory fakes and no global state exists:
//!
//! ```no_run
//! use satchel_engine::{NetworkMonitor, SyncEngine, SyncScheduler};
//! use satchel_storage::FileStore;
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn satchel_engine::HttpTransport>) -> satchel_engine::SyncResult<()> {
//! let backend = Arc::new(FileStore::open("/data/satchel").await?);
//! let monitor = Arc::new(NetworkMonitor::new());
//! let engine = SyncEngine::open(backend, transport, Arc::clone(&monitor)).await?;
//! let scheduler = SyncScheduler::spawn(Arc::clone(&engine));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod device;
mod engine;
mod error;
mod keys;
mod network;
mod queue;
mod resolver;
mod scheduler;
mod store;
mod transport;

pub use cache::{CacheEntry, CacheManager, CacheStats};
pub use config::{RetryConfig, SyncSettings};
pub use device::device_id;
pub use engine::{SyncEngine, SyncIssue, SyncReport, SyncStats};
pub use error::{SyncError, SyncResult};
pub use network::{
    CellularGeneration, ConnectionQuality, ConnectionType, LinkSnapshot, LinkTransport,
    NetworkMonitor, NetworkStatus,
};
pub use queue::{OfflineQueue, QueueOutcome};
pub use resolver::{ConflictResolver, MergeFn};
pub use scheduler::SyncScheduler;
pub use store::EntityStore;
pub use transport::{HttpResponse, HttpTransport, Method, MockTransport, RecordedRequest};

/// Current time as epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
