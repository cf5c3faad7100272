//! # Satchel Protocol
//!
//! Data model and server wire types for Satchel.
//!
//! This crate defines the records the sync engine persists and exchanges:
//! versioned, checksummed entities; offline queue items with retry
//! bookkeeping; conflict records with resolution policies; and the JSON
//! bodies of the sync server's endpoints.
//!
//! ## Key Invariants
//!
//! - An entity's `version` only increases; stale writes are rejected
//! - A `pending` entity holds local changes the server has not acknowledged
//! - Conflicts retain both payloads verbatim until explicitly resolved
//! - Checksums are computed over canonical (key-ordered) JSON

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod messages;
mod queue;

pub use conflict::{ConflictKind, ConflictResolution, ResolutionStrategy, SyncConflict};
pub use entity::{payload_checksum, EntityKind, SyncStatus, SyncableEntity};
pub use messages::{ChangesResponse, UploadAck, UploadConflict};
pub use queue::{OfflineQueueItem, QueueItemStatus, QueueOperation};
