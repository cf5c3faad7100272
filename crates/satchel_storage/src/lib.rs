//! # Satchel Storage
//!
//! Persisted key/value store trait and implementations for Satchel.
//!
//! This crate provides the lowest-level persistence abstraction for the
//! sync engine. Store backends are **opaque byte stores** - they do not
//! interpret the data they hold.
//!
//! ## Design Principles
//!
//! - Backends are simple async key/value stores (get, set, remove, keys)
//! - No knowledge of entities, queue items, or cache envelopes
//! - `set` is durable before it returns
//! - Must be `Send + Sync` for shared access
//!
//! ## Available Backends
//!
//! - [`MemoryStore`] - For testing and ephemeral engines
//! - [`FileStore`] - For persistent storage, one file per key

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StoreBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
