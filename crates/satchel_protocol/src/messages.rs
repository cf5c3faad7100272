//! Server wire types.
//!
//! The sync server speaks plain JSON over three endpoints:
//!
//! - `GET /sync/changes?since=<epoch_ms>` returns [`ChangesResponse`]
//! - `POST /sync/upload` returns [`UploadAck`] on 2xx or
//!   [`UploadConflict`] with HTTP 409
//! - `POST|PUT|DELETE /{entity_type}[/{entity_id}]` carries a raw payload
//!   for queue draining and has no typed response body

use crate::entity::SyncableEntity;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entities changed on the server since the requested checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Changed entities, full records.
    pub entities: Vec<SyncableEntity>,
}

/// Acknowledgment of a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAck {
    /// The server-assigned version of the uploaded entity.
    pub version: u64,
}

/// Body returned with HTTP 409 when an upload loses a version race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConflict {
    /// The server's current copy. Usually a full [`SyncableEntity`]
    /// record, but tolerated as any JSON value.
    pub remote_data: Value,
}

impl UploadConflict {
    /// Tries to view the remote data as a full entity record.
    #[must_use]
    pub fn remote_entity(&self) -> Option<SyncableEntity> {
        serde_json::from_value(self.remote_data.clone()).ok()
    }
}
