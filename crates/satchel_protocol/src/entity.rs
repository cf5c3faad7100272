//! Syncable entity records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// The closed set of entity types subject to synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A document endorsement.
    Endorsement,
    /// An application document.
    Document,
    /// A user profile.
    User,
    /// A recorded position statement.
    Position,
    /// An in-app notification.
    Notification,
}

impl EntityKind {
    /// All entity kinds, in declaration order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Endorsement,
        EntityKind::Document,
        EntityKind::User,
        EntityKind::Position,
        EntityKind::Notification,
    ];

    /// Returns the wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Endorsement => "endorsement",
            EntityKind::Document => "document",
            EntityKind::User => "user",
            EntityKind::Position => "position",
            EntityKind::Notification => "notification",
        }
    }

    /// Parses a wire name back into a kind.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronization state of a local entity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local changes exist that the server has not acknowledged.
    Pending,
    /// The entity is part of an in-flight upload.
    Syncing,
    /// Local and server copies agree.
    Synced,
    /// A divergence was detected and awaits resolution.
    Conflict,
    /// The last replication attempt failed terminally.
    Error,
}

/// The unit of synchronization.
///
/// A `SyncableEntity` wraps an opaque application payload with the version
/// and checksum bookkeeping the engine needs to reconcile local and remote
/// copies.
///
/// # Invariants
///
/// - `version` only increases; an accepted write increments it exactly once
/// - `checksum` is always the canonical checksum of `payload`
/// - `sync_status == Pending` is cleared only by upload acknowledgment or
///   by conflict resolution discarding the local copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncableEntity {
    /// Opaque unique id, stable across devices.
    pub id: String,
    /// Which kind of entity this is.
    pub entity_type: EntityKind,
    /// Opaque application data.
    pub payload: Value,
    /// Creation time, epoch millis.
    pub created_at: i64,
    /// Last local mutation time, epoch millis.
    pub updated_at: i64,
    /// Time of the last successful remote acknowledgment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<i64>,
    /// Current synchronization state.
    pub sync_status: SyncStatus,
    /// Device that last wrote this version.
    pub device_id: String,
    /// Monotonically increasing version counter.
    pub version: u64,
    /// Canonical checksum of `payload`.
    pub checksum: String,
}

impl SyncableEntity {
    /// Creates a fresh local entity at version 1, pending upload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized for the
    /// checksum.
    pub fn create(
        entity_type: EntityKind,
        id: impl Into<String>,
        payload: Value,
        device_id: impl Into<String>,
        now: i64,
    ) -> serde_json::Result<Self> {
        let checksum = payload_checksum(&payload)?;
        Ok(Self {
            id: id.into(),
            entity_type,
            payload,
            created_at: now,
            updated_at: now,
            last_synced: None,
            sync_status: SyncStatus::Pending,
            device_id: device_id.into(),
            version: 1,
            checksum,
        })
    }

    /// Applies a local mutation: new payload, bumped version, pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized for the
    /// checksum.
    pub fn apply_local_update(
        &mut self,
        payload: Value,
        device_id: impl Into<String>,
        now: i64,
    ) -> serde_json::Result<()> {
        self.checksum = payload_checksum(&payload)?;
        self.payload = payload;
        self.device_id = device_id.into();
        self.updated_at = self.updated_at.max(now);
        self.version += 1;
        self.sync_status = SyncStatus::Pending;
        Ok(())
    }

    /// Returns true if a write at `incoming` would be accepted.
    ///
    /// A write that would replay an equal-or-lower version is stale.
    #[must_use]
    pub fn accepts_version(&self, incoming: u64) -> bool {
        incoming > self.version
    }

    /// Records a successful upload acknowledgment.
    ///
    /// Adopts the server-assigned version when one is returned.
    pub fn mark_synced(&mut self, server_version: Option<u64>, now: i64) {
        if let Some(v) = server_version {
            self.version = self.version.max(v);
        }
        self.sync_status = SyncStatus::Synced;
        self.last_synced = Some(now);
    }

    /// Returns true if the payload no longer matches the stored checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn payload_drifted(&self) -> serde_json::Result<bool> {
        Ok(payload_checksum(&self.payload)? != self.checksum)
    }
}

/// Computes the canonical checksum of a payload.
///
/// `serde_json` maps are ordered by key, so serializing a [`Value`] yields
/// a canonical byte sequence regardless of how the payload was assembled.
/// The checksum is the lowercase hex SHA-256 of that sequence.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized.
pub fn payload_checksum(payload: &Value) -> serde_json::Result<String> {
    let bytes = serde_json::to_vec(payload)?;
    let digest = Sha256::digest(&bytes);
    Ok(to_hex(&digest))
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn kind_names_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("dashboard"), None);
    }

    #[test]
    fn create_starts_at_version_one_pending() {
        let entity = SyncableEntity::create(
            EntityKind::Document,
            "doc-1",
            json!({"title": "Affidavit"}),
            "device-a",
            1_000,
        )
        .unwrap();

        assert_eq!(entity.version, 1);
        assert_eq!(entity.sync_status, SyncStatus::Pending);
        assert_eq!(entity.last_synced, None);
        assert_eq!(entity.checksum, payload_checksum(&entity.payload).unwrap());
    }

    #[test]
    fn local_update_bumps_version_and_checksum() {
        let mut entity = SyncableEntity::create(
            EntityKind::Document,
            "doc-1",
            json!({"title": "v1"}),
            "device-a",
            1_000,
        )
        .unwrap();
        entity.mark_synced(None, 1_500);

        entity
            .apply_local_update(json!({"title": "v2"}), "device-a", 2_000)
            .unwrap();

        assert_eq!(entity.version, 2);
        assert_eq!(entity.sync_status, SyncStatus::Pending);
        assert_eq!(entity.updated_at, 2_000);
        assert!(!entity.payload_drifted().unwrap());
    }

    #[test]
    fn stale_versions_rejected() {
        let mut entity = SyncableEntity::create(
            EntityKind::User,
            "u-1",
            json!({"name": "a"}),
            "device-a",
            0,
        )
        .unwrap();
        entity.apply_local_update(json!({"name": "b"}), "device-a", 1).unwrap();

        assert!(!entity.accepts_version(1));
        assert!(!entity.accepts_version(2));
        assert!(entity.accepts_version(3));
    }

    #[test]
    fn mark_synced_adopts_server_version() {
        let mut entity = SyncableEntity::create(
            EntityKind::Position,
            "p-1",
            json!({"claim": "x"}),
            "device-a",
            0,
        )
        .unwrap();

        entity.mark_synced(Some(7), 99);
        assert_eq!(entity.version, 7);
        assert_eq!(entity.sync_status, SyncStatus::Synced);
        assert_eq!(entity.last_synced, Some(99));

        // A lower server version never rewinds the counter
        entity.mark_synced(Some(3), 120);
        assert_eq!(entity.version, 7);
    }

    #[test]
    fn checksum_ignores_insertion_order() {
        let a = json!({"b": 2, "a": 1});
        let mut map = serde_json::Map::new();
        map.insert("a".into(), json!(1));
        map.insert("b".into(), json!(2));
        let b = Value::Object(map);

        assert_eq!(
            payload_checksum(&a).unwrap(),
            payload_checksum(&b).unwrap()
        );
    }

    #[test]
    fn wire_names_are_snake_case() {
        let entity = SyncableEntity::create(
            EntityKind::Notification,
            "n-1",
            json!({"body": "hi"}),
            "device-a",
            5,
        )
        .unwrap();

        let wire = serde_json::to_value(&entity).unwrap();
        assert_eq!(wire["entity_type"], "notification");
        assert_eq!(wire["sync_status"], "pending");
        assert!(wire.get("last_synced").is_none());
    }

    proptest! {
        #[test]
        fn checksum_stable_across_insertion_order(
            keys in proptest::collection::btree_set("[a-z]{1,8}", 1..8),
            values in proptest::collection::vec(0i64..1000, 8),
        ) {
            let pairs: Vec<(&String, &i64)> = keys.iter().zip(values.iter()).collect();

            let mut forward = serde_json::Map::new();
            for (k, v) in &pairs {
                forward.insert((*k).clone(), json!(v));
            }
            let mut reverse = serde_json::Map::new();
            for (k, v) in pairs.iter().rev() {
                reverse.insert((*k).clone(), json!(v));
            }

            prop_assert_eq!(
                payload_checksum(&Value::Object(forward)).unwrap(),
                payload_checksum(&Value::Object(reverse)).unwrap()
            );
        }
    }
}
