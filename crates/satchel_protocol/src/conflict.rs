//! Conflict records and resolution policies.

use crate::entity::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How local and remote state diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides updated the same entity.
    UpdateConflict,
    /// One side deleted an entity the other side changed.
    DeleteConflict,
    /// Both sides created the same id independently.
    CreateConflict,
}

/// An explicit decision applied to a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the local payload and re-upload it.
    KeepLocal,
    /// Overwrite local state with the remote payload.
    KeepRemote,
    /// Apply an externally produced merged payload.
    Merge,
    /// Recorded as manually handled outside the engine.
    Manual,
}

/// Policy that decides whether conflicts resolve automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Conflicts stay queued until an explicit resolution call.
    AskUser,
    /// Auto-resolve by keeping the local copy.
    KeepLocal,
    /// Auto-resolve by accepting the remote copy.
    KeepRemote,
    /// Auto-merge via a registered per-kind merge function.
    MergeSmart,
}

impl ResolutionStrategy {
    /// Returns true if this strategy resolves conflicts without a user.
    #[must_use]
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ResolutionStrategy::AskUser)
    }

    /// The resolution this strategy applies, if it applies one.
    #[must_use]
    pub fn resolution(&self) -> Option<ConflictResolution> {
        match self {
            ResolutionStrategy::AskUser => None,
            ResolutionStrategy::KeepLocal => Some(ConflictResolution::KeepLocal),
            ResolutionStrategy::KeepRemote => Some(ConflictResolution::KeepRemote),
            ResolutionStrategy::MergeSmart => Some(ConflictResolution::Merge),
        }
    }
}

/// A detected divergence between local and remote state.
///
/// Conflicts are queued, never auto-discarded; resolution is an explicit,
/// auditable act that fills in `resolution` and `resolved_at`. Both payloads
/// are retained verbatim so no information is lost while the conflict is
/// pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Unique conflict id.
    pub id: String,
    /// The diverged entity.
    pub entity_id: String,
    /// The entity's type.
    pub entity_type: EntityKind,
    /// Local payload at detection time; absent when locally deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_data: Option<Value>,
    /// Remote payload at detection time; absent when remotely deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_data: Option<Value>,
    /// Local version at detection time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_version: Option<u64>,
    /// Remote version at detection time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<u64>,
    /// How the divergence happened.
    pub conflict_type: ConflictKind,
    /// Detection time, epoch millis.
    pub detected_at: i64,
    /// The decision applied, once one has been.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
    /// When the decision was applied, epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
}

impl SyncConflict {
    /// Creates a new unresolved conflict.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conflict_type: ConflictKind,
        entity_type: EntityKind,
        entity_id: impl Into<String>,
        local_data: Option<Value>,
        local_version: Option<u64>,
        remote_data: Option<Value>,
        remote_version: Option<u64>,
        now: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_id: entity_id.into(),
            entity_type,
            local_data,
            remote_data,
            local_version,
            remote_version,
            conflict_type,
            detected_at: now,
            resolution: None,
            resolved_at: None,
        }
    }

    /// Returns true if a decision has been applied.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Applies a decision.
    pub fn resolve(&mut self, resolution: ConflictResolution, now: i64) {
        self.resolution = Some(resolution);
        self.resolved_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strategies_resolve_as_expected() {
        assert!(!ResolutionStrategy::AskUser.auto_resolves());
        assert_eq!(ResolutionStrategy::AskUser.resolution(), None);

        assert_eq!(
            ResolutionStrategy::KeepLocal.resolution(),
            Some(ConflictResolution::KeepLocal)
        );
        assert_eq!(
            ResolutionStrategy::KeepRemote.resolution(),
            Some(ConflictResolution::KeepRemote)
        );
        assert_eq!(
            ResolutionStrategy::MergeSmart.resolution(),
            Some(ConflictResolution::Merge)
        );
    }

    #[test]
    fn conflict_retains_both_payloads() {
        let conflict = SyncConflict::new(
            ConflictKind::UpdateConflict,
            EntityKind::Document,
            "doc-1",
            Some(json!({"title": "local"})),
            Some(2),
            Some(json!({"title": "remote"})),
            Some(3),
            1_000,
        );

        assert!(!conflict.is_resolved());
        assert_eq!(conflict.local_data, Some(json!({"title": "local"})));
        assert_eq!(conflict.remote_data, Some(json!({"title": "remote"})));
        assert_eq!(conflict.local_version, Some(2));
        assert_eq!(conflict.remote_version, Some(3));
    }

    #[test]
    fn resolve_stamps_decision_and_time() {
        let mut conflict = SyncConflict::new(
            ConflictKind::DeleteConflict,
            EntityKind::Position,
            "p-1",
            None,
            None,
            Some(json!({"claim": "remote"})),
            Some(4),
            500,
        );

        conflict.resolve(ConflictResolution::KeepRemote, 900);
        assert!(conflict.is_resolved());
        assert_eq!(conflict.resolution, Some(ConflictResolution::KeepRemote));
        assert_eq!(conflict.resolved_at, Some(900));
    }

    #[test]
    fn wire_shape_is_snake_case() {
        let conflict = SyncConflict::new(
            ConflictKind::CreateConflict,
            EntityKind::User,
            "u-1",
            Some(json!({})),
            Some(1),
            Some(json!({})),
            Some(1),
            0,
        );

        let wire = serde_json::to_value(&conflict).unwrap();
        assert_eq!(wire["conflict_type"], "create_conflict");
        assert!(wire.get("resolution").is_none());
        assert!(wire.get("resolved_at").is_none());
    }
}
