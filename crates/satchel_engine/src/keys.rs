//! Persisted key namespaces.

pub(crate) const ENTITY_PREFIX: &str = "entity:";
pub(crate) const CACHE_PREFIX: &str = "cache:";
pub(crate) const QUEUE: &str = "queue";
pub(crate) const CONFLICTS: &str = "conflicts";
pub(crate) const SETTINGS: &str = "settings";
pub(crate) const CHECKPOINT: &str = "checkpoint";
pub(crate) const DEVICE_ID: &str = "device_id";

pub(crate) fn entity(id: &str) -> String {
    format!("{ENTITY_PREFIX}{id}")
}

pub(crate) fn cache(key: &str) -> String {
    format!("{CACHE_PREFIX}{key}")
}
