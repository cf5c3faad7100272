//! Device identity.

use crate::error::SyncResult;
use crate::keys;
use satchel_storage::StoreBackend;
use uuid::Uuid;

/// Returns this device's stable id, generating and persisting one on first
/// use.
///
/// The id marks which device last wrote each entity version, so it must
/// never change once assigned.
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn device_id(backend: &dyn StoreBackend) -> SyncResult<String> {
    if let Some(bytes) = backend.get(keys::DEVICE_ID).await? {
        if let Ok(id) = String::from_utf8(bytes) {
            if !id.is_empty() {
                return Ok(id);
            }
        }
    }

    let id = Uuid::new_v4().to_string();
    backend.set(keys::DEVICE_ID, id.clone().into_bytes()).await?;
    Ok(id)
}
