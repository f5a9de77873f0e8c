use std::path::Path;
use tracing::{debug, info};

use crate::client::DashboardError;
use crate::types::EntityId;

/// Fixed key under which the active API-key id is persisted.
pub const ACTIVE_API_KEY: &str = "selectedApiKeyId";

/// Durable client-local state, the counterpart of a browser's local storage.
/// Reads and writes are synchronous.
#[derive(Clone)]
pub struct LocalStore {
    db: sled::Db,
}

impl LocalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DashboardError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        info!("Local store opened at {}", path.display());
        Ok(Self { db })
    }

    /// In-memory store that disappears on drop.
    #[cfg(test)]
    pub fn temporary() -> Result<Self, DashboardError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, DashboardError> {
        Ok(self
            .db
            .get(key)?
            .map(|value| String::from_utf8_lossy(&value).into_owned()))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), DashboardError> {
        self.db.insert(key, value.as_bytes())?;
        self.db.flush()?;
        debug!("Stored {}", key);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), DashboardError> {
        self.db.remove(key)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn active_api_key(&self) -> Result<Option<EntityId>, DashboardError> {
        Ok(self
            .get(ACTIVE_API_KEY)?
            .filter(|raw| !raw.trim().is_empty())
            .map(EntityId::from))
    }

    pub fn set_active_api_key(&self, id: &EntityId) -> Result<(), DashboardError> {
        self.set(ACTIVE_API_KEY, &id.to_string())
    }

    pub fn clear_active_api_key(&self) -> Result<(), DashboardError> {
        self.remove(ACTIVE_API_KEY)
    }
}
