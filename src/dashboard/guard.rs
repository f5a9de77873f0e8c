use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::client::DashboardError;
use crate::types::EntityId;

/// Allows one outstanding mutating request per entity. A second request for
/// the same entity is rejected with [`DashboardError::Busy`] until the token
/// of the first one is dropped.
#[derive(Debug, Default)]
pub struct InFlightGuard {
    active: Mutex<HashSet<(&'static str, EntityId)>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, kind: &'static str, id: &EntityId) -> Result<InFlightToken<'_>, DashboardError> {
        let key = (kind, id.clone());
        if !self.lock().insert(key.clone()) {
            warn!("Ignoring duplicate request for {} {}", kind, id);
            return Err(DashboardError::Busy(id.clone()));
        }
        Ok(InFlightToken { guard: self, key })
    }

    pub fn is_busy(&self, kind: &'static str, id: &EntityId) -> bool {
        self.lock().contains(&(kind, id.clone()))
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<(&'static str, EntityId)>> {
        // the set stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases its entity when dropped, whether the request succeeded or not.
#[derive(Debug)]
pub struct InFlightToken<'a> {
    guard: &'a InFlightGuard,
    key: (&'static str, EntityId),
}

impl Drop for InFlightToken<'_> {
    fn drop(&mut self) {
        self.guard.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_request_is_rejected_until_release() {
        let guard = InFlightGuard::new();
        let id = EntityId::from(7);

        let token = guard.acquire("strategy", &id).unwrap();
        assert!(guard.is_busy("strategy", &id));
        assert!(matches!(guard.acquire("strategy", &id), Err(DashboardError::Busy(_))));

        drop(token);
        assert!(!guard.is_busy("strategy", &id));
        assert!(guard.acquire("strategy", &id).is_ok());
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let guard = InFlightGuard::new();
        let id = EntityId::from(4);

        let _instance = guard.acquire("instance", &id).unwrap();
        assert!(guard.acquire("strategy", &id).is_ok());
    }
}
