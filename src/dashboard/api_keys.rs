use std::sync::Arc;
use tracing::{info, warn};

use super::state::{AppState, DashboardEvent};
use crate::client::DashboardError;
use crate::notifications::AlertType;
use crate::types::{ApiCredentials, ApiKeyCredential, EntityId, Exchange, NewApiKey};

/// Asks the user to pick one of the available keys. Implementations block
/// until the user answers; `None` means the choice was cancelled.
pub trait KeyPrompt: Send + Sync {
    fn choose(&self, keys: &[ApiKeyCredential]) -> Option<EntityId>;
}

#[derive(Clone)]
pub struct ApiKeyManager {
    state: Arc<AppState>,
}

impl ApiKeyManager {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn list(&self) -> Vec<ApiKeyCredential> {
        match self.state.api.get_user_apikeys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to load API keys: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn exchanges(&self) -> Vec<Exchange> {
        match self.state.api.get_exchanges().await {
            Ok(exchanges) => exchanges,
            Err(e) => {
                warn!("Failed to load exchanges: {}", e);
                Vec::new()
            }
        }
    }

    /// Submits a new credential and returns the refreshed listing.
    pub async fn create(
        &self,
        exchange_id: EntityId,
        credentials: ApiCredentials,
    ) -> Result<Vec<ApiKeyCredential>, DashboardError> {
        if exchange_id.is_blank() || credentials.api_key.trim().is_empty() {
            let message = "exchange and api key are required";
            self.state.notifications.validation_failed("add API key", message).await;
            return Err(DashboardError::Validation(message.to_string()));
        }

        let request = NewApiKey {
            exchange_id,
            api_credentials: credentials,
        };
        if let Err(e) = self.state.api.save_user_apikey(&request).await {
            self.state
                .notifications
                .action_failed("add", "API key", &e)
                .await;
            return Err(e);
        }

        info!("API key added for exchange {}", request.exchange_id);
        Ok(self.list().await)
    }

    /// Deletes a credential. Instances that belong to it are left to the
    /// backend.
    pub async fn remove(&self, id: &EntityId) -> Result<(), DashboardError> {
        let _token = self.state.in_flight.acquire("api key", id)?;

        if let Err(e) = self.state.api.remove_user_apikey(id).await {
            self.state
                .notifications
                .action_failed("remove", format!("API key {}", id), &e)
                .await;
            return Err(e);
        }
        info!("API key {} removed", id);

        let mut active = self.state.active_key.write().await;
        if active.as_ref() == Some(id) {
            *active = None;
            self.state.store.clear_active_api_key()?;
            self.state.emit(DashboardEvent::ActiveKeyChanged(None));
        }
        Ok(())
    }

    /// Persists `id` as the active key and announces it.
    pub async fn select(&self, id: &EntityId) -> Result<(), DashboardError> {
        self.state.store.set_active_api_key(id)?;
        *self.state.active_key.write().await = Some(id.clone());

        self.state.emit(DashboardEvent::ActiveKeyChanged(Some(id.clone())));
        self.state
            .notifications
            .notify(AlertType::ApiKeySelected { id: id.to_string() })
            .await;
        Ok(())
    }

    pub async fn active(&self) -> Option<EntityId> {
        self.state.active_key().await
    }

    /// Returns the stored active key, or makes the user pick one before
    /// anything else loads.
    pub async fn resolve_active(&self, prompt: &dyn KeyPrompt) -> Result<EntityId, DashboardError> {
        if let Some(id) = self.state.store.active_api_key()? {
            info!("Using stored API key {}", id);
            *self.state.active_key.write().await = Some(id.clone());
            return Ok(id);
        }

        let keys = self.list().await;
        if keys.is_empty() {
            warn!("No API keys available to select");
            return Err(DashboardError::NoApiKey);
        }

        let chosen = prompt.choose(&keys).ok_or(DashboardError::NoApiKey)?;
        if !keys.iter().any(|key| key.id == chosen) {
            return Err(DashboardError::not_found("API key", &chosen));
        }
        self.select(&chosen).await?;
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockDashboardApi;
    use crate::dashboard::state::testing::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn key(id: i64) -> ApiKeyCredential {
        ApiKeyCredential {
            id: EntityId::from(id),
            exchange_id: Some(EntityId::from(1)),
            exchange_name: "Binance".to_string(),
            api_credentials: ApiCredentials {
                api_key: "abcd1234".to_string(),
                secret_key: "secret".to_string(),
                passphrase: None,
            },
            created_at: None,
        }
    }

    struct FixedPrompt {
        answer: Option<EntityId>,
        asked: AtomicUsize,
    }

    impl KeyPrompt for FixedPrompt {
        fn choose(&self, _keys: &[ApiKeyCredential]) -> Option<EntityId> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn prompt(answer: Option<i64>) -> FixedPrompt {
        FixedPrompt {
            answer: answer.map(EntityId::from),
            asked: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_stored_key_skips_the_prompt() {
        let mut api = MockDashboardApi::new();
        api.expect_get_user_apikeys().times(0);
        let state = state_with(api);
        state.store.set_active_api_key(&EntityId::from(9)).unwrap();

        let manager = ApiKeyManager::new(state);
        let prompt = prompt(Some(1));
        let id = manager.resolve_active(&prompt).await.unwrap();

        assert_eq!(id, EntityId::from(9));
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 0);
        assert_eq!(manager.active().await, Some(EntityId::from(9)));
    }

    #[tokio::test]
    async fn test_missing_key_blocks_on_the_prompt_and_persists_choice() {
        let mut api = MockDashboardApi::new();
        api.expect_get_user_apikeys()
            .times(1)
            .returning(|| Ok(vec![key(3), key(5)]));
        let state = state_with(api);
        let mut rx = state.subscribe();

        let manager = ApiKeyManager::new(state.clone());
        let prompt = prompt(Some(5));
        let id = manager.resolve_active(&prompt).await.unwrap();

        assert_eq!(id, EntityId::from(5));
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);
        assert_eq!(state.store.active_api_key().unwrap(), Some(EntityId::from(5)));
        assert_eq!(
            rx.recv().await.unwrap(),
            DashboardEvent::ActiveKeyChanged(Some(EntityId::from(5)))
        );
    }

    #[tokio::test]
    async fn test_cancelled_prompt_leaves_no_active_key() {
        let mut api = MockDashboardApi::new();
        api.expect_get_user_apikeys().returning(|| Ok(vec![key(3)]));
        let state = state_with(api);

        let manager = ApiKeyManager::new(state.clone());
        let result = manager.resolve_active(&prompt(None)).await;

        assert!(matches!(result, Err(DashboardError::NoApiKey)));
        assert!(state.store.active_api_key().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_relists_after_success() {
        let mut api = MockDashboardApi::new();
        api.expect_save_user_apikey()
            .withf(|request| request.exchange_id.to_string() == "2")
            .times(1)
            .returning(|_| Ok(()));
        api.expect_get_user_apikeys()
            .times(1)
            .returning(|| Ok(vec![key(3)]));
        let manager = ApiKeyManager::new(state_with(api));

        let credentials = ApiCredentials {
            api_key: "key".to_string(),
            secret_key: "secret".to_string(),
            passphrase: None,
        };
        let keys = assert_ok!(manager.create(EntityId::from(2), credentials).await);
        assert_eq!(keys.len(), 1);
    }

    #[tokio::test]
    async fn test_create_without_key_sends_nothing() {
        let mut api = MockDashboardApi::new();
        api.expect_save_user_apikey().times(0);
        let state = state_with(api);
        let manager = ApiKeyManager::new(state.clone());

        assert_err!(manager.create(EntityId::from(2), ApiCredentials::default()).await);
        assert_eq!(alert_count(&state).await, 1);
    }

    #[tokio::test]
    async fn test_removing_active_key_clears_selection() {
        let mut api = MockDashboardApi::new();
        api.expect_remove_user_apikey()
            .withf(|id| id.to_string() == "3")
            .times(1)
            .returning(|_| Ok(()));
        let state = state_with(api);
        let manager = ApiKeyManager::new(state.clone());
        manager.select(&EntityId::from(3)).await.unwrap();

        assert_ok!(manager.remove(&EntityId::from(3)).await);
        assert!(manager.active().await.is_none());
        assert!(state.store.active_api_key().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_remove_alerts_and_keeps_selection() {
        let mut api = MockDashboardApi::new();
        api.expect_remove_user_apikey().returning(|_| {
            Err(DashboardError::Rejected("key in use".to_string()))
        });
        let state = state_with(api);
        let manager = ApiKeyManager::new(state.clone());
        manager.select(&EntityId::from(3)).await.unwrap();

        assert_err!(manager.remove(&EntityId::from(3)).await);
        assert_eq!(manager.active().await, Some(EntityId::from(3)));
        assert_eq!(alert_count(&state).await, 1);
    }
}
