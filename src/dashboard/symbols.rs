use std::sync::Arc;
use tracing::{info, warn};

use super::state::AppState;

/// Tradable symbols, fetched once per session.
#[derive(Clone)]
pub struct SymbolStore {
    state: Arc<AppState>,
}

impl SymbolStore {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Replaces the cache with the backend list. On failure the previous
    /// cache is kept as is.
    pub async fn load(&self) -> Vec<String> {
        match self.state.api.get_symbols().await {
            Ok(symbols) => {
                info!("Loaded {} symbols", symbols.len());
                *self.state.symbols.write().await = symbols.clone();
                symbols
            }
            Err(e) => {
                warn!("Failed to load symbols: {}", e);
                self.get().await
            }
        }
    }

    pub async fn get(&self) -> Vec<String> {
        self.state.symbols().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DashboardError, MockDashboardApi};
    use crate::dashboard::state::testing::*;

    #[tokio::test]
    async fn test_load_replaces_cache_in_backend_order() {
        let mut api = MockDashboardApi::new();
        api.expect_get_symbols()
            .times(1)
            .returning(|| Ok(vec!["ETHUSDT".to_string(), "BTCUSDT".to_string()]));
        let state = state_with(api);
        seed_symbols(&state, &["OLD"]).await;

        let store = SymbolStore::new(state);
        store.load().await;

        assert_eq!(store.get().await, vec!["ETHUSDT", "BTCUSDT"]);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_cache_without_alert() {
        let mut api = MockDashboardApi::new();
        api.expect_get_symbols().times(1).returning(|| {
            Err(DashboardError::Http {
                status: 500,
                message: "boom".to_string(),
            })
        });
        let state = state_with(api);
        seed_symbols(&state, &["BTCUSDT"]).await;

        let store = SymbolStore::new(state.clone());
        assert_eq!(store.load().await, vec!["BTCUSDT"]);
        assert_eq!(store.get().await, vec!["BTCUSDT"]);
        assert_eq!(alert_count(&state).await, 0);
    }
}
