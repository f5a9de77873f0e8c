use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::state::{AppState, DashboardEvent};
use crate::client::DashboardError;
use crate::types::{EntityId, Indicator, Side};

#[derive(Debug, Clone, PartialEq)]
pub struct BufferedIndicator {
    pub indicator: Indicator,
    /// Loaded from the backend rather than added in this popup.
    pub persisted: bool,
}

/// Uncommitted state of one indicator popup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorBuffer {
    pub items: Vec<BufferedIndicator>,
    pub pending_deletions: Vec<EntityId>,
}

impl IndicatorBuffer {
    pub fn indicators(&self) -> Vec<Indicator> {
        self.items.iter().map(|item| item.indicator.clone()).collect()
    }
}

#[derive(Clone)]
pub struct IndicatorManager {
    state: Arc<AppState>,
}

impl IndicatorManager {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Loads the indicators of one strategy side into a fresh buffer,
    /// discarding whatever that popup held before.
    pub async fn open(&self, strategy_id: &EntityId, side: Side) -> Vec<Indicator> {
        let loaded = match self.state.api.get_indicators(strategy_id, side).await {
            Ok(indicators) => indicators,
            Err(e) => {
                warn!("Failed to load {} indicators of strategy {}: {}", side, strategy_id, e);
                Vec::new()
            }
        };

        let buffer = IndicatorBuffer {
            items: loaded
                .iter()
                .cloned()
                .map(|indicator| BufferedIndicator {
                    indicator,
                    persisted: true,
                })
                .collect(),
            pending_deletions: Vec::new(),
        };
        self.state
            .popups
            .write()
            .await
            .insert((strategy_id.clone(), side), buffer);
        loaded
    }

    pub async fn buffer(&self, strategy_id: &EntityId, side: Side) -> Option<IndicatorBuffer> {
        self.state
            .popups
            .read()
            .await
            .get(&(strategy_id.clone(), side))
            .cloned()
    }

    /// Appends a draft indicator to the open popup.
    pub async fn add(&self, strategy_id: &EntityId, side: Side) -> Result<Indicator, DashboardError> {
        let indicator = Indicator::draft(strategy_id.clone(), side);
        self.with_buffer(strategy_id, side, |buffer| {
            buffer.items.push(BufferedIndicator {
                indicator: indicator.clone(),
                persisted: false,
            });
            Ok(())
        })
        .await?;
        Ok(indicator)
    }

    /// Drafts vanish silently; saved indicators are queued for deletion.
    pub async fn remove(&self, strategy_id: &EntityId, side: Side, indicator_id: &EntityId) -> Result<(), DashboardError> {
        self.with_buffer(strategy_id, side, |buffer| {
            let index = buffer
                .items
                .iter()
                .position(|item| &item.indicator.id == indicator_id)
                .ok_or_else(|| DashboardError::not_found("indicator", indicator_id))?;

            let removed = buffer.items.remove(index);
            if removed.persisted {
                buffer.pending_deletions.push(removed.indicator.id);
            }
            Ok(())
        })
        .await
    }

    pub async fn set_mandatory(
        &self,
        strategy_id: &EntityId,
        side: Side,
        indicator_id: &EntityId,
        mandatory: bool,
    ) -> Result<(), DashboardError> {
        self.with_buffer(strategy_id, side, |buffer| {
            let item = buffer
                .items
                .iter_mut()
                .find(|item| &item.indicator.id == indicator_id)
                .ok_or_else(|| DashboardError::not_found("indicator", indicator_id))?;
            item.indicator.mandatory = mandatory;
            Ok(())
        })
        .await
    }

    pub async fn close(&self, strategy_id: &EntityId, side: Side) {
        self.state.popups.write().await.remove(&(strategy_id.clone(), side));
    }

    /// Sends queued deletions, then upserts what is left, then closes the
    /// popup. Each request is skipped when it has nothing to carry.
    ///
    /// Deletions are dropped from the buffer as soon as the backend confirms
    /// them, so after a failed upsert a retry only repeats the upsert.
    pub async fn save(&self, strategy_id: &EntityId, side: Side) -> Result<(), DashboardError> {
        let key = (strategy_id.clone(), side);
        let buffer = self
            .buffer(strategy_id, side)
            .await
            .ok_or_else(|| DashboardError::not_found("indicator popup", strategy_id))?;
        let kind = match side {
            Side::Buy => "buy indicators",
            Side::Sell => "sell indicators",
        };
        let _token = self.state.in_flight.acquire(kind, strategy_id)?;

        if !buffer.pending_deletions.is_empty() {
            if let Err(e) = self.state.api.remove_indicators(&buffer.pending_deletions).await {
                return Err(self.fail("remove", strategy_id, side, e).await);
            }
            debug!("Removed {} indicators of strategy {}", buffer.pending_deletions.len(), strategy_id);
            if let Some(open) = self.state.popups.write().await.get_mut(&key) {
                open.pending_deletions.retain(|id| !buffer.pending_deletions.contains(id));
            }
        }

        let indicators = buffer.indicators();
        if !indicators.is_empty() {
            if let Err(e) = self.state.api.save_indicators(&indicators).await {
                return Err(self.fail("save", strategy_id, side, e).await);
            }
        }

        self.state.popups.write().await.remove(&key);
        info!("Saved {} {} indicators of strategy {}", indicators.len(), side, strategy_id);
        self.state.emit(DashboardEvent::IndicatorsSaved {
            strategy_id: strategy_id.clone(),
            side,
        });
        Ok(())
    }

    async fn fail(&self, action: &str, strategy_id: &EntityId, side: Side, e: DashboardError) -> DashboardError {
        error!("Failed to {} {} indicators of strategy {}: {}", action, side, strategy_id, e.user_message());
        self.state
            .notifications
            .action_failed(action, format!("{} indicators of strategy {}", side, strategy_id), &e)
            .await;
        e
    }

    async fn with_buffer<T>(
        &self,
        strategy_id: &EntityId,
        side: Side,
        change: impl FnOnce(&mut IndicatorBuffer) -> Result<T, DashboardError>,
    ) -> Result<T, DashboardError> {
        let mut popups = self.state.popups.write().await;
        let buffer = popups
            .get_mut(&(strategy_id.clone(), side))
            .ok_or_else(|| DashboardError::not_found("indicator popup", strategy_id))?;
        change(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockDashboardApi;
    use crate::dashboard::state::testing::*;
    use tokio_test::{assert_err, assert_ok};

    fn saved(id: i64, strategy: i64, side: Side) -> Indicator {
        Indicator {
            id: EntityId::from(id),
            strategy_id: EntityId::from(strategy),
            side,
            mandatory: true,
        }
    }

    fn api_with_loaded(loaded: Vec<Indicator>) -> MockDashboardApi {
        let mut api = MockDashboardApi::new();
        api.expect_get_indicators()
            .returning(move |_, _| Ok(loaded.clone()));
        api
    }

    #[tokio::test]
    async fn test_empty_save_sends_nothing() {
        let mut api = api_with_loaded(Vec::new());
        api.expect_remove_indicators().times(0);
        api.expect_save_indicators().times(0);
        let manager = IndicatorManager::new(state_with(api));
        let strategy = EntityId::from(7);

        manager.open(&strategy, Side::Buy).await;
        assert_ok!(manager.save(&strategy, Side::Buy).await);
        assert!(manager.buffer(&strategy, Side::Buy).await.is_none());
    }

    #[tokio::test]
    async fn test_draft_removal_is_silent() {
        let mut api = api_with_loaded(Vec::new());
        api.expect_remove_indicators().times(0);
        api.expect_save_indicators().times(0);
        let manager = IndicatorManager::new(state_with(api));
        let strategy = EntityId::from(7);

        manager.open(&strategy, Side::Sell).await;
        let draft = manager.add(&strategy, Side::Sell).await.unwrap();
        assert!(!draft.mandatory);
        manager.remove(&strategy, Side::Sell, &draft.id).await.unwrap();

        let buffer = manager.buffer(&strategy, Side::Sell).await.unwrap();
        assert!(buffer.items.is_empty() && buffer.pending_deletions.is_empty());
        assert_ok!(manager.save(&strategy, Side::Sell).await);
    }

    #[tokio::test]
    async fn test_deletions_then_upsert_in_one_request_each() {
        let mut api = api_with_loaded(vec![saved(1, 7, Side::Buy), saved(2, 7, Side::Buy)]);
        let mut seq = mockall::Sequence::new();
        api.expect_remove_indicators()
            .withf(|ids| ids.len() == 1 && ids[0].to_string() == "1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        api.expect_save_indicators()
            .withf(|items| items.len() == 2 && items.iter().any(|i| i.id.to_string() == "2" && !i.mandatory))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let state = state_with(api);
        let mut rx = state.subscribe();
        let manager = IndicatorManager::new(state);
        let strategy = EntityId::from(7);

        manager.open(&strategy, Side::Buy).await;
        manager.remove(&strategy, Side::Buy, &EntityId::from(1)).await.unwrap();
        manager
            .set_mandatory(&strategy, Side::Buy, &EntityId::from(2), false)
            .await
            .unwrap();
        manager.add(&strategy, Side::Buy).await.unwrap();

        assert_ok!(manager.save(&strategy, Side::Buy).await);
        assert!(manager.buffer(&strategy, Side::Buy).await.is_none());
        assert_eq!(
            rx.recv().await.unwrap(),
            DashboardEvent::IndicatorsSaved {
                strategy_id: strategy.clone(),
                side: Side::Buy,
            }
        );
    }

    #[tokio::test]
    async fn test_failed_upsert_keeps_buffer_for_retry() {
        let mut api = api_with_loaded(vec![saved(1, 7, Side::Buy), saved(2, 7, Side::Buy)]);
        api.expect_remove_indicators().times(1).returning(|_| Ok(()));
        let mut attempts = 0;
        api.expect_save_indicators().times(2).returning(move |_| {
            attempts += 1;
            if attempts == 1 {
                Err(DashboardError::Http {
                    status: 502,
                    message: "Bad Gateway".to_string(),
                })
            } else {
                Ok(())
            }
        });
        let state = state_with(api);
        let manager = IndicatorManager::new(state.clone());
        let strategy = EntityId::from(7);

        manager.open(&strategy, Side::Buy).await;
        manager.remove(&strategy, Side::Buy, &EntityId::from(1)).await.unwrap();

        assert_err!(manager.save(&strategy, Side::Buy).await);
        let buffer = manager.buffer(&strategy, Side::Buy).await.unwrap();
        assert!(buffer.pending_deletions.is_empty());
        assert_eq!(buffer.items.len(), 1);
        assert_eq!(alert_count(&state).await, 1);

        assert_ok!(manager.save(&strategy, Side::Buy).await);
    }

    #[tokio::test]
    async fn test_popups_are_independent() {
        let api = api_with_loaded(Vec::new());
        let manager = IndicatorManager::new(state_with(api));
        let strategy = EntityId::from(7);

        manager.open(&strategy, Side::Buy).await;
        manager.open(&strategy, Side::Sell).await;
        manager.add(&strategy, Side::Buy).await.unwrap();

        assert_eq!(manager.buffer(&strategy, Side::Buy).await.unwrap().items.len(), 1);
        assert!(manager.buffer(&strategy, Side::Sell).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_add_requires_open_popup() {
        let manager = IndicatorManager::new(state_with(MockDashboardApi::new()));
        let result = manager.add(&EntityId::from(7), Side::Buy).await;
        assert!(matches!(result, Err(DashboardError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_removing_everything_sends_only_the_delete() {
        let mut api = api_with_loaded(vec![saved(1, 7, Side::Sell), saved(2, 7, Side::Sell)]);
        api.expect_remove_indicators()
            .withf(|ids| ids.len() == 2)
            .times(1)
            .returning(|_| Ok(()));
        api.expect_save_indicators().times(0);
        let manager = IndicatorManager::new(state_with(api));
        let strategy = EntityId::from(7);

        manager.open(&strategy, Side::Sell).await;
        manager.remove(&strategy, Side::Sell, &EntityId::from(1)).await.unwrap();
        manager.remove(&strategy, Side::Sell, &EntityId::from(2)).await.unwrap();

        assert_ok!(manager.save(&strategy, Side::Sell).await);
        assert!(manager.buffer(&strategy, Side::Sell).await.is_none());
    }
}
