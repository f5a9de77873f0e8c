use std::sync::Arc;
use tracing::{debug, info};

use super::api_keys::{ApiKeyManager, KeyPrompt};
use super::commands::{Command, CommandOutcome};
use super::indicators::IndicatorManager;
use super::instances::{InstanceManager, InstanceView};
use super::state::AppState;
use super::strategies::StrategyManager;
use super::symbols::SymbolStore;
use crate::client::{DashboardError, HttpBackend};
use crate::config::Settings;
use crate::notifications::{AlertSink, NotificationCenter};
use crate::storage::LocalStore;
use crate::types::EntityId;

/// Owns the shared state and one handle per manager.
#[derive(Clone)]
pub struct Dashboard {
    pub state: Arc<AppState>,
    pub symbols: SymbolStore,
    pub api_keys: ApiKeyManager,
    pub instances: InstanceManager,
    pub strategies: StrategyManager,
    pub indicators: IndicatorManager,
    user_id: Option<EntityId>,
}

impl Dashboard {
    pub fn new(state: Arc<AppState>, user_id: Option<EntityId>) -> Self {
        let strategies = StrategyManager::new(state.clone());
        Self {
            symbols: SymbolStore::new(state.clone()),
            api_keys: ApiKeyManager::new(state.clone()),
            instances: InstanceManager::new(state.clone(), strategies.clone()),
            indicators: IndicatorManager::new(state.clone()),
            strategies,
            state,
            user_id,
        }
    }

    /// Wires the HTTP backend, the local store and the alert sink from
    /// settings.
    pub fn from_settings(settings: &Settings, sink: Option<Arc<dyn AlertSink>>) -> Result<Self, DashboardError> {
        let api = Arc::new(HttpBackend::new(settings)?);
        let store = LocalStore::open(&settings.storage_path)?;
        let state = AppState::new(
            api,
            store,
            NotificationCenter::new(sink),
            settings.export_dir.clone(),
        );
        let user_id = settings.user_id.as_deref().map(EntityId::from);
        Ok(Self::new(state, user_id))
    }

    /// Symbols first, then the active key (prompting if none is stored),
    /// then that key's instances.
    pub async fn bootstrap(&self, prompt: &dyn KeyPrompt) -> Result<EntityId, DashboardError> {
        self.state.set_loading(true);
        let symbols = self.symbols.load().await;
        debug!("{} symbols cached", symbols.len());

        let key = match self.api_keys.resolve_active(prompt).await {
            Ok(key) => key,
            Err(e) => {
                self.state.set_loading(false);
                return Err(e);
            }
        };
        self.instances.list(&key).await;
        self.state.set_loading(false);

        info!("Dashboard ready with API key {}", key);
        Ok(key)
    }

    pub async fn select_api_key(&self, id: &EntityId) -> Result<Vec<InstanceView>, DashboardError> {
        self.api_keys.select(id).await?;
        Ok(self.instances.list(id).await)
    }

    /// Saves a drafted instance and then its draft strategy, which by then
    /// points at the id the backend issued.
    pub async fn commit_instance(&self, strategy_id: &EntityId, name: &str) -> Result<EntityId, DashboardError> {
        let Some(user_id) = self.user_id.clone() else {
            let message = "user_id is not configured";
            self.state.notifications.validation_failed("save instance", message).await;
            return Err(DashboardError::Validation(message.to_string()));
        };
        let Some(api_key) = self.state.active_key().await else {
            self.state
                .notifications
                .validation_failed("save instance", "no active API key")
                .await;
            return Err(DashboardError::NoApiKey);
        };

        let instance_id = self.instances.save(&user_id, &api_key, strategy_id, name).await?;
        self.strategies.save(strategy_id).await?;
        Ok(instance_id)
    }

    pub async fn dispatch(&self, command: Command) -> Result<CommandOutcome, DashboardError> {
        debug!(mutating = command.is_mutating(), "Dispatching {:?}", command);

        match command {
            Command::SelectApiKey(id) => {
                self.select_api_key(&id).await?;
                Ok(CommandOutcome::Done)
            }
            Command::RemoveApiKey(id) => {
                self.api_keys.remove(&id).await?;
                Ok(CommandOutcome::Done)
            }
            Command::CreateInstance { name } => {
                let (instance, strategy) = self.instances.create(&name).await?;
                Ok(CommandOutcome::Drafted {
                    instance_id: instance.id().clone(),
                    strategy_id: strategy.id().clone(),
                })
            }
            Command::CommitInstance { strategy_id, name } => {
                let id = self.commit_instance(&strategy_id, &name).await?;
                Ok(CommandOutcome::InstanceSaved(id))
            }
            Command::StartInstance {
                instance_id,
                strategy_id,
            } => {
                self.instances.start(&instance_id, &strategy_id).await?;
                Ok(CommandOutcome::Done)
            }
            Command::StopInstance(id) => {
                self.instances.stop(&id).await?;
                Ok(CommandOutcome::Done)
            }
            Command::RemoveInstance(id) => {
                self.instances.remove(&id).await?;
                Ok(CommandOutcome::Done)
            }
            Command::ExportInstance(id) => {
                let path = self.instances.export_operations(&id).await?;
                Ok(CommandOutcome::Exported(path))
            }
            Command::ToggleEdit(id) => {
                let phase = self.strategies.toggle_edit(&id).await?;
                Ok(CommandOutcome::Phase(phase))
            }
            Command::SaveStrategy(id) => {
                self.strategies.save(&id).await?;
                Ok(CommandOutcome::Done)
            }
            Command::StartStrategy(id) => {
                self.strategies.start(&id).await?;
                Ok(CommandOutcome::Done)
            }
            Command::StopStrategy(id) => {
                self.strategies.stop(&id).await?;
                Ok(CommandOutcome::Done)
            }
            Command::RemoveStrategy(id) => {
                self.strategies.remove(&id).await?;
                Ok(CommandOutcome::Done)
            }
            Command::OpenIndicators { strategy_id, side } => {
                let indicators = self.indicators.open(&strategy_id, side).await;
                Ok(CommandOutcome::Indicators(indicators))
            }
            Command::SaveIndicators { strategy_id, side } => {
                self.indicators.save(&strategy_id, side).await?;
                Ok(CommandOutcome::Done)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockDashboardApi;
    use crate::dashboard::state::testing::*;
    use crate::dashboard::strategies::EditPhase;
    use crate::types::{ApiKeyCredential, Instance, SaveInstanceResponse, StrategyStatus};
    use tokio_test::assert_ok;

    struct NoPrompt;

    impl KeyPrompt for NoPrompt {
        fn choose(&self, _keys: &[ApiKeyCredential]) -> Option<EntityId> {
            None
        }
    }

    #[tokio::test]
    async fn test_bootstrap_loads_symbols_key_and_instances() {
        let mut api = MockDashboardApi::new();
        api.expect_get_symbols()
            .times(1)
            .returning(|| Ok(vec!["BTCUSDT".to_string()]));
        api.expect_get_instances()
            .withf(|key| key.to_string() == "8")
            .times(1)
            .returning(|_| {
                let mut instance = Instance::draft("Bot1");
                instance.id = EntityId::from(4);
                Ok(vec![instance])
            });
        api.expect_get_instance_strategies().returning(|_| Ok(Vec::new()));
        let state = state_with(api);
        state.store.set_active_api_key(&EntityId::from(8)).unwrap();
        let dashboard = Dashboard::new(state.clone(), None);

        let key = dashboard.bootstrap(&NoPrompt).await.unwrap();

        assert_eq!(key, EntityId::from(8));
        assert_eq!(dashboard.symbols.get().await, vec!["BTCUSDT"]);
        assert_eq!(dashboard.instances.all().await.len(), 1);
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_bootstrap_without_any_key_stops_before_instances() {
        let mut api = MockDashboardApi::new();
        api.expect_get_symbols().returning(|| Ok(Vec::new()));
        api.expect_get_user_apikeys().returning(|| Ok(Vec::new()));
        api.expect_get_instances().times(0);
        let state = state_with(api);
        let dashboard = Dashboard::new(state.clone(), None);

        let result = dashboard.bootstrap(&NoPrompt).await;
        assert!(matches!(result, Err(DashboardError::NoApiKey)));
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_commit_instance_saves_instance_then_strategy() {
        let mut api = MockDashboardApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_save_instance()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(SaveInstanceResponse {
                    instance_id: Some(EntityId::from(31)),
                    message: None,
                })
            });
        api.expect_save_strategy()
            .withf(|payload| {
                payload.instance_id.to_string() == "31"
                    && payload.instance_name.as_deref() == Some("Bot1")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let state = state_with(api);
        seed_symbols(&state, &["BTCUSDT"]).await;
        seed_active_key(&state, EntityId::from(2)).await;
        let dashboard = Dashboard::new(state, Some(EntityId::from(42)));

        let drafted = dashboard
            .dispatch(Command::CreateInstance {
                name: "Bot1".to_string(),
            })
            .await
            .unwrap();
        let CommandOutcome::Drafted { strategy_id, .. } = drafted else {
            panic!("expected a drafted instance, got {:?}", drafted);
        };

        let outcome = dashboard
            .dispatch(Command::CommitInstance {
                strategy_id: strategy_id.clone(),
                name: "Bot1".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, CommandOutcome::InstanceSaved(EntityId::from(31)));
        let view = dashboard.strategies.get(&strategy_id).await.unwrap();
        assert_eq!(view.strategy.status, StrategyStatus::Stopped);
        assert_eq!(view.phase, EditPhase::Locked);
    }

    #[tokio::test]
    async fn test_commit_without_user_sends_nothing() {
        let mut api = MockDashboardApi::new();
        api.expect_save_instance().times(0);
        api.expect_save_strategy().times(0);
        let state = state_with(api);
        seed_active_key(&state, EntityId::from(2)).await;
        let dashboard = Dashboard::new(state.clone(), None);

        let result = dashboard.commit_instance(&EntityId::draft(), "Bot1").await;
        assert!(matches!(result, Err(DashboardError::Validation(_))));
        assert_eq!(alert_count(&state).await, 1);
    }

    #[tokio::test]
    async fn test_dispatch_routes_row_commands() {
        let mut api = MockDashboardApi::new();
        api.expect_get_symbols().returning(|| Ok(vec!["BTCUSDT".to_string()]));
        api.expect_get_instances().returning(|_| Ok(Vec::new()));
        api.expect_get_indicators().times(1).returning(|_, _| Ok(Vec::new()));
        let state = state_with(api);
        let dashboard = Dashboard::new(state, None);
        dashboard.symbols.load().await;

        assert_ok!(dashboard.dispatch(Command::SelectApiKey(EntityId::from(5))).await);
        assert_eq!(dashboard.api_keys.active().await, Some(EntityId::from(5)));

        let outcome = dashboard
            .dispatch(Command::OpenIndicators {
                strategy_id: EntityId::from(12),
                side: crate::types::Side::Buy,
            })
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Indicators(Vec::new()));
    }
}
