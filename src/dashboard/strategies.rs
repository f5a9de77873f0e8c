use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::commands::Command;
use super::state::{AppState, DashboardEvent};
use crate::client::DashboardError;
use crate::types::{
    EntityId, PercentInput, Side, Strategy, StrategyDefaults, StrategyPayload, StrategyStatus,
};

/// Whether the form fields of a strategy row accept input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPhase {
    Locked,
    Unlocked,
}

/// A strategy as held by the client, plus its form state.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyView {
    pub strategy: Strategy,
    pub phase: EditPhase,
}

/// Which actions a strategy row offers right now. Derived from status and
/// edit phase only, so a failed request leaves it untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub edit: bool,
    pub save: bool,
    pub start: bool,
    pub stop: bool,
    pub remove: bool,
    pub fields: bool,
}

impl StrategyView {
    fn new(strategy: Strategy) -> Self {
        let phase = match strategy.status {
            StrategyStatus::Unsaved => EditPhase::Unlocked,
            _ => EditPhase::Locked,
        };
        Self { strategy, phase }
    }

    pub fn id(&self) -> &EntityId {
        &self.strategy.id
    }

    pub fn is_draft(&self) -> bool {
        self.strategy.status == StrategyStatus::Unsaved
    }

    pub fn controls(&self) -> Controls {
        let unlocked = self.phase == EditPhase::Unlocked;
        match self.strategy.status {
            StrategyStatus::Unsaved => Controls {
                edit: false,
                save: true,
                start: false,
                stop: false,
                remove: true,
                fields: true,
            },
            StrategyStatus::Stopped => Controls {
                edit: true,
                save: unlocked,
                start: !unlocked,
                stop: false,
                remove: true,
                fields: unlocked,
            },
            StrategyStatus::Running => Controls {
                edit: false,
                save: false,
                start: false,
                stop: true,
                remove: true,
                fields: false,
            },
        }
    }

    /// Commands bound to this row, in display order.
    pub fn commands(&self) -> Vec<Command> {
        let controls = self.controls();
        let id = self.id().clone();
        let mut commands = Vec::new();

        if controls.edit {
            commands.push(Command::ToggleEdit(id.clone()));
        }
        if controls.save {
            commands.push(Command::SaveStrategy(id.clone()));
        }
        if controls.start {
            commands.push(Command::StartStrategy(id.clone()));
        }
        if controls.stop {
            commands.push(Command::StopStrategy(id.clone()));
        }
        if self.strategy.status.is_persisted() {
            for side in Side::all() {
                commands.push(Command::OpenIndicators {
                    strategy_id: id.clone(),
                    side,
                });
            }
        }
        if controls.remove {
            commands.push(Command::RemoveStrategy(id));
        }
        commands
    }
}

/// One form field change.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyEdit {
    Symbol(String),
    /// Raw text of the buy percent field; goes through the percent mask.
    BuyPercent(String),
    BuyConditionLimit(u32),
    BuyInterval(f64),
    SimultaneousOperations(Option<u32>),
    SellConditionLimit(u32),
    SellInterval(f64),
}

#[derive(Clone)]
pub struct StrategyManager {
    state: Arc<AppState>,
}

impl StrategyManager {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Replaces the saved strategies of one instance with the backend list.
    /// Drafts of that instance are kept.
    pub async fn load_for_instance(&self, instance_id: &EntityId) -> Vec<Strategy> {
        let loaded = match self.state.api.get_instance_strategies(instance_id).await {
            Ok(strategies) => strategies,
            Err(e) => {
                warn!("Failed to load strategies of instance {}: {}", instance_id, e);
                return Vec::new();
            }
        };

        let loaded: Vec<Strategy> = loaded
            .into_iter()
            .map(|mut strategy| {
                if strategy.instance_id.is_none() {
                    strategy.instance_id = Some(instance_id.clone());
                }
                strategy
            })
            .collect();

        let mut views = self.state.strategies.write().await;
        views.retain(|view| view.is_draft() || view.strategy.instance_id.as_ref() != Some(instance_id));
        views.extend(loaded.iter().cloned().map(StrategyView::new));
        debug!("Instance {} has {} strategies", instance_id, loaded.len());
        loaded
    }

    /// Every strategy of the current user, regardless of instance.
    pub async fn list_all(&self) -> Vec<Strategy> {
        match self.state.api.get_strategies().await {
            Ok(strategies) => strategies,
            Err(e) => {
                warn!("Failed to load strategies: {}", e);
                Vec::new()
            }
        }
    }

    pub(crate) async fn reset(&self) {
        self.state.strategies.write().await.clear();
    }

    pub async fn get(&self, id: &EntityId) -> Option<StrategyView> {
        self.state
            .strategies
            .read()
            .await
            .iter()
            .find(|view| view.id() == id)
            .cloned()
    }

    #[cfg(test)]
    pub async fn all(&self) -> Vec<StrategyView> {
        self.state.strategies.read().await.clone()
    }

    pub async fn for_instance(&self, instance_id: &EntityId) -> Vec<StrategyView> {
        self.state
            .strategies
            .read()
            .await
            .iter()
            .filter(|view| view.strategy.instance_id.as_ref() == Some(instance_id))
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub async fn controls(&self, id: &EntityId) -> Option<Controls> {
        self.get(id).await.map(|view| view.controls())
    }

    /// Adds an unsaved draft bound to the first cached symbol.
    pub async fn create(
        &self,
        instance_id: Option<EntityId>,
        defaults: &StrategyDefaults,
    ) -> Result<StrategyView, DashboardError> {
        let symbol = match self.state.symbols.read().await.first() {
            Some(symbol) => symbol.clone(),
            None => {
                error!("Cannot create a strategy: no symbols available");
                return Err(DashboardError::NoSymbols);
            }
        };

        let view = StrategyView::new(Strategy::draft(instance_id, symbol, defaults));
        debug!("Drafted strategy {} on {:?}", view.id(), view.strategy.symbol);
        self.state.strategies.write().await.push(view.clone());
        self.state.emit(DashboardEvent::StrategyChanged {
            id: view.id().clone(),
            status: Some(StrategyStatus::Unsaved),
        });
        Ok(view)
    }

    /// Applies one field change to an unlocked strategy.
    pub async fn apply_edit(&self, id: &EntityId, edit: StrategyEdit) -> Result<StrategyView, DashboardError> {
        if let StrategyEdit::Symbol(symbol) = &edit {
            let symbols = self.state.symbols().await;
            if !symbols.is_empty() && !symbols.contains(symbol) {
                return Err(DashboardError::Validation(format!("unknown symbol {}", symbol)));
            }
        }

        let mut views = self.state.strategies.write().await;
        let view = views
            .iter_mut()
            .find(|view| view.id() == id)
            .ok_or_else(|| DashboardError::not_found("strategy", id))?;
        if !view.controls().fields {
            return Err(DashboardError::Validation(format!("strategy {} is locked", id)));
        }

        let strategy = &mut view.strategy;
        match edit {
            StrategyEdit::Symbol(symbol) => strategy.symbol = Some(symbol),
            StrategyEdit::BuyPercent(raw) => {
                strategy.buy.percent = PercentInput::parse(&raw).stored.unwrap_or(0.0);
            }
            StrategyEdit::BuyConditionLimit(limit) => strategy.buy.condition_limit = limit,
            StrategyEdit::BuyInterval(interval) => strategy.buy.interval = interval,
            StrategyEdit::SimultaneousOperations(count) => {
                strategy.buy.simultaneous_operations = count;
            }
            StrategyEdit::SellConditionLimit(limit) => strategy.sell.condition_limit = limit,
            StrategyEdit::SellInterval(interval) => strategy.sell.interval = interval,
        }
        Ok(view.clone())
    }

    /// Validates and persists a draft or an unlocked strategy. Unsaved
    /// drafts become stopped; the form is locked again on success.
    pub async fn save(&self, id: &EntityId) -> Result<(), DashboardError> {
        let view = self.get(id).await.ok_or_else(|| DashboardError::not_found("strategy", id))?;
        if !view.controls().save {
            let message = match view.strategy.status {
                StrategyStatus::Running => "stop the strategy before editing it",
                _ => "unlock the strategy before saving it",
            };
            self.state.notifications.validation_failed("save strategy", message).await;
            return Err(DashboardError::Validation(message.to_string()));
        }

        let api_key = self.state.active_key().await;
        let mut errors = view.strategy.validation_errors();
        if api_key.is_none() {
            errors.push("an active API key is required".to_string());
        }
        let payload = match (api_key, errors.is_empty()) {
            (Some(api_key), true) => self.payload(&view.strategy, api_key).await,
            _ => {
                let message = errors.join(", ");
                self.state.notifications.validation_failed("save strategy", message.clone()).await;
                return Err(DashboardError::Validation(message));
            }
        };

        let _token = self.state.in_flight.acquire("strategy", id)?;
        if let Err(e) = self.state.api.save_strategy(&payload).await {
            error!("Failed to save strategy {}: {}", id, e.user_message());
            self.state
                .notifications
                .action_failed("save", format!("strategy {}", id), &e)
                .await;
            return Err(e);
        }

        let status = self
            .update(id, |view| {
                if view.strategy.status == StrategyStatus::Unsaved {
                    view.strategy.status = StrategyStatus::Stopped;
                }
                view.phase = EditPhase::Locked;
            })
            .await;
        info!("Strategy {} saved", id);
        self.state.emit(DashboardEvent::StrategyChanged { id: id.clone(), status });
        Ok(())
    }

    /// First call unlocks the form locally; second call saves and relocks.
    /// Returns the phase the form is in afterwards.
    pub async fn toggle_edit(&self, id: &EntityId) -> Result<EditPhase, DashboardError> {
        let view = self.get(id).await.ok_or_else(|| DashboardError::not_found("strategy", id))?;

        match (view.strategy.status, view.phase) {
            (StrategyStatus::Running, _) => {
                let message = "stop the strategy before editing it";
                self.state.notifications.validation_failed("edit strategy", message).await;
                Err(DashboardError::Validation(message.to_string()))
            }
            (_, EditPhase::Locked) => {
                self.update(id, |view| view.phase = EditPhase::Unlocked).await;
                debug!("Strategy {} unlocked for editing", id);
                Ok(EditPhase::Unlocked)
            }
            (_, EditPhase::Unlocked) => {
                self.save(id).await?;
                Ok(EditPhase::Locked)
            }
        }
    }

    pub async fn start(&self, id: &EntityId) -> Result<(), DashboardError> {
        self.switch(id, StrategyStatus::Running).await
    }

    pub async fn stop(&self, id: &EntityId) -> Result<(), DashboardError> {
        self.switch(id, StrategyStatus::Stopped).await
    }

    /// Drafts are dropped locally; saved strategies are deleted on the
    /// backend first and disappear only once it acknowledges.
    pub async fn remove(&self, id: &EntityId) -> Result<(), DashboardError> {
        let view = self.get(id).await.ok_or_else(|| DashboardError::not_found("strategy", id))?;

        if !view.is_draft() {
            let _token = self.state.in_flight.acquire("strategy", id)?;
            if let Err(e) = self.state.api.delete_strategy(id).await {
                error!("Failed to delete strategy {}: {}", id, e.user_message());
                self.state
                    .notifications
                    .action_failed("delete", format!("strategy {}", id), &e)
                    .await;
                return Err(e);
            }
            info!("Strategy {} deleted", id);
        } else {
            debug!("Discarding draft strategy {}", id);
        }

        self.state.strategies.write().await.retain(|view| view.id() != id);
        self.state.emit(DashboardEvent::StrategyChanged { id: id.clone(), status: None });
        Ok(())
    }

    /// Points every strategy of `from` at `to`.
    pub(crate) async fn rebind(&self, from: &EntityId, to: &EntityId) {
        for view in self.state.strategies.write().await.iter_mut() {
            if view.strategy.instance_id.as_ref() == Some(from) {
                view.strategy.instance_id = Some(to.clone());
            }
        }
    }

    pub(crate) async fn drop_instance(&self, instance_id: &EntityId) {
        self.state
            .strategies
            .write()
            .await
            .retain(|view| view.strategy.instance_id.as_ref() != Some(instance_id));
    }

    async fn switch(&self, id: &EntityId, target: StrategyStatus) -> Result<(), DashboardError> {
        let action = match target {
            StrategyStatus::Running => "start",
            _ => "stop",
        };
        let view = self.get(id).await.ok_or_else(|| DashboardError::not_found("strategy", id))?;
        let allowed = match target {
            StrategyStatus::Running => view.controls().start,
            _ => view.controls().stop,
        };
        if !allowed {
            let message = format!("strategy {} is {}", id, view.strategy.status);
            self.state
                .notifications
                .validation_failed(&format!("{} strategy", action), message.clone())
                .await;
            return Err(DashboardError::Validation(message));
        }

        let _token = self.state.in_flight.acquire("strategy", id)?;
        let result = match target {
            StrategyStatus::Running => self.state.api.start_strategy(id).await,
            _ => self.state.api.stop_strategy(id).await,
        };
        if let Err(e) = result {
            error!("Failed to {} strategy {}: {}", action, id, e.user_message());
            self.state
                .notifications
                .action_failed(action, format!("strategy {}", id), &e)
                .await;
            return Err(e);
        }

        let status = self.update(id, |view| view.strategy.status = target).await;
        info!("Strategy {} is now {}", id, target);
        self.state.emit(DashboardEvent::StrategyChanged { id: id.clone(), status });
        Ok(())
    }

    async fn payload(&self, strategy: &Strategy, api_key: EntityId) -> StrategyPayload {
        let instance_id = strategy.instance_id.clone().unwrap_or_else(EntityId::draft);
        let instance_name = self
            .state
            .instances
            .read()
            .await
            .iter()
            .find(|view| view.instance.id == instance_id)
            .map(|view| view.instance.name.clone());

        StrategyPayload {
            strategy_id: strategy.id.clone(),
            instance_id,
            api_key,
            instance_name,
            symbol: strategy.symbol.clone().unwrap_or_default(),
            buy: strategy.buy.clone(),
            sell: strategy.sell.clone(),
        }
    }

    /// Applies `change` if the strategy is still held and returns its status.
    async fn update(&self, id: &EntityId, change: impl FnOnce(&mut StrategyView)) -> Option<StrategyStatus> {
        let mut views = self.state.strategies.write().await;
        let view = views.iter_mut().find(|view| view.id() == id)?;
        change(view);
        Some(view.strategy.status)
    }
}
