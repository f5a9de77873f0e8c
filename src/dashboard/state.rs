use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use super::guard::InFlightGuard;
use super::indicators::IndicatorBuffer;
use super::instances::InstanceView;
use super::strategies::StrategyView;
use crate::client::DashboardApi;
use crate::notifications::NotificationCenter;
use crate::storage::LocalStore;
use crate::types::{EntityId, InstanceStatus, Side, StrategyDefaults, StrategyStatus};

/// Changes other parts of the client react to.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    ActiveKeyChanged(Option<EntityId>),
    Loading(bool),
    InstancesReloaded { count: usize },
    /// `status` is `None` once the instance is gone.
    InstanceChanged { id: EntityId, status: Option<InstanceStatus> },
    /// `status` is `None` once the strategy is gone.
    StrategyChanged { id: EntityId, status: Option<StrategyStatus> },
    IndicatorsSaved { strategy_id: EntityId, side: Side },
}

/// Everything the managers share. Built once at bootstrap and handed to each
/// manager behind an `Arc`.
pub struct AppState {
    pub api: Arc<dyn DashboardApi>,
    pub store: LocalStore,
    pub notifications: NotificationCenter,
    pub in_flight: InFlightGuard,
    pub defaults: StrategyDefaults,
    pub export_dir: PathBuf,
    pub tx: broadcast::Sender<DashboardEvent>,
    pub(crate) symbols: RwLock<Vec<String>>,
    pub(crate) active_key: RwLock<Option<EntityId>>,
    pub(crate) instances: RwLock<Vec<InstanceView>>,
    pub(crate) strategies: RwLock<Vec<StrategyView>>,
    pub(crate) popups: RwLock<HashMap<(EntityId, Side), IndicatorBuffer>>,
    loading: AtomicBool,
}

impl AppState {
    pub fn new(
        api: Arc<dyn DashboardApi>,
        store: LocalStore,
        notifications: NotificationCenter,
        export_dir: PathBuf,
    ) -> Arc<Self> {
        let (tx, _) = broadcast::channel(100);
        Arc::new(Self {
            api,
            store,
            notifications,
            in_flight: InFlightGuard::new(),
            defaults: StrategyDefaults::default(),
            export_dir,
            tx,
            symbols: RwLock::new(Vec::new()),
            active_key: RwLock::new(None),
            instances: RwLock::new(Vec::new()),
            strategies: RwLock::new(Vec::new()),
            popups: RwLock::new(HashMap::new()),
            loading: AtomicBool::new(false),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: DashboardEvent) {
        // no receivers is fine
        let _ = self.tx.send(event);
    }

    #[cfg(test)]
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        if self.loading.swap(loading, Ordering::AcqRel) != loading {
            self.emit(DashboardEvent::Loading(loading));
        }
    }

    pub async fn active_key(&self) -> Option<EntityId> {
        self.active_key.read().await.clone()
    }

    pub async fn symbols(&self) -> Vec<String> {
        self.symbols.read().await.clone()
    }
}

/// Logs events until every sender is gone. A receiver that falls behind
/// skips ahead and keeps going. Returns how many events were logged.
pub async fn log_events(mut events: broadcast::Receiver<DashboardEvent>) -> usize {
    let mut logged = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                debug!("Event: {:?}", event);
                logged += 1;
            }
            Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {} events", skipped),
            Err(RecvError::Closed) => return logged,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::client::MockDashboardApi;

    pub fn state_with(api: MockDashboardApi) -> Arc<AppState> {
        let store = LocalStore::temporary().unwrap();
        AppState::new(
            Arc::new(api),
            store,
            NotificationCenter::default(),
            std::env::temp_dir(),
        )
    }

    pub async fn seed_symbols(state: &AppState, symbols: &[&str]) {
        *state.symbols.write().await = symbols.iter().map(|s| s.to_string()).collect();
    }

    pub async fn seed_active_key(state: &AppState, id: EntityId) {
        *state.active_key.write().await = Some(id);
    }

    pub async fn alert_count(state: &AppState) -> usize {
        state.notifications.get_unacknowledged_alerts().await.len()
    }
}
