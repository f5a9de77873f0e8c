use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::state::{AppState, DashboardEvent};
use super::strategies::{StrategyManager, StrategyView};
use crate::client::DashboardError;
use crate::notifications::AlertType;
use crate::types::{EntityId, Instance, InstanceStatus, SaveInstanceRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceView {
    pub instance: Instance,
    /// Created locally and not yet acknowledged by the backend.
    pub draft: bool,
}

impl InstanceView {
    pub fn id(&self) -> &EntityId {
        &self.instance.id
    }
}

#[derive(Clone)]
pub struct InstanceManager {
    state: Arc<AppState>,
    strategies: StrategyManager,
}

impl InstanceManager {
    pub fn new(state: Arc<AppState>, strategies: StrategyManager) -> Self {
        Self { state, strategies }
    }

    /// Replaces every held instance with the backend list for `api_key_id`
    /// and loads their strategies concurrently.
    pub async fn list(&self, api_key_id: &EntityId) -> Vec<InstanceView> {
        self.state.set_loading(true);

        let instances = match self.state.api.get_instances(api_key_id).await {
            Ok(instances) => instances,
            Err(e) => {
                warn!("Failed to load instances for API key {}: {}", api_key_id, e);
                Vec::new()
            }
        };
        let views: Vec<InstanceView> = instances
            .into_iter()
            .map(|instance| InstanceView {
                instance,
                draft: false,
            })
            .collect();
        *self.state.instances.write().await = views.clone();

        self.strategies.reset().await;
        join_all(views.iter().map(|view| self.strategies.load_for_instance(view.id()))).await;

        info!("Loaded {} instances for API key {}", views.len(), api_key_id);
        self.state.set_loading(false);
        self.state.emit(DashboardEvent::InstancesReloaded { count: views.len() });
        views
    }

    pub async fn all(&self) -> Vec<InstanceView> {
        self.state.instances.read().await.clone()
    }

    pub async fn get(&self, id: &EntityId) -> Option<InstanceView> {
        self.state
            .instances
            .read()
            .await
            .iter()
            .find(|view| view.id() == id)
            .cloned()
    }

    /// Drafts a named instance with one default strategy. Nothing is sent
    /// until the strategy is saved.
    pub async fn create(&self, name: &str) -> Result<(InstanceView, StrategyView), DashboardError> {
        let name = name.trim();
        if name.is_empty() {
            debug!("Instance creation cancelled: empty name");
            return Err(DashboardError::Validation("instance name is required".to_string()));
        }
        if self.state.symbols.read().await.is_empty() {
            error!("Cannot create instance {}: no symbols available", name);
            return Err(DashboardError::NoSymbols);
        }

        let view = InstanceView {
            instance: Instance::draft(name),
            draft: true,
        };
        self.state.instances.write().await.push(view.clone());
        let strategy = self
            .strategies
            .create(Some(view.id().clone()), &self.state.defaults)
            .await?;

        info!("Drafted instance {} ({})", name, view.id());
        self.state.emit(DashboardEvent::InstanceChanged {
            id: view.id().clone(),
            status: Some(view.instance.status),
        });
        Ok((view, strategy))
    }

    /// Persists a drafted instance. The id issued by the backend replaces the
    /// draft id everywhere, including on the instance's strategies.
    pub async fn save(
        &self,
        user_id: &EntityId,
        api_key_id: &EntityId,
        strategy_id: &EntityId,
        name: &str,
    ) -> Result<EntityId, DashboardError> {
        let name = name.trim();
        if name.is_empty() || user_id.is_blank() || api_key_id.is_blank() || strategy_id.is_blank() {
            let message = "user, API key, strategy and name are required";
            self.state.notifications.validation_failed("save instance", message).await;
            return Err(DashboardError::Validation(message.to_string()));
        }

        let draft_id = self
            .strategies
            .get(strategy_id)
            .await
            .and_then(|view| view.strategy.instance_id);
        let _token = self.state.in_flight.acquire("instance", draft_id.as_ref().unwrap_or(strategy_id))?;

        let request = SaveInstanceRequest {
            user_id: user_id.clone(),
            api_key: api_key_id.clone(),
            strategy: strategy_id.clone(),
            name: name.to_string(),
        };
        let response = match self.state.api.save_instance(&request).await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to save instance {}: {}", name, e.user_message());
                self.state
                    .notifications
                    .action_failed("save", format!("instance {}", name), &e)
                    .await;
                return Err(e);
            }
        };

        if let Some(message) = &response.message {
            debug!("save_instance: {}", message);
        }
        let Some(instance_id) = response.instance_id.filter(|id| !id.is_blank()) else {
            let err = DashboardError::ContractViolation("response carried no instance_id".to_string());
            error!("Failed to save instance {}: {}", name, err);
            self.state
                .notifications
                .action_failed("save", format!("instance {}", name), &err)
                .await;
            return Err(err);
        };

        {
            let mut instances = self.state.instances.write().await;
            let held = draft_id
                .as_ref()
                .and_then(|draft| instances.iter().position(|view| view.id() == draft));
            match held {
                Some(index) => {
                    let view = &mut instances[index];
                    view.instance.id = instance_id.clone();
                    view.instance.name = name.to_string();
                    view.instance.status = InstanceStatus::Active;
                    view.draft = false;
                }
                None => {
                    let mut instance = Instance::draft(name);
                    instance.id = instance_id.clone();
                    instance.status = InstanceStatus::Active;
                    instances.push(InstanceView {
                        instance,
                        draft: false,
                    });
                }
            }
        }
        if let Some(draft) = &draft_id {
            self.strategies.rebind(draft, &instance_id).await;
        }

        info!("Instance {} saved as {}", name, instance_id);
        self.state.emit(DashboardEvent::InstanceChanged {
            id: instance_id.clone(),
            status: Some(InstanceStatus::Active),
        });
        Ok(instance_id)
    }

    pub async fn start(&self, instance_id: &EntityId, strategy_id: &EntityId) -> Result<(), DashboardError> {
        self.switch(instance_id, Some(strategy_id), InstanceStatus::Active).await
    }

    pub async fn stop(&self, instance_id: &EntityId) -> Result<(), DashboardError> {
        self.switch(instance_id, None, InstanceStatus::Inactive).await
    }

    /// Saved instances are deleted on the backend first; drafts are only
    /// dropped locally.
    pub async fn remove(&self, instance_id: &EntityId) -> Result<(), DashboardError> {
        let view = self
            .get(instance_id)
            .await
            .ok_or_else(|| DashboardError::not_found("instance", instance_id))?;

        if !view.draft {
            let _token = self.state.in_flight.acquire("instance", instance_id)?;
            if let Err(e) = self.state.api.remove_instance(instance_id).await {
                error!("Failed to remove instance {}: {}", instance_id, e.user_message());
                self.state
                    .notifications
                    .action_failed("remove", format!("instance {}", instance_id), &e)
                    .await;
                return Err(e);
            }
        }

        self.state.instances.write().await.retain(|view| view.id() != instance_id);
        self.strategies.drop_instance(instance_id).await;
        info!("Instance {} removed", instance_id);
        self.state.emit(DashboardEvent::InstanceChanged {
            id: instance_id.clone(),
            status: None,
        });
        Ok(())
    }

    /// Fetches the operation history as CSV and writes it to the export
    /// directory. Returns the written path.
    pub async fn export_operations(&self, instance_id: &EntityId) -> Result<PathBuf, DashboardError> {
        let csv = match self.state.api.get_instance_operations(instance_id).await {
            Ok(csv) => csv,
            Err(e) => {
                error!("Failed to export instance {}: {}", instance_id, e.user_message());
                return Err(e);
            }
        };

        tokio::fs::create_dir_all(&self.state.export_dir).await?;
        let path = self
            .state
            .export_dir
            .join(format!("instance_{}_data.csv", instance_id));
        tokio::fs::write(&path, &csv).await?;

        self.state
            .notifications
            .notify(AlertType::ExportWritten {
                instance: instance_id.to_string(),
                path: path.display().to_string(),
            })
            .await;
        Ok(path)
    }

    async fn switch(
        &self,
        instance_id: &EntityId,
        strategy_id: Option<&EntityId>,
        target: InstanceStatus,
    ) -> Result<(), DashboardError> {
        let action = if target.is_active() { "start" } else { "stop" };
        let view = self
            .get(instance_id)
            .await
            .ok_or_else(|| DashboardError::not_found("instance", instance_id))?;
        if view.draft {
            let message = format!("instance {} has not been saved", instance_id);
            self.state
                .notifications
                .validation_failed(&format!("{} instance", action), message.clone())
                .await;
            return Err(DashboardError::Validation(message));
        }

        let _token = self.state.in_flight.acquire("instance", instance_id)?;
        let result = match strategy_id {
            Some(strategy_id) => self.state.api.start_instance(instance_id, strategy_id).await,
            None => self.state.api.stop_instance(instance_id).await,
        };
        if let Err(e) = result {
            error!("Failed to {} instance {}: {}", action, instance_id, e.user_message());
            self.state
                .notifications
                .action_failed(action, format!("instance {}", instance_id), &e)
                .await;
            return Err(e);
        }

        if let Some(view) = self
            .state
            .instances
            .write()
            .await
            .iter_mut()
            .find(|view| view.id() == instance_id)
        {
            view.instance.status = target;
        }
        info!("Instance {} is now {}", instance_id, target);
        self.state.emit(DashboardEvent::InstanceChanged {
            id: instance_id.clone(),
            status: Some(target),
        });
        Ok(())
    }
}
