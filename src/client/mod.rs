pub mod error;
pub mod http;

pub use error::*;
pub use http::*;

use async_trait::async_trait;

use crate::types::{
    ApiKeyCredential, EntityId, Exchange, Indicator, Instance, NewApiKey, SaveInstanceRequest,
    SaveInstanceResponse, Side, Strategy, StrategyPayload,
};

/// One method per backend endpoint. Acknowledgment endpoints return `()`
/// only when the response is 2xx and carries no `error` field.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn get_symbols(&self) -> Result<Vec<String>, DashboardError>;
    async fn get_exchanges(&self) -> Result<Vec<Exchange>, DashboardError>;

    async fn get_user_apikeys(&self) -> Result<Vec<ApiKeyCredential>, DashboardError>;
    async fn save_user_apikey(&self, key: &NewApiKey) -> Result<(), DashboardError>;
    async fn remove_user_apikey(&self, api_key_id: &EntityId) -> Result<(), DashboardError>;

    async fn get_instances(&self, api_key_id: &EntityId) -> Result<Vec<Instance>, DashboardError>;
    async fn save_instance(
        &self,
        request: &SaveInstanceRequest,
    ) -> Result<SaveInstanceResponse, DashboardError>;
    async fn remove_instance(&self, instance_id: &EntityId) -> Result<(), DashboardError>;
    async fn start_instance(
        &self,
        instance_id: &EntityId,
        strategy_id: &EntityId,
    ) -> Result<(), DashboardError>;
    async fn stop_instance(&self, instance_id: &EntityId) -> Result<(), DashboardError>;
    async fn get_instance_strategies(
        &self,
        instance_id: &EntityId,
    ) -> Result<Vec<Strategy>, DashboardError>;
    async fn get_instance_operations(&self, instance_id: &EntityId) -> Result<Vec<u8>, DashboardError>;

    async fn get_strategies(&self) -> Result<Vec<Strategy>, DashboardError>;
    async fn save_strategy(&self, payload: &StrategyPayload) -> Result<(), DashboardError>;
    async fn delete_strategy(&self, strategy_id: &EntityId) -> Result<(), DashboardError>;
    async fn start_strategy(&self, strategy_id: &EntityId) -> Result<(), DashboardError>;
    async fn stop_strategy(&self, strategy_id: &EntityId) -> Result<(), DashboardError>;

    async fn get_indicators(
        &self,
        strategy_id: &EntityId,
        side: Side,
    ) -> Result<Vec<Indicator>, DashboardError>;
    async fn save_indicators(&self, indicators: &[Indicator]) -> Result<(), DashboardError>;
    async fn remove_indicators(&self, indicator_ids: &[EntityId]) -> Result<(), DashboardError>;
}
