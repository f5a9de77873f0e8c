use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{DashboardApi, DashboardError};
use crate::config::Settings;
use crate::types::{
    ApiKeyCredential, EntityId, Exchange, Indicator, Instance, NewApiKey, SaveInstanceRequest,
    SaveInstanceResponse, Side, Strategy, StrategyPayload,
};

/// JSON-over-HTTP implementation of [`DashboardApi`].
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    session_cookie: Option<String>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExchangesResponse {
    #[serde(default)]
    exchanges: Vec<Exchange>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiKeysResponse {
    #[serde(default)]
    user_apikeys: Vec<ApiKeyCredential>,
}

#[derive(Debug, Default, Deserialize)]
struct InstancesResponse {
    #[serde(default)]
    instances: Vec<Instance>,
}

// `/get_strategies` answers with `operations` when empty and `strategies`
// otherwise.
#[derive(Debug, Default, Deserialize)]
struct StrategiesResponse {
    #[serde(default)]
    strategies: Option<Vec<Strategy>>,
    #[serde(default)]
    operations: Option<Vec<Strategy>>,
}

impl StrategiesResponse {
    fn into_strategies(self) -> Vec<Strategy> {
        self.strategies.or(self.operations).unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct IndicatorsResponse {
    #[serde(default)]
    indicators: Vec<Indicator>,
}

impl HttpBackend {
    pub fn new(settings: &Settings) -> Result<Self, DashboardError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        let rate = NonZeroU32::new(settings.requests_per_second)
            .ok_or_else(|| DashboardError::Config("requests_per_second must be > 0".to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            session_cookie: settings.session_cookie.clone(),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate))),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.session_cookie {
            Some(cookie) => builder.header(reqwest::header::COOKIE, cookie.as_str()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, DashboardError> {
        self.limiter.until_ready().await;

        let response = builder.send().await?;
        let status = response.status();
        debug!("{} {}", status, response.url());

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(failure_from_body(status, &body))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DashboardError> {
        let response = self.send(self.request(Method::GET, path).query(query)).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, DashboardError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(self.request(Method::POST, path).json(body)).await?;
        let text = response.text().await?;
        ack_from_body(&text)?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn post_ack<B>(&self, path: &str, body: &B) -> Result<(), DashboardError>
    where
        B: Serialize + ?Sized,
    {
        let response = self.send(self.request(Method::POST, path).json(body)).await?;
        let text = response.text().await?;
        ack_from_body(&text)
    }
}

/// Builds the error for a non-2xx response, preferring the structured
/// `error` (then `message`) field of a JSON body.
pub(crate) fn failure_from_body(status: StatusCode, body: &str) -> DashboardError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .error
        .or(parsed.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });

    DashboardError::Http {
        status: status.as_u16(),
        message,
    }
}

/// A 2xx body counts as acknowledged unless it carries an `error` field.
pub(crate) fn ack_from_body(body: &str) -> Result<(), DashboardError> {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: Some(error), ..
        }) => Err(DashboardError::Rejected(error)),
        _ => Ok(()),
    }
}

#[async_trait]
impl DashboardApi for HttpBackend {
    async fn get_symbols(&self) -> Result<Vec<String>, DashboardError> {
        self.get_json("get_symbols", &[]).await
    }

    async fn get_exchanges(&self) -> Result<Vec<Exchange>, DashboardError> {
        let resp: ExchangesResponse = self.get_json("get_exchanges", &[]).await?;
        Ok(resp.exchanges)
    }

    async fn get_user_apikeys(&self) -> Result<Vec<ApiKeyCredential>, DashboardError> {
        let resp: ApiKeysResponse = self.get_json("get_user_apikeys", &[]).await?;
        Ok(resp.user_apikeys)
    }

    async fn save_user_apikey(&self, key: &NewApiKey) -> Result<(), DashboardError> {
        self.post_ack("save_user_apikey", key).await
    }

    async fn remove_user_apikey(&self, api_key_id: &EntityId) -> Result<(), DashboardError> {
        self.post_ack("remove_user_apikey", &json!({ "api_key_id": api_key_id }))
            .await
    }

    async fn get_instances(&self, api_key_id: &EntityId) -> Result<Vec<Instance>, DashboardError> {
        let resp: InstancesResponse = self
            .get_json("get_instances", &[("api_key_id", api_key_id.to_string())])
            .await?;
        Ok(resp.instances)
    }

    async fn save_instance(
        &self,
        request: &SaveInstanceRequest,
    ) -> Result<SaveInstanceResponse, DashboardError> {
        self.post_json("save_instance", request).await
    }

    async fn remove_instance(&self, instance_id: &EntityId) -> Result<(), DashboardError> {
        self.post_ack("remove_instance", &json!({ "instance_id": instance_id }))
            .await
    }

    async fn start_instance(
        &self,
        instance_id: &EntityId,
        strategy_id: &EntityId,
    ) -> Result<(), DashboardError> {
        self.post_ack(
            "start_instance",
            &json!({ "instance_id": instance_id, "strategy_id": strategy_id }),
        )
        .await
    }

    async fn stop_instance(&self, instance_id: &EntityId) -> Result<(), DashboardError> {
        self.post_ack("stop_instance", &json!({ "instance_id": instance_id }))
            .await
    }

    async fn get_instance_strategies(
        &self,
        instance_id: &EntityId,
    ) -> Result<Vec<Strategy>, DashboardError> {
        let resp: StrategiesResponse = self
            .get_json(&format!("get_instance_strategies/{}", instance_id), &[])
            .await?;
        Ok(resp.into_strategies())
    }

    async fn get_instance_operations(&self, instance_id: &EntityId) -> Result<Vec<u8>, DashboardError> {
        let builder = self
            .request(Method::POST, "get_instance_operations")
            .json(&json!({ "instance_id": instance_id }));
        let response = self.send(builder).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn get_strategies(&self) -> Result<Vec<Strategy>, DashboardError> {
        let resp: StrategiesResponse = self.get_json("get_strategies", &[]).await?;
        Ok(resp.into_strategies())
    }

    async fn save_strategy(&self, payload: &StrategyPayload) -> Result<(), DashboardError> {
        self.post_ack("save_strategy", payload).await
    }

    async fn delete_strategy(&self, strategy_id: &EntityId) -> Result<(), DashboardError> {
        self.post_ack("delete_strategy", &json!({ "strategy_id": strategy_id }))
            .await
    }

    async fn start_strategy(&self, strategy_id: &EntityId) -> Result<(), DashboardError> {
        self.post_ack("start_strategy", &json!({ "strategy_id": strategy_id }))
            .await
    }

    async fn stop_strategy(&self, strategy_id: &EntityId) -> Result<(), DashboardError> {
        self.post_ack("stop_strategy", &json!({ "strategy_id": strategy_id }))
            .await
    }

    async fn get_indicators(
        &self,
        strategy_id: &EntityId,
        side: Side,
    ) -> Result<Vec<Indicator>, DashboardError> {
        let resp: IndicatorsResponse = self
            .get_json(
                "get_indicators",
                &[
                    ("strategy_id", strategy_id.to_string()),
                    ("side", side.as_str().to_string()),
                ],
            )
            .await?;
        Ok(resp.indicators)
    }

    async fn save_indicators(&self, indicators: &[Indicator]) -> Result<(), DashboardError> {
        self.post_ack("save_indicators", &json!({ "indicators": indicators }))
            .await
    }

    async fn remove_indicators(&self, indicator_ids: &[EntityId]) -> Result<(), DashboardError> {
        self.post_ack("remove_indicators", &json!({ "indicators": indicator_ids }))
            .await
    }
}
