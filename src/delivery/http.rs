//! HTTP transport for the metering service.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use super::retry::Attempt;
use crate::config::MeteringConfig;
use crate::error::MeteringError;
use crate::sanitize::sanitize_text;
use crate::types::MeteringPayload;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const USER_AGENT: &str = concat!("llm-meter/", env!("CARGO_PKG_VERSION"));

/// Destination for finished metering payloads.
#[async_trait]
pub trait MeteringSink: Send + Sync {
    async fn submit(&self, payload: &MeteringPayload) -> Result<(), MeteringError>;

    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Cost figures the metering service computed for one transaction.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRecord {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub input_token_cost: Option<f64>,
    #[serde(default)]
    pub output_token_cost: Option<f64>,
    #[serde(default)]
    pub total_cost: Option<f64>,
}

/// Read side of the metering service, used for the local summary.
#[async_trait]
pub trait MetricsLookup: Send + Sync {
    /// `NotYet` when the service has not aggregated the transaction yet.
    async fn lookup(
        &self,
        transaction_id: &str,
        team_id: &str,
    ) -> Result<Attempt<MetricsRecord>, MeteringError>;
}

/// Sends payloads to the metering API over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    completions_url: String,
    metrics_url: String,
    api_key: SecretString,
}

impl HttpSink {
    pub fn new(config: &MeteringConfig) -> Result<Self, MeteringError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &MeteringConfig) -> Self {
        Self {
            client,
            completions_url: config.completions_url(),
            metrics_url: config.metrics_url(),
            api_key: config.api_key().clone(),
        }
    }

    async fn error_from(response: reqwest::Response) -> MeteringError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        MeteringError::api(status, sanitize_text(&body))
    }
}

#[async_trait]
impl MeteringSink for HttpSink {
    async fn submit(&self, payload: &MeteringPayload) -> Result<(), MeteringError> {
        let response = self
            .client
            .post(&self.completions_url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        tracing::debug!(
            transaction_id = %payload.transaction_id,
            "Metering payload delivered"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[async_trait]
impl MetricsLookup for HttpSink {
    async fn lookup(
        &self,
        transaction_id: &str,
        team_id: &str,
    ) -> Result<Attempt<MetricsRecord>, MeteringError> {
        let url = format!(
            "{}?transactionId={}&teamId={}",
            self.metrics_url,
            urlencoding::encode(transaction_id),
            urlencoding::encode(team_id)
        );
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await?;

        match response.status().as_u16() {
            404 => return Ok(Attempt::NotYet),
            s if !(200..300).contains(&s) => return Err(Self::error_from(response).await),
            _ => {}
        }

        let body: Value = response.json().await?;
        Ok(first_record(&body).map_or(Attempt::NotYet, Attempt::Ready))
    }
}

/// Pull the first metrics record out of the lookup response. The service
/// answers with either a bare list, a paged `content` list, or a HAL
/// `_embedded` collection; an empty list means "no data yet".
fn first_record(body: &Value) -> Option<MetricsRecord> {
    let list = match body {
        Value::Array(items) => Some(items),
        Value::Object(map) => map
            .get("content")
            .and_then(Value::as_array)
            .or_else(|| {
                map.get("_embedded")
                    .and_then(Value::as_object)
                    .and_then(|e| e.values().find_map(Value::as_array))
            }),
        _ => None,
    }?;
    let first = list.first()?;
    serde_json::from_value(first.clone()).ok()
}
