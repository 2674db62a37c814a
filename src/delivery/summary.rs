//! Local usage summary
//!
//! Optionally prints a one-line summary after each delivery. When a team id
//! is configured the computed cost is read back from the metering service,
//! retrying while the service reports no data yet. Whatever happens to the
//! lookup, the locally known fields are still printed.

use serde_json::json;
use std::sync::Arc;

use super::http::{MetricsLookup, MetricsRecord};
use super::retry::{RetryExecutor, RetryPolicy};
use crate::config::SummaryFormat;
use crate::types::{Field, MeteringPayload};

pub const SUMMARY_TARGET: &str = "llm_meter::summary";

pub struct SummaryPrinter {
    format: SummaryFormat,
    team_id: Option<String>,
    lookup: Option<Arc<dyn MetricsLookup>>,
    retry: RetryExecutor,
}

impl std::fmt::Debug for SummaryPrinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryPrinter")
            .field("format", &self.format)
            .field("team_id", &self.team_id)
            .field("lookup", &self.lookup.is_some())
            .finish()
    }
}

impl SummaryPrinter {
    pub fn new(format: SummaryFormat) -> Self {
        Self {
            format,
            team_id: None,
            lookup: None,
            retry: RetryExecutor::new(RetryPolicy::default()),
        }
    }

    /// Enable cost lookup for `team_id`.
    pub fn with_lookup(
        mut self,
        team_id: impl Into<String>,
        lookup: Arc<dyn MetricsLookup>,
    ) -> Self {
        self.team_id = Some(team_id.into());
        self.lookup = Some(lookup);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    /// Print the summary for a payload. `delivered` is false when delivery
    /// failed; no lookup is attempted in that case.
    pub async fn print(&self, payload: &MeteringPayload, delivered: bool) {
        let record = if delivered { self.fetch(payload).await } else { None };
        self.emit(&self.render(payload, record.as_ref()));
    }

    async fn fetch(&self, payload: &MeteringPayload) -> Option<MetricsRecord> {
        let (Some(team_id), Some(lookup)) = (self.team_id.as_deref(), self.lookup.as_ref()) else {
            return None;
        };
        let transaction_id = payload.transaction_id.as_str();
        match self
            .retry
            .poll(|| lookup.lookup(transaction_id, team_id))
            .await
        {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                tracing::debug!(transaction_id, "Cost not available yet; printing local summary");
                None
            }
            Err(e) => {
                tracing::warn!(transaction_id, error = %e, "Metrics lookup failed");
                None
            }
        }
    }

    pub fn render(&self, payload: &MeteringPayload, record: Option<&MetricsRecord>) -> String {
        let cost = record.and_then(|r| r.total_cost);
        match self.format {
            SummaryFormat::Json => json!({
                "transactionId": payload.transaction_id,
                "operationType": payload.operation_type,
                "provider": payload.provider,
                "model": payload.model,
                "inputTokens": payload.input_token_count,
                "outputTokens": payload.output_token_count,
                "totalTokens": payload.total_token_count,
                "durationMs": payload.request_duration,
                "stopReason": payload.stop_reason,
                "isStreamed": payload.is_streamed,
                "totalCost": cost,
                "costAvailable": cost.is_some(),
            })
            .to_string(),
            SummaryFormat::Human => {
                let cost = cost.map_or_else(|| "unavailable".to_string(), |c| format!("${c:.6}"));
                format!(
                    "{} {} via {}: tokens in={} out={} total={}, {} ms, stop={:?}, cost={}",
                    payload.transaction_id,
                    payload.model,
                    payload.provider,
                    count(&payload.input_token_count),
                    count(&payload.output_token_count),
                    count(&payload.total_token_count),
                    payload.request_duration,
                    payload.stop_reason,
                    cost
                )
            }
        }
    }

    fn emit(&self, line: &str) {
        tracing::info!(target: SUMMARY_TARGET, "{line}");
    }
}

fn count(field: &Field<u64>) -> String {
    match field {
        Field::Value(v) => v.to_string(),
        Field::Null => "n/a".to_string(),
        Field::Absent => "-".to_string(),
    }
}
