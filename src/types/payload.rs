//! Metering payload
//!
//! The canonical, wire-ready record of one completed or terminated operation.
//! Field names follow the metering service's camelCase JSON schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::field::Field;
use super::metadata::Subscriber;

/// Kind of operation being metered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Chat,
    #[serde(rename = "EMBED")]
    Embedding,
    Image,
    Audio,
    Other,
}

impl OperationType {
    /// Prefix used for synthesized transaction ids.
    pub const fn id_prefix(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Embedding => "embed",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Other => "op",
        }
    }
}

/// Why an operation stopped, in the metering service's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    End,
    EndSequence,
    Timeout,
    TokenLimit,
    CostLimit,
    CompletionLimit,
    Error,
    Cancelled,
}

/// One metering event.
///
/// Cost fields are always `None` at this layer; the metering service fills
/// them in. Token slots use [`Field`] so "not reported" and "not applicable"
/// stay distinct on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringPayload {
    pub transaction_id: String,
    pub operation_type: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_subtype: Option<String>,
    pub cost_type: String,
    pub middleware_source: String,
    pub provider: String,
    pub model_source: String,
    pub model: String,

    pub request_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
    /// Milliseconds between request and response
    pub request_duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_start_time: Option<DateTime<Utc>>,
    /// Milliseconds until the first content-bearing chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_first_token: Option<u64>,

    #[serde(default, skip_serializing_if = "Field::is_absent")]
    pub input_token_count: Field<u64>,
    #[serde(default, skip_serializing_if = "Field::is_absent")]
    pub output_token_count: Field<u64>,
    #[serde(default, skip_serializing_if = "Field::is_absent")]
    pub total_token_count: Field<u64>,
    #[serde(default, skip_serializing_if = "Field::is_absent")]
    pub reasoning_token_count: Field<u64>,
    #[serde(default, skip_serializing_if = "Field::is_absent")]
    pub cache_creation_token_count: Field<u64>,
    #[serde(default, skip_serializing_if = "Field::is_absent")]
    pub cache_read_token_count: Field<u64>,

    pub stop_reason: StopReason,
    pub is_streamed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_token_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_token_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber: Option<Subscriber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_quality_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_number: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_messages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts_truncated: Option<bool>,

    /// Number of inputs in a batched call, or images/audio units produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration_seconds: Option<f64>,
}

impl MeteringPayload {
    pub const fn is_terminal_error(&self) -> bool {
        matches!(self.stop_reason, StopReason::Error)
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self.stop_reason, StopReason::Cancelled)
    }
}
