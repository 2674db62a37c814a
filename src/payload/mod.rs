//! Payload builder
//!
//! Turns an observed operation (response or stream summary, request context,
//! timing, provider descriptor, usage metadata) into a [`MeteringPayload`].
//! Building never fails: missing optional fields degrade to absence.
//!
//! Per-operation rules live in the submodules; shared envelope handling lives
//! here.

pub mod audio;
pub mod capture;
pub mod chat;
pub mod embedding;
pub mod image;
pub mod responses;

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::api::{CompletionUsage, ResponseUsage};
use crate::config::MeteringConfig;
use crate::provider::ProviderDescriptor;
use crate::trace_fields::{self, MAX_TRACE_NAME_LEN, TraceFields};
use crate::types::{Field, MeteringPayload, OperationType, StopReason, UsageMetadata};

pub use capture::PromptCapture;

pub const COST_TYPE: &str = "AI";
pub const MIDDLEWARE_SOURCE: &str = "RUST";

/// Wall-clock facts about one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub request_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
    pub duration: Duration,
    pub completion_start_time: Option<DateTime<Utc>>,
    pub time_to_first_token: Option<Duration>,
}

impl Timing {
    pub fn new(request_time: DateTime<Utc>, duration: Duration) -> Self {
        let response_time = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| request_time.checked_add_signed(d))
            .unwrap_or(request_time);
        Self {
            request_time,
            response_time,
            duration,
            completion_start_time: None,
            time_to_first_token: None,
        }
    }

    /// Record the first content-bearing chunk, `elapsed` after the request.
    pub fn with_first_token(mut self, elapsed: Duration) -> Self {
        self.completion_start_time = chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|d| self.request_time.checked_add_signed(d));
        self.time_to_first_token = Some(elapsed);
        self
    }
}

/// Captured at call start; turned into a [`Timing`] when the call ends.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(&self) -> Timing {
        Timing::new(self.started_at, self.elapsed())
    }
}

/// Normalized token usage across response shapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    pub reasoning: Option<u64>,
    pub cache_read: Option<u64>,
}

impl From<&CompletionUsage> for TokenUsage {
    fn from(usage: &CompletionUsage) -> Self {
        Self {
            input: usage.prompt_tokens,
            output: usage.completion_tokens,
            total: usage.total_tokens,
            reasoning: usage.reasoning_tokens(),
            cache_read: usage.cached_tokens(),
        }
    }
}

impl From<&ResponseUsage> for TokenUsage {
    fn from(usage: &ResponseUsage) -> Self {
        Self {
            input: usage.input_tokens,
            output: usage.output_tokens,
            total: usage.total_tokens,
            reasoning: usage.reasoning_tokens(),
            cache_read: usage.cached_tokens(),
        }
    }
}

/// Everything about a call except its response.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub descriptor: ProviderDescriptor,
    /// Already sanitized
    pub metadata: UsageMetadata,
    /// Model id used for pricing
    pub model: String,
    pub timing: Timing,
    pub is_streamed: bool,
    /// Input side of prompt capture, when enabled for this call
    pub capture: Option<PromptCapture>,
}

/// How a streamed call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Completed,
    Errored,
    Cancelled,
}

/// What a stream accumulated by the time it reached a terminal state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub id: Option<String>,
    /// Model reported by the chunks, when any did
    pub model: Option<String>,
    /// Latest usage snapshot seen on any chunk
    pub usage: Option<TokenUsage>,
    pub stop_reason: Option<StopReason>,
    /// Captured output text, when prompt capture is on
    pub output: Option<String>,
    pub output_truncated: bool,
    pub chunk_count: u64,
}

/// Map a vendor finish reason to the metering vocabulary.
pub fn map_stop_reason(finish_reason: Option<&str>) -> StopReason {
    match finish_reason.map(str::trim) {
        Some("length" | "max_tokens" | "max_output_tokens") => StopReason::TokenLimit,
        Some("content_filter") => StopReason::Error,
        Some("stop_sequence") => StopReason::EndSequence,
        Some("timeout") => StopReason::Timeout,
        _ => StopReason::End,
    }
}

/// Use the provider's id when it supplied one; otherwise synthesize one.
pub fn transaction_id(provider_id: Option<&str>, operation: OperationType) -> String {
    match provider_id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("{}-{}", operation.id_prefix(), uuid::Uuid::new_v4()),
    }
}

/// Builds payloads. Holds only configuration; every build is independent.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    trace: TraceFields,
    max_prompt_size: usize,
}

impl PayloadBuilder {
    pub fn new(config: &MeteringConfig) -> Self {
        Self {
            trace: config.trace.clone(),
            max_prompt_size: config.max_prompt_size,
        }
    }

    pub fn with_trace(mut self, trace: TraceFields) -> Self {
        self.trace = trace;
        self
    }

    pub const fn max_prompt_size(&self) -> usize {
        self.max_prompt_size
    }

    /// Payload for a streamed call, whichever way it ended.
    pub fn stream(
        &self,
        operation: OperationType,
        summary: &StreamSummary,
        end: StreamEnd,
        ctx: &CallContext,
    ) -> MeteringPayload {
        let mut payload = self.envelope(
            operation,
            transaction_id(summary.id.as_deref(), operation),
            ctx,
        );
        apply_usage(&mut payload, summary.usage.as_ref());
        payload.stop_reason = match end {
            StreamEnd::Completed => summary.stop_reason.unwrap_or(StopReason::End),
            StreamEnd::Errored => StopReason::Error,
            StreamEnd::Cancelled => StopReason::Cancelled,
        };
        if let Some(capture) = &ctx.capture {
            capture
                .clone()
                .with_output(summary.output.as_deref(), self.max_prompt_size)
                .mark_truncated(summary.output_truncated)
                .apply(&mut payload);
        }
        payload
    }

    /// Payload for a call whose upstream request failed. Token counts stay
    /// absent: nothing was reported.
    pub fn error(&self, operation: OperationType, ctx: &CallContext) -> MeteringPayload {
        let mut payload = self.envelope(operation, transaction_id(None, operation), ctx);
        payload.stop_reason = StopReason::Error;
        if let Some(capture) = &ctx.capture {
            capture.clone().apply(&mut payload);
        }
        payload
    }

    /// Common fields: identity, labels, timing, metadata and trace fields.
    /// Token slots start absent and the stop reason starts at `End`.
    pub(crate) fn envelope(
        &self,
        operation: OperationType,
        transaction_id: String,
        ctx: &CallContext,
    ) -> MeteringPayload {
        let meta = &ctx.metadata;
        let timing = &ctx.timing;

        let trace_type = meta
            .trace_type
            .as_deref()
            .and_then(trace_fields::validate_trace_type)
            .or_else(|| self.trace.trace_type.clone());
        let trace_name = meta
            .trace_name
            .as_deref()
            .map(|name| trace_fields::truncate_chars(name.trim(), MAX_TRACE_NAME_LEN).0)
            .or_else(|| self.trace.trace_name.clone());

        MeteringPayload {
            transaction_id,
            operation_type: operation,
            operation_subtype: meta.operation_subtype.clone(),
            cost_type: COST_TYPE.to_string(),
            middleware_source: MIDDLEWARE_SOURCE.to_string(),
            provider: ctx.descriptor.provider_label().to_string(),
            model_source: ctx.descriptor.model_source().to_string(),
            model: ctx.model.clone(),
            request_time: timing.request_time,
            response_time: timing.response_time,
            request_duration: duration_ms(timing.duration),
            completion_start_time: timing.completion_start_time,
            time_to_first_token: timing.time_to_first_token.map(duration_ms),
            input_token_count: Field::Absent,
            output_token_count: Field::Absent,
            total_token_count: Field::Absent,
            reasoning_token_count: Field::Absent,
            cache_creation_token_count: Field::Absent,
            cache_read_token_count: Field::Absent,
            stop_reason: StopReason::End,
            is_streamed: ctx.is_streamed,
            input_token_cost: None,
            output_token_cost: None,
            total_cost: None,
            subscriber: meta.subscriber.clone(),
            organization_id: meta.organization_id.clone(),
            product_id: meta.product_id.clone(),
            subscription_id: meta.subscription_id.clone(),
            task_type: meta.task_type.clone(),
            agent: meta.agent.clone(),
            trace_id: meta.trace_id.clone(),
            session_id: meta.session_id.clone(),
            response_quality_score: meta.response_quality_score,
            environment: self.trace.environment.clone(),
            region: self.trace.region.clone(),
            credential_alias: self.trace.credential_alias.clone(),
            trace_type,
            trace_name,
            parent_transaction_id: self.trace.parent_transaction_id.clone(),
            retry_number: self.trace.retry_number,
            system_prompt: None,
            input_messages: None,
            output_response: None,
            prompts_truncated: None,
            unit_count: None,
            audio_duration_seconds: None,
        }
    }
}

/// Fill token slots from reported usage. Reasoning and cache-read counts stay
/// absent when the provider did not report them.
pub(crate) fn apply_usage(payload: &mut MeteringPayload, usage: Option<&TokenUsage>) {
    let Some(usage) = usage else {
        return;
    };
    payload.input_token_count = Field::Value(usage.input);
    payload.output_token_count = Field::Value(usage.output);
    payload.total_token_count = Field::Value(usage.total);
    payload.reasoning_token_count = usage.reasoning.into();
    payload.cache_read_token_count = usage.cache_read.into();
}

/// Mark every token slot as not applicable to this operation.
pub(crate) fn null_tokens(payload: &mut MeteringPayload) {
    payload.input_token_count = Field::Null;
    payload.output_token_count = Field::Null;
    payload.total_token_count = Field::Null;
    payload.reasoning_token_count = Field::Null;
    payload.cache_creation_token_count = Field::Null;
    payload.cache_read_token_count = Field::Null;
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn builder() -> PayloadBuilder {
        PayloadBuilder {
            trace: TraceFields::default(),
            max_prompt_size: 64,
        }
    }

    pub fn context(descriptor: ProviderDescriptor, model: &str) -> CallContext {
        let request_time = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        CallContext {
            descriptor,
            metadata: UsageMetadata::default(),
            model: model.to_string(),
            timing: Timing::new(request_time, Duration::from_millis(1250)),
            is_streamed: false,
            capture: None,
        }
    }
}
