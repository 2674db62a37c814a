//! Responses API payloads.

use super::{CallContext, PayloadBuilder, TokenUsage, apply_usage, map_stop_reason, transaction_id};
use crate::api::Response;
use crate::types::{MeteringPayload, OperationType, StopReason};

/// Map a response's status (and incomplete reason) to a stop reason.
pub fn response_stop_reason(response: &Response) -> StopReason {
    match response.status.as_deref() {
        Some("failed") => StopReason::Error,
        Some("cancelled") => StopReason::Cancelled,
        Some("incomplete") => {
            let reason = response
                .incomplete_details
                .as_ref()
                .and_then(|d| d.reason.as_deref());
            match reason {
                Some("max_output_tokens") => StopReason::TokenLimit,
                Some("content_filter") => StopReason::Error,
                other => map_stop_reason(other),
            }
        }
        _ => StopReason::End,
    }
}

impl PayloadBuilder {
    pub fn responses(&self, response: &Response, ctx: &CallContext) -> MeteringPayload {
        let operation = OperationType::Chat;
        let mut payload = self.envelope(
            operation,
            transaction_id(Some(response.id.as_str()), operation),
            ctx,
        );
        apply_usage(&mut payload, response.usage.as_ref().map(TokenUsage::from).as_ref());
        payload.stop_reason = response_stop_reason(response);

        if let Some(capture) = &ctx.capture {
            capture
                .clone()
                .with_output(response.output_text().as_deref(), self.max_prompt_size())
                .apply(&mut payload);
        }
        payload
    }
}
