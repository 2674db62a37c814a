//! Chat completion payloads.

use super::{CallContext, PayloadBuilder, TokenUsage, apply_usage, map_stop_reason, transaction_id};
use crate::api::ChatCompletion;
use crate::types::{MeteringPayload, OperationType};

impl PayloadBuilder {
    pub fn chat(&self, response: &ChatCompletion, ctx: &CallContext) -> MeteringPayload {
        let operation = OperationType::Chat;
        let mut payload = self.envelope(
            operation,
            transaction_id(Some(response.id.as_str()), operation),
            ctx,
        );
        apply_usage(&mut payload, response.usage.as_ref().map(TokenUsage::from).as_ref());
        payload.stop_reason = map_stop_reason(response.first_finish_reason());

        if let Some(capture) = &ctx.capture {
            capture
                .clone()
                .with_output(response.text().as_deref(), self.max_prompt_size())
                .apply(&mut payload);
        }
        payload
    }
}
