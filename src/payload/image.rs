//! Image generation payloads.
//!
//! Token slots are `null` unless the provider reports image usage.

use super::{CallContext, PayloadBuilder, null_tokens, transaction_id};
use crate::api::ImagesResponse;
use crate::types::{Field, MeteringPayload, OperationType};

impl PayloadBuilder {
    pub fn image(&self, response: &ImagesResponse, ctx: &CallContext) -> MeteringPayload {
        let operation = OperationType::Image;
        let mut payload = self.envelope(operation, transaction_id(None, operation), ctx);
        null_tokens(&mut payload);

        if let Some(usage) = &response.usage {
            payload.input_token_count = Field::Value(usage.input_tokens);
            payload.output_token_count = Field::Value(usage.output_tokens);
            payload.total_token_count = Field::Value(usage.total_tokens);
        }
        payload.unit_count = Some(response.data.len() as u64);

        if let Some(capture) = &ctx.capture {
            let revised = response
                .data
                .first()
                .and_then(|d| d.revised_prompt.as_deref());
            capture
                .clone()
                .with_output(revised, self.max_prompt_size())
                .apply(&mut payload);
        }
        payload
    }
}
