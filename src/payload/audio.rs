//! Audio transcription payloads.

use super::{CallContext, PayloadBuilder, null_tokens, transaction_id};
use crate::api::Transcription;
use crate::types::{MeteringPayload, OperationType};

impl PayloadBuilder {
    pub fn audio(&self, response: &Transcription, ctx: &CallContext) -> MeteringPayload {
        let operation = OperationType::Audio;
        let mut payload = self.envelope(operation, transaction_id(None, operation), ctx);
        null_tokens(&mut payload);

        let usage = response.usage.as_ref();
        if let Some(usage) = usage.filter(|u| u.kind == "tokens") {
            payload.input_token_count = usage.input_tokens.into();
            payload.output_token_count = usage.output_tokens.into();
            payload.total_token_count = usage.total_tokens.into();
        }
        payload.audio_duration_seconds = response
            .duration
            .or_else(|| usage.and_then(|u| u.seconds));
        payload.unit_count = Some(1);

        if let Some(capture) = &ctx.capture {
            capture
                .clone()
                .with_output(Some(&response.text), self.max_prompt_size())
                .apply(&mut payload);
        }
        payload
    }
}
