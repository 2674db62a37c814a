//! Embedding payloads.
//!
//! Embeddings produce no output tokens and no reasoning, so those slots are
//! `null` rather than absent.

use super::{CallContext, PayloadBuilder, transaction_id};
use crate::api::CreateEmbeddingResponse;
use crate::types::{Field, MeteringPayload, OperationType};

impl PayloadBuilder {
    pub fn embedding(
        &self,
        response: &CreateEmbeddingResponse,
        input_count: usize,
        ctx: &CallContext,
    ) -> MeteringPayload {
        let operation = OperationType::Embedding;
        let mut payload = self.envelope(operation, transaction_id(None, operation), ctx);

        if let Some(usage) = &response.usage {
            payload.input_token_count = Field::Value(usage.prompt_tokens);
            payload.total_token_count = Field::Value(usage.total_tokens);
        }
        payload.output_token_count = Field::Null;
        payload.reasoning_token_count = Field::Null;
        payload.cache_creation_token_count = Field::Null;
        payload.cache_read_token_count = Field::Null;
        payload.unit_count = Some(input_count as u64);

        if let Some(capture) = &ctx.capture {
            capture.clone().apply(&mut payload);
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::api::{CreateEmbeddingResponse, EmbeddingUsage};
    use crate::provider::ProviderDescriptor;
    use crate::types::{Field, OperationType};

    #[test]
    fn output_slots_are_null_not_absent() {
        let response = CreateEmbeddingResponse {
            model: "text-embedding-3-small".into(),
            usage: Some(EmbeddingUsage {
                prompt_tokens: 8,
                total_tokens: 8,
            }),
            ..Default::default()
        };
        let ctx = context(ProviderDescriptor::primary(), "text-embedding-3-small");
        let payload = builder().embedding(&response, 3, &ctx);

        assert_eq!(payload.operation_type, OperationType::Embedding);
        assert_eq!(payload.input_token_count, Field::Value(8));
        assert_eq!(payload.output_token_count, Field::Null);
        assert_eq!(payload.unit_count, Some(3));
        assert!(payload.transaction_id.starts_with("embed-"));

        let wire = serde_json::to_value(&payload).unwrap();
        assert_eq!(wire["operationType"], "EMBED");
        assert!(wire["outputTokenCount"].is_null());
        assert!(wire.as_object().unwrap().contains_key("outputTokenCount"));
    }
}
