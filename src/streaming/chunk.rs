//! What the accumulator needs to know about a chunk.

use crate::api::{ChatCompletionChunk, ResponseStreamEvent};
use crate::payload::responses::response_stop_reason;
use crate::payload::{TokenUsage, map_stop_reason};
use crate::types::StopReason;

/// A partial result from a streamed call.
pub trait StreamChunk: Send + 'static {
    /// Provider-assigned id of the overall operation, if this chunk carries it
    fn operation_id(&self) -> Option<&str>;

    fn model(&self) -> Option<&str>;

    /// Usage snapshot, usually only on the final chunk
    fn usage(&self) -> Option<TokenUsage>;

    /// Text emitted by this chunk
    fn text_delta(&self) -> Option<&str>;

    /// Whether the chunk carries content (text or tool calls); the first such
    /// chunk marks time to first token.
    fn has_content(&self) -> bool {
        self.text_delta().is_some_and(|t| !t.is_empty())
    }

    fn stop_reason(&self) -> Option<StopReason>;
}

impl StreamChunk for ChatCompletionChunk {
    fn operation_id(&self) -> Option<&str> {
        Some(self.id.as_str()).filter(|id| !id.is_empty())
    }

    fn model(&self) -> Option<&str> {
        Some(self.model.as_str()).filter(|m| !m.is_empty())
    }

    fn usage(&self) -> Option<TokenUsage> {
        self.usage.as_ref().map(TokenUsage::from)
    }

    fn text_delta(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }

    fn has_content(&self) -> bool {
        self.choices.iter().any(|c| {
            c.delta.content.as_deref().is_some_and(|t| !t.is_empty())
                || c.delta.tool_calls.is_some()
        })
    }

    fn stop_reason(&self) -> Option<StopReason> {
        self.choices
            .iter()
            .find_map(|c| c.finish_reason.as_deref())
            .map(|reason| map_stop_reason(Some(reason)))
    }
}

impl StreamChunk for ResponseStreamEvent {
    fn operation_id(&self) -> Option<&str> {
        self.response
            .as_ref()
            .map(|r| r.id.as_str())
            .filter(|id| !id.is_empty())
    }

    fn model(&self) -> Option<&str> {
        self.response
            .as_ref()
            .map(|r| r.model.as_str())
            .filter(|m| !m.is_empty())
    }

    fn usage(&self) -> Option<TokenUsage> {
        self.response.as_ref()?.usage.as_ref().map(TokenUsage::from)
    }

    fn text_delta(&self) -> Option<&str> {
        if self.kind == "response.output_text.delta" {
            self.delta.as_deref()
        } else {
            None
        }
    }

    fn has_content(&self) -> bool {
        self.kind.ends_with(".delta") && self.delta.as_deref().is_some_and(|d| !d.is_empty())
    }

    fn stop_reason(&self) -> Option<StopReason> {
        match self.kind.as_str() {
            "response.completed" | "response.incomplete" | "response.failed" => {
                self.response.as_ref().map(response_stop_reason)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CompletionUsage, Response, ResponseUsage};

    #[test]
    fn chat_chunk_accessors() {
        let chunk = ChatCompletionChunk::content("gpt-4o", "Hel");
        assert_eq!(chunk.text_delta(), Some("Hel"));
        assert!(chunk.has_content());
        assert_eq!(chunk.stop_reason(), None);

        let last = ChatCompletionChunk::content("gpt-4o", "")
            .with_finish_reason("length")
            .with_usage(CompletionUsage::new(3, 4));
        assert!(!last.has_content());
        assert_eq!(last.stop_reason(), Some(StopReason::TokenLimit));
        assert_eq!(last.usage().map(|u| u.total), Some(7));
    }

    #[test]
    fn response_event_accessors() {
        let delta = ResponseStreamEvent::text_delta("Hi");
        assert!(delta.has_content());
        assert_eq!(delta.operation_id(), None);

        let done = ResponseStreamEvent::completed(Response {
            id: "resp_9".into(),
            status: Some("completed".into()),
            usage: Some(ResponseUsage::new(5, 6)),
            ..Default::default()
        });
        assert_eq!(done.operation_id(), Some("resp_9"));
        assert_eq!(done.stop_reason(), Some(StopReason::End));
        assert_eq!(done.usage().map(|u| u.output), Some(6));
    }
}
