//! Prompt capture
//!
//! When enabled, payloads carry the system prompt, the input messages and the
//! model's output. Every field is sanitized first, then truncated on a char
//! boundary to the configured maximum.

use serde_json::Value;

use crate::api::{ChatMessage, ResponsesParams};
use crate::sanitize::sanitize_text;
use crate::trace_fields::truncate_chars;
use crate::types::MeteringPayload;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptCapture {
    pub system_prompt: Option<String>,
    pub input_messages: Option<String>,
    pub output_response: Option<String>,
    pub truncated: bool,
}

impl PromptCapture {
    /// Capture the input side of a chat call.
    pub fn from_chat(messages: &[ChatMessage], max_size: usize) -> Self {
        let system: Vec<String> = messages
            .iter()
            .filter(|m| m.role == "system" || m.role == "developer")
            .filter_map(ChatMessage::text)
            .collect();
        let rest: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| m.role != "system" && m.role != "developer")
            .collect();

        let mut capture = Self::default();
        if !system.is_empty() {
            capture.system_prompt = Some(capture.bounded(&system.join("\n"), max_size));
        }
        if !rest.is_empty() {
            let rendered = serde_json::to_string(&rest).unwrap_or_default();
            capture.input_messages = Some(capture.bounded(&rendered, max_size));
        }
        capture
    }

    /// Capture the input side of a responses call.
    pub fn from_responses(params: &ResponsesParams, max_size: usize) -> Self {
        let mut capture = Self::default();
        if let Some(instructions) = params.instructions.as_deref() {
            capture.system_prompt = Some(capture.bounded(instructions, max_size));
        }
        let rendered = match &params.input {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        };
        if let Some(rendered) = rendered {
            capture.input_messages = Some(capture.bounded(&rendered, max_size));
        }
        capture
    }

    /// Capture a plain text input (image prompt, transcription prompt).
    pub fn from_text(text: &str, max_size: usize) -> Self {
        let mut capture = Self::default();
        capture.input_messages = Some(capture.bounded(text, max_size));
        capture
    }

    pub fn with_output(mut self, output: Option<&str>, max_size: usize) -> Self {
        if let Some(output) = output {
            self.output_response = Some(self.bounded(output, max_size));
        }
        self
    }

    /// Record truncation that happened upstream of this capture.
    pub fn mark_truncated(mut self, truncated: bool) -> Self {
        self.truncated |= truncated;
        self
    }

    pub fn apply(self, payload: &mut MeteringPayload) {
        payload.system_prompt = self.system_prompt;
        payload.input_messages = self.input_messages;
        payload.output_response = self.output_response;
        payload.prompts_truncated = Some(self.truncated);
    }

    fn bounded(&mut self, text: &str, max_size: usize) -> String {
        let clean = sanitize_text(text);
        let (out, truncated) = truncate_chars(&clean, max_size);
        self.truncated |= truncated;
        out
    }
}
