//! Audio transcription shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::UsageMetadata;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionParams {
    pub model: String,
    pub file_name: String,
    /// Raw audio bytes; sent as multipart by the wrapped client
    #[serde(skip)]
    pub file: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    pub usage_metadata: Option<UsageMetadata>,
}

impl TranscriptionParams {
    pub fn new(model: impl Into<String>, file_name: impl Into<String>, file: Vec<u8>) -> Self {
        Self {
            model: model.into(),
            file_name: file_name.into(),
            file,
            ..Default::default()
        }
    }

    pub fn with_usage_metadata(mut self, metadata: UsageMetadata) -> Self {
        self.usage_metadata = Some(metadata);
        self
    }
}

/// Usage block; duration-priced models report `seconds`, token-priced
/// models report token counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionUsage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TranscriptionUsage>,
}
