//! Wrapped client interface
//!
//! The metering layer does not talk to a model provider itself. It wraps any
//! client that implements [`GenAiClient`] and exposes some of the capability
//! traits below. A capability that returns `None` is simply not metered.

pub mod audio;
pub mod chat;
pub mod embeddings;
pub mod images;
pub mod responses;

use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use crate::error::ApiError;
use crate::patch::ClientHandle;

pub use audio::{Transcription, TranscriptionParams, TranscriptionUsage};
pub use chat::{
    ChatChoice, ChatCompletion, ChatCompletionChunk, ChatMessage, ChatParams, ChunkChoice,
    ChunkDelta, CompletionTokensDetails, CompletionUsage, PromptTokensDetails, StreamOptions,
};
pub use embeddings::{
    CreateEmbeddingResponse, Embedding, EmbeddingInput, EmbeddingParams, EmbeddingUsage,
};
pub use images::{ImageData, ImageParams, ImageUsage, ImagesResponse};
pub use responses::{
    IncompleteDetails, Response, ResponseStreamEvent, ResponseUsage, ResponsesParams,
};

pub type ApiResult<T> = Result<T, ApiError>;

/// Asynchronously pulled sequence of partial results.
pub type ChunkStream<C> = Pin<Box<dyn Stream<Item = Result<C, ApiError>> + Send>>;

/// Result of a call that may be streamed.
pub enum Completion<R, C> {
    Single(R),
    Stream(ChunkStream<C>),
}

impl<R, C> Completion<R, C> {
    pub fn into_single(self) -> Option<R> {
        match self {
            Self::Single(r) => Some(r),
            Self::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<ChunkStream<C>> {
        match self {
            Self::Single(_) => None,
            Self::Stream(s) => Some(s),
        }
    }

    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl<R: std::fmt::Debug, C> std::fmt::Debug for Completion<R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(r) => f.debug_tuple("Single").field(r).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Per-call transport options forwarded untouched to the wrapped client.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub headers: HashMap<String, String>,
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Static facts a client exposes about itself, used for provider detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Concrete client type name, e.g. `std::any::type_name::<Self>()`
    pub type_name: String,
    pub base_url: Option<String>,
    pub api_version: Option<String>,
    /// Vendor-specific settings (deployment, organization, ...)
    pub options: HashMap<String, String>,
}

impl ClientInfo {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// A generative-AI client whose calls can be metered.
pub trait GenAiClient: Send + Sync + 'static {
    fn client_info(&self) -> ClientInfo;

    fn chat(&self) -> Option<&dyn ChatCompletions> {
        None
    }

    fn embeddings(&self) -> Option<&dyn Embeddings> {
        None
    }

    fn responses(&self) -> Option<&dyn Responses> {
        None
    }

    fn images(&self) -> Option<&dyn Images> {
        None
    }

    fn audio(&self) -> Option<&dyn Audio> {
        None
    }

    /// Set by metering wrappers so a second wrapper can detect the first.
    fn metering_handle(&self) -> Option<ClientHandle> {
        None
    }
}

#[async_trait]
pub trait ChatCompletions: Send + Sync {
    async fn create(
        &self,
        params: ChatParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<Completion<ChatCompletion, ChatCompletionChunk>>;
}

#[async_trait]
pub trait Embeddings: Send + Sync {
    async fn create(
        &self,
        params: EmbeddingParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<CreateEmbeddingResponse>;
}

#[async_trait]
pub trait Responses: Send + Sync {
    async fn create(
        &self,
        params: ResponsesParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<Completion<Response, ResponseStreamEvent>>;
}

#[async_trait]
pub trait Images: Send + Sync {
    async fn generate(
        &self,
        params: ImageParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<ImagesResponse>;
}

#[async_trait]
pub trait Audio: Send + Sync {
    async fn transcribe(
        &self,
        params: TranscriptionParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<Transcription>;
}
