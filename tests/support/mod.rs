//! Shared fixtures: a scripted fake client and a channel-backed sink.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use llm_meter::api::{
    ApiResult, Audio, ChatCompletion, ChatCompletionChunk, ChatCompletions, ChatParams, ChunkStream,
    ClientInfo, Completion, CreateEmbeddingResponse, EmbeddingParams, Embeddings, GenAiClient,
    ImageParams, Images, ImagesResponse, RequestOptions, Response, ResponseStreamEvent, Responses,
    ResponsesParams, Transcription, TranscriptionParams,
};
use llm_meter::{
    ApiError, MeteringConfig, MeteringError, MeteringLayer, MeteringPayload, MeteringSink,
};

pub const TEST_API_KEY: &str = "hak_test_1234567890";

/// Replies handed out in order; every request is recorded.
pub struct Scripted<P, R> {
    replies: Mutex<VecDeque<ApiResult<R>>>,
    seen: Mutex<Vec<P>>,
}

impl<P, R> Default for Scripted<P, R> {
    fn default() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl<P: Clone, R> Scripted<P, R> {
    pub fn reply(self, reply: ApiResult<R>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn seen(&self) -> Vec<P> {
        self.seen.lock().unwrap().clone()
    }

    fn next(&self, params: P) -> ApiResult<R> {
        self.seen.lock().unwrap().push(params);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::new("no scripted reply left")))
    }
}

pub type FakeChat = Scripted<ChatParams, Completion<ChatCompletion, ChatCompletionChunk>>;
pub type FakeEmbeddings = Scripted<EmbeddingParams, CreateEmbeddingResponse>;
pub type FakeResponses = Scripted<ResponsesParams, Completion<Response, ResponseStreamEvent>>;
pub type FakeImages = Scripted<ImageParams, ImagesResponse>;
pub type FakeAudio = Scripted<TranscriptionParams, Transcription>;

#[async_trait]
impl ChatCompletions for FakeChat {
    async fn create(
        &self,
        params: ChatParams,
        _options: Option<RequestOptions>,
    ) -> ApiResult<Completion<ChatCompletion, ChatCompletionChunk>> {
        self.next(params)
    }
}

#[async_trait]
impl Embeddings for FakeEmbeddings {
    async fn create(
        &self,
        params: EmbeddingParams,
        _options: Option<RequestOptions>,
    ) -> ApiResult<CreateEmbeddingResponse> {
        self.next(params)
    }
}

#[async_trait]
impl Responses for FakeResponses {
    async fn create(
        &self,
        params: ResponsesParams,
        _options: Option<RequestOptions>,
    ) -> ApiResult<Completion<Response, ResponseStreamEvent>> {
        self.next(params)
    }
}

#[async_trait]
impl Images for FakeImages {
    async fn generate(
        &self,
        params: ImageParams,
        _options: Option<RequestOptions>,
    ) -> ApiResult<ImagesResponse> {
        self.next(params)
    }
}

#[async_trait]
impl Audio for FakeAudio {
    async fn transcribe(
        &self,
        params: TranscriptionParams,
        _options: Option<RequestOptions>,
    ) -> ApiResult<Transcription> {
        self.next(params)
    }
}

/// A client exposing whichever capabilities are set.
#[derive(Default)]
pub struct FakeClient {
    pub info: ClientInfo,
    pub chat: Option<FakeChat>,
    pub embeddings: Option<FakeEmbeddings>,
    pub responses: Option<FakeResponses>,
    pub images: Option<FakeImages>,
    pub audio: Option<FakeAudio>,
}

impl FakeClient {
    pub fn openai() -> Self {
        Self {
            info: ClientInfo::new("OpenAiClient").with_base_url("https://api.openai.com/v1"),
            ..Default::default()
        }
    }

    pub fn azure() -> Self {
        Self {
            info: ClientInfo::new("AzureOpenAiClient")
                .with_base_url("https://contoso.openai.azure.com")
                .with_api_version("2024-10-21"),
            ..Default::default()
        }
    }

    pub fn with_chat(mut self, chat: FakeChat) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_embeddings(mut self, embeddings: FakeEmbeddings) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn with_responses(mut self, responses: FakeResponses) -> Self {
        self.responses = Some(responses);
        self
    }

    pub fn with_images(mut self, images: FakeImages) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_audio(mut self, audio: FakeAudio) -> Self {
        self.audio = Some(audio);
        self
    }
}

impl GenAiClient for FakeClient {
    fn client_info(&self) -> ClientInfo {
        self.info.clone()
    }

    fn chat(&self) -> Option<&dyn ChatCompletions> {
        self.chat.as_ref().map(|c| c as &dyn ChatCompletions)
    }

    fn embeddings(&self) -> Option<&dyn Embeddings> {
        self.embeddings.as_ref().map(|e| e as &dyn Embeddings)
    }

    fn responses(&self) -> Option<&dyn Responses> {
        self.responses.as_ref().map(|r| r as &dyn Responses)
    }

    fn images(&self) -> Option<&dyn Images> {
        self.images.as_ref().map(|i| i as &dyn Images)
    }

    fn audio(&self) -> Option<&dyn Audio> {
        self.audio.as_ref().map(|a| a as &dyn Audio)
    }
}

/// Stream yielding `items` then ending.
pub fn chunks<C: Send + 'static>(items: Vec<Result<C, ApiError>>) -> ChunkStream<C> {
    Box::pin(stream::iter(items))
}

/// Stream yielding `items` then never ending.
pub fn stalled<C: Send + 'static>(items: Vec<Result<C, ApiError>>) -> ChunkStream<C> {
    use futures_util::StreamExt;
    Box::pin(stream::iter(items).chain(stream::pending()))
}

/// Sink that forwards every payload to a channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<MeteringPayload>,
}

#[async_trait]
impl MeteringSink for ChannelSink {
    async fn submit(&self, payload: &MeteringPayload) -> Result<(), MeteringError> {
        self.tx
            .send(payload.clone())
            .map_err(|e| MeteringError::Internal(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

pub struct Payloads {
    rx: mpsc::UnboundedReceiver<MeteringPayload>,
}

impl Payloads {
    pub async fn next(&mut self) -> MeteringPayload {
        tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("payload within 2s")
            .expect("sink channel open")
    }

    /// Assert nothing else arrives within a short grace period.
    pub async fn assert_quiet(&mut self) {
        let extra = tokio::time::timeout(Duration::from_millis(150), self.rx.recv()).await;
        assert!(extra.is_err(), "unexpected extra payload: {extra:?}");
    }
}

pub fn config() -> MeteringConfig {
    MeteringConfig::builder()
        .api_key(TEST_API_KEY)
        .build()
        .unwrap()
}

/// Layer delivering to a channel.
pub fn layer_with(config: MeteringConfig) -> (MeteringLayer, Payloads) {
    let (tx, rx) = mpsc::unbounded_channel();
    let layer = MeteringLayer::builder()
        .config(config)
        .sink(Arc::new(ChannelSink { tx }))
        .build()
        .unwrap();
    (layer, Payloads { rx })
}

pub fn layer() -> (MeteringLayer, Payloads) {
    layer_with(config())
}
