//! Request router
//!
//! Every metered call goes through [`Router`]: the usage metadata is taken
//! off the request, the original call runs, and the result is dispatched to
//! the non-streaming handler or wrapped in a [`MeteredStream`]. Upstream
//! errors are classified, timed, metered and handed back to the caller.

use std::sync::Arc;
use std::time::Duration;

use crate::api::{
    ApiResult, Audio, ChatCompletion, ChatCompletionChunk, ChatCompletions, ChatParams, ChunkStream,
    Completion, CreateEmbeddingResponse, EmbeddingParams, Embeddings, ImageParams, Images,
    ImagesResponse, RequestOptions, Response, ResponseStreamEvent, Responses, ResponsesParams,
    StreamOptions, Transcription, TranscriptionParams,
};
use crate::config::MeteringConfig;
use crate::delivery::DeliveryClient;
use crate::error::{ApiError, ApiErrorKind, MeteringError};
use crate::payload::{CallContext, PayloadBuilder, PromptCapture, Stopwatch};
use crate::provider::{DeploymentResolver, ProviderDescriptor, pricing_model};
use crate::streaming::{MeteredStream, StreamChunk, StreamMeter};
use crate::types::{MeteringPayload, OperationType, UsageMetadata};

/// Model assumed for image requests that do not name one.
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-2";

const NETWORK_PATTERNS: &[&str] = &[
    "econnrefused",
    "econnreset",
    "etimedout",
    "enotfound",
    "timeout",
    "timed out",
    "connection",
    "socket",
    "dns",
    "network",
];

const CONFIGURATION_PATTERNS: &[&str] = &[
    "api key",
    "api_key",
    "unauthorized",
    "authentication",
    "401",
    "403",
    "404",
    "deployment",
    "not found",
    "forbidden",
];

/// How a call is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Streaming,
    NonStreaming,
    /// Non-streaming call carrying several inputs
    Batch,
}

impl RouteKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::NonStreaming => "non_streaming",
            Self::Batch => "batch",
        }
    }
}

/// Classify an upstream error and attach the elapsed time.
///
/// A kind the client already set is kept. Otherwise the HTTP status decides,
/// then the message is matched against network-shaped and
/// configuration-shaped patterns.
pub fn classify_error(error: ApiError, elapsed: Duration) -> ApiError {
    if error.kind != ApiErrorKind::Other {
        return error.with_duration(elapsed);
    }
    let kind = match error.status {
        Some(429) => ApiErrorKind::RateLimit,
        Some(408) => ApiErrorKind::Network,
        Some(401 | 403 | 404) => ApiErrorKind::Configuration,
        Some(s) if s >= 500 => ApiErrorKind::Server,
        _ => classify_message(&error.message),
    };
    error.with_kind(kind).with_duration(elapsed)
}

fn classify_message(message: &str) -> ApiErrorKind {
    let lower = message.to_ascii_lowercase();
    if NETWORK_PATTERNS.iter().any(|p| lower.contains(p)) {
        ApiErrorKind::Network
    } else if CONFIGURATION_PATTERNS.iter().any(|p| lower.contains(p)) {
        ApiErrorKind::Configuration
    } else {
        ApiErrorKind::Other
    }
}

/// Minimum shape a response needs before it is metered.
pub trait Meterable {
    fn validate_shape(&self) -> Result<(), MeteringError>;

    /// Model the provider says it used
    fn reported_model(&self) -> Option<&str> {
        None
    }
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.trim().is_empty())
}

impl Meterable for ChatCompletion {
    fn validate_shape(&self) -> Result<(), MeteringError> {
        if self.choices.is_empty() && self.usage.is_none() {
            return Err(MeteringError::Validation(
                "chat completion has neither choices nor usage".to_string(),
            ));
        }
        Ok(())
    }

    fn reported_model(&self) -> Option<&str> {
        non_empty(&self.model)
    }
}

impl Meterable for Response {
    fn validate_shape(&self) -> Result<(), MeteringError> {
        if self.id.is_empty() && self.output.is_empty() && self.usage.is_none() {
            return Err(MeteringError::Validation(
                "response has no id, output or usage".to_string(),
            ));
        }
        Ok(())
    }

    fn reported_model(&self) -> Option<&str> {
        non_empty(&self.model)
    }
}

impl Meterable for CreateEmbeddingResponse {
    fn validate_shape(&self) -> Result<(), MeteringError> {
        if self.data.is_empty() && self.usage.is_none() {
            return Err(MeteringError::Validation(
                "embedding response has neither data nor usage".to_string(),
            ));
        }
        Ok(())
    }

    fn reported_model(&self) -> Option<&str> {
        non_empty(&self.model)
    }
}

impl Meterable for ImagesResponse {
    fn validate_shape(&self) -> Result<(), MeteringError> {
        if self.data.is_empty() {
            return Err(MeteringError::Validation(
                "image response contains no images".to_string(),
            ));
        }
        Ok(())
    }
}

impl Meterable for Transcription {
    fn validate_shape(&self) -> Result<(), MeteringError> {
        Ok(())
    }
}

/// One call in flight.
struct Call {
    operation: OperationType,
    kind: RouteKind,
    descriptor: ProviderDescriptor,
    metadata: UsageMetadata,
    request_model: String,
    capture: Option<PromptCapture>,
    stopwatch: Stopwatch,
}

/// Dispatches metered calls.
#[derive(Debug, Clone)]
pub struct Router {
    builder: Arc<PayloadBuilder>,
    delivery: DeliveryClient,
    resolver: Arc<DeploymentResolver>,
    capture_prompts: bool,
    max_prompt_size: usize,
    request_usage_on_stream: bool,
}

impl Router {
    pub fn new(
        config: &MeteringConfig,
        delivery: DeliveryClient,
        resolver: Arc<DeploymentResolver>,
    ) -> Self {
        Self {
            builder: Arc::new(PayloadBuilder::new(config)),
            delivery,
            resolver,
            capture_prompts: config.capture_prompts,
            max_prompt_size: config.max_prompt_size,
            request_usage_on_stream: true,
        }
    }

    /// Whether streamed chat calls that set no `stream_options` ask the
    /// provider to append a usage chunk. On by default.
    pub fn with_stream_usage_request(mut self, enabled: bool) -> Self {
        self.request_usage_on_stream = enabled;
        self
    }

    pub fn delivery(&self) -> &DeliveryClient {
        &self.delivery
    }

    pub fn resolver(&self) -> &DeploymentResolver {
        &self.resolver
    }

    pub async fn route_chat(
        &self,
        inner: &dyn ChatCompletions,
        descriptor: &ProviderDescriptor,
        mut params: ChatParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<Completion<ChatCompletion, ChatCompletionChunk>> {
        let metadata = params.usage_metadata.take();
        let kind = if params.is_stream() {
            RouteKind::Streaming
        } else {
            RouteKind::NonStreaming
        };
        if kind == RouteKind::Streaming
            && self.request_usage_on_stream
            && params.stream_options.is_none()
        {
            params.stream_options = Some(StreamOptions {
                include_usage: Some(true),
            });
        }
        let call = self.begin(
            OperationType::Chat,
            kind,
            descriptor,
            metadata,
            &params.model,
            |max| PromptCapture::from_chat(&params.messages, max),
        );

        match inner.create(params, options).await {
            Ok(Completion::Single(response)) => Ok(Completion::Single(
                self.single(&call, response, |b, r, ctx| b.chat(r, ctx)),
            )),
            Ok(Completion::Stream(stream)) => Ok(Completion::Stream(self.stream(call, stream))),
            Err(error) => Err(self.fail(&call, error)),
        }
    }

    pub async fn route_responses(
        &self,
        inner: &dyn Responses,
        descriptor: &ProviderDescriptor,
        mut params: ResponsesParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<Completion<Response, ResponseStreamEvent>> {
        let metadata = params.usage_metadata.take();
        let kind = if params.is_stream() {
            RouteKind::Streaming
        } else {
            RouteKind::NonStreaming
        };
        let call = self.begin(
            OperationType::Chat,
            kind,
            descriptor,
            metadata,
            &params.model,
            |max| PromptCapture::from_responses(&params, max),
        );

        match inner.create(params, options).await {
            Ok(Completion::Single(response)) => Ok(Completion::Single(
                self.single(&call, response, |b, r, ctx| b.responses(r, ctx)),
            )),
            Ok(Completion::Stream(stream)) => Ok(Completion::Stream(self.stream(call, stream))),
            Err(error) => Err(self.fail(&call, error)),
        }
    }

    pub async fn route_embedding(
        &self,
        inner: &dyn Embeddings,
        descriptor: &ProviderDescriptor,
        mut params: EmbeddingParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<CreateEmbeddingResponse> {
        let metadata = params.usage_metadata.take();
        let input_count = params.input.len();
        let kind = if params.input.is_batch() {
            RouteKind::Batch
        } else {
            RouteKind::NonStreaming
        };
        let call = self.begin(
            OperationType::Embedding,
            kind,
            descriptor,
            metadata,
            &params.model,
            |max| PromptCapture::from_text(&params.input.texts().join("\n"), max),
        );

        match inner.create(params, options).await {
            Ok(response) => Ok(self.single(&call, response, |b, r, ctx| {
                b.embedding(r, input_count, ctx)
            })),
            Err(error) => Err(self.fail(&call, error)),
        }
    }

    pub async fn route_images(
        &self,
        inner: &dyn Images,
        descriptor: &ProviderDescriptor,
        mut params: ImageParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<ImagesResponse> {
        let metadata = params.usage_metadata.take();
        let model = params
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string());
        let call = self.begin(
            OperationType::Image,
            RouteKind::NonStreaming,
            descriptor,
            metadata,
            &model,
            |max| PromptCapture::from_text(&params.prompt, max),
        );

        match inner.generate(params, options).await {
            Ok(response) => Ok(self.single(&call, response, |b, r, ctx| b.image(r, ctx))),
            Err(error) => Err(self.fail(&call, error)),
        }
    }

    pub async fn route_audio(
        &self,
        inner: &dyn Audio,
        descriptor: &ProviderDescriptor,
        mut params: TranscriptionParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<Transcription> {
        let metadata = params.usage_metadata.take();
        let call = self.begin(
            OperationType::Audio,
            RouteKind::NonStreaming,
            descriptor,
            metadata,
            &params.model,
            |max| match params.prompt.as_deref() {
                Some(prompt) => PromptCapture::from_text(prompt, max),
                None => PromptCapture::default(),
            },
        );

        match inner.transcribe(params, options).await {
            Ok(response) => Ok(self.single(&call, response, |b, r, ctx| b.audio(r, ctx))),
            Err(error) => Err(self.fail(&call, error)),
        }
    }

    fn begin(
        &self,
        operation: OperationType,
        kind: RouteKind,
        descriptor: &ProviderDescriptor,
        metadata: Option<UsageMetadata>,
        request_model: &str,
        capture: impl FnOnce(usize) -> PromptCapture,
    ) -> Call {
        let metadata = metadata.map(UsageMetadata::sanitized).unwrap_or_default();
        let capture = metadata
            .capture_prompts
            .unwrap_or(self.capture_prompts)
            .then(|| capture(self.max_prompt_size));

        tracing::debug!(
            operation = ?operation,
            route = kind.as_str(),
            provider = descriptor.provider_label(),
            model = request_model,
            "Routing metered call"
        );

        Call {
            operation,
            kind,
            descriptor: descriptor.clone(),
            metadata,
            request_model: request_model.to_string(),
            capture,
            stopwatch: Stopwatch::start(),
        }
    }

    /// Model to price a finished call by; the reported model wins.
    fn priced_model(&self, call: &Call, reported_model: Option<&str>) -> String {
        let model = reported_model.unwrap_or(&call.request_model);
        pricing_model(&call.descriptor, &self.resolver, model)
    }

    fn context(&self, call: &Call, model: String, is_streamed: bool) -> CallContext {
        CallContext {
            descriptor: call.descriptor.clone(),
            metadata: call.metadata.clone(),
            model,
            timing: call.stopwatch.finish(),
            is_streamed,
            capture: call.capture.clone(),
        }
    }

    /// Non-streaming handler: validate, meter, return the response as is.
    fn single<R: Meterable>(
        &self,
        call: &Call,
        response: R,
        build: impl FnOnce(&PayloadBuilder, &R, &CallContext) -> MeteringPayload,
    ) -> R {
        if let Err(e) = response.validate_shape() {
            tracing::warn!(
                operation = ?call.operation,
                error = %e,
                "Unexpected response shape; returning response unmetered"
            );
            return response;
        }
        let model = self.priced_model(call, response.reported_model());
        let ctx = self.context(call, model, false);
        let payload = build(&self.builder, &response, &ctx);
        tracing::debug!(
            transaction_id = %payload.transaction_id,
            route = call.kind.as_str(),
            duration_ms = payload.request_duration,
            "Metered call completed"
        );
        self.delivery.send(payload);
        response
    }

    fn stream<C: StreamChunk>(&self, call: Call, stream: ChunkStream<C>) -> ChunkStream<C> {
        // Resolved when the stream ends, once the chunks have named a model.
        let ctx = self.context(&call, call.request_model.clone(), true);
        let capture_limit = call.capture.as_ref().map(|_| self.max_prompt_size);
        MeteredStream::new(
            stream,
            StreamMeter {
                operation: call.operation,
                builder: self.builder.clone(),
                delivery: self.delivery.clone(),
                resolver: self.resolver.clone(),
                ctx,
                stopwatch: call.stopwatch,
                capture_limit,
            },
        )
        .boxed()
    }

    /// Classify the error, meter the failed call, hand the error back.
    fn fail(&self, call: &Call, error: ApiError) -> ApiError {
        let error = classify_error(error, call.stopwatch.elapsed());
        tracing::debug!(
            operation = ?call.operation,
            kind = %error.kind,
            status = ?error.status,
            "Upstream call failed"
        );
        let model = self.priced_model(call, None);
        let ctx = self.context(call, model, call.kind == RouteKind::Streaming);
        self.delivery.send(self.builder.error(call.operation, &ctx));
        error
    }
}
