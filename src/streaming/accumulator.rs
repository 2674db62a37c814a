//! Metered stream wrapper
//!
//! Wraps a chunk stream and ships exactly one terminal payload: on normal
//! end, on the first error, or when the consumer drops the stream early.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use super::StreamChunk;
use crate::api::ChunkStream;
use crate::delivery::DeliveryClient;
use crate::error::ApiError;
use crate::payload::{CallContext, PayloadBuilder, Stopwatch, StreamEnd, StreamSummary};
use crate::provider::{DeploymentResolver, pricing_model};
use crate::sanitize::SECRET_LOOKAHEAD;
use crate::trace_fields::truncate_chars;
use crate::types::OperationType;

/// Lifecycle of a metered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl StreamState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }
}

impl From<StreamEnd> for StreamState {
    fn from(end: StreamEnd) -> Self {
        match end {
            StreamEnd::Completed => Self::Completed,
            StreamEnd::Errored => Self::Errored,
            StreamEnd::Cancelled => Self::Cancelled,
        }
    }
}

/// Everything needed to build and ship the terminal payload.
pub struct StreamMeter {
    pub operation: OperationType,
    pub builder: Arc<PayloadBuilder>,
    pub delivery: DeliveryClient,
    pub resolver: Arc<DeploymentResolver>,
    /// `ctx.model` holds the request model until the stream ends
    pub ctx: CallContext,
    pub stopwatch: Stopwatch,
    /// Maximum captured output characters; `None` disables output capture
    pub capture_limit: Option<usize>,
}

/// A stream that meters itself.
pub struct MeteredStream<C> {
    inner: ChunkStream<C>,
    state: StreamState,
    meter: Option<StreamMeter>,
    summary: StreamSummary,
    first_token: Option<Duration>,
    captured_chars: usize,
}

impl<C: StreamChunk> MeteredStream<C> {
    pub fn new(inner: ChunkStream<C>, meter: StreamMeter) -> Self {
        let summary = StreamSummary {
            output: meter.capture_limit.map(|_| String::new()),
            ..Default::default()
        };
        Self {
            inner,
            state: StreamState::Idle,
            meter: Some(meter),
            summary,
            first_token: None,
            captured_chars: 0,
        }
    }

    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Box into the caller-facing chunk stream type.
    pub fn boxed(self) -> ChunkStream<C> {
        Box::pin(self)
    }

    fn observe(&mut self, chunk: &C) {
        self.state = StreamState::Streaming;
        self.summary.chunk_count += 1;

        if self.summary.id.is_none() {
            self.summary.id = chunk.operation_id().map(str::to_string);
        }
        if let Some(model) = chunk.model() {
            self.summary.model = Some(model.to_string());
        }
        // Keep the most recent snapshot; usage may appear on any chunk.
        if let Some(usage) = chunk.usage() {
            self.summary.usage = Some(usage);
        }
        if let Some(reason) = chunk.stop_reason() {
            self.summary.stop_reason = Some(reason);
        }
        if self.first_token.is_none() && chunk.has_content() {
            self.first_token = self.meter.as_ref().map(|m| m.stopwatch.elapsed());
        }
        if let Some(delta) = chunk.text_delta() {
            self.capture(delta);
        }
    }

    // Raw text is buffered past the limit and only cut to size after
    // sanitizing, when the payload is built.
    fn capture(&mut self, delta: &str) {
        let Some(limit) = self
            .meter
            .as_ref()
            .and_then(|m| m.capture_limit)
            .map(|l| l.saturating_add(SECRET_LOOKAHEAD))
        else {
            return;
        };
        let Some(output) = self.summary.output.as_mut() else {
            return;
        };
        if self.summary.output_truncated {
            return;
        }
        let remaining = limit.saturating_sub(self.captured_chars);
        let (piece, truncated) = truncate_chars(delta, remaining);
        self.captured_chars += piece.chars().count();
        output.push_str(&piece);
        self.summary.output_truncated = truncated;
    }
}

impl<C> MeteredStream<C> {
    /// Move to a terminal state and ship the payload. Runs at most once.
    fn finish(&mut self, end: StreamEnd) {
        if self.state.is_terminal() {
            return;
        }
        self.state = end.into();

        let Some(meter) = self.meter.take() else {
            return;
        };
        let StreamMeter {
            operation,
            builder,
            delivery,
            resolver,
            mut ctx,
            stopwatch,
            ..
        } = meter;

        let mut timing = stopwatch.finish();
        if let Some(elapsed) = self.first_token {
            timing = timing.with_first_token(elapsed);
        }
        ctx.timing = timing;
        let model = self.summary.model.clone().unwrap_or_else(|| ctx.model.clone());
        ctx.model = pricing_model(&ctx.descriptor, &resolver, &model);

        tracing::debug!(
            state = ?self.state,
            chunks = self.summary.chunk_count,
            "Stream reached terminal state"
        );
        delivery.send(builder.stream(operation, &self.summary, end, &ctx));
    }
}

impl<C: StreamChunk> Stream for MeteredStream<C> {
    type Item = Result<C, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.state.is_terminal() {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.observe(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.finish(StreamEnd::Errored);
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finish(StreamEnd::Completed);
                Poll::Ready(None)
            }
        }
    }
}

impl<C> Drop for MeteredStream<C> {
    fn drop(&mut self) {
        self.finish(StreamEnd::Cancelled);
    }
}
