//! # llm-meter
//!
//! Transparent usage metering for generative-AI API clients.
//!
//! Wrap any client implementing [`api::GenAiClient`] and every chat,
//! embedding, responses, image and audio call it makes is observed, turned
//! into a [`MeteringPayload`] and shipped to the metering service in the
//! background. Callers get the original response, stream or error back
//! untouched; metering failures only ever show up in logs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_meter::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo<C: GenAiClient>(client: C) -> Result<(), Box<dyn std::error::Error>> {
//! let layer = MeteringLayer::from_env()?;
//! let client = layer.patch(Arc::new(client));
//!
//! let params = ChatParams::new("gpt-4o-mini", vec![ChatMessage::user("Hello")])
//!     .with_usage_metadata(UsageMetadata::new().with_organization("acme"));
//! if let Some(chat) = client.chat() {
//!     let _response = chat.create(params, None).await?;
//! }
//!
//! layer.flush(std::time::Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Streaming
//!
//! Streamed calls return a [`streaming::MeteredStream`]. Exactly one payload
//! is shipped per stream: when it ends, when it yields an error, or when the
//! consumer drops it early.

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod global;
pub mod layer;
pub mod logging;
pub mod patch;
pub mod payload;
pub mod provider;
pub mod router;
pub mod sanitize;
pub mod streaming;
pub mod trace_fields;
pub mod types;

pub use config::{MeteringConfig, MeteringConfigBuilder, SummaryFormat};
pub use delivery::{DeliveryClient, HttpSink, MeteringSink, RetryPolicy};
pub use error::{ApiError, ApiErrorKind, MeteringError};
pub use layer::{MeteringLayer, MeteringLayerBuilder};
pub use patch::{ClientHandle, MeteredClient, Patcher};
pub use provider::{DeploymentResolver, ProviderDescriptor, ProviderDetector, ProviderKind};
pub use router::{RouteKind, Router};
pub use types::{Field, MeteringPayload, OperationType, StopReason, UsageMetadata};

/// Commonly used items.
pub mod prelude {
    pub use crate::api::{
        Audio, ChatCompletions, ChatMessage, ChatParams, Completion, EmbeddingParams, Embeddings,
        GenAiClient, ImageParams, Images, RequestOptions, Responses, ResponsesParams,
        TranscriptionParams,
    };
    pub use crate::types::{Subscriber, UsageMetadata};
    pub use crate::{ApiError, MeteringConfig, MeteringError, MeteringLayer};
}

static_assertions::assert_impl_all!(DeliveryClient: Send, Sync, Clone);
static_assertions::assert_impl_all!(MeteringLayer: Send, Sync);
static_assertions::assert_impl_all!(Router: Send, Sync, Clone);
static_assertions::assert_impl_all!(MeteringPayload: Send, Sync, Clone);
static_assertions::assert_impl_all!(DeploymentResolver: Send, Sync);
