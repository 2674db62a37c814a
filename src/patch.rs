//! Instance patcher
//!
//! [`Patcher::patch`] wraps a client in a [`MeteredClient`], a decorator that
//! implements the same [`GenAiClient`] surface and routes every capability
//! call through the [`Router`]. Wrappers are tracked in a handle registry
//! keyed by the client's pointer identity, holding only weak references, so
//! patching the same `Arc` twice yields the same wrapper and a dropped
//! wrapper never lingers.

use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::api::{
    ApiResult, Audio, ChatCompletion, ChatCompletionChunk, ChatCompletions, ChatParams, ClientInfo,
    Completion, CreateEmbeddingResponse, EmbeddingParams, Embeddings, GenAiClient, ImageParams,
    Images, ImagesResponse, RequestOptions, Response, ResponseStreamEvent, Responses,
    ResponsesParams, Transcription, TranscriptionParams,
};
use crate::error::{ApiError, ApiErrorKind};
use crate::provider::{ProviderDescriptor, ProviderDetector};
use crate::router::Router;

/// Opaque id issued to each wrapped client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientHandle(u64);

impl ClientHandle {
    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

struct WrapperEntry {
    handle: ClientHandle,
    wrapper: Weak<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct RegistryState {
    descriptors: HashMap<ClientHandle, ProviderDescriptor>,
    wrappers: HashMap<usize, WrapperEntry>,
}

/// Handle-indexed side table. Never owns a client or a wrapper.
#[derive(Default)]
struct Registry {
    next: AtomicU64,
    state: Mutex<RegistryState>,
}

impl Registry {
    fn issue(&self) -> ClientHandle {
        ClientHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }

    // Upgrading happens outside the lock: dropping the last strong reference
    // runs `MeteredClient::drop`, which takes the lock again.
    fn existing<C: GenAiClient>(&self, key: usize) -> Option<Arc<MeteredClient<C>>> {
        let weak = self.state.lock().ok()?.wrappers.get(&key)?.wrapper.clone();
        weak.upgrade()?.downcast::<MeteredClient<C>>().ok()
    }

    /// Record a new wrapper unless another one won the race for `key`.
    fn insert<C: GenAiClient>(
        &self,
        key: usize,
        wrapper: &Arc<MeteredClient<C>>,
    ) -> Option<Arc<MeteredClient<C>>> {
        let erased: Arc<dyn Any + Send + Sync> = wrapper.clone();
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        let live = state
            .wrappers
            .get(&key)
            .is_some_and(|e| e.wrapper.strong_count() > 0);
        if live {
            drop(state);
            return self.existing::<C>(key);
        }
        state
            .descriptors
            .insert(wrapper.handle, wrapper.descriptor.clone());
        state.wrappers.insert(
            key,
            WrapperEntry {
                handle: wrapper.handle,
                wrapper: Arc::downgrade(&erased),
            },
        );
        None
    }

    fn remove(&self, key: usize, handle: ClientHandle) {
        if let Ok(mut state) = self.state.lock() {
            state.descriptors.remove(&handle);
            if state.wrappers.get(&key).is_some_and(|e| e.handle == handle) {
                state.wrappers.remove(&key);
            }
        }
    }

    fn descriptor(&self, handle: ClientHandle) -> Option<ProviderDescriptor> {
        self.state.lock().ok()?.descriptors.get(&handle).cloned()
    }

    fn len(&self) -> usize {
        self.state.lock().map(|s| s.descriptors.len()).unwrap_or_default()
    }
}

/// Wraps clients so their calls are metered.
pub struct Patcher {
    router: Router,
    detector: ProviderDetector,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Patcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Patcher")
            .field("detector", &self.detector)
            .field("patched", &self.registry.len())
            .finish()
    }
}

impl Patcher {
    pub fn new(router: Router, detector: ProviderDetector) -> Self {
        Self {
            router,
            detector,
            registry: Arc::new(Registry::default()),
        }
    }

    /// Wrap `client`. Patching the same `Arc` again returns the wrapper
    /// already in use.
    pub fn patch<C: GenAiClient>(&self, client: Arc<C>) -> Arc<MeteredClient<C>> {
        let key = Arc::as_ptr(&client) as *const () as usize;
        if let Some(existing) = self.registry.existing::<C>(key) {
            tracing::debug!(handle = %existing.handle, "Client already patched");
            return existing;
        }

        let passthrough = client.metering_handle();
        if let Some(inner_handle) = passthrough {
            tracing::warn!(
                inner = %inner_handle,
                "Client is already metered; new wrapper will pass calls through unmetered"
            );
        }

        let info = match catch_unwind(AssertUnwindSafe(|| client.client_info())) {
            Ok(info) => info,
            Err(_) => {
                tracing::error!(
                    client = std::any::type_name::<C>(),
                    "Reading client info panicked; assuming primary vendor defaults"
                );
                ClientInfo::new(std::any::type_name::<C>())
            }
        };
        let descriptor = self.detector.detect(&info);
        let handle = self.registry.issue();

        let wrapper = Arc::new(MeteredClient {
            inner: client,
            router: self.router.clone(),
            descriptor,
            handle,
            passthrough: passthrough.is_some(),
            key,
            registry: Arc::downgrade(&self.registry),
        });

        if let Some(winner) = self.registry.insert(key, &wrapper) {
            return winner;
        }

        tracing::debug!(
            handle = %handle,
            provider = wrapper.descriptor.provider_label(),
            detected_by = wrapper.descriptor.detected_by,
            chat = wrapper.inner.chat().is_some(),
            embeddings = wrapper.inner.embeddings().is_some(),
            responses = wrapper.inner.responses().is_some(),
            images = wrapper.inner.images().is_some(),
            audio = wrapper.inner.audio().is_some(),
            "Client patched"
        );
        wrapper
    }

    /// Descriptor recorded for a live wrapper.
    pub fn descriptor(&self, handle: ClientHandle) -> Option<ProviderDescriptor> {
        self.registry.descriptor(handle)
    }

    /// Number of live wrappers.
    pub fn patched_count(&self) -> usize {
        self.registry.len()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}

/// A client whose calls are metered.
pub struct MeteredClient<C> {
    inner: Arc<C>,
    router: Router,
    descriptor: ProviderDescriptor,
    handle: ClientHandle,
    passthrough: bool,
    key: usize,
    registry: Weak<Registry>,
}

impl<C> std::fmt::Debug for MeteredClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteredClient")
            .field("handle", &self.handle)
            .field("descriptor", &self.descriptor)
            .field("passthrough", &self.passthrough)
            .finish()
    }
}

impl<C> MeteredClient<C> {
    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }

    pub const fn handle(&self) -> ClientHandle {
        self.handle
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    /// Whether calls go straight to an inner client that meters itself.
    pub const fn is_passthrough(&self) -> bool {
        self.passthrough
    }
}

impl<C> Drop for MeteredClient<C> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.key, self.handle);
        }
    }
}

fn unsupported(capability: &str) -> ApiError {
    ApiError::new(format!("wrapped client does not support {capability}"))
        .with_kind(ApiErrorKind::Configuration)
}

impl<C: GenAiClient> GenAiClient for MeteredClient<C> {
    fn client_info(&self) -> ClientInfo {
        self.inner.client_info()
    }

    fn chat(&self) -> Option<&dyn ChatCompletions> {
        if self.passthrough {
            return self.inner.chat();
        }
        self.inner.chat().map(|_| self as &dyn ChatCompletions)
    }

    fn embeddings(&self) -> Option<&dyn Embeddings> {
        if self.passthrough {
            return self.inner.embeddings();
        }
        self.inner.embeddings().map(|_| self as &dyn Embeddings)
    }

    fn responses(&self) -> Option<&dyn Responses> {
        if self.passthrough {
            return self.inner.responses();
        }
        self.inner.responses().map(|_| self as &dyn Responses)
    }

    fn images(&self) -> Option<&dyn Images> {
        if self.passthrough {
            return self.inner.images();
        }
        self.inner.images().map(|_| self as &dyn Images)
    }

    fn audio(&self) -> Option<&dyn Audio> {
        if self.passthrough {
            return self.inner.audio();
        }
        self.inner.audio().map(|_| self as &dyn Audio)
    }

    fn metering_handle(&self) -> Option<ClientHandle> {
        Some(self.handle)
    }
}

#[async_trait]
impl<C: GenAiClient> ChatCompletions for MeteredClient<C> {
    async fn create(
        &self,
        params: ChatParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<Completion<ChatCompletion, ChatCompletionChunk>> {
        let inner = self.inner.chat().ok_or_else(|| unsupported("chat"))?;
        if self.passthrough {
            return inner.create(params, options).await;
        }
        self.router
            .route_chat(inner, &self.descriptor, params, options)
            .await
    }
}

#[async_trait]
impl<C: GenAiClient> Embeddings for MeteredClient<C> {
    async fn create(
        &self,
        params: EmbeddingParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<CreateEmbeddingResponse> {
        let inner = self
            .inner
            .embeddings()
            .ok_or_else(|| unsupported("embeddings"))?;
        if self.passthrough {
            return inner.create(params, options).await;
        }
        self.router
            .route_embedding(inner, &self.descriptor, params, options)
            .await
    }
}

#[async_trait]
impl<C: GenAiClient> Responses for MeteredClient<C> {
    async fn create(
        &self,
        params: ResponsesParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<Completion<Response, ResponseStreamEvent>> {
        let inner = self
            .inner
            .responses()
            .ok_or_else(|| unsupported("responses"))?;
        if self.passthrough {
            return inner.create(params, options).await;
        }
        self.router
            .route_responses(inner, &self.descriptor, params, options)
            .await
    }
}

#[async_trait]
impl<C: GenAiClient> Images for MeteredClient<C> {
    async fn generate(
        &self,
        params: ImageParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<ImagesResponse> {
        let inner = self.inner.images().ok_or_else(|| unsupported("images"))?;
        if self.passthrough {
            return inner.generate(params, options).await;
        }
        self.router
            .route_images(inner, &self.descriptor, params, options)
            .await
    }
}

#[async_trait]
impl<C: GenAiClient> Audio for MeteredClient<C> {
    async fn transcribe(
        &self,
        params: TranscriptionParams,
        options: Option<RequestOptions>,
    ) -> ApiResult<Transcription> {
        let inner = self.inner.audio().ok_or_else(|| unsupported("audio"))?;
        if self.passthrough {
            return inner.transcribe(params, options).await;
        }
        self.router
            .route_audio(inner, &self.descriptor, params, options)
            .await
    }
}
