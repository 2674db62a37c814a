//! Composition root
//!
//! [`MeteringLayer`] assembles configuration, delivery, provider detection,
//! deployment resolution, the router and the patcher exactly once. Hosts
//! build one layer at startup and patch their clients through it.
//!
//! ```rust,no_run
//! use llm_meter::MeteringLayer;
//! # use llm_meter::{MeteringError, api::GenAiClient};
//! # use std::sync::Arc;
//!
//! # fn demo<C: GenAiClient>(client: Arc<C>) -> Result<(), MeteringError> {
//! let layer = MeteringLayer::from_env()?;
//! let metered = layer.patch(client);
//! # let _ = metered;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::api::GenAiClient;
use crate::config::MeteringConfig;
use crate::delivery::{DeliveryClient, MeteringSink, MetricsLookup, RetryPolicy, SummaryPrinter};
use crate::error::MeteringError;
use crate::patch::{MeteredClient, Patcher};
use crate::provider::{DeploymentResolver, ProviderDetector};
use crate::router::Router;

/// Everything the metering pipeline needs, wired together.
#[derive(Debug)]
pub struct MeteringLayer {
    config: Arc<MeteringConfig>,
    delivery: DeliveryClient,
    resolver: Arc<DeploymentResolver>,
    patcher: Patcher,
}

impl MeteringLayer {
    pub fn builder() -> MeteringLayerBuilder {
        MeteringLayerBuilder::default()
    }

    /// Layer configured from the process environment, delivering over HTTP.
    pub fn from_env() -> Result<Self, MeteringError> {
        Self::builder().build()
    }

    pub fn from_config(config: MeteringConfig) -> Result<Self, MeteringError> {
        Self::builder().config(config).build()
    }

    /// Wrap a client so its calls are metered.
    pub fn patch<C: GenAiClient>(&self, client: Arc<C>) -> Arc<MeteredClient<C>> {
        self.patcher.patch(client)
    }

    pub fn config(&self) -> &MeteringConfig {
        &self.config
    }

    pub fn delivery(&self) -> &DeliveryClient {
        &self.delivery
    }

    pub fn resolver(&self) -> &DeploymentResolver {
        &self.resolver
    }

    pub fn patcher(&self) -> &Patcher {
        &self.patcher
    }

    /// Wait up to `timeout` for in-flight deliveries.
    pub async fn flush(&self, timeout: Duration) -> bool {
        self.delivery.flush(timeout).await
    }
}

/// Builder for [`MeteringLayer`].
#[derive(Default)]
pub struct MeteringLayerBuilder {
    config: Option<MeteringConfig>,
    sink: Option<Arc<dyn MeteringSink>>,
    lookup: Option<Arc<dyn MetricsLookup>>,
    detector: Option<ProviderDetector>,
    resolver: Option<Arc<DeploymentResolver>>,
    delivery_retry: Option<RetryPolicy>,
    init_logging: bool,
    stream_usage_request: Option<bool>,
}

impl std::fmt::Debug for MeteringLayerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteringLayerBuilder")
            .field("config", &self.config)
            .field("custom_sink", &self.sink.as_ref().map(|s| s.name()))
            .field("detector", &self.detector)
            .field("delivery_retry", &self.delivery_retry)
            .field("init_logging", &self.init_logging)
            .finish()
    }
}

impl MeteringLayerBuilder {
    /// Use this configuration instead of reading the environment.
    pub fn config(mut self, config: MeteringConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Deliver to a custom sink instead of the metering HTTP API.
    pub fn sink(mut self, sink: Arc<dyn MeteringSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Cost lookup for the local summary when a custom sink is used.
    pub fn metrics_lookup(mut self, lookup: Arc<dyn MetricsLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn detector(mut self, detector: ProviderDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Share a resolver cache between layers.
    pub fn resolver(mut self, resolver: Arc<DeploymentResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Retry policy for payload submission.
    pub fn delivery_retry(mut self, policy: RetryPolicy) -> Self {
        self.delivery_retry = Some(policy);
        self
    }

    /// Install the crate's `fmt` subscriber while building.
    pub fn init_logging(mut self, enabled: bool) -> Self {
        self.init_logging = enabled;
        self
    }

    /// Ask providers for a usage chunk on streamed chat calls that set no
    /// stream options. On by default.
    pub fn stream_usage_request(mut self, enabled: bool) -> Self {
        self.stream_usage_request = Some(enabled);
        self
    }

    pub fn build(self) -> Result<MeteringLayer, MeteringError> {
        let config = match self.config {
            Some(config) => config,
            None => MeteringConfig::from_env()?,
        };
        if self.init_logging {
            crate::logging::init(&config);
        }

        let mut delivery = match self.sink {
            Some(sink) => {
                let mut delivery = DeliveryClient::new(sink);
                if let Some(format) = config.print_summary {
                    let mut printer =
                        SummaryPrinter::new(format).with_retry(config.metrics_retry.clone());
                    if let (Some(team_id), Some(lookup)) = (config.team_id.as_deref(), self.lookup)
                    {
                        printer = printer.with_lookup(team_id, lookup);
                    }
                    delivery = delivery.with_summary(printer);
                }
                delivery
            }
            None => DeliveryClient::from_config(&config)?,
        };
        if let Some(policy) = self.delivery_retry {
            delivery = delivery.with_retry(policy);
        }

        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(DeploymentResolver::new()));
        let detector = self
            .detector
            .unwrap_or_else(|| ProviderDetector::new(config.azure.clone()));

        let mut router = Router::new(&config, delivery.clone(), resolver.clone());
        if let Some(enabled) = self.stream_usage_request {
            router = router.with_stream_usage_request(enabled);
        }

        tracing::debug!(
            base_url = %config.base_url,
            capture_prompts = config.capture_prompts,
            summary = config.print_summary.is_some(),
            strategies = ?detector.strategy_names(),
            "Metering layer initialized"
        );

        Ok(MeteringLayer {
            config: Arc::new(config),
            delivery,
            resolver,
            patcher: Patcher::new(router, detector),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MeteringPayload;
    use async_trait::async_trait;

    struct NullSink;

    #[async_trait]
    impl MeteringSink for NullSink {
        async fn submit(&self, _payload: &MeteringPayload) -> Result<(), MeteringError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "null"
        }
    }

    fn config() -> MeteringConfig {
        MeteringConfig::builder()
            .api_key("hak_test_1234567890")
            .build()
            .unwrap()
    }

    #[test]
    fn builds_with_custom_sink() {
        let layer = MeteringLayer::builder()
            .config(config())
            .sink(Arc::new(NullSink))
            .build()
            .unwrap();
        assert_eq!(layer.delivery().in_flight(), 0);
        assert_eq!(layer.patcher().patched_count(), 0);
    }

    #[test]
    fn builds_http_delivery_from_config() {
        let layer = MeteringLayer::from_config(config()).unwrap();
        assert!(format!("{:?}", layer.delivery()).contains("http"));
    }

    #[test]
    fn shared_resolver_is_reused() {
        let resolver = Arc::new(DeploymentResolver::new());
        let layer = MeteringLayer::builder()
            .config(config())
            .sink(Arc::new(NullSink))
            .resolver(resolver.clone())
            .build()
            .unwrap();
        layer.resolver().resolve("gpt-4o-prod");
        assert_eq!(resolver.stats().cached, 1);
    }
}
