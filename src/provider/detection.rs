//! Provider detection
//!
//! Decides which backend variant a wrapped client talks to. Strategies are
//! evaluated highest priority first and the first match wins; when nothing
//! matches the client is assumed to talk to the primary vendor. A strategy
//! that fails (or panics) is logged and skipped.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::api::ClientInfo;
use crate::config::{AzureSettings, EnvSource, ProcessEnv, env};
use crate::error::MeteringError;

/// Backend variant behind a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// The vendor's own public API
    OpenAi,
    /// The vendor's models hosted on Azure
    AzureOpenAi,
}

impl ProviderKind {
    /// Provider label used for pricing.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::AzureOpenAi => "Azure",
        }
    }

    /// Model-source label; both variants serve the same model family.
    pub const fn model_source(&self) -> &'static str {
        "OPENAI"
    }

    pub const fn is_hosted_variant(&self) -> bool {
        matches!(self, Self::AzureOpenAi)
    }
}

/// Per-client record of the detected backend. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub is_hosted_variant: bool,
    pub endpoint: Option<String>,
    pub api_version: Option<String>,
    /// Vendor-specific settings carried over from the client
    pub config: HashMap<String, String>,
    /// Name of the strategy that produced this descriptor
    pub detected_by: &'static str,
}

impl ProviderDescriptor {
    pub fn primary() -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            is_hosted_variant: false,
            endpoint: None,
            api_version: None,
            config: HashMap::new(),
            detected_by: "default",
        }
    }

    pub fn hosted(endpoint: Option<String>, api_version: Option<String>) -> Self {
        Self {
            kind: ProviderKind::AzureOpenAi,
            is_hosted_variant: true,
            endpoint,
            api_version,
            config: HashMap::new(),
            detected_by: "default",
        }
    }

    fn detected_by(mut self, strategy: &'static str) -> Self {
        self.detected_by = strategy;
        self
    }

    fn with_config(mut self, config: HashMap<String, String>) -> Self {
        self.config = config;
        self
    }

    pub const fn provider_label(&self) -> &'static str {
        self.kind.label()
    }

    pub const fn model_source(&self) -> &'static str {
        self.kind.model_source()
    }
}

/// Everything a strategy may look at.
pub struct DetectionInput<'a> {
    pub client: &'a ClientInfo,
    pub env: &'a dyn EnvSource,
    pub azure: &'a AzureSettings,
}

/// One independent way of recognizing a backend.
pub trait DetectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher runs first.
    fn priority(&self) -> u8;

    /// `Ok(None)` means "no opinion"; the next strategy runs.
    fn detect(
        &self,
        input: &DetectionInput<'_>,
    ) -> Result<Option<ProviderDescriptor>, MeteringError>;
}

/// Matches on the client's concrete type name.
#[derive(Debug, Default)]
pub struct TypeNameStrategy;

impl DetectionStrategy for TypeNameStrategy {
    fn name(&self) -> &'static str {
        "type_name"
    }

    fn priority(&self) -> u8 {
        100
    }

    fn detect(
        &self,
        input: &DetectionInput<'_>,
    ) -> Result<Option<ProviderDescriptor>, MeteringError> {
        let short = input
            .client
            .type_name
            .rsplit("::")
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if short.contains("azure") {
            return Ok(Some(ProviderDescriptor::hosted(
                input.client.base_url.clone(),
                input.client.api_version.clone(),
            )));
        }
        Ok(None)
    }
}

const HOSTED_URL_MARKERS: &[&str] = &[
    ".openai.azure.com",
    ".cognitiveservices.azure.com",
    ".services.ai.azure.com",
    "azure-api.net",
];

/// Matches on the client's base URL.
#[derive(Debug, Default)]
pub struct BaseUrlStrategy;

impl DetectionStrategy for BaseUrlStrategy {
    fn name(&self) -> &'static str {
        "base_url"
    }

    fn priority(&self) -> u8 {
        50
    }

    fn detect(
        &self,
        input: &DetectionInput<'_>,
    ) -> Result<Option<ProviderDescriptor>, MeteringError> {
        let Some(url) = input.client.base_url.as_deref() else {
            return Ok(None);
        };
        let lower = url.to_ascii_lowercase();
        if HOSTED_URL_MARKERS.iter().any(|m| lower.contains(m)) {
            let api_version = input
                .client
                .api_version
                .clone()
                .or_else(|| api_version_from_url(&lower));
            return Ok(Some(ProviderDescriptor::hosted(
                Some(url.to_string()),
                api_version,
            )));
        }
        Ok(None)
    }
}

fn api_version_from_url(url: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "api-version")
        .map(|(_, v)| v.to_string())
}

/// Last resort: hosted-variant settings present in configuration or the
/// environment.
#[derive(Debug, Default)]
pub struct EnvironmentStrategy;

impl DetectionStrategy for EnvironmentStrategy {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn priority(&self) -> u8 {
        10
    }

    fn detect(
        &self,
        input: &DetectionInput<'_>,
    ) -> Result<Option<ProviderDescriptor>, MeteringError> {
        // A client with an explicit non-hosted base URL is not overridden by
        // ambient settings.
        if input.client.base_url.is_some() {
            return Ok(None);
        }
        let endpoint = input
            .azure
            .endpoint
            .clone()
            .or_else(|| input.env.var(env::AZURE_ENDPOINT));
        let Some(endpoint) = endpoint else {
            return Ok(None);
        };
        let api_version = input
            .azure
            .api_version
            .clone()
            .or_else(|| input.env.var(env::AZURE_API_VERSION));
        Ok(Some(ProviderDescriptor::hosted(Some(endpoint), api_version)))
    }
}

/// Ordered set of detection strategies.
#[derive(Clone)]
pub struct ProviderDetector {
    strategies: Vec<Arc<dyn DetectionStrategy>>,
    env: Arc<dyn EnvSource>,
    azure: AzureSettings,
}

impl std::fmt::Debug for ProviderDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDetector")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for ProviderDetector {
    fn default() -> Self {
        Self::new(AzureSettings::default())
    }
}

impl ProviderDetector {
    /// Detector with the built-in strategies, reading the process environment.
    pub fn new(azure: AzureSettings) -> Self {
        Self::with_env(azure, Arc::new(ProcessEnv))
    }

    pub fn with_env(azure: AzureSettings, env: Arc<dyn EnvSource>) -> Self {
        let mut detector = Self {
            strategies: Vec::new(),
            env,
            azure,
        };
        detector.add_strategy(Arc::new(TypeNameStrategy));
        detector.add_strategy(Arc::new(BaseUrlStrategy));
        detector.add_strategy(Arc::new(EnvironmentStrategy));
        detector
    }

    /// Register a strategy, keeping the list ordered by descending priority.
    /// Equal priorities keep registration order.
    pub fn add_strategy(&mut self, strategy: Arc<dyn DetectionStrategy>) {
        let pos = self
            .strategies
            .iter()
            .position(|s| s.priority() < strategy.priority())
            .unwrap_or(self.strategies.len());
        self.strategies.insert(pos, strategy);
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Detect the backend for a client. Never fails.
    pub fn detect(&self, client: &ClientInfo) -> ProviderDescriptor {
        let input = DetectionInput {
            client,
            env: self.env.as_ref(),
            azure: &self.azure,
        };

        for strategy in &self.strategies {
            let name = strategy.name();
            let outcome = catch_unwind(AssertUnwindSafe(|| strategy.detect(&input)));
            match outcome {
                Ok(Ok(Some(descriptor))) => {
                    tracing::debug!(
                        strategy = name,
                        provider = descriptor.provider_label(),
                        "Provider detected"
                    );
                    return descriptor
                        .detected_by(name)
                        .with_config(client.options.clone());
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        strategy = name,
                        error = %e,
                        "Provider detection strategy failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(strategy = name, "Provider detection strategy panicked");
                }
            }
        }

        ProviderDescriptor::primary().with_config(client.options.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector_with(pairs: &[(&'static str, &'static str)]) -> ProviderDetector {
        let env: HashMap<&'static str, &'static str> = pairs.iter().copied().collect();
        ProviderDetector::with_env(AzureSettings::default(), Arc::new(env))
    }

    #[test]
    fn defaults_to_primary_vendor() {
        let d = detector_with(&[]).detect(&ClientInfo::new("my_app::OpenAiClient"));
        assert_eq!(d.kind, ProviderKind::OpenAi);
        assert!(!d.is_hosted_variant);
        assert_eq!(d.detected_by, "default");
    }

    #[test]
    fn type_name_match_wins() {
        let d = detector_with(&[]).detect(&ClientInfo::new("vendor::AzureOpenAiClient"));
        assert_eq!(d.kind, ProviderKind::AzureOpenAi);
        assert_eq!(d.detected_by, "type_name");
    }

    #[test]
    fn base_url_match_extracts_api_version() {
        let info = ClientInfo::new("vendor::Client")
            .with_base_url("https://acme.openai.azure.com/openai?api-version=2024-10-21");
        let d = detector_with(&[]).detect(&info);
        assert!(d.is_hosted_variant);
        assert_eq!(d.api_version.as_deref(), Some("2024-10-21"));
        assert_eq!(d.detected_by, "base_url");
    }

    #[test]
    fn environment_is_last_resort() {
        let detector = detector_with(&[(env::AZURE_ENDPOINT, "https://acme.openai.azure.com")]);
        let d = detector.detect(&ClientInfo::new("vendor::Client"));
        assert_eq!(d.detected_by, "environment");
        assert!(d.is_hosted_variant);

        let explicit = ClientInfo::new("vendor::Client").with_base_url("https://api.openai.com/v1");
        assert_eq!(detector.detect(&explicit).kind, ProviderKind::OpenAi);
    }

    struct Exploding;
    impl DetectionStrategy for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }
        fn priority(&self) -> u8 {
            200
        }
        fn detect(
            &self,
            _: &DetectionInput<'_>,
        ) -> Result<Option<ProviderDescriptor>, MeteringError> {
            Err(MeteringError::Detection("boom".into()))
        }
    }

    struct Panicking;
    impl DetectionStrategy for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }
        fn priority(&self) -> u8 {
            150
        }
        fn detect(
            &self,
            _: &DetectionInput<'_>,
        ) -> Result<Option<ProviderDescriptor>, MeteringError> {
            panic!("strategy bug")
        }
    }

    #[test]
    fn failing_strategies_are_isolated() {
        let mut detector = detector_with(&[]);
        detector.add_strategy(Arc::new(Exploding));
        detector.add_strategy(Arc::new(Panicking));
        assert_eq!(
            detector.strategy_names(),
            vec!["exploding", "panicking", "type_name", "base_url", "environment"]
        );

        let d = detector.detect(&ClientInfo::new("vendor::AzureClient"));
        assert_eq!(d.detected_by, "type_name");
    }
}
