//! Metering configuration
//!
//! [`MeteringConfig`] is assembled either with [`MeteringConfig::builder`] or
//! from environment variables via [`MeteringConfig::from_env`]. Lookups go
//! through [`EnvSource`] so tests can supply a map instead of mutating the
//! process environment.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::delivery::retry::RetryPolicy;
use crate::error::MeteringError;
use crate::trace_fields::TraceFields;

pub const DEFAULT_BASE_URL: &str = "https://api.revenium.ai";
pub const DEFAULT_MAX_PROMPT_SIZE: usize = 50_000;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const API_KEY_PREFIX: &str = "hak_";
const API_KEY_MIN_LEN: usize = 12;

pub mod env {
    pub const API_KEY: &str = "LLM_METER_API_KEY";
    pub const BASE_URL: &str = "LLM_METER_BASE_URL";
    pub const DEBUG: &str = "LLM_METER_DEBUG";
    pub const CAPTURE_PROMPTS: &str = "LLM_METER_CAPTURE_PROMPTS";
    pub const MAX_PROMPT_SIZE: &str = "LLM_METER_MAX_PROMPT_SIZE";
    pub const TEAM_ID: &str = "LLM_METER_TEAM_ID";
    pub const PRINT_SUMMARY: &str = "LLM_METER_PRINT_SUMMARY";
    pub const AZURE_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
    pub const AZURE_API_KEY: &str = "AZURE_OPENAI_API_KEY";
    pub const AZURE_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
}

/// Source of environment-style key/value settings.
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment. Blank values count as unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty()).cloned()
    }
}

impl EnvSource for HashMap<&'static str, &'static str> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .map(|v| (*v).to_string())
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// How the optional local summary is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryFormat {
    Human,
    Json,
}

impl FromStr for SummaryFormat {
    type Err = MeteringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" | "true" | "1" | "yes" | "on" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(MeteringError::Config(format!(
                "unknown summary format '{other}' (expected human or json)"
            ))),
        }
    }
}

/// Settings for the hosted (Azure) variant of the primary vendor.
#[derive(Debug, Clone, Default)]
pub struct AzureSettings {
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub api_version: Option<String>,
}

impl AzureSettings {
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }
}

/// Complete metering configuration.
#[derive(Debug, Clone)]
pub struct MeteringConfig {
    api_key: SecretString,
    pub base_url: String,
    pub debug: bool,
    pub capture_prompts: bool,
    pub max_prompt_size: usize,
    pub team_id: Option<String>,
    pub print_summary: Option<SummaryFormat>,
    pub request_timeout: Duration,
    pub metrics_retry: RetryPolicy,
    pub azure: AzureSettings,
    pub trace: TraceFields,
}

impl MeteringConfig {
    pub fn builder() -> MeteringConfigBuilder {
        MeteringConfigBuilder::default()
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, MeteringError> {
        Self::from_source(&ProcessEnv)
    }

    /// Load configuration from any [`EnvSource`].
    pub fn from_source(source: &dyn EnvSource) -> Result<Self, MeteringError> {
        let api_key = source.var(env::API_KEY).ok_or_else(|| {
            MeteringError::Config(format!("{} is required", env::API_KEY))
        })?;

        let mut builder = Self::builder().api_key(api_key);

        if let Some(url) = source.var(env::BASE_URL) {
            builder = builder.base_url(url);
        }
        if let Some(debug) = source.var(env::DEBUG).as_deref().and_then(parse_bool) {
            builder = builder.debug(debug);
        }
        if let Some(capture) = source.var(env::CAPTURE_PROMPTS).as_deref().and_then(parse_bool) {
            builder = builder.capture_prompts(capture);
        }
        if let Some(raw) = source.var(env::MAX_PROMPT_SIZE) {
            let size = raw.trim().parse::<usize>().map_err(|_| {
                MeteringError::Config(format!(
                    "{} must be a positive integer, got '{raw}'",
                    env::MAX_PROMPT_SIZE
                ))
            })?;
            builder = builder.max_prompt_size(size);
        }
        if let Some(team) = source.var(env::TEAM_ID) {
            builder = builder.team_id(team);
        }
        if let Some(raw) = source.var(env::PRINT_SUMMARY) {
            match parse_bool(&raw) {
                Some(false) => {}
                Some(true) => builder = builder.print_summary(SummaryFormat::Human),
                None => builder = builder.print_summary(raw.parse()?),
            }
        }

        builder = builder.azure(AzureSettings {
            endpoint: source.var(env::AZURE_ENDPOINT),
            api_key: source.var(env::AZURE_API_KEY).map(SecretString::from),
            api_version: source.var(env::AZURE_API_VERSION),
        });

        builder.trace(TraceFields::from_source(source)).build()
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    /// Metering endpoint for completed operations.
    pub fn completions_url(&self) -> String {
        format!("{}/meter/v2/ai/completions", self.base_url)
    }

    /// Metrics lookup endpoint used by the local summary.
    pub fn metrics_url(&self) -> String {
        format!(
            "{}/profitstream/v2/api/sources/metrics/ai/completions",
            self.base_url
        )
    }
}

/// Builder for [`MeteringConfig`].
#[derive(Debug, Default)]
pub struct MeteringConfigBuilder {
    api_key: Option<SecretString>,
    base_url: Option<String>,
    debug: bool,
    capture_prompts: bool,
    max_prompt_size: Option<usize>,
    team_id: Option<String>,
    print_summary: Option<SummaryFormat>,
    request_timeout: Option<Duration>,
    metrics_retry: Option<RetryPolicy>,
    azure: AzureSettings,
    trace: TraceFields,
}

impl MeteringConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub const fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub const fn capture_prompts(mut self, capture: bool) -> Self {
        self.capture_prompts = capture;
        self
    }

    pub const fn max_prompt_size(mut self, size: usize) -> Self {
        self.max_prompt_size = Some(size);
        self
    }

    pub fn team_id(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    pub const fn print_summary(mut self, format: SummaryFormat) -> Self {
        self.print_summary = Some(format);
        self
    }

    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn metrics_retry(mut self, policy: RetryPolicy) -> Self {
        self.metrics_retry = Some(policy);
        self
    }

    pub fn azure(mut self, azure: AzureSettings) -> Self {
        self.azure = azure;
        self
    }

    pub fn trace(mut self, trace: TraceFields) -> Self {
        self.trace = trace;
        self
    }

    pub fn build(self) -> Result<MeteringConfig, MeteringError> {
        let api_key = self
            .api_key
            .ok_or_else(|| MeteringError::Config("API key is required".to_string()))?;
        validate_api_key(api_key.expose_secret())?;

        let base_url = normalize_base_url(self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL))?;

        let max_prompt_size = self.max_prompt_size.unwrap_or(DEFAULT_MAX_PROMPT_SIZE);
        if max_prompt_size == 0 {
            return Err(MeteringError::Config(
                "max prompt size must be greater than zero".to_string(),
            ));
        }

        Ok(MeteringConfig {
            api_key,
            base_url,
            debug: self.debug,
            capture_prompts: self.capture_prompts,
            max_prompt_size,
            team_id: self.team_id,
            print_summary: self.print_summary,
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            metrics_retry: self.metrics_retry.unwrap_or_default(),
            azure: self.azure,
            trace: self.trace,
        })
    }
}

fn validate_api_key(key: &str) -> Result<(), MeteringError> {
    if !key.starts_with(API_KEY_PREFIX) {
        return Err(MeteringError::Config(format!(
            "API key must start with '{API_KEY_PREFIX}'"
        )));
    }
    if key.len() < API_KEY_MIN_LEN {
        return Err(MeteringError::Config(format!(
            "API key must be at least {API_KEY_MIN_LEN} characters"
        )));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(MeteringError::Config(
            "API key must not contain whitespace".to_string(),
        ));
    }
    Ok(())
}

fn normalize_base_url(url: &str) -> Result<String, MeteringError> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(MeteringError::Config(format!(
            "base URL must be http(s), got '{trimmed}'"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_of(pairs: &[(&'static str, &'static str)]) -> HashMap<&'static str, &'static str> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn builder_applies_defaults() {
        let config = MeteringConfig::builder()
            .api_key("hak_test_1234567890")
            .build()
            .unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.max_prompt_size, DEFAULT_MAX_PROMPT_SIZE);
        assert!(!config.capture_prompts);
        assert_eq!(config.metrics_retry.max_attempts, 3);
        assert_eq!(
            config.completions_url(),
            "https://api.revenium.ai/meter/v2/ai/completions"
        );
    }

    #[test]
    fn api_key_format_is_validated() {
        assert!(MeteringConfig::builder().api_key("sk-123456789012").build().is_err());
        assert!(MeteringConfig::builder().api_key("hak_1").build().is_err());
        assert!(
            MeteringConfig::builder()
                .api_key("hak_ 1234567890")
                .build()
                .is_err()
        );
        assert!(MeteringConfig::builder().build().is_err());
    }

    #[test]
    fn base_url_is_normalized() {
        let config = MeteringConfig::builder()
            .api_key("hak_test_1234567890")
            .base_url("http://localhost:8080///")
            .build()
            .unwrap();
        assert_eq!(config.base_url, "http://localhost:8080");

        let bad = MeteringConfig::builder()
            .api_key("hak_test_1234567890")
            .base_url("ftp://example.com")
            .build();
        assert!(matches!(bad, Err(MeteringError::Config(_))));
    }

    #[test]
    fn loads_from_env_source() {
        let source = source_of(&[
            (env::API_KEY, "hak_env_1234567890"),
            (env::CAPTURE_PROMPTS, "true"),
            (env::MAX_PROMPT_SIZE, "1000"),
            (env::PRINT_SUMMARY, "json"),
            (env::AZURE_ENDPOINT, "https://acme.openai.azure.com"),
            (env::AZURE_API_VERSION, "2024-10-21"),
        ]);
        let config = MeteringConfig::from_source(&source).unwrap();
        assert!(config.capture_prompts);
        assert_eq!(config.max_prompt_size, 1000);
        assert_eq!(config.print_summary, Some(SummaryFormat::Json));
        assert!(config.azure.is_configured());
        assert_eq!(config.azure.api_version.as_deref(), Some("2024-10-21"));
        assert_eq!(config.api_key().expose_secret(), "hak_env_1234567890");
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let err = MeteringConfig::from_source(&source_of(&[])).unwrap_err();
        assert!(matches!(err, MeteringError::Config(_)));
    }

    #[test]
    fn print_summary_false_disables_summary() {
        let source = source_of(&[
            (env::API_KEY, "hak_env_1234567890"),
            (env::PRINT_SUMMARY, "false"),
        ]);
        let config = MeteringConfig::from_source(&source).unwrap();
        assert_eq!(config.print_summary, None);
    }

    #[test]
    fn truthy_print_summary_means_human() {
        for raw in ["on", "yes", "1", "TRUE"] {
            let source = source_of(&[
                (env::API_KEY, "hak_env_1234567890"),
                (env::PRINT_SUMMARY, raw),
            ]);
            let config = MeteringConfig::from_source(&source).unwrap();
            assert_eq!(config.print_summary, Some(SummaryFormat::Human), "{raw}");
        }
        let source = source_of(&[
            (env::API_KEY, "hak_env_1234567890"),
            (env::PRINT_SUMMARY, "off"),
        ]);
        assert_eq!(MeteringConfig::from_source(&source).unwrap().print_summary, None);
    }
}
