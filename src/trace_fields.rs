//! Trace-visualization fields
//!
//! Deployment-level labels read once from the environment and attached to
//! every payload. Values that fail validation resolve to `None` with a
//! warning; they never fail configuration loading.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::{EnvSource, ProcessEnv};

pub const MAX_ENVIRONMENT_LEN: usize = 255;
pub const MAX_REGION_LEN: usize = 64;
pub const MAX_CREDENTIAL_ALIAS_LEN: usize = 255;
pub const MAX_TRACE_TYPE_LEN: usize = 128;
pub const MAX_TRACE_NAME_LEN: usize = 256;
pub const MAX_PARENT_TRANSACTION_ID_LEN: usize = 255;

pub mod env {
    pub const ENVIRONMENT: &[&str] = &["LLM_METER_ENVIRONMENT", "APP_ENV", "DEPLOYMENT_ENV"];
    pub const REGION: &[&str] = &["LLM_METER_REGION", "AWS_REGION"];
    pub const CREDENTIAL_ALIAS: &str = "LLM_METER_CREDENTIAL_ALIAS";
    pub const TRACE_TYPE: &str = "LLM_METER_TRACE_TYPE";
    pub const TRACE_NAME: &str = "LLM_METER_TRACE_NAME";
    pub const PARENT_TRANSACTION_ID: &str = "LLM_METER_PARENT_TRANSACTION_ID";
    pub const RETRY_NUMBER: &str = "LLM_METER_RETRY_NUMBER";
}

lazy_static! {
    static ref TRACE_TYPE_RE: Regex = Regex::new(r"^[A-Za-z0-9_\-]+$").expect("valid regex");
}

/// Resolved trace-visualization fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceFields {
    pub environment: Option<String>,
    pub region: Option<String>,
    pub credential_alias: Option<String>,
    pub trace_type: Option<String>,
    pub trace_name: Option<String>,
    /// Set when `trace_name` was cut to [`MAX_TRACE_NAME_LEN`]
    pub trace_name_truncated: bool,
    pub parent_transaction_id: Option<String>,
    pub retry_number: Option<u32>,
}

impl TraceFields {
    pub fn from_env() -> Self {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(source: &dyn EnvSource) -> Self {
        let first = |keys: &[&str]| keys.iter().find_map(|k| source.var(k));

        let (trace_name, trace_name_truncated) = match source.var(env::TRACE_NAME) {
            Some(name) => {
                let (name, truncated) = truncate_chars(name.trim(), MAX_TRACE_NAME_LEN);
                if truncated {
                    tracing::warn!(
                        max = MAX_TRACE_NAME_LEN,
                        "Trace name exceeds maximum length and was truncated"
                    );
                }
                (Some(name), truncated)
            }
            None => (None, false),
        };

        Self {
            environment: first(env::ENVIRONMENT)
                .map(|v| bounded("environment", &v, MAX_ENVIRONMENT_LEN)),
            region: first(env::REGION).map(|v| bounded("region", &v, MAX_REGION_LEN)),
            credential_alias: source
                .var(env::CREDENTIAL_ALIAS)
                .map(|v| bounded("credential alias", &v, MAX_CREDENTIAL_ALIAS_LEN)),
            trace_type: source.var(env::TRACE_TYPE).and_then(|v| validate_trace_type(&v)),
            trace_name,
            trace_name_truncated,
            parent_transaction_id: source
                .var(env::PARENT_TRANSACTION_ID)
                .map(|v| bounded("parent transaction id", &v, MAX_PARENT_TRANSACTION_ID_LEN)),
            retry_number: source.var(env::RETRY_NUMBER).and_then(|v| parse_retry_number(&v)),
        }
    }
}

/// Accept a trace type made of ASCII letters, digits, `-` and `_`, at most
/// [`MAX_TRACE_TYPE_LEN`] characters.
pub fn validate_trace_type(value: &str) -> Option<String> {
    let value = value.trim();
    if value.len() > MAX_TRACE_TYPE_LEN {
        tracing::warn!(
            max = MAX_TRACE_TYPE_LEN,
            "Trace type exceeds maximum length; ignoring"
        );
        return None;
    }
    if !TRACE_TYPE_RE.is_match(value) {
        tracing::warn!(
            value,
            "Trace type may only contain letters, digits, '-' and '_'; ignoring"
        );
        return None;
    }
    Some(value.to_string())
}

pub fn parse_retry_number(value: &str) -> Option<u32> {
    match value.trim().parse::<u32>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(value, "Retry number must be a non-negative integer; ignoring");
            None
        }
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(value: &str, max: usize) -> (String, bool) {
    match value.char_indices().nth(max) {
        Some((byte_idx, _)) => (value[..byte_idx].to_string(), true),
        None => (value.to_string(), false),
    }
}

fn bounded(field: &'static str, value: &str, max: usize) -> String {
    let (out, truncated) = truncate_chars(value.trim(), max);
    if truncated {
        tracing::warn!(field, max, "Value exceeds maximum length and was truncated");
    }
    out
}
