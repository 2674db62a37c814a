//! Per-request usage metadata
//!
//! Callers attach a [`UsageMetadata`] to a single request to label it for
//! billing and tracing. The router removes it from the request before the
//! wrapped client ever sees the parameters.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::MeteringError;

/// Credential a subscriber used, as known to the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberCredential {
    pub name: String,
    pub value: String,
}

/// End user or system the usage is attributed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 255))]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(email)]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<SubscriberCredential>,
}

impl Subscriber {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_credential(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.credential = Some(SubscriberCredential {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

/// Caller-supplied labels for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[validate(nested)]
    pub subscriber: Option<Subscriber>,
    pub organization_id: Option<String>,
    pub product_id: Option<String>,
    pub subscription_id: Option<String>,
    pub task_type: Option<String>,
    pub agent: Option<String>,
    pub trace_id: Option<String>,
    pub session_id: Option<String>,
    #[validate(length(max = 128))]
    pub trace_type: Option<String>,
    pub trace_name: Option<String>,
    pub operation_subtype: Option<String>,
    /// Quality score of the response in `[0.0, 1.0]`
    #[validate(range(min = 0.0, max = 1.0))]
    pub response_quality_score: Option<f64>,
    /// Per-call override of the global prompt-capture setting
    pub capture_prompts: Option<bool>,
}

impl UsageMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscriber(mut self, subscriber: Subscriber) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_trace_type(mut self, trace_type: impl Into<String>) -> Self {
        self.trace_type = Some(trace_type.into());
        self
    }

    pub fn with_trace_name(mut self, trace_name: impl Into<String>) -> Self {
        self.trace_name = Some(trace_name.into());
        self
    }

    pub const fn with_quality_score(mut self, score: f64) -> Self {
        self.response_quality_score = Some(score);
        self
    }

    pub const fn with_capture_prompts(mut self, capture: bool) -> Self {
        self.capture_prompts = Some(capture);
        self
    }

    /// Validate and return the metadata.
    pub fn validated(self) -> Result<Self, MeteringError> {
        self.validate()?;
        Ok(self)
    }

    /// Drop fields that fail validation instead of rejecting the whole object.
    ///
    /// Metadata problems must never block a request, so the payload builder
    /// uses this rather than [`UsageMetadata::validated`].
    pub fn sanitized(mut self) -> Self {
        if let Err(errors) = self.validate() {
            let fields = errors.field_errors();
            if fields.contains_key("response_quality_score") {
                tracing::warn!(
                    score = ?self.response_quality_score,
                    "Dropping response quality score outside [0.0, 1.0]"
                );
                self.response_quality_score = None;
            }
            if fields.contains_key("trace_type") {
                tracing::warn!("Dropping trace type longer than 128 characters");
                self.trace_type = None;
            }
            if errors.errors().contains_key("subscriber") {
                tracing::warn!("Dropping subscriber email that failed validation");
                if let Some(sub) = self.subscriber.as_mut() {
                    sub.email = None;
                }
            }
        }
        self
    }
}
