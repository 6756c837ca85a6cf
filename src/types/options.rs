//! Per-call request options and the caller-visible operation context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::location::LocationMode;
use super::request_result::RequestResult;
use crate::defaults::protocol::{ACCEPT_FULL_METADATA, ACCEPT_MINIMAL_METADATA, ACCEPT_NO_METADATA};
use crate::retry::RetryPolicy;

/// OData JSON flavour requested through `Accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PayloadFormat {
    JsonFullMetadata,
    #[default]
    JsonMinimalMetadata,
    JsonNoMetadata,
}

impl PayloadFormat {
    pub const fn accept_header(self) -> &'static str {
        match self {
            Self::JsonFullMetadata => ACCEPT_FULL_METADATA,
            Self::JsonMinimalMetadata => ACCEPT_MINIMAL_METADATA,
            Self::JsonNoMetadata => ACCEPT_NO_METADATA,
        }
    }
}

/// Options for a single logical call. Unset fields fall back to client defaults.
#[derive(Clone, Default)]
pub struct TableRequestOptions {
    /// Factory for the per-call retry policy instance.
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
    pub location_mode: Option<LocationMode>,
    /// Timeout the service applies to each request (`timeout=` query parameter).
    pub server_timeout: Option<Duration>,
    /// Wall-clock budget for the whole call, retries included.
    pub maximum_execution_time: Option<Duration>,
    pub payload_format: Option<PayloadFormat>,
    /// Whether inserts ask the service to echo the stored entity.
    pub echo_content: Option<bool>,
    /// Send MERGE as `POST` with `X-HTTP-Method: MERGE`.
    pub use_merge_tunneling: Option<bool>,
    /// Memoise entity schemas by type name.
    pub schema_caching: Option<bool>,
    /// How long a body read may stall before the response is torn down.
    pub body_stall_grace: Option<Duration>,
}

impl std::fmt::Debug for TableRequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableRequestOptions")
            .field("retry_policy", &self.retry_policy.as_ref().map(|_| "<policy>"))
            .field("location_mode", &self.location_mode)
            .field("server_timeout", &self.server_timeout)
            .field("maximum_execution_time", &self.maximum_execution_time)
            .field("payload_format", &self.payload_format)
            .field("echo_content", &self.echo_content)
            .field("use_merge_tunneling", &self.use_merge_tunneling)
            .field("schema_caching", &self.schema_caching)
            .field("body_stall_grace", &self.body_stall_grace)
            .finish()
    }
}

impl TableRequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_location_mode(mut self, mode: LocationMode) -> Self {
        self.location_mode = Some(mode);
        self
    }

    pub fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = Some(timeout);
        self
    }

    pub fn with_maximum_execution_time(mut self, budget: Duration) -> Self {
        self.maximum_execution_time = Some(budget);
        self
    }

    pub fn with_payload_format(mut self, format: PayloadFormat) -> Self {
        self.payload_format = Some(format);
        self
    }

    pub fn with_echo_content(mut self, echo: bool) -> Self {
        self.echo_content = Some(echo);
        self
    }

    pub fn with_merge_tunneling(mut self, enabled: bool) -> Self {
        self.use_merge_tunneling = Some(enabled);
        self
    }

    pub fn with_schema_caching(mut self, enabled: bool) -> Self {
        self.schema_caching = Some(enabled);
        self
    }

    pub fn with_body_stall_grace(mut self, grace: Duration) -> Self {
        self.body_stall_grace = Some(grace);
        self
    }

    /// Fill every unset field from `defaults`.
    pub fn apply_defaults(mut self, defaults: &TableRequestOptions) -> Self {
        if self.retry_policy.is_none() {
            self.retry_policy = defaults.retry_policy.clone();
        }
        self.location_mode = self.location_mode.or(defaults.location_mode);
        self.server_timeout = self.server_timeout.or(defaults.server_timeout);
        self.maximum_execution_time = self
            .maximum_execution_time
            .or(defaults.maximum_execution_time);
        self.payload_format = self.payload_format.or(defaults.payload_format);
        self.echo_content = self.echo_content.or(defaults.echo_content);
        self.use_merge_tunneling = self.use_merge_tunneling.or(defaults.use_merge_tunneling);
        self.schema_caching = self.schema_caching.or(defaults.schema_caching);
        self.body_stall_grace = self.body_stall_grace.or(defaults.body_stall_grace);
        self
    }

    pub fn effective_location_mode(&self) -> LocationMode {
        self.location_mode.unwrap_or_default()
    }

    pub fn effective_payload_format(&self) -> PayloadFormat {
        self.payload_format.unwrap_or_default()
    }

    pub fn effective_schema_caching(&self) -> bool {
        self.schema_caching.unwrap_or(true)
    }

    pub fn effective_body_stall_grace(&self) -> Duration {
        self.body_stall_grace
            .unwrap_or(crate::defaults::execution::BODY_STALL_GRACE)
    }
}

/// Caller-owned context that outlives a call and records its attempts.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Sent as `x-ms-client-request-id` on every attempt.
    pub client_request_id: String,
    /// Extra headers added to every request of the call.
    pub custom_headers: HashMap<String, String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// One entry per attempt, in order.
    pub request_results: Vec<RequestResult>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self {
            client_request_id: uuid::Uuid::new_v4().to_string(),
            custom_headers: HashMap::new(),
            start_time: None,
            end_time: None,
            request_results: Vec::new(),
        }
    }
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_request_id(mut self, id: impl Into<String>) -> Self {
        self.client_request_id = id.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(name.into(), value.into());
        self
    }

    pub fn last_result(&self) -> Option<&RequestResult> {
        self.request_results.last()
    }
}
