//! Inputs and outputs of a retry decision.

use std::time::Duration;

use super::policy::RetryPolicy;
use crate::defaults::execution::MAXIMUM_RETRY_BACKOFF;
use crate::error::TableError;
use crate::types::{LocationMode, OperationContext, RequestResult, StorageLocation};

/// What an extended policy sees about the failed attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Number of retries already performed (0 after the first attempt).
    pub current_retry_count: u32,
    pub last_request_result: RequestResult,
    /// Location the next attempt goes to unless the policy overrides it.
    pub next_location: StorageLocation,
    pub location_mode: LocationMode,
}

/// An extended policy's answer: retry after `retry_interval`, against
/// `target_location`, under `updated_location_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryInfo {
    pub target_location: StorageLocation,
    pub updated_location_mode: LocationMode,
    pub retry_interval: Duration,
}

impl RetryInfo {
    pub fn from_context(ctx: &RetryContext) -> Self {
        Self {
            target_location: ctx.next_location,
            updated_location_mode: ctx.location_mode,
            retry_interval: Duration::ZERO,
        }
    }
}

/// The executor's resolved decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub backoff: Duration,
    pub next_location: Option<StorageLocation>,
    pub updated_location_mode: Option<LocationMode>,
}

impl RetryDecision {
    pub const fn stop() -> Self {
        Self {
            should_retry: false,
            backoff: Duration::ZERO,
            next_location: None,
            updated_location_mode: None,
        }
    }
}

/// Bound a policy's backoff to `[0, MAXIMUM_RETRY_BACKOFF]`.
pub fn clamp_backoff(backoff: Duration) -> Duration {
    backoff.min(MAXIMUM_RETRY_BACKOFF)
}

/// Ask `policy` about a failed attempt.
///
/// Extended policies take precedence and may move the call to another
/// location; basic policies only answer retry-or-not and the delay.
pub fn decide(
    policy: &mut dyn RetryPolicy,
    ctx: &RetryContext,
    error: &TableError,
    op_ctx: &OperationContext,
) -> RetryDecision {
    if let Some(extended) = policy.as_extended() {
        return match extended.evaluate(ctx, op_ctx) {
            Some(info) => RetryDecision {
                should_retry: true,
                backoff: clamp_backoff(info.retry_interval),
                next_location: Some(info.target_location),
                updated_location_mode: Some(info.updated_location_mode),
            },
            None => RetryDecision::stop(),
        };
    }

    let status = ctx.last_request_result.http_status_code;
    match policy.should_retry(ctx.current_retry_count, status, error, op_ctx) {
        Some(backoff) => RetryDecision {
            should_retry: true,
            backoff: clamp_backoff(backoff),
            next_location: Some(ctx.next_location),
            updated_location_mode: None,
        },
        None => RetryDecision::stop(),
    }
}
