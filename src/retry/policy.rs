//! Retry policies.
//!
//! A policy value stored on request options acts as a factory: the executor
//! calls [`RetryPolicy::create_instance`] once per logical call, so counters and
//! exponential state never leak between unrelated calls.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::{Duration, Instant};

use super::context::{RetryContext, RetryInfo};
use crate::defaults::retry as defaults;
use crate::error::TableError;
use crate::types::{LocationMode, OperationContext, StorageLocation};

/// Decide whether a failed attempt is retried and after how long.
pub trait RetryPolicy: Send + Sync {
    /// Fresh instance for one logical call.
    fn create_instance(&self) -> Box<dyn RetryPolicy>;

    /// `Some(backoff)` to retry, `None` to give up.
    fn should_retry(
        &mut self,
        current_retry_count: u32,
        status_code: u16,
        last_error: &TableError,
        ctx: &OperationContext,
    ) -> Option<Duration>;

    /// Location-aware variant, if the policy implements one.
    fn as_extended(&mut self) -> Option<&mut dyn ExtendedRetryPolicy> {
        None
    }
}

/// A policy that also chooses the next location and may change the location mode.
pub trait ExtendedRetryPolicy: Send {
    fn evaluate(&mut self, ctx: &RetryContext, op_ctx: &OperationContext) -> Option<RetryInfo>;
}

/// Never retries. Used when the caller supplies no policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn create_instance(&self) -> Box<dyn RetryPolicy> {
        Box::new(NoRetry)
    }

    fn should_retry(
        &mut self,
        _current_retry_count: u32,
        _status_code: u16,
        _last_error: &TableError,
        _ctx: &OperationContext,
    ) -> Option<Duration> {
        None
    }
}

/// Statuses the built-in policies retry. `0` means no response was received.
pub fn is_retryable_status(status: u16) -> bool {
    let client_error = (300..500).contains(&status) && status != 408;
    !(client_error || status == 501 || status == 505)
}

/// Bookkeeping shared by the location-aware built-in policies.
#[derive(Debug, Clone, Default)]
struct LocationHistory {
    last_primary_attempt: Option<Instant>,
    last_secondary_attempt: Option<Instant>,
}

impl LocationHistory {
    fn record(&mut self, location: Option<StorageLocation>) {
        let now = Some(Instant::now());
        match location {
            Some(StorageLocation::Secondary) => self.last_secondary_attempt = now,
            _ => self.last_primary_attempt = now,
        }
    }

    fn last_attempt(&self, location: StorageLocation) -> Option<Instant> {
        match location {
            StorageLocation::Primary => self.last_primary_attempt,
            StorageLocation::Secondary => self.last_secondary_attempt,
        }
    }

    /// Evaluate a retry with `interval` as the nominal delay.
    ///
    /// A 404 from the secondary usually means replication lag, so the rest of
    /// the call is pinned to the primary. When switching to a location that was
    /// tried before, time already spent since that attempt counts toward the delay.
    fn evaluate(
        &mut self,
        ctx: &RetryContext,
        max_attempts: u32,
        interval: impl FnOnce() -> Duration,
    ) -> Option<RetryInfo> {
        let last = &ctx.last_request_result;
        self.record(last.target_location);

        let status = last.http_status_code;
        let secondary_not_found =
            last.target_location == Some(StorageLocation::Secondary) && status == 404;
        if ctx.current_retry_count >= max_attempts
            || !(secondary_not_found || is_retryable_status(status))
        {
            return None;
        }

        let mut info = RetryInfo::from_context(ctx);
        if secondary_not_found && ctx.location_mode != LocationMode::SecondaryOnly {
            info.updated_location_mode = LocationMode::PrimaryOnly;
            info.target_location = StorageLocation::Primary;
        }

        let nominal = interval();
        info.retry_interval = match self.last_attempt(info.target_location) {
            Some(previous) if last.target_location != Some(info.target_location) => {
                nominal.saturating_sub(previous.elapsed())
            }
            _ => nominal,
        };
        Some(info)
    }
}

/// Retries a fixed number of times with a constant delay.
#[derive(Debug, Clone)]
pub struct LinearRetry {
    delta_backoff: Duration,
    max_attempts: u32,
    history: LocationHistory,
}

impl Default for LinearRetry {
    fn default() -> Self {
        Self::new(defaults::LINEAR_DELTA_BACKOFF, defaults::MAX_ATTEMPTS)
    }
}

impl LinearRetry {
    pub fn new(delta_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            delta_backoff,
            max_attempts,
            history: LocationHistory::default(),
        }
    }
}

impl RetryPolicy for LinearRetry {
    fn create_instance(&self) -> Box<dyn RetryPolicy> {
        Box::new(Self::new(self.delta_backoff, self.max_attempts))
    }

    fn should_retry(
        &mut self,
        current_retry_count: u32,
        status_code: u16,
        _last_error: &TableError,
        _ctx: &OperationContext,
    ) -> Option<Duration> {
        (current_retry_count < self.max_attempts && is_retryable_status(status_code))
            .then_some(self.delta_backoff)
    }

    fn as_extended(&mut self) -> Option<&mut dyn ExtendedRetryPolicy> {
        Some(self)
    }
}

impl ExtendedRetryPolicy for LinearRetry {
    fn evaluate(&mut self, ctx: &RetryContext, _op_ctx: &OperationContext) -> Option<RetryInfo> {
        let delta = self.delta_backoff;
        self.history.evaluate(ctx, self.max_attempts, || delta)
    }
}

/// Retries with randomized, exponentially growing delays.
#[derive(Debug, Clone)]
pub struct ExponentialRetry {
    delta_backoff: Duration,
    max_attempts: u32,
    backoff: ExponentialBackoff,
    history: LocationHistory,
}

impl Default for ExponentialRetry {
    fn default() -> Self {
        Self::new(defaults::EXPONENTIAL_DELTA_BACKOFF, defaults::MAX_ATTEMPTS)
    }
}

impl ExponentialRetry {
    pub fn new(delta_backoff: Duration, max_attempts: u32) -> Self {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(delta_backoff.max(defaults::EXPONENTIAL_MIN_BACKOFF))
            .with_multiplier(2.0)
            .with_randomization_factor(0.2)
            .with_max_interval(defaults::EXPONENTIAL_MAX_BACKOFF)
            .with_max_elapsed_time(None)
            .build();
        Self {
            delta_backoff,
            max_attempts,
            backoff,
            history: LocationHistory::default(),
        }
    }

    fn next_interval(backoff: &mut ExponentialBackoff) -> Duration {
        backoff
            .next_backoff()
            .unwrap_or(defaults::EXPONENTIAL_MAX_BACKOFF)
    }
}

impl RetryPolicy for ExponentialRetry {
    fn create_instance(&self) -> Box<dyn RetryPolicy> {
        Box::new(Self::new(self.delta_backoff, self.max_attempts))
    }

    fn should_retry(
        &mut self,
        current_retry_count: u32,
        status_code: u16,
        _last_error: &TableError,
        _ctx: &OperationContext,
    ) -> Option<Duration> {
        if current_retry_count >= self.max_attempts || !is_retryable_status(status_code) {
            return None;
        }
        Some(Self::next_interval(&mut self.backoff))
    }

    fn as_extended(&mut self) -> Option<&mut dyn ExtendedRetryPolicy> {
        Some(self)
    }
}

impl ExtendedRetryPolicy for ExponentialRetry {
    fn evaluate(&mut self, ctx: &RetryContext, _op_ctx: &OperationContext) -> Option<RetryInfo> {
        let backoff = &mut self.backoff;
        self.history
            .evaluate(ctx, self.max_attempts, || Self::next_interval(backoff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestResult;

    fn retry_ctx(count: u32, status: u16, location: StorageLocation, mode: LocationMode) -> RetryContext {
        RetryContext {
            current_retry_count: count,
            last_request_result: RequestResult {
                http_status_code: status,
                target_location: Some(location),
                ..Default::default()
            },
            next_location: mode.next_location(location),
            location_mode: mode,
        }
    }

    #[test]
    fn status_classification() {
        assert!(is_retryable_status(0));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(408));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(409));
        assert!(!is_retryable_status(501));
        assert!(!is_retryable_status(505));
    }

    #[test]
    fn no_retry_never_retries() {
        let mut policy = NoRetry.create_instance();
        let err = TableError::http(500, "boom");
        assert!(
            policy
                .should_retry(0, 500, &err, &OperationContext::new())
                .is_none()
        );
        assert!(policy.as_extended().is_none());
    }

    #[test]
    fn linear_stops_after_max_attempts() {
        let mut policy = LinearRetry::new(Duration::from_millis(10), 2);
        let op = OperationContext::new();
        let ctx = retry_ctx(1, 500, StorageLocation::Primary, LocationMode::PrimaryOnly);
        let info = policy.evaluate(&ctx, &op).expect("retry");
        assert_eq!(info.retry_interval, Duration::from_millis(10));
        assert_eq!(info.target_location, StorageLocation::Primary);

        let ctx = retry_ctx(2, 500, StorageLocation::Primary, LocationMode::PrimaryOnly);
        assert!(policy.evaluate(&ctx, &op).is_none());
    }

    #[test]
    fn secondary_not_found_pins_to_primary() {
        let mut policy = LinearRetry::new(Duration::from_millis(10), 3);
        let ctx = retry_ctx(
            0,
            404,
            StorageLocation::Secondary,
            LocationMode::SecondaryThenPrimary,
        );
        let info = policy.evaluate(&ctx, &OperationContext::new()).expect("retry");
        assert_eq!(info.target_location, StorageLocation::Primary);
        assert_eq!(info.updated_location_mode, LocationMode::PrimaryOnly);

        // The same status from the primary is final.
        let ctx = retry_ctx(0, 404, StorageLocation::Primary, LocationMode::PrimaryOnly);
        assert!(policy.evaluate(&ctx, &OperationContext::new()).is_none());
    }

    #[test]
    fn exponential_instances_do_not_share_state() {
        let factory = ExponentialRetry::new(Duration::from_secs(4), 5);
        let err = TableError::http(503, "busy");
        let op = OperationContext::new();

        let mut first = factory.create_instance();
        let a0 = first.should_retry(0, 503, &err, &op).unwrap();
        let a1 = first.should_retry(1, 503, &err, &op).unwrap();
        let a2 = first.should_retry(2, 503, &err, &op).unwrap();
        assert!(a2 > a0, "backoff grows: {a0:?} {a1:?} {a2:?}");

        let mut second = factory.create_instance();
        let b0 = second.should_retry(0, 503, &err, &op).unwrap();
        // Randomization is +/-20% around the same initial interval.
        assert!(b0 < a2);
        assert!(b0 <= Duration::from_secs(5));
    }
}
