//! Per-call execution state.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::TableError;
use crate::retry::{NoRetry, RetryPolicy};
use crate::types::{LocationMode, RequestResult, StorageLocation, TableRequestOptions};

/// Mutable bookkeeping for one logical call, threaded through the retry loop.
pub struct ExecutionState {
    pub location_mode: LocationMode,
    pub current_location: StorageLocation,
    pub retry_count: u32,
    pub start: Instant,
    pub expiry: Option<Instant>,
    pub retry_policy: Box<dyn RetryPolicy>,
    /// Diagnostic record of the attempt in flight.
    pub request_result: RequestResult,
    /// Failure of the most recent attempt, if any.
    pub last_error: Option<TableError>,
    pub cancel: CancellationToken,
}

impl ExecutionState {
    pub fn new(
        options: &TableRequestOptions,
        location_mode: LocationMode,
        initial_location: StorageLocation,
        expiry: Option<Instant>,
        cancel: CancellationToken,
    ) -> Self {
        let start = Instant::now();
        let retry_policy = match &options.retry_policy {
            Some(factory) => factory.create_instance(),
            None => NoRetry.create_instance(),
        };
        let expiry = expiry.or_else(|| {
            options
                .maximum_execution_time
                .and_then(|budget| start.checked_add(budget))
        });
        Self {
            location_mode,
            current_location: initial_location,
            retry_count: 0,
            start,
            expiry,
            retry_policy,
            request_result: RequestResult::default(),
            last_error: None,
            cancel,
        }
    }

    /// Reset per-attempt state before sending.
    pub fn init_attempt(&mut self) {
        self.request_result = RequestResult::started_at(self.current_location);
    }

    pub fn is_expired(&self) -> bool {
        self.expiry.is_some_and(|expiry| Instant::now() >= expiry)
    }

    /// Time left before the deadline; `None` when the call has no deadline.
    ///
    /// Never negative: once the deadline has passed this returns the terminal
    /// timeout error instead.
    pub fn remaining_timeout(&self) -> Result<Option<Duration>, TableError> {
        match self.expiry {
            None => Ok(None),
            Some(expiry) => {
                let now = Instant::now();
                if now >= expiry {
                    Err(self.timeout_error())
                } else {
                    Ok(Some(expiry - now))
                }
            }
        }
    }

    /// Whether sleeping `backoff` would carry the call past its deadline.
    pub fn would_expire_after(&self, backoff: Duration) -> bool {
        match self.expiry {
            None => false,
            Some(expiry) => Instant::now()
                .checked_add(backoff)
                .is_none_or(|wake| wake >= expiry),
        }
    }

    /// Terminal timeout wrapping the previous attempt's failure, if any.
    pub fn timeout_error(&self) -> TableError {
        TableError::timeout(self.request_result.clone(), self.last_error.clone())
    }

    pub fn cancelled_error(&self) -> TableError {
        TableError::cancelled(self.request_result.clone())
    }
}
