//! HTTP Interceptor interfaces
//!
//! Interceptors observe every attempt the executor makes: they may add headers
//! before the request is signed, and are told about responses, failures and
//! scheduled retries. Hooks are best-effort and should stay cheap.

use std::time::Duration;

use crate::error::TableError;
use crate::execution::command::{ResponseHead, TableRequest};
use crate::observability::tracing::format_headers_for_logging;
use crate::types::StorageLocation;

/// Context passed to interceptors describing the attempt.
#[derive(Clone, Debug)]
pub struct HttpRequestContext {
    pub client_request_id: String,
    pub method: String,
    pub url: String,
    pub location: StorageLocation,
    /// Zero-based attempt number within the call.
    pub attempt: u32,
}

/// HTTP interceptor trait
pub trait HttpInterceptor: Send + Sync {
    /// Called before the request is signed. Headers added here take part in
    /// the signature. Returning an error aborts the attempt.
    fn on_before_send(
        &self,
        _ctx: &HttpRequestContext,
        _request: &mut TableRequest,
    ) -> Result<(), TableError> {
        Ok(())
    }

    /// Called once the status line and headers are received.
    fn on_response(&self, _ctx: &HttpRequestContext, _head: &ResponseHead) {}

    /// Called when an attempt fails, before the retry decision.
    fn on_error(&self, _ctx: &HttpRequestContext, _error: &TableError) {}

    /// Called after a retry was decided and before the backoff sleep.
    fn on_retry(&self, _ctx: &HttpRequestContext, _error: &TableError, _backoff: Duration) {}
}

/// A simple logging interceptor backed by `tracing` (credentials are masked).
#[derive(Clone, Default)]
pub struct LoggingInterceptor;

impl HttpInterceptor for LoggingInterceptor {
    fn on_before_send(
        &self,
        ctx: &HttpRequestContext,
        request: &mut TableRequest,
    ) -> Result<(), TableError> {
        tracing::debug!(target: "tablebridge::http", request_id=%ctx.client_request_id, method=%ctx.method, url=%ctx.url, location=%ctx.location, attempt=ctx.attempt, "sending request");
        tracing::trace!(target: "tablebridge::http", headers=%format_headers_for_logging(&request.headers), "request headers");
        Ok(())
    }

    fn on_response(&self, ctx: &HttpRequestContext, head: &ResponseHead) {
        tracing::debug!(target: "tablebridge::http", request_id=%ctx.client_request_id, url=%ctx.url, status=head.status_code(), "response received");
    }

    fn on_error(&self, ctx: &HttpRequestContext, error: &TableError) {
        tracing::debug!(target: "tablebridge::http", request_id=%ctx.client_request_id, url=%ctx.url, attempt=ctx.attempt, err=%error, "request error");
    }

    fn on_retry(&self, ctx: &HttpRequestContext, error: &TableError, backoff: Duration) {
        tracing::info!(target: "tablebridge::http", request_id=%ctx.client_request_id, attempt=ctx.attempt, backoff_ms=backoff.as_millis() as u64, err=%error, "retrying request");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, Url};
    use tracing_test::traced_test;

    fn ctx() -> HttpRequestContext {
        HttpRequestContext {
            client_request_id: "cid-7".into(),
            method: "GET".into(),
            url: "https://acct.table.core.windows.net/people()".into(),
            location: StorageLocation::Secondary,
            attempt: 1,
        }
    }

    #[test]
    #[traced_test]
    fn logs_retries_with_backoff() {
        LoggingInterceptor.on_retry(&ctx(), &TableError::http(503, "busy"), Duration::from_millis(1500));
        assert!(logs_contain("retrying request"));
        assert!(logs_contain("backoff_ms=1500"));
        assert!(logs_contain("cid-7"));
    }

    #[test]
    #[traced_test]
    fn request_headers_are_logged_masked() {
        let mut request = TableRequest::new(Method::GET, Url::parse("https://acct.table.core.windows.net/t").unwrap())
            .with_header("Authorization", "SharedKey acct:c2VjcmV0c2lnbmF0dXJl")
            .unwrap();
        LoggingInterceptor.on_before_send(&ctx(), &mut request).unwrap();
        assert!(logs_contain("sending request"));
        assert!(!logs_contain("c2VjcmV0c2lnbmF0dXJl"));
    }
}
