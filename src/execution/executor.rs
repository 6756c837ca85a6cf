//! The retry loop.
//!
//! One logical call runs its attempts strictly one after another. Every
//! iteration produces an [`AttemptOutcome`]; failures are classified once,
//! recorded on the operation context, and either retried under the call's
//! retry-policy instance or returned.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::command::{BuildContext, ResponseContext, ResponseHead, RestCommand, TableRequest};
use super::http::interceptor::{HttpInterceptor, HttpRequestContext};
use super::state::ExecutionState;
use super::stream::{CopyGuard, CopyInterrupt, MultiBufferStream, copy_response_body};
use crate::auth::{AuthenticationHandler, handler_for};
use crate::error::TableError;
use crate::protocol::headers::{apply_request_headers, read_response_metadata};
use crate::retry::{RetryContext, RetryDecision, decide};
use crate::types::{
    LocationMode, OperationContext, StorageLocation, TableRequestOptions, resolve_location_mode,
};

/// Result of one loop iteration.
#[derive(Debug)]
pub enum AttemptOutcome<R> {
    Success(R),
    Retry(RetryDecision),
    Fail(TableError),
}

/// Runs [`RestCommand`]s against a shared HTTP client.
#[derive(Clone)]
pub struct Executor {
    client: reqwest::Client,
    interceptors: Vec<Arc<dyn HttpInterceptor>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl Executor {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            interceptors: Vec::new(),
        }
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn HttpInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_interceptors(mut self, interceptors: Vec<Arc<dyn HttpInterceptor>>) -> Self {
        self.interceptors.extend(interceptors);
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Execute `cmd` to completion.
    ///
    /// Every attempt's `RequestResult` is appended to `op_ctx.request_results`,
    /// and a returned error carries the result of the attempt that produced it.
    pub async fn execute<R>(
        &self,
        cmd: &RestCommand<R>,
        options: &TableRequestOptions,
        op_ctx: &mut OperationContext,
        cancel: &CancellationToken,
    ) -> Result<R, TableError>
    where
        R: Send + 'static,
    {
        let (location_mode, initial_location) = initial_location(cmd, options)?;
        cmd.storage_uri.require(initial_location)?;

        let mut state = ExecutionState::new(
            options,
            location_mode,
            initial_location,
            cmd.operation_expiry,
            cancel.clone(),
        );
        let guard = CopyGuard::new(cancel.clone(), options.effective_body_stall_grace());
        let auth = handler_for(&cmd.credentials);
        op_ctx.start_time = Some(Utc::now());

        loop {
            state.init_attempt();
            let outcome = self
                .run_attempt(cmd, options, op_ctx, &mut state, &guard, auth.as_ref())
                .await;

            match outcome {
                AttemptOutcome::Success(value) => {
                    state.last_error = None;
                    state.request_result.finish();
                    op_ctx.request_results.push(state.request_result.clone());
                    op_ctx.end_time = Some(Utc::now());
                    tracing::debug!(target: "tablebridge::executor", request_id=%op_ctx.client_request_id, attempts=state.retry_count + 1, "operation completed");
                    return Ok(value);
                }
                AttemptOutcome::Fail(err) => {
                    op_ctx.end_time = Some(Utc::now());
                    tracing::debug!(target: "tablebridge::executor", request_id=%op_ctx.client_request_id, attempts=state.retry_count + 1, err=%err, "operation failed");
                    return Err(err);
                }
                AttemptOutcome::Retry(decision) => {
                    if let Some(recovery) = &cmd.recovery {
                        recovery();
                    }

                    let http_ctx = self.request_context(op_ctx, &state, None);
                    if let Some(err) = &state.last_error {
                        for interceptor in &self.interceptors {
                            interceptor.on_retry(&http_ctx, err, decision.backoff);
                        }
                    }

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            op_ctx.end_time = Some(Utc::now());
                            return Err(state.cancelled_error());
                        }
                        _ = tokio::time::sleep(decision.backoff) => {}
                    }
                    state.retry_count += 1;
                }
            }
        }
    }

    /// Blocking variant of [`Executor::execute`].
    ///
    /// The call runs on a private current-thread runtime. When invoked from
    /// inside a runtime it moves to a scoped thread so the caller's scheduler
    /// is never blocked from within.
    pub fn execute_sync<R>(
        &self,
        cmd: &RestCommand<R>,
        options: &TableRequestOptions,
        op_ctx: &mut OperationContext,
        cancel: &CancellationToken,
    ) -> Result<R, TableError>
    where
        R: Send + 'static,
    {
        let mut run = || -> Result<R, TableError> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| TableError::Internal(format!("failed to start runtime: {e}")))?;
            runtime.block_on(self.execute(cmd, options, op_ctx, cancel))
        };

        if tokio::runtime::Handle::try_current().is_ok() {
            std::thread::scope(|scope| {
                scope.spawn(run).join().unwrap_or_else(|_| {
                    Err(TableError::Internal(
                        "synchronous execution thread panicked".to_string(),
                    ))
                })
            })
        } else {
            run()
        }
    }

    async fn run_attempt<R>(
        &self,
        cmd: &RestCommand<R>,
        options: &TableRequestOptions,
        op_ctx: &mut OperationContext,
        state: &mut ExecutionState,
        guard: &CopyGuard,
        auth: &dyn AuthenticationHandler,
    ) -> AttemptOutcome<R>
    where
        R: Send + 'static,
    {
        let mut request = None;
        let result = self
            .attempt(cmd, options, op_ctx, state, guard, auth, &mut request)
            .await;

        let sent = request.is_some();
        let err = match result {
            Ok(value) => return AttemptOutcome::Success(value),
            Err(err) if sent => err.with_request_result(&state.request_result),
            // Nothing reached the wire: report the last attempt that did.
            Err(err) => match op_ctx.last_result() {
                Some(last) => err.with_request_result(last),
                None => err.with_request_result(&state.request_result),
            },
        };

        if sent {
            state.request_result.retryable = Some(err.is_retryable());
            state.request_result.error = Some(err.to_string());
            state.request_result.finish();
            op_ctx.request_results.push(state.request_result.clone());
        }

        let http_ctx = self.request_context(op_ctx, state, request.as_ref());
        for interceptor in &self.interceptors {
            interceptor.on_error(&http_ctx, &err);
        }

        match self.next_step(cmd, state, &err, op_ctx) {
            Some(decision) => {
                state.last_error = Some(err);
                AttemptOutcome::Retry(decision)
            }
            None => AttemptOutcome::Fail(err),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt<R>(
        &self,
        cmd: &RestCommand<R>,
        options: &TableRequestOptions,
        op_ctx: &OperationContext,
        state: &mut ExecutionState,
        guard: &CopyGuard,
        auth: &dyn AuthenticationHandler,
        sent: &mut Option<TableRequest>,
    ) -> Result<R, TableError>
    where
        R: Send + 'static,
    {
        let location = state.current_location;
        let base_uri = cmd
            .credentials
            .transform_uri(cmd.storage_uri.require(location)?.clone());
        let build_ctx = BuildContext {
            base_uri: &base_uri,
            location,
            op_ctx,
            options,
        };
        let mut request = cmd.request_factory.build(&build_ctx)?;
        if let Some(timeout) = cmd.server_timeout {
            request.append_query("timeout", &timeout.as_secs().to_string());
        }
        apply_request_headers(&mut request, op_ctx)?;

        let remaining = state.remaining_timeout()?;

        let http_ctx = self.request_context(op_ctx, state, Some(&request));
        for interceptor in &self.interceptors {
            interceptor.on_before_send(&http_ctx, &mut request)?;
        }
        auth.sign(&mut request)?;
        *sent = Some(request.clone());

        let response = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => return Err(state.cancelled_error()),
            res = request.into_reqwest(&self.client, remaining).send() => {
                res.map_err(|e| transport_error(e, state))?
            }
        };

        let head = ResponseHead {
            status: response.status(),
            headers: response.headers().clone(),
            location,
        };
        read_response_metadata(&head, &mut state.request_result);
        for interceptor in &self.interceptors {
            interceptor.on_response(&http_ctx, &head);
        }

        let mut body = MultiBufferStream::new();
        let pending = if head.status.is_success() {
            let pending = (cmd.pre_process)(&head, &mut state.request_result).err();
            self.buffer_body(response, &mut body, state, guard).await?;
            pending
        } else {
            // Failure bodies carry the extended error; read it before classifying.
            self.buffer_body(response, &mut body, state, guard).await?;
            let info = (cmd.parse_error)(&body, &head.headers);
            state.request_result.set_extended_error(info);
            (cmd.pre_process)(&head, &mut state.request_result).err()
        };
        if let Some(err) = pending {
            return Err(err);
        }

        let ctx = ResponseContext {
            head,
            body,
            request_result: state.request_result.clone(),
        };
        match guard.run((cmd.post_process)(ctx)).await {
            Ok(res) => res,
            Err(interrupt) => Err(interrupt_error(interrupt, state, guard)),
        }
    }

    async fn buffer_body(
        &self,
        response: reqwest::Response,
        body: &mut MultiBufferStream,
        state: &ExecutionState,
        guard: &CopyGuard,
    ) -> Result<(), TableError> {
        copy_response_body(response, body, guard)
            .await
            .map_err(|interrupt| interrupt_error(interrupt, state, guard))
    }

    /// Ask the policy whether to run another attempt, and where.
    fn next_step<R>(
        &self,
        cmd: &RestCommand<R>,
        state: &mut ExecutionState,
        err: &TableError,
        op_ctx: &OperationContext,
    ) -> Option<RetryDecision> {
        if !err.is_retryable() {
            return None;
        }

        let next_location = state.location_mode.next_location(state.current_location);
        let mut last_request_result = state.request_result.clone();
        // Batch failures are judged by the failing item's status.
        if let Some(status) = err.status_code() {
            last_request_result.http_status_code = status;
        }
        let retry_ctx = RetryContext {
            current_retry_count: state.retry_count,
            last_request_result,
            next_location,
            location_mode: state.location_mode,
        };
        let decision = decide(state.retry_policy.as_mut(), &retry_ctx, err, op_ctx);
        if !decision.should_retry {
            return None;
        }
        if state.would_expire_after(decision.backoff) {
            tracing::debug!(target: "tablebridge::executor", backoff_ms=decision.backoff.as_millis() as u64, "retry would exceed the maximum execution time");
            return None;
        }

        if let Some(mode) = decision.updated_location_mode {
            state.location_mode = mode;
        }
        let target = decision.next_location.unwrap_or(next_location);
        // Failing over needs an endpoint for the other location.
        if cmd.storage_uri.get(target).is_some() {
            state.current_location = target;
        }
        tracing::debug!(target: "tablebridge::executor", attempt=state.retry_count + 1, location=%state.current_location, backoff_ms=decision.backoff.as_millis() as u64, "scheduling retry");
        Some(decision)
    }

    fn request_context(
        &self,
        op_ctx: &OperationContext,
        state: &ExecutionState,
        request: Option<&TableRequest>,
    ) -> HttpRequestContext {
        let (method, url) = match request {
            Some(request) => {
                let mut url = request.url.clone();
                url.set_query(None);
                (request.method.to_string(), url.to_string())
            }
            None => (String::new(), String::new()),
        };
        HttpRequestContext {
            client_request_id: op_ctx.client_request_id.clone(),
            method,
            url,
            location: state.current_location,
            attempt: state.retry_count,
        }
    }
}

/// Effective location mode and first location for `cmd`.
fn initial_location<R>(
    cmd: &RestCommand<R>,
    options: &TableRequestOptions,
) -> Result<(LocationMode, StorageLocation), TableError> {
    match cmd.pinned_location {
        Some(StorageLocation::Primary) => {
            Ok((LocationMode::PrimaryOnly, StorageLocation::Primary))
        }
        Some(StorageLocation::Secondary) => {
            Ok((LocationMode::SecondaryOnly, StorageLocation::Secondary))
        }
        None => resolve_location_mode(
            options.effective_location_mode(),
            cmd.command_location_mode,
        ),
    }
}

fn interrupt_error(interrupt: CopyInterrupt, state: &ExecutionState, guard: &CopyGuard) -> TableError {
    match interrupt {
        CopyInterrupt::Cancelled => state.cancelled_error(),
        CopyInterrupt::Stalled if state.is_expired() => state.timeout_error(),
        CopyInterrupt::Stalled => TableError::transport(format!(
            "response made no progress for {:?}; connection dropped",
            guard.stall_grace
        )),
        CopyInterrupt::Transport(e) => transport_error(e, state),
    }
}

/// A request-level timeout that fired at the call's deadline is the call timing out.
fn transport_error(err: reqwest::Error, state: &ExecutionState) -> TableError {
    if err.is_timeout() && state.is_expired() {
        state.timeout_error()
    } else {
        TableError::from(err)
    }
}
