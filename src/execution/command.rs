//! Command descriptor: everything the executor needs to run one logical call.

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::stream::MultiBufferStream;
use crate::auth::StorageCredentials;
use crate::error::TableError;
use crate::protocol::error_body;
use crate::types::{
    CommandLocationMode, ExtendedErrorInformation, OperationContext, RequestResult,
    StorageLocation, StorageUri, TableRequestOptions,
};

/// An outgoing HTTP request, built fresh for every attempt.
#[derive(Debug, Clone)]
pub struct TableRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl TableRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), TableError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TableError::invalid_argument(format!("invalid header name '{name}': {e}")))?;
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, TableError> {
        self.set_header(name, value)?;
        Ok(self)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn append_query(&mut self, key: &str, value: &str) {
        self.url.query_pairs_mut().append_pair(key, value);
    }

    /// `timeout` bounds the whole exchange, body included.
    pub(crate) fn into_reqwest(
        self,
        client: &reqwest::Client,
        timeout: Option<Duration>,
    ) -> reqwest::RequestBuilder {
        let mut builder = client.request(self.method, self.url).headers(self.headers);
        if let Some(body) = self.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }
}

/// Status line and headers of a response whose body has not been read yet.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub location: StorageLocation,
}

impl ResponseHead {
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// What a post-processor receives once the body is fully buffered.
#[derive(Debug)]
pub struct ResponseContext {
    pub head: ResponseHead,
    pub body: MultiBufferStream,
    pub request_result: RequestResult,
}

/// Inputs available to a request builder for one attempt.
pub struct BuildContext<'a> {
    /// Base URI of the current location, already transformed by the credentials.
    pub base_uri: &'a Url,
    pub location: StorageLocation,
    pub op_ctx: &'a OperationContext,
    pub options: &'a TableRequestOptions,
}

pub type BuildRequestFn =
    Box<dyn Fn(&BuildContext<'_>) -> Result<TableRequest, TableError> + Send + Sync>;
pub type BuildContentFn = Box<dyn Fn(&OperationContext) -> Result<Bytes, TableError> + Send + Sync>;
pub type BuildWithContentFn =
    Box<dyn Fn(&BuildContext<'_>, Bytes) -> Result<TableRequest, TableError> + Send + Sync>;
pub type PreProcessFn =
    Box<dyn Fn(&ResponseHead, &mut RequestResult) -> Result<(), TableError> + Send + Sync>;
pub type PostProcessFn<R> =
    Box<dyn Fn(ResponseContext) -> BoxFuture<'static, Result<R, TableError>> + Send + Sync>;
pub type ParseErrorFn =
    Box<dyn Fn(&MultiBufferStream, &HeaderMap) -> Option<ExtendedErrorInformation> + Send + Sync>;
pub type RecoveryFn = Box<dyn Fn() + Send + Sync>;

/// How the outgoing request is produced. Exactly one pathway per command.
pub enum RequestFactory {
    /// Build the whole request, body included.
    Request(BuildRequestFn),
    /// Produce the body first, then wrap it in a request.
    Content {
        content: BuildContentFn,
        request: BuildWithContentFn,
    },
}

impl RequestFactory {
    pub(crate) fn build(&self, ctx: &BuildContext<'_>) -> Result<TableRequest, TableError> {
        match self {
            Self::Request(build) => build(ctx),
            Self::Content { content, request } => {
                let body = content(ctx.op_ctx)?;
                request(ctx, body)
            }
        }
    }
}

/// Descriptor of one logical REST call producing `R`.
///
/// Created per call and reused across that call's retries.
pub struct RestCommand<R> {
    pub storage_uri: StorageUri,
    pub credentials: Arc<StorageCredentials>,
    pub server_timeout: Option<Duration>,
    /// Absolute deadline; derived from the options' maximum execution time when unset.
    pub operation_expiry: Option<Instant>,
    pub command_location_mode: CommandLocationMode,
    /// Location every attempt must use, e.g. the replica that served the previous page.
    pub pinned_location: Option<StorageLocation>,
    pub request_factory: RequestFactory,
    pub pre_process: PreProcessFn,
    pub post_process: PostProcessFn<R>,
    pub parse_error: ParseErrorFn,
    pub recovery: Option<RecoveryFn>,
}

impl<R> RestCommand<R> {
    pub fn new(
        storage_uri: StorageUri,
        credentials: Arc<StorageCredentials>,
        request_factory: RequestFactory,
        post_process: PostProcessFn<R>,
    ) -> Self {
        Self {
            storage_uri,
            credentials,
            server_timeout: None,
            operation_expiry: None,
            command_location_mode: CommandLocationMode::PrimaryOnly,
            pinned_location: None,
            request_factory,
            pre_process: expect_success(),
            post_process,
            parse_error: Box::new(|body, headers| error_body::parse_extended_error(body, headers)),
            recovery: None,
        }
    }

    pub fn with_pre_process(mut self, pre_process: PreProcessFn) -> Self {
        self.pre_process = pre_process;
        self
    }

    pub fn with_error_parser(mut self, parse_error: ParseErrorFn) -> Self {
        self.parse_error = parse_error;
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryFn) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn with_location_mode(mut self, mode: CommandLocationMode) -> Self {
        self.command_location_mode = mode;
        self
    }

    pub fn with_server_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.server_timeout = timeout;
        self
    }

    pub fn with_operation_expiry(mut self, expiry: Instant) -> Self {
        self.operation_expiry = Some(expiry);
        self
    }

    pub fn pinned_to(mut self, location: Option<StorageLocation>) -> Self {
        self.pinned_location = location;
        self
    }
}

/// Pre-processor accepting any 2xx status.
pub fn expect_success() -> PreProcessFn {
    Box::new(|head, _| {
        if head.status.is_success() {
            Ok(())
        } else {
            Err(unexpected_status(head))
        }
    })
}

/// Pre-processor accepting exactly the listed statuses.
pub fn expect_status(accepted: &'static [u16]) -> PreProcessFn {
    Box::new(move |head, _| {
        if accepted.contains(&head.status_code()) {
            Ok(())
        } else {
            Err(unexpected_status(head))
        }
    })
}

/// Classify a status the operation did not expect.
pub fn unexpected_status(head: &ResponseHead) -> TableError {
    let message = head
        .status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string();
    TableError::http(head.status_code(), message)
}
