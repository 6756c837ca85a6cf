//! Core error types.

use thiserror::Error;

use crate::types::{ExtendedErrorInformation, RequestResult};

/// Coarse classification of a `TableError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Timeout,
    Cancelled,
    Validation,
    /// The service rejected the request (4xx).
    Client,
    /// The service failed to handle the request (5xx).
    Server,
    Network,
    Parsing,
    Unsupported,
    Configuration,
    Internal,
}

/// The single error family surfaced by every table call.
///
/// Variants that stem from a request carry the `RequestResult` of the attempt
/// that produced them, so status code, service request id and extended error
/// information survive every layer of wrapping.
#[derive(Debug, Clone, Error)]
pub enum TableError {
    /// The call exceeded its maximum execution time.
    #[error("the client could not finish the operation within the specified timeout")]
    Timeout {
        result: Box<RequestResult>,
        /// Failure of the last attempt before the budget ran out.
        #[source]
        source: Option<Box<TableError>>,
    },

    /// The caller cancelled the call.
    #[error("the operation was cancelled")]
    Cancelled { result: Box<RequestResult> },

    /// Malformed local input, rejected before any network call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The service answered with a failure status.
    #[error("http {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retryable: bool,
        result: Box<RequestResult>,
    },

    /// The request never produced a complete response.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        result: Box<RequestResult>,
    },

    /// One operation of a batch failed; `index` is zero-based.
    #[error("batch operation {index} failed with http {status}: {message}")]
    BatchItemFailed {
        index: usize,
        status: u16,
        message: String,
        retryable: bool,
        result: Box<RequestResult>,
    },

    /// The backend does not offer this operation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A response body expected to be well-formed could not be parsed.
    #[error("parse error: {message}")]
    Parse {
        message: String,
        result: Option<Box<RequestResult>>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TableError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// A retryable failure status; the retry policy decides whether to act on it.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            retryable: true,
            result: Box::default(),
        }
    }

    /// A failure status that must not be retried.
    pub fn http_terminal(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            retryable: false,
            result: Box::default(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            result: Box::default(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            result: None,
        }
    }

    pub fn timeout(result: RequestResult, source: Option<TableError>) -> Self {
        Self::Timeout {
            result: Box::new(result),
            source: source.map(Box::new),
        }
    }

    pub fn cancelled(result: RequestResult) -> Self {
        Self::Cancelled {
            result: Box::new(result),
        }
    }

    /// Whether a retry policy may retry this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { retryable, .. } | Self::BatchItemFailed { retryable, .. } => *retryable,
            Self::Transport { .. } => true,
            _ => false,
        }
    }

    /// HTTP status of the failing response, if one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } | Self::BatchItemFailed { status, .. } => Some(*status),
            _ => self
                .request_result()
                .map(|r| r.http_status_code)
                .filter(|code| *code != 0),
        }
    }

    pub fn request_result(&self) -> Option<&RequestResult> {
        match self {
            Self::Timeout { result, .. }
            | Self::Cancelled { result }
            | Self::Http { result, .. }
            | Self::Transport { result, .. }
            | Self::BatchItemFailed { result, .. } => Some(result),
            Self::Parse { result, .. } => result.as_deref(),
            _ => None,
        }
    }

    pub fn service_request_id(&self) -> Option<&str> {
        self.request_result()
            .and_then(|r| r.service_request_id.as_deref())
    }

    pub fn extended_error(&self) -> Option<&ExtendedErrorInformation> {
        self.request_result().and_then(|r| r.extended_error.as_ref())
    }

    /// Zero-based index of the failing batch operation.
    pub fn failed_batch_index(&self) -> Option<usize> {
        match self {
            Self::BatchItemFailed { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Attach the attempt's diagnostic record.
    ///
    /// A server-provided extended error message replaces the generic message of
    /// an `Http` failure so the service's own wording reaches the caller.
    pub fn with_request_result(mut self, attempt: &RequestResult) -> Self {
        match &mut self {
            Self::Http {
                message, result, ..
            } => {
                if let Some(ext) = &attempt.extended_error
                    && !ext.error_message.is_empty()
                {
                    *message = ext.error_message.clone();
                }
                **result = attempt.clone();
            }
            Self::BatchItemFailed { result, .. } => {
                // The sub-response's error body outranks the envelope's.
                let item_error = result.extended_error.take();
                **result = attempt.clone();
                if item_error.is_some() {
                    result.set_extended_error(item_error);
                }
            }
            Self::Timeout { result, .. }
            | Self::Cancelled { result }
            | Self::Transport { result, .. } => **result = attempt.clone(),
            Self::Parse { result, .. } => *result = Some(Box::new(attempt.clone())),
            _ => {}
        }
        self
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::InvalidArgument(_) => ErrorCategory::Validation,
            Self::Http { status, .. } | Self::BatchItemFailed { status, .. } => {
                if *status >= 500 {
                    ErrorCategory::Server
                } else {
                    ErrorCategory::Client
                }
            }
            Self::Transport { .. } => ErrorCategory::Network,
            Self::UnsupportedOperation(_) => ErrorCategory::Unsupported,
            Self::Parse { .. } => ErrorCategory::Parsing,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_errors_are_terminal() {
        assert!(!TableError::invalid_argument("bad").is_retryable());
        assert!(!TableError::UnsupportedOperation("x".into()).is_retryable());
        assert!(!TableError::timeout(RequestResult::default(), None).is_retryable());
        assert!(!TableError::cancelled(RequestResult::default()).is_retryable());
        assert!(TableError::transport("reset").is_retryable());
        assert!(TableError::http(503, "busy").is_retryable());
        assert!(!TableError::http_terminal(409, "conflict").is_retryable());
    }

    #[test]
    fn request_result_survives_wrapping() {
        let attempt = RequestResult {
            http_status_code: 404,
            service_request_id: Some("req-1".into()),
            extended_error: Some(ExtendedErrorInformation {
                error_code: "ResourceNotFound".into(),
                error_message: "The specified resource does not exist.".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = TableError::http(404, "Not Found").with_request_result(&attempt);
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(err.service_request_id(), Some("req-1"));
        assert_eq!(
            err.extended_error().map(|e| e.error_code.as_str()),
            Some("ResourceNotFound")
        );
        assert!(err.to_string().contains("does not exist"));
        assert_eq!(err.category(), ErrorCategory::Client);

        let timeout = TableError::timeout(attempt.clone(), Some(err));
        assert_eq!(timeout.status_code(), Some(404));
        assert!(std::error::Error::source(&timeout).is_some());
    }
}
