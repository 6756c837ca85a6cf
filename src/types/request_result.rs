//! Per-attempt diagnostic records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::location::StorageLocation;

/// Structured diagnostic payload returned by the service alongside a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedErrorInformation {
    pub error_code: String,
    pub error_message: String,
    /// Free-form extra details such as `ExceptionMessage` or `StackTrace`.
    pub additional_details: HashMap<String, String>,
}

/// Outcome of a single attempt (one HTTP round-trip).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestResult {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub target_location: Option<StorageLocation>,
    /// HTTP status code, `0` when no response was received.
    pub http_status_code: u16,
    pub http_status_message: Option<String>,
    pub service_request_id: Option<String>,
    pub etag: Option<String>,
    pub content_md5: Option<String>,
    /// Value of the response `Date` header.
    pub request_date: Option<String>,
    pub error_code: Option<String>,
    pub extended_error: Option<ExtendedErrorInformation>,
    /// Whether the failure of this attempt was considered retryable.
    pub retryable: Option<bool>,
    /// Display form of the failure, if the attempt failed.
    pub error: Option<String>,
}

impl RequestResult {
    pub fn started_at(location: StorageLocation) -> Self {
        Self {
            start_time: Some(Utc::now()),
            target_location: Some(location),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.http_status_code) && self.error.is_none()
    }

    /// Record extended error information, mirroring its code onto `error_code`.
    pub fn set_extended_error(&mut self, info: Option<ExtendedErrorInformation>) {
        if let Some(info) = &info
            && !info.error_code.is_empty()
        {
            self.error_code = Some(info.error_code.clone());
        }
        self.extended_error = info;
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }
}
