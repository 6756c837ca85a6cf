#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tablebridge::auth::StorageCredentials;
use tablebridge::retry::LinearRetry;
use tablebridge::types::{StorageUri, TableRequestOptions};
use tablebridge::{CloudTable, TableServiceClient};
use wiremock::MockServer;

pub fn storage_uri(server: &MockServer) -> StorageUri {
    StorageUri::with_derived_secondary(&server.uri()).expect("mock server uri")
}

pub fn client_for(server: &MockServer, credentials: StorageCredentials) -> TableServiceClient {
    TableServiceClient::with_http_client(storage_uri(server), credentials, reqwest::Client::new())
}

pub fn table_for(server: &MockServer) -> CloudTable {
    client_for(server, StorageCredentials::Anonymous)
        .table("people")
        .expect("valid table name")
}

/// Options retrying up to three times with a short linear backoff.
pub fn fast_retry() -> TableRequestOptions {
    TableRequestOptions::new().with_retry_policy(Arc::new(LinearRetry::new(Duration::from_millis(5), 3)))
}

pub const BATCH_BOUNDARY: &str = "batchresponse_5e0a9a2b";
const CHANGESET_BOUNDARY: &str = "changesetresponse_77c1c5a1";

/// A `$batch` response body holding the given `(status line, body)` parts.
pub fn batch_response_body(parts: &[(&str, &str)]) -> String {
    let mut text = format!(
        "--{BATCH_BOUNDARY}\r\nContent-Type: multipart/mixed; boundary={CHANGESET_BOUNDARY}\r\n\r\n"
    );
    for (status_line, body) in parts {
        text.push_str(&format!(
            "--{CHANGESET_BOUNDARY}\r\nContent-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n\r\n"
        ));
        text.push_str(status_line);
        text.push_str("\r\nDataServiceVersion: 3.0;\r\nContent-Type: application/json;odata=minimalmetadata;streaming=true;charset=utf-8\r\nETag: W/\"datetime'2024-01-01T00%3A00%3A00Z'\"\r\n\r\n");
        if !body.is_empty() {
            text.push_str(body);
            text.push_str("\r\n");
        }
    }
    text.push_str(&format!("--{CHANGESET_BOUNDARY}--\r\n--{BATCH_BOUNDARY}--\r\n"));
    text
}

pub fn batch_content_type() -> String {
    format!("multipart/mixed; boundary={BATCH_BOUNDARY}")
}
