//! Standard request headers and response metadata.

use crate::defaults::protocol::{
    DATA_SERVICE_VERSION, HEADER_CLIENT_REQUEST_ID, HEADER_DATA_SERVICE_VERSION,
    HEADER_MAX_DATA_SERVICE_VERSION, HEADER_MS_VERSION, HEADER_REQUEST_ID,
    MAX_DATA_SERVICE_VERSION, STORAGE_VERSION,
};
use crate::error::TableError;
use crate::execution::command::{ResponseHead, TableRequest};
use crate::types::{OperationContext, PayloadFormat, RequestResult};

/// Headers every request carries: service version, client request id and
/// the caller's custom headers. Values set by the command builder win.
pub fn apply_request_headers(
    request: &mut TableRequest,
    op_ctx: &OperationContext,
) -> Result<(), TableError> {
    if request.header(HEADER_MS_VERSION).is_none() {
        request.set_header(HEADER_MS_VERSION, STORAGE_VERSION)?;
    }
    request.set_header(HEADER_CLIENT_REQUEST_ID, &op_ctx.client_request_id)?;
    for (name, value) in &op_ctx.custom_headers {
        if request.header(name).is_none() {
            request.set_header(name, value)?;
        }
    }
    Ok(())
}

/// OData negotiation headers for JSON payloads.
pub fn apply_odata_headers(
    request: &mut TableRequest,
    format: PayloadFormat,
) -> Result<(), TableError> {
    request.set_header("Accept", format.accept_header())?;
    request.set_header(HEADER_DATA_SERVICE_VERSION, DATA_SERVICE_VERSION)?;
    request.set_header(HEADER_MAX_DATA_SERVICE_VERSION, MAX_DATA_SERVICE_VERSION)?;
    Ok(())
}

/// Copy status and service metadata from a response into the attempt record.
pub fn read_response_metadata(head: &ResponseHead, result: &mut RequestResult) {
    result.http_status_code = head.status_code();
    result.http_status_message = head.status.canonical_reason().map(str::to_string);
    result.service_request_id = head.header(HEADER_REQUEST_ID).map(str::to_string);
    result.etag = head.header("ETag").map(str::to_string);
    result.content_md5 = head.header("Content-MD5").map(str::to_string);
    result.request_date = head.header("Date").map(str::to_string);
}
