//! Multipart batch framing.
//!
//! Requests: a `multipart/mixed` envelope (`batch_<uuid>`) holding either one
//! changeset (`changeset_<uuid>`) of write sub-requests, or a single bare
//! retrieve. Responses are read sub-response by sub-response and matched to
//! the batch's operations by position.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use std::io::{BufRead, Write};
use uuid::Uuid;

use super::entity_json::read_entity;
use super::error_body::{embedded_operation_index, parse_extended_error};
use crate::error::TableError;
use crate::execution::stream::MultiBufferStream;
use crate::types::{
    BatchResultSink, EntitySchema, RequestResult, TableOperation, TableOperationType, TableResult,
};

const CRLF: &str = "\r\n";

/// One framed sub-request.
#[derive(Debug, Clone)]
pub struct BatchPart {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// Serialised batch body and its `Content-Type`.
#[derive(Debug, Clone)]
pub struct BatchPayload {
    pub content_type: String,
    pub body: Bytes,
}

/// Frame `parts` as a batch request body.
pub fn write_batch(parts: &[BatchPart]) -> Result<BatchPayload, TableError> {
    let batch = format!("batch_{}", Uuid::new_v4());
    let mut out: Vec<u8> = Vec::new();
    let io = |e: std::io::Error| TableError::Internal(format!("failed to frame batch: {e}"));

    let single_retrieve = parts.len() == 1 && parts[0].method == Method::GET;
    if single_retrieve {
        write!(out, "--{batch}{CRLF}").map_err(io)?;
        write_part(&mut out, &parts[0], None).map_err(io)?;
    } else {
        let changeset = format!("changeset_{}", Uuid::new_v4());
        write!(
            out,
            "--{batch}{CRLF}Content-Type: multipart/mixed; boundary={changeset}{CRLF}{CRLF}"
        )
        .map_err(io)?;
        for (index, part) in parts.iter().enumerate() {
            write!(out, "--{changeset}{CRLF}").map_err(io)?;
            write_part(&mut out, part, Some(index + 1)).map_err(io)?;
        }
        write!(out, "--{changeset}--{CRLF}").map_err(io)?;
    }
    write!(out, "--{batch}--{CRLF}").map_err(io)?;

    Ok(BatchPayload {
        content_type: format!("multipart/mixed; boundary={batch}"),
        body: Bytes::from(out),
    })
}

fn write_part(out: &mut Vec<u8>, part: &BatchPart, content_id: Option<usize>) -> std::io::Result<()> {
    write!(
        out,
        "Content-Type: application/http{CRLF}Content-Transfer-Encoding: binary{CRLF}{CRLF}"
    )?;
    write!(out, "{} {} HTTP/1.1{CRLF}", part.method, part.url)?;
    if let Some(id) = content_id {
        write!(out, "Content-ID: {id}{CRLF}")?;
    }
    for (name, value) in &part.headers {
        write!(out, "{name}: {value}{CRLF}")?;
    }
    write!(out, "{CRLF}")?;
    if let Some(body) = &part.body {
        out.extend_from_slice(body);
    }
    write!(out, "{CRLF}")
}

/// One `application/http` response inside a batch response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl SubResponse {
    /// Header lookup by exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

enum ReadState {
    Scanning,
    Headers,
    Body,
}

/// Split a batch response into its sub-responses, in order.
pub fn read_sub_responses(body: &MultiBufferStream) -> Result<Vec<SubResponse>, TableError> {
    let mut responses = Vec::new();
    let mut current = SubResponse::default();
    let mut state = ReadState::Scanning;

    for line in body.reader().lines() {
        let line = line.map_err(|e| TableError::parse(format!("unreadable batch response: {e}")))?;
        let line = line.trim_end_matches('\r');
        match state {
            ReadState::Scanning => {
                if line.starts_with("HTTP/") {
                    current = parse_status_line(line)?;
                    state = ReadState::Headers;
                }
            }
            ReadState::Headers => {
                if line.is_empty() {
                    state = ReadState::Body;
                } else if let Some((name, value)) = line.split_once(':') {
                    current.headers.push((name.trim().to_string(), value.trim().to_string()));
                }
            }
            ReadState::Body => {
                if line.starts_with("--") {
                    responses.push(std::mem::take(&mut current));
                    state = ReadState::Scanning;
                } else {
                    if !current.body.is_empty() {
                        current.body.push('\n');
                    }
                    current.body.push_str(line);
                }
            }
        }
    }
    if !matches!(state, ReadState::Scanning) {
        responses.push(current);
    }
    Ok(responses)
}

fn parse_status_line(line: &str) -> Result<SubResponse, TableError> {
    let mut parts = line.splitn(3, ' ');
    let _version = parts.next();
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| TableError::parse(format!("invalid batch status line '{line}'")))?;
    Ok(SubResponse {
        status,
        reason: parts.next().unwrap_or_default().to_string(),
        ..Default::default()
    })
}

fn expected_status(op: &TableOperation, status: u16) -> bool {
    match op.operation_type {
        TableOperationType::Insert if op.echo_content => status == 201,
        TableOperationType::Insert => status == 204,
        TableOperationType::Retrieve => status == 200,
        _ => status == 204,
    }
}

/// Match sub-responses to `ops` by position and push one result per operation.
///
/// A retrieve answered with 404, or not answered at all, is a normal
/// not-found result. Any other unexpected status fails the batch with the
/// index of the failing operation.
pub fn apply_batch_response(
    ops: &[TableOperation],
    responses: Vec<SubResponse>,
    schema: Option<&EntitySchema>,
    sink: &BatchResultSink,
) -> Result<(), TableError> {
    let mut responses = responses.into_iter();
    for (index, op) in ops.iter().enumerate() {
        let is_retrieve = op.operation_type == TableOperationType::Retrieve;
        let Some(response) = responses.next() else {
            if is_retrieve {
                sink.push(not_found());
                continue;
            }
            return Err(TableError::parse(format!(
                "batch response ended after {index} of {} operations",
                ops.len()
            )));
        };

        if is_retrieve && response.status == 404 {
            sink.push(not_found());
            continue;
        }
        if !expected_status(op, response.status) {
            return Err(batch_item_error(index, op, &response));
        }

        let etag = response.header("ETag").map(str::to_string);
        let result = if response.status == 204 || response.body.trim().is_empty() {
            match op.operation_type {
                TableOperationType::Delete | TableOperationType::Retrieve => None,
                _ => {
                    let mut entity = op.entity.clone();
                    entity.etag = etag.clone();
                    Some(entity)
                }
            }
        } else {
            let mut entity = read_entity(serde_json::from_str(&response.body)?, schema)?;
            if entity.etag.is_none() {
                entity.etag = etag.clone();
            }
            Some(entity)
        };
        sink.push(TableResult {
            http_status_code: response.status,
            etag,
            result,
        });
    }
    Ok(())
}

fn not_found() -> TableResult {
    TableResult {
        http_status_code: 404,
        etag: None,
        result: None,
    }
}

/// Classify a failed sub-response.
///
/// 409 on insert and 404 on any other write are final; other unexpected
/// statuses are left to the retry policy. When the service's message starts
/// with `"<n>:"` that index is reported as-is.
fn batch_item_error(index: usize, op: &TableOperation, response: &SubResponse) -> TableError {
    let info = parse_extended_error(
        &MultiBufferStream::from_slice(response.body.as_bytes()),
        &HeaderMap::new(),
    );
    let message = info
        .as_ref()
        .map(|i| i.error_message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| response.reason.clone());
    let reported_index = embedded_operation_index(&message).unwrap_or(index);
    let is_insert = op.operation_type == TableOperationType::Insert;
    let fail_fast = (is_insert && response.status == 409) || (!is_insert && response.status == 404);

    let mut result = RequestResult::default();
    result.set_extended_error(info);
    TableError::BatchItemFailed {
        index: reported_index,
        status: response.status,
        message,
        retryable: !fail_fast,
        result: Box::new(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DynamicTableEntity, EntityProperty};

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://acct.table.core.windows.net/{path}")).unwrap()
    }

    fn entity(rk: &str) -> DynamicTableEntity {
        DynamicTableEntity::new("p", rk).with_property("V", EntityProperty::Int32(1))
    }

    fn response(parts: &[(&str, &str)]) -> MultiBufferStream {
        let mut text = String::from(
            "--batchresponse_1\r\nContent-Type: multipart/mixed; boundary=changesetresponse_1\r\n\r\n",
        );
        for (status_line, body) in parts {
            text.push_str("--changesetresponse_1\r\nContent-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n\r\n");
            text.push_str(status_line);
            text.push_str("\r\nX-Content-Type-Options: nosniff\r\nDataServiceVersion: 3.0;\r\nETag: W/\"1\"\r\n\r\n");
            if !body.is_empty() {
                text.push_str(body);
                text.push_str("\r\n");
            }
        }
        text.push_str("--changesetresponse_1--\r\n--batchresponse_1--\r\n");
        MultiBufferStream::from_slice(text.as_bytes())
    }

    #[test]
    fn changeset_framing() {
        let parts = vec![
            BatchPart {
                method: Method::POST,
                url: url("people"),
                headers: vec![("Prefer".into(), "return-no-content".into())],
                body: Some(br#"{"PartitionKey":"p","RowKey":"1"}"#.to_vec()),
            },
            BatchPart {
                method: Method::DELETE,
                url: url("people(PartitionKey='p',RowKey='2')"),
                headers: vec![("If-Match".into(), "*".into())],
                body: None,
            },
        ];
        let payload = write_batch(&parts).unwrap();
        let text = String::from_utf8(payload.body.to_vec()).unwrap();
        let batch = payload.content_type.strip_prefix("multipart/mixed; boundary=").unwrap();
        assert!(batch.starts_with("batch_"));
        assert!(text.starts_with(&format!("--{batch}\r\nContent-Type: multipart/mixed; boundary=changeset_")));
        assert!(text.contains("POST https://acct.table.core.windows.net/people HTTP/1.1\r\nContent-ID: 1\r\nPrefer: return-no-content\r\n"));
        assert!(text.contains("Content-ID: 2\r\nIf-Match: *\r\n"));
        assert!(text.ends_with(&format!("--{batch}--\r\n")));
        assert_eq!(text.matches("Content-Type: application/http").count(), 2);
    }

    #[test]
    fn single_retrieve_has_no_changeset() {
        let payload = write_batch(&[BatchPart {
            method: Method::GET,
            url: url("people(PartitionKey='p',RowKey='1')"),
            headers: vec![],
            body: None,
        }])
        .unwrap();
        let text = String::from_utf8(payload.body.to_vec()).unwrap();
        assert!(!text.contains("changeset_"));
        assert!(text.contains("GET https://acct.table.core.windows.net/people(PartitionKey='p',RowKey='1') HTTP/1.1"));
    }

    #[test]
    fn results_align_with_operations() {
        let ops = vec![
            TableOperation::insert(entity("1"), false),
            TableOperation::insert(entity("2"), true),
            TableOperation::delete(entity("3").with_etag("*")),
        ];
        let body = response(&[
            ("HTTP/1.1 204 No Content", ""),
            ("HTTP/1.1 201 Created", r#"{"PartitionKey":"p","RowKey":"2","V":1}"#),
            ("HTTP/1.1 204 No Content", ""),
        ]);
        let sink = BatchResultSink::new();
        apply_batch_response(&ops, read_sub_responses(&body).unwrap(), None, &sink).unwrap();
        let results = sink.take();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].http_status_code, 204);
        assert_eq!(results[0].etag.as_deref(), Some("W/\"1\""));
        assert_eq!(results[1].result.as_ref().unwrap().row_key, "2");
        assert!(results[2].result.is_none());
    }

    #[test]
    fn missing_retrieve_is_not_found() {
        let ops = vec![TableOperation::retrieve("p", "1")];
        let sink = BatchResultSink::new();
        apply_batch_response(&ops, Vec::new(), None, &sink).unwrap();
        assert_eq!(sink.take(), vec![not_found()]);

        let body = response(&[("HTTP/1.1 404 Not Found", r#"{"odata.error":{"code":"ResourceNotFound","message":{"value":"nope"}}}"#)]);
        apply_batch_response(&ops, read_sub_responses(&body).unwrap(), None, &sink).unwrap();
        assert_eq!(sink.take()[0].http_status_code, 404);
    }

    #[test]
    fn failing_item_reports_its_index() {
        let ops = vec![
            TableOperation::insert(entity("1"), false),
            TableOperation::insert(entity("2"), false),
            TableOperation::replace(entity("3").with_etag("*")),
        ];
        let body = response(&[("HTTP/1.1 500 Internal Server Error", "")]);
        let sink = BatchResultSink::new();
        // The service answers a failed changeset with the failing item only.
        let mut responses = read_sub_responses(&body).unwrap();
        responses.insert(0, SubResponse { status: 204, ..Default::default() });
        responses.insert(0, SubResponse { status: 204, ..Default::default() });
        let err = apply_batch_response(&ops, responses, None, &sink).unwrap_err();
        assert_eq!(err.failed_batch_index(), Some(2));
        assert_eq!(err.status_code(), Some(500));
        assert!(err.is_retryable());
    }

    #[test]
    fn embedded_index_and_fail_fast() {
        let ops = vec![
            TableOperation::insert(entity("1"), false),
            TableOperation::insert(entity("2"), false),
        ];
        let body = response(&[(
            "HTTP/1.1 409 Conflict",
            r#"{"odata.error":{"code":"EntityAlreadyExists","message":{"lang":"en-US","value":"1:The specified entity already exists."}}}"#,
        )]);
        let err = apply_batch_response(&ops, read_sub_responses(&body).unwrap(), None, &BatchResultSink::new())
            .unwrap_err();
        assert_eq!(err.failed_batch_index(), Some(1));
        assert!(!err.is_retryable());
        assert_eq!(
            err.extended_error().map(|e| e.error_code.as_str()),
            Some("EntityAlreadyExists")
        );

        let ops = vec![TableOperation::merge(entity("1").with_etag("*"))];
        let body = response(&[("HTTP/1.1 404 Not Found", "")]);
        let err = apply_batch_response(&ops, read_sub_responses(&body).unwrap(), None, &BatchResultSink::new())
            .unwrap_err();
        assert_eq!(err.failed_batch_index(), Some(0));
        assert!(!err.is_retryable());
    }

    #[test]
    fn sub_response_headers_are_case_sensitive() {
        let body = response(&[("HTTP/1.1 204 No Content", "")]);
        let parsed = read_sub_responses(&body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].header("ETag"), Some("W/\"1\""));
        assert_eq!(parsed[0].header("etag"), None);
        assert_eq!(parsed[0].reason, "No Content");
    }
}
