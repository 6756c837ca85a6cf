//! Single-entity commands: insert, upserts, replace, merge, delete, retrieve.

use bytes::Bytes;
use reqwest::{Method, Url};
use std::sync::Arc;

use super::{ServiceEndpoint, parse_with, resource_url, validate_table_name};
use crate::defaults::protocol::{
    HEADER_HTTP_METHOD, HEADER_PREFER, PREFER_RETURN_CONTENT, PREFER_RETURN_NO_CONTENT,
};
use crate::error::TableError;
use crate::execution::command::{
    BuildContext, RequestFactory, ResponseContext, RestCommand, TableRequest, expect_status,
};
use crate::protocol::entity_json::{read_entity_body, write_entity_bytes};
use crate::protocol::headers::apply_odata_headers;
use crate::types::{
    CommandLocationMode, EntitySchema, PayloadFormat, TableOperation, TableOperationType,
    TableRequestOptions, TableResult,
};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Method, address and headers of one entity sub-request.
#[derive(Debug, Clone)]
pub(crate) struct EntityRequestParts {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

/// `table(PartitionKey='pk',RowKey='rk')` with quotes doubled and the keys
/// percent-encoded.
pub fn entity_path(table: &str, partition_key: &str, row_key: &str) -> String {
    let escape = |key: &str| urlencoding::encode(&key.replace('\'', "''")).into_owned();
    format!(
        "{table}(PartitionKey='{}',RowKey='{}')",
        escape(partition_key),
        escape(row_key)
    )
}

fn merge_method() -> Result<Method, TableError> {
    Method::from_bytes(b"MERGE").map_err(|e| TableError::Internal(format!("invalid method: {e}")))
}

/// Wire shape of `op`, shared by single requests and batch parts.
pub(crate) fn entity_request_parts(
    op: &TableOperation,
    table: &str,
    base: &Url,
    format: PayloadFormat,
    merge_tunneling: bool,
) -> Result<EntityRequestParts, TableError> {
    let entity = &op.entity;
    let entity_url = || resource_url(base, &entity_path(table, &entity.partition_key, &entity.row_key));
    let mut headers = vec![("Accept".to_string(), format.accept_header().to_string())];

    let (method, url) = match op.operation_type {
        TableOperationType::Insert => {
            let prefer = if op.echo_content {
                PREFER_RETURN_CONTENT
            } else {
                PREFER_RETURN_NO_CONTENT
            };
            headers.push((HEADER_PREFER.to_string(), prefer.to_string()));
            (Method::POST, resource_url(base, table))
        }
        TableOperationType::Replace | TableOperationType::InsertOrReplace => {
            (Method::PUT, entity_url())
        }
        TableOperationType::Merge | TableOperationType::InsertOrMerge if merge_tunneling => {
            headers.push((HEADER_HTTP_METHOD.to_string(), "MERGE".to_string()));
            (Method::POST, entity_url())
        }
        TableOperationType::Merge | TableOperationType::InsertOrMerge => {
            (merge_method()?, entity_url())
        }
        TableOperationType::Delete => (Method::DELETE, entity_url()),
        TableOperationType::Retrieve => {
            let mut url = entity_url();
            if let Some(columns) = &op.select_columns {
                url.query_pairs_mut().append_pair("$select", &columns.join(","));
            }
            (Method::GET, url)
        }
    };

    if has_body(op.operation_type) {
        headers.push(("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string()));
    }
    if let Some(etag) = op.if_match()? {
        headers.push(("If-Match".to_string(), etag.to_string()));
    }
    Ok(EntityRequestParts {
        method,
        url,
        headers,
    })
}

pub(crate) const fn has_body(operation_type: TableOperationType) -> bool {
    !matches!(
        operation_type,
        TableOperationType::Delete | TableOperationType::Retrieve
    )
}

fn accepted_statuses(operation_type: TableOperationType) -> &'static [u16] {
    match operation_type {
        TableOperationType::Insert => &[201, 204],
        TableOperationType::Retrieve => &[200, 404],
        _ => &[204],
    }
}

/// Command running `op` against `table`.
///
/// Retrieve may be served by either replica; every write goes to the primary.
pub fn entity_command(
    endpoint: &ServiceEndpoint,
    table: &str,
    op: TableOperation,
    options: &TableRequestOptions,
    schema: Option<Arc<EntitySchema>>,
) -> Result<RestCommand<TableResult>, TableError> {
    validate_table_name(table)?;
    op.validate()?;

    let operation_type = op.operation_type;
    let op = Arc::new(op);
    let table: Arc<str> = Arc::from(table);
    let format = options.effective_payload_format();
    let tunneling = options.use_merge_tunneling.unwrap_or(false);

    let build = {
        let op = op.clone();
        move |ctx: &BuildContext<'_>, body: Option<Bytes>| -> Result<TableRequest, TableError> {
            let parts = entity_request_parts(&op, &table, ctx.base_uri, format, tunneling)?;
            let mut request = TableRequest::new(parts.method, parts.url);
            for (name, value) in &parts.headers {
                request.set_header(name, value)?;
            }
            apply_odata_headers(&mut request, format)?;
            if let Some(body) = body {
                request = request.with_body(body);
            }
            Ok(request)
        }
    };

    let factory = if has_body(operation_type) {
        let entity_op = op.clone();
        RequestFactory::Content {
            content: Box::new(move |_| Ok(Bytes::from(write_entity_bytes(&entity_op.entity)?))),
            request: Box::new(move |ctx, body| build(ctx, Some(body))),
        }
    } else {
        RequestFactory::Request(Box::new(move |ctx| build(ctx, None)))
    };

    let post = parse_with(move |ctx| read_entity_result(&op, ctx, schema.as_deref()));
    let location_mode = if operation_type == TableOperationType::Retrieve {
        CommandLocationMode::PrimaryOrSecondary
    } else {
        CommandLocationMode::PrimaryOnly
    };

    Ok(
        RestCommand::new(endpoint.uri.clone(), endpoint.credentials.clone(), factory, post)
            .with_pre_process(expect_status(accepted_statuses(operation_type)))
            .with_location_mode(location_mode)
            .with_server_timeout(options.server_timeout),
    )
}

fn read_entity_result(
    op: &TableOperation,
    ctx: ResponseContext,
    schema: Option<&EntitySchema>,
) -> Result<TableResult, TableError> {
    let status = ctx.head.status_code();
    let etag = ctx.head.header("ETag").map(str::to_string);

    if op.operation_type == TableOperationType::Retrieve && status == 404 {
        return Ok(TableResult {
            http_status_code: status,
            etag: None,
            result: None,
        });
    }

    let result = match op.operation_type {
        TableOperationType::Delete => None,
        TableOperationType::Retrieve => Some(read_entity_body(&ctx.body, schema)?),
        _ if status == 201 && !ctx.body.is_empty() => Some(read_entity_body(&ctx.body, schema)?),
        _ => {
            let mut entity = op.entity.clone();
            entity.etag = etag.clone();
            Some(entity)
        }
    };
    let etag = etag.or_else(|| result.as_ref().and_then(|e| e.etag.clone()));
    Ok(TableResult {
        http_status_code: status,
        etag,
        result,
    })
}
