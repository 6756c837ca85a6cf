//! Table-level commands and the service-properties read.

use bytes::Bytes;
use reqwest::Method;
use serde_json::json;

use super::{ServiceEndpoint, parse_with, resource_url, validate_table_name};
use crate::defaults::protocol::{HEADER_PREFER, PREFER_RETURN_NO_CONTENT};
use crate::error::TableError;
use crate::execution::command::{RequestFactory, RestCommand, TableRequest, expect_status};
use crate::protocol::headers::apply_odata_headers;
use crate::protocol::query::{QuerySegment, read_table_segment};
use crate::types::{
    CommandLocationMode, TableContinuationToken, TableRequestOptions, TableResult,
};

const TABLES: &str = "Tables";

fn table_path(name: &str) -> String {
    format!("{TABLES}('{name}')")
}

fn status_only() -> crate::execution::command::PostProcessFn<TableResult> {
    parse_with(|ctx| {
        Ok(TableResult {
            http_status_code: ctx.head.status_code(),
            etag: None,
            result: None,
        })
    })
}

/// `POST /Tables` with `{"TableName": name}`.
pub fn create_table_command(
    endpoint: &ServiceEndpoint,
    name: &str,
    options: &TableRequestOptions,
) -> Result<RestCommand<TableResult>, TableError> {
    validate_table_name(name)?;
    let format = options.effective_payload_format();
    let body = Bytes::from(serde_json::to_vec(&json!({ "TableName": name }))?);

    let factory = RequestFactory::Request(Box::new(move |ctx| {
        let mut request = TableRequest::new(Method::POST, resource_url(ctx.base_uri, TABLES))
            .with_header("Content-Type", "application/json")?
            .with_header(HEADER_PREFER, PREFER_RETURN_NO_CONTENT)?
            .with_body(body.clone());
        apply_odata_headers(&mut request, format)?;
        Ok(request)
    }));

    Ok(
        RestCommand::new(endpoint.uri.clone(), endpoint.credentials.clone(), factory, status_only())
            .with_pre_process(expect_status(&[201, 204]))
            .with_server_timeout(options.server_timeout),
    )
}

/// `DELETE /Tables('name')`.
pub fn delete_table_command(
    endpoint: &ServiceEndpoint,
    name: &str,
    options: &TableRequestOptions,
) -> Result<RestCommand<TableResult>, TableError> {
    validate_table_name(name)?;
    let format = options.effective_payload_format();
    let path = table_path(name);

    let factory = RequestFactory::Request(Box::new(move |ctx| {
        let mut request = TableRequest::new(Method::DELETE, resource_url(ctx.base_uri, &path));
        apply_odata_headers(&mut request, format)?;
        Ok(request)
    }));

    Ok(
        RestCommand::new(endpoint.uri.clone(), endpoint.credentials.clone(), factory, status_only())
            .with_pre_process(expect_status(&[204]))
            .with_server_timeout(options.server_timeout),
    )
}

/// `GET /Tables('name')`: 200 means the table exists, 404 that it does not.
pub fn table_exists_command(
    endpoint: &ServiceEndpoint,
    name: &str,
    options: &TableRequestOptions,
) -> Result<RestCommand<bool>, TableError> {
    validate_table_name(name)?;
    let format = options.effective_payload_format();
    let path = table_path(name);

    let factory = RequestFactory::Request(Box::new(move |ctx| {
        let mut request = TableRequest::new(Method::GET, resource_url(ctx.base_uri, &path));
        apply_odata_headers(&mut request, format)?;
        Ok(request)
    }));

    Ok(RestCommand::new(
        endpoint.uri.clone(),
        endpoint.credentials.clone(),
        factory,
        parse_with(|ctx| Ok(ctx.head.status_code() == 200)),
    )
    .with_pre_process(expect_status(&[200, 404]))
    .with_location_mode(CommandLocationMode::PrimaryOrSecondary)
    .with_server_timeout(options.server_timeout))
}

/// One page of table names, optionally restricted to a name prefix.
///
/// A continuation token pins the request to the replica that served the
/// previous page.
pub fn list_tables_command(
    endpoint: &ServiceEndpoint,
    prefix: Option<&str>,
    take: Option<u32>,
    token: Option<&TableContinuationToken>,
    options: &TableRequestOptions,
) -> Result<RestCommand<QuerySegment<String>>, TableError> {
    if let Some(token) = token {
        token.validate_for_table_query()?;
    }
    if take == Some(0) {
        return Err(TableError::invalid_argument("take must be greater than zero"));
    }
    let format = options.effective_payload_format();
    let filter = prefix.map(prefix_filter);
    let token = token.cloned();
    let pinned = token.as_ref().and_then(|t| t.target_location);

    let factory = RequestFactory::Request(Box::new(move |ctx| {
        let mut request = TableRequest::new(Method::GET, resource_url(ctx.base_uri, TABLES));
        if let Some(filter) = &filter {
            request.append_query("$filter", filter);
        }
        if let Some(take) = take {
            request.append_query("$top", &take.to_string());
        }
        if let Some(token) = &token {
            for (key, value) in token.query_pairs() {
                request.append_query(key, value);
            }
        }
        apply_odata_headers(&mut request, format)?;
        Ok(request)
    }));

    Ok(RestCommand::new(
        endpoint.uri.clone(),
        endpoint.credentials.clone(),
        factory,
        parse_with(|ctx| read_table_segment(&ctx.head, &ctx.body)),
    )
    .with_pre_process(expect_status(&[200]))
    .with_location_mode(CommandLocationMode::PrimaryOrSecondary)
    .pinned_to(pinned)
    .with_server_timeout(options.server_timeout))
}

/// `TableName ge 'p' and TableName lt 'q'`, where `q` is `p` with its last
/// character incremented.
fn prefix_filter(prefix: &str) -> String {
    let escaped = prefix.replace('\'', "''");
    let mut upper: Vec<char> = prefix.chars().collect();
    let bumped = upper
        .pop()
        .and_then(|last| char::from_u32(last as u32 + 1))
        .map(|next| {
            upper.push(next);
            upper.into_iter().collect::<String>().replace('\'', "''")
        });
    match bumped {
        Some(upper) => format!("TableName ge '{escaped}' and TableName lt '{upper}'"),
        None => format!("TableName ge '{escaped}'"),
    }
}

/// `GET /?restype=service&comp=properties`, returned as the raw XML document.
pub fn service_properties_command(
    endpoint: &ServiceEndpoint,
    options: &TableRequestOptions,
) -> RestCommand<String> {
    let factory = RequestFactory::Request(Box::new(|ctx| {
        let mut request = TableRequest::new(Method::GET, ctx.base_uri.clone());
        request.append_query("restype", "service");
        request.append_query("comp", "properties");
        Ok(request)
    }));

    RestCommand::new(
        endpoint.uri.clone(),
        endpoint.credentials.clone(),
        factory,
        parse_with(|ctx| Ok(ctx.body.to_text())),
    )
    .with_pre_process(expect_status(&[200]))
    .with_location_mode(CommandLocationMode::PrimaryOrSecondary)
    .with_server_timeout(options.server_timeout)
}
