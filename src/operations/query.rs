//! Entity queries.

use reqwest::Method;
use std::sync::Arc;

use super::{ServiceEndpoint, parse_with, resource_url, validate_table_name};
use crate::error::TableError;
use crate::execution::command::{RequestFactory, RestCommand, TableRequest, expect_status};
use crate::protocol::headers::apply_odata_headers;
use crate::protocol::query::{QuerySegment, read_entity_segment};
use crate::types::{
    CommandLocationMode, DynamicTableEntity, EntitySchema, TableContinuationToken,
    TableRequestOptions,
};

/// Largest page the service returns.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// `$filter`, `$top` and `$select` of an entity query.
///
/// The filter is an OData expression passed through verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableQuery {
    pub filter: Option<String>,
    /// Total number of entities wanted across all pages.
    pub take: Option<u32>,
    pub select: Option<Vec<String>>,
}

impl TableQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn take(mut self, take: u32) -> Self {
        self.take = Some(take);
        self
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Page size requested from the service: `take`, capped at one full page.
    pub fn page_size(&self) -> Option<u32> {
        self.take.map(|take| take.min(MAX_PAGE_SIZE))
    }

    fn validate(&self) -> Result<(), TableError> {
        if self.take == Some(0) {
            return Err(TableError::invalid_argument("take must be greater than zero"));
        }
        Ok(())
    }
}

/// One page of `query` against `table`, resuming from `token` when given.
pub fn query_segment_command(
    endpoint: &ServiceEndpoint,
    table: &str,
    query: &TableQuery,
    token: Option<&TableContinuationToken>,
    options: &TableRequestOptions,
    schema: Option<Arc<EntitySchema>>,
) -> Result<RestCommand<QuerySegment<DynamicTableEntity>>, TableError> {
    validate_table_name(table)?;
    query.validate()?;
    if let Some(token) = token {
        token.validate_for_entity_query()?;
    }

    let format = options.effective_payload_format();
    let path = format!("{table}()");
    let query = query.clone();
    let token = token.cloned();
    let pinned = token.as_ref().and_then(|t| t.target_location);

    let factory = RequestFactory::Request(Box::new(move |ctx| {
        let mut request = TableRequest::new(Method::GET, resource_url(ctx.base_uri, &path));
        if let Some(filter) = &query.filter {
            request.append_query("$filter", filter);
        }
        if let Some(top) = query.page_size() {
            request.append_query("$top", &top.to_string());
        }
        if let Some(columns) = &query.select {
            request.append_query("$select", &columns.join(","));
        }
        if let Some(token) = &token {
            for (key, value) in token.query_pairs() {
                request.append_query(key, value);
            }
        }
        apply_odata_headers(&mut request, format)?;
        Ok(request)
    }));

    let post = parse_with(move |ctx| read_entity_segment(&ctx.head, &ctx.body, schema.as_deref()));
    Ok(
        RestCommand::new(endpoint.uri.clone(), endpoint.credentials.clone(), factory, post)
            .with_pre_process(expect_status(&[200]))
            .with_location_mode(CommandLocationMode::PrimaryOrSecondary)
            .pinned_to(pinned)
            .with_server_timeout(options.server_timeout),
    )
}
