//! Client facade.
//!
//! [`TableServiceClient`] owns the endpoint, credentials, HTTP client and
//! defaults; [`CloudTable`] is a cheap per-table handle. Every operation has
//! an async entry point and a blocking `_sync` twin that runs the same
//! command on its own runtime.

use futures::stream::BoxStream;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::auth::StorageCredentials;
use crate::config::{BackendKind, TableClientConfig};
use crate::error::TableError;
use crate::execution::command::RestCommand;
use crate::execution::http::{HttpInterceptor, build_http_client, default_http_client};
use crate::execution::Executor;
use crate::operations::{
    ServiceEndpoint, TableBatchOperation, TableQuery, batch_command, create_table_command,
    delete_table_command, entity_command, list_tables_command, query_segment_command,
    service_properties_command, table_exists_command, validate_table_name,
};
use crate::protocol::query::QuerySegment;
use crate::types::{
    DynamicTableEntity, OperationContext, SchemaCache, StorageUri, TableBatchResult,
    TableContinuationToken, TableEntity, TableOperation, TableRequestOptions, TableResult,
};
use crate::utils::CancelHandle;

/// Per-call options, diagnostics and cancellation.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Overrides for this call; unset fields use the client defaults.
    pub options: TableRequestOptions,
    /// Receives one `RequestResult` per attempt.
    pub operation_context: OperationContext,
    pub cancel: CancelHandle,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: TableRequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_operation_context(mut self, operation_context: OperationContext) -> Self {
        self.operation_context = operation_context;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Account-level client.
#[derive(Debug, Clone)]
pub struct TableServiceClient {
    endpoint: ServiceEndpoint,
    executor: Executor,
    default_options: TableRequestOptions,
    backend: BackendKind,
    schemas: SchemaCache,
}

impl TableServiceClient {
    /// Client on the process-wide default HTTP client.
    pub fn new(uri: StorageUri, credentials: StorageCredentials) -> Result<Self, TableError> {
        credentials.validate()?;
        Ok(Self::with_http_client(uri, credentials, default_http_client()?))
    }

    pub fn with_http_client(
        uri: StorageUri,
        credentials: StorageCredentials,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            endpoint: ServiceEndpoint::new(uri, Arc::new(credentials)),
            executor: Executor::new(http_client),
            default_options: TableRequestOptions::default(),
            backend: BackendKind::default(),
            schemas: SchemaCache::default(),
        }
    }

    pub fn from_config(config: &TableClientConfig) -> Result<Self, TableError> {
        let http_client = build_http_client(&config.http)?;
        Ok(
            Self::with_http_client(config.storage_uri()?, config.credentials()?, http_client)
                .with_backend(config.backend)
                .with_default_options(config.default_options.clone()),
        )
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn HttpInterceptor>) -> Self {
        self.executor = self.executor.with_interceptor(interceptor);
        self
    }

    pub fn with_default_options(mut self, options: TableRequestOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_schema_cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.schemas = SchemaCache::new(capacity);
        self
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    pub fn default_options(&self) -> &TableRequestOptions {
        &self.default_options
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schemas
    }

    /// Handle on one table. No request is made.
    pub fn table(&self, name: impl Into<String>) -> Result<CloudTable, TableError> {
        let name = name.into();
        validate_table_name(&name)?;
        Ok(CloudTable {
            name,
            service: self.clone(),
        })
    }

    fn options(&self, call: &CallContext) -> TableRequestOptions {
        call.options.clone().apply_defaults(&self.default_options)
    }

    async fn run<R>(
        &self,
        cmd: RestCommand<R>,
        options: &TableRequestOptions,
        call: &mut CallContext,
    ) -> Result<R, TableError>
    where
        R: Send + 'static,
    {
        self.executor
            .execute(&cmd, options, &mut call.operation_context, call.cancel.token())
            .await
    }

    fn run_sync<R>(
        &self,
        cmd: RestCommand<R>,
        options: &TableRequestOptions,
        call: &mut CallContext,
    ) -> Result<R, TableError>
    where
        R: Send + 'static,
    {
        self.executor
            .execute_sync(&cmd, options, &mut call.operation_context, call.cancel.token())
    }

    /// One page of table names.
    pub async fn list_tables_segmented(
        &self,
        prefix: Option<&str>,
        take: Option<u32>,
        token: Option<&TableContinuationToken>,
        call: &mut CallContext,
    ) -> Result<QuerySegment<String>, TableError> {
        let options = self.options(call);
        let cmd = list_tables_command(&self.endpoint, prefix, take, token, &options)?;
        self.run(cmd, &options, call).await
    }

    pub fn list_tables_segmented_sync(
        &self,
        prefix: Option<&str>,
        take: Option<u32>,
        token: Option<&TableContinuationToken>,
        call: &mut CallContext,
    ) -> Result<QuerySegment<String>, TableError> {
        let options = self.options(call);
        let cmd = list_tables_command(&self.endpoint, prefix, take, token, &options)?;
        self.run_sync(cmd, &options, call)
    }

    /// All table names, fetched page by page as the stream is polled.
    pub fn list_tables(
        &self,
        prefix: Option<String>,
        mut call: CallContext,
    ) -> BoxStream<'static, Result<String, TableError>> {
        let client = self.clone();
        Box::pin(async_stream::stream! {
            let mut token: Option<TableContinuationToken> = None;
            loop {
                let segment = match client
                    .list_tables_segmented(prefix.as_deref(), None, token.as_ref(), &mut call)
                    .await
                {
                    Ok(segment) => segment,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                };
                for name in segment.results {
                    yield Ok(name);
                }
                match segment.continuation_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
        })
    }

    fn service_properties(
        &self,
        call: &CallContext,
    ) -> Result<(RestCommand<String>, TableRequestOptions), TableError> {
        if self.backend == BackendKind::Document {
            return Err(TableError::UnsupportedOperation(
                "service properties are not available on the document backend".into(),
            ));
        }
        let options = self.options(call);
        Ok((service_properties_command(&self.endpoint, &options), options))
    }

    /// The service-properties XML document.
    pub async fn get_service_properties(&self, call: &mut CallContext) -> Result<String, TableError> {
        let (cmd, options) = self.service_properties(call)?;
        self.run(cmd, &options, call).await
    }

    pub fn get_service_properties_sync(&self, call: &mut CallContext) -> Result<String, TableError> {
        let (cmd, options) = self.service_properties(call)?;
        self.run_sync(cmd, &options, call)
    }
}

/// Handle on a single table.
#[derive(Debug, Clone)]
pub struct CloudTable {
    name: String,
    service: TableServiceClient,
}

impl CloudTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_client(&self) -> &TableServiceClient {
        &self.service
    }

    pub async fn create(&self, call: &mut CallContext) -> Result<TableResult, TableError> {
        let options = self.service.options(call);
        let cmd = create_table_command(&self.service.endpoint, &self.name, &options)?;
        self.service.run(cmd, &options, call).await
    }

    pub fn create_sync(&self, call: &mut CallContext) -> Result<TableResult, TableError> {
        let options = self.service.options(call);
        let cmd = create_table_command(&self.service.endpoint, &self.name, &options)?;
        self.service.run_sync(cmd, &options, call)
    }

    /// `true` when the table was created, `false` when it already existed.
    pub async fn create_if_not_exists(&self, call: &mut CallContext) -> Result<bool, TableError> {
        unless_status(self.create(call).await, 409)
    }

    pub fn create_if_not_exists_sync(&self, call: &mut CallContext) -> Result<bool, TableError> {
        unless_status(self.create_sync(call), 409)
    }

    pub async fn delete(&self, call: &mut CallContext) -> Result<TableResult, TableError> {
        let options = self.service.options(call);
        let cmd = delete_table_command(&self.service.endpoint, &self.name, &options)?;
        self.service.run(cmd, &options, call).await
    }

    pub fn delete_sync(&self, call: &mut CallContext) -> Result<TableResult, TableError> {
        let options = self.service.options(call);
        let cmd = delete_table_command(&self.service.endpoint, &self.name, &options)?;
        self.service.run_sync(cmd, &options, call)
    }

    /// `true` when the table was deleted, `false` when it did not exist.
    pub async fn delete_if_exists(&self, call: &mut CallContext) -> Result<bool, TableError> {
        unless_status(self.delete(call).await, 404)
    }

    pub fn delete_if_exists_sync(&self, call: &mut CallContext) -> Result<bool, TableError> {
        unless_status(self.delete_sync(call), 404)
    }

    pub async fn exists(&self, call: &mut CallContext) -> Result<bool, TableError> {
        let options = self.service.options(call);
        let cmd = table_exists_command(&self.service.endpoint, &self.name, &options)?;
        self.service.run(cmd, &options, call).await
    }

    pub fn exists_sync(&self, call: &mut CallContext) -> Result<bool, TableError> {
        let options = self.service.options(call);
        let cmd = table_exists_command(&self.service.endpoint, &self.name, &options)?;
        self.service.run_sync(cmd, &options, call)
    }

    /// Run one entity operation.
    ///
    /// A retrieve of a missing entity is a 404 result with no entity, not an error.
    pub async fn execute(
        &self,
        op: TableOperation,
        call: &mut CallContext,
    ) -> Result<TableResult, TableError> {
        let options = self.service.options(call);
        let cmd = entity_command(&self.service.endpoint, &self.name, op, &options, None)?;
        self.service.run(cmd, &options, call).await
    }

    pub fn execute_sync(
        &self,
        op: TableOperation,
        call: &mut CallContext,
    ) -> Result<TableResult, TableError> {
        let options = self.service.options(call);
        let cmd = entity_command(&self.service.endpoint, &self.name, op, &options, None)?;
        self.service.run_sync(cmd, &options, call)
    }

    /// Insert, echoing the stored entity when the options ask for it.
    pub async fn insert(
        &self,
        entity: DynamicTableEntity,
        call: &mut CallContext,
    ) -> Result<TableResult, TableError> {
        let echo = self.service.options(call).echo_content.unwrap_or(false);
        self.execute(TableOperation::insert(entity, echo), call).await
    }

    pub fn insert_sync(
        &self,
        entity: DynamicTableEntity,
        call: &mut CallContext,
    ) -> Result<TableResult, TableError> {
        let echo = self.service.options(call).echo_content.unwrap_or(false);
        self.execute_sync(TableOperation::insert(entity, echo), call)
    }

    fn typed_retrieve_command<E: TableEntity>(
        &self,
        partition_key: &str,
        row_key: &str,
        options: &TableRequestOptions,
    ) -> Result<RestCommand<TableResult>, TableError> {
        let schema = self
            .service
            .schemas
            .schema_for::<E>(options.effective_schema_caching());
        let op = TableOperation::retrieve(partition_key, row_key);
        entity_command(&self.service.endpoint, &self.name, op, options, Some(schema))
    }

    /// Retrieve and map a typed entity, resolving property types from its schema.
    pub async fn retrieve<E: TableEntity>(
        &self,
        partition_key: &str,
        row_key: &str,
        call: &mut CallContext,
    ) -> Result<Option<E>, TableError> {
        let options = self.service.options(call);
        let cmd = self.typed_retrieve_command::<E>(partition_key, row_key, &options)?;
        let result = self.service.run(cmd, &options, call).await?;
        result.result.map(E::from_entity).transpose()
    }

    pub fn retrieve_sync<E: TableEntity>(
        &self,
        partition_key: &str,
        row_key: &str,
        call: &mut CallContext,
    ) -> Result<Option<E>, TableError> {
        let options = self.service.options(call);
        let cmd = self.typed_retrieve_command::<E>(partition_key, row_key, &options)?;
        let result = self.service.run_sync(cmd, &options, call)?;
        result.result.map(E::from_entity).transpose()
    }

    pub async fn execute_batch(
        &self,
        batch: &TableBatchOperation,
        call: &mut CallContext,
    ) -> Result<TableBatchResult, TableError> {
        let options = self.service.options(call);
        let cmd = batch_command(&self.service.endpoint, &self.name, batch, &options, None)?;
        self.service.run(cmd, &options, call).await
    }

    pub fn execute_batch_sync(
        &self,
        batch: &TableBatchOperation,
        call: &mut CallContext,
    ) -> Result<TableBatchResult, TableError> {
        let options = self.service.options(call);
        let cmd = batch_command(&self.service.endpoint, &self.name, batch, &options, None)?;
        self.service.run_sync(cmd, &options, call)
    }

    /// One page of entities. Pass the previous page's token to continue.
    pub async fn execute_query_segmented(
        &self,
        query: &TableQuery,
        token: Option<&TableContinuationToken>,
        call: &mut CallContext,
    ) -> Result<QuerySegment<DynamicTableEntity>, TableError> {
        let options = self.service.options(call);
        let cmd =
            query_segment_command(&self.service.endpoint, &self.name, query, token, &options, None)?;
        self.service.run(cmd, &options, call).await
    }

    pub fn execute_query_segmented_sync(
        &self,
        query: &TableQuery,
        token: Option<&TableContinuationToken>,
        call: &mut CallContext,
    ) -> Result<QuerySegment<DynamicTableEntity>, TableError> {
        let options = self.service.options(call);
        let cmd =
            query_segment_command(&self.service.endpoint, &self.name, query, token, &options, None)?;
        self.service.run_sync(cmd, &options, call)
    }

    fn typed_query_command<E: TableEntity>(
        &self,
        query: &TableQuery,
        token: Option<&TableContinuationToken>,
        options: &TableRequestOptions,
    ) -> Result<RestCommand<QuerySegment<DynamicTableEntity>>, TableError> {
        let schema = self
            .service
            .schemas
            .schema_for::<E>(options.effective_schema_caching());
        query_segment_command(&self.service.endpoint, &self.name, query, token, options, Some(schema))
    }

    /// One page of typed entities.
    pub async fn query_segmented<E: TableEntity>(
        &self,
        query: &TableQuery,
        token: Option<&TableContinuationToken>,
        call: &mut CallContext,
    ) -> Result<QuerySegment<E>, TableError> {
        let options = self.service.options(call);
        let cmd = self.typed_query_command::<E>(query, token, &options)?;
        typed_segment(self.service.run(cmd, &options, call).await?)
    }

    pub fn query_segmented_sync<E: TableEntity>(
        &self,
        query: &TableQuery,
        token: Option<&TableContinuationToken>,
        call: &mut CallContext,
    ) -> Result<QuerySegment<E>, TableError> {
        let options = self.service.options(call);
        let cmd = self.typed_query_command::<E>(query, token, &options)?;
        typed_segment(self.service.run_sync(cmd, &options, call)?)
    }

    /// Every entity matching `query`, fetched page by page.
    ///
    /// `query.take` bounds the total number of entities yielded.
    pub fn execute_query(
        &self,
        query: TableQuery,
        mut call: CallContext,
    ) -> BoxStream<'static, Result<DynamicTableEntity, TableError>> {
        let table = self.clone();
        Box::pin(async_stream::stream! {
            let mut remaining = query.take.map(|t| t as usize);
            let mut token: Option<TableContinuationToken> = None;
            loop {
                let page = match remaining {
                    Some(left) => query.clone().take(left.min(u32::MAX as usize) as u32),
                    None => query.clone(),
                };
                let segment = match table
                    .execute_query_segmented(&page, token.as_ref(), &mut call)
                    .await
                {
                    Ok(segment) => segment,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                };
                for entity in segment.results {
                    if remaining == Some(0) {
                        break;
                    }
                    if let Some(left) = remaining.as_mut() {
                        *left -= 1;
                    }
                    yield Ok(entity);
                }
                match segment.continuation_token {
                    Some(next) if remaining != Some(0) => token = Some(next),
                    _ => break,
                }
            }
        })
    }
}

/// Folds the one status that means "already so" into `false`.
fn unless_status(result: Result<TableResult, TableError>, status: u16) -> Result<bool, TableError> {
    match result {
        Ok(_) => Ok(true),
        Err(err) if err.status_code() == Some(status) => Ok(false),
        Err(err) => Err(err),
    }
}

fn typed_segment<E: TableEntity>(
    segment: QuerySegment<DynamicTableEntity>,
) -> Result<QuerySegment<E>, TableError> {
    Ok(QuerySegment {
        results: segment
            .results
            .into_iter()
            .map(E::from_entity)
            .collect::<Result<_, _>>()?,
        continuation_token: segment.continuation_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(backend: BackendKind) -> TableServiceClient {
        TableServiceClient::with_http_client(
            StorageUri::with_derived_secondary("https://acct.table.core.windows.net").unwrap(),
            StorageCredentials::Anonymous,
            reqwest::Client::new(),
        )
        .with_backend(backend)
    }

    #[tokio::test]
    async fn document_backend_has_no_service_properties() {
        let mut call = CallContext::new();
        let err = client(BackendKind::Document)
            .get_service_properties(&mut call)
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::UnsupportedOperation(_)));
        assert!(!err.is_retryable());
        assert!(call.operation_context.request_results.is_empty());
    }

    #[test]
    fn table_names_are_checked_up_front() {
        let client = client(BackendKind::Rest);
        assert!(client.table("people").is_ok());
        assert!(client.table("a-b").is_err());
    }

    #[test]
    fn call_options_override_client_defaults() {
        let client = client(BackendKind::Rest).with_default_options(
            TableRequestOptions::new()
                .with_echo_content(true)
                .with_merge_tunneling(true),
        );
        let call = CallContext::new().with_options(TableRequestOptions::new().with_echo_content(false));
        let options = client.options(&call);
        assert_eq!(options.echo_content, Some(false));
        assert_eq!(options.use_merge_tunneling, Some(true));
    }
}
