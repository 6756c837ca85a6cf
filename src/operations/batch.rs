//! Entity group transactions.

use bytes::Bytes;
use reqwest::Method;
use std::collections::HashSet;
use std::sync::Arc;

use super::entity::{entity_request_parts, has_body};
use super::{ServiceEndpoint, parse_with, resource_url, validate_table_name};
use crate::defaults::protocol::MAX_BATCH_OPERATIONS;
use crate::error::TableError;
use crate::execution::command::{RequestFactory, RestCommand, TableRequest, expect_status};
use crate::protocol::batch::{BatchPart, apply_batch_response, read_sub_responses, write_batch};
use crate::protocol::entity_json::write_entity_bytes;
use crate::protocol::headers::apply_odata_headers;
use crate::types::{
    BatchResultSink, CommandLocationMode, DynamicTableEntity, EntitySchema, TableBatchResult,
    TableOperation, TableOperationType, TableRequestOptions,
};

/// Up to 100 operations on one partition, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct TableBatchOperation {
    operations: Vec<TableOperation>,
    row_keys: HashSet<String>,
}

impl TableBatchOperation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation, enforcing the batch rules as it goes.
    pub fn add(&mut self, op: TableOperation) -> Result<(), TableError> {
        op.validate()?;
        if self.operations.len() >= MAX_BATCH_OPERATIONS {
            return Err(TableError::invalid_argument(format!(
                "a batch holds at most {MAX_BATCH_OPERATIONS} operations"
            )));
        }
        let is_retrieve = op.operation_type == TableOperationType::Retrieve;
        if let Some(first) = self.operations.first() {
            if is_retrieve || first.operation_type == TableOperationType::Retrieve {
                return Err(TableError::invalid_argument(
                    "a retrieve must be the only operation in a batch",
                ));
            }
            if first.partition_key() != op.partition_key() {
                return Err(TableError::invalid_argument(
                    "all operations in a batch must share one partition key",
                ));
            }
        }
        if self.row_keys.contains(op.row_key()) {
            return Err(TableError::invalid_argument(format!(
                "row key '{}' appears twice in the batch",
                op.row_key()
            )));
        }
        self.row_keys.insert(op.row_key().to_string());
        self.operations.push(op);
        Ok(())
    }

    pub fn insert(&mut self, entity: DynamicTableEntity, echo_content: bool) -> Result<(), TableError> {
        self.add(TableOperation::insert(entity, echo_content))
    }

    pub fn insert_or_replace(&mut self, entity: DynamicTableEntity) -> Result<(), TableError> {
        self.add(TableOperation::insert_or_replace(entity))
    }

    pub fn insert_or_merge(&mut self, entity: DynamicTableEntity) -> Result<(), TableError> {
        self.add(TableOperation::insert_or_merge(entity))
    }

    pub fn replace(&mut self, entity: DynamicTableEntity) -> Result<(), TableError> {
        self.add(TableOperation::replace(entity))
    }

    pub fn merge(&mut self, entity: DynamicTableEntity) -> Result<(), TableError> {
        self.add(TableOperation::merge(entity))
    }

    pub fn delete(&mut self, entity: DynamicTableEntity) -> Result<(), TableError> {
        self.add(TableOperation::delete(entity))
    }

    pub fn retrieve(&mut self, partition_key: &str, row_key: &str) -> Result<(), TableError> {
        self.add(TableOperation::retrieve(partition_key, row_key))
    }

    pub fn operations(&self) -> &[TableOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn is_single_retrieve(&self) -> bool {
        matches!(self.operations.as_slice(), [op] if op.operation_type == TableOperationType::Retrieve)
    }
}

/// Command posting `batch` to `$batch`.
///
/// Results accumulate in a sink that the recovery hook empties before every
/// retry, so a retried batch never returns results of an earlier attempt.
pub fn batch_command(
    endpoint: &ServiceEndpoint,
    table: &str,
    batch: &TableBatchOperation,
    options: &TableRequestOptions,
    schema: Option<Arc<EntitySchema>>,
) -> Result<RestCommand<TableBatchResult>, TableError> {
    validate_table_name(table)?;
    if batch.is_empty() {
        return Err(TableError::invalid_argument("cannot execute an empty batch"));
    }

    let format = options.effective_payload_format();
    let tunneling = options.use_merge_tunneling.unwrap_or(false);
    let location_mode = if batch.is_single_retrieve() {
        CommandLocationMode::PrimaryOrSecondary
    } else {
        CommandLocationMode::PrimaryOnly
    };
    let operations: Arc<[TableOperation]> = batch.operations.clone().into();
    let bodies: Arc<[Option<Bytes>]> = operations
        .iter()
        .map(|op| {
            has_body(op.operation_type)
                .then(|| write_entity_bytes(&op.entity).map(Bytes::from))
                .transpose()
        })
        .collect::<Result<Vec<_>, TableError>>()?
        .into();
    let table: Arc<str> = Arc::from(table);

    let factory = {
        let operations = operations.clone();
        RequestFactory::Request(Box::new(move |ctx| {
            let mut part_base = ctx.base_uri.clone();
            part_base.set_query(None);
            let parts = operations
                .iter()
                .zip(bodies.iter())
                .map(|(op, body)| {
                    let shape = entity_request_parts(op, &table, &part_base, format, tunneling)?;
                    Ok(BatchPart {
                        method: shape.method,
                        url: shape.url,
                        headers: shape.headers,
                        body: body.as_ref().map(|b| b.to_vec()),
                    })
                })
                .collect::<Result<Vec<_>, TableError>>()?;
            let payload = write_batch(&parts)?;

            let mut request = TableRequest::new(Method::POST, resource_url(ctx.base_uri, "$batch"))
                .with_header("Content-Type", &payload.content_type)?
                .with_body(payload.body);
            apply_odata_headers(&mut request, format)?;
            Ok(request)
        }))
    };

    let sink = BatchResultSink::new();
    let post = {
        let sink = sink.clone();
        parse_with(move |ctx| {
            let responses = read_sub_responses(&ctx.body)?;
            apply_batch_response(&operations, responses, schema.as_deref(), &sink)?;
            Ok(sink.take())
        })
    };

    Ok(
        RestCommand::new(endpoint.uri.clone(), endpoint.credentials.clone(), factory, post)
            .with_pre_process(expect_status(&[202]))
            .with_recovery(Box::new(move || sink.clear()))
            .with_location_mode(location_mode)
            .with_server_timeout(options.server_timeout),
    )
}
