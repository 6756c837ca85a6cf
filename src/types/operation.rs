//! Single-entity operations and their results.

use std::sync::{Arc, Mutex};

use super::entity::DynamicTableEntity;
use crate::error::TableError;

/// Kind of a single-entity operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableOperationType {
    Insert,
    Delete,
    Replace,
    Merge,
    InsertOrReplace,
    InsertOrMerge,
    Retrieve,
}

impl TableOperationType {
    /// Whether the operation sends `If-Match` with the entity ETag.
    pub const fn is_conditional(self) -> bool {
        matches!(self, Self::Delete | Self::Replace | Self::Merge)
    }
}

/// One operation against one entity.
#[derive(Debug, Clone)]
pub struct TableOperation {
    pub operation_type: TableOperationType,
    pub entity: DynamicTableEntity,
    /// Insert only: ask the service to return the stored entity.
    pub echo_content: bool,
    /// Retrieve only: restrict the returned properties.
    pub select_columns: Option<Vec<String>>,
}

impl TableOperation {
    fn new(operation_type: TableOperationType, entity: DynamicTableEntity) -> Self {
        Self {
            operation_type,
            entity,
            echo_content: false,
            select_columns: None,
        }
    }

    pub fn insert(entity: DynamicTableEntity, echo_content: bool) -> Self {
        Self {
            echo_content,
            ..Self::new(TableOperationType::Insert, entity)
        }
    }

    pub fn insert_or_replace(entity: DynamicTableEntity) -> Self {
        Self::new(TableOperationType::InsertOrReplace, entity)
    }

    pub fn insert_or_merge(entity: DynamicTableEntity) -> Self {
        Self::new(TableOperationType::InsertOrMerge, entity)
    }

    pub fn replace(entity: DynamicTableEntity) -> Self {
        Self::new(TableOperationType::Replace, entity)
    }

    pub fn merge(entity: DynamicTableEntity) -> Self {
        Self::new(TableOperationType::Merge, entity)
    }

    pub fn delete(entity: DynamicTableEntity) -> Self {
        Self::new(TableOperationType::Delete, entity)
    }

    pub fn retrieve(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self::new(
            TableOperationType::Retrieve,
            DynamicTableEntity::new(partition_key, row_key),
        )
    }

    pub fn with_select(mut self, columns: Vec<String>) -> Self {
        self.select_columns = Some(columns);
        self
    }

    pub fn partition_key(&self) -> &str {
        &self.entity.partition_key
    }

    pub fn row_key(&self) -> &str {
        &self.entity.row_key
    }

    /// ETag used for `If-Match`. Missing ETags on conditional operations are
    /// an argument error.
    pub fn if_match(&self) -> Result<Option<&str>, TableError> {
        if !self.operation_type.is_conditional() {
            return Ok(None);
        }
        match self.entity.etag.as_deref() {
            Some(etag) if !etag.is_empty() => Ok(Some(etag)),
            _ => Err(TableError::invalid_argument(format!(
                "{:?} requires an ETag (use \"*\" for an unconditional write)",
                self.operation_type
            ))),
        }
    }

    /// Validate the operation before a request is built.
    pub fn validate(&self) -> Result<(), TableError> {
        self.entity.validate_keys()?;
        self.if_match()?;
        Ok(())
    }
}

/// Result of one entity operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableResult {
    pub http_status_code: u16,
    pub etag: Option<String>,
    /// Parsed entity; `None` for no-content writes and not-found retrieves.
    pub result: Option<DynamicTableEntity>,
}

/// Ordered results of a batch, aligned 1:1 with the batch's operations.
pub type TableBatchResult = Vec<TableResult>;

/// Batch results accumulated while a response is parsed.
///
/// Shared between the response parser and the recovery hook so a failed
/// attempt's partial results are dropped before the next attempt.
#[derive(Debug, Clone, Default)]
pub struct BatchResultSink {
    inner: Arc<Mutex<TableBatchResult>>,
}

impl BatchResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: TableResult) {
        self.lock().push(result);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take(&self) -> TableBatchResult {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TableBatchResult> {
        // A poisoned sink only ever holds partial results; recover the data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
