//! Core data types.

pub mod continuation;
pub mod entity;
pub mod http;
pub mod location;
pub mod operation;
pub mod options;
pub mod request_result;
pub mod schema;

pub use continuation::TableContinuationToken;
pub use entity::{DynamicTableEntity, EdmType, EntityProperty, validate_key};
pub use http::{HttpConfig, HttpConfigBuilder};
pub use location::{
    CommandLocationMode, LocationMode, StorageLocation, StorageUri, resolve_location_mode,
};
pub use operation::{
    BatchResultSink, TableBatchResult, TableOperation, TableOperationType, TableResult,
};
pub use options::{OperationContext, PayloadFormat, TableRequestOptions};
pub use request_result::{ExtendedErrorInformation, RequestResult};
pub use schema::{EntitySchema, SchemaCache, TableEntity};
