//! tablebridge
//!
//! Table Storage compatible client built around a retrying REST execution engine:
//! command descriptors, per-call execution state, pluggable retry policies,
//! shared-key request signing and OData/multipart response parsing.
#![deny(unsafe_code)]

pub mod auth;
pub mod client;
pub mod config;
pub mod defaults;
pub mod error;
pub mod execution;
pub mod observability;
pub mod operations;
pub mod protocol;
pub mod retry;
pub mod types;
pub mod utils;

pub use client::{CallContext, CloudTable, TableServiceClient};
pub use config::{BackendKind, TableClientConfig};
pub use error::TableError;
pub use execution::{Executor, RestCommand};
pub use operations::{TableBatchOperation, TableQuery};
pub use types::{
    DynamicTableEntity, EdmType, EntityProperty, LocationMode, OperationContext, RequestResult,
    StorageLocation, TableContinuationToken, TableOperation, TableRequestOptions, TableResult,
};
pub use utils::CancelHandle;
