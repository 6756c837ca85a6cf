//! Command generators.
//!
//! Each function turns one table operation into a [`RestCommand`] the
//! executor can run: the request builder, the accepted statuses and the
//! response parser. Nothing here performs I/O.

pub mod batch;
pub mod entity;
pub mod query;
pub mod table;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use std::sync::Arc;

use crate::auth::StorageCredentials;
use crate::error::TableError;
use crate::execution::command::{PostProcessFn, ResponseContext};
use crate::types::StorageUri;

pub use batch::{TableBatchOperation, batch_command};
pub use entity::entity_command;
pub use query::{TableQuery, query_segment_command};
pub use table::{
    create_table_command, delete_table_command, list_tables_command, service_properties_command,
    table_exists_command,
};

/// Service root and the credentials used to reach it.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub uri: StorageUri,
    pub credentials: Arc<StorageCredentials>,
}

impl ServiceEndpoint {
    pub fn new(uri: StorageUri, credentials: Arc<StorageCredentials>) -> Self {
        Self { uri, credentials }
    }
}

static TABLE_NAME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]{2,62}$").ok());

/// Table names are 3 to 63 alphanumeric characters starting with a letter.
pub fn validate_table_name(name: &str) -> Result<(), TableError> {
    let valid = TABLE_NAME.as_ref().is_some_and(|re| re.is_match(name));
    if valid {
        Ok(())
    } else {
        Err(TableError::invalid_argument(format!(
            "invalid table name '{name}': 3-63 alphanumeric characters, starting with a letter"
        )))
    }
}

/// Append `relative` to the path of `base`, keeping its query string.
pub(crate) fn resource_url(base: &Url, relative: &str) -> Url {
    let mut url = base.clone();
    let path = format!("{}/{}", base.path().trim_end_matches('/'), relative);
    url.set_path(&path);
    url
}

/// Post-processor around a synchronous parser.
pub(crate) fn parse_with<R, F>(parse: F) -> PostProcessFn<R>
where
    R: Send + 'static,
    F: Fn(ResponseContext) -> Result<R, TableError> + Send + Sync + 'static,
{
    Box::new(move |ctx| Box::pin(futures::future::ready(parse(ctx))))
}
