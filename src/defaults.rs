//! Default values shared across the crate.

/// HTTP client defaults.
pub mod http {
    use std::time::Duration;

    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &str = concat!("tablebridge/", env!("CARGO_PKG_VERSION"));
}

/// Execution engine limits.
pub mod execution {
    use std::time::Duration;

    /// Upper bound applied to every backoff a retry policy asks for.
    pub const MAXIMUM_RETRY_BACKOFF: Duration = Duration::from_secs(60 * 60);

    /// Size of a single block in the buffered response body.
    pub const BUFFER_BLOCK_SIZE: usize = 64 * 1024;

    /// How long a body copy or post-processing step may make no progress
    /// before the response is torn down.
    pub const BODY_STALL_GRACE: Duration = Duration::from_secs(120);
}

/// Retry policy defaults.
pub mod retry {
    use std::time::Duration;

    pub const MAX_ATTEMPTS: u32 = 3;
    pub const LINEAR_DELTA_BACKOFF: Duration = Duration::from_secs(30);
    pub const EXPONENTIAL_DELTA_BACKOFF: Duration = Duration::from_secs(4);
    pub const EXPONENTIAL_MAX_BACKOFF: Duration = Duration::from_secs(120);
    pub const EXPONENTIAL_MIN_BACKOFF: Duration = Duration::from_secs(3);
}

/// Wire protocol constants.
pub mod protocol {
    pub const STORAGE_VERSION: &str = "2017-04-17";
    pub const DATA_SERVICE_VERSION: &str = "3.0;NetFx";
    pub const MAX_DATA_SERVICE_VERSION: &str = "3.0;NetFx";

    pub const HEADER_MS_DATE: &str = "x-ms-date";
    pub const HEADER_MS_VERSION: &str = "x-ms-version";
    pub const HEADER_CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";
    pub const HEADER_REQUEST_ID: &str = "x-ms-request-id";
    pub const HEADER_DATA_SERVICE_VERSION: &str = "DataServiceVersion";
    pub const HEADER_MAX_DATA_SERVICE_VERSION: &str = "MaxDataServiceVersion";
    pub const HEADER_PREFER: &str = "Prefer";
    pub const HEADER_HTTP_METHOD: &str = "X-HTTP-Method";

    pub const HEADER_NEXT_PARTITION_KEY: &str = "x-ms-continuation-NextPartitionKey";
    pub const HEADER_NEXT_ROW_KEY: &str = "x-ms-continuation-NextRowKey";
    pub const HEADER_NEXT_TABLE_NAME: &str = "x-ms-continuation-NextTableName";

    pub const QUERY_NEXT_PARTITION_KEY: &str = "NextPartitionKey";
    pub const QUERY_NEXT_ROW_KEY: &str = "NextRowKey";
    pub const QUERY_NEXT_TABLE_NAME: &str = "NextTableName";

    pub const PREFER_RETURN_CONTENT: &str = "return-content";
    pub const PREFER_RETURN_NO_CONTENT: &str = "return-no-content";

    pub const ACCEPT_NO_METADATA: &str = "application/json;odata=nometadata";
    pub const ACCEPT_MINIMAL_METADATA: &str = "application/json;odata=minimalmetadata";
    pub const ACCEPT_FULL_METADATA: &str = "application/json;odata=fullmetadata";

    pub const SECONDARY_LOCATION_SUFFIX: &str = "-secondary";

    /// Maximum operations accepted in one batch.
    pub const MAX_BATCH_OPERATIONS: usize = 100;
    /// Maximum length (in characters) of a partition or row key.
    pub const MAX_KEY_LENGTH: usize = 1024;
}
