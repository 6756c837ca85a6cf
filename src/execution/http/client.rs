//! HTTP client construction.

use once_cell::sync::Lazy;

use crate::error::TableError;
use crate::types::HttpConfig;

/// Build a `reqwest::Client` from `HttpConfig`.
///
/// # Example
/// ```rust,no_run
/// use tablebridge::types::HttpConfig;
/// use tablebridge::execution::http::client::build_http_client;
///
/// let client = build_http_client(&HttpConfig::default())?;
/// # Ok::<(), tablebridge::TableError>(())
/// ```
pub fn build_http_client(config: &HttpConfig) -> Result<reqwest::Client, TableError> {
    let mut builder = reqwest::Client::builder();

    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(connect_timeout) = config.connect_timeout {
        builder = builder.connect_timeout(connect_timeout);
    }

    if let Some(proxy_url) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| TableError::Configuration(format!("Invalid proxy URL: {e}")))?;
        builder = builder.proxy(proxy);
    }

    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent);
    }

    if !config.headers.is_empty() {
        let mut headers = reqwest::header::HeaderMap::new();
        for (k, v) in &config.headers {
            let name = reqwest::header::HeaderName::from_bytes(k.as_bytes()).map_err(|e| {
                TableError::Configuration(format!("Invalid header name '{k}': {e}"))
            })?;
            let value = reqwest::header::HeaderValue::from_str(v).map_err(|e| {
                TableError::Configuration(format!("Invalid header value for '{k}': {e}"))
            })?;
            headers.insert(name, value);
        }
        builder = builder.default_headers(headers);
    }

    builder
        .build()
        .map_err(|e| TableError::Configuration(format!("Failed to create HTTP client: {e}")))
}

static DEFAULT_CLIENT: Lazy<Result<reqwest::Client, TableError>> =
    Lazy::new(|| build_http_client(&HttpConfig::default()));

/// Process-wide client built from the default `HttpConfig` on first use.
///
/// `reqwest::Client` is a pooled handle, so the returned clone shares
/// connections with every other caller.
pub fn default_http_client() -> Result<reqwest::Client, TableError> {
    (*DEFAULT_CLIENT).clone()
}
