//! Client configuration.
//!
//! A [`TableClientConfig`] is assembled once, through its builder or from
//! `TABLEBRIDGE_*` environment variables, and turned into a
//! [`crate::TableServiceClient`].

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::auth::StorageCredentials;
use crate::error::TableError;
use crate::types::{HttpConfig, LocationMode, StorageUri, TableRequestOptions};

pub const ENV_ACCOUNT_NAME: &str = "TABLEBRIDGE_ACCOUNT_NAME";
pub const ENV_ACCOUNT_KEY: &str = "TABLEBRIDGE_ACCOUNT_KEY";
pub const ENV_SAS_TOKEN: &str = "TABLEBRIDGE_SAS_TOKEN";
pub const ENV_ENDPOINT: &str = "TABLEBRIDGE_ENDPOINT";
pub const ENV_SECONDARY_ENDPOINT: &str = "TABLEBRIDGE_SECONDARY_ENDPOINT";
pub const ENV_BACKEND: &str = "TABLEBRIDGE_BACKEND";
pub const ENV_TIMEOUT_SECS: &str = "TABLEBRIDGE_TIMEOUT_SECS";
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "TABLEBRIDGE_CONNECT_TIMEOUT_SECS";
pub const ENV_SERVER_TIMEOUT_SECS: &str = "TABLEBRIDGE_SERVER_TIMEOUT_SECS";
pub const ENV_MAX_EXECUTION_SECS: &str = "TABLEBRIDGE_MAX_EXECUTION_SECS";
pub const ENV_LOCATION_MODE: &str = "TABLEBRIDGE_LOCATION_MODE";

/// Which service family sits behind the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Table service REST API.
    #[default]
    Rest,
    /// Document database exposing the table API.
    Document,
}

impl std::str::FromStr for BackendKind {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" | "table" => Ok(Self::Rest),
            "document" | "documentdb" | "cosmos" => Ok(Self::Document),
            other => Err(TableError::Configuration(format!("unknown backend '{other}'"))),
        }
    }
}

/// Everything needed to build a service client.
#[derive(Debug, Clone, Default)]
pub struct TableClientConfig {
    pub account_name: Option<String>,
    pub account_key: Option<SecretString>,
    pub sas_token: Option<SecretString>,
    /// Primary endpoint; defaults to `https://<account>.table.core.windows.net`.
    pub primary_endpoint: Option<String>,
    /// Secondary endpoint; derived from the primary when unset.
    pub secondary_endpoint: Option<String>,
    pub backend: BackendKind,
    pub http: HttpConfig,
    /// Options applied to every call that does not override them.
    pub default_options: TableRequestOptions,
}

impl TableClientConfig {
    pub fn builder() -> TableClientConfigBuilder {
        TableClientConfigBuilder::default()
    }

    /// Read the `TABLEBRIDGE_*` variables of the process environment.
    pub fn from_env() -> Result<Self, TableError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TableError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let secs = |name: &str| -> Result<Option<Duration>, TableError> {
            read(name)
                .map(|v| {
                    v.trim().parse::<u64>().map(Duration::from_secs).map_err(|e| {
                        TableError::Configuration(format!("{name} must be whole seconds: {e}"))
                    })
                })
                .transpose()
        };

        let mut builder = Self::builder();
        if let Some(name) = read(ENV_ACCOUNT_NAME) {
            builder = builder.account_name(name);
        }
        if let Some(key) = read(ENV_ACCOUNT_KEY) {
            builder = builder.account_key(key);
        }
        if let Some(token) = read(ENV_SAS_TOKEN) {
            builder = builder.sas_token(token);
        }
        if let Some(endpoint) = read(ENV_ENDPOINT) {
            builder = builder.primary_endpoint(endpoint);
        }
        if let Some(endpoint) = read(ENV_SECONDARY_ENDPOINT) {
            builder = builder.secondary_endpoint(endpoint);
        }
        if let Some(backend) = read(ENV_BACKEND) {
            builder = builder.backend(backend.parse()?);
        }

        let mut http = HttpConfig::builder();
        if let Some(timeout) = secs(ENV_TIMEOUT_SECS)? {
            http = http.timeout(Some(timeout));
        }
        if let Some(timeout) = secs(ENV_CONNECT_TIMEOUT_SECS)? {
            http = http.connect_timeout(Some(timeout));
        }
        builder = builder.http(http.build());

        let mut options = TableRequestOptions::new();
        options.server_timeout = secs(ENV_SERVER_TIMEOUT_SECS)?;
        options.maximum_execution_time = secs(ENV_MAX_EXECUTION_SECS)?;
        if let Some(mode) = read(ENV_LOCATION_MODE) {
            options.location_mode = Some(parse_location_mode(&mode)?);
        }
        Ok(builder.default_options(options).build())
    }

    /// Credentials implied by the configured secrets.
    ///
    /// An account key wins over a SAS token; neither means anonymous access.
    pub fn credentials(&self) -> Result<StorageCredentials, TableError> {
        let credentials = match (&self.account_name, &self.account_key, &self.sas_token) {
            (Some(name), Some(key), _) => StorageCredentials::SharedKey {
                account_name: name.clone(),
                key: key.clone(),
            },
            (None, Some(_), _) => {
                return Err(TableError::Configuration(
                    "an account key needs an account name".into(),
                ));
            }
            (_, None, Some(token)) => StorageCredentials::Sas {
                token: token.clone(),
            },
            _ => StorageCredentials::Anonymous,
        };
        credentials.validate()?;
        Ok(credentials)
    }

    /// Primary and secondary service endpoints.
    pub fn storage_uri(&self) -> Result<StorageUri, TableError> {
        let primary = match (&self.primary_endpoint, &self.account_name) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(account)) => format!("https://{account}.table.core.windows.net"),
            (None, None) => {
                return Err(TableError::Configuration(
                    "either an endpoint or an account name is required".into(),
                ));
            }
        };
        let mut uri = StorageUri::with_derived_secondary(&primary)?;
        if let Some(secondary) = &self.secondary_endpoint {
            uri.secondary = Some(reqwest::Url::parse(secondary).map_err(|e| {
                TableError::Configuration(format!("invalid endpoint '{secondary}': {e}"))
            })?);
        }
        Ok(uri)
    }
}

fn parse_location_mode(value: &str) -> Result<LocationMode, TableError> {
    let normalized: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "primaryonly" => Ok(LocationMode::PrimaryOnly),
        "primarythensecondary" => Ok(LocationMode::PrimaryThenSecondary),
        "secondaryonly" => Ok(LocationMode::SecondaryOnly),
        "secondarythenprimary" => Ok(LocationMode::SecondaryThenPrimary),
        _ => Err(TableError::Configuration(format!(
            "unknown location mode '{value}'"
        ))),
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableClientConfigBuilder {
    config: TableClientConfig,
}

impl TableClientConfigBuilder {
    pub fn account_name(mut self, name: impl Into<String>) -> Self {
        self.config.account_name = Some(name.into());
        self
    }

    pub fn account_key(mut self, key: impl Into<String>) -> Self {
        self.config.account_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn sas_token(mut self, token: impl Into<String>) -> Self {
        self.config.sas_token = Some(SecretString::from(token.into()));
        self
    }

    pub fn primary_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.primary_endpoint = Some(endpoint.into());
        self
    }

    pub fn secondary_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.secondary_endpoint = Some(endpoint.into());
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn http(mut self, http: HttpConfig) -> Self {
        self.config.http = http;
        self
    }

    pub fn default_options(mut self, options: TableRequestOptions) -> Self {
        self.config.default_options = options;
        self
    }

    pub fn build(self) -> TableClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn reads_environment() {
        let config = TableClientConfig::from_lookup(lookup(&[
            (ENV_ACCOUNT_NAME, "acct"),
            (ENV_ACCOUNT_KEY, "a2V5"),
            (ENV_BACKEND, "document"),
            (ENV_TIMEOUT_SECS, "45"),
            (ENV_SERVER_TIMEOUT_SECS, "10"),
            (ENV_LOCATION_MODE, "primary_then_secondary"),
        ]))
        .unwrap();
        assert_eq!(config.backend, BackendKind::Document);
        assert_eq!(config.http.timeout, Some(Duration::from_secs(45)));
        assert_eq!(config.default_options.server_timeout, Some(Duration::from_secs(10)));
        assert_eq!(
            config.default_options.location_mode,
            Some(LocationMode::PrimaryThenSecondary)
        );
        assert!(config.credentials().unwrap().is_shared_key());

        let uri = config.storage_uri().unwrap();
        assert_eq!(uri.primary.as_str(), "https://acct.table.core.windows.net/");
        assert_eq!(
            uri.secondary.unwrap().as_str(),
            "https://acct-secondary.table.core.windows.net/"
        );
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(TableClientConfig::from_lookup(lookup(&[(ENV_TIMEOUT_SECS, "soon")])).is_err());
        assert!(TableClientConfig::from_lookup(lookup(&[(ENV_BACKEND, "sqlite")])).is_err());
        let config = TableClientConfig::builder().account_key("a2V5").build();
        assert!(config.credentials().is_err());
        assert!(config.storage_uri().is_err());
    }

    #[test]
    fn explicit_endpoints_win() {
        let config = TableClientConfig::builder()
            .primary_endpoint("http://127.0.0.1:10002/devstoreaccount1")
            .sas_token("?sv=1&sig=x")
            .build();
        let uri = config.storage_uri().unwrap();
        assert!(uri.secondary.is_none());
        assert!(matches!(config.credentials().unwrap(), StorageCredentials::Sas { .. }));
    }
}
