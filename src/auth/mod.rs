//! Request authentication.
//!
//! Credentials describe *what* the caller holds; an [`AuthenticationHandler`]
//! decides *how* a request is signed with it. Shared-key credentials sign
//! every request with an HMAC over a canonical string, SAS credentials only
//! rewrite the URI, anonymous access passes requests through untouched.

pub mod canonicalizer;
pub mod shared_key;

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use crate::error::TableError;
use crate::execution::command::TableRequest;

pub use canonicalizer::{
    Canonicalizer, SharedKeyLiteTableCanonicalizer, SharedKeyTableCanonicalizer,
};
pub use shared_key::SharedKeyAuthenticationHandler;

/// Account credentials.
#[derive(Clone, Default)]
pub enum StorageCredentials {
    #[default]
    Anonymous,
    /// Account name and base64 account key.
    SharedKey {
        account_name: String,
        key: SecretString,
    },
    /// Shared-key credentials signed with the lite canonical form.
    SharedKeyLite {
        account_name: String,
        key: SecretString,
    },
    /// Shared access signature query string (with or without a leading `?`).
    Sas { token: SecretString },
}

impl std::fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::SharedKey { account_name, .. } => f
                .debug_struct("SharedKey")
                .field("account_name", account_name)
                .finish_non_exhaustive(),
            Self::SharedKeyLite { account_name, .. } => f
                .debug_struct("SharedKeyLite")
                .field("account_name", account_name)
                .finish_non_exhaustive(),
            Self::Sas { .. } => f.write_str("Sas { .. }"),
        }
    }
}

impl StorageCredentials {
    pub fn shared_key(account_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::SharedKey {
            account_name: account_name.into(),
            key: SecretString::from(key.into()),
        }
    }

    pub fn shared_key_lite(account_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::SharedKeyLite {
            account_name: account_name.into(),
            key: SecretString::from(key.into()),
        }
    }

    pub fn sas(token: impl Into<String>) -> Self {
        Self::Sas {
            token: SecretString::from(token.into()),
        }
    }

    pub fn account_name(&self) -> Option<&str> {
        match self {
            Self::SharedKey { account_name, .. } | Self::SharedKeyLite { account_name, .. } => {
                Some(account_name)
            }
            _ => None,
        }
    }

    pub fn is_shared_key(&self) -> bool {
        matches!(self, Self::SharedKey { .. } | Self::SharedKeyLite { .. })
    }

    /// Apply the credentials to a resource URI. Only SAS credentials change it.
    pub fn transform_uri(&self, mut uri: reqwest::Url) -> reqwest::Url {
        if let Self::Sas { token } = self {
            let token = token.expose_secret().trim_start_matches('?');
            let query = match uri.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{token}"),
                _ => token.to_string(),
            };
            uri.set_query(Some(&query));
        }
        uri
    }

    /// Check the account key decodes, without signing anything.
    pub fn validate(&self) -> Result<(), TableError> {
        match self {
            Self::SharedKey { key, .. } | Self::SharedKeyLite { key, .. } => {
                shared_key::decode_key(key).map(|_| ())
            }
            Self::Sas { token } if token.expose_secret().trim_start_matches('?').is_empty() => {
                Err(TableError::Configuration("empty SAS token".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Signs outgoing requests.
pub trait AuthenticationHandler: Send + Sync {
    /// Called once all canonical headers are final, right before sending.
    fn sign(&self, request: &mut TableRequest) -> Result<(), TableError>;
}

/// Leaves requests unsigned.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuthenticationHandler;

impl AuthenticationHandler for NoOpAuthenticationHandler {
    fn sign(&self, _request: &mut TableRequest) -> Result<(), TableError> {
        Ok(())
    }
}

/// Pick the signing handler for `credentials`.
pub fn handler_for(credentials: &Arc<StorageCredentials>) -> Box<dyn AuthenticationHandler> {
    match credentials.as_ref() {
        StorageCredentials::SharedKey { .. } => Box::new(SharedKeyAuthenticationHandler::new(
            SharedKeyTableCanonicalizer::default(),
            credentials.clone(),
        )),
        StorageCredentials::SharedKeyLite { .. } => Box::new(
            SharedKeyAuthenticationHandler::new(
                SharedKeyLiteTableCanonicalizer::default(),
                credentials.clone(),
            ),
        ),
        StorageCredentials::Anonymous | StorageCredentials::Sas { .. } => {
            Box::new(NoOpAuthenticationHandler)
        }
    }
}
