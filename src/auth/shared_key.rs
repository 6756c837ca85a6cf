//! HMAC-SHA256 shared-key signing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;

use super::canonicalizer::Canonicalizer;
use super::{AuthenticationHandler, StorageCredentials};
use crate::defaults::protocol::HEADER_MS_DATE;
use crate::error::TableError;
use crate::execution::command::TableRequest;

type HmacSha256 = Hmac<Sha256>;

/// RFC 1123 date, as `x-ms-date` expects it.
pub fn http_date(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub(crate) fn decode_key(key: &SecretString) -> Result<Vec<u8>, TableError> {
    STANDARD
        .decode(key.expose_secret())
        .map_err(|e| TableError::Configuration(format!("account key is not valid base64: {e}")))
}

/// Base64 HMAC-SHA256 of `message` under `key`.
pub fn compute_signature(key: &[u8], message: &str) -> Result<String, TableError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| TableError::Configuration(format!("invalid account key: {e}")))?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Signs requests with `Authorization: <scheme> <account>:<signature>`.
pub struct SharedKeyAuthenticationHandler<C> {
    canonicalizer: C,
    credentials: Arc<StorageCredentials>,
}

impl<C: Canonicalizer> SharedKeyAuthenticationHandler<C> {
    pub fn new(canonicalizer: C, credentials: Arc<StorageCredentials>) -> Self {
        Self {
            canonicalizer,
            credentials,
        }
    }
}

impl<C: Canonicalizer> AuthenticationHandler for SharedKeyAuthenticationHandler<C> {
    fn sign(&self, request: &mut TableRequest) -> Result<(), TableError> {
        let (account_name, key) = match self.credentials.as_ref() {
            StorageCredentials::SharedKey { account_name, key }
            | StorageCredentials::SharedKeyLite { account_name, key } => (account_name, key),
            // Not a shared-key credential: nothing to sign.
            _ => return Ok(()),
        };

        if request.header(HEADER_MS_DATE).is_none() {
            request.set_header(HEADER_MS_DATE, &http_date(chrono::Utc::now()))?;
        }

        let canonical = self.canonicalizer.canonicalize(request, account_name)?;
        let signature = compute_signature(&decode_key(key)?, &canonical)?;
        request.set_header(
            "Authorization",
            &format!(
                "{} {}:{}",
                self.canonicalizer.authorization_scheme(),
                account_name,
                signature
            ),
        )?;
        tracing::trace!(target: "tablebridge::auth", account=%account_name, scheme=self.canonicalizer.authorization_scheme(), "request signed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{SharedKeyLiteTableCanonicalizer, SharedKeyTableCanonicalizer};
    use chrono::TimeZone;
    use reqwest::{Method, Url};

    // base64("secret-key")
    const KEY: &str = "c2VjcmV0LWtleQ==";

    #[test]
    fn signature_is_deterministic_hmac() {
        let a = compute_signature(b"secret-key", "GET\n\n\n\n/acct/t").unwrap();
        let b = compute_signature(b"secret-key", "GET\n\n\n\n/acct/t").unwrap();
        let c = compute_signature(b"other-key", "GET\n\n\n\n/acct/t").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(STANDARD.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn date_format_matches_rfc1123() {
        let t = chrono::Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(http_date(t), "Tue, 05 Mar 2024 07:08:09 GMT");
    }

    #[test]
    fn sign_injects_date_and_authorization() {
        let creds = Arc::new(StorageCredentials::shared_key("acct", KEY));
        let handler = SharedKeyAuthenticationHandler::new(SharedKeyTableCanonicalizer::default(), creds);
        let mut req = TableRequest::new(
            Method::GET,
            Url::parse("https://acct.table.core.windows.net/Tables").unwrap(),
        );
        handler.sign(&mut req).unwrap();

        let date = req.header("x-ms-date").unwrap().to_string();
        let auth = req.header("Authorization").unwrap();
        let expected = compute_signature(
            b"secret-key",
            &format!("GET\n\n\n{date}\n/acct/Tables"),
        )
        .unwrap();
        assert_eq!(auth, format!("SharedKey acct:{expected}"));
    }

    #[test]
    fn lite_scheme_and_existing_date_is_kept() {
        let creds = Arc::new(StorageCredentials::shared_key_lite("acct", KEY));
        let handler =
            SharedKeyAuthenticationHandler::new(SharedKeyLiteTableCanonicalizer::default(), creds);
        let mut req = TableRequest::new(
            Method::GET,
            Url::parse("https://acct.table.core.windows.net/Tables").unwrap(),
        )
        .with_header("x-ms-date", "Tue, 05 Mar 2024 07:08:09 GMT")
        .unwrap();
        handler.sign(&mut req).unwrap();
        assert_eq!(req.header("x-ms-date"), Some("Tue, 05 Mar 2024 07:08:09 GMT"));
        assert!(req.header("Authorization").unwrap().starts_with("SharedKeyLite acct:"));
    }

    #[test]
    fn non_shared_key_credentials_pass_through() {
        let handler = SharedKeyAuthenticationHandler::new(
            SharedKeyTableCanonicalizer::default(),
            Arc::new(StorageCredentials::sas("sig=x")),
        );
        let mut req = TableRequest::new(
            Method::GET,
            Url::parse("https://acct.table.core.windows.net/Tables").unwrap(),
        );
        handler.sign(&mut req).unwrap();
        assert!(req.header("Authorization").is_none());
        assert!(req.header("x-ms-date").is_none());
    }
}
