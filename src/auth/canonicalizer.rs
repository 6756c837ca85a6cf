//! Canonical strings for table shared-key signatures.

use crate::defaults::protocol::{HEADER_MS_DATE, SECONDARY_LOCATION_SUFFIX};
use crate::error::TableError;
use crate::execution::command::TableRequest;

/// Produces the string a shared-key signature is computed over.
pub trait Canonicalizer: Send + Sync {
    /// Value of the `Authorization` scheme, e.g. `SharedKey`.
    fn authorization_scheme(&self) -> &'static str;

    fn canonicalize(&self, request: &TableRequest, account_name: &str) -> Result<String, TableError>;
}

/// `VERB\nContent-MD5\nContent-Type\nDate\nCanonicalizedResource`.
#[derive(Debug, Clone, Copy)]
pub struct SharedKeyTableCanonicalizer {
    /// Whether `x-ms-date` may stand in for `Date`.
    pub allow_ms_date: bool,
}

impl Default for SharedKeyTableCanonicalizer {
    fn default() -> Self {
        Self {
            allow_ms_date: true,
        }
    }
}

impl Canonicalizer for SharedKeyTableCanonicalizer {
    fn authorization_scheme(&self) -> &'static str {
        "SharedKey"
    }

    fn canonicalize(&self, request: &TableRequest, account_name: &str) -> Result<String, TableError> {
        let mut out = String::with_capacity(128);
        out.push_str(request.method.as_str());
        out.push('\n');
        out.push_str(request.header("Content-MD5").unwrap_or_default());
        out.push('\n');
        out.push_str(request.header("Content-Type").unwrap_or_default());
        out.push('\n');
        out.push_str(canonical_date(request, self.allow_ms_date));
        out.push('\n');
        out.push_str(&canonical_resource(request, account_name));
        Ok(out)
    }
}

/// `Date\nCanonicalizedResource`.
#[derive(Debug, Clone, Copy)]
pub struct SharedKeyLiteTableCanonicalizer {
    pub allow_ms_date: bool,
}

impl Default for SharedKeyLiteTableCanonicalizer {
    fn default() -> Self {
        Self {
            allow_ms_date: true,
        }
    }
}

impl Canonicalizer for SharedKeyLiteTableCanonicalizer {
    fn authorization_scheme(&self) -> &'static str {
        "SharedKeyLite"
    }

    fn canonicalize(&self, request: &TableRequest, account_name: &str) -> Result<String, TableError> {
        Ok(format!(
            "{}\n{}",
            canonical_date(request, self.allow_ms_date),
            canonical_resource(request, account_name)
        ))
    }
}

/// `x-ms-date` wins over `Date` when allowed; missing dates are empty.
fn canonical_date(request: &TableRequest, allow_ms_date: bool) -> &str {
    if allow_ms_date && let Some(date) = request.header(HEADER_MS_DATE) {
        return date;
    }
    request.header("Date").unwrap_or_default()
}

/// `/account/path`, plus `?comp=<value>` when the request names a component.
fn canonical_resource(request: &TableRequest, account_name: &str) -> String {
    let account = account_name
        .strip_suffix(SECONDARY_LOCATION_SUFFIX)
        .unwrap_or(account_name);
    let mut resource = format!("/{account}{}", request.url.path());
    if let Some((_, comp)) = request.url.query_pairs().find(|(k, _)| k == "comp") {
        resource.push_str("?comp=");
        resource.push_str(&comp);
    }
    resource
}
