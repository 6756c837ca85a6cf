//! Continuation tokens for segmented enumerations.

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use super::location::StorageLocation;
use crate::defaults::protocol::{
    HEADER_NEXT_PARTITION_KEY, HEADER_NEXT_ROW_KEY, HEADER_NEXT_TABLE_NAME,
    QUERY_NEXT_PARTITION_KEY, QUERY_NEXT_ROW_KEY, QUERY_NEXT_TABLE_NAME,
};
use crate::error::TableError;

/// Cursor returned by the service when a query has more results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableContinuationToken {
    pub next_partition_key: Option<String>,
    pub next_row_key: Option<String>,
    pub next_table_name: Option<String>,
    /// Replica that produced this page. The next page is pinned to it.
    pub target_location: Option<StorageLocation>,
}

impl TableContinuationToken {
    /// Rebuild a token from the continuation response headers.
    ///
    /// Returns `None` when none of the three headers is present, which marks the
    /// end of the enumeration.
    pub fn from_headers(headers: &HeaderMap, location: StorageLocation) -> Option<Self> {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let token = Self {
            next_partition_key: read(HEADER_NEXT_PARTITION_KEY),
            next_row_key: read(HEADER_NEXT_ROW_KEY),
            next_table_name: read(HEADER_NEXT_TABLE_NAME),
            target_location: Some(location),
        };
        if token.is_empty() { None } else { Some(token) }
    }

    pub fn is_empty(&self) -> bool {
        self.next_partition_key.is_none()
            && self.next_row_key.is_none()
            && self.next_table_name.is_none()
    }

    /// Query-string pairs that resume the enumeration.
    pub fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = Vec::with_capacity(3);
        if let Some(pk) = &self.next_partition_key {
            pairs.push((QUERY_NEXT_PARTITION_KEY, pk.as_str()));
        }
        if let Some(rk) = &self.next_row_key {
            pairs.push((QUERY_NEXT_ROW_KEY, rk.as_str()));
        }
        if let Some(table) = &self.next_table_name {
            pairs.push((QUERY_NEXT_TABLE_NAME, table.as_str()));
        }
        pairs
    }

    /// Check that the token can resume an entity query.
    pub fn validate_for_entity_query(&self) -> Result<(), TableError> {
        if self.next_table_name.is_some() {
            return Err(TableError::invalid_argument(
                "continuation token carries NextTableName and cannot resume an entity query",
            ));
        }
        if self.next_row_key.is_some() && self.next_partition_key.is_none() {
            return Err(TableError::invalid_argument(
                "continuation token has NextRowKey without NextPartitionKey",
            ));
        }
        Ok(())
    }

    /// Check that the token can resume a table listing.
    pub fn validate_for_table_query(&self) -> Result<(), TableError> {
        if self.next_partition_key.is_some() || self.next_row_key.is_some() {
            return Err(TableError::invalid_argument(
                "continuation token carries entity cursors and cannot resume a table listing",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn header(name: &str) -> HeaderName {
        HeaderName::from_bytes(name.as_bytes()).unwrap()
    }

    #[test]
    fn partial_headers_build_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header(HEADER_NEXT_PARTITION_KEY), HeaderValue::from_static("pk1"));
        headers.insert(header(HEADER_NEXT_ROW_KEY), HeaderValue::from_static("rk1"));

        let token = TableContinuationToken::from_headers(&headers, StorageLocation::Secondary)
            .expect("token");
        assert_eq!(token.next_partition_key.as_deref(), Some("pk1"));
        assert_eq!(token.next_row_key.as_deref(), Some("rk1"));
        assert_eq!(token.next_table_name, None);
        assert_eq!(token.target_location, Some(StorageLocation::Secondary));
    }

    #[test]
    fn no_headers_means_end_of_enumeration() {
        let headers = HeaderMap::new();
        assert!(TableContinuationToken::from_headers(&headers, StorageLocation::Primary).is_none());
    }

    #[test]
    fn entity_query_validation() {
        let token = TableContinuationToken {
            next_row_key: Some("rk".into()),
            ..Default::default()
        };
        assert!(token.validate_for_entity_query().is_err());

        let token = TableContinuationToken {
            next_table_name: Some("t".into()),
            ..Default::default()
        };
        assert!(token.validate_for_entity_query().is_err());
        assert!(token.validate_for_table_query().is_ok());
    }

    #[test]
    fn query_pairs_skip_missing_fields() {
        let token = TableContinuationToken {
            next_partition_key: Some("pk".into()),
            ..Default::default()
        };
        assert_eq!(token.query_pairs(), vec![("NextPartitionKey", "pk")]);
    }
}
