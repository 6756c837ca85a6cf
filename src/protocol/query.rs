//! Paged query responses.

use serde_json::Value;

use super::entity_json::read_entity;
use crate::error::TableError;
use crate::execution::command::ResponseHead;
use crate::execution::stream::MultiBufferStream;
use crate::types::{DynamicTableEntity, EntitySchema, TableContinuationToken};

/// One page of results plus the cursor for the next page, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySegment<T> {
    pub results: Vec<T>,
    pub continuation_token: Option<TableContinuationToken>,
}

impl<T> QuerySegment<T> {
    pub fn has_more(&self) -> bool {
        self.continuation_token.is_some()
    }
}

fn read_value_array(body: &MultiBufferStream) -> Result<Vec<Value>, TableError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let mut root: Value = serde_json::from_reader(body.reader())?;
    match root.get_mut("value").map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => Err(TableError::parse(format!(
            "query response 'value' is not an array: {other}"
        ))),
    }
}

/// Entities under `value`, continuation from the response headers.
pub fn read_entity_segment(
    head: &ResponseHead,
    body: &MultiBufferStream,
    schema: Option<&EntitySchema>,
) -> Result<QuerySegment<DynamicTableEntity>, TableError> {
    let results = read_value_array(body)?
        .into_iter()
        .map(|item| read_entity(item, schema))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(QuerySegment {
        results,
        continuation_token: TableContinuationToken::from_headers(&head.headers, head.location),
    })
}

/// Table names under `value[*].TableName`.
pub fn read_table_segment(
    head: &ResponseHead,
    body: &MultiBufferStream,
) -> Result<QuerySegment<String>, TableError> {
    let results = read_value_array(body)?
        .into_iter()
        .map(|item| {
            item.get("TableName")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| TableError::parse("table listing entry without TableName"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(QuerySegment {
        results,
        continuation_token: TableContinuationToken::from_headers(&head.headers, head.location),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityProperty, StorageLocation};
    use reqwest::StatusCode;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

    fn head(continuation: &[(&str, &str)]) -> ResponseHead {
        let mut headers = HeaderMap::new();
        for (name, value) in continuation {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        ResponseHead {
            status: StatusCode::OK,
            headers,
            location: StorageLocation::Secondary,
        }
    }

    #[test]
    fn entity_page_with_full_continuation() {
        let body = MultiBufferStream::from_slice(
            br#"{"odata.metadata":"m","value":[{"PartitionKey":"p","RowKey":"1","N":1},{"PartitionKey":"p","RowKey":"2","N":2}]}"#,
        );
        let h = head(&[
            ("x-ms-continuation-NextPartitionKey", "pk1"),
            ("x-ms-continuation-NextRowKey", "rk1"),
            ("x-ms-continuation-NextTableName", "t1"),
        ]);
        let segment = read_entity_segment(&h, &body, None).unwrap();
        assert_eq!(segment.results.len(), 2);
        assert_eq!(segment.results[1].get("N"), Some(&EntityProperty::Int32(2)));
        let token = segment.continuation_token.unwrap();
        assert_eq!(token.next_partition_key.as_deref(), Some("pk1"));
        assert_eq!(token.next_row_key.as_deref(), Some("rk1"));
        assert_eq!(token.next_table_name.as_deref(), Some("t1"));
        assert_eq!(token.target_location, Some(StorageLocation::Secondary));
    }

    #[test]
    fn last_page_has_no_continuation() {
        let body = MultiBufferStream::from_slice(br#"{"value":[]}"#);
        let segment = read_entity_segment(&head(&[]), &body, None).unwrap();
        assert!(segment.results.is_empty());
        assert!(!segment.has_more());
    }

    #[test]
    fn table_names() {
        let body = MultiBufferStream::from_slice(br#"{"value":[{"TableName":"a"},{"TableName":"b"}]}"#);
        let segment = read_table_segment(&head(&[("x-ms-continuation-NextTableName", "c")]), &body).unwrap();
        assert_eq!(segment.results, vec!["a", "b"]);
        assert_eq!(
            segment.continuation_token.unwrap().next_table_name.as_deref(),
            Some("c")
        );
    }

    #[test]
    fn malformed_page_is_an_error() {
        let body = MultiBufferStream::from_slice(br#"{"value":{}}"#);
        assert!(read_entity_segment(&head(&[]), &body, None).is_err());
        let body = MultiBufferStream::from_slice(b"<xml/>");
        assert!(read_table_segment(&head(&[]), &body).is_err());
    }
}
