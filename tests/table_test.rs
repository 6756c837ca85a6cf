mod common;

use futures::TryStreamExt;
use tablebridge::auth::StorageCredentials;
use tablebridge::client::CallContext;
use tablebridge::types::{EdmType, EntitySchema, TableEntity};
use tablebridge::{
    BackendKind, DynamicTableEntity, EntityProperty, StorageLocation, TableClientConfig,
    TableError, TableOperation, TableQuery, TableServiceClient,
};
use wiremock::matchers::{body_json, header, header_exists, header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{client_for, table_for};

const JSON: &str = "application/json;odata=minimalmetadata;streaming=true;charset=utf-8";

fn page(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), JSON)
}

#[tokio::test]
async fn shared_key_requests_are_signed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Tables"))
        .and(header_regex("authorization", "^SharedKey acct:.+$"))
        .and(header_exists("x-ms-date"))
        .and(header_exists("x-ms-version"))
        .and(header_exists("x-ms-client-request-id"))
        .and(body_json(serde_json::json!({"TableName": "people"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let table = client_for(&server, StorageCredentials::shared_key("acct", "a2V5"))
        .table("people")
        .unwrap();
    let result = table.create(&mut CallContext::new()).await.unwrap();
    assert_eq!(result.http_status_code, 204);
}

#[tokio::test]
async fn create_if_not_exists_tolerates_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Tables"))
        .respond_with(ResponseTemplate::new(409).set_body_raw(
            r#"{"odata.error":{"code":"TableAlreadyExists","message":{"lang":"en-US","value":"The table specified already exists."}}}"#,
            "application/json",
        ))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/Tables('people')"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let table = table_for(&server);
    assert!(!table.create_if_not_exists(&mut CallContext::new()).await.unwrap());
    assert!(!table.delete_if_exists(&mut CallContext::new()).await.unwrap());
}

#[tokio::test]
async fn retrieving_a_missing_entity_yields_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/people(PartitionKey='p',RowKey='gone')"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header("x-ms-request-id", "srv-404")
                .set_body_raw(
                    r#"{"odata.error":{"code":"ResourceNotFound","message":{"lang":"en-US","value":"The specified resource does not exist."}}}"#,
                    "application/json",
                ),
        )
        .mount(&server)
        .await;

    let mut call = CallContext::new();
    let result = table_for(&server)
        .execute(TableOperation::retrieve("p", "gone"), &mut call)
        .await
        .unwrap();

    assert_eq!(result.http_status_code, 404);
    assert!(result.result.is_none());
    let last = call.operation_context.last_result().unwrap();
    assert_eq!(last.error_code.as_deref(), Some("ResourceNotFound"));
    assert_eq!(last.service_request_id.as_deref(), Some("srv-404"));
}

#[tokio::test]
async fn merge_sends_if_match_and_tunnels_when_asked() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/people(PartitionKey='p',RowKey='r')"))
        .and(header("x-http-method", "MERGE"))
        .and(header("if-match", "W/\"3\""))
        .respond_with(ResponseTemplate::new(204).insert_header("ETag", "W/\"4\""))
        .expect(1)
        .mount(&server)
        .await;

    let entity = DynamicTableEntity::new("p", "r")
        .with_property("Score", 7)
        .with_etag("W/\"3\"");
    let mut call = CallContext::new().with_options(
        tablebridge::TableRequestOptions::new().with_merge_tunneling(true),
    );
    let result = table_for(&server)
        .execute(TableOperation::merge(entity), &mut call)
        .await
        .unwrap();
    assert_eq!(result.etag.as_deref(), Some("W/\"4\""));
    assert_eq!(result.result.unwrap().etag.as_deref(), Some("W/\"4\""));
}

#[tokio::test]
async fn query_segments_carry_continuation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/people()"))
        .and(query_param("$filter", "PartitionKey eq 'p'"))
        .respond_with(
            page(r#"{"value":[{"PartitionKey":"p","RowKey":"1"},{"PartitionKey":"p","RowKey":"2"}]}"#)
                .insert_header("x-ms-continuation-NextPartitionKey", "p")
                .insert_header("x-ms-continuation-NextRowKey", "3"),
        )
        .mount(&server)
        .await;

    let query = TableQuery::new().filter("PartitionKey eq 'p'");
    let segment = table_for(&server)
        .execute_query_segmented(&query, None, &mut CallContext::new())
        .await
        .unwrap();

    assert_eq!(segment.results.len(), 2);
    let token = segment.continuation_token.unwrap();
    assert_eq!(token.next_partition_key.as_deref(), Some("p"));
    assert_eq!(token.next_row_key.as_deref(), Some("3"));
    assert_eq!(token.target_location, Some(StorageLocation::Primary));
}

#[tokio::test]
async fn query_stream_follows_pages_and_honours_take() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/people()"))
        .and(query_param("NextPartitionKey", "p"))
        .and(query_param("NextRowKey", "3"))
        .and(query_param("$top", "1"))
        .respond_with(page(
            r#"{"value":[{"PartitionKey":"p","RowKey":"3"}]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/people()"))
        .and(query_param("$top", "3"))
        .respond_with(
            page(r#"{"value":[{"PartitionKey":"p","RowKey":"1"},{"PartitionKey":"p","RowKey":"2"}]}"#)
                .insert_header("x-ms-continuation-NextPartitionKey", "p")
                .insert_header("x-ms-continuation-NextRowKey", "3"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let keys: Vec<String> = table_for(&server)
        .execute_query(TableQuery::new().take(3), CallContext::new())
        .map_ok(|entity| entity.row_key)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(keys, ["1", "2", "3"]);
}

#[tokio::test]
async fn list_tables_pages_by_table_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Tables"))
        .and(query_param("NextTableName", "orders"))
        .respond_with(page(r#"{"value":[{"TableName":"orders"}]}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/Tables"))
        .respond_with(
            page(r#"{"value":[{"TableName":"accounts"},{"TableName":"invoices"}]}"#)
                .insert_header("x-ms-continuation-NextTableName", "orders"),
        )
        .mount(&server)
        .await;

    let names: Vec<String> = client_for(&server, StorageCredentials::Anonymous)
        .list_tables(None, CallContext::new())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(names, ["accounts", "invoices", "orders"]);
}

struct Reading {
    sensor: String,
    at: String,
    value: i64,
}

impl TableEntity for Reading {
    fn type_name() -> &'static str {
        "Reading"
    }

    fn schema() -> EntitySchema {
        EntitySchema::new().with_property("Value", EdmType::Int64)
    }

    fn from_entity(entity: DynamicTableEntity) -> Result<Self, TableError> {
        let value = entity
            .get("Value")
            .and_then(EntityProperty::as_i64)
            .ok_or_else(|| TableError::parse("Reading without Value"))?;
        Ok(Self {
            sensor: entity.partition_key,
            at: entity.row_key,
            value,
        })
    }

    fn to_entity(&self) -> DynamicTableEntity {
        DynamicTableEntity::new(&self.sensor, &self.at).with_property("Value", self.value)
    }
}

#[tokio::test]
async fn typed_reads_resolve_untagged_values_from_the_schema() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/readings(PartitionKey='s1',RowKey='t0')"))
        .respond_with(page(r#"{"PartitionKey":"s1","RowKey":"t0","Value":"9007199254740993"}"#))
        .mount(&server)
        .await;

    let client = client_for(&server, StorageCredentials::Anonymous);
    let reading: Reading = client
        .table("readings")
        .unwrap()
        .retrieve("s1", "t0", &mut CallContext::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reading.sensor, "s1");
    assert_eq!(reading.at, "t0");
    assert_eq!(reading.value, 9_007_199_254_740_993);
    assert_eq!(client.schema_cache().len(), 1);
}

fn table_for_name(server: &MockServer, name: &str) -> tablebridge::CloudTable {
    client_for(server, StorageCredentials::Anonymous).table(name).unwrap()
}

#[test]
fn blocking_typed_reads_and_existence_helpers() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/readings(PartitionKey='s1',RowKey='t0')"))
            .respond_with(page(r#"{"PartitionKey":"s1","RowKey":"t0","Value":"9007199254740993"}"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/readings()"))
            .respond_with(page(
                r#"{"value":[{"PartitionKey":"s1","RowKey":"t1","Value":"12"}]}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Tables"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/Tables('readings')"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        server
    });

    let table = table_for_name(&server, "readings");
    let mut call = CallContext::new();
    let reading: Reading = table.retrieve_sync("s1", "t0", &mut call).unwrap().unwrap();
    assert_eq!(reading.value, 9_007_199_254_740_993);
    assert_eq!(call.operation_context.request_results.len(), 1);

    let segment = table
        .query_segmented_sync::<Reading>(&TableQuery::new(), None, &mut CallContext::new())
        .unwrap();
    assert_eq!(segment.results.len(), 1);
    assert_eq!(segment.results[0].value, 12);
    assert!(segment.continuation_token.is_none());

    assert!(!table.create_if_not_exists_sync(&mut CallContext::new()).unwrap());
    assert!(!table.delete_if_exists_sync(&mut CallContext::new()).unwrap());
    drop(server);
}

#[tokio::test]
async fn service_properties_depend_on_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("restype", "service"))
        .and(query_param("comp", "properties"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<StorageServiceProperties/>"))
        .mount(&server)
        .await;

    let config = TableClientConfig::builder()
        .primary_endpoint(server.uri())
        .build();
    let client = TableServiceClient::from_config(&config).unwrap();
    let xml = client
        .get_service_properties(&mut CallContext::new())
        .await
        .unwrap();
    assert_eq!(xml, "<StorageServiceProperties/>");

    let document = client.with_backend(BackendKind::Document);
    let err = document
        .get_service_properties(&mut CallContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TableError::UnsupportedOperation(_)));
}
