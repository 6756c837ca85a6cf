//! Wire formats of the table service.
//!
//! - `headers`: standard request headers and response metadata
//! - `entity_json`: OData JSON entities
//! - `query`: paged query responses
//! - `batch`: multipart batch requests and responses
//! - `error_body`: JSON and XML extended error bodies

pub mod batch;
pub mod entity_json;
pub mod error_body;
pub mod headers;
pub mod query;

pub use batch::{BatchPart, BatchPayload, SubResponse, apply_batch_response, read_sub_responses, write_batch};
pub use entity_json::{read_entity, read_entity_body, write_entity, write_entity_bytes};
pub use error_body::parse_extended_error;
pub use query::QuerySegment;
