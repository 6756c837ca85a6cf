//! Type Conversions for TableError
//!
//! This module contains From trait implementations for converting
//! common error types into TableError.

use super::types::TableError;

impl From<reqwest::Error> for TableError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::Configuration(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TableError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(format!("invalid JSON: {err}"))
    }
}

impl From<quick_xml::Error> for TableError {
    fn from(err: quick_xml::Error) -> Self {
        Self::parse(format!("invalid XML: {err}"))
    }
}

impl From<base64::DecodeError> for TableError {
    fn from(err: base64::DecodeError) -> Self {
        Self::parse(format!("invalid base64: {err}"))
    }
}

impl From<chrono::ParseError> for TableError {
    fn from(err: chrono::ParseError) -> Self {
        Self::parse(format!("invalid date/time: {err}"))
    }
}

impl From<reqwest::header::InvalidHeaderValue> for TableError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Self::invalid_argument(format!("invalid header value: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: TableError = json_err.into();
        assert!(matches!(err, TableError::Parse { .. }));
    }

    #[test]
    fn test_from_base64_error() {
        use base64::Engine;
        let b64_err = base64::engine::general_purpose::STANDARD
            .decode("@@@")
            .unwrap_err();
        let err: TableError = b64_err.into();
        assert!(!err.is_retryable());
    }
}
