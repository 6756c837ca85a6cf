//! Error Handling Module
//!
//! - Core error type (`TableError`) and coarse classification (`ErrorCategory`)
//! - Type conversions from common error types
//!
//! # Example
//!
//! ```rust,ignore
//! use tablebridge::error::{ErrorCategory, TableError};
//!
//! let error = TableError::invalid_argument("RowKey too long");
//! assert_eq!(error.category(), ErrorCategory::Validation);
//! assert!(!error.is_retryable());
//! ```

mod conversions;
pub mod types;

pub use types::*;
