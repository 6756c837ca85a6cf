//! Observability: subscriber setup and log formatting helpers.

pub mod tracing;

pub use self::tracing::{OutputFormat, TracingConfig, TracingConfigBuilder, init_tracing};
