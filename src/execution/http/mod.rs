//! HTTP plumbing shared by every command: client construction and interceptors.

pub mod client;
pub mod interceptor;

pub use client::{build_http_client, default_http_client};
pub use interceptor::{HttpInterceptor, HttpRequestContext, LoggingInterceptor};
