//! Retry module
//! - context.rs: retry context, decision and backoff clamping
//! - policy.rs: policy traits and the built-in policies

pub mod context;
pub mod policy;

pub use context::*;
pub use policy::*;
