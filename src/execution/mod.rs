//! REST execution engine.
//!
//! A [`RestCommand`] describes one logical call; the [`Executor`] runs it
//! attempt by attempt, under a fresh [`state::ExecutionState`] per call.

pub mod command;
pub mod executor;
pub mod http;
pub mod state;
pub mod stream;

pub use command::{
    BuildContext, RequestFactory, ResponseContext, ResponseHead, RestCommand, TableRequest,
    expect_status, expect_success,
};
pub use executor::{AttemptOutcome, Executor};
pub use http::{HttpInterceptor, HttpRequestContext, LoggingInterceptor};
pub use stream::MultiBufferStream;
