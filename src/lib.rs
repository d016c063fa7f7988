//! Coalesce individually submitted requests into batched calls.
//!
//! Submissions accumulate in a debounce window; once the window goes
//! quiet the pending pool is flushed as a single call to the underlying
//! multi-item operation, and the result is routed back to every caller
//! that submitted during the window.
#![allow(clippy::type_complexity)]

mod batcher;
mod config;

pub use batcher::Batcher;
pub use config::{BatchError, BatcherConfig};

#[macro_use]
extern crate tracing;

/// Basic error type of the underlying batch transport, dynamically
/// dispatched and safe to send across threads.
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type the underlying call implementations return, defined in
/// terms of [`Error`] and generic over `T`.
pub type Result<T> = std::result::Result<T, Error>;
