//! Common building blocks shared across Airlift client crates.
//!
//! This crate contains:
//! - Retry primitives: a tagged per-attempt outcome, a retry policy with
//!   exponential backoff and jitter, and the loop that drives them
//!
//! Nothing here knows about HTTP; `airlift-client` supplies the operations
//! and error types.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod retry;

// Re-export commonly used items
pub use retry::{run, Attempt, Jitter, RetryError, RetryPolicy};
