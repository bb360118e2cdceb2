//! # Airlift Client
//!
//! HTTP client for the Airlift deployment platform API.
//!
//! This crate contains:
//! - A typed client with bearer auth, team scoping, and response decoding
//! - Request options (method, headers, body, per-request retry overrides)
//! - An error taxonomy split along the retryable/non-retryable seam
//! - Environment-based configuration loading
//!
//! ## Architecture
//! - Retry scheduling comes from `airlift-common`; this crate only decides
//!   which failures are transient
//! - The client is stateless between calls: configuration is immutable and
//!   every request builds its own URL, headers, and body

pub mod client;
pub mod config;
pub mod errors;
pub mod request;
pub mod response;

// Re-export commonly used items
pub use client::*;
pub use config::*;
pub use errors::*;
pub use request::*;
pub use response::*;
