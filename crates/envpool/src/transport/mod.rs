//! Transport layer for envpool.
//!
//! HTTP via axum is the only transport; it translates requests into
//! `PoolService` calls and outcomes back into status codes.

pub mod http;

pub use http::{ServerConfig, ShutdownReason, serve};
