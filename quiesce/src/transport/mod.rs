//! Transport layer for quiesce.
//!
//! Currently provides the operator HTTP API via axum, plus a middleware that
//! puts any axum router behind a gate.

pub mod http;

pub use http::{admission, serve, serve_with};
