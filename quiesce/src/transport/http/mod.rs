//! HTTP transport.

pub mod admission;
mod routes;
mod server;

pub use routes::{HealthCheckResponse, HealthStatus, routes};
pub use server::{serve, serve_with};
