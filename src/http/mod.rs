//! HTTP transport for the lookup and publish services
//!
//! # Modules
//!
//! - [`routes`]: axum router, handlers and error-to-status mapping
//! - [`server`]: Service wiring, listener and graceful shutdown

pub mod routes;
pub mod server;
