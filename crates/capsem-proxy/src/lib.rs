//! CAPSEM proxy library entry.
//!
//! Wires config, the security manager, provider endpoints, the enforcement
//! pipeline and the upstream client into an axum application. Consumed by
//! the binary (`main.rs`) and by integration tests.

pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod obs;
pub mod ops;
pub mod pipeline;
pub mod router;
pub mod upstream;
