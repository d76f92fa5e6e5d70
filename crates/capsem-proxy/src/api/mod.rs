//! Provider-compatible HTTP endpoints.
//!
//! Each endpoint extracts the credential and routing target for its wire
//! protocol and hands the raw body to [`crate::pipeline::run`].

pub mod gemini;
pub mod openai;

use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// CORS-style preflight on the provider paths.
pub async fn preflight() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
