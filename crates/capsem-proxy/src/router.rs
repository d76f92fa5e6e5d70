//! Axum router wiring.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::api::{self, openai::CHAT_COMPLETIONS_PATH};
use crate::app_state::AppState;
use crate::ops;

pub fn build_router(state: AppState) -> Router {
    let max_body = state.cfg().gateway.max_body_bytes;
    Router::new()
        // `{model}:generateContent` / `{model}:streamGenerateContent`
        .route(
            "/v1beta/models/:model_action",
            post(api::gemini::generate).options(api::preflight),
        )
        .route(
            CHAT_COMPLETIONS_PATH,
            post(api::openai::chat_completions).options(api::preflight),
        )
        .route("/health", get(ops::health))
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
}
