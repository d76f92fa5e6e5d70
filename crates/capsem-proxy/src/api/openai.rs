//! `POST /v1/chat/completions`.

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::Response;
use bytes::Bytes;

use capsem_core::error::CapsemError;
use capsem_core::identity::Credential;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::pipeline::{self, Forward};
use crate::upstream::Provider;

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(Credential::from_bearer)
        .ok_or(CapsemError::MissingCredential("authorization"))?;

    // Streaming is selected by the body's `stream` flag.
    let target = Forward {
        provider: Provider::OpenAi,
        model: None,
        path: CHAT_COMPLETIONS_PATH.to_string(),
        query: None,
        stream: false,
    };
    pipeline::run(state, credential, target, body).await
}
