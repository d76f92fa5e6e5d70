//! `POST /v1beta/models/{model}:generateContent` and `:streamGenerateContent`.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;

use capsem_core::error::CapsemError;
use capsem_core::identity::Credential;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::pipeline::{self, Forward};
use crate::upstream::Provider;

pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Split `gemini-pro:generateContent` into model and streaming flag.
pub fn parse_model_action(model_action: &str) -> Result<(&str, bool), CapsemError> {
    let (model, action) = model_action
        .rsplit_once(':')
        .ok_or_else(|| CapsemError::BadRequest(format!("missing action in '{model_action}'")))?;
    if model.is_empty() {
        return Err(CapsemError::BadRequest("model must not be empty".into()));
    }
    match action {
        "generateContent" => Ok((model, false)),
        "streamGenerateContent" => Ok((model, true)),
        other => Err(CapsemError::BadRequest(format!("unsupported action '{other}'"))),
    }
}

/// Header first, then the `key` query parameter.
fn credential(headers: &HeaderMap, query: &HashMap<String, String>) -> Result<Credential, CapsemError> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| query.get("key").map(String::as_str))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(Credential::new)
        .ok_or(CapsemError::MissingCredential(API_KEY_HEADER))
}

pub async fn generate(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (model, stream) = parse_model_action(&model_action)?;
    let credential = credential(&headers, &query)?;

    let target = Forward {
        provider: Provider::Gemini,
        model: Some(model.to_string()),
        path: format!("/v1beta/models/{model_action}"),
        query: stream.then(|| "alt=sse".to_string()),
        stream,
    };
    pipeline::run(state, credential, target, body).await
}
