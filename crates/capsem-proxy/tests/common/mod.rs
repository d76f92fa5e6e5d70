//! Shared fixtures: a recording mock upstream and request helpers.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use capsem_core::error::{CapsemError, Result};
use capsem_core::{FailureMode, SecurityManager};
use capsem_proxy::app_state::AppState;
use capsem_proxy::config::ProxyConfig;
use capsem_proxy::router::build_router;
use capsem_proxy::upstream::{ByteStream, Provider, UpstreamClient, UpstreamRequest};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub provider: Provider,
    pub path: String,
    pub query: Option<String>,
    pub credential: String,
    pub body: Bytes,
    pub streaming: bool,
}

#[derive(Clone, Copy)]
pub enum Canned {
    Body(&'static str),
    Status(u16),
    /// Never answers.
    Hang,
}

pub struct MockUpstream {
    calls: Mutex<Vec<RecordedCall>>,
    response: Canned,
    chunks: Vec<&'static str>,
}

impl MockUpstream {
    pub fn returning(body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            response: Canned::Body(body),
            chunks: Vec::new(),
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            response: Canned::Status(status),
            chunks: Vec::new(),
        })
    }

    pub fn streaming(chunks: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            response: Canned::Status(500),
            chunks,
        })
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            response: Canned::Hang,
            chunks: Vec::new(),
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, req: &UpstreamRequest<'_>, streaming: bool) {
        self.calls.lock().unwrap().push(RecordedCall {
            provider: req.provider,
            path: req.path.clone(),
            query: req.query.clone(),
            credential: req.credential.expose().to_string(),
            body: req.body.clone(),
            streaming,
        });
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn generate(&self, req: UpstreamRequest<'_>) -> Result<Bytes> {
        self.record(&req, false);
        match self.response {
            Canned::Body(b) => Ok(Bytes::from_static(b.as_bytes())),
            Canned::Status(s) => Err(CapsemError::UpstreamStatus(s)),
            Canned::Hang => futures_util::future::pending().await,
        }
    }

    async fn stream(&self, req: UpstreamRequest<'_>) -> Result<ByteStream> {
        self.record(&req, true);
        let chunks: Vec<Result<Bytes>> = self
            .chunks
            .iter()
            .copied()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        Ok(futures_util::stream::iter(chunks).boxed())
    }
}

pub fn debug_manager() -> SecurityManager {
    SecurityManager::with_default_policy(FailureMode::Closed)
}

pub fn app(manager: SecurityManager, upstream: Arc<MockUpstream>) -> Router {
    let state = AppState::with_parts(ProxyConfig::default(), Arc::new(manager), upstream);
    build_router(state)
}

pub fn gemini_request(model_action: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/v1beta/models/{model_action}"))
        .header("x-goog-api-key", "test-key")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn openai_request(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", "Bearer sk-test")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

pub fn json(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}
