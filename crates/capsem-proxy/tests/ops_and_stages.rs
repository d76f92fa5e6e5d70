//! Operational endpoints, metrics, and the pipeline state machine.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;

use capsem_core::model::{Agent, InvocationId};
use capsem_core::protocol::{GeminiNormalizer, Normalizer};
use capsem_core::CapsemError;
use capsem_proxy::obs::metrics::ProxyMetrics;
use capsem_proxy::pipeline::{InFlight, Pipeline, Stage};

use common::{app, debug_manager, gemini_request, json, send, MockUpstream};

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_lists_providers_and_policies() {
    let app = app(debug_manager(), MockUpstream::returning("{}"));
    let (status, body) = send(app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json(&body),
        json!({
            "status": "healthy",
            "providers": ["gemini", "openai"],
            "policies": ["Debug"],
        })
    );
}

#[tokio::test]
async fn liveness_and_readiness() {
    let app = app(debug_manager(), MockUpstream::returning("{}"));
    let (status, body) = send(app.clone(), get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok".as_bytes());

    let (status, body) = send(app, get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ready".as_bytes());
}

#[tokio::test]
async fn metrics_count_blocks() {
    let app = app(debug_manager(), MockUpstream::returning("{}"));
    let body = json!({ "contents": [{ "parts": [{ "text": "capsem_block" }] }] });
    let (status, _) = send(app.clone(), gemini_request("m:generateContent", &body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("capsem_requests_total{outcome=\"blocked\",protocol=\"gemini\"} 1"));
    assert!(text.contains("capsem_blocks_total{point=\"on_model_call\"} 1"));
    assert!(text.contains("capsem_policy_decisions_total{point=\"on_model_call\",verdict=\"BLOCK\"} 1"));
    assert!(text.contains("capsem_policies_loaded 1"));
    assert!(text.contains("capsem_draining 0"));
}

#[tokio::test]
async fn in_flight_gauge_recovers_when_client_goes_away() {
    let app = app(debug_manager(), MockUpstream::hanging());
    let body = json!({ "contents": [{ "parts": [{ "text": "hello" }] }] });

    let pending = send(app.clone(), gemini_request("m:generateContent", &body));
    let timed_out = tokio::time::timeout(Duration::from_millis(50), pending).await;
    assert!(timed_out.is_err());

    let (_, body) = send(app, get("/metrics")).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("capsem_requests_in_flight{protocol=\"gemini\"} 0"));
}

#[test]
fn in_flight_slot_is_released_on_drop() {
    let metrics = Arc::new(ProxyMetrics::default());
    let labels = [("protocol", "openai")];
    {
        let _slot = InFlight::enter(metrics.clone(), "openai");
        assert_eq!(metrics.requests_in_flight.get(&labels), 1);
    }
    assert_eq!(metrics.requests_in_flight.get(&labels), 0);
}

fn pipeline<'a>(
    manager: &'a capsem_core::SecurityManager,
    metrics: &'a ProxyMetrics,
) -> Pipeline<'a> {
    let agent = Agent::for_user("u", "test", vec![]);
    Pipeline::new(manager, metrics, InvocationId::new(), agent, "gemini-pro")
}

#[tokio::test]
async fn blocked_is_terminal() {
    let manager = debug_manager();
    let metrics = ProxyMetrics::default();
    let mut p = pipeline(&manager, &metrics);

    let req = GeminiNormalizer::new()
        .parse_request(&json!({ "contents": [{ "parts": [{ "text": "capsem_block" }] }] }))
        .unwrap();
    let err = p.check_request(&req).await.unwrap_err();
    assert!(matches!(err, CapsemError::PolicyViolation { .. }));
    assert_eq!(p.stage(), Stage::Blocked);

    // Nothing may be forwarded or checked once blocked.
    assert!(p.forwarded().is_err());
    assert!(p.check_declared_tools().await.is_err());
    assert_eq!(p.stage(), Stage::Blocked);
    assert!(p.finish().is_err());
}

#[tokio::test]
async fn non_streaming_path_walks_every_stage() {
    let manager = debug_manager();
    let metrics = ProxyMetrics::default();
    let mut p = pipeline(&manager, &metrics);
    let n = GeminiNormalizer::new();

    let req = n
        .parse_request(&json!({ "contents": [{ "parts": [{ "text": "hello" }] }] }))
        .unwrap();
    p.check_request(&req).await.unwrap();
    assert_eq!(p.stage(), Stage::ModelCallChecked);

    p.forwarded().unwrap();
    assert_eq!(p.stage(), Stage::Forwarded);

    let resp = n
        .parse_response(&json!({ "candidates": [{ "content": { "parts": [{ "text": "hi" }] } }] }))
        .unwrap();
    p.check_response(&resp).await.unwrap();
    assert_eq!(p.stage(), Stage::ModelResponseChecked);

    p.finish().unwrap();
    assert_eq!(p.stage(), Stage::Returned);
    assert!(p.forwarded().is_err());
}
