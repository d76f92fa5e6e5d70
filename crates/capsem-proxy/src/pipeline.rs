//! Per-request enforcement pipeline.
//!
//! Non-streaming path:
//! `Received -> Normalized -> ModelCallChecked -> Forwarded -> ResponseNormalized
//!  -> ToolCallsChecked -> ModelResponseChecked -> Returned`
//!
//! Any gate may move the request to `Blocked`, which is terminal: nothing is
//! forwarded or evaluated afterwards. The streaming path runs the same
//! request-side gates plus a pre-flight `on_tool_call` for every declared
//! tool, then passes upstream chunks through unevaluated.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::Instrument;

use capsem_core::error::{CapsemError, Result};
use capsem_core::identity::Credential;
use capsem_core::model::{Agent, Decision, InterceptionPoint, InvocationId, Tool};
use capsem_core::protocol::{CanonicalRequest, CanonicalResponse, Normalized, Normalizer};
use capsem_core::SecurityManager;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::obs::metrics::ProxyMetrics;
use crate::upstream::{Provider, UpstreamRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Normalized,
    ModelCallChecked,
    Forwarded,
    ResponseNormalized,
    ToolCallsChecked,
    ModelResponseChecked,
    Returned,
    Blocked,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "RECEIVED",
            Stage::Normalized => "NORMALIZED",
            Stage::ModelCallChecked => "MODEL_CALL_CHECKED",
            Stage::Forwarded => "FORWARDED",
            Stage::ResponseNormalized => "RESPONSE_NORMALIZED",
            Stage::ToolCallsChecked => "TOOL_CALLS_CHECKED",
            Stage::ModelResponseChecked => "MODEL_RESPONSE_CHECKED",
            Stage::Returned => "RETURNED",
            Stage::Blocked => "BLOCKED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Returned | Stage::Blocked)
    }
}

/// Gating state for one client request.
pub struct Pipeline<'a> {
    manager: &'a SecurityManager,
    metrics: &'a ProxyMetrics,
    invocation_id: InvocationId,
    agent: Agent,
    model: String,
    stage: Stage,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        manager: &'a SecurityManager,
        metrics: &'a ProxyMetrics,
        invocation_id: InvocationId,
        agent: Agent,
        model: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            metrics,
            invocation_id,
            agent,
            model: model.into(),
            stage: Stage::Received,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn invocation_id(&self) -> &InvocationId {
        &self.invocation_id
    }

    fn ensure_open(&self, next: Stage) -> Result<()> {
        if self.stage.is_terminal() {
            return Err(CapsemError::Internal(format!(
                "illegal transition {} -> {}",
                self.stage.as_str(),
                next.as_str()
            )));
        }
        Ok(())
    }

    fn advance(&mut self, next: Stage) -> Result<()> {
        self.ensure_open(next)?;
        tracing::debug!(from = self.stage.as_str(), to = next.as_str(), "stage");
        self.stage = next;
        Ok(())
    }

    /// Turn an aggregate decision into pass or `PolicyViolation`.
    fn gate(&mut self, point: InterceptionPoint, decision: Decision) -> Result<()> {
        self.metrics.policy_decisions.inc(&[
            ("point", point.as_str()),
            ("verdict", decision.verdict().as_str()),
        ]);
        if !decision.is_block() {
            return Ok(());
        }
        self.metrics.blocks.inc(&[("point", point.as_str())]);
        tracing::warn!(
            point = point.as_str(),
            reason = %decision.reason(),
            details = decision.details(),
            stage = self.stage.as_str(),
            "request blocked"
        );
        self.stage = Stage::Blocked;
        Err(CapsemError::PolicyViolation {
            point,
            reason: decision.reason(),
            details: decision.details().to_string(),
        })
    }

    async fn timed<F>(&self, point: InterceptionPoint, fut: F) -> Decision
    where
        F: Future<Output = Decision>,
    {
        let started = Instant::now();
        let decision = fut.await;
        self.metrics
            .policy_eval_duration
            .observe(&[("point", point.as_str())], started.elapsed());
        decision
    }

    /// A declared tool by name, or a placeholder for undeclared ones.
    fn resolve_tool(&self, name: &str) -> Tool {
        self.agent
            .tool(name)
            .cloned()
            .unwrap_or_else(|| Tool::from_declaration(Some(name), None, None))
    }

    /// Request-side gates: history tool responses, then the model call.
    pub async fn check_request(&mut self, request: &CanonicalRequest) -> Result<()> {
        self.advance(Stage::Normalized)?;

        for resp in request.function_responses() {
            let tool = self.resolve_tool(&resp.name);
            let point = InterceptionPoint::ToolResponse;
            let decision = self
                .timed(
                    point,
                    self.manager
                        .on_tool_response(&self.invocation_id, &self.agent, &tool, &resp.response),
                )
                .await;
            self.gate(point, decision)?;
        }

        let point = InterceptionPoint::ModelCall;
        let decision = self
            .timed(
                point,
                self.manager.on_model_call(
                    &self.invocation_id,
                    &self.agent,
                    &self.model,
                    &request.system_instructions(),
                    &request.prompt(),
                    &request.media(),
                ),
            )
            .await;
        self.gate(point, decision)?;
        self.advance(Stage::ModelCallChecked)
    }

    /// Streaming pre-flight: every declared tool, with empty arguments.
    pub async fn check_declared_tools(&mut self) -> Result<()> {
        self.ensure_open(Stage::Forwarded)?;
        let empty = json!({});
        for tool in self.agent.tools.clone() {
            let point = InterceptionPoint::ToolCall;
            let decision = self
                .timed(
                    point,
                    self.manager
                        .on_tool_call(&self.invocation_id, &self.agent, &tool, &empty),
                )
                .await;
            self.gate(point, decision)?;
        }
        Ok(())
    }

    pub fn forwarded(&mut self) -> Result<()> {
        self.advance(Stage::Forwarded)
    }

    /// Response-side gates: every function call first, then the text.
    pub async fn check_response(&mut self, response: &CanonicalResponse) -> Result<()> {
        self.advance(Stage::ResponseNormalized)?;

        for call in response.function_calls() {
            let tool = self.resolve_tool(&call.name);
            let point = InterceptionPoint::ToolCall;
            let decision = self
                .timed(
                    point,
                    self.manager
                        .on_tool_call(&self.invocation_id, &self.agent, &tool, &call.args),
                )
                .await;
            self.gate(point, decision)?;
        }
        self.advance(Stage::ToolCallsChecked)?;

        let point = InterceptionPoint::ModelResponse;
        let decision = self
            .timed(
                point,
                self.manager.on_model_response(
                    &self.invocation_id,
                    &self.agent,
                    &response.text(),
                    &response.thoughts(),
                    &response.media(),
                ),
            )
            .await;
        self.gate(point, decision)?;
        self.advance(Stage::ModelResponseChecked)
    }

    pub fn finish(&mut self) -> Result<()> {
        self.advance(Stage::Returned)
    }
}

/// Where a request goes once it passes the request-side gates.
#[derive(Debug)]
pub struct Forward {
    pub provider: Provider,
    /// Model from the URL (Gemini); the body's `model` wins when present.
    pub model: Option<String>,
    /// Upstream path, e.g. `/v1beta/models/gemini-pro:generateContent`.
    pub path: String,
    pub query: Option<String>,
    /// Streaming selected by the route; a body `"stream": true` also counts.
    pub stream: bool,
}

/// Holds one `requests_in_flight` slot; released on drop, including when the
/// client disconnects and the handler future is dropped mid-request.
pub struct InFlight {
    metrics: Arc<ProxyMetrics>,
    protocol: &'static str,
}

impl InFlight {
    pub fn enter(metrics: Arc<ProxyMetrics>, protocol: &'static str) -> Self {
        metrics.requests_in_flight.inc(&[("protocol", protocol)]);
        Self { metrics, protocol }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.metrics
            .requests_in_flight
            .dec(&[("protocol", self.protocol)]);
    }
}

/// Full request lifecycle behind an endpoint.
pub async fn run(
    state: AppState,
    credential: Credential,
    target: Forward,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let protocol = target.provider.as_str();
    let metrics = state.metrics();
    let _in_flight = InFlight::enter(metrics.clone(), protocol);

    let invocation_id = InvocationId::new();
    let user_id = credential.user_id();
    let span = tracing::info_span!(
        "request",
        invocation_id = %invocation_id,
        protocol,
        model = tracing::field::Empty,
        user_id = %user_id,
    );

    let result = process(&state, &metrics, &credential, invocation_id, &target, body)
        .instrument(span)
        .await;

    let outcome = match &result {
        Ok((_, streamed)) if *streamed => "streamed",
        Ok(_) => "returned",
        Err(CapsemError::PolicyViolation { .. }) => "blocked",
        Err(e) => {
            count_upstream_error(&metrics, protocol, e);
            "error"
        }
    };
    metrics.requests.inc(&[("protocol", protocol), ("outcome", outcome)]);

    result.map(|(resp, _)| resp).map_err(ApiError::from)
}

/// Parse, build the agent, then drive the pipeline.
async fn process(
    state: &AppState,
    metrics: &ProxyMetrics,
    credential: &Credential,
    invocation_id: InvocationId,
    target: &Forward,
    body: Bytes,
) -> Result<(Response, bool)> {
    let normalizer = state.normalizer(target.provider);
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| CapsemError::BadRequest(format!("Invalid JSON body: {e}")))?;
    let Normalized {
        request,
        upstream_body,
    } = normalizer.normalize_request(&value)?;
    if !request.skipped.is_empty() {
        tracing::warn!(skipped = request.skipped.len(), "request entries skipped");
    }
    // Unchanged bodies go out byte for byte.
    let body = if upstream_body == value {
        body
    } else {
        tracing::debug!("forwarding rebuilt request body");
        Bytes::from(
            serde_json::to_vec(&upstream_body)
                .map_err(|e| CapsemError::Internal(format!("encode upstream body: {e}")))?,
        )
    };

    let model = request
        .model
        .clone()
        .or_else(|| target.model.clone())
        .unwrap_or_default();
    tracing::Span::current().record("model", model.as_str());

    let agent = Agent::for_user(
        credential.user_id().as_str(),
        normalizer.agent_instructions(),
        request.tools.clone(),
    );
    let mut pipeline = Pipeline::new(state.manager(), metrics, invocation_id, agent, model);

    let outcome = forward(state, normalizer, &mut pipeline, credential, target, &request, body).await;
    if let Err(e) = &outcome {
        if !matches!(e, CapsemError::PolicyViolation { .. }) {
            tracing::warn!(error = %e, stage = pipeline.stage().as_str(), "request failed");
        }
    }
    outcome
}

/// Gate, forward, gate. Returns the response and whether it streams.
async fn forward(
    state: &AppState,
    normalizer: &dyn Normalizer,
    pipeline: &mut Pipeline<'_>,
    credential: &Credential,
    target: &Forward,
    request: &CanonicalRequest,
    body: Bytes,
) -> Result<(Response, bool)> {
    pipeline.check_request(request).await?;

    let upstream_req = UpstreamRequest {
        provider: target.provider,
        path: target.path.clone(),
        query: target.query.clone(),
        credential,
        body,
    };

    if target.stream || request.stream {
        pipeline.check_declared_tools().await?;
        pipeline.forwarded()?;
        let chunks = state.upstream().stream(upstream_req).await?;
        pipeline.finish()?;
        tracing::info!("streaming response opened");
        let resp = (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(chunks),
        )
            .into_response();
        return Ok((resp, true));
    }

    pipeline.forwarded()?;
    let raw = state.upstream().generate(upstream_req).await?;
    let value: Value = serde_json::from_slice(&raw)
        .map_err(|e| CapsemError::InvalidUpstreamResponse(e.to_string()))?;
    let response = normalizer.parse_response(&value)?;
    pipeline.check_response(&response).await?;
    pipeline.finish()?;
    tracing::info!(candidates = response.candidates.len(), "response returned");

    let resp = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        raw,
    )
        .into_response();
    Ok((resp, false))
}

fn count_upstream_error(metrics: &ProxyMetrics, protocol: &str, e: &CapsemError) {
    let kind = match e {
        CapsemError::UpstreamStatus(_) => "status",
        CapsemError::UpstreamTransport(_) => "transport",
        CapsemError::InvalidUpstreamResponse(_) => "invalid",
        _ => return,
    };
    metrics
        .upstream_errors
        .inc(&[("protocol", protocol), ("kind", kind)]);
}
