//! Security manager: dispatches canonical events to every registered policy
//! and folds their decisions into one gating verdict.
//!
//! Aggregation rule: `BLOCK` > `CONFIRM` > `ALLOW`; among equal verdicts the
//! earliest-registered policy supplies reason and details. Evaluation stops at
//! the first `BLOCK`, which no later policy can outrank.
//!
//! Construct once at startup, then share via `Arc`. The policy list is never
//! mutated afterwards, so concurrent requests read it without locking.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CapsemError;
use crate::model::{Agent, Decision, InterceptionPoint, InvocationId, Media, Reason, Tool, Verdict};
use crate::policy::{DebugPolicy, Policy};

/// Log target for the per-decision audit trail.
pub const AUDIT_TARGET: &str = "capsem::audit";

/// What a failing (erroring or panicking) policy evaluation turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Treat the failure as `BLOCK`.
    #[default]
    Closed,
    /// Treat the failure as `ALLOW` (logged at warn).
    Open,
}

pub struct SecurityManager {
    policies: Vec<Arc<dyn Policy>>,
    failure_mode: FailureMode,
}

impl SecurityManager {
    /// Policies are consulted in the given order.
    pub fn new(policies: Vec<Arc<dyn Policy>>, failure_mode: FailureMode) -> Self {
        Self {
            policies,
            failure_mode,
        }
    }

    /// Manager holding only the debug policy.
    pub fn with_default_policy(failure_mode: FailureMode) -> Self {
        Self::new(vec![Arc::new(DebugPolicy::new())], failure_mode)
    }

    pub fn policies(&self) -> &[Arc<dyn Policy>] {
        &self.policies
    }

    pub fn policy_names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    pub async fn on_workflow_start(
        &self,
        invocation_id: &InvocationId,
        agent: &Agent,
        prompt: &str,
        media: &[Media],
    ) -> Decision {
        self.evaluate(InterceptionPoint::WorkflowStart, invocation_id, |p| {
            p.on_workflow_start(invocation_id, agent, prompt, media)
        })
        .await
    }

    pub async fn on_workflow_end(&self, invocation_id: &InvocationId, agent: &Agent) -> Decision {
        self.evaluate(InterceptionPoint::WorkflowEnd, invocation_id, |p| {
            p.on_workflow_end(invocation_id, agent)
        })
        .await
    }

    pub async fn on_agent_start(&self, invocation_id: &InvocationId, agent: &Agent) -> Decision {
        self.evaluate(InterceptionPoint::AgentStart, invocation_id, |p| {
            p.on_agent_start(invocation_id, agent)
        })
        .await
    }

    pub async fn on_agent_end(&self, invocation_id: &InvocationId, agent: &Agent) -> Decision {
        self.evaluate(InterceptionPoint::AgentEnd, invocation_id, |p| {
            p.on_agent_end(invocation_id, agent)
        })
        .await
    }

    pub async fn on_model_call(
        &self,
        invocation_id: &InvocationId,
        agent: &Agent,
        model_name: &str,
        system_instructions: &str,
        prompt: &str,
        media: &[Media],
    ) -> Decision {
        self.evaluate(InterceptionPoint::ModelCall, invocation_id, |p| {
            p.on_model_call(invocation_id, agent, model_name, system_instructions, prompt, media)
        })
        .await
    }

    pub async fn on_model_response(
        &self,
        invocation_id: &InvocationId,
        agent: &Agent,
        response: &str,
        thoughts: &str,
        media: &[Media],
    ) -> Decision {
        self.evaluate(InterceptionPoint::ModelResponse, invocation_id, |p| {
            p.on_model_response(invocation_id, agent, response, thoughts, media)
        })
        .await
    }

    pub async fn on_tool_call(
        &self,
        invocation_id: &InvocationId,
        agent: &Agent,
        tool: &Tool,
        args: &Value,
    ) -> Decision {
        self.evaluate(InterceptionPoint::ToolCall, invocation_id, |p| {
            p.on_tool_call(invocation_id, agent, tool, args)
        })
        .await
    }

    pub async fn on_tool_response(
        &self,
        invocation_id: &InvocationId,
        agent: &Agent,
        tool: &Tool,
        response: &Value,
    ) -> Decision {
        self.evaluate(InterceptionPoint::ToolResponse, invocation_id, |p| {
            p.on_tool_response(invocation_id, agent, tool, response)
        })
        .await
    }

    async fn evaluate<'f, F>(
        &'f self,
        point: InterceptionPoint,
        invocation_id: &InvocationId,
        call: F,
    ) -> Decision
    where
        F: Fn(&'f dyn Policy) -> BoxFuture<'f, crate::Result<Decision>>,
    {
        let mut best: Option<Decision> = None;
        let mut evaluated = 0usize;

        for policy in &self.policies {
            let policy: &'f dyn Policy = policy.as_ref();
            let outcome = AssertUnwindSafe(call(policy)).catch_unwind().await;
            evaluated += 1;

            let decision = match outcome {
                Ok(Ok(d)) => d,
                Ok(Err(e)) => self.failure_decision(policy, point, invocation_id, e.to_string()),
                Err(panic) => {
                    self.failure_decision(policy, point, invocation_id, panic_message(panic))
                }
            };

            tracing::info!(
                target: AUDIT_TARGET,
                invocation_id = %invocation_id,
                point = %point,
                policy = policy.name(),
                verdict = %decision.verdict(),
                reason = %decision.reason(),
                details = decision.details(),
                "policy decision"
            );

            keep_stronger(&mut best, decision);
            if best.as_ref().is_some_and(Decision::is_block) {
                break;
            }
        }

        let aggregate = best.unwrap_or_else(Decision::safe);
        tracing::info!(
            target: AUDIT_TARGET,
            invocation_id = %invocation_id,
            point = %point,
            verdict = %aggregate.verdict(),
            reason = %aggregate.reason(),
            details = aggregate.details(),
            evaluated,
            skipped = self.policies.len() - evaluated,
            "aggregate decision"
        );
        aggregate
    }

    fn failure_decision(
        &self,
        policy: &dyn Policy,
        point: InterceptionPoint,
        invocation_id: &InvocationId,
        message: String,
    ) -> Decision {
        let err = CapsemError::PolicyFailure {
            policy: policy.name().to_string(),
            message,
        };
        match self.failure_mode {
            FailureMode::Closed => {
                tracing::error!(invocation_id = %invocation_id, point = %point, error = %err, "policy evaluation failed, blocking");
                Decision::block(Reason::PolicyFailure, err.to_string())
            }
            FailureMode::Open => {
                tracing::warn!(invocation_id = %invocation_id, point = %point, error = %err, "policy evaluation failed, allowing");
                Decision::new(Verdict::Allow, Reason::PolicyFailure, err.to_string())
            }
        }
    }
}

/// Replace `best` only with a strictly stronger verdict, so the earliest of
/// equal verdicts is kept.
fn keep_stronger(best: &mut Option<Decision>, next: Decision) {
    if best.as_ref().map_or(true, |b| next.verdict() > b.verdict()) {
        *best = Some(next);
    }
}

/// Fold decisions already computed, in registration order.
pub fn aggregate<I>(decisions: I) -> Decision
where
    I: IntoIterator<Item = Decision>,
{
    let mut best: Option<Decision> = None;
    for d in decisions {
        keep_stronger(&mut best, d);
    }
    best.unwrap_or_else(Decision::safe)
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
