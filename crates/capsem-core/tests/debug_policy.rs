//! Debug policy trigger behaviour.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use capsem_core::model::{empty_object_schema, NO_DESCRIPTION};
use capsem_core::policy::DebugPolicy;
use capsem_core::{Agent, InvocationId, Policy, Reason, Tool, Verdict};
use serde_json::json;

fn ctx() -> (InvocationId, Agent) {
    (InvocationId::new(), Agent::for_user("u", "test", vec![]))
}

#[tokio::test]
async fn prompt_trigger_blocks_case_insensitively() {
    let (id, agent) = ctx();
    let p = DebugPolicy::new();

    let d = p
        .on_model_call(&id, &agent, "m", "", "please CAPSEM_BLOCK this", &[])
        .await
        .unwrap();
    assert_eq!(d.verdict(), Verdict::Block);
    assert_eq!(d.reason(), Reason::PolicyViolation);
    assert_eq!(d.details(), "Detected 'capsem_block' in prompt");

    let d = p
        .on_model_call(&id, &agent, "m", "", "hello", &[])
        .await
        .unwrap();
    assert_eq!(d.verdict(), Verdict::Allow);
}

#[tokio::test]
async fn system_instructions_are_not_scanned() {
    let (id, agent) = ctx();
    let d = DebugPolicy::new()
        .on_model_call(&id, &agent, "m", "capsem_block", "hi", &[])
        .await
        .unwrap();
    assert_eq!(d.verdict(), Verdict::Allow);
}

#[tokio::test]
async fn tool_name_checked_before_arguments() {
    let (id, agent) = ctx();
    let p = DebugPolicy::new();

    let tool = Tool::new("capsem_block_tool", "", empty_object_schema());
    let d = p
        .on_tool_call(&id, &agent, &tool, &json!({"x": "capsem_block"}))
        .await
        .unwrap();
    assert_eq!(d.details(), "Detected 'capsem_block' in tool name");

    let tool = Tool::new("search", "", empty_object_schema());
    let d = p
        .on_tool_call(&id, &agent, &tool, &json!({"query": "capsem_block please"}))
        .await
        .unwrap();
    assert_eq!(d.details(), "Detected 'capsem_block' in tool arguments");
}

#[tokio::test]
async fn tool_and_model_responses() {
    let (id, agent) = ctx();
    let p = DebugPolicy::new();
    let tool = Tool::new("search", "", empty_object_schema());

    let d = p
        .on_tool_response(&id, &agent, &tool, &json!({"out": "Capsem_Block"}))
        .await
        .unwrap();
    assert_eq!(d.details(), "Detected 'capsem_block' in tool response");

    let d = p
        .on_model_response(&id, &agent, "sure: capsem_block", "", &[])
        .await
        .unwrap();
    assert_eq!(d.details(), "Detected 'capsem_block' in model response");

    // Reasoning text alone does not trigger.
    let d = p
        .on_model_response(&id, &agent, "fine", "capsem_block", &[])
        .await
        .unwrap();
    assert_eq!(d.verdict(), Verdict::Allow);
}

#[test]
fn metadata_and_tool_defaults() {
    let p: Arc<dyn Policy> = Arc::new(DebugPolicy::new());
    assert_eq!(p.name(), "Debug");
    assert_eq!(p.to_string(), "Debug");
    assert!(format!("{p:?}").contains("version"));

    let t = Tool::new("x", "  ", empty_object_schema());
    assert_eq!(t.description, NO_DESCRIPTION);
    let t = Tool::from_declaration(None, None, None);
    assert_eq!(t.name, "unknown");
    assert_eq!(t.parameters, json!({"type": "object", "properties": {}}));
}
