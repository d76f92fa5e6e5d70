//! Debug policy: allows everything except an explicit trigger token.
//!
//! Used as the default when no policy configuration is available, and to
//! exercise the block path end to end without a real classifier.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::model::{render_args, Agent, Decision, InvocationId, Media, Reason, Tool};

use super::{ConfigurablePolicy, Policy, PolicyConfig};

/// Literal token that makes the debug policy block (case-insensitive).
pub const DEBUG_TRIGGER: &str = "capsem_block";

#[derive(Debug, Default)]
pub struct DebugPolicy;

impl DebugPolicy {
    pub fn new() -> Self {
        Self
    }

    fn check(text: &str, location: &str) -> Decision {
        if text.to_lowercase().contains(DEBUG_TRIGGER) {
            Decision::block(
                Reason::PolicyViolation,
                format!("Detected '{DEBUG_TRIGGER}' in {location}"),
            )
        } else {
            Decision::safe()
        }
    }
}

#[derive(Debug, Deserialize)]
struct DebugSettings {
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[async_trait]
impl Policy for DebugPolicy {
    fn name(&self) -> &str {
        "Debug"
    }

    fn description(&self) -> &str {
        "Blocks any occurrence of 'capsem_block' in prompts, model responses, tool names, tool arguments, or tool responses."
    }

    fn authors(&self) -> &str {
        "CAPSEM maintainers"
    }

    async fn on_model_call(
        &self,
        _invocation_id: &InvocationId,
        _agent: &Agent,
        _model_name: &str,
        _system_instructions: &str,
        prompt: &str,
        _media: &[Media],
    ) -> Result<Decision> {
        Ok(Self::check(prompt, "prompt"))
    }

    async fn on_model_response(
        &self,
        _invocation_id: &InvocationId,
        _agent: &Agent,
        response: &str,
        _thoughts: &str,
        _media: &[Media],
    ) -> Result<Decision> {
        Ok(Self::check(response, "model response"))
    }

    async fn on_tool_call(
        &self,
        _invocation_id: &InvocationId,
        _agent: &Agent,
        tool: &Tool,
        args: &Value,
    ) -> Result<Decision> {
        let by_name = Self::check(&tool.name, "tool name");
        if by_name.is_block() {
            return Ok(by_name);
        }
        Ok(Self::check(&render_args(args), "tool arguments"))
    }

    async fn on_tool_response(
        &self,
        _invocation_id: &InvocationId,
        _agent: &Agent,
        _tool: &Tool,
        response: &Value,
    ) -> Result<Decision> {
        Ok(Self::check(&response.to_string(), "tool response"))
    }
}

impl ConfigurablePolicy for DebugPolicy {
    const CONFIG_NAME: &'static str = "debug";

    fn from_config(config: &PolicyConfig) -> Result<Option<Self>> {
        let settings: DebugSettings = config.settings()?;
        if !settings.enabled {
            return Ok(None);
        }
        Ok(Some(Self::new()))
    }
}
