//! Policy contract.
//!
//! A policy is consulted at eight interception points. Every hook has a
//! default that returns [`Decision::safe`], so concrete policies only override
//! what they inspect. Hooks take shared references: a policy may do its own
//! I/O but never mutates the agent or pipeline state.

pub mod debug;
pub mod pii;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{CapsemError, Result};
use crate::model::{Agent, Decision, InvocationId, Media, Tool};

pub use debug::DebugPolicy;
pub use pii::PiiPolicy;

#[async_trait]
pub trait Policy: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn authors(&self) -> &str {
        ""
    }

    async fn on_workflow_start(
        &self,
        _invocation_id: &InvocationId,
        _agent: &Agent,
        _prompt: &str,
        _media: &[Media],
    ) -> Result<Decision> {
        Ok(Decision::safe())
    }

    async fn on_workflow_end(&self, _invocation_id: &InvocationId, _agent: &Agent) -> Result<Decision> {
        Ok(Decision::safe())
    }

    async fn on_agent_start(&self, _invocation_id: &InvocationId, _agent: &Agent) -> Result<Decision> {
        Ok(Decision::safe())
    }

    async fn on_agent_end(&self, _invocation_id: &InvocationId, _agent: &Agent) -> Result<Decision> {
        Ok(Decision::safe())
    }

    async fn on_model_call(
        &self,
        _invocation_id: &InvocationId,
        _agent: &Agent,
        _model_name: &str,
        _system_instructions: &str,
        _prompt: &str,
        _media: &[Media],
    ) -> Result<Decision> {
        Ok(Decision::safe())
    }

    async fn on_model_response(
        &self,
        _invocation_id: &InvocationId,
        _agent: &Agent,
        _response: &str,
        _thoughts: &str,
        _media: &[Media],
    ) -> Result<Decision> {
        Ok(Decision::safe())
    }

    async fn on_tool_call(
        &self,
        _invocation_id: &InvocationId,
        _agent: &Agent,
        _tool: &Tool,
        _args: &Value,
    ) -> Result<Decision> {
        Ok(Decision::safe())
    }

    async fn on_tool_response(
        &self,
        _invocation_id: &InvocationId,
        _agent: &Agent,
        _tool: &Tool,
        _response: &Value,
    ) -> Result<Decision> {
        Ok(Decision::safe())
    }
}

impl fmt::Display for dyn Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for dyn Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("authors", &self.authors())
            .finish()
    }
}

/// Policy types that can be built from a configuration fragment.
pub trait ConfigurablePolicy: Policy + Sized + 'static {
    /// Fragment stem this policy is loaded from (`debug` => `debug.toml`).
    const CONFIG_NAME: &'static str;

    /// `Ok(None)` means the fragment explicitly disabled the policy.
    fn from_config(config: &PolicyConfig) -> Result<Option<Self>>;
}

/// One parsed policy configuration fragment.
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    table: toml::Table,
}

impl PolicyConfig {
    pub fn new(table: toml::Table) -> Self {
        Self { table }
    }

    pub fn parse(src: &str) -> Result<Self> {
        let table: toml::Table = src
            .parse()
            .map_err(|e| CapsemError::Config(format!("invalid toml: {e}")))?;
        Ok(Self { table })
    }

    /// `enabled` key; absent means enabled.
    pub fn enabled(&self) -> bool {
        self.table
            .get("enabled")
            .and_then(toml::Value::as_bool)
            .unwrap_or(true)
    }

    /// Deserialize the whole fragment into a policy-specific settings struct.
    pub fn settings<T: DeserializeOwned>(&self) -> Result<T> {
        toml::Value::Table(self.table.clone())
            .try_into()
            .map_err(|e| CapsemError::Config(format!("invalid policy settings: {e}")))
    }
}
