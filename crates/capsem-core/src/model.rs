//! Canonical event & decision model.
//!
//! Every provider wire format is normalized into these types before policies
//! see it, and every policy answers with a [`Decision`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{CapsemError, Result};

/// Placeholder used when a caller declares a tool without a description.
pub const NO_DESCRIPTION: &str = "No description provided";

/// Correlation id for one top-level client request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationId(String);

impl InvocationId {
    /// Fresh random id (UUID v4, simple hex form).
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for InvocationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a policy evaluation, ordered by precedence (`Block` strongest).
///
/// Parsing (and deserializing from config) is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum Verdict {
    Allow,
    Confirm,
    Block,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Allow => "ALLOW",
            Verdict::Confirm => "CONFIRM",
            Verdict::Block => "BLOCK",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = CapsemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALLOW" => Ok(Verdict::Allow),
            "CONFIRM" => Ok(Verdict::Confirm),
            "BLOCK" => Ok(Verdict::Block),
            other => Err(CapsemError::Config(format!("unknown verdict: {other}"))),
        }
    }
}

impl TryFrom<String> for Verdict {
    type Error = CapsemError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Why a decision was reached (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    Safe,
    PolicyViolation,
    SensitiveData,
    PolicyFailure,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Safe => "SAFE",
            Reason::PolicyViolation => "POLICY_VIOLATION",
            Reason::SensitiveData => "SENSITIVE_DATA",
            Reason::PolicyFailure => "POLICY_FAILURE",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable `{verdict, reason, details}` produced by a policy or the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    verdict: Verdict,
    reason: Reason,
    details: String,
}

impl Decision {
    pub fn new(verdict: Verdict, reason: Reason, details: impl Into<String>) -> Self {
        Self {
            verdict,
            reason,
            details: details.into(),
        }
    }

    /// The canonical no-opinion result.
    pub fn safe() -> Self {
        Self::new(Verdict::Allow, Reason::Safe, "")
    }

    pub fn block(reason: Reason, details: impl Into<String>) -> Self {
        Self::new(Verdict::Block, reason, details)
    }

    pub fn confirm(reason: Reason, details: impl Into<String>) -> Self {
        Self::new(Verdict::Confirm, reason, details)
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    pub fn is_block(&self) -> bool {
        self.verdict == Verdict::Block
    }
}

impl Default for Decision {
    fn default() -> Self {
        Self::safe()
    }
}

/// A tool (function) declared by the caller or invoked by the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    pub name: String,
    /// Never empty.
    pub description: String,
    /// JSON schema, opaque to the pipeline.
    pub parameters: Value,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        let description = description.into();
        let description = if description.trim().is_empty() {
            NO_DESCRIPTION.to_string()
        } else {
            description
        };
        Self {
            name: name.into(),
            description,
            parameters,
        }
    }

    /// Build from loosely-typed declaration fields, filling the documented defaults.
    pub fn from_declaration(
        name: Option<&str>,
        description: Option<&str>,
        parameters: Option<Value>,
    ) -> Self {
        Self::new(
            name.filter(|n| !n.is_empty()).unwrap_or("unknown"),
            description.unwrap_or_default(),
            parameters.unwrap_or_else(empty_object_schema),
        )
    }
}

/// `{"type": "object", "properties": {}}`
pub fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
    Other,
}

impl MediaKind {
    /// Classify by MIME type prefix.
    pub fn from_mime(mime: &str) -> Self {
        let top = mime.split('/').next().unwrap_or_default();
        match top {
            "image" => MediaKind::Image,
            "audio" => MediaKind::Audio,
            "video" => MediaKind::Video,
            "application" | "text" => MediaKind::Document,
            _ => MediaKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSource {
    /// Base64 payload carried in the request.
    Inline(String),
    Uri(String),
}

/// Typed reference to non-text content. Passed through, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Media {
    pub kind: MediaKind,
    pub mime_type: String,
    pub source: MediaSource,
}

impl Media {
    pub fn new(mime_type: impl Into<String>, source: MediaSource) -> Self {
        let mime_type = mime_type.into();
        Self {
            kind: MediaKind::from_mime(&mime_type),
            mime_type,
            source,
        }
    }
}

/// Ephemeral, request-scoped identity plus the tools it declared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agent {
    pub name: String,
    pub instructions: String,
    pub tools: Vec<Tool>,
}

impl Agent {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>, tools: Vec<Tool>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            tools,
        }
    }

    /// Agent named after a derived user id: `proxy-user-<id>`.
    pub fn for_user(user_id: &str, instructions: impl Into<String>, tools: Vec<Tool>) -> Self {
        Self::new(format!("proxy-user-{user_id}"), instructions, tools)
    }

    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// The eight lifecycle hooks at which policies are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptionPoint {
    WorkflowStart,
    WorkflowEnd,
    AgentStart,
    AgentEnd,
    ModelCall,
    ModelResponse,
    ToolCall,
    ToolResponse,
}

impl InterceptionPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            InterceptionPoint::WorkflowStart => "on_workflow_start",
            InterceptionPoint::WorkflowEnd => "on_workflow_end",
            InterceptionPoint::AgentStart => "on_agent_start",
            InterceptionPoint::AgentEnd => "on_agent_end",
            InterceptionPoint::ModelCall => "on_model_call",
            InterceptionPoint::ModelResponse => "on_model_response",
            InterceptionPoint::ToolCall => "on_tool_call",
            InterceptionPoint::ToolResponse => "on_tool_response",
        }
    }
}

impl fmt::Display for InterceptionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a JSON object as `k=v, k=v` (strings unquoted) for substring checks.
pub fn render_args(args: &Value) -> String {
    match args {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
