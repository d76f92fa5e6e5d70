//! OpenAI chat completions wire format.
//!
//! Request: `{model, messages: [{role, content, tool_calls?, tool_call_id?}], tools?, stream?}`
//! Response: `{choices: [{index, message: {content, reasoning_content?, tool_calls?}, finish_reason}]}`
//!
//! `system`/`developer` messages become system entries, `tool` messages become
//! function responses, and assistant `tool_calls` become function calls.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{CapsemError, Result};
use crate::model::{Media, MediaSource, Tool};

use super::{
    array_field, parse_entries, to_wire, CanonicalContent, CanonicalRequest, CanonicalResponse,
    Candidate, FunctionCall, FunctionResponse, Normalized, Normalizer, Part, Role, Skipped,
};

#[derive(Debug, Deserialize, Serialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    InputAudio { input_audio: InputAudio },
    Refusal { refusal: String },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct InputAudio {
    pub data: String,
    pub format: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub function: WireFunction,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WireFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolEntry {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    function: Option<FunctionDeclaration>,
}

#[derive(Debug, Deserialize)]
struct FunctionDeclaration {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Tool-call arguments arrive as a JSON string; keep unparseable ones verbatim.
fn parse_arguments(raw: Option<String>) -> Value {
    match raw {
        None => json!({}),
        Some(s) if s.trim().is_empty() => json!({}),
        Some(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
    }
}

/// Tool message content: JSON if it parses, otherwise wrapped text.
fn parse_tool_result(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or_else(|_| json!({ "content": text }))
}

fn media_from_data_url(url: &str) -> Media {
    // data:<mime>;base64,<payload>
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((meta, data)) = rest.split_once(',') {
            let mime = meta.split(';').next().unwrap_or_default();
            return Media::new(mime, MediaSource::Inline(data.to_string()));
        }
    }
    Media::new("image/*", MediaSource::Uri(url.to_string()))
}

impl MessageContent {
    fn into_parts(self) -> Vec<Part> {
        match self {
            MessageContent::Text(t) => vec![Part::Text(t)],
            MessageContent::Parts(parts) => parts
                .into_iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(Part::Text(text)),
                    ContentPart::Refusal { refusal } => Some(Part::Text(refusal)),
                    ContentPart::ImageUrl { image_url } => {
                        Some(Part::Media(media_from_data_url(&image_url.url)))
                    }
                    ContentPart::InputAudio { input_audio } => Some(Part::Media(Media::new(
                        format!("audio/{}", input_audio.format),
                        MediaSource::Inline(input_audio.data),
                    ))),
                    ContentPart::Unsupported => None,
                })
                .collect(),
        }
    }

    fn into_text(self) -> String {
        self.into_parts()
            .into_iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Message {
    /// Drop content parts of types no policy can inspect.
    fn retain_known_parts(&mut self) {
        if let Some(MessageContent::Parts(parts)) = self.content.as_mut() {
            parts.retain(|p| !matches!(p, ContentPart::Unsupported));
        }
    }

    /// `call_names` maps earlier assistant tool-call ids to function names.
    fn into_canonical(self, call_names: &mut HashMap<String, String>) -> CanonicalContent {
        let role = Role::from_wire(self.role.as_deref().unwrap_or("user"));
        let mut parts = Vec::new();

        if let Some(thought) = self.reasoning_content.filter(|t| !t.is_empty()) {
            parts.push(Part::Thought(thought));
        }

        if role == Role::Tool {
            let name = self
                .name
                .or_else(|| {
                    self.tool_call_id
                        .as_ref()
                        .and_then(|id| call_names.get(id).cloned())
                })
                .unwrap_or_else(|| "unknown".to_string());
            let text = self.content.map(MessageContent::into_text).unwrap_or_default();
            parts.push(Part::FunctionResponse(FunctionResponse {
                name,
                response: parse_tool_result(text),
            }));
            return CanonicalContent { role, parts };
        }

        if let Some(content) = self.content {
            parts.extend(content.into_parts());
        }
        for call in self.tool_calls.unwrap_or_default() {
            if let Some(id) = call.id {
                call_names.insert(id, call.function.name.clone());
            }
            parts.push(Part::FunctionCall(FunctionCall {
                name: call.function.name,
                args: parse_arguments(call.function.arguments),
            }));
        }
        CanonicalContent { role, parts }
    }
}

/// Declared function tools, plus the tool entries to forward.
fn parse_tools(tools: &[Value], skipped: &mut Vec<Skipped>) -> (Vec<Tool>, Vec<Value>) {
    let (entries, mut bad) = parse_entries::<ToolEntry>(tools, "tools");
    skipped.append(&mut bad);

    let mut declared = Vec::with_capacity(entries.len());
    let mut forward = Vec::with_capacity(entries.len());
    for (i, t) in entries {
        let reason = match (t.kind.as_deref().unwrap_or("function"), t.function) {
            ("function", Some(f)) => {
                declared.push(Tool::from_declaration(
                    f.name.as_deref(),
                    f.description.as_deref(),
                    f.parameters,
                ));
                forward.extend(tools.get(i).cloned());
                continue;
            }
            ("function", None) => "function tool without function object".to_string(),
            (other, _) => format!("unsupported tool type '{other}'"),
        };
        skipped.push(Skipped {
            location: format!("tools[{i}]"),
            reason,
        });
    }
    (declared, forward)
}

#[derive(Debug, Default)]
pub struct OpenAiNormalizer;

impl OpenAiNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Normalizer for OpenAiNormalizer {
    fn protocol(&self) -> &'static str {
        "openai"
    }

    fn agent_instructions(&self) -> &'static str {
        "OpenAI API proxy user"
    }

    fn normalize_request(&self, body: &Value) -> Result<Normalized> {
        let Value::Object(fields) = body else {
            return Err(CapsemError::BadRequest("request body must be a JSON object".into()));
        };
        let raw_messages = array_field(body, "messages")
            .ok_or_else(|| CapsemError::BadRequest("messages must be an array".into()))?;
        let raw_tools = array_field(body, "tools")
            .ok_or_else(|| CapsemError::BadRequest("tools must be an array".into()))?;

        let (messages, skipped) = parse_entries::<Message>(raw_messages, "messages");
        let mut req = CanonicalRequest {
            model: body.get("model").and_then(Value::as_str).map(str::to_string),
            stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
            skipped,
            ..Default::default()
        };
        let mut upstream: Map<String, Value> = fields.clone();

        let mut call_names = HashMap::new();
        let mut forward = Vec::with_capacity(messages.len());
        for (_, mut m) in messages {
            m.retain_known_parts();
            forward.push(to_wire(&m)?);
            req.contents.push(m.into_canonical(&mut call_names));
        }
        if fields.get("messages").is_some_and(Value::is_array) {
            upstream.insert("messages".into(), Value::Array(forward));
        }

        let (tools, forward) = parse_tools(raw_tools, &mut req.skipped);
        req.tools = tools;
        if fields.get("tools").is_some_and(Value::is_array) {
            upstream.insert("tools".into(), Value::Array(forward));
        }

        Ok(Normalized {
            request: req,
            upstream_body: Value::Object(upstream),
        })
    }

    fn parse_response(&self, body: &Value) -> Result<CanonicalResponse> {
        if !body.is_object() {
            return Err(CapsemError::InvalidUpstreamResponse(
                "response body must be a JSON object".into(),
            ));
        }
        let raw = array_field(body, "choices")
            .ok_or_else(|| CapsemError::InvalidUpstreamResponse("choices must be an array".into()))?;

        let (choices, skipped) = parse_entries::<Choice>(raw, "choices");
        let mut resp = CanonicalResponse {
            candidates: Vec::with_capacity(choices.len()),
            skipped,
        };

        let mut call_names = HashMap::new();
        for (i, choice) in choices {
            let Some(message) = choice.message else {
                tracing::debug!(choice = i, "choice without message");
                continue;
            };
            let canonical = message.into_canonical(&mut call_names);
            if canonical.parts.is_empty() {
                tracing::debug!(choice = i, "choice without parts");
                continue;
            }
            resp.candidates.push(Candidate {
                index: choice.index.unwrap_or(i),
                parts: canonical.parts,
                finish_reason: choice.finish_reason,
            });
        }
        Ok(resp)
    }
}
