//! Provider wire formats and their normalization into the canonical model.
//!
//! - `gemini`: generateContent request/response (`contents[].parts[]`).
//! - `openai`: chat completions request/response (`messages[]`, `choices[]`).
//!
//! Both parsers are tolerant per entry: a malformed content entry, message,
//! tool declaration or candidate is skipped and reported in `skipped`, while
//! the rest of the payload is still evaluated. Only a payload whose top-level
//! shape is wrong fails as a whole.
//!
//! Requests are forwarded from what parsed, never from the client's bytes:
//! skipped entries and unrecognized parts do not reach the provider.

pub mod gemini;
pub mod openai;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{CapsemError, Result};
use crate::model::{Media, Tool};

pub use gemini::GeminiNormalizer;
pub use openai::OpenAiNormalizer;

/// Role of a canonical content entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
    System,
    Tool,
    Other(String),
}

impl Role {
    pub fn from_wire(role: &str) -> Self {
        match role {
            "user" => Role::User,
            "model" | "assistant" => Role::Model,
            "system" | "developer" => Role::System,
            "tool" | "function" => Role::Tool,
            other => Role::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

/// One part of a content entry, split by what policies may see.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// Visible text.
    Text(String),
    /// Reasoning text; never joined into the visible prompt.
    Thought(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
    Media(Media),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalContent {
    pub role: Role,
    pub parts: Vec<Part>,
}

/// An entry the tolerant parser dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    /// JSON path of the entry, e.g. `contents[2]`.
    pub location: String,
    pub reason: String,
}

/// Normalized inbound request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalRequest {
    /// Model named in the body (OpenAI); Gemini carries it in the URL.
    pub model: Option<String>,
    pub contents: Vec<CanonicalContent>,
    pub tools: Vec<Tool>,
    pub stream: bool,
    pub skipped: Vec<Skipped>,
}

impl CanonicalRequest {
    /// Visible text of every non-system entry, newline-joined.
    pub fn prompt(&self) -> String {
        join_text(
            self.contents.iter().filter(|c| c.role != Role::System),
            text_of,
        )
    }

    pub fn system_instructions(&self) -> String {
        join_text(
            self.contents.iter().filter(|c| c.role == Role::System),
            text_of,
        )
    }

    pub fn thoughts(&self) -> String {
        join_text(self.contents.iter(), thought_of)
    }

    /// Tool results embedded in multi-turn history.
    pub fn function_responses(&self) -> Vec<&FunctionResponse> {
        self.contents
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| match p {
                Part::FunctionResponse(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn media(&self) -> Vec<Media> {
        collect_media(self.contents.iter().flat_map(|c| c.parts.iter()))
    }
}

/// A normalized request and the body that may be sent upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub request: CanonicalRequest,
    /// The client body with its entry lists rebuilt from parsed entries only.
    pub upstream_body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub index: usize,
    pub parts: Vec<Part>,
    pub finish_reason: Option<String>,
}

/// Normalized provider response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalResponse {
    pub candidates: Vec<Candidate>,
    pub skipped: Vec<Skipped>,
}

impl CanonicalResponse {
    /// Visible text across all candidates, newline-joined.
    pub fn text(&self) -> String {
        join_parts(self.candidates.iter().flat_map(|c| c.parts.iter()), text_part)
    }

    pub fn thoughts(&self) -> String {
        join_parts(self.candidates.iter().flat_map(|c| c.parts.iter()), thought_part)
    }

    /// Function calls in candidate order.
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.candidates
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| match p {
                Part::FunctionCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn media(&self) -> Vec<Media> {
        collect_media(self.candidates.iter().flat_map(|c| c.parts.iter()))
    }
}

/// Translates one upstream wire protocol to and from the canonical model.
pub trait Normalizer: Send + Sync {
    /// Stable protocol name used in logs, metrics and routing.
    fn protocol(&self) -> &'static str;

    /// Free-text instructions attached to the per-request agent.
    fn agent_instructions(&self) -> &'static str;

    /// Parse a request and rebuild the body to forward from what parsed.
    fn normalize_request(&self, body: &Value) -> Result<Normalized>;

    fn parse_request(&self, body: &Value) -> Result<CanonicalRequest> {
        self.normalize_request(body).map(|n| n.request)
    }

    fn parse_response(&self, body: &Value) -> Result<CanonicalResponse>;
}

/// Deserialize each element independently, keeping the good ones.
pub fn parse_entries<T: DeserializeOwned>(list: &[Value], label: &str) -> (Vec<(usize, T)>, Vec<Skipped>) {
    let mut parsed = Vec::with_capacity(list.len());
    let mut skipped = Vec::new();
    for (i, raw) in list.iter().enumerate() {
        match T::deserialize(raw) {
            Ok(v) => parsed.push((i, v)),
            Err(e) => {
                let location = format!("{label}[{i}]");
                tracing::warn!(%location, error = %e, "skipping malformed entry");
                skipped.push(Skipped {
                    location,
                    reason: e.to_string(),
                });
            }
        }
    }
    (parsed, skipped)
}

/// Re-encode a parsed wire entry for forwarding.
pub(crate) fn to_wire<T: Serialize>(entry: &T) -> Result<Value> {
    serde_json::to_value(entry).map_err(|e| CapsemError::Internal(format!("re-encode entry: {e}")))
}

/// Accept a single element where a list is expected.
pub(crate) fn one_or_many<'de, D, T>(de: D) -> std::result::Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(Option::<OneOrMany<T>>::deserialize(de)?.map(|v| match v {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    }))
}

/// Optional array field: absent/null => empty, wrong type => `None`.
pub(crate) fn array_field<'a>(body: &'a Value, key: &str) -> Option<&'a [Value]> {
    match body.get(key) {
        None | Some(Value::Null) => Some(<&[Value]>::default()),
        Some(Value::Array(items)) => Some(items.as_slice()),
        Some(_) => None,
    }
}

fn text_part(p: &Part) -> Option<&str> {
    match p {
        Part::Text(t) => Some(t.as_str()),
        _ => None,
    }
}

fn thought_part(p: &Part) -> Option<&str> {
    match p {
        Part::Thought(t) => Some(t.as_str()),
        _ => None,
    }
}

fn text_of(c: &CanonicalContent) -> impl Iterator<Item = &str> {
    c.parts.iter().filter_map(text_part)
}

fn thought_of(c: &CanonicalContent) -> impl Iterator<Item = &str> {
    c.parts.iter().filter_map(thought_part)
}

fn join_text<'a, I, F, J>(contents: I, pick: F) -> String
where
    I: Iterator<Item = &'a CanonicalContent>,
    F: Fn(&'a CanonicalContent) -> J,
    J: Iterator<Item = &'a str>,
{
    contents.flat_map(pick).collect::<Vec<_>>().join("\n")
}

fn join_parts<'a, I>(parts: I, pick: fn(&'a Part) -> Option<&'a str>) -> String
where
    I: Iterator<Item = &'a Part>,
{
    parts.filter_map(pick).collect::<Vec<_>>().join("\n")
}

fn collect_media<'a, I>(parts: I) -> Vec<Media>
where
    I: Iterator<Item = &'a Part>,
{
    parts
        .filter_map(|p| match p {
            Part::Media(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}
