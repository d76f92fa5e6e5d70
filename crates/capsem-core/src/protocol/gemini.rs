//! Gemini generateContent wire format.
//!
//! Request: `{contents: [{role, parts: [...]}], systemInstruction?, tools?: [{functionDeclarations: [...]}]}`
//! Response: `{candidates: [{content: {parts: [...]}, finishReason}]}`
//!
//! Field names are accepted in both the camelCase and the proto snake_case
//! spelling. Unknown top-level fields (generation config, safety settings)
//! are forwarded as-is; unknown part payloads are dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CapsemError, Result};
use crate::model::{Media, MediaSource, Tool};

use super::{
    array_field, one_or_many, parse_entries, to_wire, CanonicalContent, CanonicalRequest,
    CanonicalResponse, Candidate, FunctionCall, FunctionResponse, Normalized, Normalizer, Part,
    Role, Skipped,
};

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<WirePart>>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(default, alias = "thought_signature", skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
    #[serde(default, alias = "function_call", skip_serializing_if = "Option::is_none")]
    pub function_call: Option<WireFunctionCall>,
    #[serde(default, alias = "function_response", skip_serializing_if = "Option::is_none")]
    pub function_response: Option<WireFunctionResponse>,
    #[serde(default, alias = "inline_data", skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(default, alias = "file_data", skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WireFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WireFunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(alias = "mime_type")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    #[serde(default, alias = "mime_type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(alias = "file_uri")]
    pub file_uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolEntry {
    #[serde(default, alias = "function_declarations")]
    function_declarations: Option<Vec<Value>>,
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
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default, alias = "finish_reason")]
    finish_reason: Option<String>,
    #[serde(default)]
    index: Option<usize>,
}

impl Content {
    fn into_canonical(self, default_role: Role) -> CanonicalContent {
        let role = self
            .role
            .as_deref()
            .map(Role::from_wire)
            .unwrap_or(default_role);
        let parts = self
            .parts
            .unwrap_or_default()
            .into_iter()
            .flat_map(WirePart::into_parts)
            .collect();
        CanonicalContent { role, parts }
    }

    /// Drop parts with no payload a policy can see.
    fn retain_known_parts(&mut self) {
        if let Some(parts) = self.parts.as_mut() {
            parts.retain(|p| !p.is_empty());
        }
    }

    fn has_parts(&self) -> bool {
        self.parts.as_ref().is_some_and(|p| !p.is_empty())
    }
}

impl WirePart {
    fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.function_call.is_none()
            && self.function_response.is_none()
            && self.inline_data.is_none()
            && self.file_data.is_none()
    }

    /// A wire part may carry several payloads at once; each becomes its own part.
    fn into_parts(self) -> Vec<Part> {
        let mut out = Vec::new();
        if let Some(text) = self.text {
            if self.thought.unwrap_or(false) {
                out.push(Part::Thought(text));
            } else {
                out.push(Part::Text(text));
            }
        }
        if let Some(call) = self.function_call {
            out.push(Part::FunctionCall(FunctionCall {
                name: call.name,
                args: call.args.unwrap_or_else(|| Value::Object(Default::default())),
            }));
        }
        if let Some(resp) = self.function_response {
            out.push(Part::FunctionResponse(FunctionResponse {
                name: resp.name,
                response: resp.response.unwrap_or_else(|| Value::Object(Default::default())),
            }));
        }
        if let Some(blob) = self.inline_data {
            out.push(Part::Media(Media::new(blob.mime_type, MediaSource::Inline(blob.data))));
        }
        if let Some(file) = self.file_data {
            out.push(Part::Media(Media::new(
                file.mime_type.unwrap_or_default(),
                MediaSource::Uri(file.file_uri),
            )));
        }
        out
    }
}

/// Declared function schemas from `tools[].functionDeclarations[]`, plus the
/// tool entries to forward with only the declarations that parsed.
fn parse_tools(tools: &[Value], skipped: &mut Vec<Skipped>) -> (Vec<Tool>, Vec<Value>) {
    let (entries, mut bad) = parse_entries::<ToolEntry>(tools, "tools");
    skipped.append(&mut bad);

    let mut declared = Vec::new();
    let mut forward = Vec::with_capacity(entries.len());
    for (i, entry) in entries {
        let Some(Value::Object(mut raw)) = tools.get(i).cloned() else {
            skipped.push(Skipped {
                location: format!("tools[{i}]"),
                reason: "tool entry is not an object".into(),
            });
            continue;
        };
        raw.remove("functionDeclarations");
        raw.remove("function_declarations");

        // Non-function tools (search, code execution) have no declarations.
        if let Some(decls) = entry.function_declarations {
            let label = format!("tools[{i}].functionDeclarations");
            let (parsed, mut bad) = parse_entries::<FunctionDeclaration>(&decls, &label);
            skipped.append(&mut bad);

            let mut kept = Vec::with_capacity(parsed.len());
            for (j, d) in parsed {
                declared.push(Tool::from_declaration(
                    d.name.as_deref(),
                    d.description.as_deref(),
                    d.parameters,
                ));
                kept.extend(decls.get(j).cloned());
            }
            raw.insert("functionDeclarations".into(), Value::Array(kept));
        }
        forward.push(Value::Object(raw));
    }
    (declared, forward)
}

#[derive(Debug, Default)]
pub struct GeminiNormalizer;

impl GeminiNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Normalizer for GeminiNormalizer {
    fn protocol(&self) -> &'static str {
        "gemini"
    }

    fn agent_instructions(&self) -> &'static str {
        "Gemini API proxy user"
    }

    fn normalize_request(&self, body: &Value) -> Result<Normalized> {
        let Value::Object(fields) = body else {
            return Err(CapsemError::BadRequest("request body must be a JSON object".into()));
        };
        let raw_contents = array_field(body, "contents")
            .ok_or_else(|| CapsemError::BadRequest("contents must be an array".into()))?;
        let raw_tools = array_field(body, "tools")
            .ok_or_else(|| CapsemError::BadRequest("tools must be an array".into()))?;

        let mut req = CanonicalRequest::default();
        let mut upstream: Map<String, Value> = fields.clone();

        let camel = upstream.remove("systemInstruction");
        let snake = upstream.remove("system_instruction");
        if let Some(sys) = camel.or(snake).filter(|v| !v.is_null()) {
            match Content::deserialize(&sys) {
                Ok(mut c) => {
                    c.retain_known_parts();
                    if c.has_parts() {
                        upstream.insert("systemInstruction".into(), to_wire(&c)?);
                    }
                    req.contents.push(c.into_canonical(Role::System));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed systemInstruction");
                    req.skipped.push(Skipped {
                        location: "systemInstruction".into(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let (contents, mut bad) = parse_entries::<Content>(raw_contents, "contents");
        req.skipped.append(&mut bad);
        let mut forward = Vec::with_capacity(contents.len());
        for (_, mut c) in contents {
            c.retain_known_parts();
            if c.has_parts() {
                forward.push(to_wire(&c)?);
            }
            req.contents.push(c.into_canonical(Role::User));
        }
        if fields.get("contents").is_some_and(Value::is_array) {
            upstream.insert("contents".into(), Value::Array(forward));
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
        let raw = array_field(body, "candidates").ok_or_else(|| {
            CapsemError::InvalidUpstreamResponse("candidates must be an array".into())
        })?;

        let (candidates, skipped) = parse_entries::<WireCandidate>(raw, "candidates");
        let mut resp = CanonicalResponse {
            candidates: Vec::with_capacity(candidates.len()),
            skipped,
        };

        for (i, cand) in candidates {
            // Metadata-only candidates (e.g. safety-filtered) carry no content.
            let Some(content) = cand.content else {
                tracing::debug!(candidate = i, "candidate without content");
                continue;
            };
            if content.parts.as_ref().map_or(true, Vec::is_empty) {
                tracing::debug!(candidate = i, "candidate without parts");
                continue;
            }
            let canonical = content.into_canonical(Role::Model);
            resp.candidates.push(Candidate {
                index: cand.index.unwrap_or(i),
                parts: canonical.parts,
                finish_reason: cand.finish_reason,
            });
        }
        Ok(resp)
    }
}
