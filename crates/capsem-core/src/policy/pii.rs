//! PII detection policy.
//!
//! Detects a fixed set of entity kinds with regular expressions and maps each
//! detected kind to the verdict configured in `[entity_decisions]`. Kinds
//! absent from the mapping are not scanned for.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{CapsemError, Result};
use crate::model::{render_args, Agent, Decision, InvocationId, Media, Reason, Tool, Verdict};

use super::{ConfigurablePolicy, Policy, PolicyConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    EmailAddress,
    CreditCard,
    PhoneNumber,
    UsSsn,
    IpAddress,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::EmailAddress => "EMAIL_ADDRESS",
            EntityKind::CreditCard => "CREDIT_CARD",
            EntityKind::PhoneNumber => "PHONE_NUMBER",
            EntityKind::UsSsn => "US_SSN",
            EntityKind::IpAddress => "IP_ADDRESS",
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            EntityKind::EmailAddress => r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
            EntityKind::CreditCard => r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
            EntityKind::PhoneNumber => {
                r"(?:\+\d{1,3}[-.\s]?)?\(?\b\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b"
            }
            EntityKind::UsSsn => r"\b\d{3}-\d{2}-\d{4}\b",
            EntityKind::IpAddress => {
                r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b"
            }
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct PiiSettings {
    #[serde(default = "yes")]
    enabled: bool,
    #[serde(default = "yes")]
    check_prompts: bool,
    #[serde(default = "yes")]
    check_responses: bool,
    #[serde(default = "yes")]
    check_tool_args: bool,
    #[serde(default = "yes")]
    check_tool_responses: bool,
    #[serde(default)]
    entity_decisions: BTreeMap<EntityKind, Verdict>,
}

fn yes() -> bool {
    true
}

struct Detector {
    kind: EntityKind,
    verdict: Verdict,
    re: Regex,
}

pub struct PiiPolicy {
    detectors: Vec<Detector>,
    check_prompts: bool,
    check_responses: bool,
    check_tool_args: bool,
    check_tool_responses: bool,
}

impl PiiPolicy {
    /// Policy scanning every location with the given entity decisions.
    pub fn new(entity_decisions: BTreeMap<EntityKind, Verdict>) -> Result<Self> {
        let mut detectors = Vec::with_capacity(entity_decisions.len());
        for (kind, verdict) in entity_decisions {
            let re = Regex::new(kind.pattern())
                .map_err(|e| CapsemError::Internal(format!("pii pattern {kind}: {e}")))?;
            detectors.push(Detector { kind, verdict, re });
        }
        Ok(Self {
            detectors,
            check_prompts: true,
            check_responses: true,
            check_tool_args: true,
            check_tool_responses: true,
        })
    }

    /// Entity kinds found in `text`, in detector order.
    pub fn detect(&self, text: &str) -> Vec<EntityKind> {
        self.detectors
            .iter()
            .filter(|d| d.re.is_match(text))
            .map(|d| d.kind)
            .collect()
    }

    fn evaluate(&self, text: &str, location: &str) -> Decision {
        let hits: Vec<&Detector> = self.detectors.iter().filter(|d| d.re.is_match(text)).collect();
        let strongest = hits.iter().map(|d| d.verdict).max().unwrap_or(Verdict::Allow);
        if strongest == Verdict::Allow {
            return Decision::safe();
        }

        let kinds = hits
            .iter()
            .filter(|d| d.verdict == strongest)
            .map(|d| d.kind.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Decision::new(
            strongest,
            Reason::SensitiveData,
            format!("Detected {kinds} in {location}"),
        )
    }
}

#[async_trait]
impl Policy for PiiPolicy {
    fn name(&self) -> &str {
        "PIIDetection"
    }

    fn description(&self) -> &str {
        "Detects personally identifiable information and applies the configured verdict per entity kind."
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
        if !self.check_prompts {
            return Ok(Decision::safe());
        }
        Ok(self.evaluate(prompt, "prompt"))
    }

    async fn on_model_response(
        &self,
        _invocation_id: &InvocationId,
        _agent: &Agent,
        response: &str,
        _thoughts: &str,
        _media: &[Media],
    ) -> Result<Decision> {
        if !self.check_responses {
            return Ok(Decision::safe());
        }
        Ok(self.evaluate(response, "model response"))
    }

    async fn on_tool_call(
        &self,
        _invocation_id: &InvocationId,
        _agent: &Agent,
        _tool: &Tool,
        args: &Value,
    ) -> Result<Decision> {
        if !self.check_tool_args {
            return Ok(Decision::safe());
        }
        Ok(self.evaluate(&render_args(args), "tool arguments"))
    }

    async fn on_tool_response(
        &self,
        _invocation_id: &InvocationId,
        _agent: &Agent,
        _tool: &Tool,
        response: &Value,
    ) -> Result<Decision> {
        if !self.check_tool_responses {
            return Ok(Decision::safe());
        }
        Ok(self.evaluate(&response.to_string(), "tool response"))
    }
}

impl ConfigurablePolicy for PiiPolicy {
    const CONFIG_NAME: &'static str = "pii";

    fn from_config(config: &PolicyConfig) -> Result<Option<Self>> {
        let settings: PiiSettings = config.settings()?;
        if !settings.enabled {
            return Ok(None);
        }
        let mut policy = Self::new(settings.entity_decisions)?;
        policy.check_prompts = settings.check_prompts;
        policy.check_responses = settings.check_responses;
        policy.check_tool_args = settings.check_tool_args;
        policy.check_tool_responses = settings.check_tool_responses;
        Ok(Some(policy))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn policy(src: &str) -> PiiPolicy {
        PiiPolicy::from_config(&PolicyConfig::parse(src).unwrap())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn detects_configured_kinds_only() {
        let p = policy("[entity_decisions]\nEMAIL_ADDRESS = \"BLOCK\"\n");
        assert_eq!(p.detect("mail bob@example.com from 10.0.0.1"), vec![EntityKind::EmailAddress]);
    }

    #[test]
    fn strongest_verdict_wins() {
        let p = policy(
            "[entity_decisions]\nEMAIL_ADDRESS = \"CONFIRM\"\nCREDIT_CARD = \"BLOCK\"\n",
        );
        let d = p.evaluate("bob@example.com 4111 1111 1111 1111", "prompt");
        assert_eq!(d.verdict(), Verdict::Block);
        assert_eq!(d.details(), "Detected CREDIT_CARD in prompt");

        let d = p.evaluate("bob@example.com", "prompt");
        assert_eq!(d.verdict(), Verdict::Confirm);
        assert_eq!(d.reason(), Reason::SensitiveData);
    }

    #[test]
    fn unknown_entity_kind_is_config_error() {
        let cfg = PolicyConfig::parse("[entity_decisions]\nSHOE_SIZE = \"BLOCK\"\n").unwrap();
        assert!(PiiPolicy::from_config(&cfg).is_err());
    }

    #[test]
    fn disabled_fragment_yields_none() {
        let cfg = PolicyConfig::parse("enabled = false\n").unwrap();
        assert!(PiiPolicy::from_config(&cfg).unwrap().is_none());
    }
}
