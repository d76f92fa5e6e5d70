use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use capsem_core::error::{CapsemError, Result};
use capsem_core::FailureMode;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub providers: ProvidersSection,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            version: 1,
            gateway: GatewaySection::default(),
            providers: ProvidersSection::default(),
        }
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(CapsemError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.gateway.validate()?;
        self.providers.validate()?;

        Ok(())
    }

    /// Policy directory, with `PROXY_CONFIG_DIR` (passed in as `env_override`)
    /// taking precedence over `gateway.policy_dir`.
    pub fn policy_dir(&self, env_override: Option<&str>) -> Option<PathBuf> {
        match env_override.filter(|s| !s.trim().is_empty()) {
            Some(dir) => Some(PathBuf::from(dir)),
            None => self.gateway.policy_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default)]
    pub policy_dir: Option<PathBuf>,

    #[serde(default)]
    pub policy_failure_mode: FailureMode,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            policy_dir: None,
            policy_failure_mode: FailureMode::default(),
            request_timeout_ms: default_request_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if !(1000..=600000).contains(&self.request_timeout_ms) {
            return Err(CapsemError::Config(
                "gateway.request_timeout_ms must be between 1000 and 600000".into(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(CapsemError::Config(
                "gateway.max_body_bytes must be greater than 0".into(),
            ));
        }
        if self.policy_dir.as_deref().is_some_and(|p| p == Path::new("")) {
            return Err(CapsemError::Config("gateway.policy_dir must not be empty".into()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            CapsemError::Config(format!("gateway.listen must be a valid socket address: {e}"))
        })
    }
}

fn default_listen() -> String {
    "127.0.0.1:8000".into()
}
fn default_request_timeout_ms() -> u64 {
    60000
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidersSection {
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self {
            gemini_base_url: default_gemini_base_url(),
            openai_base_url: default_openai_base_url(),
        }
    }
}

impl ProvidersSection {
    pub fn validate(&self) -> Result<()> {
        for (key, url) in [
            ("providers.gemini_base_url", &self.gemini_base_url),
            ("providers.openai_base_url", &self.openai_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(CapsemError::Config(format!("{key} must be an http(s) URL")));
            }
        }
        Ok(())
    }
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".into()
}
