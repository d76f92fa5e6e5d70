//! Proxy config loader (strict parsing).

pub mod schema;

use std::fs;
use std::io::ErrorKind;

use capsem_core::error::{CapsemError, Result};

pub use schema::{GatewaySection, ProvidersSection, ProxyConfig};

/// Env var naming the YAML config file.
pub const CONFIG_PATH_ENV: &str = "CAPSEM_PROXY_CONFIG";
/// Env var overriding `gateway.policy_dir`.
pub const POLICY_DIR_ENV: &str = "PROXY_CONFIG_DIR";
pub const DEFAULT_CONFIG_PATH: &str = "capsem-proxy.yaml";

pub fn load_from_file(path: &str) -> Result<ProxyConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| CapsemError::Config(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

/// Like [`load_from_file`], but a missing file yields the defaults.
pub fn load_or_default(path: &str) -> Result<ProxyConfig> {
    match fs::read_to_string(path) {
        Ok(s) => load_from_str(&s),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!(%path, "config file not found, using defaults");
            Ok(ProxyConfig::default())
        }
        Err(e) => Err(CapsemError::Config(format!("read config {path} failed: {e}"))),
    }
}

pub fn load_from_str(s: &str) -> Result<ProxyConfig> {
    let cfg: ProxyConfig = serde_yaml::from_str(s)
        .map_err(|e| CapsemError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
