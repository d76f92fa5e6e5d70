//! Policy registry / loader.
//!
//! A configuration directory holds one TOML fragment per policy, named after
//! the policy type (`debug.toml`, `pii.toml`). Fragments are applied in file
//! name order; the resulting order is the evaluation order. An invalid
//! fragment is skipped with an error log; the others still load.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::{CapsemError, Result};
use crate::manager::{FailureMode, SecurityManager};
use crate::policy::{ConfigurablePolicy, DebugPolicy, PiiPolicy, Policy, PolicyConfig};

type Factory = fn(&PolicyConfig) -> Result<Option<Arc<dyn Policy>>>;

fn build<P: ConfigurablePolicy>(config: &PolicyConfig) -> Result<Option<Arc<dyn Policy>>> {
    Ok(P::from_config(config)?.map(|p| Arc::new(p) as Arc<dyn Policy>))
}

/// Known policy types, keyed by fragment stem.
fn registry() -> [(&'static str, Factory); 2] {
    [
        (DebugPolicy::CONFIG_NAME, build::<DebugPolicy> as Factory),
        (PiiPolicy::CONFIG_NAME, build::<PiiPolicy> as Factory),
    ]
}

/// Names of the fragment stems the loader understands.
pub fn known_policy_names() -> Vec<&'static str> {
    registry().iter().map(|(name, _)| *name).collect()
}

/// Build one policy from a named fragment. `Ok(None)` for disabled or unknown.
pub fn build_policy(name: &str, config: &PolicyConfig) -> Result<Option<Arc<dyn Policy>>> {
    match registry().iter().find(|(n, _)| *n == name) {
        Some((_, factory)) => factory(config),
        None => {
            tracing::warn!(fragment = %name, "unknown policy fragment, skipping");
            Ok(None)
        }
    }
}

fn load_fragment(path: &Path, stem: &str) -> Result<Option<Arc<dyn Policy>>> {
    let src = fs::read_to_string(path)
        .map_err(|e| CapsemError::Config(format!("read {} failed: {e}", path.display())))?;
    let config = PolicyConfig::parse(&src)
        .map_err(|e| CapsemError::Config(format!("{}: {e}", path.display())))?;
    build_policy(stem, &config)
}

/// Load every enabled policy from `dir`. May return a manager with no policies.
///
/// Fails only when the directory itself cannot be listed.
pub fn load_policies_from_directory(dir: &Path, failure_mode: FailureMode) -> Result<SecurityManager> {
    let entries = fs::read_dir(dir)
        .map_err(|e| CapsemError::Config(format!("read policy dir {} failed: {e}", dir.display())))?;

    let mut fragments = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| CapsemError::Config(format!("read policy dir entry failed: {e}")))?
            .path();
        if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            fragments.push(path);
        }
    }
    fragments.sort();

    let mut policies = Vec::with_capacity(fragments.len());
    for path in fragments {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match load_fragment(&path, stem) {
            Ok(Some(policy)) => {
                tracing::info!(policy = policy.name(), fragment = %path.display(), "policy loaded");
                policies.push(policy);
            }
            Ok(None) => tracing::info!(fragment = %path.display(), "policy fragment disabled or unknown"),
            Err(e) => tracing::error!(fragment = %path.display(), error = %e, "invalid policy fragment, skipping"),
        }
    }

    Ok(SecurityManager::new(policies, failure_mode))
}

impl SecurityManager {
    /// Process-startup entry point. Falls back to the debug policy alone when
    /// the directory is absent, unreadable, or enables nothing valid.
    pub fn from_config_dir(dir: Option<&Path>, failure_mode: FailureMode) -> Self {
        let Some(dir) = dir else {
            tracing::info!("no policy config directory specified, using default Debug policy");
            return Self::with_default_policy(failure_mode);
        };

        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "policy config directory not found, using default Debug policy");
            return Self::with_default_policy(failure_mode);
        }

        match load_policies_from_directory(dir, failure_mode) {
            Ok(manager) if !manager.policies().is_empty() => manager,
            Ok(_) => {
                tracing::warn!(dir = %dir.display(), "no enabled policies, using default Debug policy");
                Self::with_default_policy(failure_mode)
            }
            Err(e) => {
                tracing::error!(dir = %dir.display(), error = %e, "failed to load policies, using default Debug policy");
                Self::with_default_policy(failure_mode)
            }
        }
    }
}
