//! Shared application state for the CAPSEM proxy.
//!
//! Built once at startup. The security manager and upstream client are
//! shared read-only across all request tasks.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use capsem_core::error::Result;
use capsem_core::protocol::{GeminiNormalizer, Normalizer, OpenAiNormalizer};
use capsem_core::SecurityManager;

use crate::config::ProxyConfig;
use crate::obs::metrics::ProxyMetrics;
use crate::upstream::{HttpUpstream, Provider, UpstreamClient};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: ProxyConfig,
    manager: Arc<SecurityManager>,
    upstream: Arc<dyn UpstreamClient>,
    metrics: Arc<ProxyMetrics>,
    gemini: GeminiNormalizer,
    openai: OpenAiNormalizer,
}

impl AppState {
    /// Production wiring: policies from `policy_dir`, `reqwest` upstream.
    pub fn new(cfg: ProxyConfig, policy_dir: Option<&Path>) -> Result<Self> {
        let manager = SecurityManager::from_config_dir(policy_dir, cfg.gateway.policy_failure_mode);
        tracing::info!(policies = ?manager.policy_names(), "security manager ready");

        let upstream = HttpUpstream::new(
            &cfg.providers,
            Duration::from_millis(cfg.gateway.request_timeout_ms),
        )?;
        Ok(Self::with_parts(cfg, Arc::new(manager), Arc::new(upstream)))
    }

    /// Explicit wiring, used by tests to inject managers and upstreams.
    pub fn with_parts(
        cfg: ProxyConfig,
        manager: Arc<SecurityManager>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                cfg,
                manager,
                upstream,
                metrics: Arc::new(ProxyMetrics::default()),
                gemini: GeminiNormalizer::new(),
                openai: OpenAiNormalizer::new(),
            }),
        }
    }

    pub fn cfg(&self) -> &ProxyConfig {
        &self.inner.cfg
    }

    pub fn manager(&self) -> &SecurityManager {
        &self.inner.manager
    }

    pub fn upstream(&self) -> &dyn UpstreamClient {
        self.inner.upstream.as_ref()
    }

    pub fn normalizer(&self, provider: Provider) -> &dyn Normalizer {
        match provider {
            Provider::Gemini => &self.inner.gemini,
            Provider::OpenAi => &self.inner.openai,
        }
    }

    pub fn metrics(&self) -> Arc<ProxyMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn is_draining(&self) -> bool {
        self.inner.metrics.is_draining()
    }

    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        vec![(
            "capsem_policies_loaded",
            self.inner.manager.policies().len() as u64,
        )]
    }
}
