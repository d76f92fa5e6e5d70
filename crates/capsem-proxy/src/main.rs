//! CAPSEM proxy binary.
//!
//! - Gemini: /v1beta/models/{model}:generateContent, :streamGenerateContent
//! - OpenAI: /v1/chat/completions
//! - Ops: /health, /healthz, /readyz, /metrics

use std::env;

use tracing_subscriber::{fmt, EnvFilter};

use capsem_proxy::error::StartupError;
use capsem_proxy::{app_state, config, router};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env::var("CAPSEM_LOG_JSON").is_ok_and(|v| v == "1") {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

async fn run() -> Result<(), StartupError> {
    let path = env::var(config::CONFIG_PATH_ENV)
        .unwrap_or_else(|_| config::DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::load_or_default(&path)?;
    let listen = cfg.gateway.listen_addr()?;

    let policy_dir = cfg.policy_dir(env::var(config::POLICY_DIR_ENV).ok().as_deref());
    let state = app_state::AppState::new(cfg, policy_dir.as_deref())?;
    let metrics = state.metrics();
    let app = router::build_router(state);

    tracing::info!(%listen, "capsem-proxy starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|source| StartupError::Bind { addr: listen, source })?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "ctrl_c handler unavailable, graceful shutdown disabled");
                std::future::pending::<()>().await;
            }
            metrics.set_draining();
            tracing::info!("shutdown signal received, draining");
        })
        .await
        .map_err(StartupError::Serve)
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        tracing::error!(error = %e, "capsem-proxy failed");
        std::process::exit(1);
    }
}
