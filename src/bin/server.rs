//! sme-eval HTTP server binary.
//!
//! Starts an axum HTTP server exposing the evaluation endpoints.
//!
//! # Environment Variables
//!
//! - `PORT` - HTTP port (default: 9777)
//! - `MODEL_PROVIDER` - `gpt` (default) or `claude`
//! - `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` / `LITELLM_PROXY_URL` - evaluator access
//! - `AGENTS_CONFIG_DIR` - directory of metric criteria overrides
//! - `RUST_LOG` - Tracing filter (default: "info,sme_eval=debug")
//!
//! All settings are listed in [`sme_eval::config::Settings`].
//!
//! # Usage
//!
//! ```bash
//! OPENAI_API_KEY=... cargo run --bin server
//! ```

use std::sync::Arc;

use anyhow::Context;
use sme_eval::config::Settings;
use sme_eval::evaluation::EvaluationService;
use sme_eval::llm::ChatEvaluator;
use sme_eval::metrics::CriteriaSet;
use sme_eval::server::{app_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sme_eval=debug".into()),
        )
        .init();

    let settings = Settings::from_env().context("failed to load settings")?;
    let criteria = CriteriaSet::load_dir(&settings.agents_config_dir)
        .context("failed to load metric criteria")?;
    let evaluator = ChatEvaluator::new(settings.evaluator_config())
        .context("failed to build evaluator client")?;

    let service = Arc::new(EvaluationService::new(
        settings.service_options().context("invalid timeout settings")?,
        Arc::new(evaluator),
        Arc::new(criteria),
    ));
    // A failed start is not fatal: every request retries it.
    if let Err(e) = service.start().await {
        tracing::error!(error = %e, "evaluation runtime failed to start");
    }

    let bind_addr = format!("{}:{}", settings.host, settings.port);
    tracing::info!(
        provider = %settings.model_provider,
        model = settings.default_model(),
        max_concurrent = settings.max_concurrent_evaluations,
        "sme-eval server starting on {}",
        bind_addr
    );

    let app = app_router(AppState::new(Arc::clone(&service), settings));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    service.shutdown().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
