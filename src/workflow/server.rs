use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};
use super::db::{DbHandle, SessionDb};
use super::github::GitHubClient;
use super::runner::WorkflowRunner;
use super::sandbox::DockerSandboxProvider;
use crate::config::Settings;

/// Where the webhook server listens. Defaults come from `Settings`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the store, wire the real collaborators and serve until Ctrl-C or
/// SIGTERM. In-flight runs finish before this returns.
pub async fn start_server(settings: Arc<Settings>, config: ServerConfig) -> Result<()> {
    settings.ensure_home()?;
    let db = SessionDb::new(&settings.db_path()).context("Failed to open session database")?;
    let db = DbHandle::new(db);

    let token = settings
        .credentials
        .gh_token
        .as_deref()
        .context("GH_TOKEN is not set")?;
    let gateway = Arc::new(GitHubClient::new(token)?);
    let sandboxes = Arc::new(DockerSandboxProvider::new(&settings)?);
    let runner = Arc::new(WorkflowRunner::new(
        settings.clone(),
        db.clone(),
        gateway,
        sandboxes,
    ));

    let state = Arc::new(AppState::new(settings.clone(), db, runner));
    let app = build_router(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        bot = %settings.github.bot_name,
        workers = settings.server.workers,
        "Webhook server listening"
    );
    if settings.auth.allowed_users.is_empty() {
        tracing::warn!("auth.allowed_users is empty; every trigger will be ignored");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.wait_for_runs().await;
    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
