use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinSet;

use super::db::DbHandle;
use super::dispatch::{self, WebhookPayload};
use super::models::{ParsedCommand, SessionStatus};
use super::runner::WorkflowRunner;
use super::signature::{SIGNATURE_HEADER, verify_signature};
use crate::config::Settings;
use crate::errors::{StoreError, WebhookError};

pub const EVENT_HEADER: &str = "x-github-event";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DbHandle,
    pub runner: Arc<WorkflowRunner>,
    runs: Mutex<JoinSet<()>>,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, db: DbHandle, runner: Arc<WorkflowRunner>) -> Self {
        Self {
            settings,
            db,
            runner,
            runs: Mutex::new(JoinSet::new()),
        }
    }

    /// Wait for every background run to finalize and tear down its sandbox.
    pub async fn wait_for_runs(&self) {
        let mut runs = {
            let mut guard = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        if !runs.is_empty() {
            tracing::info!(runs = runs.len(), "Waiting for in-flight runs");
        }
        while let Some(joined) = runs.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Workflow task failed: {}", e);
            }
        }
    }

    /// Run a command in the background. A run refused by the active-run guard
    /// is reported on the thread.
    fn spawn_run(&self, cmd: ParsedCommand) {
        let runner = self.runner.clone();
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        while runs.try_join_next().is_some() {}
        runs.spawn(run_in_background(runner, cmd));
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListSessionsQuery {
    pub repo: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        let message = match &err {
            WebhookError::InvalidJson(_) => "Invalid JSON".to_string(),
            _ => err.to_string(),
        };
        match err {
            WebhookError::SecretNotConfigured => ApiError::Internal(message),
            WebhookError::MissingSignature | WebhookError::InvalidSignature => {
                ApiError::Unauthorized(message)
            }
            WebhookError::MissingEventHeader | WebhookError::InvalidJson(_) => {
                ApiError::BadRequest(message)
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/webhook", post(webhook))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_session))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn ignored(reason: &str) -> Json<Value> {
    Json(json!({"status": "ignored", "reason": reason}))
}

async fn run_in_background(runner: Arc<WorkflowRunner>, cmd: ParsedCommand) {
    let Err(e) = runner.execute(cmd.clone()).await else {
        return;
    };
    match e.downcast_ref::<StoreError>() {
        Some(StoreError::RunAlreadyActive { session_id, .. }) => {
            tracing::warn!(repo = %cmd.repo, number = cmd.target_number(), session = %session_id, "Run already active");
            let body = format!(
                "⏳ A workflow is already running here (session `{}`). Try again when it finishes.",
                session_id
            );
            if let Err(e) = runner
                .gateway()
                .create_comment(&cmd.repo, cmd.target_number(), &body)
                .await
            {
                tracing::warn!("Failed to post busy notice: {:#}", e);
            }
        }
        _ => tracing::error!(repo = %cmd.repo, "Failed to start workflow: {:#}", e),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn root() -> Json<Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

async fn webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = verify_signature(
        state.settings.credentials.webhook_secret.as_deref(),
        signature,
        &body,
    ) {
        tracing::warn!("Rejected webhook: {}", e);
        return Err(e.into());
    }

    let event_type = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingEventHeader)?;
    let payload: WebhookPayload =
        serde_json::from_slice(&body).map_err(WebhookError::InvalidJson)?;

    let Some(event) = dispatch::parse_webhook_event(event_type, &payload) else {
        return Ok(ignored("not a comment event"));
    };

    let bot_name = &state.settings.github.bot_name;
    let Some(cmd) = dispatch::parse_trigger(&event, bot_name, &state.settings.auth.allowed_users)
    else {
        return Ok(ignored("no valid command"));
    };

    if let Some(message) = dispatch::validate_context(&cmd, bot_name) {
        tracing::info!(repo = %cmd.repo, command = %cmd.command, "Rejected command: {}", message);
        if let Err(e) = state
            .runner
            .gateway()
            .create_comment(&cmd.repo, cmd.target_number(), &format!("❌ {}", message))
            .await
        {
            tracing::warn!("Failed to post validation error: {:#}", e);
        }
        return Ok(Json(json!({"status": "error", "message": message})));
    }

    tracing::info!(
        repo = %cmd.repo,
        command = %cmd.command,
        issue = cmd.issue_number,
        pr = ?cmd.pr_number,
        author = %cmd.author,
        "Accepted command"
    );
    let response = json!({
        "status": "accepted",
        "command": cmd.command,
        "repo": cmd.repo,
        "issue": cmd.issue_number,
        "pr": cmd.pr_number,
    });
    state.spawn_run(cmd);
    Ok(Json(response))
}

async fn list_sessions(
    State(state): State<SharedState>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(SessionStatus::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let repo = query.repo;
    let limit = query.limit.unwrap_or(50);
    let sessions = state
        .db
        .call(move |db| db.list_sessions(repo.as_deref(), status, limit))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(sessions))
}

async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lookup = id.clone();
    let session = state
        .db
        .call(move |db| db.get_session(&lookup))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match session {
        Some(session) => Ok(Json(session)),
        None => Err(ApiError::NotFound(format!("Session {} not found", id))),
    }
}
