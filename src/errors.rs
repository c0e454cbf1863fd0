//! Typed error hierarchy for aidw.
//!
//! Three top-level enums cover the three seams where callers need to match:
//! - `StoreError`: session store invariants (lookups, transitions, run guard)
//! - `WorkflowError`: failures inside an orchestrated run
//! - `WebhookError`: inbound webhook rejections, mapped to HTTP statuses

use thiserror::Error;

use crate::workflow::models::SessionStatus;

/// Errors from the session store.
///
/// Store methods return `anyhow::Result`; these values travel inside the
/// `anyhow::Error` and can be recovered with `downcast_ref::<StoreError>()`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session {id} not found")]
    SessionNotFound { id: String },

    #[error("Session {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Session {session_id} is already active for {repo}#{number}")]
    RunAlreadyActive {
        repo: String,
        number: i64,
        session_id: String,
    },
}

/// Errors from a single workflow run. Rendered verbatim into `Session.error`
/// and the failure comment.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Claude Code failed: {message}")]
    Agent { message: String },

    #[error("Review file {file} not found in sandbox")]
    MissingArtifact { file: String },

    #[error("Failed to {operation}: {stderr}")]
    Git { operation: String, stderr: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

/// Rejections on the inbound webhook endpoint, raised before any session exists.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook secret not configured")]
    SecretNotConfigured,

    #[error("Missing signature header")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Missing event header")]
    MissingEventHeader,

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
}
