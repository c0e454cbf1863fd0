//! Workflow engine: GitHub comment triggers to AI coding runs.
//!
//! ## Overview
//!
//! A collaborator comments `@aidw <command> [instruction]` on an issue or pull
//! request. The webhook server verifies and parses the event, and the runner
//! executes the command inside a throwaway container holding a clone of the
//! repository. Progress is mirrored into a single comment on the thread and
//! every run is recorded as a `Session` in SQLite.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐ webhook ┌──────────────────────────────────────────────────┐
//! │  GitHub  │ ──────> │  server.rs  (axum Router, TraceLayer)            │
//! │          │         │    └─ api.rs  (handlers, AppState)               │
//! │          │         │         │ signature.rs → dispatch.rs             │
//! │          │         │         v                                        │
//! │          │         │  runner.rs  (WorkflowRunner, one run per task)   │
//! │          │ <────── │         │ context.rs → prompts.rs               │
//! │          │ comments│         │ progress.rs (status comment)          │
//! │          │   + PRs │         v                                        │
//! │          │         │  commands.rs  (per-command bodies)               │
//! │          │         │         │ agent.rs, git.rs                      │
//! │          │         │         v                                        │
//! │          │         │  sandbox.rs  (ExecutionSession, Docker backend)  │
//! └──────────┘         └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                           |
//! |-------------|----------------------------------------------------------|
//! | `models`    | `CommandKind`, `ParsedCommand`, `Session`, status rules  |
//! | `db`        | SQLite session store via `DbHandle` (`Arc<Mutex<_>>`)    |
//! | `github`    | `Gateway` trait + `GitHubClient` (REST via `reqwest`)    |
//!
//! ## Run sequence
//!
//! 1. Open a PENDING session (refused if another run is active on the thread).
//! 2. React 👀, post the progress comment, move to RUNNING.
//! 3. Build the context, pick the branch, create the execution session.
//! 4. Run the command body, push if the command's policy says so.
//! 5. Record COMPLETED or FAILED once, update the comment, react 🚀 or 😕.
//! 6. Destroy the execution session.

pub mod agent;
pub mod api;
pub mod commands;
pub mod context;
pub mod db;
pub mod dispatch;
pub mod git;
pub mod github;
pub mod models;
pub mod progress;
pub mod prompts;
pub mod runner;
pub mod sandbox;
pub mod server;
pub mod signature;
