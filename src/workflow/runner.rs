//! Runs one command end to end: session record, progress comment,
//! execution session, command body, and a single finalization step.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::TimeDelta;
use tokio::sync::Semaphore;
use tracing::Instrument;

use super::agent::AgentRunner;
use super::commands::{self, RunScope, WorkflowOutcome};
use super::context::{ContextBuilder, TriggerInfo};
use super::db::DbHandle;
use super::git;
use super::github::{Gateway, Reaction};
use super::models::{CommandKind, NewSession, ParsedCommand, Session, SessionStatus, SessionUpdate};
use super::progress::{ProgressReporter, ProgressTracker, StepStatus};
use super::sandbox::{ExecutionSession, SandboxProvider, SessionSpec};
use crate::config::Settings;
use crate::errors::{StoreError, WorkflowError};

pub const BRANCH_PREFIX: &str = "aidw";
pub const MANUAL_AUTHOR: &str = "manual";

/// Branch a run works on: the PR's branch when operating on a PR, otherwise
/// a fresh per-issue branch.
pub fn branch_name(cmd: &ParsedCommand, pr_branch: Option<&str>) -> String {
    match (cmd.pr_number, pr_branch) {
        (Some(_), Some(branch)) => branch.to_string(),
        _ => format!("{}/issue-{}", BRANCH_PREFIX, cmd.issue_number),
    }
}

pub struct WorkflowRunner {
    settings: Arc<Settings>,
    db: DbHandle,
    gateway: Arc<dyn Gateway>,
    sandboxes: Arc<dyn SandboxProvider>,
    agent: AgentRunner,
    permits: Semaphore,
}

impl WorkflowRunner {
    pub fn new(
        settings: Arc<Settings>,
        db: DbHandle,
        gateway: Arc<dyn Gateway>,
        sandboxes: Arc<dyn SandboxProvider>,
    ) -> Self {
        let agent = AgentRunner::new(Duration::from_secs(settings.sandbox.agent_timeout_secs));
        let permits = Semaphore::new(settings.server.workers.max(1));
        Self {
            settings,
            db,
            gateway,
            sandboxes,
            agent,
            permits,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// The command a CLI invocation stands for. No comment id, so no reactions.
    pub fn manual_command(
        &self,
        kind: CommandKind,
        repo: &str,
        number: i64,
        instruction: &str,
    ) -> ParsedCommand {
        let instruction = instruction.trim().to_string();
        let body = format!("@{} {} {}", self.settings.github.bot_name, kind, instruction)
            .trim()
            .to_string();
        ParsedCommand {
            command: kind,
            instruction,
            author: MANUAL_AUTHOR.to_string(),
            body,
            repo: repo.to_string(),
            issue_number: number,
            pr_number: kind.is_pr_only().then_some(number),
            comment_id: 0,
        }
    }

    pub async fn execute_manual(
        &self,
        kind: CommandKind,
        repo: &str,
        number: i64,
        instruction: &str,
    ) -> Result<Session> {
        self.execute(self.manual_command(kind, repo, number, instruction))
            .await
    }

    /// Run a command to a terminal state and return the final session.
    ///
    /// Failures inside the run are recorded on the session, not returned.
    /// `Err` means no session could be opened (store failure or a run already
    /// active on the same thread).
    pub async fn execute(&self, cmd: ParsedCommand) -> Result<Session> {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("Workflow runner is shut down")?;

        let new = NewSession::from(&cmd);
        let stale_after = i64::try_from(self.settings.sandbox.lifetime_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let session = self
            .db
            .call(move |db| db.create_session_exclusive(&new, stale_after))
            .await?;

        let span = tracing::info_span!(
            "workflow",
            session = %session.id,
            command = %cmd.command,
            repo = %cmd.repo,
            number = cmd.target_number(),
        );
        self.run_session(&cmd, &session.id).instrument(span).await;

        let id = session.id.clone();
        self.db
            .call(move |db| db.get_session(&id))
            .await?
            .ok_or_else(|| StoreError::SessionNotFound { id: session.id }.into())
    }

    async fn run_session(&self, cmd: &ParsedCommand, session_id: &str) {
        tracing::info!(author = %cmd.author, "Workflow started");
        self.react(cmd, Reaction::Eyes).await;

        let tracker = ProgressTracker::new(cmd.command, session_id, cmd.command.steps());
        let mut reporter = ProgressReporter::new(
            self.gateway.clone(),
            cmd.repo.clone(),
            cmd.target_number(),
            tracker,
        );

        let mut execution: Option<Box<dyn ExecutionSession>> = None;
        let result = self
            .run_steps(cmd, session_id, &mut reporter, &mut execution)
            .await;
        self.finalize(cmd, session_id, &mut reporter, result).await;

        if let Some(sandbox) = execution {
            match sandbox.destroy().await {
                Ok(()) => tracing::debug!(sandbox = sandbox.id(), "Execution session destroyed"),
                Err(e) => tracing::warn!(sandbox = sandbox.id(), "Failed to destroy execution session: {:#}", e),
            }
        }
    }

    async fn run_steps(
        &self,
        cmd: &ParsedCommand,
        session_id: &str,
        reporter: &mut ProgressReporter,
        execution: &mut Option<Box<dyn ExecutionSession>>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        reporter.start().await?;
        self.update(session_id, SessionUpdate::status(SessionStatus::Running))
            .await?;

        let mut ctx = ContextBuilder::new(self.gateway.as_ref())
            .build(
                &cmd.repo,
                cmd.issue_number,
                cmd.pr_number,
                TriggerInfo::from(cmd),
            )
            .await?;

        let branch = branch_name(cmd, ctx.pr.as_ref().map(|pr| pr.branch.as_str()));
        let spec = SessionSpec {
            repo: cmd.repo.clone(),
            branch: cmd.pr_number.map(|_| branch.clone()),
        };
        let sandbox: &dyn ExecutionSession = &**execution.insert(self.sandboxes.create(&spec).await?);
        tracing::info!(sandbox = sandbox.id(), branch = %branch, "Execution session ready");
        self.update(session_id, SessionUpdate::execution(sandbox.id(), branch.as_str()))
            .await?;

        if cmd.pr_number.is_none() {
            git::create_branch(sandbox, &branch).await?;
        }
        ctx.git_state = Some(git::git_state(sandbox).await?);

        let mut scope = RunScope {
            gateway: self.gateway.as_ref(),
            session: sandbox,
            agent: &self.agent,
            reporter,
            ctx: &ctx,
            repo: &cmd.repo,
            branch: &branch,
        };
        let outcome = commands::run_body(cmd.command, &mut scope).await?;

        if cmd.command.should_push() && !outcome.pushed {
            // The push is the last checklist step.
            let step = cmd.command.steps().len().saturating_sub(1);
            reporter.set_step(step, StepStatus::Running, None).await?;
            let started = Instant::now();
            git::push(sandbox, &branch, false).await?;
            reporter
                .set_step(step, StepStatus::Completed, Some(started.elapsed().as_secs()))
                .await?;
        }
        Ok(outcome)
    }

    /// Record the terminal state exactly once. Reporting after that is best-effort.
    async fn finalize(
        &self,
        cmd: &ParsedCommand,
        session_id: &str,
        reporter: &mut ProgressReporter,
        result: Result<WorkflowOutcome, WorkflowError>,
    ) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return self.record_failure(cmd, session_id, reporter, e.to_string()).await,
        };

        if let Err(e) = self
            .update(session_id, SessionUpdate::completed(outcome.pr_number))
            .await
        {
            return self
                .record_failure(cmd, session_id, reporter, format!("{:#}", e))
                .await;
        }
        tracing::info!(pr = ?outcome.pr_number, "Workflow completed");

        if let Err(e) = reporter.complete(outcome.pr_url.as_deref()).await {
            tracing::warn!("Failed to post completion status: {:#}", e);
        }
        self.react(cmd, Reaction::Rocket).await;
    }

    async fn record_failure(
        &self,
        cmd: &ParsedCommand,
        session_id: &str,
        reporter: &mut ProgressReporter,
        message: String,
    ) {
        tracing::error!(error = %message, "Workflow failed");
        if let Err(e) = self
            .update(session_id, SessionUpdate::failed(message.as_str()))
            .await
        {
            tracing::error!("Failed to record session failure: {:#}", e);
        }
        if let Err(e) = reporter.fail(&message).await {
            tracing::warn!("Failed to post failure status: {:#}", e);
        }
        self.react(cmd, Reaction::Confused).await;
    }

    async fn react(&self, cmd: &ParsedCommand, reaction: Reaction) {
        if !cmd.has_comment() {
            return;
        }
        if let Err(e) = self
            .gateway
            .add_reaction(&cmd.repo, cmd.comment_id, reaction)
            .await
        {
            tracing::warn!(reaction = reaction.as_str(), "Failed to add reaction: {:#}", e);
        }
    }

    async fn update(&self, session_id: &str, update: SessionUpdate) -> Result<Session> {
        let id = session_id.to_string();
        self.db.call(move |db| db.update_session(&id, update)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(command: CommandKind, issue: i64, pr: Option<i64>) -> ParsedCommand {
        ParsedCommand {
            command,
            instruction: String::new(),
            author: "alice".into(),
            body: String::new(),
            repo: "o/r".into(),
            issue_number: issue,
            pr_number: pr,
            comment_id: 1,
        }
    }

    #[test]
    fn test_issue_runs_get_issue_branch() {
        assert_eq!(branch_name(&cmd(CommandKind::Plan, 42, None), None), "aidw/issue-42");
    }

    #[test]
    fn test_pr_runs_reuse_pr_branch() {
        assert_eq!(
            branch_name(&cmd(CommandKind::Build, 50, Some(50)), Some("feature/x")),
            "feature/x"
        );
    }

    #[test]
    fn test_pr_run_without_pr_details_falls_back() {
        assert_eq!(
            branch_name(&cmd(CommandKind::Build, 50, Some(50)), None),
            "aidw/issue-50"
        );
    }
}
