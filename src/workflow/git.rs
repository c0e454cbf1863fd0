//! Git operations run inside an execution session's working copy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::sandbox::{CommandOutput, ExecutionSession, shell_quote};
use crate::errors::WorkflowError;

const QUICK: Duration = Duration::from_secs(30);
const COMMIT: Duration = Duration::from_secs(60);
const NETWORK: Duration = Duration::from_secs(120);

/// Snapshot of the working copy shown to the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GitState {
    pub branch: String,
    pub log: String,
    pub diff_stat: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GitStatus {
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
}

impl GitStatus {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.modified.is_empty() && self.untracked.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed,
    NoChanges,
}

async fn in_repo(
    session: &dyn ExecutionSession,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput, WorkflowError> {
    let full = format!("cd {} && {}", session.repo_path(), command);
    Ok(session.run(&full, timeout).await?)
}

fn require_success(output: CommandOutput, operation: &str) -> Result<CommandOutput, WorkflowError> {
    if output.success() {
        Ok(output)
    } else {
        Err(WorkflowError::Git {
            operation: operation.to_string(),
            stderr: output.stderr.trim().to_string(),
        })
    }
}

pub async fn git_state(session: &dyn ExecutionSession) -> Result<GitState, WorkflowError> {
    let branch = in_repo(session, "git branch --show-current", QUICK).await?;
    let log = in_repo(session, "git log --oneline -10", QUICK).await?;
    let diff_stat = in_repo(
        session,
        "git diff --stat HEAD~1 2>/dev/null || echo 'No previous commit'",
        QUICK,
    )
    .await?;

    Ok(GitState {
        branch: branch.stdout.trim().to_string(),
        log: log.stdout,
        diff_stat: diff_stat.stdout,
    })
}

pub async fn create_branch(session: &dyn ExecutionSession, branch: &str) -> Result<(), WorkflowError> {
    let out = in_repo(
        session,
        &format!("git checkout -b {}", shell_quote(branch)),
        QUICK,
    )
    .await?;
    require_success(out, "create branch")?;
    Ok(())
}

pub async fn checkout_branch(
    session: &dyn ExecutionSession,
    branch: &str,
) -> Result<(), WorkflowError> {
    let out = in_repo(
        session,
        &format!("git checkout {}", shell_quote(branch)),
        QUICK,
    )
    .await?;
    require_success(out, "checkout branch")?;
    Ok(())
}

/// Stage everything and commit. A clean tree is a successful no-op.
pub async fn commit_changes(
    session: &dyn ExecutionSession,
    message: &str,
) -> Result<CommitOutcome, WorkflowError> {
    let staged = in_repo(session, "git add -A", COMMIT).await?;
    require_success(staged, "stage changes")?;

    let status = in_repo(session, "git status --porcelain", QUICK).await?;
    let status = require_success(status, "read status")?;
    if parse_porcelain(&status.stdout).is_clean() {
        tracing::info!("No changes to commit");
        return Ok(CommitOutcome::NoChanges);
    }

    let escaped = message.replace('"', "\\\"");
    let commit = in_repo(session, &format!("git commit -m \"{}\"", escaped), COMMIT).await?;
    require_success(commit, "commit changes")?;
    tracing::info!(message, "Committed changes");
    Ok(CommitOutcome::Committed)
}

pub async fn push(
    session: &dyn ExecutionSession,
    branch: &str,
    force: bool,
) -> Result<(), WorkflowError> {
    let mut command = format!("git push -u origin {}", shell_quote(branch));
    if force {
        command.push_str(" --force");
    }
    tracing::info!(branch, force, "Pushing changes");
    let out = in_repo(session, &command, NETWORK).await?;
    require_success(out, "push changes")?;
    Ok(())
}

/// Parse `git status --porcelain` (v1) output.
pub fn parse_porcelain(output: &str) -> GitStatus {
    let mut status = GitStatus::default();
    for line in output.lines() {
        if line.trim().is_empty() || line.len() < 3 {
            continue;
        }
        let code = &line.as_bytes()[..2];
        let path = line.get(3..).unwrap_or_default().trim().to_string();

        if code == b"??" {
            status.untracked.push(path);
            continue;
        }
        if code[0] != b' ' {
            status.staged.push(path.clone());
        }
        if code[1] != b' ' {
            status.modified.push(path);
        }
    }
    status
}
