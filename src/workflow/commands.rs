//! Per-command workflow bodies.
//!
//! Every command has a fixed step list (the progress checklist), a push
//! policy, and a body dispatched by `run_body`. Bodies advance the checklist
//! as they go; the orchestrator owns everything around them. Bodies that open
//! or retitle a PR push first and report it; otherwise the orchestrator pushes
//! as the final checklist step.

use std::time::Instant;

use anyhow::anyhow;

use super::agent::AgentRunner;
use super::context::WorkflowContext;
use super::git;
use super::github::{Gateway, NewPullRequest, PullRequest};
use super::models::CommandKind;
use super::progress::{ProgressReporter, StepStatus};
use super::prompts::{self, REVIEW_FILE};
use super::sandbox::ExecutionSession;
use crate::errors::WorkflowError;

pub const REVIEW_HEADING: &str = "## AIDW Code Review";

impl CommandKind {
    /// Progress checklist shown in the status comment.
    pub fn steps(&self) -> &'static [&'static str] {
        match self {
            CommandKind::Plan => &["Analyze issue", "Generate plan", "Open PR"],
            CommandKind::Refine => &["Analyze feedback", "Update plan", "Push changes"],
            CommandKind::Build => &[
                "Read plan",
                "Implement changes",
                "Commit changes",
                "Update PR",
            ],
            CommandKind::Oneshot => &[
                "Analyze issue",
                "Generate plan",
                "Implement changes",
                "Open PR",
            ],
            CommandKind::Iterate => &[
                "Analyze feedback",
                "Update implementation",
                "Update tests",
                "Push changes",
            ],
            CommandKind::Codereview => &["Analyze PR", "Run code review", "Post review"],
        }
    }

    /// Whether the run's branch is pushed before the session is completed.
    pub fn should_push(&self) -> bool {
        !matches!(self, CommandKind::Codereview)
    }
}

/// What a successful body produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowOutcome {
    pub pr_number: Option<i64>,
    pub pr_url: Option<String>,
    /// The body pushed the branch itself before touching the PR.
    pub pushed: bool,
}

impl WorkflowOutcome {
    fn for_pr(pr: &PullRequest, pushed: bool) -> Self {
        Self {
            pr_number: Some(pr.number),
            pr_url: Some(pr.url.clone()),
            pushed,
        }
    }
}

/// Everything a body needs from the run.
pub struct RunScope<'a> {
    pub gateway: &'a dyn Gateway,
    pub session: &'a dyn ExecutionSession,
    pub agent: &'a AgentRunner,
    pub reporter: &'a mut ProgressReporter,
    pub ctx: &'a WorkflowContext,
    pub repo: &'a str,
    pub branch: &'a str,
}

impl<'a> RunScope<'a> {
    async fn start_step(&mut self, index: usize) -> Result<Instant, WorkflowError> {
        self.reporter
            .set_step(index, StepStatus::Running, None)
            .await?;
        Ok(Instant::now())
    }

    async fn finish_step(&mut self, index: usize, started: Instant) -> Result<(), WorkflowError> {
        let secs = started.elapsed().as_secs();
        self.reporter
            .set_step(index, StepStatus::Completed, Some(secs))
            .await?;
        Ok(())
    }

    /// A step with no work of its own (context was assembled up front).
    async fn instant_step(&mut self, index: usize) -> Result<(), WorkflowError> {
        let started = self.start_step(index).await?;
        self.finish_step(index, started).await
    }

    async fn run_agent(&self, kind: CommandKind) -> Result<(), WorkflowError> {
        let prompt = prompts::render(kind, self.ctx);
        let result = self.agent.run(self.session, &prompt).await?;
        let result = result.into_workflow_result()?;
        tracing::info!(
            command = %kind,
            turns = ?result.num_turns,
            cost_usd = ?result.cost_usd,
            "Agent finished"
        );
        Ok(())
    }

    fn existing_pr(&self) -> Result<&'a PullRequest, WorkflowError> {
        self.ctx
            .pr
            .as_ref()
            .ok_or_else(|| WorkflowError::Other(anyhow!("No pull request in workflow context")))
    }

    /// Open a PR for the run's branch, or retitle the one already open.
    async fn open_pull_request(&self, title: String, draft: bool) -> Result<PullRequest, WorkflowError> {
        let issue = &self.ctx.issue;
        let body = format!(
            "Closes #{}\n\nPlan: `{}`",
            issue.number, self.ctx.plan_path
        );

        if let Some(existing) = self
            .gateway
            .find_open_pull_request(self.repo, self.branch)
            .await?
        {
            tracing::info!(pr = existing.number, "Updating existing pull request");
            self.gateway
                .update_pull_request(self.repo, existing.number, Some(&title), Some(&body))
                .await?;
            return Ok(existing);
        }

        let base = self.gateway.get_default_branch(self.repo).await?;
        let pr = self
            .gateway
            .create_pull_request(
                self.repo,
                &NewPullRequest {
                    title,
                    body,
                    head: self.branch.to_string(),
                    base,
                    draft,
                },
            )
            .await?;
        tracing::info!(pr = pr.number, draft, "Opened pull request");
        Ok(pr)
    }
}

/// Run the body for `kind`.
pub async fn run_body(
    kind: CommandKind,
    scope: &mut RunScope<'_>,
) -> Result<WorkflowOutcome, WorkflowError> {
    match kind {
        CommandKind::Plan => plan(scope).await,
        CommandKind::Refine => refine(scope).await,
        CommandKind::Build => build(scope).await,
        CommandKind::Oneshot => oneshot(scope).await,
        CommandKind::Iterate => iterate(scope).await,
        CommandKind::Codereview => codereview(scope).await,
    }
}

async fn plan(scope: &mut RunScope<'_>) -> Result<WorkflowOutcome, WorkflowError> {
    scope.instant_step(0).await?;

    // The agent writes and commits the plan file itself.
    let started = scope.start_step(1).await?;
    scope.run_agent(CommandKind::Plan).await?;
    scope.finish_step(1, started).await?;

    let started = scope.start_step(2).await?;
    git::push(scope.session, scope.branch, false).await?;
    let title = format!("Plan: {}", scope.ctx.issue.title);
    let pr = scope.open_pull_request(title, true).await?;
    scope.finish_step(2, started).await?;

    Ok(WorkflowOutcome::for_pr(&pr, true))
}

async fn refine(scope: &mut RunScope<'_>) -> Result<WorkflowOutcome, WorkflowError> {
    let pr = scope.existing_pr()?;
    scope.instant_step(0).await?;

    let started = scope.start_step(1).await?;
    scope.run_agent(CommandKind::Refine).await?;
    git::commit_changes(scope.session, "Refine plan based on feedback").await?;
    scope.finish_step(1, started).await?;

    Ok(WorkflowOutcome {
        pr_number: Some(pr.number),
        pr_url: Some(format!("https://github.com/{}/pull/{}", scope.repo, pr.number)),
        pushed: false,
    })
}

async fn build(scope: &mut RunScope<'_>) -> Result<WorkflowOutcome, WorkflowError> {
    let pr = scope.existing_pr()?;
    scope.instant_step(0).await?;

    let started = scope.start_step(1).await?;
    scope.run_agent(CommandKind::Build).await?;
    scope.finish_step(1, started).await?;

    let started = scope.start_step(2).await?;
    let message = format!("Implement plan for #{}", scope.ctx.issue.number);
    git::commit_changes(scope.session, &message).await?;
    scope.finish_step(2, started).await?;

    let started = scope.start_step(3).await?;
    git::push(scope.session, scope.branch, false).await?;
    let title = format!("Implement: {}", scope.ctx.issue.title);
    scope
        .gateway
        .update_pull_request(scope.repo, pr.number, Some(&title), None)
        .await?;
    scope.finish_step(3, started).await?;

    Ok(WorkflowOutcome::for_pr(pr, true))
}

async fn oneshot(scope: &mut RunScope<'_>) -> Result<WorkflowOutcome, WorkflowError> {
    let issue_number = scope.ctx.issue.number;
    scope.instant_step(0).await?;

    let started = scope.start_step(1).await?;
    scope.run_agent(CommandKind::Plan).await?;
    git::commit_changes(scope.session, &format!("Add plan for #{}", issue_number)).await?;
    scope.finish_step(1, started).await?;

    let started = scope.start_step(2).await?;
    scope.run_agent(CommandKind::Build).await?;
    git::commit_changes(scope.session, &format!("Implement plan for #{}", issue_number)).await?;
    scope.finish_step(2, started).await?;

    let started = scope.start_step(3).await?;
    git::push(scope.session, scope.branch, false).await?;
    let title = format!("Implement: {}", scope.ctx.issue.title);
    let pr = scope.open_pull_request(title, false).await?;
    scope.finish_step(3, started).await?;

    Ok(WorkflowOutcome::for_pr(&pr, true))
}

async fn iterate(scope: &mut RunScope<'_>) -> Result<WorkflowOutcome, WorkflowError> {
    let pr = scope.existing_pr()?;
    scope.instant_step(0).await?;

    // One agent call covers both updates; its time is split between them.
    let started = scope.start_step(1).await?;
    scope.run_agent(CommandKind::Iterate).await?;
    git::commit_changes(scope.session, "Address review feedback").await?;
    let half = started.elapsed().as_secs() / 2;
    scope
        .reporter
        .set_step(1, StepStatus::Completed, Some(half))
        .await?;
    scope
        .reporter
        .set_step(2, StepStatus::Completed, Some(half))
        .await?;

    Ok(WorkflowOutcome {
        pr_number: Some(pr.number),
        pr_url: Some(format!("https://github.com/{}/pull/{}", scope.repo, pr.number)),
        pushed: false,
    })
}

async fn codereview(scope: &mut RunScope<'_>) -> Result<WorkflowOutcome, WorkflowError> {
    let pr = scope.existing_pr()?;
    scope.instant_step(0).await?;

    let started = scope.start_step(1).await?;
    scope.run_agent(CommandKind::Codereview).await?;
    scope.finish_step(1, started).await?;

    let started = scope.start_step(2).await?;
    let path = format!("{}/{}", scope.session.repo_path(), REVIEW_FILE);
    let review = scope
        .session
        .read_file(&path)
        .await?
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| WorkflowError::MissingArtifact {
            file: REVIEW_FILE.to_string(),
        })?;
    let body = format!("{}\n\n{}", REVIEW_HEADING, review.trim());
    scope.gateway.create_comment(scope.repo, pr.number, &body).await?;
    scope.finish_step(2, started).await?;

    Ok(WorkflowOutcome {
        pr_number: Some(pr.number),
        pr_url: Some(pr.url.clone()),
        pushed: false,
    })
}
