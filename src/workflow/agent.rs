//! Runs the coding agent (Claude Code CLI) inside an execution session.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::sandbox::ExecutionSession;
use crate::errors::WorkflowError;

const PROMPT_FILE: &str = "/tmp/claude_prompt.txt";
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Outcome of one agent invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub exit_code: i32,
    /// Final message, when the agent emitted a JSON result.
    pub summary: Option<String>,
    pub num_turns: Option<u32>,
    pub cost_usd: Option<f64>,
}

impl AgentResult {
    /// Convert a failed run into the error recorded on the session.
    pub fn into_workflow_result(self) -> Result<AgentResult, WorkflowError> {
        if self.success {
            Ok(self)
        } else {
            Err(WorkflowError::Agent {
                message: self
                    .error
                    .unwrap_or_else(|| format!("Exit code: {}", self.exit_code)),
            })
        }
    }
}

/// Shape of `claude --output-format json`.
#[derive(Debug, Deserialize)]
struct ClaudeReport {
    #[serde(default)]
    is_error: bool,
    result: Option<String>,
    num_turns: Option<u32>,
    total_cost_usd: Option<f64>,
}

/// Find the JSON result in the agent's stdout. Tolerates log lines before it.
fn parse_report(stdout: &str) -> Option<ClaudeReport> {
    let trimmed = stdout.trim();
    if let Ok(report) = serde_json::from_str::<ClaudeReport>(trimmed) {
        return Some(report);
    }
    trimmed
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str::<ClaudeReport>(l).ok())
}

pub struct AgentRunner {
    timeout: Duration,
}

impl AgentRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn ensure_installed(&self, session: &dyn ExecutionSession) -> Result<()> {
        let check = session
            .run("which claude", Duration::from_secs(30))
            .await
            .context("Failed to check for Claude Code")?;
        if check.success() {
            return Ok(());
        }

        tracing::info!(sandbox = session.id(), "Installing Claude Code in sandbox");
        let install = session
            .run("npm install -g @anthropic-ai/claude-code", INSTALL_TIMEOUT)
            .await
            .context("Failed to install Claude Code")?;
        if !install.success() {
            anyhow::bail!("Failed to install Claude Code: {}", install.stderr.trim());
        }
        Ok(())
    }

    /// Run the agent against the session's repository.
    ///
    /// Infrastructure failures (install, file write, timeout) are errors; an
    /// agent that runs and reports failure yields `AgentResult { success: false }`.
    pub async fn run(&self, session: &dyn ExecutionSession, prompt: &str) -> Result<AgentResult> {
        self.ensure_installed(session).await?;

        session
            .write_file(PROMPT_FILE, prompt)
            .await
            .context("Failed to write prompt into sandbox")?;

        let command = format!(
            "cd {} && claude -p \"$(cat {})\" --output-format json --dangerously-skip-permissions",
            session.repo_path(),
            PROMPT_FILE
        );

        tracing::info!(
            sandbox = session.id(),
            prompt_chars = prompt.len(),
            "Running Claude Code"
        );
        let output = session.run(&command, self.timeout).await?;
        Ok(Self::interpret(output.exit_code, output.stdout, output.stderr))
    }

    fn interpret(exit_code: i32, stdout: String, stderr: String) -> AgentResult {
        let report = parse_report(&stdout);
        let summary = report.as_ref().and_then(|r| r.result.clone());
        let num_turns = report.as_ref().and_then(|r| r.num_turns);
        let cost_usd = report.as_ref().and_then(|r| r.total_cost_usd);

        if exit_code != 0 {
            tracing::error!(exit_code, stderr = %stderr.trim(), "Claude Code failed");
            let error = [stderr.trim(), stdout.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("Exit code: {}", exit_code));
            return AgentResult {
                success: false,
                output: stdout,
                error: Some(error),
                exit_code,
                summary,
                num_turns,
                cost_usd,
            };
        }

        if let Some(report) = &report
            && report.is_error
        {
            tracing::error!("Claude Code reported an error result");
            return AgentResult {
                success: false,
                error: Some(
                    summary
                        .clone()
                        .unwrap_or_else(|| "Agent reported an error".to_string()),
                ),
                output: stdout,
                exit_code,
                summary,
                num_turns,
                cost_usd,
            };
        }

        tracing::info!(?num_turns, ?cost_usd, "Claude Code completed");
        AgentResult {
            success: true,
            output: stdout,
            error: None,
            exit_code,
            summary,
            num_turns,
            cost_usd,
        }
    }
}
