use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::github::Gateway;
use super::models::CommandKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressStep {
    pub name: String,
    pub status: StepStatus,
    pub duration_secs: Option<u64>,
}

impl ProgressStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            duration_secs: None,
        }
    }

    /// ` (Ns)` for steps with a recorded, non-zero duration.
    fn duration_suffix(&self) -> String {
        match self.duration_secs {
            Some(secs) if secs > 0 => format!(" ({}s)", secs),
            _ => String::new(),
        }
    }
}

/// Step checklist for one run, rendered into the progress comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressTracker {
    pub command: CommandKind,
    pub session_id: String,
    pub steps: Vec<ProgressStep>,
    pub error: Option<String>,
}

impl ProgressTracker {
    pub fn new(command: CommandKind, session_id: impl Into<String>, steps: &[&str]) -> Self {
        Self {
            command,
            session_id: session_id.into(),
            steps: steps.iter().map(|s| ProgressStep::new(*s)).collect(),
            error: None,
        }
    }

    fn footer(&self) -> String {
        format!("_Session: {}_", self.session_id)
    }

    /// In-progress rendering.
    pub fn format(&self) -> String {
        let mut lines = vec![format!("🤖 **{}** running", self.command), String::new()];
        for step in &self.steps {
            lines.push(match step.status {
                StepStatus::Completed => format!("- [x] {}{}", step.name, step.duration_suffix()),
                StepStatus::Running => format!("- [ ] {} ← running", step.name),
                StepStatus::Failed => format!("- [ ] {} ← failed", step.name),
                StepStatus::Pending => format!("- [ ] {}", step.name),
            });
        }
        lines.push(String::new());
        lines.push(self.footer());
        if let Some(error) = &self.error {
            lines.push(String::new());
            lines.push(format!("❌ **Error:** {}", error));
        }
        lines.join("\n")
    }

    /// Success rendering: every step not explicitly failed is checked.
    pub fn format_completed(&self, result_url: Option<&str>) -> String {
        let mut lines = vec![format!("✅ **{}** completed", self.command), String::new()];
        for step in &self.steps {
            lines.push(match step.status {
                StepStatus::Failed => format!("- [ ] {} ← failed", step.name),
                _ => format!("- [x] {}{}", step.name, step.duration_suffix()),
            });
        }
        if let Some(url) = result_url {
            lines.push(String::new());
            lines.push(format!("🔗 [View PR]({})", url));
        }
        lines.push(String::new());
        lines.push(self.footer());
        lines.join("\n")
    }

    /// Failure rendering: the step that was running when the run failed is marked failed.
    pub fn format_failed(&self) -> String {
        let mut lines = vec![format!("❌ **{}** failed", self.command), String::new()];
        for step in &self.steps {
            lines.push(match step.status {
                StepStatus::Completed => format!("- [x] {}{}", step.name, step.duration_suffix()),
                StepStatus::Running | StepStatus::Failed => {
                    format!("- [ ] {} ← failed", step.name)
                }
                StepStatus::Pending => format!("- [ ] {}", step.name),
            });
        }
        lines.push(String::new());
        lines.push(self.footer());
        if let Some(error) = &self.error {
            lines.push(String::new());
            lines.push(format!("```\n{}\n```", error));
        }
        lines.join("\n")
    }
}

/// Keeps a single progress comment on the issue or PR in sync with a tracker.
pub struct ProgressReporter {
    gateway: Arc<dyn Gateway>,
    repo: String,
    number: i64,
    tracker: ProgressTracker,
    comment_id: Option<i64>,
}

impl ProgressReporter {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        repo: impl Into<String>,
        number: i64,
        tracker: ProgressTracker,
    ) -> Self {
        Self {
            gateway,
            repo: repo.into(),
            number,
            tracker,
            comment_id: None,
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn comment_id(&self) -> Option<i64> {
        self.comment_id
    }

    /// Post the initial progress comment.
    pub async fn start(&mut self) -> Result<()> {
        let comment = self
            .gateway
            .create_comment(&self.repo, self.number, &self.tracker.format())
            .await?;
        self.comment_id = Some(comment.id);
        Ok(())
    }

    /// Re-render the comment. No-op before `start`.
    pub async fn update(&self) -> Result<()> {
        let Some(id) = self.comment_id else {
            return Ok(());
        };
        self.gateway
            .update_comment(&self.repo, id, &self.tracker.format())
            .await
    }

    /// Set a step's status (and duration) and push the change immediately.
    pub async fn set_step(
        &mut self,
        index: usize,
        status: StepStatus,
        duration_secs: Option<u64>,
    ) -> Result<()> {
        if let Some(step) = self.tracker.steps.get_mut(index) {
            step.status = status;
            if duration_secs.is_some() {
                step.duration_secs = duration_secs;
            }
        }
        self.update().await
    }

    /// Render the success state. No-op before `start`.
    pub async fn complete(&self, result_url: Option<&str>) -> Result<()> {
        let Some(id) = self.comment_id else {
            return Ok(());
        };
        self.gateway
            .update_comment(&self.repo, id, &self.tracker.format_completed(result_url))
            .await
    }

    /// Render the failure state, creating the comment if `start` never succeeded.
    pub async fn fail(&mut self, error: &str) -> Result<()> {
        self.tracker.error = Some(error.to_string());
        let body = self.tracker.format_failed();
        match self.comment_id {
            Some(id) => self.gateway.update_comment(&self.repo, id, &body).await,
            None => {
                let comment = self
                    .gateway
                    .create_comment(&self.repo, self.number, &body)
                    .await?;
                self.comment_id = Some(comment.id);
                Ok(())
            }
        }
    }
}
