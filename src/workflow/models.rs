use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Commands ──────────────────────────────────────────────────────────

/// The closed set of workflow commands a trigger comment can name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Plan,
    Refine,
    Build,
    Oneshot,
    Iterate,
    Codereview,
}

impl CommandKind {
    pub const ALL: [CommandKind; 6] = [
        Self::Plan,
        Self::Refine,
        Self::Build,
        Self::Oneshot,
        Self::Iterate,
        Self::Codereview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Refine => "refine",
            Self::Build => "build",
            Self::Oneshot => "oneshot",
            Self::Iterate => "iterate",
            Self::Codereview => "codereview",
        }
    }

    /// Commands that start from an issue and must not be run on a PR.
    pub fn is_issue_only(&self) -> bool {
        matches!(self, Self::Plan | Self::Oneshot)
    }

    /// Commands that operate on an existing PR.
    pub fn is_pr_only(&self) -> bool {
        matches!(
            self,
            Self::Refine | Self::Build | Self::Iterate | Self::Codereview
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plan" => Ok(Self::Plan),
            "refine" => Ok(Self::Refine),
            "build" => Ok(Self::Build),
            "oneshot" => Ok(Self::Oneshot),
            "iterate" => Ok(Self::Iterate),
            "codereview" => Ok(Self::Codereview),
            _ => Err(format!("Invalid command: {}", s)),
        }
    }
}

/// One validated trigger. Produced by the dispatcher, consumed once by the runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedCommand {
    pub command: CommandKind,
    pub instruction: String,
    pub author: String,
    pub body: String,
    pub repo: String,
    pub issue_number: i64,
    pub pr_number: Option<i64>,
    /// 0 for manual invocations; no reactions are posted then.
    pub comment_id: i64,
}

impl ParsedCommand {
    /// The issue or PR thread that progress and reactions are reported on.
    pub fn target_number(&self) -> i64 {
        self.pr_number.unwrap_or(self.issue_number)
    }

    pub fn has_comment(&self) -> bool {
        self.comment_id != 0
    }
}

// ── Sessions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid session status: {}", s)),
        }
    }
}

/// Check whether a session may move from one status to another.
///
/// Non-terminal states may be re-asserted (RUNNING→RUNNING carries field
/// updates); terminal states are final.
pub fn is_valid_transition(from: &SessionStatus, to: &SessionStatus) -> bool {
    matches!(
        (from, to),
        (SessionStatus::Pending, SessionStatus::Pending)
            | (SessionStatus::Pending, SessionStatus::Running)
            | (SessionStatus::Pending, SessionStatus::Failed)
            | (SessionStatus::Running, SessionStatus::Running)
            | (SessionStatus::Running, SessionStatus::Completed)
            | (SessionStatus::Running, SessionStatus::Failed)
    )
}

/// Durable record of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub command: CommandKind,
    pub status: SessionStatus,
    pub repo: String,
    pub issue_number: i64,
    pub pr_number: Option<i64>,
    pub branch: Option<String>,
    pub sandbox_id: Option<String>,
    pub triggered_by: Option<String>,
    pub instruction: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn target_number(&self) -> i64 {
        self.pr_number.unwrap_or(self.issue_number)
    }
}

/// Fields needed to open a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub command: CommandKind,
    pub repo: String,
    pub issue_number: i64,
    pub pr_number: Option<i64>,
    pub triggered_by: Option<String>,
    pub instruction: Option<String>,
}

impl From<&ParsedCommand> for NewSession {
    fn from(cmd: &ParsedCommand) -> Self {
        Self {
            command: cmd.command,
            repo: cmd.repo.clone(),
            issue_number: cmd.issue_number,
            pr_number: cmd.pr_number,
            triggered_by: Some(cmd.author.clone()),
            instruction: if cmd.instruction.is_empty() {
                None
            } else {
                Some(cmd.instruction.clone())
            },
        }
    }
}

/// A partial update to a session; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub pr_number: Option<i64>,
    pub branch: Option<String>,
    pub sandbox_id: Option<String>,
    pub error: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn completed(pr_number: Option<i64>) -> Self {
        Self {
            status: Some(SessionStatus::Completed),
            pr_number,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(SessionStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn execution(sandbox_id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            sandbox_id: Some(sandbox_id.into()),
            branch: Some(branch.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_kind_round_trip() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(CommandKind::from_str("PLAN").unwrap(), CommandKind::Plan);
        assert!(CommandKind::from_str("deploy").is_err());
    }

    #[test]
    fn test_command_partitions_are_disjoint_and_complete() {
        for kind in CommandKind::ALL {
            assert_ne!(kind.is_issue_only(), kind.is_pr_only(), "{}", kind);
        }
    }

    #[test]
    fn test_session_status_from_str() {
        assert_eq!(SessionStatus::from_str("running").unwrap(), SessionStatus::Running);
        assert!(SessionStatus::from_str("RUNNING").is_err());
    }

    #[test]
    fn test_valid_transitions() {
        use SessionStatus::*;
        assert!(is_valid_transition(&Pending, &Running));
        assert!(is_valid_transition(&Pending, &Failed));
        assert!(is_valid_transition(&Running, &Completed));
        assert!(is_valid_transition(&Running, &Failed));
        assert!(is_valid_transition(&Running, &Running));
    }

    #[test]
    fn test_terminal_states_are_final() {
        use SessionStatus::*;
        for to in [Pending, Running, Completed, Failed] {
            assert!(!is_valid_transition(&Completed, &to));
            assert!(!is_valid_transition(&Failed, &to));
        }
        assert!(!is_valid_transition(&Pending, &Completed));
    }

    #[test]
    fn test_target_number_prefers_pr() {
        let mut cmd = ParsedCommand {
            command: CommandKind::Refine,
            instruction: String::new(),
            author: "alice".into(),
            body: "@aidw refine".into(),
            repo: "o/r".into(),
            issue_number: 3,
            pr_number: Some(9),
            comment_id: 0,
        };
        assert_eq!(cmd.target_number(), 9);
        assert!(!cmd.has_comment());
        cmd.pr_number = None;
        assert_eq!(cmd.target_number(), 3);
    }

    #[test]
    fn test_new_session_drops_empty_instruction() {
        let cmd = ParsedCommand {
            command: CommandKind::Plan,
            instruction: String::new(),
            author: "alice".into(),
            body: "@aidw plan".into(),
            repo: "o/r".into(),
            issue_number: 3,
            pr_number: None,
            comment_id: 11,
        };
        let new = NewSession::from(&cmd);
        assert!(new.instruction.is_none());
        assert_eq!(new.triggered_by.as_deref(), Some("alice"));
    }
}
