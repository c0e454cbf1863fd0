use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::git::GitState;
use super::github::{Gateway, Issue, PullRequest};
use super::models::{CommandKind, ParsedCommand};

const PLAN_DIR: &str = "docs/plans";
const MAX_SLUG_LEN: usize = 60;

/// Who asked for the run and what they said.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerInfo {
    pub author: String,
    pub body: String,
    pub command: CommandKind,
    pub instruction: String,
}

impl From<&ParsedCommand> for TriggerInfo {
    fn from(cmd: &ParsedCommand) -> Self {
        Self {
            author: cmd.author.clone(),
            body: cmd.body.clone(),
            command: cmd.command,
            instruction: cmd.instruction.clone(),
        }
    }
}

/// Everything one run knows about its subject. Built once; only
/// `git_state` and `plan_path` are filled in afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowContext {
    pub issue: Issue,
    pub pr: Option<PullRequest>,
    pub trigger: TriggerInfo,
    pub git_state: Option<GitState>,
    pub plan_path: String,
}

/// Convert a title to a lowercase, hyphen-separated slug of at most `max_len` bytes.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if slug.len() > max_len {
        // ASCII only at this point, so any byte index is a char boundary.
        slug[..max_len].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

/// Where the plan document for an issue lives in the repository.
pub fn plan_path(issue_number: i64, title: &str) -> String {
    let slug = slugify(title, MAX_SLUG_LEN);
    let slug = if slug.is_empty() { "plan".to_string() } else { slug };
    format!("{}/{}-{}.md", PLAN_DIR, issue_number, slug)
}

/// Assembles a `WorkflowContext` from the gateway.
pub struct ContextBuilder<'a> {
    gateway: &'a dyn Gateway,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(gateway: &'a dyn Gateway) -> Self {
        Self { gateway }
    }

    /// Fetch the issue, and the PR when one is given. A run started from a PR
    /// (issue number equal to PR number) is re-pointed at the issue the PR body
    /// links to, if any.
    pub async fn build(
        &self,
        repo: &str,
        issue_number: i64,
        pr_number: Option<i64>,
        trigger: TriggerInfo,
    ) -> Result<WorkflowContext> {
        let mut issue = self.gateway.get_issue(repo, issue_number).await?;

        let pr = match pr_number {
            Some(number) => {
                let pr = self.gateway.get_pull_request(repo, number).await?;
                if issue_number == number
                    && let Some(linked) = pr.linked_issue_number
                {
                    tracing::debug!(pr = number, issue = linked, "Using issue linked from PR body");
                    issue = self.gateway.get_issue(repo, linked).await?;
                }
                Some(pr)
            }
            None => None,
        };

        let plan_path = plan_path(issue.number, &issue.title);
        Ok(WorkflowContext {
            issue,
            pr,
            trigger,
            git_state: None,
            plan_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_collapses_symbols() {
        assert_eq!(
            slugify("Fix bug in parser (urgent!)", 60),
            "fix-bug-in-parser-urgent"
        );
    }

    #[test]
    fn test_slugify_idempotent() {
        let once = slugify("  Add -- OAuth2 / SSO login!!  ", 60);
        assert_eq!(once, "add-oauth2-sso-login");
        assert_eq!(slugify(&once, 60), once);
    }

    #[test]
    fn test_slugify_truncates_without_trailing_hyphen() {
        let title = "a".repeat(59) + " bcd";
        let slug = slugify(&title, 60);
        assert_eq!(slug.len(), 59);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn test_slugify_caps_length() {
        let slug = slugify(&"word ".repeat(40), 60);
        assert!(slug.len() <= 60);
        assert!(slug.starts_with("word-word"));
    }

    #[test]
    fn test_plan_path_example() {
        assert_eq!(
            plan_path(42, "Fix bug in parser (urgent!)"),
            "docs/plans/42-fix-bug-in-parser-urgent.md"
        );
    }

    #[test]
    fn test_plan_path_all_symbols_falls_back() {
        assert_eq!(plan_path(7, "!!! ??? ***"), "docs/plans/7-plan.md");
        assert_eq!(plan_path(7, ""), "docs/plans/7-plan.md");
    }

    #[test]
    fn test_plan_path_non_ascii_title() {
        assert_eq!(plan_path(3, "Café crème"), "docs/plans/3-caf-cr-me.md");
    }

    #[test]
    fn test_trigger_info_from_command() {
        let cmd = ParsedCommand {
            command: CommandKind::Plan,
            instruction: "make it fast".into(),
            author: "alice".into(),
            body: "@aidw plan make it fast".into(),
            repo: "o/r".into(),
            issue_number: 1,
            pr_number: None,
            comment_id: 5,
        };
        let trigger = TriggerInfo::from(&cmd);
        assert_eq!(trigger.command, CommandKind::Plan);
        assert_eq!(trigger.instruction, "make it fast");
        assert_eq!(trigger.author, "alice");
    }
}
