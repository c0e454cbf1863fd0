//! Turns inbound comment events into validated commands.
//!
//! Three gates, in order: the event must be a newly created comment, the
//! comment must address the bot with a known command, and the author must be
//! on the allow-list. `validate_context` then checks the command against
//! where it was posted (issue vs PR).

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::models::{CommandKind, ParsedCommand};

/// `@<bot> <command> [instruction]`. The instruction may span lines.
pub static COMMAND_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)@(\w+)\s+(plan|refine|build|oneshot|iterate|codereview)(?:\s+(.*))?")
        .unwrap()
});

/// The subset of a GitHub webhook payload the dispatcher reads.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub action: String,
    pub repository: Option<PayloadRepo>,
    pub issue: Option<PayloadIssue>,
    pub pull_request: Option<PayloadPullRequest>,
    pub comment: Option<PayloadComment>,
}

#[derive(Debug, Deserialize)]
pub struct PayloadRepo {
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct PayloadIssue {
    pub number: Option<i64>,
    /// Present when the "issue" is a pull request.
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct PayloadPullRequest {
    pub number: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PayloadUser {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct PayloadComment {
    pub id: Option<i64>,
    pub body: Option<String>,
    pub user: Option<PayloadUser>,
}

/// A newly created comment on an issue or pull request.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentEvent {
    pub repo: String,
    pub issue_number: i64,
    pub pr_number: Option<i64>,
    pub body: String,
    pub author: String,
    pub comment_id: i64,
}

/// Extract a comment event, or `None` if the event is not one we act on.
pub fn parse_webhook_event(event_type: &str, payload: &WebhookPayload) -> Option<CommentEvent> {
    if payload.action != "created" {
        return None;
    }
    let repo = payload.repository.as_ref()?.full_name.clone();
    let comment = payload.comment.as_ref()?;
    let body = comment.body.clone().unwrap_or_default();
    let author = comment
        .user
        .as_ref()
        .map(|u| u.login.clone())
        .unwrap_or_default();
    let comment_id = comment.id.unwrap_or(0);

    match event_type {
        "issue_comment" => {
            let issue = payload.issue.as_ref()?;
            let number = issue.number?;
            let pr_number = issue.pull_request.is_some().then_some(number);
            Some(CommentEvent {
                repo,
                issue_number: number,
                pr_number,
                body,
                author,
                comment_id,
            })
        }
        "pull_request_review_comment" => {
            // PRs are issues too; the context builder resolves the linked issue.
            let number = payload.pull_request.as_ref()?.number?;
            Some(CommentEvent {
                repo,
                issue_number: number,
                pr_number: Some(number),
                body,
                author,
                comment_id,
            })
        }
        _ => None,
    }
}

/// Deny-by-default: an empty allow-list admits nobody.
pub fn is_user_allowed(author: &str, allowed_users: &[String]) -> bool {
    !allowed_users.is_empty() && allowed_users.iter().any(|u| u == author)
}

/// Find the first `@<bot> <command>` in a comment. Returns the command and
/// its trimmed instruction when the mention names this bot.
pub fn match_command(text: &str, bot_name: &str) -> Option<(CommandKind, String)> {
    let caps = COMMAND_PATTERN.captures(text)?;
    if !caps[1].eq_ignore_ascii_case(bot_name) {
        return None;
    }
    let command = CommandKind::from_str(&caps[2]).ok()?;
    let instruction = caps
        .get(3)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    Some((command, instruction))
}

/// Parse and authorize a trigger. Returns `None` for anything that should be
/// silently ignored.
pub fn parse_trigger(
    event: &CommentEvent,
    bot_name: &str,
    allowed_users: &[String],
) -> Option<ParsedCommand> {
    if event.body.is_empty() || event.author.is_empty() {
        return None;
    }
    let (command, instruction) = match_command(&event.body, bot_name)?;
    if !is_user_allowed(&event.author, allowed_users) {
        tracing::warn!(author = %event.author, repo = %event.repo, "Unauthorized user attempted command");
        return None;
    }

    Some(ParsedCommand {
        command,
        instruction,
        author: event.author.clone(),
        body: event.body.clone(),
        repo: event.repo.clone(),
        issue_number: event.issue_number,
        pr_number: event.pr_number,
        comment_id: event.comment_id,
    })
}

/// Check the command was posted somewhere it can run. Returns a message for
/// the user when it was not.
pub fn validate_context(cmd: &ParsedCommand, bot_name: &str) -> Option<String> {
    if cmd.command.is_issue_only() && cmd.pr_number.is_some() {
        return Some(format!(
            "`@{} {}` must be run from an issue, not a PR",
            bot_name, cmd.command
        ));
    }
    if cmd.command.is_pr_only() && cmd.pr_number.is_none() {
        return Some(format!(
            "`@{} {}` must be run from a PR",
            bot_name, cmd.command
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["alice".to_string()]
    }

    fn event(body: &str, author: &str, pr: Option<i64>) -> CommentEvent {
        CommentEvent {
            repo: "o/r".into(),
            issue_number: 12,
            pr_number: pr,
            body: body.into(),
            author: author.into(),
            comment_id: 99,
        }
    }

    fn payload(json: &str) -> WebhookPayload {
        serde_json::from_str(json).unwrap()
    }

    // ── parse_webhook_event ──────────────────────────────────────────

    #[test]
    fn test_issue_comment_on_issue() {
        let p = payload(
            r#"{"action":"created","repository":{"full_name":"o/r"},
                "issue":{"number":12},
                "comment":{"id":99,"body":"@aidw plan","user":{"login":"alice"}}}"#,
        );
        let ev = parse_webhook_event("issue_comment", &p).unwrap();
        assert_eq!(ev.issue_number, 12);
        assert_eq!(ev.pr_number, None);
        assert_eq!(ev.author, "alice");
        assert_eq!(ev.comment_id, 99);
    }

    #[test]
    fn test_issue_comment_on_pr() {
        let p = payload(
            r#"{"action":"created","repository":{"full_name":"o/r"},
                "issue":{"number":30,"pull_request":{"url":"x"}},
                "comment":{"id":1,"body":"@aidw build","user":{"login":"alice"}}}"#,
        );
        let ev = parse_webhook_event("issue_comment", &p).unwrap();
        assert_eq!(ev.issue_number, 30);
        assert_eq!(ev.pr_number, Some(30));
    }

    #[test]
    fn test_review_comment_uses_pr_number_as_issue() {
        let p = payload(
            r#"{"action":"created","repository":{"full_name":"o/r"},
                "pull_request":{"number":31},
                "comment":{"id":2,"body":"@aidw iterate","user":{"login":"alice"}}}"#,
        );
        let ev = parse_webhook_event("pull_request_review_comment", &p).unwrap();
        assert_eq!(ev.issue_number, 31);
        assert_eq!(ev.pr_number, Some(31));
    }

    #[test]
    fn test_edited_and_other_events_ignored() {
        let edited = payload(
            r#"{"action":"edited","repository":{"full_name":"o/r"},
                "issue":{"number":1},"comment":{"id":1,"body":"@aidw plan"}}"#,
        );
        assert!(parse_webhook_event("issue_comment", &edited).is_none());

        let push = payload(r#"{"action":"created","repository":{"full_name":"o/r"}}"#);
        assert!(parse_webhook_event("push", &push).is_none());
        assert!(parse_webhook_event("issue_comment", &push).is_none());
    }

    // ── parse_trigger ────────────────────────────────────────────────

    #[test]
    fn test_parse_plan_with_instruction() {
        let cmd = parse_trigger(&event("@aidw plan make it fast", "alice", None), "aidw", &allowed())
            .unwrap();
        assert_eq!(cmd.command, CommandKind::Plan);
        assert_eq!(cmd.instruction, "make it fast");
        assert_eq!(cmd.issue_number, 12);
        assert_eq!(cmd.pr_number, None);
        assert_eq!(cmd.comment_id, 99);
    }

    #[test]
    fn test_parse_is_case_insensitive_and_multiline() {
        let cmd = parse_trigger(
            &event("Hey @AIDW Refine\nfocus on tests\nand docs", "alice", Some(3)),
            "aidw",
            &allowed(),
        )
        .unwrap();
        assert_eq!(cmd.command, CommandKind::Refine);
        assert_eq!(cmd.instruction, "focus on tests\nand docs");
    }

    #[test]
    fn test_first_mention_wins() {
        let cmd = parse_trigger(
            &event("@aidw build now\n@aidw plan later", "alice", Some(3)),
            "aidw",
            &allowed(),
        )
        .unwrap();
        assert_eq!(cmd.command, CommandKind::Build);
    }

    #[test]
    fn test_wrong_bot_name_ignored() {
        assert!(parse_trigger(&event("@otherbot plan", "alice", None), "aidw", &allowed()).is_none());
    }

    #[test]
    fn test_unknown_command_ignored() {
        assert!(parse_trigger(&event("@aidw deploy", "alice", None), "aidw", &allowed()).is_none());
        assert!(parse_trigger(&event("no mention here", "alice", None), "aidw", &allowed()).is_none());
    }

    #[test]
    fn test_unlisted_author_ignored() {
        assert!(parse_trigger(&event("@aidw plan", "mallory", None), "aidw", &allowed()).is_none());
    }

    #[test]
    fn test_empty_allow_list_denies_everyone() {
        assert!(parse_trigger(&event("@aidw plan", "alice", None), "aidw", &[]).is_none());
        assert!(!is_user_allowed("alice", &[]));
    }

    #[test]
    fn test_empty_instruction() {
        let cmd = parse_trigger(&event("@aidw codereview", "alice", Some(3)), "aidw", &allowed())
            .unwrap();
        assert_eq!(cmd.instruction, "");
    }

    // ── validate_context ─────────────────────────────────────────────

    fn cmd(command: CommandKind, pr: Option<i64>) -> ParsedCommand {
        ParsedCommand {
            command,
            instruction: String::new(),
            author: "alice".into(),
            body: String::new(),
            repo: "o/r".into(),
            issue_number: 5,
            pr_number: pr,
            comment_id: 0,
        }
    }

    #[test]
    fn test_issue_only_commands_reject_pr() {
        assert_eq!(
            validate_context(&cmd(CommandKind::Plan, Some(5)), "aidw").as_deref(),
            Some("`@aidw plan` must be run from an issue, not a PR")
        );
        assert!(validate_context(&cmd(CommandKind::Oneshot, Some(5)), "aidw").is_some());
        assert!(validate_context(&cmd(CommandKind::Plan, None), "aidw").is_none());
    }

    #[test]
    fn test_pr_only_commands_require_pr() {
        assert_eq!(
            validate_context(&cmd(CommandKind::Refine, None), "aidw").as_deref(),
            Some("`@aidw refine` must be run from a PR")
        );
        assert!(validate_context(&cmd(CommandKind::Refine, Some(5)), "aidw").is_none());
        for kind in [CommandKind::Build, CommandKind::Iterate, CommandKind::Codereview] {
            assert!(validate_context(&cmd(kind, None), "aidw").is_some());
            assert!(validate_context(&cmd(kind, Some(5)), "aidw").is_none());
        }
    }
}
