//! In-memory stand-ins for GitHub and the execution sandbox.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aidw::config::{Credentials, FileConfig, Settings};
use aidw::workflow::db::{DbHandle, SessionDb};
use aidw::workflow::github::{
    Comment, Gateway, Issue, NewPullRequest, PullRequest, Reaction, Webhook, WebhookConfig,
    WebhookDelivery,
};
use aidw::workflow::runner::WorkflowRunner;
use aidw::workflow::sandbox::{CommandOutput, ExecutionSession, SandboxProvider, SessionSpec};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

pub const REPO: &str = "acme/widgets";
pub const SECRET: &str = "test-secret";

pub fn issue(number: i64, title: &str) -> Issue {
    Issue {
        number,
        title: title.to_string(),
        body: "Please make it so.".to_string(),
        author: "alice".to_string(),
        state: "open".to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        url: format!("https://github.com/{}/issues/{}", REPO, number),
        comments: Vec::new(),
    }
}

pub fn pull_request(number: i64, branch: &str, linked_issue: Option<i64>) -> PullRequest {
    PullRequest {
        number,
        title: format!("Plan: issue {}", linked_issue.unwrap_or(number)),
        body: linked_issue
            .map(|n| format!("Closes #{}", n))
            .unwrap_or_default(),
        author: "aidw-bot".to_string(),
        state: "open".to_string(),
        branch: branch.to_string(),
        base_branch: "main".to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap(),
        url: format!("https://github.com/{}/pull/{}", REPO, number),
        comments: Vec::new(),
        linked_issue_number: linked_issue,
    }
}

// ── Gateway ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct GatewayState {
    pub issues: HashMap<i64, Issue>,
    pub prs: HashMap<i64, PullRequest>,
    /// Every call, as `method:detail`.
    pub calls: Vec<String>,
    /// (thread number, body) for each created comment.
    pub comments: Vec<(i64, String)>,
    /// (comment id, body) for each comment edit.
    pub comment_updates: Vec<(i64, String)>,
    pub reactions: Vec<(i64, Reaction)>,
    pub created_prs: Vec<NewPullRequest>,
    /// (number, title, body) for each PR edit.
    pub pr_updates: Vec<(i64, Option<String>, Option<String>)>,
}

#[derive(Default)]
pub struct MockGateway {
    pub state: Mutex<GatewayState>,
    pub fail_reactions: bool,
    /// Fail the next `create_comment` call, then behave normally.
    fail_next_comment: AtomicBool,
    next_id: AtomicI64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1000),
            ..Default::default()
        }
    }

    pub fn failing_reactions(mut self) -> Self {
        self.fail_reactions = true;
        self
    }

    pub fn failing_first_comment(self) -> Self {
        self.fail_next_comment.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_issue(self, issue: Issue) -> Self {
        self.state.lock().unwrap().issues.insert(issue.number, issue);
        self
    }

    pub fn with_pr(self, pr: PullRequest) -> Self {
        self.state.lock().unwrap().prs.insert(pr.number, pr);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn comments(&self) -> Vec<(i64, String)> {
        self.state.lock().unwrap().comments.clone()
    }

    /// Body of the progress comment as last rendered.
    pub fn last_progress(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .comment_updates
            .last()
            .map(|(_, body)| body.clone())
            .or_else(|| state.comments.first().map(|(_, body)| body.clone()))
    }

    pub fn reactions(&self) -> Vec<Reaction> {
        self.state
            .lock()
            .unwrap()
            .reactions
            .iter()
            .map(|(_, r)| *r)
            .collect()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn get_issue(&self, _repo: &str, number: i64) -> Result<Issue> {
        self.record(format!("get_issue:{}", number));
        match self.state.lock().unwrap().issues.get(&number) {
            Some(issue) => Ok(issue.clone()),
            None => bail!("Issue #{} not found", number),
        }
    }

    async fn get_pull_request(&self, _repo: &str, number: i64) -> Result<PullRequest> {
        self.record(format!("get_pull_request:{}", number));
        match self.state.lock().unwrap().prs.get(&number) {
            Some(pr) => Ok(pr.clone()),
            None => bail!("PR #{} not found", number),
        }
    }

    async fn find_open_pull_request(&self, _repo: &str, head: &str) -> Result<Option<PullRequest>> {
        self.record(format!("find_open_pull_request:{}", head));
        Ok(self
            .state
            .lock()
            .unwrap()
            .prs
            .values()
            .find(|pr| pr.branch == head && pr.state == "open")
            .cloned())
    }

    async fn create_pull_request(&self, _repo: &str, new: &NewPullRequest) -> Result<PullRequest> {
        self.record(format!("create_pull_request:{}", new.head));
        let mut state = self.state.lock().unwrap();
        let number = 100 + state.created_prs.len() as i64;
        let mut pr = pull_request(number, &new.head, None);
        pr.title = new.title.clone();
        pr.body = new.body.clone();
        pr.base_branch = new.base.clone();
        state.created_prs.push(new.clone());
        state.prs.insert(number, pr.clone());
        Ok(pr)
    }

    async fn update_pull_request(
        &self,
        _repo: &str,
        number: i64,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<()> {
        self.record(format!("update_pull_request:{}", number));
        self.state.lock().unwrap().pr_updates.push((
            number,
            title.map(String::from),
            body.map(String::from),
        ));
        Ok(())
    }

    async fn get_default_branch(&self, _repo: &str) -> Result<String> {
        self.record("get_default_branch".to_string());
        Ok("main".to_string())
    }

    async fn create_comment(&self, _repo: &str, number: i64, body: &str) -> Result<Comment> {
        self.record(format!("create_comment:{}", number));
        if self.fail_next_comment.swap(false, Ordering::SeqCst) {
            bail!("comments API unavailable");
        }
        let id = self.next_id();
        self.state
            .lock()
            .unwrap()
            .comments
            .push((number, body.to_string()));
        Ok(Comment {
            id,
            author: "aidw-bot".to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            url: format!("https://github.com/{}/issues/{}#issuecomment-{}", REPO, number, id),
        })
    }

    async fn update_comment(&self, _repo: &str, comment_id: i64, body: &str) -> Result<()> {
        self.record(format!("update_comment:{}", comment_id));
        self.state
            .lock()
            .unwrap()
            .comment_updates
            .push((comment_id, body.to_string()));
        Ok(())
    }

    async fn add_reaction(&self, _repo: &str, comment_id: i64, reaction: Reaction) -> Result<()> {
        self.record(format!("add_reaction:{}", reaction.as_str()));
        if self.fail_reactions {
            bail!("reactions API unavailable");
        }
        self.state
            .lock()
            .unwrap()
            .reactions
            .push((comment_id, reaction));
        Ok(())
    }

    async fn list_webhooks(&self, _repo: &str) -> Result<Vec<Webhook>> {
        self.record("list_webhooks".to_string());
        Ok(vec![Webhook {
            id: 1,
            active: true,
            events: vec!["issue_comment".to_string()],
            config: WebhookConfig {
                url: Some("https://example.com/webhook".to_string()),
                content_type: Some("json".to_string()),
            },
            created_at: None,
        }])
    }

    async fn create_webhook(
        &self,
        _repo: &str,
        url: &str,
        _secret: &str,
        events: &[String],
    ) -> Result<Webhook> {
        self.record(format!("create_webhook:{}", url));
        Ok(Webhook {
            id: self.next_id(),
            active: true,
            events: events.to_vec(),
            config: WebhookConfig {
                url: Some(url.to_string()),
                content_type: Some("json".to_string()),
            },
            created_at: None,
        })
    }

    async fn delete_webhook(&self, _repo: &str, hook_id: i64) -> Result<()> {
        self.record(format!("delete_webhook:{}", hook_id));
        Ok(())
    }

    async fn list_webhook_deliveries(
        &self,
        _repo: &str,
        hook_id: i64,
        _limit: usize,
    ) -> Result<Vec<WebhookDelivery>> {
        self.record(format!("list_webhook_deliveries:{}", hook_id));
        Ok(Vec::new())
    }
}

// ── Sandbox ───────────────────────────────────────────────────────────

/// How mock sessions answer commands.
#[derive(Clone, Default)]
pub struct SandboxBehavior {
    pub agent_fails: bool,
    /// Files readable through `read_file`, by absolute path.
    pub files: HashMap<String, String>,
    pub fail_create: bool,
    /// How long the agent takes to answer.
    pub agent_delay: Option<Duration>,
}

#[derive(Default)]
pub struct MockSandboxProvider {
    pub behavior: SandboxBehavior,
    pub specs: Mutex<Vec<SessionSpec>>,
    pub commands: Arc<Mutex<Vec<String>>>,
    pub destroyed: Arc<AtomicUsize>,
}

impl MockSandboxProvider {
    pub fn new(behavior: SandboxBehavior) -> Self {
        Self {
            behavior,
            ..Default::default()
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.specs.lock().unwrap().len()
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Commands containing `needle`.
    pub fn ran(&self, needle: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }
}

#[async_trait]
impl SandboxProvider for MockSandboxProvider {
    async fn create(&self, spec: &SessionSpec) -> Result<Box<dyn ExecutionSession>> {
        if self.behavior.fail_create {
            bail!("sandbox quota exceeded");
        }
        let mut specs = self.specs.lock().unwrap();
        specs.push(spec.clone());
        Ok(Box::new(MockSession {
            id: format!("mock-{}", specs.len()),
            behavior: self.behavior.clone(),
            branch: spec.branch.clone().unwrap_or_else(|| "main".to_string()),
            commands: self.commands.clone(),
            destroyed: self.destroyed.clone(),
        }))
    }
}

pub struct MockSession {
    id: String,
    behavior: SandboxBehavior,
    branch: String,
    commands: Arc<Mutex<Vec<String>>>,
    destroyed: Arc<AtomicUsize>,
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

#[async_trait]
impl ExecutionSession for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, command: &str, _timeout: Duration) -> Result<CommandOutput> {
        self.commands.lock().unwrap().push(command.to_string());

        if command.contains("claude -p") {
            if let Some(delay) = self.behavior.agent_delay {
                tokio::time::sleep(delay).await;
            }
            if self.behavior.agent_fails {
                return Ok(CommandOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "rate limited".to_string(),
                });
            }
            return Ok(ok(
                r#"{"type":"result","is_error":false,"result":"Done.","num_turns":4,"total_cost_usd":0.12}"#,
            ));
        }
        if command.contains("git status --porcelain") {
            return Ok(ok(" M src/lib.rs\n"));
        }
        if command.contains("git branch --show-current") {
            return Ok(ok(&format!("{}\n", self.branch)));
        }
        if command.contains("git log --oneline") {
            return Ok(ok("abc1234 Initial commit\n"));
        }
        Ok(ok(""))
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        Ok(self.behavior.files.get(path).cloned())
    }

    async fn write_file(&self, path: &str, _content: &str) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("write_file:{}", path));
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Wiring ────────────────────────────────────────────────────────────

pub fn settings(allowed: &[&str]) -> Settings {
    let mut file = FileConfig::default();
    file.auth.allowed_users = allowed.iter().map(|u| u.to_string()).collect();
    Settings::from_parts(
        std::env::temp_dir().join("aidw-tests"),
        file,
        Credentials {
            webhook_secret: Some(SECRET.to_string()),
            gh_token: Some("ghp_test".to_string()),
            anthropic_api_key: Some("sk-test".to_string()),
            claude_oauth_token: None,
        },
    )
}

pub struct Harness {
    pub settings: Arc<Settings>,
    pub db: DbHandle,
    pub gateway: Arc<MockGateway>,
    pub sandboxes: Arc<MockSandboxProvider>,
    pub runner: Arc<WorkflowRunner>,
}

impl Harness {
    pub fn new(gateway: MockGateway, behavior: SandboxBehavior) -> Self {
        Self::with_settings(settings(&["alice"]), gateway, behavior)
    }

    pub fn with_settings(settings: Settings, gateway: MockGateway, behavior: SandboxBehavior) -> Self {
        let settings = Arc::new(settings);
        let db = DbHandle::new(SessionDb::new_in_memory().unwrap());
        let gateway = Arc::new(gateway);
        let sandboxes = Arc::new(MockSandboxProvider::new(behavior));
        let runner = Arc::new(WorkflowRunner::new(
            settings.clone(),
            db.clone(),
            gateway.clone(),
            sandboxes.clone(),
        ));
        Self {
            settings,
            db,
            gateway,
            sandboxes,
            runner,
        }
    }
}
