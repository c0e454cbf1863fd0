use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "aidw";
const PER_PAGE: usize = 100;

static LINKED_ISSUE_DIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:closes?|fixes?|resolves?)\s*#(\d+)").unwrap());
static LINKED_ISSUE_LOOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:closes?|fixes?|resolves?)\s+.*?#(\d+)").unwrap());

// ── Domain types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: i64,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub number: i64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequest {
    pub number: i64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub state: String,
    pub branch: String,
    pub base_branch: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
    /// Regular and inline review comments, oldest first.
    pub comments: Vec<Comment>,
    pub linked_issue_number: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub draft: bool,
}

/// Reaction content accepted by the GitHub reactions API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Reaction {
    #[serde(rename = "+1")]
    ThumbsUp,
    #[serde(rename = "-1")]
    ThumbsDown,
    #[serde(rename = "laugh")]
    Laugh,
    #[serde(rename = "confused")]
    Confused,
    #[serde(rename = "heart")]
    Heart,
    #[serde(rename = "hooray")]
    Hooray,
    #[serde(rename = "rocket")]
    Rocket,
    #[serde(rename = "eyes")]
    Eyes,
}

impl Reaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThumbsUp => "+1",
            Self::ThumbsDown => "-1",
            Self::Laugh => "laugh",
            Self::Confused => "confused",
            Self::Heart => "heart",
            Self::Hooray => "hooray",
            Self::Rocket => "rocket",
            Self::Eyes => "eyes",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Webhook {
    pub id: i64,
    pub active: bool,
    pub events: Vec<String>,
    pub config: WebhookConfig,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookDelivery {
    pub id: i64,
    pub guid: String,
    pub delivered_at: DateTime<Utc>,
    pub status: String,
    pub status_code: i64,
    pub event: String,
    pub action: Option<String>,
    #[serde(default)]
    pub redelivery: bool,
}

/// Find the issue a PR body claims to close (`Closes #12`, `fixes the bug in #12`).
pub fn parse_linked_issue(body: &str) -> Option<i64> {
    [&*LINKED_ISSUE_DIRECT, &*LINKED_ISSUE_LOOSE]
        .iter()
        .find_map(|re| re.captures(body))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

// ── Gateway seam ──────────────────────────────────────────────────────

/// Operations the orchestrator needs from the code-hosting API.
/// Real implementation: `GitHubClient`. Test doubles live in `tests/common`.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn get_issue(&self, repo: &str, number: i64) -> Result<Issue>;

    async fn get_pull_request(&self, repo: &str, number: i64) -> Result<PullRequest>;

    /// The open PR whose head is `head_branch`, if one exists.
    async fn find_open_pull_request(
        &self,
        repo: &str,
        head_branch: &str,
    ) -> Result<Option<PullRequest>>;

    async fn create_pull_request(&self, repo: &str, pr: &NewPullRequest) -> Result<PullRequest>;

    async fn update_pull_request(
        &self,
        repo: &str,
        number: i64,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<()>;

    async fn get_default_branch(&self, repo: &str) -> Result<String>;

    async fn create_comment(&self, repo: &str, number: i64, body: &str) -> Result<Comment>;

    async fn update_comment(&self, repo: &str, comment_id: i64, body: &str) -> Result<()>;

    async fn add_reaction(&self, repo: &str, comment_id: i64, reaction: Reaction) -> Result<()>;

    async fn list_webhooks(&self, repo: &str) -> Result<Vec<Webhook>>;

    async fn create_webhook(
        &self,
        repo: &str,
        url: &str,
        secret: &str,
        events: &[String],
    ) -> Result<Webhook>;

    async fn delete_webhook(&self, repo: &str, hook_id: i64) -> Result<()>;

    async fn list_webhook_deliveries(
        &self,
        repo: &str,
        hook_id: i64,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>>;
}

// ── REST client ───────────────────────────────────────────────────────

pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
}

impl GitHubClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(token, API_BASE)
    }

    /// Point the client at a different API root (GitHub Enterprise, test servers).
    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .context("GitHub token contains invalid header characters")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(API_VERSION),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build GitHub HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.http
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("Failed to send GET {}", path))?
            .error_for_status()
            .with_context(|| format!("GitHub GET {} returned error status", path))?
            .json()
            .await
            .with_context(|| format!("Failed to parse GitHub response for {}", path))
    }

    /// Fetch every page of a list endpoint.
    async fn get_paginated<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            let items: Vec<T> = self
                .http
                .get(self.url(path))
                .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())])
                .send()
                .await
                .with_context(|| format!("Failed to send GET {}", path))?
                .error_for_status()
                .with_context(|| format!("GitHub GET {} returned error status", path))?
                .json()
                .await
                .with_context(|| format!("Failed to parse GitHub response for {}", path))?;

            let count = items.len();
            all.extend(items);
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all)
    }

    async fn issue_comments(&self, repo: &str, number: i64) -> Result<Vec<Comment>> {
        let raw: Vec<ApiComment> = self
            .get_paginated(&format!("/repos/{}/issues/{}/comments", repo, number))
            .await?;
        Ok(raw.into_iter().map(ApiComment::into_comment).collect())
    }

    async fn review_comments(&self, repo: &str, number: i64) -> Result<Vec<Comment>> {
        let raw: Vec<ApiReviewComment> = self
            .get_paginated(&format!("/repos/{}/pulls/{}/comments", repo, number))
            .await?;
        Ok(raw.into_iter().map(ApiReviewComment::into_comment).collect())
    }
}

#[async_trait]
impl Gateway for GitHubClient {
    async fn get_issue(&self, repo: &str, number: i64) -> Result<Issue> {
        let raw: ApiIssue = self
            .get_json(&format!("/repos/{}/issues/{}", repo, number))
            .await?;
        let comments = self.issue_comments(repo, number).await?;
        Ok(raw.into_issue(comments))
    }

    async fn get_pull_request(&self, repo: &str, number: i64) -> Result<PullRequest> {
        let raw: ApiPullRequest = self
            .get_json(&format!("/repos/{}/pulls/{}", repo, number))
            .await?;
        let mut comments = self.issue_comments(repo, number).await?;
        comments.extend(self.review_comments(repo, number).await?);
        comments.sort_by_key(|c| c.created_at);
        Ok(raw.into_pull_request(comments))
    }

    async fn find_open_pull_request(
        &self,
        repo: &str,
        head_branch: &str,
    ) -> Result<Option<PullRequest>> {
        let owner = repo.split('/').next().unwrap_or(repo);
        let path = format!("/repos/{}/pulls", repo);
        let prs: Vec<ApiPullRequest> = self
            .http
            .get(self.url(&path))
            .query(&[
                ("head", format!("{}:{}", owner, head_branch)),
                ("state", "open".to_string()),
            ])
            .send()
            .await
            .context("Failed to send pull request search to GitHub")?
            .error_for_status()
            .context("GitHub pull request search returned error status")?
            .json()
            .await
            .context("Failed to parse pull request search response")?;
        Ok(prs
            .into_iter()
            .next()
            .map(|pr| pr.into_pull_request(Vec::new())))
    }

    async fn create_pull_request(&self, repo: &str, pr: &NewPullRequest) -> Result<PullRequest> {
        let raw: ApiPullRequest = self
            .http
            .post(self.url(&format!("/repos/{}/pulls", repo)))
            .json(&serde_json::json!({
                "title": pr.title,
                "body": pr.body,
                "head": pr.head,
                "base": pr.base,
                "draft": pr.draft,
            }))
            .send()
            .await
            .context("Failed to send create pull request to GitHub")?
            .error_for_status()
            .context("GitHub create pull request returned error status")?
            .json()
            .await
            .context("Failed to parse created pull request")?;
        Ok(raw.into_pull_request(Vec::new()))
    }

    async fn update_pull_request(
        &self,
        repo: &str,
        number: i64,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<()> {
        let mut patch = serde_json::Map::new();
        if let Some(title) = title {
            patch.insert("title".into(), title.into());
        }
        if let Some(body) = body {
            patch.insert("body".into(), body.into());
        }
        if patch.is_empty() {
            return Ok(());
        }

        self.http
            .patch(self.url(&format!("/repos/{}/pulls/{}", repo, number)))
            .json(&patch)
            .send()
            .await
            .context("Failed to send update pull request to GitHub")?
            .error_for_status()
            .context("GitHub update pull request returned error status")?;
        Ok(())
    }

    async fn get_default_branch(&self, repo: &str) -> Result<String> {
        let raw: ApiRepo = self.get_json(&format!("/repos/{}", repo)).await?;
        Ok(raw.default_branch)
    }

    async fn create_comment(&self, repo: &str, number: i64, body: &str) -> Result<Comment> {
        let raw: ApiComment = self
            .http
            .post(self.url(&format!("/repos/{}/issues/{}/comments", repo, number)))
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .context("Failed to send create comment to GitHub")?
            .error_for_status()
            .context("GitHub create comment returned error status")?
            .json()
            .await
            .context("Failed to parse created comment")?;
        Ok(raw.into_comment())
    }

    async fn update_comment(&self, repo: &str, comment_id: i64, body: &str) -> Result<()> {
        self.http
            .patch(self.url(&format!("/repos/{}/issues/comments/{}", repo, comment_id)))
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .context("Failed to send update comment to GitHub")?
            .error_for_status()
            .context("GitHub update comment returned error status")?;
        Ok(())
    }

    async fn add_reaction(&self, repo: &str, comment_id: i64, reaction: Reaction) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!(
                "/repos/{}/issues/comments/{}/reactions",
                repo, comment_id
            )))
            .json(&serde_json::json!({ "content": reaction.as_str() }))
            .send()
            .await
            .context("Failed to send reaction to GitHub")?;

        // 201 = created, 200 = already present
        if !matches!(resp.status().as_u16(), 200 | 201) {
            resp.error_for_status()
                .context("GitHub reaction API returned error status")?;
        }
        Ok(())
    }

    async fn list_webhooks(&self, repo: &str) -> Result<Vec<Webhook>> {
        self.get_paginated(&format!("/repos/{}/hooks", repo)).await
    }

    async fn create_webhook(
        &self,
        repo: &str,
        url: &str,
        secret: &str,
        events: &[String],
    ) -> Result<Webhook> {
        self.http
            .post(self.url(&format!("/repos/{}/hooks", repo)))
            .json(&serde_json::json!({
                "name": "web",
                "active": true,
                "events": events,
                "config": {
                    "url": url,
                    "content_type": "json",
                    "secret": secret,
                    "insecure_ssl": "0",
                },
            }))
            .send()
            .await
            .context("Failed to send create webhook to GitHub")?
            .error_for_status()
            .context("GitHub create webhook returned error status")?
            .json()
            .await
            .context("Failed to parse created webhook")
    }

    async fn delete_webhook(&self, repo: &str, hook_id: i64) -> Result<()> {
        self.http
            .delete(self.url(&format!("/repos/{}/hooks/{}", repo, hook_id)))
            .send()
            .await
            .context("Failed to send delete webhook to GitHub")?
            .error_for_status()
            .context("GitHub delete webhook returned error status")?;
        Ok(())
    }

    async fn list_webhook_deliveries(
        &self,
        repo: &str,
        hook_id: i64,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>> {
        let per_page = limit.clamp(1, PER_PAGE);
        self.http
            .get(self.url(&format!("/repos/{}/hooks/{}/deliveries", repo, hook_id)))
            .query(&[("per_page", per_page.to_string())])
            .send()
            .await
            .context("Failed to send webhook deliveries request to GitHub")?
            .error_for_status()
            .context("GitHub webhook deliveries API returned error status")?
            .json()
            .await
            .context("Failed to parse webhook deliveries")
    }
}

// ── Wire types ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiRepo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    number: i64,
    title: String,
    body: Option<String>,
    user: ApiUser,
    state: String,
    created_at: DateTime<Utc>,
    html_url: String,
}

impl ApiIssue {
    fn into_issue(self, comments: Vec<Comment>) -> Issue {
        Issue {
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            author: self.user.login,
            state: self.state,
            created_at: self.created_at,
            url: self.html_url,
            comments,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiComment {
    id: i64,
    user: ApiUser,
    body: Option<String>,
    created_at: DateTime<Utc>,
    html_url: String,
}

impl ApiComment {
    fn into_comment(self) -> Comment {
        Comment {
            id: self.id,
            author: self.user.login,
            body: self.body.unwrap_or_default(),
            created_at: self.created_at,
            url: self.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiReviewComment {
    id: i64,
    user: ApiUser,
    body: Option<String>,
    path: Option<String>,
    created_at: DateTime<Utc>,
    html_url: String,
}

impl ApiReviewComment {
    fn into_comment(self) -> Comment {
        Comment {
            id: self.id,
            author: self.user.login,
            body: format!(
                "[Review comment on {}]\n{}",
                self.path.as_deref().unwrap_or("file"),
                self.body.unwrap_or_default()
            ),
            created_at: self.created_at,
            url: self.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiRef {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiPullRequest {
    number: i64,
    title: String,
    body: Option<String>,
    user: ApiUser,
    state: String,
    head: ApiRef,
    base: ApiRef,
    created_at: DateTime<Utc>,
    html_url: String,
}

impl ApiPullRequest {
    fn into_pull_request(self, comments: Vec<Comment>) -> PullRequest {
        let body = self.body.unwrap_or_default();
        let linked_issue_number = parse_linked_issue(&body);
        PullRequest {
            number: self.number,
            title: self.title,
            body,
            author: self.user.login,
            state: self.state,
            branch: self.head.name,
            base_branch: self.base.name,
            created_at: self.created_at,
            url: self.html_url,
            comments,
            linked_issue_number,
        }
    }
}
