use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::git;
use crate::config::Settings;

/// Where the repository is cloned inside every execution session.
pub const REPO_PATH: &str = "/home/user/repo";

const CLONE_TIMEOUT: Duration = Duration::from_secs(300);
const SHORT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// What an execution session should be prepared with.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub repo: String,
    pub branch: Option<String>,
}

/// An isolated, disposable environment holding a working copy of the repository.
#[async_trait]
pub trait ExecutionSession: Send + Sync {
    fn id(&self) -> &str;

    fn repo_path(&self) -> &str {
        REPO_PATH
    }

    /// Run a shell command. Exceeding `timeout` is an error, not a non-zero exit.
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput>;

    /// Read a file, or `None` if it does not exist.
    async fn read_file(&self, path: &str) -> Result<Option<String>>;

    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    async fn destroy(&self) -> Result<()>;
}

/// Acquires execution sessions. Real implementation: `DockerSandboxProvider`.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self, spec: &SessionSpec) -> Result<Box<dyn ExecutionSession>>;
}

/// Quote a string for safe interpolation into a POSIX shell command.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

// ── Docker backend ────────────────────────────────────────────────────

/// One container per run, driven through the `docker` CLI.
pub struct DockerSandboxProvider {
    docker: String,
    image: String,
    memory: String,
    cpus: f64,
    lifetime_secs: u64,
    gh_token: String,
    env: Vec<(String, String)>,
}

impl DockerSandboxProvider {
    pub fn new(settings: &Settings) -> Result<Self> {
        let gh_token = settings
            .credentials
            .gh_token
            .clone()
            .context("GH_TOKEN is not set; it is required to clone repositories")?;

        let mut env: Vec<(String, String)> = settings
            .sandbox
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();
        env.extend(settings.credentials.agent_env());

        Ok(Self {
            docker: std::env::var("DOCKER_CMD").unwrap_or_else(|_| "docker".to_string()),
            image: settings.sandbox.image.clone(),
            memory: settings.sandbox.memory.clone(),
            cpus: settings.sandbox.cpus,
            lifetime_secs: settings.sandbox.lifetime_secs,
            gh_token,
            env,
        })
    }

    /// Arguments for `docker run`. Environment values are passed through the
    /// docker process environment so they never appear on a command line.
    /// The container removes itself once `sleep` exits.
    fn run_args(&self, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--memory".to_string(),
            self.memory.clone(),
            "--cpus".to_string(),
            self.cpus.to_string(),
        ];
        for (key, _) in &self.env {
            args.push("-e".to_string());
            args.push(key.clone());
        }
        args.push(self.image.clone());
        args.push("sleep".to_string());
        args.push(self.lifetime_secs.to_string());
        args
    }

    async fn initialize(&self, session: &DockerSession, spec: &SessionSpec) -> Result<()> {
        let clone_url = format!(
            "https://x-access-token:{}@github.com/{}.git",
            self.gh_token, spec.repo
        );
        let clone = session
            .run(
                &format!("git clone {} {}", shell_quote(&clone_url), REPO_PATH),
                CLONE_TIMEOUT,
            )
            .await
            .context("Failed to clone repository")?;
        if !clone.success() {
            anyhow::bail!(
                "Failed to clone repository: {}",
                clone.stderr.replace(&self.gh_token, "***").trim()
            );
        }

        let identity = session
            .run(
                &format!(
                    "cd {} && git config user.email \"aidw@users.noreply.github.com\" && git config user.name \"AIDW Bot\"",
                    REPO_PATH
                ),
                SHORT_TIMEOUT,
            )
            .await?;
        if !identity.success() {
            anyhow::bail!("Failed to configure git identity: {}", identity.stderr.trim());
        }

        if let Some(branch) = &spec.branch
            && git::checkout_branch(session, branch).await.is_err()
        {
            git::create_branch(session, branch).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl SandboxProvider for DockerSandboxProvider {
    async fn create(&self, spec: &SessionSpec) -> Result<Box<dyn ExecutionSession>> {
        let name = format!("aidw-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        tracing::info!(container = %name, repo = %spec.repo, "Creating sandbox");

        let mut cmd = Command::new(&self.docker);
        cmd.args(self.run_args(&name))
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = cmd
            .output()
            .await
            .context("Failed to run docker; is it installed and on PATH?")?;
        if !output.status.success() {
            anyhow::bail!(
                "docker run failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let session = DockerSession {
            docker: self.docker.clone(),
            container: name,
        };

        if let Err(e) = self.initialize(&session, spec).await {
            tracing::error!(container = %session.container, error = %e, "Sandbox initialization failed");
            if let Err(destroy_err) = session.destroy().await {
                tracing::warn!(container = %session.container, error = %destroy_err, "Failed to remove sandbox");
            }
            return Err(e);
        }

        tracing::info!(container = %session.container, "Sandbox ready");
        Ok(Box::new(session))
    }
}

pub struct DockerSession {
    docker: String,
    container: String,
}

#[async_trait]
impl ExecutionSession for DockerSession {
    fn id(&self) -> &str {
        &self.container
    }

    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.docker);
        cmd.args(["exec", &self.container, "sh", "-c", command])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Command timed out after {}s in sandbox {}",
                    timeout.as_secs(),
                    self.container
                )
            })?
            .context("Failed to run docker exec")?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        let output = self
            .run(&format!("cat {}", shell_quote(path)), SHORT_TIMEOUT)
            .await?;
        Ok(output.success().then_some(output.stdout))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let dir = Path::new(path)
            .parent()
            .and_then(|p| p.to_str())
            .filter(|p| !p.is_empty())
            .unwrap_or("/");
        let script = format!(
            "mkdir -p {} && cat > {}",
            shell_quote(dir),
            shell_quote(path)
        );

        let mut child = Command::new(&self.docker)
            .args(["exec", "-i", &self.container, "sh", "-c", &script])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn docker exec for file write")?;

        let mut stdin = child
            .stdin
            .take()
            .context("docker exec stdin was not captured")?;
        stdin
            .write_all(content.as_bytes())
            .await
            .with_context(|| format!("Failed to stream {} into sandbox", path))?;
        drop(stdin);

        let output = tokio::time::timeout(SHORT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("Timed out writing {} into sandbox", path))?
            .context("Failed to wait for docker exec")?;
        if !output.status.success() {
            anyhow::bail!(
                "Failed to write {}: {}",
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        tracing::info!(container = %self.container, "Destroying sandbox");
        let output = Command::new(&self.docker)
            .args(["rm", "-f", &self.container])
            .output()
            .await
            .context("Failed to run docker rm")?;
        if !output.status.success() {
            anyhow::bail!(
                "docker rm failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
