//! Runtime configuration for aidw.
//!
//! `Settings` is built once at process start and handed to every component
//! that needs it. Values come from three places, later ones filling in what
//! earlier ones leave unset:
//!
//! 1. `.env` in the working directory (loaded into the process environment)
//! 2. `<home>/config.yml` for server, GitHub, auth and sandbox settings
//! 3. Environment variables for credentials
//!
//! `<home>` is `$AIDW_HOME` when set, otherwise `~/.aidw`.
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 8787
//!   workers: 3
//! github:
//!   bot_name: aidw
//! auth:
//!   allowed_users: [octocat]
//! sandbox:
//!   image: node:22-bookworm
//!   memory: 4g
//!   cpus: 2.0
//!   lifetime_secs: 3600
//!   agent_timeout_secs: 1800
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "config.yml";
pub const DB_FILE_NAME: &str = "sessions.db";
pub const LOG_FILE_NAME: &str = "aidw.log";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Maximum number of workflows executing at once.
    pub workers: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            workers: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitHubSettings {
    pub bot_name: String,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            bot_name: "aidw".to_string(),
        }
    }
}

/// Allow-list of GitHub users who may trigger workflows. Empty denies everyone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthSettings {
    pub allowed_users: Vec<String>,
}

/// Configuration for the per-run execution container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxSettings {
    pub image: String,
    pub memory: String,
    pub cpus: f64,
    /// Hard upper bound on a container's lifetime.
    pub lifetime_secs: u64,
    /// Upper bound on a single agent invocation.
    pub agent_timeout_secs: u64,
    pub env: HashMap<String, String>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: "node:22-bookworm".to_string(),
            memory: "4g".to_string(),
            cpus: 2.0,
            lifetime_secs: 3600,
            agent_timeout_secs: 1800,
            env: HashMap::new(),
        }
    }
}

/// Shape of `config.yml`. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerSettings,
    pub github: GitHubSettings,
    pub auth: AuthSettings,
    pub sandbox: SandboxSettings,
}

/// Credentials read from the environment. Never written to disk.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub webhook_secret: Option<String>,
    pub gh_token: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub claude_oauth_token: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            webhook_secret: non_empty_env("AIDW_WEBHOOK_SECRET"),
            gh_token: non_empty_env("GH_TOKEN").or_else(|| non_empty_env("GITHUB_TOKEN")),
            anthropic_api_key: non_empty_env("ANTHROPIC_API_KEY"),
            claude_oauth_token: non_empty_env("CLAUDE_CODE_OAUTH_TOKEN"),
        }
    }

    /// Environment assignments that let the agent authenticate inside a sandbox.
    pub fn agent_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(key) = &self.anthropic_api_key {
            env.push(("ANTHROPIC_API_KEY".to_string(), key.clone()));
        }
        if let Some(token) = &self.claude_oauth_token {
            env.push(("CLAUDE_CODE_OAUTH_TOKEN".to_string(), token.clone()));
        }
        if let Some(token) = &self.gh_token {
            env.push(("GH_TOKEN".to_string(), token.clone()));
        }
        env
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Fully resolved settings for one process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub home: PathBuf,
    pub server: ServerSettings,
    pub github: GitHubSettings,
    pub auth: AuthSettings,
    pub sandbox: SandboxSettings,
    pub credentials: Credentials,
}

impl Settings {
    /// Load settings from `.env`, the config file and the environment.
    pub fn load() -> Result<Self> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();
        let home = Self::default_home()?;
        Self::load_from(&home, Credentials::from_env())
    }

    /// Load settings rooted at an explicit home directory.
    pub fn load_from(home: &Path, credentials: Credentials) -> Result<Self> {
        let config_path = home.join(CONFIG_FILE_NAME);
        let file = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            if content.trim().is_empty() {
                FileConfig::default()
            } else {
                serde_yaml::from_str::<FileConfig>(&content)
                    .with_context(|| format!("Failed to parse {}", config_path.display()))?
            }
        } else {
            FileConfig::default()
        };

        Ok(Self::from_parts(home.to_path_buf(), file, credentials))
    }

    pub fn from_parts(home: PathBuf, file: FileConfig, credentials: Credentials) -> Self {
        Self {
            home,
            server: file.server,
            github: file.github,
            auth: file.auth,
            sandbox: file.sandbox,
            credentials,
        }
    }

    fn default_home() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("AIDW_HOME")
            && !dir.trim().is_empty()
        {
            return Ok(PathBuf::from(dir));
        }
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".aidw"))
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join(CONFIG_FILE_NAME)
    }

    pub fn db_path(&self) -> PathBuf {
        self.home.join(DB_FILE_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.home.join(LOG_FILE_NAME)
    }

    pub fn ensure_home(&self) -> Result<()> {
        std::fs::create_dir_all(&self.home)
            .with_context(|| format!("Failed to create {}", self.home.display()))
    }

    /// Write a default `config.yml` if none exists. Returns true if a file was written.
    pub fn write_default_config(&self) -> Result<bool> {
        self.ensure_home()?;
        let path = self.config_path();
        if path.exists() {
            return Ok(false);
        }
        let content = serde_yaml::to_string(&FileConfig::default())
            .context("Failed to serialize default config")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(true)
    }

    /// Names of required credentials that are not set.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.credentials.webhook_secret.is_none() {
            missing.push("AIDW_WEBHOOK_SECRET");
        }
        if self.credentials.gh_token.is_none() {
            missing.push("GH_TOKEN");
        }
        if self.credentials.anthropic_api_key.is_none()
            && self.credentials.claude_oauth_token.is_none()
        {
            missing.push("ANTHROPIC_API_KEY or CLAUDE_CODE_OAUTH_TOKEN");
        }
        missing
    }

    /// Settings with defaults everywhere, rooted at `home`. Used by tests and tooling.
    pub fn with_home(home: PathBuf) -> Self {
        Self::from_parts(home, FileConfig::default(), Credentials::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_config_file() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_from(dir.path(), Credentials::default()).unwrap();
        assert_eq!(settings.server.port, 8787);
        assert_eq!(settings.server.workers, 3);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.github.bot_name, "aidw");
        assert!(settings.auth.allowed_users.is_empty());
        assert_eq!(settings.sandbox.lifetime_secs, 3600);
        assert_eq!(settings.sandbox.agent_timeout_secs, 1800);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "server:\n  port: 9000\nauth:\n  allowed_users:\n    - alice\n    - bob\n",
        )
        .unwrap();

        let settings = Settings::load_from(dir.path(), Credentials::default()).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.workers, 3);
        assert_eq!(settings.auth.allowed_users, vec!["alice", "bob"]);
        assert_eq!(settings.github.bot_name, "aidw");
    }

    #[test]
    fn test_sandbox_section() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
sandbox:
  image: python:3.12-slim
  cpus: 4.0
  env:
    NODE_ENV: production
"#,
        )
        .unwrap();

        let settings = Settings::load_from(dir.path(), Credentials::default()).unwrap();
        assert_eq!(settings.sandbox.image, "python:3.12-slim");
        assert_eq!(settings.sandbox.cpus, 4.0);
        assert_eq!(settings.sandbox.memory, "4g");
        assert_eq!(settings.sandbox.env.get("NODE_ENV").unwrap(), "production");
    }

    #[test]
    fn test_empty_config_file_is_default() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "").unwrap();
        let settings = Settings::load_from(dir.path(), Credentials::default()).unwrap();
        assert_eq!(settings.server.port, 8787);
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "server: [not, a, map").unwrap();
        assert!(Settings::load_from(dir.path(), Credentials::default()).is_err());
    }

    #[test]
    fn test_write_default_config_once() {
        let dir = tempdir().unwrap();
        let settings = Settings::with_home(dir.path().join("home"));
        assert!(settings.write_default_config().unwrap());
        assert!(settings.config_path().exists());
        assert!(!settings.write_default_config().unwrap());

        let reloaded = Settings::load_from(&settings.home, Credentials::default()).unwrap();
        assert_eq!(reloaded.server, ServerSettings::default());
    }

    #[test]
    fn test_paths_live_under_home() {
        let settings = Settings::with_home(PathBuf::from("/tmp/aidw-home"));
        assert_eq!(settings.db_path(), PathBuf::from("/tmp/aidw-home/sessions.db"));
        assert_eq!(settings.log_path(), PathBuf::from("/tmp/aidw-home/aidw.log"));
        assert_eq!(settings.config_path(), PathBuf::from("/tmp/aidw-home/config.yml"));
    }

    #[test]
    fn test_missing_credentials() {
        let settings = Settings::with_home(PathBuf::from("/tmp"));
        let missing = settings.missing_credentials();
        assert_eq!(missing.len(), 3);
        assert!(missing.contains(&"AIDW_WEBHOOK_SECRET"));
        assert!(missing.contains(&"GH_TOKEN"));

        let mut settings = settings;
        settings.credentials = Credentials {
            webhook_secret: Some("s".into()),
            gh_token: Some("ghp_x".into()),
            anthropic_api_key: None,
            claude_oauth_token: Some("tok".into()),
        };
        assert!(settings.missing_credentials().is_empty());
    }

    #[test]
    fn test_agent_env_only_includes_present_values() {
        let creds = Credentials {
            webhook_secret: Some("secret".into()),
            gh_token: Some("ghp_abc".into()),
            anthropic_api_key: Some("sk-ant".into()),
            claude_oauth_token: None,
        };
        let env = creds.agent_env();
        assert_eq!(env.len(), 2);
        assert!(env.iter().any(|(k, _)| k == "ANTHROPIC_API_KEY"));
        assert!(env.iter().any(|(k, _)| k == "GH_TOKEN"));
        assert!(!env.iter().any(|(k, _)| k == "AIDW_WEBHOOK_SECRET"));
    }
}
