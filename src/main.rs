use anyhow::Result;
use clap::{Args, Parser, Subcommand};

mod cmd;

use aidw::config::Settings;
use aidw::workflow::models::CommandKind;

#[derive(Parser)]
#[command(name = "aidw")]
#[command(version, about = "AI development workflows triggered from GitHub comments")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the default config file if needed and show the active settings
    Config,
    /// Run the webhook server
    Server {
        /// Address to bind (defaults to server.host)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (defaults to server.port)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a workflow now, without a trigger comment
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Show one session
    Status {
        /// Session id
        id: String,
    },
    /// List recent sessions
    Sessions {
        #[arg(long)]
        repo: Option<String>,
        /// pending, running, completed or failed
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Delete old sessions
    Cleanup {
        /// Delete sessions created more than this many days ago
        #[arg(long, default_value = "30")]
        days: i64,
    },
    /// Show the end of the server log
    Logs {
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
    /// Manage the repository webhook that delivers triggers
    Webhook {
        #[command(subcommand)]
        command: WebhookCommands,
    },
}

/// Target for commands that start from an issue.
#[derive(Args, Clone)]
pub struct IssueTarget {
    /// Repository as owner/name
    #[arg(long)]
    pub repo: String,
    #[arg(long)]
    pub issue: i64,
    /// Extra instruction for the agent
    #[arg(trailing_var_arg = true)]
    pub instruction: Vec<String>,
}

/// Target for commands that start from a pull request.
#[derive(Args, Clone)]
pub struct PrTarget {
    /// Repository as owner/name
    #[arg(long)]
    pub repo: String,
    #[arg(long)]
    pub pr: i64,
    /// Extra instruction for the agent
    #[arg(trailing_var_arg = true)]
    pub instruction: Vec<String>,
}

#[derive(Subcommand, Clone)]
pub enum RunCommands {
    /// Write an implementation plan for an issue and open a draft PR
    Plan(IssueTarget),
    /// Plan and implement an issue in one go
    Oneshot(IssueTarget),
    /// Revise the plan on a PR from review feedback
    Refine(PrTarget),
    /// Implement the plan on a PR
    Build(PrTarget),
    /// Address review feedback on an implementation PR
    Iterate(PrTarget),
    /// Post an AI code review on a PR
    Codereview(PrTarget),
}

impl RunCommands {
    /// Command kind, repository, thread number and joined instruction.
    pub fn into_parts(self) -> (CommandKind, String, i64, String) {
        let (kind, repo, number, words) = match self {
            RunCommands::Plan(t) => (CommandKind::Plan, t.repo, t.issue, t.instruction),
            RunCommands::Oneshot(t) => (CommandKind::Oneshot, t.repo, t.issue, t.instruction),
            RunCommands::Refine(t) => (CommandKind::Refine, t.repo, t.pr, t.instruction),
            RunCommands::Build(t) => (CommandKind::Build, t.repo, t.pr, t.instruction),
            RunCommands::Iterate(t) => (CommandKind::Iterate, t.repo, t.pr, t.instruction),
            RunCommands::Codereview(t) => (CommandKind::Codereview, t.repo, t.pr, t.instruction),
        };
        (kind, repo, number, words.join(" "))
    }
}

#[derive(Subcommand, Clone)]
pub enum WebhookCommands {
    /// List webhooks on a repository
    List {
        #[arg(long)]
        repo: String,
    },
    /// Create a webhook pointing at this server
    Create {
        #[arg(long)]
        repo: String,
        /// Public URL of the /webhook endpoint
        #[arg(long)]
        url: String,
        /// Shared secret (defaults to AIDW_WEBHOOK_SECRET)
        #[arg(long)]
        secret: Option<String>,
    },
    /// Delete a webhook
    Delete {
        #[arg(long)]
        repo: String,
        id: i64,
    },
    /// Show recent deliveries for a webhook
    Deliveries {
        #[arg(long)]
        repo: String,
        id: i64,
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let log_file = matches!(cli.command, Commands::Server { .. }).then(|| settings.log_path());
    let _log_guard = aidw::logging::init(cli.verbose, log_file.as_deref())?;

    match cli.command {
        Commands::Config => cmd::cmd_config(&settings)?,
        Commands::Server { host, port } => cmd::cmd_server(settings, host, port).await?,
        Commands::Run { command } => cmd::cmd_run(settings, command).await?,
        Commands::Status { id } => cmd::cmd_status(&settings, &id).await?,
        Commands::Sessions {
            repo,
            status,
            limit,
        } => cmd::cmd_sessions(&settings, repo, status, limit).await?,
        Commands::Cleanup { days } => cmd::cmd_cleanup(&settings, days).await?,
        Commands::Logs { lines } => cmd::cmd_logs(&settings, lines)?,
        Commands::Webhook { command } => cmd::cmd_webhook(&settings, command).await?,
    }

    Ok(())
}
