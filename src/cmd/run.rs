//! Manual workflow runs: `aidw run <command>`.

use std::sync::Arc;

use anyhow::Result;
use console::style;

use aidw::config::Settings;
use aidw::workflow::github::GitHubClient;
use aidw::workflow::models::{Session, SessionStatus};
use aidw::workflow::runner::WorkflowRunner;
use aidw::workflow::sandbox::DockerSandboxProvider;

use super::super::RunCommands;
use super::open_db;

pub async fn cmd_run(settings: Settings, command: RunCommands) -> Result<()> {
    let (kind, repo, number, instruction) = command.into_parts();

    let Some(token) = settings.credentials.gh_token.clone() else {
        anyhow::bail!("GH_TOKEN is not set. Run 'aidw config' for details.");
    };
    if settings.credentials.anthropic_api_key.is_none()
        && settings.credentials.claude_oauth_token.is_none()
    {
        anyhow::bail!("Set ANTHROPIC_API_KEY or CLAUDE_CODE_OAUTH_TOKEN to run the agent.");
    }

    let db = open_db(&settings)?;
    let gateway = Arc::new(GitHubClient::new(&token)?);
    let sandboxes = Arc::new(DockerSandboxProvider::new(&settings)?);
    let runner = WorkflowRunner::new(Arc::new(settings), db, gateway, sandboxes);

    let target = if kind.is_pr_only() { "PR" } else { "issue" };
    println!(
        "{} {} on {} {} #{}",
        style("Running").bold().cyan(),
        style(kind).bold(),
        repo,
        target,
        number
    );

    let session = runner
        .execute_manual(kind, &repo, number, &instruction)
        .await?;
    print_outcome(&session);

    if session.status == SessionStatus::Failed {
        anyhow::bail!("Workflow failed");
    }
    Ok(())
}

fn print_outcome(session: &Session) {
    println!();
    match session.status {
        SessionStatus::Completed => println!("{}", style("✓ Completed").green().bold()),
        SessionStatus::Failed => println!("{}", style("✗ Failed").red().bold()),
        other => println!("{}", style(other).yellow()),
    }
    println!("  Session: {}", session.id);
    if let Some(branch) = &session.branch {
        println!("  Branch:  {}", branch);
    }
    if let Some(pr) = session.pr_number {
        println!("  PR:      https://github.com/{}/pull/{}", session.repo, pr);
    }
    if let Some(error) = &session.error {
        println!("  {} {}", style("Error:").red().bold(), error);
    }
}
