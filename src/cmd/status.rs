//! Session inspection and housekeeping: `aidw status`, `sessions`, `cleanup`.

use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use console::style;

use aidw::config::Settings;
use aidw::workflow::models::{Session, SessionStatus};

use super::open_db;

fn styled_status(status: SessionStatus) -> console::StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        SessionStatus::Pending => s.dim(),
        SessionStatus::Running => s.yellow(),
        SessionStatus::Completed => s.green(),
        SessionStatus::Failed => s.red(),
    }
}

fn short_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

fn print_session(session: &Session) {
    println!();
    println!("{} {}", style("Session").bold().cyan(), style(&session.id).bold());
    println!();
    println!("  Command:      {}", session.command);
    println!("  Status:       {}", styled_status(session.status));
    println!("  Repo:         {}", session.repo);
    println!("  Issue:        #{}", session.issue_number);
    if let Some(pr) = session.pr_number {
        println!("  PR:           #{}", pr);
    }
    if let Some(branch) = &session.branch {
        println!("  Branch:       {}", branch);
    }
    if let Some(sandbox) = &session.sandbox_id {
        println!("  Sandbox:      {}", sandbox);
    }
    if let Some(by) = &session.triggered_by {
        println!("  Triggered by: {}", by);
    }
    if let Some(instruction) = &session.instruction {
        println!("  Instruction:  {}", instruction);
    }
    println!("  Created:      {}", session.created_at.to_rfc3339());
    println!("  Updated:      {}", session.updated_at.to_rfc3339());
    if let Some(done) = &session.completed_at {
        println!("  Completed:    {}", done.to_rfc3339());
    } else if session.status == SessionStatus::Running {
        let idle = Utc::now() - session.updated_at;
        println!(
            "  {}",
            style(format!("No update for {} min", idle.num_minutes())).dim()
        );
    }
    if let Some(error) = &session.error {
        println!();
        println!("  {} {}", style("Error:").red().bold(), error);
    }
    if !session.metadata.is_empty() {
        println!();
        println!("  Metadata:");
        let mut keys: Vec<&String> = session.metadata.keys().collect();
        keys.sort();
        for key in keys {
            println!("    {} = {}", key, session.metadata[key]);
        }
    }
    println!();
}

pub async fn cmd_status(settings: &Settings, id: &str) -> Result<()> {
    let db = open_db(settings)?;
    let lookup = id.to_string();
    let session = db.call(move |db| db.get_session(&lookup)).await?;
    match session {
        Some(session) => {
            print_session(&session);
            Ok(())
        }
        None => anyhow::bail!("Session {} not found", id),
    }
}

pub async fn cmd_sessions(
    settings: &Settings,
    repo: Option<String>,
    status: Option<String>,
    limit: usize,
) -> Result<()> {
    let status = status
        .as_deref()
        .map(SessionStatus::from_str)
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let db = open_db(settings)?;
    let sessions = db
        .call(move |db| db.list_sessions(repo.as_deref(), status, limit))
        .await?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!();
    println!(
        "{:<10} {:<11} {:<10} {:<30} {:<7} {:<17} Updated",
        "ID", "Command", "Status", "Repo", "Number", "Created"
    );
    println!(
        "{:<10} {:<11} {:<10} {:<30} {:<7} {:<17} -------",
        "--------", "----------", "---------", "----", "------", "-------"
    );
    for s in &sessions {
        // Pad before styling so ANSI codes don't break alignment.
        let status = format!("{:<10}", s.status.as_str());
        let status = match s.status {
            SessionStatus::Pending => style(status).dim(),
            SessionStatus::Running => style(status).yellow(),
            SessionStatus::Completed => style(status).green(),
            SessionStatus::Failed => style(status).red(),
        };
        println!(
            "{:<10} {:<11} {} {:<30} {:<7} {:<17} {}",
            s.id,
            s.command.as_str(),
            status,
            s.repo,
            format!("#{}", s.target_number()),
            short_time(&s.created_at),
            short_time(&s.updated_at),
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_cleanup(settings: &Settings, days: i64) -> Result<()> {
    if days < 0 {
        anyhow::bail!("--days must not be negative");
    }
    let db = open_db(settings)?;
    let deleted = db.call(move |db| db.cleanup_old_sessions(days)).await?;
    println!(
        "Deleted {} session{} older than {} days.",
        deleted,
        if deleted == 1 { "" } else { "s" },
        days
    );
    Ok(())
}
