//! Webhook management: `aidw webhook`.

use anyhow::{Context, Result};
use console::style;

use aidw::config::Settings;
use aidw::workflow::github::{Gateway, GitHubClient};

use super::super::WebhookCommands;

/// Events that can carry a trigger comment.
pub const TRIGGER_EVENTS: [&str; 2] = ["issue_comment", "pull_request_review_comment"];

pub async fn cmd_webhook(settings: &Settings, command: WebhookCommands) -> Result<()> {
    let token = settings
        .credentials
        .gh_token
        .as_deref()
        .context("GH_TOKEN is not set")?;
    let client = GitHubClient::new(token)?;

    match command {
        WebhookCommands::List { repo } => {
            let hooks = client.list_webhooks(&repo).await?;
            if hooks.is_empty() {
                println!("No webhooks on {}.", repo);
                return Ok(());
            }
            println!();
            println!("{:<12} {:<8} {:<50} Events", "ID", "Active", "URL");
            for hook in hooks {
                let active = if hook.active {
                    style("yes").green()
                } else {
                    style("no").red()
                };
                println!(
                    "{:<12} {:<8} {:<50} {}",
                    hook.id,
                    active,
                    hook.config.url.as_deref().unwrap_or("-"),
                    hook.events.join(", ")
                );
            }
            println!();
        }
        WebhookCommands::Create { repo, url, secret } => {
            let secret = secret
                .or_else(|| settings.credentials.webhook_secret.clone())
                .context("Pass --secret or set AIDW_WEBHOOK_SECRET")?;
            let events: Vec<String> = TRIGGER_EVENTS.iter().map(|e| e.to_string()).collect();
            let hook = client.create_webhook(&repo, &url, &secret, &events).await?;
            println!(
                "{} webhook {} on {} → {}",
                style("Created").green().bold(),
                hook.id,
                repo,
                url
            );
        }
        WebhookCommands::Delete { repo, id } => {
            client.delete_webhook(&repo, id).await?;
            println!("{} webhook {} on {}", style("Deleted").green().bold(), id, repo);
        }
        WebhookCommands::Deliveries { repo, id, limit } => {
            let deliveries = client.list_webhook_deliveries(&repo, id, limit).await?;
            if deliveries.is_empty() {
                println!("No deliveries for webhook {}.", id);
                return Ok(());
            }
            println!();
            println!(
                "{:<14} {:<20} {:<28} {:<8} Delivered",
                "ID", "Event", "Action", "Status"
            );
            for d in deliveries {
                let status = format!("{:<8}", d.status_code);
                let status = if (200..300).contains(&d.status_code) {
                    style(status).green()
                } else {
                    style(status).red()
                };
                println!(
                    "{:<14} {:<20} {:<28} {} {}",
                    d.id,
                    d.event,
                    d.action.as_deref().unwrap_or("-"),
                    status,
                    d.delivered_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
            println!();
        }
    }
    Ok(())
}
