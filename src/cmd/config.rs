//! Configuration view: `aidw config`.

use anyhow::Result;
use console::style;

use aidw::config::Settings;

fn mark(set: bool) -> console::StyledObject<&'static str> {
    if set {
        style("set").green()
    } else {
        style("not set").red()
    }
}

pub fn cmd_config(settings: &Settings) -> Result<()> {
    if settings.write_default_config()? {
        println!(
            "Created default config at {}",
            style(settings.config_path().display()).cyan()
        );
    }

    println!();
    println!("{}", style("aidw Configuration").bold().cyan());
    println!();
    println!("Home:        {}", settings.home.display());
    println!("Config file: {}", settings.config_path().display());
    println!("Database:    {}", settings.db_path().display());
    println!("Log file:    {}", settings.log_path().display());
    println!();

    println!("[server]");
    println!("  host = \"{}\"", settings.server.host);
    println!("  port = {}", settings.server.port);
    println!("  workers = {}", settings.server.workers);
    println!();

    println!("[github]");
    println!("  bot_name = \"{}\"", settings.github.bot_name);
    println!();

    println!("[auth]");
    if settings.auth.allowed_users.is_empty() {
        println!(
            "  allowed_users = [] {}",
            style("(nobody can trigger workflows)").yellow()
        );
    } else {
        println!("  allowed_users = {:?}", settings.auth.allowed_users);
    }
    println!();

    println!("[sandbox]");
    println!("  image = \"{}\"", settings.sandbox.image);
    println!("  memory = \"{}\"", settings.sandbox.memory);
    println!("  cpus = {}", settings.sandbox.cpus);
    println!("  lifetime_secs = {}", settings.sandbox.lifetime_secs);
    println!("  agent_timeout_secs = {}", settings.sandbox.agent_timeout_secs);
    if !settings.sandbox.env.is_empty() {
        let mut keys: Vec<&String> = settings.sandbox.env.keys().collect();
        keys.sort();
        println!("  env = {:?}", keys);
    }
    println!();

    let creds = &settings.credentials;
    println!("Credentials");
    println!("  AIDW_WEBHOOK_SECRET      {}", mark(creds.webhook_secret.is_some()));
    println!("  GH_TOKEN                 {}", mark(creds.gh_token.is_some()));
    println!("  ANTHROPIC_API_KEY        {}", mark(creds.anthropic_api_key.is_some()));
    println!("  CLAUDE_CODE_OAUTH_TOKEN  {}", mark(creds.claude_oauth_token.is_some()));

    let missing = settings.missing_credentials();
    if !missing.is_empty() {
        println!();
        println!("{}", style("Missing credentials:").yellow().bold());
        for name in missing {
            println!("  - {}", name);
        }
    }
    println!();
    Ok(())
}
