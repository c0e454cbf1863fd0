//! Webhook server command: `aidw server`.

use std::sync::Arc;

use anyhow::Result;
use console::style;

use aidw::config::Settings;
use aidw::workflow::server::{ServerConfig, start_server};

pub async fn cmd_server(settings: Settings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let missing = settings.missing_credentials();
    if !missing.is_empty() {
        anyhow::bail!(
            "Missing credentials: {}. Run 'aidw config' for details.",
            missing.join(", ")
        );
    }

    let mut config = ServerConfig::from_settings(&settings);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    println!(
        "{} on http://{}:{}",
        style("aidw webhook server").bold().cyan(),
        config.host,
        config.port
    );
    start_server(Arc::new(settings), config).await
}
