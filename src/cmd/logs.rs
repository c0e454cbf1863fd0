//! Server log tail: `aidw logs`.

use anyhow::Result;

use aidw::config::Settings;
use aidw::logging;

pub fn cmd_logs(settings: &Settings, lines: usize) -> Result<()> {
    let path = settings.log_path();
    if !path.exists() {
        println!("No log file at {}. Start the server first.", path.display());
        return Ok(());
    }
    for line in logging::tail(&path, lines)? {
        println!("{}", line);
    }
    Ok(())
}
