//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                      |
//! |-----------|---------------------------------------|
//! | `config`  | `Config`                              |
//! | `server`  | `Server`                              |
//! | `run`     | `Run`                                 |
//! | `status`  | `Status`, `Sessions`, `Cleanup`       |
//! | `logs`    | `Logs`                                |
//! | `webhook` | `Webhook`                             |

pub mod config;
pub mod logs;
pub mod run;
pub mod server;
pub mod status;
pub mod webhook;

pub use config::cmd_config;
pub use logs::cmd_logs;
pub use run::cmd_run;
pub use server::cmd_server;
pub use status::{cmd_cleanup, cmd_sessions, cmd_status};
pub use webhook::cmd_webhook;

use anyhow::{Context, Result};

use aidw::config::Settings;
use aidw::workflow::db::{DbHandle, SessionDb};

/// Open the session store under the settings' home directory.
pub fn open_db(settings: &Settings) -> Result<DbHandle> {
    settings.ensure_home()?;
    let db = SessionDb::new(&settings.db_path()).context("Failed to open session database")?;
    Ok(DbHandle::new(db))
}
