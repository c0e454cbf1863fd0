use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use rusqlite::{Connection, Row, Transaction, TransactionBehavior, params};

use super::models::*;
use crate::errors::StoreError;

/// Async-safe handle to the session database.
///
/// Wraps `SessionDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads. The mutex also serializes writers, which is
/// what makes `create_session_exclusive` a single critical section.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<SessionDb>>,
}

impl DbHandle {
    pub fn new(db: SessionDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SessionDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

const SESSION_COLUMNS: &str = "id, command, status, repo, issue_number, pr_number, branch, \
     sandbox_id, triggered_by, instruction, created_at, updated_at, completed_at, error, metadata";

pub struct SessionDb {
    conn: Connection,
}

impl SessionDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // Lets status readers in other processes see a consistent snapshot
        // while a run is writing.
        self.conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .context("Failed to enable WAL")?;
        self.conn
            .busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    command TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    repo TEXT NOT NULL,
                    issue_number INTEGER NOT NULL,
                    pr_number INTEGER,
                    branch TEXT,
                    sandbox_id TEXT,
                    triggered_by TEXT,
                    instruction TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    completed_at TEXT,
                    error TEXT,
                    metadata TEXT NOT NULL DEFAULT '{}'
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_repo ON sessions(repo);
                CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
                CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Writes ────────────────────────────────────────────────────────

    pub fn create_session(&self, new: &NewSession) -> Result<Session> {
        let id = new_session_id();
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO sessions (id, command, status, repo, issue_number, pr_number,
                    triggered_by, instruction, created_at, updated_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, '{}')",
                params![
                    id,
                    new.command.as_str(),
                    SessionStatus::Pending.as_str(),
                    new.repo,
                    new.issue_number,
                    new.pr_number,
                    new.triggered_by,
                    new.instruction,
                    now,
                ],
            )
            .context("Failed to insert session")?;
        self.get_session(&id)?
            .context("Session not found after insert")
    }

    /// Open a session unless another PENDING/RUNNING session targets the same
    /// repo and thread and has been updated within `stale_after`. A window
    /// reaching past the representable past has no cutoff.
    pub fn create_session_exclusive(
        &self,
        new: &NewSession,
        stale_after: TimeDelta,
    ) -> Result<Session> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin session claim")?;

        let target = new.pr_number.unwrap_or(new.issue_number);
        let cutoff: Option<String> = Utc::now().checked_sub_signed(stale_after).map(timestamp);
        let active: Option<String> = {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT id FROM sessions
                     WHERE repo = ?1 AND COALESCE(pr_number, issue_number) = ?2
                       AND status IN ('pending', 'running')
                       AND (?3 IS NULL OR updated_at >= ?3)
                     ORDER BY created_at DESC LIMIT 1",
                )
                .context("Failed to prepare active run lookup")?;
            let mut rows = stmt
                .query_map(params![new.repo, target, cutoff], |row| row.get(0))
                .context("Failed to query active runs")?;
            match rows.next() {
                Some(row) => Some(row.context("Failed to read active run row")?),
                None => None,
            }
        };

        if let Some(session_id) = active {
            return Err(StoreError::RunAlreadyActive {
                repo: new.repo.clone(),
                number: target,
                session_id,
            }
            .into());
        }

        let session = self.create_session(new)?;
        tx.commit().context("Failed to commit session claim")?;
        Ok(session)
    }

    /// Apply a partial update, enforcing monotonic status transitions.
    ///
    /// Terminal sessions reject every update. `completed_at` is stamped on the
    /// first terminal transition only; `error` is stored only with FAILED.
    pub fn update_session(&self, id: &str, update: SessionUpdate) -> Result<Session> {
        let current = self
            .get_session(id)?
            .ok_or_else(|| StoreError::SessionNotFound { id: id.to_string() })?;

        let status = update.status.unwrap_or(current.status);
        if current.status.is_terminal() || !is_valid_transition(&current.status, &status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to: status,
            }
            .into());
        }

        let now = timestamp(Utc::now());
        let completed_at = status.is_terminal().then(|| now.clone());
        let error = if status == SessionStatus::Failed {
            update.error
        } else {
            None
        };
        let metadata = update
            .metadata
            .map(|m| serde_json::to_string(&m))
            .transpose()
            .context("Failed to serialize session metadata")?;

        self.conn
            .execute(
                "UPDATE sessions SET
                    status = ?1,
                    pr_number = COALESCE(?2, pr_number),
                    branch = COALESCE(?3, branch),
                    sandbox_id = COALESCE(?4, sandbox_id),
                    error = ?5,
                    metadata = COALESCE(?6, metadata),
                    updated_at = ?7,
                    completed_at = COALESCE(completed_at, ?8)
                 WHERE id = ?9",
                params![
                    status.as_str(),
                    update.pr_number,
                    update.branch,
                    update.sandbox_id,
                    error,
                    metadata,
                    now,
                    completed_at,
                    id,
                ],
            )
            .context("Failed to update session")?;

        self.get_session(id)?
            .context("Session not found after update")
    }

    /// Delete sessions created more than `days` days ago. Returns the number removed.
    pub fn cleanup_old_sessions(&self, days: i64) -> Result<usize> {
        let Some(cutoff) = TimeDelta::try_days(days).and_then(|d| Utc::now().checked_sub_signed(d))
        else {
            return Ok(0);
        };
        let cutoff = timestamp(cutoff);
        let deleted = self
            .conn
            .execute("DELETE FROM sessions WHERE created_at < ?1", params![cutoff])
            .context("Failed to delete old sessions")?;
        Ok(deleted)
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
        Ok(self.query_sessions(&sql, params![id])?.into_iter().next())
    }

    /// Most recent sessions first, optionally filtered by repo and status.
    pub fn list_sessions(
        &self,
        repo: Option<&str>,
        status: Option<SessionStatus>,
        limit: usize,
    ) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions
             WHERE (?1 IS NULL OR repo = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC LIMIT ?3",
            SESSION_COLUMNS
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_sessions(&sql, params![repo, status.map(|s| s.as_str()), limit])
    }

    /// The latest RUNNING session for an issue, if any.
    pub fn get_active_session_for_issue(
        &self,
        repo: &str,
        issue_number: i64,
    ) -> Result<Option<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions
             WHERE repo = ?1 AND issue_number = ?2 AND status = ?3
             ORDER BY created_at DESC LIMIT 1",
            SESSION_COLUMNS
        );
        Ok(self
            .query_sessions(
                &sql,
                params![repo, issue_number, SessionStatus::Running.as_str()],
            )?
            .into_iter()
            .next())
    }

    pub fn get_latest_session_for_pr(&self, repo: &str, pr_number: i64) -> Result<Option<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions
             WHERE repo = ?1 AND pr_number = ?2
             ORDER BY created_at DESC LIMIT 1",
            SESSION_COLUMNS
        );
        Ok(self
            .query_sessions(&sql, params![repo, pr_number])?
            .into_iter()
            .next())
    }

    fn query_sessions(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Session>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare session query")?;
        let rows = stmt
            .query_map(params, SessionRow::from_row)
            .context("Failed to query sessions")?;
        let mut sessions = Vec::new();
        for row in rows {
            let row = row.context("Failed to read session row")?;
            sessions.push(row.into_session()?);
        }
        Ok(sessions)
    }
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Fixed-width RFC 3339 so that string order matches time order in SQL.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp: {}", value))?
        .with_timezone(&Utc))
}

// ── Row mapping ───────────────────────────────────────────────────────

struct SessionRow {
    id: String,
    command: String,
    status: String,
    repo: String,
    issue_number: i64,
    pr_number: Option<i64>,
    branch: Option<String>,
    sandbox_id: Option<String>,
    triggered_by: Option<String>,
    instruction: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
    error: Option<String>,
    metadata: Option<String>,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            command: row.get(1)?,
            status: row.get(2)?,
            repo: row.get(3)?,
            issue_number: row.get(4)?,
            pr_number: row.get(5)?,
            branch: row.get(6)?,
            sandbox_id: row.get(7)?,
            triggered_by: row.get(8)?,
            instruction: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            completed_at: row.get(12)?,
            error: row.get(13)?,
            metadata: row.get(14)?,
        })
    }

    fn into_session(self) -> Result<Session> {
        let command = CommandKind::from_str(&self.command)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse session command")?;
        let status = SessionStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse session status")?;
        let metadata: HashMap<String, serde_json::Value> = match self.metadata.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(raw).context("Failed to parse session metadata")?
            }
            _ => HashMap::new(),
        };
        Ok(Session {
            id: self.id,
            command,
            status,
            repo: self.repo,
            issue_number: self.issue_number,
            pr_number: self.pr_number,
            branch: self.branch,
            sandbox_id: self.sandbox_id,
            triggered_by: self.triggered_by,
            instruction: self.instruction,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
            error: self.error,
            metadata,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
