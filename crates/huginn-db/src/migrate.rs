//! Versioned schema migrations, keyed by `PRAGMA user_version`.
//!
//! Each step is idempotent (`IF NOT EXISTS` throughout) so a crash between
//! a step and the version bump is harmless on the next startup.

use rusqlite::Connection;
use tracing::info;

use crate::error::{DbError, Result};

/// One migration step: bumps `user_version` to `version` after `sql` runs.
struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "
    CREATE TABLE IF NOT EXISTS sessions (
        key        TEXT NOT NULL PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        metadata   TEXT NOT NULL DEFAULT '{}'
    );

    CREATE TABLE IF NOT EXISTS messages (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        session_key  TEXT NOT NULL REFERENCES sessions(key) ON DELETE CASCADE,
        role         TEXT NOT NULL,
        content      TEXT NOT NULL,
        timestamp    TEXT NOT NULL,
        tool_call_id TEXT,
        tool_calls   TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_messages_session
        ON messages(session_key, id);

    CREATE TABLE IF NOT EXISTS usage (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp         TEXT NOT NULL,
        channel           TEXT NOT NULL,
        session_key       TEXT NOT NULL,
        model             TEXT NOT NULL,
        success           INTEGER NOT NULL,
        error             TEXT,
        iterations        INTEGER NOT NULL DEFAULT 0,
        prompt_tokens     INTEGER NOT NULL DEFAULT 0,
        completion_tokens INTEGER NOT NULL DEFAULT 0,
        total_tokens      INTEGER NOT NULL DEFAULT 0,
        llm_duration_ms   INTEGER NOT NULL DEFAULT 0,
        tool_calls        INTEGER NOT NULL DEFAULT 0,
        failed_tool_calls INTEGER NOT NULL DEFAULT 0,
        tool_duration_ms  INTEGER NOT NULL DEFAULT 0,
        total_duration_ms INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_usage_timestamp ON usage(timestamp);

    CREATE TABLE IF NOT EXISTS usage_tools (
        usage_id  INTEGER NOT NULL REFERENCES usage(id) ON DELETE CASCADE,
        tool_name TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_usage_tools_usage ON usage_tools(usage_id);

    CREATE TABLE IF NOT EXISTS cron_jobs (
        id                TEXT NOT NULL PRIMARY KEY,
        name              TEXT NOT NULL,
        enabled           INTEGER NOT NULL DEFAULT 1,
        schedule_kind     TEXT NOT NULL,
        schedule_at_ms    INTEGER,
        schedule_every_ms INTEGER,
        schedule_expr     TEXT,
        schedule_tz       TEXT,
        payload_kind      TEXT NOT NULL,
        payload_message   TEXT NOT NULL,
        payload_deliver   INTEGER NOT NULL DEFAULT 0,
        payload_channel   TEXT,
        payload_to        TEXT,
        next_run_at_ms    INTEGER,
        last_run_at_ms    INTEGER,
        last_status       TEXT,
        last_error        TEXT,
        created_at_ms     INTEGER NOT NULL,
        updated_at_ms     INTEGER NOT NULL,
        delete_after_run  INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_cron_jobs_next
        ON cron_jobs(enabled, next_run_at_ms);

    CREATE TABLE IF NOT EXISTS logs (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp  TEXT NOT NULL,
        level      INTEGER NOT NULL,
        level_name TEXT NOT NULL,
        category   TEXT NOT NULL,
        message    TEXT NOT NULL,
        exception  TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
    CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level, timestamp);
    ",
}];

/// Apply all pending migrations. Safe to call on every startup.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        conn.execute_batch(migration.sql)
            .map_err(|e| DbError::Migration {
                version: migration.version,
                message: e.to_string(),
            })?;
        conn.pragma_update(None, "user_version", migration.version)?;
        info!(version = migration.version, "applied schema migration");
    }

    Ok(())
}

/// The schema version this build expects.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}
