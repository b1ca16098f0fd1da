//! `tracing` layer that persists events to the `logs` table.
//!
//! Events at INFO and above are forwarded over a channel to a dedicated
//! writer thread so the hot path never touches SQLite. Log persistence is
//! strictly best-effort: a full channel, a closed receiver, or a failed
//! INSERT drops the row and nothing else.

use std::sync::mpsc;

use rusqlite::Connection;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

struct LogRow {
    timestamp: String,
    level: i64,
    level_name: String,
    category: String,
    message: String,
    exception: Option<String>,
}

/// Layer that mirrors INFO+ events into the database.
pub struct SqliteLogLayer {
    tx: mpsc::Sender<LogRow>,
}

impl SqliteLogLayer {
    /// Takes its own `Connection`; the writer thread owns it for the life
    /// of the process.
    pub fn new(conn: Connection) -> Self {
        let (tx, rx) = mpsc::channel::<LogRow>();

        std::thread::Builder::new()
            .name("huginn-log-writer".to_string())
            .spawn(move || {
                while let Ok(row) = rx.recv() {
                    let _ = conn.execute(
                        "INSERT INTO logs
                         (timestamp, level, level_name, category, message, exception)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        rusqlite::params![
                            row.timestamp,
                            row.level,
                            row.level_name,
                            row.category,
                            row.message,
                            row.exception,
                        ],
                    );
                }
            })
            .expect("failed to spawn log writer thread");

        Self { tx }
    }
}

impl<S: Subscriber> Layer<S> for SqliteLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // Level ordering: ERROR < WARN < INFO < DEBUG < TRACE.
        if *meta.level() > Level::INFO {
            return;
        }

        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        let row = LogRow {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level_number(meta.level()),
            level_name: meta.level().to_string(),
            category: meta.target().to_string(),
            message: visitor.render(),
            exception: visitor.error,
        };
        let _ = self.tx.send(row);
    }
}

fn level_number(level: &Level) -> i64 {
    match *level {
        Level::TRACE => 0,
        Level::DEBUG => 1,
        Level::INFO => 2,
        Level::WARN => 3,
        Level::ERROR => 4,
    }
}

/// Collects the `message` field plus any structured fields as `key=value`.
#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Vec<String>,
    error: Option<String>,
}

impl FieldCollector {
    fn render(&self) -> String {
        if self.fields.is_empty() {
            return self.message.clone();
        }
        let mut out = self.message.clone();
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&self.fields.join(" "));
        out
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "error" => self.error = Some(format!("{:?}", value)),
            name => self.fields.push(format!("{}={:?}", name, value)),
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "error" => self.error = Some(value.to_string()),
            name => self.fields.push(format!("{}={}", name, value)),
        }
    }
}

/// Query helper: most recent log rows, newest first.
pub fn recent_logs(
    conn: &Connection,
    limit: usize,
) -> crate::error::Result<Vec<(String, String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT level_name, category, message FROM logs
         ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}
