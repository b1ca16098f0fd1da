//! Per-turn telemetry and the append-only usage sink.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Instant;

use rusqlite::Connection;
use serde::Serialize;
use tracing::instrument;

use crate::provider::Usage;

/// One LLM call within a turn.
#[derive(Debug, Clone, Serialize)]
pub struct LlmCallRecord {
    pub iteration: u32,
    pub usage: Usage,
    pub duration_ms: u64,
    pub finish_reason: String,
}

/// One tool invocation within a turn.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub iteration: u32,
    pub call_id: String,
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub result_chars: usize,
    pub error: Option<String>,
}

/// Everything measured about one turn. Wall clock starts at construction
/// and stops at [`TurnTelemetry::complete`].
#[derive(Debug, Clone, Serialize)]
pub struct TurnTelemetry {
    pub timestamp: String,
    pub channel: String,
    pub session_key: String,
    pub model: String,
    pub success: bool,
    pub truncated: bool,
    pub error: Option<String>,
    pub iterations: u32,
    pub compactions: u32,
    pub llm_calls: Vec<LlmCallRecord>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub total_duration_ms: u64,
    #[serde(skip)]
    started: Option<InstantWrapper>,
}

/// `Instant` is neither Serialize nor Clone-stable across serde derives;
/// wrap it so the struct stays derivable.
#[derive(Debug, Clone)]
struct InstantWrapper(Instant);

impl TurnTelemetry {
    pub fn start(channel: &str, session_key: &str, model: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            channel: channel.to_string(),
            session_key: session_key.to_string(),
            model: model.to_string(),
            success: false,
            truncated: false,
            error: None,
            iterations: 0,
            compactions: 0,
            llm_calls: Vec::new(),
            tool_calls: Vec::new(),
            total_duration_ms: 0,
            started: Some(InstantWrapper(Instant::now())),
        }
    }

    pub fn record_llm_call(&mut self, iteration: u32, usage: Usage, duration_ms: u64, finish_reason: &str) {
        self.iterations = self.iterations.max(iteration);
        self.llm_calls.push(LlmCallRecord {
            iteration,
            usage,
            duration_ms,
            finish_reason: finish_reason.to_string(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_tool_call(
        &mut self,
        iteration: u32,
        call_id: &str,
        name: &str,
        success: bool,
        duration_ms: u64,
        result_chars: usize,
        error: Option<String>,
    ) {
        self.tool_calls.push(ToolCallRecord {
            iteration,
            call_id: call_id.to_string(),
            name: name.to_string(),
            success,
            duration_ms,
            result_chars,
            error,
        });
    }

    /// Stop the wall clock and record the outcome.
    pub fn complete(&mut self, success: bool, error: Option<String>) {
        self.success = success;
        self.error = error;
        if let Some(started) = &self.started {
            self.total_duration_ms = started.0.elapsed().as_millis() as u64;
        }
    }

    pub fn prompt_tokens(&self) -> u32 {
        self.llm_calls.iter().map(|c| c.usage.prompt_tokens).sum()
    }

    pub fn completion_tokens(&self) -> u32 {
        self.llm_calls.iter().map(|c| c.usage.completion_tokens).sum()
    }

    pub fn total_tokens(&self) -> u32 {
        self.llm_calls.iter().map(|c| c.usage.total_tokens).sum()
    }

    pub fn llm_duration_ms(&self) -> u64 {
        self.llm_calls.iter().map(|c| c.duration_ms).sum()
    }

    pub fn tool_duration_ms(&self) -> u64 {
        self.tool_calls.iter().map(|c| c.duration_ms).sum()
    }

    pub fn total_tool_calls(&self) -> usize {
        self.tool_calls.len()
    }

    pub fn failed_tool_calls(&self) -> usize {
        self.tool_calls.iter().filter(|c| !c.success).count()
    }

    /// Distinct tool names in first-use order-independent (sorted) form.
    pub fn distinct_tool_names(&self) -> Vec<String> {
        self.tool_calls
            .iter()
            .map(|c| c.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Writes completed turns to the `usage` and `usage_tools` tables.
pub struct UsageSink {
    db: Mutex<Connection>,
}

impl UsageSink {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    /// Append one usage row plus its distinct tool names. Failures here are
    /// the caller's to log; the turn result is already decided.
    #[instrument(skip(self, telemetry), fields(session = %telemetry.session_key))]
    pub fn record(&self, telemetry: &TurnTelemetry) -> Result<(), rusqlite::Error> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO usage
             (timestamp, channel, session_key, model, success, error, iterations,
              prompt_tokens, completion_tokens, total_tokens, llm_duration_ms,
              tool_calls, failed_tool_calls, tool_duration_ms, total_duration_ms)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            rusqlite::params![
                telemetry.timestamp,
                telemetry.channel,
                telemetry.session_key,
                telemetry.model,
                telemetry.success,
                telemetry.error,
                telemetry.iterations,
                telemetry.prompt_tokens(),
                telemetry.completion_tokens(),
                telemetry.total_tokens(),
                telemetry.llm_duration_ms() as i64,
                telemetry.total_tool_calls() as i64,
                telemetry.failed_tool_calls() as i64,
                telemetry.tool_duration_ms() as i64,
                telemetry.total_duration_ms as i64,
            ],
        )?;
        let usage_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO usage_tools (usage_id, tool_name) VALUES (?1, ?2)",
            )?;
            for name in telemetry.distinct_tool_names() {
                stmt.execute(rusqlite::params![usage_id, name])?;
            }
        }
        tx.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry() -> TurnTelemetry {
        let mut t = TurnTelemetry::start("web", "web:default", "gpt-4o");
        t.record_llm_call(
            1,
            Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 },
            120,
            "tool_calls",
        );
        t.record_tool_call(1, "c1", "calculator", true, 3, 1, None);
        t.record_tool_call(1, "c2", "calculator", false, 2, 9, Some("boom".into()));
        t.record_llm_call(
            2,
            Usage { prompt_tokens: 20, completion_tokens: 6, total_tokens: 26 },
            95,
            "stop",
        );
        t.complete(true, None);
        t
    }

    #[test]
    fn aggregates_sum_across_calls() {
        let t = telemetry();
        assert_eq!(t.iterations, 2);
        assert_eq!(t.prompt_tokens(), 30);
        assert_eq!(t.total_tokens(), 41);
        assert_eq!(t.llm_duration_ms(), 215);
        assert_eq!(t.total_tool_calls(), 2);
        assert_eq!(t.failed_tool_calls(), 1);
        assert_eq!(t.distinct_tool_names(), vec!["calculator".to_string()]);
    }

    #[test]
    fn sink_writes_usage_and_tool_rows() {
        let conn = huginn_db::open_in_memory().unwrap();
        huginn_db::migrate::run_migrations(&conn).unwrap();
        let sink = UsageSink::new(conn);
        sink.record(&telemetry()).unwrap();

        let db = sink.db.lock().unwrap();
        let (iterations, total_tokens, tool_calls, failed): (i64, i64, i64, i64) = db
            .query_row(
                "SELECT iterations, total_tokens, tool_calls, failed_tool_calls FROM usage",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(iterations, 2);
        assert_eq!(total_tokens, 41);
        assert_eq!(tool_calls, 2);
        assert_eq!(failed, 1);

        let names: i64 = db
            .query_row("SELECT COUNT(*) FROM usage_tools", [], |row| row.get(0))
            .unwrap();
        assert_eq!(names, 1);
    }
}
