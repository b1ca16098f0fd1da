use serde::{Deserialize, Serialize};

/// Defines when and how often a job should run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run exactly once at the given unix-millisecond instant.
    At { at_ms: i64 },

    /// Run repeatedly with a fixed interval in milliseconds, measured from
    /// the completion of the previous run.
    Every { every_ms: i64 },

    /// Run according to a cron expression (seconds-first, 6 or 7 fields)
    /// in the given IANA timezone. UTC when `tz` is absent.
    Cron { expr: String, tz: Option<String> },
}

impl Schedule {
    /// Column value for `schedule_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::At { .. } => "at",
            Schedule::Every { .. } => "every",
            Schedule::Cron { .. } => "cron",
        }
    }
}

/// What a fired job does. Today the only kind is `agent_turn`: the message
/// is submitted to the turn engine, and the result is optionally delivered
/// to a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub kind: String,
    pub message: String,
    /// Deliver the turn result through the bus.
    #[serde(default)]
    pub deliver: bool,
    /// Delivery channel; falls back to the job's session when absent.
    pub channel: Option<String>,
    /// Delivery chat id.
    pub to: Option<String>,
}

impl JobPayload {
    pub fn agent_turn(message: impl Into<String>) -> Self {
        Self {
            kind: "agent_turn".to_string(),
            message: message.into(),
            deliver: false,
            channel: None,
            to: None,
        }
    }

    pub fn delivered_to(mut self, channel: impl Into<String>, to: impl Into<String>) -> Self {
        self.deliver = true;
        self.channel = Some(channel.into());
        self.to = Some(to.into());
        self
    }
}

/// Outcome of the most recent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Ok => write!(f, "ok"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ok" => Ok(JobStatus::Ok),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Mutable execution state embedded in the job row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    /// Next planned wake, unix ms. Null when disabled or spent.
    pub next_run_at_ms: Option<i64>,
    /// Start of the most recent execution, unix ms.
    pub last_run_at_ms: Option<i64>,
    pub last_status: Option<JobStatus>,
    pub last_error: Option<String>,
}

/// A persisted scheduler job.
///
/// Invariant: while `enabled`, `next_run_at_ms` is either null (a one-shot
/// that already ran and was retained) or in the future of its last
/// computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    /// Short opaque id.
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub schedule: Schedule,
    pub payload: JobPayload,
    pub state: JobState,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    /// One-shot jobs with this flag are removed after their run.
    pub delete_after_run: bool,
}
