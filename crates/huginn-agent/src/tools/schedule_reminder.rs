//! Tool: schedule_reminder — insert a one-shot agent-turn job.

use std::sync::Arc;

use async_trait::async_trait;

use huginn_scheduler::{CronScheduler, JobPayload, Schedule};

use super::{arg_i64, arg_str, Tool, ToolResult};

pub struct ScheduleReminderTool {
    scheduler: Arc<CronScheduler>,
}

impl ScheduleReminderTool {
    pub fn new(scheduler: Arc<CronScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Tool for ScheduleReminderTool {
    fn name(&self) -> &str {
        "schedule_reminder"
    }

    fn description(&self) -> &str {
        "Schedule a one-shot reminder. After the given number of minutes the \
         message is processed as a fresh agent turn; pass `channel` and `to` \
         to deliver the result to a chat. Not idempotent: every call creates \
         a new job."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "What the reminder should say or do."
                },
                "in_minutes": {
                    "type": "integer",
                    "description": "Minutes from now. Defaults to 5."
                },
                "channel": {
                    "type": "string",
                    "description": "Channel to deliver the result to (optional)."
                },
                "to": {
                    "type": "string",
                    "description": "Chat id to deliver the result to (optional)."
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(message) = arg_str(&input, "message") else {
            return ToolResult::error("missing required parameter: message");
        };
        let minutes = arg_i64(&input, "in_minutes").unwrap_or(5).max(1);

        let mut payload = JobPayload::agent_turn(message);
        if let (Some(channel), Some(to)) = (arg_str(&input, "channel"), arg_str(&input, "to")) {
            payload = payload.delivered_to(channel, to);
        }

        let at_ms = huginn_scheduler::schedule::now_ms() + minutes * 60_000;
        match self
            .scheduler
            .add_job("reminder", Schedule::At { at_ms }, payload, true)
        {
            Ok(job) => ToolResult::success(format!(
                "reminder scheduled in {minutes} minute(s) (job {})",
                job.id
            )),
            Err(e) => ToolResult::error(format!("failed to schedule reminder: {e}")),
        }
    }
}
