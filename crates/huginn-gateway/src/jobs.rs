//! Scheduler job callback: runs `agent_turn` payloads through the engine
//! and optionally delivers the result over the bus.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use huginn_agent::TurnInput;
use huginn_bus::OutboundMessage;
use huginn_scheduler::{CronJob, JobHandler};

use crate::app::App;

pub struct AgentJobHandler {
    app: Arc<App>,
    cancel: CancellationToken,
}

impl AgentJobHandler {
    pub fn new(app: Arc<App>, cancel: CancellationToken) -> Self {
        Self { app, cancel }
    }
}

#[async_trait]
impl JobHandler for AgentJobHandler {
    async fn on_job(&self, job: &CronJob) -> Result<(), String> {
        if job.payload.kind != "agent_turn" {
            return Err(format!("unknown payload kind: {}", job.payload.kind));
        }

        // Delivered jobs run under the target chat's session so the
        // conversation carries context; undelivered ones get a private
        // cron session.
        let (channel, chat_id) = match (&job.payload.channel, &job.payload.to) {
            (Some(channel), Some(to)) => (channel.clone(), to.clone()),
            _ => ("cron".to_string(), job.id.clone()),
        };

        let input = TurnInput::new(channel.clone(), chat_id.clone(), job.payload.message.clone());
        let lock = self.app.session_lock(&input.session_key);
        let _guard = lock.lock().await;

        let outcome = self.app.engine.run_direct(input, &self.cancel).await;
        if !outcome.telemetry.success {
            return Err(outcome
                .telemetry
                .error
                .unwrap_or_else(|| "turn failed".to_string()));
        }

        if job.payload.deliver && !outcome.text.is_empty() {
            self.app
                .bus
                .publish_outbound(OutboundMessage::new(channel, chat_id, outcome.text.clone()))
                .map_err(|e| e.to_string())?;
        }

        info!(job_id = %job.id, delivered = job.payload.deliver, "cron job turn complete");
        Ok(())
    }
}
