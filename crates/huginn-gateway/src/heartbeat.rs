//! Long-interval heartbeat: submits a fixed prompt under a reserved session
//! key so operators can see the whole path (engine, provider, persistence)
//! exercised. Failures are logged and ignored.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use huginn_agent::TurnInput;
use huginn_core::config::HEARTBEAT_SESSION_KEY;

use crate::app::{App, HEARTBEAT_PROMPT};

pub async fn run_heartbeat(app: Arc<App>, cancel: CancellationToken) {
    let period = Duration::from_secs(app.config.gateway.heartbeat_minutes.max(1) * 60);
    let mut ticker = tokio::time::interval(period);
    // The immediate first tick is consumed so the first beat waits a full
    // period after startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let (channel, chat_id) = {
            let key = huginn_core::SessionKey::from(HEARTBEAT_SESSION_KEY);
            let (c, i) = key.parts();
            (c.to_string(), i.to_string())
        };

        let input = TurnInput {
            session_key: HEARTBEAT_SESSION_KEY.to_string(),
            content: HEARTBEAT_PROMPT.to_string(),
            channel,
            chat_id,
        };

        let lock = app.session_lock(HEARTBEAT_SESSION_KEY);
        let _guard = lock.lock().await;
        let outcome = app.engine.run_direct(input, &cancel).await;
        if outcome.telemetry.success {
            debug!("heartbeat ok");
        } else {
            warn!(error = ?outcome.telemetry.error, "heartbeat turn failed");
        }
    }
}
