use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use huginn_agent::{AgentTurnEngine, TurnInput};
use huginn_bus::{InboundMessage, MessageBus};
use huginn_core::HuginnConfig;
use huginn_media::MediaPipeline;
use huginn_scheduler::CronScheduler;
use huginn_sessions::SessionStore;

/// Default system prompt when the operator supplies none.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Huginn, a helpful assistant reachable \
through chat. Be concise. Use the available tools when they help answer the user.";

/// Fixed prompt submitted by the heartbeat ticker.
pub const HEARTBEAT_PROMPT: &str = "Heartbeat check: reply with a one-line status.";

/// Central shared state, passed as `Arc<App>` to every long-running task.
pub struct App {
    pub config: HuginnConfig,
    pub bus: Arc<MessageBus>,
    pub sessions: Arc<SessionStore>,
    pub scheduler: Arc<CronScheduler>,
    pub media: Arc<MediaPipeline>,
    pub engine: Arc<AgentTurnEngine>,
    /// In-flight turn and worker tasks; shutdown waits on this up to the
    /// grace deadline.
    pub turns: TaskTracker,
    /// Per-session inbound queues. The worker drains its queue one turn at
    /// a time, so turns for one `channel:chat_id` are processed in arrival
    /// order while different sessions run concurrently.
    session_queues: DashMap<String, mpsc::UnboundedSender<InboundMessage>>,
    /// Cross-path serialization (cron jobs, heartbeat, direct callers) for
    /// a session key. Inbound workers hold this too.
    session_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl App {
    pub fn new(
        config: HuginnConfig,
        bus: Arc<MessageBus>,
        sessions: Arc<SessionStore>,
        scheduler: Arc<CronScheduler>,
        media: Arc<MediaPipeline>,
        engine: Arc<AgentTurnEngine>,
    ) -> Self {
        Self {
            config,
            bus,
            sessions,
            scheduler,
            media,
            engine,
            turns: TaskTracker::new(),
            session_queues: DashMap::new(),
            session_locks: DashMap::new(),
        }
    }

    /// The serialization primitive for a session key.
    pub fn session_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.session_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Enqueue an inbound message onto its session's worker, spawning the
    /// worker on first use.
    pub fn enqueue_turn(self: &Arc<Self>, msg: InboundMessage, cancel: &CancellationToken) {
        let key = msg.session_key().as_str().to_string();

        let sender = self
            .session_queues
            .entry(key.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let app = self.clone();
                let cancel = cancel.clone();
                let worker_key = key.clone();
                self.turns
                    .spawn(async move { session_worker(app, worker_key, rx, cancel).await });
                tx
            })
            .clone();

        if sender.send(msg).is_err() {
            debug!(session = %key, "session worker gone, message dropped");
        }
    }
}

/// Drains one session's queue, running each turn under the session lock.
async fn session_worker(
    app: Arc<App>,
    key: String,
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(m) => m,
                None => break,
            },
        };

        let lock = app.session_lock(&key);
        let _guard = lock.lock().await;

        let input = TurnInput {
            session_key: key.clone(),
            content: msg.content,
            channel: msg.channel,
            chat_id: msg.chat_id,
        };
        app.engine.run_turn(input, &cancel).await;
    }
    debug!(session = %key, "session worker stopped");
}
