//! The inbound dispatcher: consumes from the bus and hands each message to
//! the turn engine through its session's worker queue.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use huginn_core::allow::is_allowed;

use crate::app::App;

/// Keep a task alive: respawn it whenever it crashes, stop when it exits
/// cleanly (which the tasks here only do on cancellation).
pub async fn supervise<F, Fut>(name: &'static str, cancel: CancellationToken, factory: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    while !cancel.is_cancelled() {
        match tokio::spawn(factory()).await {
            Ok(()) => break,
            Err(e) => {
                error!(task = name, error = %e, "supervised task crashed, restarting");
            }
        }
    }
}

/// Consume `bus.inbound` until cancellation, routing each message onto its
/// session queue. Ordering within a session is arrival order; sessions are
/// independent of one another.
///
/// The per-transport sender allowlist is enforced here: a message on a
/// configured channel whose sender is not listed is dropped and logged. A
/// channel with no transport entry is unrestricted.
pub async fn run_inbound_dispatcher(app: Arc<App>, cancel: CancellationToken) {
    loop {
        let Some(msg) = app.bus.consume_inbound(&cancel).await else {
            debug!("inbound dispatcher stopping");
            return;
        };

        if let Some(transport) = app.config.transports.get(&msg.channel) {
            let sender_name = msg
                .metadata
                .get("sender_name")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !is_allowed(&transport.allow_from, sender_name, &msg.sender_id) {
                warn!(
                    channel = %msg.channel,
                    sender = %msg.sender_id,
                    "sender not allowlisted, message dropped"
                );
                continue;
            }
        }

        debug!(session = %msg.session_key(), "dispatching inbound message");
        app.enqueue_turn(msg, &cancel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    use huginn_agent::{
        AgentTurnEngine, ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolRegistry,
    };
    use huginn_bus::{BusError, InboundMessage, MessageBus, OutboundMessage, Subscriber};
    use huginn_core::HuginnConfig;
    use huginn_media::MediaPipeline;
    use huginn_scheduler::CronScheduler;
    use huginn_sessions::SessionStore;

    type Span = (String, std::time::Instant, std::time::Instant);

    /// Echoes the user content after a short pause, recording turn spans so
    /// tests can check serialization.
    struct SlowEcho {
        spans: Arc<StdMutex<Vec<Span>>>,
    }

    #[async_trait]
    impl LlmProvider for SlowEcho {
        fn name(&self) -> &str {
            "slow-echo"
        }

        async fn chat(
            &self,
            req: &ChatRequest,
            _cancel: &CancellationToken,
        ) -> Result<ChatResponse, ProviderError> {
            let user = req
                .messages
                .iter()
                .rev()
                .find(|m| m.role == huginn_sessions::Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let started = std::time::Instant::now();
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.spans
                .lock()
                .unwrap()
                .push((user.clone(), started, std::time::Instant::now()));
            Ok(ChatResponse {
                content: Some(format!("echo: {user}")),
                finish_reason: "stop".to_string(),
                ..ChatResponse::default()
            })
        }
    }

    struct Collect(Arc<StdMutex<Vec<OutboundMessage>>>);

    #[async_trait]
    impl Subscriber for Collect {
        async fn deliver(&self, msg: &OutboundMessage) -> Result<(), BusError> {
            self.0.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    fn build_app(spans: Arc<StdMutex<Vec<Span>>>) -> Arc<App> {
        build_app_with(spans, HuginnConfig::default())
    }

    fn build_app_with(spans: Arc<StdMutex<Vec<Span>>>, config: HuginnConfig) -> Arc<App> {
        let conn = huginn_db::open_in_memory().unwrap();
        huginn_db::migrate::run_migrations(&conn).unwrap();
        let sessions = Arc::new(SessionStore::new(conn));

        let sched_conn = huginn_db::open_in_memory().unwrap();
        huginn_db::migrate::run_migrations(&sched_conn).unwrap();
        let scheduler = Arc::new(CronScheduler::new(sched_conn));

        let bus = Arc::new(MessageBus::new());
        let engine = Arc::new(
            AgentTurnEngine::new(
                Arc::new(SlowEcho { spans }),
                Arc::new(ToolRegistry::new()),
                sessions.clone(),
                config.agent.clone(),
                "sys",
            )
            .with_bus(bus.clone()),
        );
        let media = Arc::new(MediaPipeline::new(config.media.clone()));

        Arc::new(App::new(config, bus, sessions, scheduler, media, engine))
    }

    #[tokio::test]
    async fn end_to_end_inbound_to_outbound() {
        let spans = Arc::new(StdMutex::new(Vec::new()));
        let app = build_app(spans);

        let delivered = Arc::new(StdMutex::new(Vec::new()));
        app.bus
            .subscribe_outbound("web", Arc::new(Collect(delivered.clone())));

        let cancel = CancellationToken::new();
        let dispatcher = {
            let app = app.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { run_inbound_dispatcher(app, cancel).await })
        };
        let outbound = {
            let bus = app.bus.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { bus.dispatch_outbound(cancel).await })
        };

        app.bus
            .publish_inbound(InboundMessage::new("web", "alice", "default", "hello"))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        dispatcher.await.unwrap();
        outbound.await.unwrap();

        let msgs = delivered.lock().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "echo: hello");
        assert_eq!(msgs[0].chat_id, "default");
    }

    #[tokio::test]
    async fn unlisted_sender_is_dropped_by_the_allowlist() {
        let spans = Arc::new(StdMutex::new(Vec::new()));
        let mut config = HuginnConfig::default();
        config.transports.insert(
            "web".to_string(),
            huginn_core::config::TransportConfig {
                allow_from: vec!["alice".to_string()],
                token: None,
            },
        );
        let app = build_app_with(spans.clone(), config);

        let cancel = CancellationToken::new();
        let dispatcher = {
            let app = app.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { run_inbound_dispatcher(app, cancel).await })
        };

        app.bus
            .publish_inbound(InboundMessage::new("web", "mallory", "room", "let me in"))
            .unwrap();
        app.bus
            .publish_inbound(InboundMessage::new("web", "alice", "room", "hello"))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        dispatcher.await.unwrap();

        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 1, "only the allowlisted sender's turn runs");
        assert_eq!(spans[0].0, "hello");
    }

    #[tokio::test]
    async fn same_session_turns_are_serialized_in_arrival_order() {
        let spans = Arc::new(StdMutex::new(Vec::new()));
        let app = build_app(spans.clone());

        let cancel = CancellationToken::new();
        let dispatcher = {
            let app = app.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { run_inbound_dispatcher(app, cancel).await })
        };

        for i in 0..3 {
            app.bus
                .publish_inbound(InboundMessage::new("web", "alice", "room", format!("m{i}")))
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        dispatcher.await.unwrap();

        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 3);
        for (i, (content, _, _)) in spans.iter().enumerate() {
            assert_eq!(content, &format!("m{i}"));
        }
        // No overlap between consecutive turns of one session.
        for pair in spans.windows(2) {
            assert!(pair[1].1 >= pair[0].2, "turns for one session overlapped");
        }
    }

    #[tokio::test]
    async fn different_sessions_run_concurrently() {
        let spans = Arc::new(StdMutex::new(Vec::new()));
        let app = build_app(spans.clone());

        let cancel = CancellationToken::new();
        let dispatcher = {
            let app = app.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { run_inbound_dispatcher(app, cancel).await })
        };

        app.bus
            .publish_inbound(InboundMessage::new("web", "a", "chat-a", "one"))
            .unwrap();
        app.bus
            .publish_inbound(InboundMessage::new("web", "b", "chat-b", "two"))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        dispatcher.await.unwrap();

        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 2);
        // Both turns ran; with a 40 ms body each finishing well before the
        // 250 ms window, overlap proves concurrency.
        let overlap = spans[1].1 < spans[0].2 && spans[0].1 < spans[1].2;
        assert!(overlap, "independent sessions did not run concurrently");
    }
}
