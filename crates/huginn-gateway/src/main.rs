use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use huginn_agent::tools::{
    calculator::CalculatorTool, execute_command::ExecuteCommandTool, list_files::ListFilesTool,
    read_file::ReadFileTool, schedule_reminder::ScheduleReminderTool, write_file::WriteFileTool,
};
use huginn_agent::{
    AgentTurnEngine, LlmProvider, OpenAiProvider, ToolRegistry, UnconfiguredProvider, UsageSink,
};
use huginn_bus::MessageBus;
use huginn_core::HuginnConfig;
use huginn_db::SqliteLogLayer;
use huginn_media::MediaPipeline;
use huginn_scheduler::CronScheduler;
use huginn_sessions::SessionStore;

mod app;
mod dispatch;
mod heartbeat;
mod jobs;

use app::{App, DEFAULT_SYSTEM_PROMPT};

/// How often expired media assets are swept.
const MEDIA_CLEANUP_PERIOD: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config first: the database path comes from it.
    let config = HuginnConfig::load(None).unwrap_or_else(|e| {
        eprintln!("config load failed ({e}), using defaults");
        HuginnConfig::default()
    });

    // Open and migrate the database before logging starts so the log layer
    // has its table.
    let session_conn = huginn_db::open(&config.database.path)?;
    huginn_db::migrate::run_migrations(&session_conn)?;

    let log_conn = huginn_db::open(&config.database.path)?;
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(SqliteLogLayer::new(log_conn))
        .init();

    info!(db = %config.database.path, "starting huginn gateway");

    let bus = Arc::new(MessageBus::new());
    let sessions = Arc::new(SessionStore::new(session_conn));
    let scheduler = Arc::new(CronScheduler::new(huginn_db::open(&config.database.path)?));
    let usage = Arc::new(UsageSink::new(huginn_db::open(&config.database.path)?));
    let media = Arc::new(MediaPipeline::new(config.media.clone()));

    let provider: Arc<dyn LlmProvider> = match config.provider.api_key.clone() {
        Some(key) => Arc::new(OpenAiProvider::new(
            key,
            config.provider.base_url.clone(),
            config.provider.chat_path.clone(),
            config.provider.request_timeout_secs,
        )),
        None => {
            warn!("no API key configured; turns will fail until HUGINN_PROVIDER__API_KEY is set");
            Arc::new(UnconfiguredProvider)
        }
    };

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CalculatorTool));
    registry.register(Arc::new(ReadFileTool::new(&config.tools)));
    registry.register(Arc::new(WriteFileTool::new(&config.tools)));
    registry.register(Arc::new(ListFilesTool::new(&config.tools)));
    registry.register(Arc::new(ExecuteCommandTool::new(&config.tools)));
    registry.register(Arc::new(ScheduleReminderTool::new(scheduler.clone())));
    info!(tools = registry.list().len(), "built-in tools registered");

    let engine = Arc::new(
        AgentTurnEngine::new(
            provider,
            Arc::new(registry),
            sessions.clone(),
            config.agent.clone(),
            DEFAULT_SYSTEM_PROMPT,
        )
        .with_bus(bus.clone())
        .with_usage_sink(usage),
    );

    let app = Arc::new(App::new(
        config,
        bus.clone(),
        sessions,
        scheduler.clone(),
        media,
        engine,
    ));

    let cancel = CancellationToken::new();

    scheduler.set_handler(Arc::new(jobs::AgentJobHandler::new(
        app.clone(),
        cancel.clone(),
    )));
    app.scheduler.start()?;

    let known_sessions = app.sessions.list_sessions().map(|s| s.len()).unwrap_or(0);
    let jobs = app.scheduler.status().map(|s| s.jobs).unwrap_or(0);
    info!(sessions = known_sessions, jobs, "persisted state loaded");

    // Transport adapters attach here through the bus contract
    // (`huginn_bus::Transport`). Adapter crates are wired by the embedding
    // binary; a name configured without one is flagged.
    for name in app.config.transports.keys() {
        warn!(transport = %name, "configured transport has no adapter attached");
    }

    let supervisors = TaskTracker::new();

    {
        let bus = bus.clone();
        let c = cancel.clone();
        supervisors.spawn(dispatch::supervise(
            "outbound-dispatcher",
            cancel.clone(),
            move || {
                let bus = bus.clone();
                let c = c.clone();
                async move { bus.dispatch_outbound(c).await }
            },
        ));
    }
    {
        let app = app.clone();
        let c = cancel.clone();
        supervisors.spawn(dispatch::supervise(
            "inbound-dispatcher",
            cancel.clone(),
            move || {
                let app = app.clone();
                let c = c.clone();
                async move { dispatch::run_inbound_dispatcher(app, c).await }
            },
        ));
    }
    {
        let scheduler = scheduler.clone();
        let c = cancel.clone();
        supervisors.spawn(dispatch::supervise(
            "scheduler-timer",
            cancel.clone(),
            move || {
                let scheduler = scheduler.clone();
                let c = c.clone();
                async move { scheduler.run(c).await }
            },
        ));
    }
    {
        let app = app.clone();
        let c = cancel.clone();
        supervisors.spawn(dispatch::supervise(
            "heartbeat",
            cancel.clone(),
            move || {
                let app = app.clone();
                let c = c.clone();
                async move { heartbeat::run_heartbeat(app, c).await }
            },
        ));
    }
    {
        let app = app.clone();
        let c = cancel.clone();
        supervisors.spawn(dispatch::supervise(
            "media-cleanup",
            cancel.clone(),
            move || {
                let app = app.clone();
                let c = c.clone();
                async move { run_media_cleanup(app, c).await }
            },
        ));
    }

    info!("gateway running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    cancel.cancel();

    // Wait for in-flight turns up to the grace deadline, then tear down.
    app.turns.close();
    let grace = Duration::from_secs(app.config.gateway.shutdown_grace_secs);
    if tokio::time::timeout(grace, app.turns.wait()).await.is_err() {
        warn!("grace deadline reached with turns still in flight");
    }

    supervisors.close();
    let _ = tokio::time::timeout(Duration::from_secs(5), supervisors.wait()).await;

    bus.close();
    info!("gateway stopped");
    Ok(())
}

/// Periodic sweep of TTL-expired media assets.
async fn run_media_cleanup(app: Arc<App>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(MEDIA_CLEANUP_PERIOD);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let removed = app.media.cleanup_expired();
                if removed > 0 {
                    info!(removed, "expired media assets removed");
                }
            }
        }
    }
}
