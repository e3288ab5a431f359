//! # Raceday — background-work daemon
//!
//! Runs the two independent loops of the tournament platform's background
//! engine — the task scheduler (race timeouts, score recalculation) and the
//! notification dispatcher — plus the management gateway.
//!
//! Usage:
//!   raceday                      # Run with ~/.raceday/config.toml
//!   raceday --config path.toml   # Explicit config
//!   raceday --port 8080          # Override the gateway port

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use raceday_channels::webhook::WebhookConfig;
use raceday_channels::{ChatDmChannel, WebhookChannel};
use raceday_core::RacedayConfig;
use raceday_core::events::EventBus;
use raceday_domain::DomainDb;
use raceday_gateway::AppState;
use raceday_notify::dispatcher::{Dispatcher, spawn_dispatcher};
use raceday_notify::{FormatterTable, NotifyDb};
use raceday_scheduler::engine::spawn_scheduler;
use raceday_scheduler::{HandlerRegistry, SchedulerDb, SchedulerEngine, TaskContext};

#[derive(Parser)]
#[command(
    name = "raceday",
    version,
    about = "Raceday background engine — race timeouts, score recalculation, notification delivery"
)]
struct Cli {
    /// Path to config.toml (default: ~/.raceday/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory for the engine's databases
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Management gateway port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "raceday=debug,tower_http=debug"
    } else {
        "raceday=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => RacedayConfig::load_from(path)?,
        None => RacedayConfig::load()?,
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.storage.data_dir));
    std::fs::create_dir_all(&data_dir)?;

    // Stores. The task and notification tables are the source of truth for
    // both loops; the domain database is the reference implementation of the
    // platform's capability contracts.
    let domain = Arc::new(DomainDb::open(&data_dir.join("domain.db"))?);
    let tasks = Arc::new(SchedulerDb::open(&data_dir.join("scheduler.db"))?);
    let notify = Arc::new(NotifyDb::open(&data_dir.join("notify.db"))?);

    // Event bus: the timeout handlers publish, the notification listeners
    // enqueue.
    let bus = Arc::new(EventBus::new());
    raceday_notify::listeners::register_listeners(&bus, notify.clone(), &config.notify, "chat-dm")
        .await;

    // Built-in handlers and their definitions, reconciled with stored state.
    let mut registry = HandlerRegistry::new();
    raceday_scheduler::handlers::register_builtins(&mut registry);
    for def in raceday_scheduler::handlers::builtin_definitions() {
        tasks.register_builtin(&def)?;
    }

    // Keep the execution audit trail bounded.
    let pruned = tasks.prune_executions(chrono::Utc::now() - chrono::Duration::days(30))?;
    if pruned > 0 {
        tracing::info!("pruned {pruned} execution record(s) older than 30 days");
    }

    let ctx = TaskContext::new(
        domain.clone(),
        domain.clone(),
        domain.clone(),
        domain.clone(),
        bus.clone(),
    );
    let engine = Arc::new(SchedulerEngine::new(
        tasks.clone(),
        Arc::new(registry),
        ctx,
        config.scheduler.clone(),
    ));

    // Delivery channels.
    let mut dispatcher = Dispatcher::new(notify.clone(), FormatterTable::standard(), config.notify.clone());
    if config.chat.enabled {
        dispatcher.register_handler(Arc::new(ChatDmChannel::new(config.chat.clone())));
    } else {
        tracing::warn!("chat delivery disabled — chat-dm notifications will fail permanently");
    }
    if config.webhook.enabled {
        let headers = if config.webhook.auth_header.is_empty() {
            vec![]
        } else {
            vec![(config.webhook.auth_header.clone(), config.webhook.auth_value.clone())]
        };
        dispatcher.register_handler(Arc::new(WebhookChannel::new(WebhookConfig {
            url: config.webhook.url.clone(),
            headers,
            timeout_secs: config.webhook.timeout_secs,
        })));
    }
    let dispatcher = Arc::new(dispatcher);

    println!("🏁 Raceday v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Data dir:   {}", data_dir.display());
    println!("   ⏱️  Scheduler:  tick every {}s", config.scheduler.tick_secs);
    println!("   📮 Dispatcher: poll every {}s", config.notify.poll_secs);
    if config.gateway.enabled {
        println!("   🌐 Gateway:    http://0.0.0.0:{}", config.gateway.port);
    }
    println!();

    let scheduler_loop = spawn_scheduler(engine.clone(), config.scheduler.tick_secs);
    let dispatch_loop = spawn_dispatcher(dispatcher.clone(), config.notify.poll_secs);

    if config.gateway.enabled {
        let state = AppState {
            engine: engine.clone(),
            notify: notify.clone(),
            start_time: std::time::Instant::now(),
        };
        let port = config.gateway.port;
        tokio::spawn(async move {
            if let Err(e) = raceday_gateway::serve(state, port).await {
                tracing::error!("gateway exited: {e}");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    engine.set_running(false);
    dispatcher.set_running(false);
    scheduler_loop.abort();
    dispatch_loop.abort();
    Ok(())
}
