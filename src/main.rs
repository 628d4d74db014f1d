// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Tempnet - Temperature Network Gateway
//!
//! Runs the alarm engine, event dispatcher and WebSocket server until
//! interrupted.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use tempnet::alert::AudioVisualSink;
use tempnet::api::temperature_routes;
use tempnet::core::{Action, Priority, Topic};
use tempnet::db::{EventLogSink, TemperatureLog};
use tempnet::notify::NotificationSink;
use tempnet::sensors::{demo_session, BusController, SimulatedBus, SysfsBus};
use tempnet::streaming::{StreamSink, WebSocketServer};
use tempnet::{AlarmEngine, Config, Database, Dispatcher, EventQueue, SessionStore, Supervisor, NAME, VERSION};

/// Tempnet - Temperature Network Gateway
#[derive(Parser, Debug)]
#[command(name = "tempnet")]
#[command(author = "Tempnet Project")]
#[command(version = VERSION)]
#[command(about = "One-wire temperature alarm gateway")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Demo mode with a simulated bus
    #[arg(long)]
    demo: bool,

    /// WebSocket server port
    #[arg(long)]
    ws_port: Option<u16>,

    /// Directory for the session document and database
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        config.log_level.parse().unwrap_or(Level::INFO)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{} v{} - Temperature Network Gateway", NAME, VERSION);

    if args.demo {
        config.demo_mode = true;
    }
    if let Some(data_dir) = &args.data_dir {
        config.relocate_data(data_dir);
    }
    if let Some(port) = args.ws_port {
        config.streaming.websocket_port = port;
    }

    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo_mode);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    if config.demo_mode {
        seed_demo_session(&config);
        let bus = SimulatedBus::new();
        run_gateway(config, bus).await
    } else {
        let bus = SysfsBus::new(&config.bus);
        run_gateway(config, bus).await
    }
}

fn seed_demo_session(config: &Config) {
    let mut store = SessionStore::new(&config.engine.session_file);
    if store.path().exists() {
        return;
    }
    match store.set_config(demo_session()) {
        Ok(session) => info!("Created demo session {}", session.describe()),
        Err(e) => warn!("Unable to create demo session: {}", e),
    }
}

async fn run_gateway<B: BusController + 'static>(config: Config, bus: B) -> Result<()> {
    let db = Arc::new(Database::open(&config.database)?);
    if let Err(e) = db.cleanup(config.database.retention_days) {
        warn!("Database cleanup failed: {}", e);
    }

    let (events, receiver) = EventQueue::bounded(config.events.queue_capacity);
    let logger = TemperatureLog::new(db.clone());
    let (engine, handle) = AlarmEngine::new(config.engine.clone(), bus, events.clone(), Box::new(logger));

    let router = Arc::new(temperature_routes(handle, Some(db.clone())));
    let server = Arc::new(WebSocketServer::new(config.streaming.clone(), Some(router)));

    let mut dispatcher = Dispatcher::new(
        receiver,
        Duration::from_millis(config.events.dispatch_interval_ms),
        Duration::from_secs(config.events.stale_data_secs),
    );
    dispatcher.register(Action::Stream, Arc::new(StreamSink::new(server.clone())));
    dispatcher.register(Action::Database, Arc::new(EventLogSink::new(db.clone())));
    dispatcher.register(Action::AudioVisual, Arc::new(AudioVisualSink::from_config(&config.audiovisual)));
    dispatcher.register(
        Action::Notification,
        Arc::new(NotificationSink::from_config(config.notifications.clone())?),
    );

    let supervisor = Supervisor::new();
    supervisor.spawn("dispatcher", move |shutdown| dispatcher.run(shutdown)).await;
    supervisor.spawn("engine", move |shutdown| engine.run(shutdown)).await;
    if config.streaming.websocket_enabled {
        supervisor.spawn("websocket", move |shutdown| server.run(shutdown)).await;
    }

    events.raise(Topic::PowerOn, Priority::Medium, "", Action::Database | Action::Notification);

    info!("{} running", NAME);
    info!("   Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received, cleaning up...");
    events.raise(Topic::Shutdown, Priority::Medium, "user request", Action::Database | Action::Notification);
    supervisor.shutdown().await;

    if events.dropped() > 0 {
        warn!("{} events were dropped while the queue was full", events.dropped());
    }
    info!("{} shutdown complete", NAME);

    Ok(())
}
