// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Emberwatch - Concurrent Fire Detection Pipeline
//!
//! Ingests packets from networked field units, fuses thermal, gas,
//! smoke, flame, and vision evidence into per-location alarm decisions,
//! and polls a fleet of suppression devices on a command schedule.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use emberwatch::scheduler::TcpTransport;
use emberwatch::{
    Config, Context, DeviceRegistry, DeviceScheduler, FusionEngine, IngestServer, MetricsServer,
    VERSION,
};

/// Emberwatch - Concurrent Fire Detection Pipeline
#[derive(Parser, Debug)]
#[command(name = "emberwatch")]
#[command(author = "Emberwatch Project")]
#[command(version = VERSION)]
#[command(about = "Multi-sensor fire detection and device scheduling")]
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

    /// Ingestion bind address override
    #[arg(long)]
    bind: Option<String>,

    /// Metrics exposition bind address override
    #[arg(long)]
    metrics_bind: Option<String>,

    /// Device registry path override
    #[arg(long)]
    devices: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
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

    info!("Emberwatch v{} - Concurrent Fire Detection Pipeline", VERSION);

    // Load or create configuration
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Override with command line args
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(metrics_bind) = args.metrics_bind {
        config.metrics.bind_addr = metrics_bind;
    }
    if let Some(devices) = args.devices {
        config.scheduler.registry_path = devices;
    }
    config.validate()?;

    info!("Configuration loaded from {:?}", config_path);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let ctx = Context::new(config)?;

    // Fusion core and ingestion front end
    let engine = Arc::new(FusionEngine::new(
        &ctx.config,
        ctx.metrics.clone(),
        ctx.bus.clone(),
    ));
    let server = IngestServer::new(&ctx, engine.clone());
    let bound = server.start().await?;
    info!("Accepting field units on {}", bound);

    // Metrics exposition
    if ctx.config.metrics.enabled {
        let metrics_server = MetricsServer::new(&ctx.config.metrics.bind_addr, ctx.metrics.clone());
        metrics_server.start(ctx.subscribe_shutdown()).await?;
    }

    // Device scheduler
    let registry = Arc::new(DeviceRegistry::load_or_empty(
        &ctx.config.scheduler.registry_path,
    )?);
    if registry.is_empty() {
        info!(
            "No devices registered ({:?}); scheduler idle",
            ctx.config.scheduler.registry_path
        );
    }
    let scheduler = DeviceScheduler::new(
        registry,
        Arc::new(TcpTransport),
        ctx.metrics.clone(),
        ctx.config.scheduler.clone(),
    );
    let scheduler_shutdown = ctx.subscribe_shutdown();
    let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

    info!("Emberwatch running; press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received");
    ctx.trigger_shutdown();
    scheduler_task.await??;

    info!("Emberwatch shutdown complete");
    Ok(())
}
