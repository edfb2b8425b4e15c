// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Process-wide metrics collector and pull-based text exposition
//!
//! Counters and gauges only; no history. Every component updates this
//! collector through the shared [`crate::core::Context`], never through
//! ambient globals.

use anyhow::Result;
use prometheus::{
    Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Thread-safe counter/gauge collection for the whole process
pub struct Metrics {
    registry: Registry,
    started: Instant,

    /// Valid packets received, per location
    pub packets_received: IntCounterVec,
    /// Malformed packets, per location
    pub parse_errors: IntCounterVec,
    /// Records dropped from a full handoff queue, per location
    pub records_dropped: IntCounterVec,
    /// Fusion evaluations
    pub fusion_evaluations: IntCounter,
    /// Alarms raised by fusion
    pub fusion_alarms: IntCounter,
    /// Successful command dispatches, per device and command
    pub dispatch_success: IntCounterVec,
    /// Failed command dispatches, per device and command
    pub dispatch_failure: IntCounterVec,
    /// Current handoff queue depth, per location
    pub queue_depth: IntGaugeVec,
    /// Current capture rate, per stream
    pub capture_fps: GaugeVec,
    /// Seconds since process start
    pub uptime_seconds: IntGauge,
}

impl Metrics {
    /// Build and register the full metric set
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let packets_received = IntCounterVec::new(
            Opts::new("emberwatch_packets_received_total", "Valid packets received"),
            &["location"],
        )?;
        let parse_errors = IntCounterVec::new(
            Opts::new("emberwatch_parse_errors_total", "Malformed packets"),
            &["location"],
        )?;
        let records_dropped = IntCounterVec::new(
            Opts::new(
                "emberwatch_records_dropped_total",
                "Records dropped from a full handoff queue",
            ),
            &["location"],
        )?;
        let fusion_evaluations = IntCounter::new(
            "emberwatch_fusion_evaluations_total",
            "Fusion evaluations performed",
        )?;
        let fusion_alarms =
            IntCounter::new("emberwatch_fusion_alarms_total", "Alarms raised by fusion")?;
        let dispatch_success = IntCounterVec::new(
            Opts::new(
                "emberwatch_dispatch_success_total",
                "Device commands acknowledged",
            ),
            &["device", "command"],
        )?;
        let dispatch_failure = IntCounterVec::new(
            Opts::new(
                "emberwatch_dispatch_failure_total",
                "Device commands failed or timed out",
            ),
            &["device", "command"],
        )?;
        let queue_depth = IntGaugeVec::new(
            Opts::new("emberwatch_queue_depth", "Handoff queue depth"),
            &["location"],
        )?;
        let capture_fps = GaugeVec::new(
            Opts::new("emberwatch_capture_fps", "Current capture rate"),
            &["stream"],
        )?;
        let uptime_seconds =
            IntGauge::new("emberwatch_uptime_seconds", "Seconds since process start")?;

        registry.register(Box::new(packets_received.clone()))?;
        registry.register(Box::new(parse_errors.clone()))?;
        registry.register(Box::new(records_dropped.clone()))?;
        registry.register(Box::new(fusion_evaluations.clone()))?;
        registry.register(Box::new(fusion_alarms.clone()))?;
        registry.register(Box::new(dispatch_success.clone()))?;
        registry.register(Box::new(dispatch_failure.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(capture_fps.clone()))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry,
            started: Instant::now(),
            packets_received,
            parse_errors,
            records_dropped,
            fusion_evaluations,
            fusion_alarms,
            dispatch_success,
            dispatch_failure,
            queue_depth,
            capture_fps,
            uptime_seconds,
        })
    }

    /// Render the current metric set in the text exposition format
    pub fn render(&self) -> String {
        self.uptime_seconds.set(self.started.elapsed().as_secs() as i64);
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            warn!("Metric encoding failed: {}", e);
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

/// Minimal HTTP endpoint serving the text exposition to pull collectors
pub struct MetricsServer {
    bind_addr: String,
    metrics: Arc<Metrics>,
}

impl MetricsServer {
    /// Server bound lazily on `start`
    pub fn new(bind_addr: &str, metrics: Arc<Metrics>) -> Self {
        Self {
            bind_addr: bind_addr.to_string(),
            metrics,
        }
    }

    /// Bind and serve scrapes until shutdown
    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        info!("Metrics exposition listening on {}", self.bind_addr);

        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, addr)) => {
                                debug!("Metrics scrape from {}", addr);
                                let metrics = metrics.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = serve_scrape(stream, &metrics).await {
                                        debug!("Scrape from {} failed: {}", addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Metrics accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Metrics server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }
}

async fn serve_scrape(mut stream: tokio::net::TcpStream, metrics: &Metrics) -> Result<()> {
    // Drain the request head; the endpoint serves one document regardless
    let mut buf = [0u8; 1024];
    let _ = stream.read(&mut buf).await?;

    let body = metrics.render();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
