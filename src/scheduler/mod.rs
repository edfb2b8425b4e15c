// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Device scheduler - polls the PFDS fleet on a fixed tick
//!
//! One ticking loop evaluates every registered device independently;
//! a slow or dead device never blocks another's schedule. Dispatches
//! to the same device are serialized, dispatches across devices run
//! concurrently on their own tasks.

mod dispatch;
mod registry;

pub use dispatch::{
    CommandKind, CommandTransport, DispatchError, DispatchOutcome, TcpTransport,
};
pub use registry::{Device, DeviceMode, DeviceRegistry, POLL_INTERVAL_RANGE};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::metrics::Metrics;

#[derive(Default)]
struct DeviceState {
    /// Set at REQUEST1 selection time; failures wait a full interval
    last_request: Option<Instant>,
    period_on_done: bool,
    last_period_on_attempt: Option<Instant>,
    in_flight: bool,
    last_failure_log: Option<Instant>,
}

/// Polls the device registry and dispatches commands on cadence
pub struct DeviceScheduler {
    registry: Arc<DeviceRegistry>,
    transport: Arc<dyn CommandTransport>,
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
    states: Arc<Mutex<HashMap<String, DeviceState>>>,
}

impl DeviceScheduler {
    /// Scheduler over a loaded registry
    pub fn new(
        registry: Arc<DeviceRegistry>,
        transport: Arc<dyn CommandTransport>,
        metrics: Arc<Metrics>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            metrics,
            config,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Tick until shutdown; the final tick's dispatches are drained,
    /// not abandoned
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        info!(
            "Device scheduler running: {} devices, tick {}ms",
            self.registry.len(),
            self.config.tick_ms
        );

        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.tick_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    in_flight = self.tick(Instant::now());
                }
                _ = shutdown.recv() => {
                    info!("Scheduler stopping, draining in-flight dispatches");
                    for handle in in_flight.drain(..) {
                        let _ = handle.await;
                    }
                    break;
                }
            }
        }

        Ok(())
    }

    /// Evaluate every device once and spawn the due dispatches
    ///
    /// Public with an explicit clock so the cadence rules are testable
    /// without a running loop.
    pub fn tick(&self, now: Instant) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for device in self.registry.devices() {
            let command = {
                let mut states = self.states.lock();
                let st = states.entry(device.id.clone()).or_default();
                if st.in_flight {
                    continue;
                }

                if device.mode == DeviceMode::Continuous && !st.period_on_done {
                    // Bounded retry cadence, not a tight loop
                    let retry = Duration::from_secs(self.config.period_on_retry_seconds);
                    let due = st
                        .last_period_on_attempt
                        .map_or(true, |t| now.duration_since(t) >= retry);
                    if !due {
                        continue;
                    }
                    st.last_period_on_attempt = Some(now);
                    st.in_flight = true;
                    CommandKind::PeriodOn
                } else {
                    let due = st
                        .last_request
                        .map_or(true, |t| now.duration_since(t) >= device.poll_interval);
                    if !due {
                        continue;
                    }
                    st.last_request = Some(now);
                    st.in_flight = true;
                    CommandKind::Request1
                }
            };

            handles.push(self.spawn_dispatch(device, command, now));
        }

        handles
    }

    fn spawn_dispatch(
        &self,
        device: Arc<Device>,
        command: CommandKind,
        selected_at: Instant,
    ) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let metrics = self.metrics.clone();
        let states = self.states.clone();
        let timeout = Duration::from_millis(self.config.dispatch_timeout_ms);
        let log_interval = Duration::from_secs(self.config.failure_log_interval_seconds);
        let addr = SocketAddr::new(device.ip, self.config.command_port);

        tokio::spawn(async move {
            let sent_at = chrono::Utc::now();
            let result = transport.send(addr, command, timeout).await;

            let mut states = states.lock();
            let st = states.entry(device.id.clone()).or_default();
            st.in_flight = false;

            match result {
                Ok(latency) => {
                    metrics
                        .dispatch_success
                        .with_label_values(&[&device.id, command.as_str()])
                        .inc();
                    if command == CommandKind::PeriodOn {
                        st.period_on_done = true;
                        // Normal polling starts one interval after selection,
                        // on the same clock the tick loop uses
                        st.last_request = Some(selected_at);
                    }
                    let outcome = DispatchOutcome {
                        device_id: device.id.clone(),
                        command,
                        sent_at,
                        latency,
                    };
                    debug!(
                        "{} acknowledged {} in {:?}",
                        outcome.device_id, outcome.command, outcome.latency
                    );
                }
                Err(e) => {
                    metrics
                        .dispatch_failure
                        .with_label_values(&[&device.id, command.as_str()])
                        .inc();
                    // Log cadence is decoupled from the retry cadence
                    let should_warn = st
                        .last_failure_log
                        .map_or(true, |t| selected_at.duration_since(t) >= log_interval);
                    if should_warn {
                        st.last_failure_log = Some(selected_at);
                        warn!("Dispatch {} to {} failed: {}", command, device.id, e);
                    } else {
                        debug!("Dispatch {} to {} failed: {}", command, device.id, e);
                    }
                }
            }
        })
    }
}
