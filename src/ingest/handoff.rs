// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Per-location handoff from ingestion to fusion
//!
//! Each location gets a bounded queue drained by its own consumer task,
//! which keeps FusionState single-writer and keeps a slow location from
//! ever blocking a connection task. When a queue is full the OLDEST
//! record is dropped and counted; freshness beats completeness here.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tracing::debug;

use crate::core::{Context, EventBus};
use crate::fusion::FusionEngine;
use crate::metrics::Metrics;
use crate::protocol::DecodedRecord;

/// Bounded drop-oldest queue
struct BoundedQueue {
    capacity: usize,
    inner: Mutex<VecDeque<DecodedRecord>>,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Push one record; returns (depth after push, whether one dropped)
    fn push(&self, record: DecodedRecord) -> (usize, bool) {
        let mut q = self.inner.lock();
        let mut dropped = false;
        if q.len() >= self.capacity {
            q.pop_front();
            dropped = true;
        }
        q.push_back(record);
        (q.len(), dropped)
    }

    /// Pop the oldest record; returns (record, depth after pop)
    fn pop(&self) -> (Option<DecodedRecord>, usize) {
        let mut q = self.inner.lock();
        let record = q.pop_front();
        (record, q.len())
    }
}

struct Lane {
    queue: BoundedQueue,
    notify: Notify,
}

/// Routes decoded records to per-location consumer tasks
pub struct LocationRouter {
    engine: Arc<FusionEngine>,
    metrics: Arc<Metrics>,
    bus: Arc<EventBus>,
    capacity: usize,
    ctx: Context,
    lanes: RwLock<HashMap<String, Arc<Lane>>>,
}

impl LocationRouter {
    /// Router forwarding into the given fusion engine
    pub fn new(ctx: &Context, engine: Arc<FusionEngine>) -> Self {
        Self {
            engine,
            metrics: ctx.metrics.clone(),
            bus: ctx.bus.clone(),
            capacity: ctx.config.server.queue_capacity,
            ctx: ctx.clone(),
            lanes: RwLock::new(HashMap::new()),
        }
    }

    /// Hand one record to a location's consumer; never blocks
    pub fn forward(&self, loc_id: &str, record: DecodedRecord) {
        let lane = self.lane_for(loc_id);
        let (depth, dropped) = lane.queue.push(record);
        if dropped {
            self.metrics
                .records_dropped
                .with_label_values(&[loc_id])
                .inc();
        }
        self.metrics
            .queue_depth
            .with_label_values(&[loc_id])
            .set(depth as i64);
        lane.notify.notify_one();
    }

    /// Current handoff depth for a location
    pub fn queue_depth(&self, loc_id: &str) -> usize {
        self.lanes
            .read()
            .get(loc_id)
            .map_or(0, |lane| lane.queue.inner.lock().len())
    }

    fn lane_for(&self, loc_id: &str) -> Arc<Lane> {
        if let Some(lane) = self.lanes.read().get(loc_id) {
            return lane.clone();
        }

        let mut lanes = self.lanes.write();
        lanes
            .entry(loc_id.to_string())
            .or_insert_with(|| {
                debug!("Starting fusion consumer for location {}", loc_id);
                let lane = Arc::new(Lane {
                    queue: BoundedQueue::new(self.capacity),
                    notify: Notify::new(),
                });
                tokio::spawn(consume(
                    lane.clone(),
                    loc_id.to_string(),
                    self.engine.clone(),
                    self.metrics.clone(),
                    self.bus.clone(),
                    self.ctx.subscribe_shutdown(),
                ));
                lane
            })
            .clone()
    }
}

/// Single consumer per location: the only writer of that FusionState
async fn consume(
    lane: Arc<Lane>,
    loc_id: String,
    engine: Arc<FusionEngine>,
    metrics: Arc<Metrics>,
    bus: Arc<EventBus>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        // A sustained backlog must not starve the shutdown signal
        if !matches!(
            shutdown.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ) {
            debug!("Fusion consumer for {} shutting down", loc_id);
            break;
        }

        let (record, depth) = lane.queue.pop();
        match record {
            Some(record) => {
                metrics
                    .queue_depth
                    .with_label_values(&[&loc_id])
                    .set(depth as i64);
                engine.ingest(&loc_id, &record);
                bus.publish_record(&loc_id, record);
            }
            None => {
                tokio::select! {
                    _ = lane.notify.notified() => {}
                    _ = shutdown.recv() => {
                        debug!("Fusion consumer for {} shutting down", loc_id);
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SensorSample;
    use chrono::Utc;

    fn sample(adc1: u32) -> DecodedRecord {
        DecodedRecord::Sample(SensorSample {
            adc1,
            adc2: 0,
            flame: false,
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_bounded_queue_drops_oldest() {
        let q = BoundedQueue::new(3);
        for i in 0..5 {
            q.push(sample(i));
        }

        // 0 and 1 were dropped; 2, 3, 4 remain in arrival order
        let (first, depth) = q.pop();
        assert_eq!(depth, 2);
        match first.unwrap() {
            DecodedRecord::Sample(s) => assert_eq!(s.adc1, 2),
            other => panic!("unexpected {:?}", other),
        }
        match q.pop().0.unwrap() {
            DecodedRecord::Sample(s) => assert_eq!(s.adc1, 3),
            other => panic!("unexpected {:?}", other),
        }
        match q.pop().0.unwrap() {
            DecodedRecord::Sample(s) => assert_eq!(s.adc1, 4),
            other => panic!("unexpected {:?}", other),
        }
        assert!(q.pop().0.is_none());
    }

    #[test]
    fn test_push_reports_drops() {
        let q = BoundedQueue::new(2);
        assert_eq!(q.push(sample(0)), (1, false));
        assert_eq!(q.push(sample(1)), (2, false));
        assert_eq!(q.push(sample(2)), (2, true));
    }

    #[tokio::test]
    async fn test_consumer_stops_promptly_with_backlog() {
        let config = crate::config::Config::default();
        let ctx = Context::new(config).unwrap();
        let engine = Arc::new(FusionEngine::new(
            &ctx.config,
            ctx.metrics.clone(),
            ctx.bus.clone(),
        ));

        let lane = Arc::new(Lane {
            queue: BoundedQueue::new(64),
            notify: Notify::new(),
        });
        for i in 0..50 {
            lane.queue.push(sample(i));
        }

        let shutdown = ctx.subscribe_shutdown();
        ctx.trigger_shutdown();

        // The backlog is abandoned on shutdown, not drained to completion
        consume(
            lane.clone(),
            "hall".to_string(),
            engine,
            ctx.metrics.clone(),
            ctx.bus.clone(),
            shutdown,
        )
        .await;
        assert_eq!(lane.queue.inner.lock().len(), 50);
    }

    #[tokio::test]
    async fn test_router_delivers_to_fusion() {
        let config = crate::config::Config::default();
        let ctx = Context::new(config).unwrap();
        let engine = Arc::new(FusionEngine::new(
            &ctx.config,
            ctx.metrics.clone(),
            ctx.bus.clone(),
        ));
        let router = LocationRouter::new(&ctx, engine.clone());

        let mut records = ctx.bus.subscribe_records();
        router.forward("RoomA", sample(1734));

        let event = records.recv().await.unwrap();
        assert_eq!(event.loc_id, "RoomA");
        assert!(engine.snapshot("RoomA").is_some());

        ctx.trigger_shutdown();
    }
}
