// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Event bus for collaborator fan-out
//!
//! Alarm decisions and ingested records are published on broadcast
//! channels for external dispatch/dashboard logic; the pipeline itself
//! never depends on anyone listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::fusion::FusionResult;
use crate::protocol::DecodedRecord;

/// An alarm decision for one location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEvent {
    /// Monotonic event id
    pub id: u64,
    /// Location the decision applies to
    pub loc_id: String,
    /// The fusion decision
    pub result: FusionResult,
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
}

/// One ingested record, tagged with its location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEvent {
    /// Location the record belongs to
    pub loc_id: String,
    /// The decoded record
    pub record: DecodedRecord,
    /// When ingestion accepted it
    pub timestamp: DateTime<Utc>,
}

/// Broadcast fan-out for alarms and records
pub struct EventBus {
    alarm_tx: broadcast::Sender<AlarmEvent>,
    record_tx: broadcast::Sender<RecordEvent>,
    event_counter: AtomicU64,
}

impl EventBus {
    /// Bus with the given per-channel capacity
    pub fn new(capacity: usize) -> Self {
        let (alarm_tx, _) = broadcast::channel(capacity);
        let (record_tx, _) = broadcast::channel(capacity);
        Self {
            alarm_tx,
            record_tx,
            event_counter: AtomicU64::new(0),
        }
    }

    /// Publish an alarm decision; dropped silently if nobody listens
    pub fn publish_alarm(&self, loc_id: &str, result: FusionResult) {
        let id = self.event_counter.fetch_add(1, Ordering::Relaxed);
        let _ = self.alarm_tx.send(AlarmEvent {
            id,
            loc_id: loc_id.to_string(),
            result,
            timestamp: Utc::now(),
        });
    }

    /// Publish one ingested record
    pub fn publish_record(&self, loc_id: &str, record: DecodedRecord) {
        let _ = self.record_tx.send(RecordEvent {
            loc_id: loc_id.to_string(),
            record,
            timestamp: Utc::now(),
        });
    }

    /// Subscribe to alarm decisions
    pub fn subscribe_alarms(&self) -> broadcast::Receiver<AlarmEvent> {
        self.alarm_tx.subscribe()
    }

    /// Subscribe to ingested records
    pub fn subscribe_records(&self) -> broadcast::Receiver<RecordEvent> {
        self.record_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_alarm_fanout_with_ids() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe_alarms();

        let result = FusionResult {
            alarm: true,
            confidence: 0.9,
            sources_triggered: 2,
            contributing: vec![],
        };
        bus.publish_alarm("RoomA", result.clone());
        bus.publish_alarm("RoomB", result);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.loc_id, "RoomA");
        assert_eq!(second.loc_id, "RoomB");
        assert!(second.id > first.id);
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.publish_alarm(
            "empty",
            FusionResult {
                alarm: false,
                confidence: 0.0,
                sources_triggered: 0,
                contributing: vec![],
            },
        );
    }
}
