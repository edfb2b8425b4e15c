// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Fusion engine - combines thermal, gas, smoke, flame, and vision
//! channels into one alarm decision per location
//!
//! Each location's state is touched by exactly one writer at a time:
//! the ingest path runs on that location's consumer task, and the
//! per-location mutex serializes the external vision updates against it.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{Config, FusionConfig, SensorCalibration};
use crate::core::EventBus;
use crate::metrics::Metrics;
use crate::protocol::DecodedRecord;

use super::hotcell::HotCellGrid;
use super::policy::{build_policy, ChannelContribution, ConfidencePolicy};

/// The five fused sensor channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceChannel {
    /// Hot-cell debounced thermal grid
    Thermal,
    /// Gas concentration
    Gas,
    /// Smoke obscuration
    Smoke,
    /// Flame detector
    Flame,
    /// External vision detector confidence
    Vision,
}

/// Instantaneous channel values handed to `fuse`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionInputs {
    /// Thermal value in degrees C (debounced peak on the ingest path)
    pub temp_celsius: f64,
    /// Gas concentration in ppm
    pub gas_ppm: f64,
    /// Smoke obscuration in percent
    pub smoke_pct: f64,
    /// Flame channel in percent
    pub flame_pct: f64,
    /// Vision confidence, 0..1
    pub vision_conf: f64,
}

/// One fusion decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    /// Alarm raised
    pub alarm: bool,
    /// Aggregate confidence in [0, 1]
    pub confidence: f64,
    /// Channels exceeding their threshold
    pub sources_triggered: usize,
    /// Which channels contributed
    pub contributing: Vec<SourceChannel>,
}

/// Read-only view of one location's fusion state
#[derive(Debug, Clone)]
pub struct LocationSnapshot {
    /// Location key
    pub loc_id: String,
    /// Latest flame detector reading
    pub flame: bool,
    /// Latest gas reading, ppm
    pub gas_ppm: f64,
    /// Latest smoke reading, percent
    pub smoke_pct: f64,
    /// Latest vision confidence
    pub vision_conf: f64,
    /// Cells currently latched hot
    pub hot_cells: usize,
    /// Alarm hold currently active
    pub alarm_active: bool,
    /// Most recent decision
    pub last_result: Option<FusionResult>,
}

struct FusionState {
    grid: HotCellGrid,
    gas_ppm: f64,
    smoke_pct: f64,
    flame: bool,
    vision_conf: f64,
    hold_until: Option<Instant>,
    held: Option<FusionResult>,
    last_result: Option<FusionResult>,
}

impl FusionState {
    fn new(decay: Duration) -> Self {
        Self {
            grid: HotCellGrid::new(decay),
            gas_ppm: 0.0,
            smoke_pct: 0.0,
            flame: false,
            vision_conf: 0.0,
            hold_until: None,
            held: None,
            last_result: None,
        }
    }
}

/// Multi-source fusion engine; one state per location, created on first
/// record and never torn down by a socket closing
pub struct FusionEngine {
    config: FusionConfig,
    sensors: SensorCalibration,
    policy: Box<dyn ConfidencePolicy>,
    metrics: Arc<Metrics>,
    bus: Arc<EventBus>,
    states: RwLock<HashMap<String, Arc<Mutex<FusionState>>>>,
}

impl FusionEngine {
    /// Engine from validated configuration
    pub fn new(config: &Config, metrics: Arc<Metrics>, bus: Arc<EventBus>) -> Self {
        let policy = build_policy(config.fusion.confidence_policy);
        debug!("Fusion confidence policy: {}", policy.name());
        Self {
            config: config.fusion.clone(),
            sensors: config.sensor_calibration,
            policy,
            metrics,
            bus,
            states: RwLock::new(HashMap::new()),
        }
    }

    fn state_for(&self, loc_id: &str) -> Arc<Mutex<FusionState>> {
        if let Some(state) = self.states.read().get(loc_id) {
            return state.clone();
        }
        let decay = Duration::from_secs(self.config.decay_seconds);
        self.states
            .write()
            .entry(loc_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(FusionState::new(decay))))
            .clone()
    }

    /// Fold one decoded record into the location's state and re-evaluate
    ///
    /// Identity records update nothing fusion cares about and return None.
    pub fn ingest(&self, loc_id: &str, record: &DecodedRecord) -> Option<FusionResult> {
        self.ingest_at(loc_id, record, Instant::now())
    }

    /// `ingest` with an explicit clock, for deterministic tests
    pub fn ingest_at(
        &self,
        loc_id: &str,
        record: &DecodedRecord,
        now: Instant,
    ) -> Option<FusionResult> {
        let state = self.state_for(loc_id);
        let mut st = state.lock();
        match record {
            DecodedRecord::Identity { .. } => None,
            DecodedRecord::Thermal(frame) => {
                st.grid
                    .observe(&frame.celsius, self.config.thresholds.temp_celsius, now);
                let inputs = self.inputs_of(&st, now);
                Some(self.evaluate_locked(loc_id, &mut st, inputs, now))
            }
            DecodedRecord::Sample(sample) => {
                st.gas_ppm = sample.adc1 as f64 * self.sensors.gas_scale;
                st.smoke_pct = sample.adc2 as f64 * self.sensors.smoke_scale;
                st.flame = sample.flame;
                let inputs = self.inputs_of(&st, now);
                Some(self.evaluate_locked(loc_id, &mut st, inputs, now))
            }
        }
    }

    /// Collaborator entry point: latest vision confidence for a location
    ///
    /// The value is clamped to [0, 1] here at the boundary; `fuse` never
    /// coerces.
    pub fn set_vision_confidence(&self, loc_id: &str, confidence: f64) -> FusionResult {
        let now = Instant::now();
        let state = self.state_for(loc_id);
        let mut st = state.lock();
        st.vision_conf = confidence.clamp(0.0, 1.0);
        let inputs = self.inputs_of(&st, now);
        self.evaluate_locked(loc_id, &mut st, inputs, now)
    }

    /// Evaluate explicit channel values against the configured thresholds
    pub fn fuse(&self, loc_id: &str, inputs: FusionInputs) -> FusionResult {
        self.fuse_at(loc_id, inputs, Instant::now())
    }

    /// `fuse` with an explicit clock, for deterministic tests
    pub fn fuse_at(&self, loc_id: &str, inputs: FusionInputs, now: Instant) -> FusionResult {
        let state = self.state_for(loc_id);
        let mut st = state.lock();
        self.evaluate_locked(loc_id, &mut st, inputs, now)
    }

    fn inputs_of(&self, st: &FusionState, now: Instant) -> FusionInputs {
        FusionInputs {
            temp_celsius: st.grid.max_hot_celsius(now).unwrap_or(0.0),
            gas_ppm: st.gas_ppm,
            smoke_pct: st.smoke_pct,
            flame_pct: if st.flame { 100.0 } else { 0.0 },
            vision_conf: st.vision_conf,
        }
    }

    fn evaluate_locked(
        &self,
        loc_id: &str,
        st: &mut FusionState,
        inputs: FusionInputs,
        now: Instant,
    ) -> FusionResult {
        self.metrics.fusion_evaluations.inc();

        // Alarm hold: freeze re-evaluation until the hold elapses
        if let Some(until) = st.hold_until {
            if now < until {
                if let Some(held) = &st.held {
                    return held.clone();
                }
            } else {
                st.hold_until = None;
                st.held = None;
            }
        }

        let result = self.evaluate(&inputs);

        if result.alarm {
            st.hold_until = Some(now + Duration::from_secs(self.config.hold_seconds));
            st.held = Some(result.clone());
            self.metrics.fusion_alarms.inc();
            warn!(
                "ALARM at {}: {} sources triggered ({:?}), confidence {:.2}",
                loc_id, result.sources_triggered, result.contributing, result.confidence
            );
            self.bus.publish_alarm(loc_id, result.clone());
        }

        st.last_result = Some(result.clone());
        result
    }

    fn evaluate(&self, inputs: &FusionInputs) -> FusionResult {
        let t = &self.config.thresholds;
        let channels = [
            (SourceChannel::Thermal, inputs.temp_celsius, t.temp_celsius),
            (SourceChannel::Gas, inputs.gas_ppm, t.gas_ppm),
            (SourceChannel::Smoke, inputs.smoke_pct, t.smoke_pct),
            (SourceChannel::Flame, inputs.flame_pct, t.flame_pct),
            (SourceChannel::Vision, inputs.vision_conf, t.vision_conf),
        ];

        let triggered: Vec<ChannelContribution> = channels
            .iter()
            .filter(|(_, value, threshold)| value > threshold)
            .map(|&(channel, value, threshold)| ChannelContribution {
                channel,
                value,
                threshold,
                exceedance: ((value - threshold) / threshold.max(1e-9)).clamp(0.0, 1.0),
            })
            .collect();

        let sources_triggered = triggered.len();
        FusionResult {
            alarm: sources_triggered >= self.config.min_sources,
            confidence: self.policy.confidence(&triggered).clamp(0.0, 1.0),
            sources_triggered,
            contributing: triggered.iter().map(|c| c.channel).collect(),
        }
    }

    /// Read-only view of one location, if fusion has seen it
    pub fn snapshot(&self, loc_id: &str) -> Option<LocationSnapshot> {
        let state = self.states.read().get(loc_id)?.clone();
        let st = state.lock();
        let now = Instant::now();
        Some(LocationSnapshot {
            loc_id: loc_id.to_string(),
            flame: st.flame,
            gas_ppm: st.gas_ppm,
            smoke_pct: st.smoke_pct,
            vision_conf: st.vision_conf,
            hot_cells: st.grid.hot_count(now),
            alarm_active: matches!(st.hold_until, Some(until) if until > now),
            last_result: st.last_result.clone(),
        })
    }

    /// Locations fusion currently tracks
    pub fn location_count(&self) -> usize {
        self.states.read().len()
    }
}
