// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Adaptive capture-rate controller
//!
//! Maps a capture pipeline's backlog depth to a recommended frame rate
//! so queues cannot grow without bound. Purely computational: given the
//! same depth/clock sequence it always produces the same fps sequence.
//! The consuming capture loop lives outside this crate; it reports its
//! fps through the metrics gauge and reads the interval back.

use std::time::{Duration, Instant};

use crate::config::AdaptiveConfig;

/// Multiplicative-decrease / additive-increase frame-rate governor
#[derive(Debug, Clone)]
pub struct AdaptiveRateController {
    config: AdaptiveConfig,
    fps: f64,
    last_adjust: Option<Instant>,
}

impl AdaptiveRateController {
    /// Controller starting at `base_fps`
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            fps: config.base_fps,
            config,
            last_adjust: None,
        }
    }

    /// Feed the current backlog depth; returns the recommended fps
    pub fn observe(&mut self, depth: usize) -> f64 {
        self.observe_at(depth, Instant::now())
    }

    /// `observe` with an explicit clock, for deterministic tests
    ///
    /// Above the high watermark fps is cut to 3/4 (floored at min_fps);
    /// below the low watermark it creeps up by 1 (capped at max_fps);
    /// in between it holds. At most one adjustment per cooldown window.
    pub fn observe_at(&mut self, depth: usize, now: Instant) -> f64 {
        let cooldown = Duration::from_millis(self.config.cooldown_ms);
        if let Some(last) = self.last_adjust {
            if now.duration_since(last) < cooldown {
                return self.fps;
            }
        }

        if depth > self.config.high_watermark {
            self.fps = (self.fps * 0.75).max(self.config.min_fps);
            self.last_adjust = Some(now);
        } else if depth < self.config.low_watermark {
            self.fps = (self.fps + 1.0).min(self.config.max_fps);
            self.last_adjust = Some(now);
        }

        self.fps
    }

    /// Current recommended frame rate
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Current recommended frame interval in milliseconds
    pub fn frame_interval_ms(&self) -> u64 {
        (1000.0 / self.fps).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdaptiveConfig {
        AdaptiveConfig {
            base_fps: 25.0,
            min_fps: 5.0,
            max_fps: 30.0,
            high_watermark: 8,
            low_watermark: 2,
            cooldown_ms: 1000,
        }
    }

    #[test]
    fn test_reference_depth_sequence() {
        let mut ctl = AdaptiveRateController::new(config());
        let t0 = Instant::now();
        let depths = [0usize, 3, 8, 12, 8, 2];

        let mut fps_seq = Vec::new();
        for (i, &depth) in depths.iter().enumerate() {
            // Steps 2s apart so the cooldown never masks an adjustment
            fps_seq.push(ctl.observe_at(depth, t0 + Duration::from_secs(2 * i as u64)));
        }

        // Always inside [min, max]
        for &fps in &fps_seq {
            assert!((5.0..=30.0).contains(&fps));
        }
        // depth 0 (< low): up; 3 and 8 (between): hold; 12 (> high): cut
        assert_eq!(fps_seq[0], 26.0);
        assert_eq!(fps_seq[1], 26.0);
        assert_eq!(fps_seq[2], 26.0);
        assert_eq!(fps_seq[3], 19.5);
        // 8 and 2 are inside the band: hold
        assert_eq!(fps_seq[4], 19.5);
        assert_eq!(fps_seq[5], 19.5);
    }

    #[test]
    fn test_never_increases_under_pressure() {
        let mut ctl = AdaptiveRateController::new(config());
        let t0 = Instant::now();
        let mut prev = ctl.fps();
        for i in 0..20 {
            let fps = ctl.observe_at(12, t0 + Duration::from_secs(2 * i));
            assert!(fps <= prev);
            prev = fps;
        }
        assert_eq!(prev, 5.0); // floored at min_fps
    }

    #[test]
    fn test_recovers_to_max_when_clear() {
        let mut ctl = AdaptiveRateController::new(config());
        let t0 = Instant::now();
        for i in 0..10 {
            ctl.observe_at(20, t0 + Duration::from_secs(2 * i));
        }
        for i in 10..60 {
            ctl.observe_at(0, t0 + Duration::from_secs(2 * i));
        }
        assert_eq!(ctl.fps(), 30.0); // capped at max_fps
    }

    #[test]
    fn test_cooldown_limits_adjustment_rate() {
        let mut ctl = AdaptiveRateController::new(config());
        let t0 = Instant::now();

        assert_eq!(ctl.observe_at(12, t0), 18.75);
        // Within the cooldown window: no further adjustment
        assert_eq!(ctl.observe_at(12, t0 + Duration::from_millis(500)), 18.75);
        assert_eq!(ctl.observe_at(0, t0 + Duration::from_millis(900)), 18.75);
        // Cooldown elapsed
        assert_eq!(ctl.observe_at(12, t0 + Duration::from_millis(1000)), 14.0625);
    }

    #[test]
    fn test_frame_interval() {
        let mut ctl = AdaptiveRateController::new(config());
        assert_eq!(ctl.frame_interval_ms(), 40); // 25 fps
        let t0 = Instant::now();
        for i in 0..30 {
            ctl.observe_at(100, t0 + Duration::from_secs(2 * i));
        }
        assert_eq!(ctl.frame_interval_ms(), 200); // 5 fps
    }
}
