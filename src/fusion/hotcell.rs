// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Hot-cell debounce grid
//!
//! A cell that exceeds the thermal threshold latches "hot" until its
//! decay deadline passes, so single noisy frames cannot flicker the
//! thermal channel on and off.

use std::time::{Duration, Instant};

use crate::protocol::THERMAL_CELLS;

/// Per-cell exceedance latch over one 32x24 thermal grid
pub struct HotCellGrid {
    decay: Duration,
    /// Decay deadline per cell; None when cold
    deadlines: Vec<Option<Instant>>,
    /// Peak temperature observed during the current latch
    peak: Vec<f64>,
}

impl HotCellGrid {
    /// Grid with all cells cold
    pub fn new(decay: Duration) -> Self {
        Self {
            decay,
            deadlines: vec![None; THERMAL_CELLS],
            peak: vec![f64::MIN; THERMAL_CELLS],
        }
    }

    /// Fold one calibrated frame into the latch state
    ///
    /// Deadlines only move forward: re-triggering a hot cell extends its
    /// deadline, it never shortens one.
    pub fn observe(&mut self, celsius: &[f64], threshold: f64, now: Instant) {
        for (i, &value) in celsius.iter().enumerate().take(THERMAL_CELLS) {
            if value > threshold {
                let candidate = now + self.decay;
                match self.deadlines[i] {
                    Some(existing) => {
                        self.deadlines[i] = Some(existing.max(candidate));
                        self.peak[i] = self.peak[i].max(value);
                    }
                    None => {
                        self.deadlines[i] = Some(candidate);
                        self.peak[i] = value;
                    }
                }
            } else if matches!(self.deadlines[i], Some(d) if d <= now) {
                self.deadlines[i] = None;
                self.peak[i] = f64::MIN;
            }
        }
    }

    /// Is this cell currently latched hot?
    pub fn is_hot(&self, index: usize, now: Instant) -> bool {
        matches!(self.deadlines.get(index), Some(Some(d)) if *d > now)
    }

    /// Number of cells currently latched hot
    pub fn hot_count(&self, now: Instant) -> usize {
        self.deadlines
            .iter()
            .filter(|d| matches!(d, Some(d) if *d > now))
            .count()
    }

    /// Peak temperature over all currently-hot cells
    pub fn max_hot_celsius(&self, now: Instant) -> Option<f64> {
        let mut max = None;
        for (i, deadline) in self.deadlines.iter().enumerate() {
            if matches!(deadline, Some(d) if *d > now) {
                max = Some(max.map_or(self.peak[i], |m: f64| m.max(self.peak[i])));
            }
        }
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(index: usize, value: f64, fill: f64) -> Vec<f64> {
        let mut cells = vec![fill; THERMAL_CELLS];
        cells[index] = value;
        cells
    }

    #[test]
    fn test_cell_latches_for_decay_window() {
        let mut grid = HotCellGrid::new(Duration::from_secs(5));
        let t0 = Instant::now();

        grid.observe(&frame_with(10, 80.0, 20.0), 60.0, t0);
        assert!(grid.is_hot(10, t0));
        assert_eq!(grid.hot_count(t0), 1);

        // Instantaneous dip below threshold does not clear the latch
        grid.observe(&frame_with(10, 30.0, 20.0), 60.0, t0 + Duration::from_secs(2));
        assert!(grid.is_hot(10, t0 + Duration::from_secs(2)));
        assert!(grid.is_hot(10, t0 + Duration::from_millis(4999)));

        // Cold after the decay deadline, absent a new exceedance
        assert!(!grid.is_hot(10, t0 + Duration::from_secs(5)));
        assert_eq!(grid.hot_count(t0 + Duration::from_secs(6)), 0);
    }

    #[test]
    fn test_retrigger_extends_deadline() {
        let mut grid = HotCellGrid::new(Duration::from_secs(5));
        let t0 = Instant::now();

        grid.observe(&frame_with(0, 70.0, 20.0), 60.0, t0);
        grid.observe(&frame_with(0, 70.0, 20.0), 60.0, t0 + Duration::from_secs(3));

        // Hot well past the first deadline
        assert!(grid.is_hot(0, t0 + Duration::from_secs(7)));
        assert!(!grid.is_hot(0, t0 + Duration::from_secs(8)));
    }

    #[test]
    fn test_peak_tracked_while_latched() {
        let mut grid = HotCellGrid::new(Duration::from_secs(10));
        let t0 = Instant::now();

        grid.observe(&frame_with(5, 75.0, 20.0), 60.0, t0);
        grid.observe(&frame_with(5, 95.0, 20.0), 60.0, t0 + Duration::from_secs(1));
        grid.observe(&frame_with(5, 40.0, 20.0), 60.0, t0 + Duration::from_secs(2));

        let max = grid.max_hot_celsius(t0 + Duration::from_secs(3)).unwrap();
        assert!((max - 95.0).abs() < 1e-9);
    }

    #[test]
    fn test_cold_grid_reports_nothing() {
        let mut grid = HotCellGrid::new(Duration::from_secs(5));
        let t0 = Instant::now();
        grid.observe(&vec![25.0; THERMAL_CELLS], 60.0, t0);
        assert_eq!(grid.hot_count(t0), 0);
        assert!(grid.max_hot_celsius(t0).is_none());
    }
}
