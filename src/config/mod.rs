// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Configuration module
//!
//! All tunables arrive through here and are validated at the boundary;
//! downstream components never clamp or coerce silently.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::protocol::ThermalCalibration;

/// Configuration rejection; raised only at load/validate time
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File system failure
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML syntax/shape failure
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// TOML serialization failure on save
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// A value is outside its allowed range
    #[error("{field} out of range: {value} (allowed: {allowed})")]
    OutOfRange {
        /// Which field
        field: &'static str,
        /// Offending value, rendered
        value: String,
        /// Human-readable allowed range
        allowed: &'static str,
    },
    /// A device address failed to parse
    #[error("invalid device address: {0}")]
    InvalidAddress(String),
    /// Two registry entries share an id
    #[error("duplicate device id: {0}")]
    DuplicateDevice(String),
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Log level
    pub log_level: String,

    /// Ingestion server configuration
    pub server: ServerConfig,

    /// Fusion thresholds and timing
    pub fusion: FusionConfig,

    /// Thermal cell calibration
    pub calibration: ThermalCalibration,

    /// ADC to engineering-unit conversion
    pub sensor_calibration: SensorCalibration,

    /// Adaptive capture-rate controller parameters
    pub adaptive: AdaptiveConfig,

    /// Device scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Metrics exposition configuration
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "Emberwatch".to_string(),
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            fusion: FusionConfig::default(),
            calibration: ThermalCalibration::default(),
            sensor_calibration: SensorCalibration::default(),
            adaptive: AdaptiveConfig::default(),
            scheduler: SchedulerConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and validate it
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("emberwatch"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Reject out-of-range values before anything downstream sees them
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fusion.validate()?;
        self.adaptive.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}

/// Ingestion server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for field-unit connections
    pub bind_addr: String,

    /// Connection cap; further clients are rejected
    pub max_connections: usize,

    /// Per-location handoff queue capacity (oldest dropped when full)
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9400".to_string(),
            max_connections: 128,
            queue_capacity: 64,
        }
    }
}

/// Per-channel alarm thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    /// Thermal cell threshold in degrees C
    pub temp_celsius: f64,
    /// Gas threshold in ppm
    pub gas_ppm: f64,
    /// Smoke obscuration threshold in percent
    pub smoke_pct: f64,
    /// Flame channel threshold in percent
    pub flame_pct: f64,
    /// Vision detector confidence threshold, 0..1
    pub vision_conf: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temp_celsius: 60.0,
            gas_ppm: 400.0,
            smoke_pct: 12.0,
            flame_pct: 50.0,
            vision_conf: 0.6,
        }
    }
}

/// Confidence policy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidencePolicyKind {
    /// Mean of normalized exceedances over triggered channels
    MeanExceedance,
    /// Strongest single normalized exceedance
    MaxExceedance,
}

/// Fusion engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Per-channel thresholds
    pub thresholds: Thresholds,

    /// Channels that must exceed before an alarm is raised
    pub min_sources: usize,

    /// Alarm hold period in seconds (re-evaluation frozen)
    pub hold_seconds: u64,

    /// Hot-cell latch duration after the last exceedance
    pub decay_seconds: u64,

    /// Confidence aggregation policy
    pub confidence_policy: ConfidencePolicyKind,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            min_sources: 2,
            hold_seconds: 30,
            decay_seconds: 5,
            confidence_policy: ConfidencePolicyKind::MeanExceedance,
        }
    }
}

impl FusionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_sources < 1 || self.min_sources > 5 {
            return Err(ConfigError::OutOfRange {
                field: "fusion.min_sources",
                value: self.min_sources.to_string(),
                allowed: "1..=5",
            });
        }
        if !(0.0..=1.0).contains(&self.thresholds.vision_conf) {
            return Err(ConfigError::OutOfRange {
                field: "fusion.thresholds.vision_conf",
                value: self.thresholds.vision_conf.to_string(),
                allowed: "0.0..=1.0",
            });
        }
        for (field, value) in [
            ("fusion.thresholds.temp_celsius", self.thresholds.temp_celsius),
            ("fusion.thresholds.gas_ppm", self.thresholds.gas_ppm),
            ("fusion.thresholds.smoke_pct", self.thresholds.smoke_pct),
            ("fusion.thresholds.flame_pct", self.thresholds.flame_pct),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::OutOfRange {
                    field,
                    value: value.to_string(),
                    allowed: "finite, > 0",
                });
            }
        }
        if self.decay_seconds == 0 {
            return Err(ConfigError::OutOfRange {
                field: "fusion.decay_seconds",
                value: "0".to_string(),
                allowed: ">= 1",
            });
        }
        Ok(())
    }
}

/// ADC count conversion for the gas and smoke channels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SensorCalibration {
    /// ppm per adc1 count
    pub gas_scale: f64,
    /// percent per adc2 count
    pub smoke_scale: f64,
}

impl Default for SensorCalibration {
    fn default() -> Self {
        // 12-bit ADC, full scale 1000 ppm / 100 %
        Self {
            gas_scale: 1000.0 / 4095.0,
            smoke_scale: 100.0 / 4095.0,
        }
    }
}

/// Adaptive capture-rate controller parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Starting frames per second
    pub base_fps: f64,
    /// Floor under backlog pressure
    pub min_fps: f64,
    /// Ceiling when the backlog is clear
    pub max_fps: f64,
    /// Backlog depth above which fps is cut
    pub high_watermark: usize,
    /// Backlog depth below which fps is raised
    pub low_watermark: usize,
    /// Minimum interval between adjustments, milliseconds
    pub cooldown_ms: u64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            base_fps: 25.0,
            min_fps: 5.0,
            max_fps: 30.0,
            high_watermark: 8,
            low_watermark: 2,
            cooldown_ms: 1000,
        }
    }
}

impl AdaptiveConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_fps > 0.0 && self.min_fps <= self.base_fps && self.base_fps <= self.max_fps)
        {
            return Err(ConfigError::OutOfRange {
                field: "adaptive fps bounds",
                value: format!(
                    "min={} base={} max={}",
                    self.min_fps, self.base_fps, self.max_fps
                ),
                allowed: "0 < min <= base <= max",
            });
        }
        if self.low_watermark >= self.high_watermark {
            return Err(ConfigError::OutOfRange {
                field: "adaptive watermarks",
                value: format!("low={} high={}", self.low_watermark, self.high_watermark),
                allowed: "low < high",
            });
        }
        Ok(())
    }
}

/// Device scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Device registry file
    pub registry_path: PathBuf,

    /// Scheduler tick resolution in milliseconds
    pub tick_ms: u64,

    /// TCP port devices listen on for commands
    pub command_port: u16,

    /// Acknowledgement timeout per dispatch, milliseconds
    pub dispatch_timeout_ms: u64,

    /// Retry cadence for a failed PERIOD_ON, seconds
    pub period_on_retry_seconds: u64,

    /// Minimum interval between WARN-level failure logs per device
    pub failure_log_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("./devices.toml"),
            tick_ms: 1000,
            command_port: 9401,
            dispatch_timeout_ms: 3000,
            period_on_retry_seconds: 30,
            failure_log_interval_seconds: 60,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "scheduler.tick_ms",
                value: "0".to_string(),
                allowed: ">= 1",
            });
        }
        if self.dispatch_timeout_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "scheduler.dispatch_timeout_ms",
                value: "0".to_string(),
                allowed: ">= 1",
            });
        }
        if self.period_on_retry_seconds == 0 {
            return Err(ConfigError::OutOfRange {
                field: "scheduler.period_on_retry_seconds",
                value: "0".to_string(),
                allowed: ">= 1",
            });
        }
        Ok(())
    }
}

/// Metrics exposition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve the text exposition endpoint
    pub enabled: bool,

    /// Listen address for metric scrapes
    pub bind_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "0.0.0.0:9402".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_min_sources_bounds() {
        let mut config = Config::default();
        config.fusion.min_sources = 0;
        assert!(config.validate().is_err());
        config.fusion.min_sources = 6;
        assert!(config.validate().is_err());
        config.fusion.min_sources = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_vision_threshold_rejected_not_clamped() {
        let mut config = Config::default();
        config.fusion.thresholds.vision_conf = 1.5;
        match config.validate() {
            Err(ConfigError::OutOfRange { field, .. }) => {
                assert_eq!(field, "fusion.thresholds.vision_conf")
            }
            other => panic!("expected OutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn test_fps_ordering_enforced() {
        let mut config = Config::default();
        config.adaptive.min_fps = 40.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_watermark_ordering_enforced() {
        let mut config = Config::default();
        config.adaptive.low_watermark = 8;
        config.adaptive.high_watermark = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert!(back.validate().is_ok());
        assert_eq!(back.fusion.min_sources, config.fusion.min_sources);
        assert_eq!(back.server.bind_addr, config.server.bind_addr);
    }
}
