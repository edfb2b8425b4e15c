// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Emberwatch - Concurrent Fire Detection Pipeline
//!
//! Ingests thermal and sensor data from networked field units, fuses it
//! into per-location alarm decisions, and drives a fleet of suppression
//! devices on a polling/command schedule.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      Emberwatch Pipeline                      │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌─────────┐   ┌─────────┐   ┌─────────┐   ┌──────────────┐   │
//! │  │ Ingest  │ → │ Decoder │ → │ Fusion  │ → │  Event Bus   │   │
//! │  │ Server  │   │         │   │ Engine  │   │ (alarms out) │   │
//! │  └─────────┘   └─────────┘   └─────────┘   └──────────────┘   │
//! │       ↓                           ↑               ↓           │
//! │  ┌─────────┐   ┌─────────┐   ┌─────────┐   ┌──────────────┐   │
//! │  │ Metrics │   │  Rate   │   │ Vision  │   │    Device    │   │
//! │  │Collector│   │ Control │   │ (ext.)  │   │   Scheduler  │   │
//! │  └─────────┘   └─────────┘   └─────────┘   └──────────────┘   │
//! └───────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod core;
pub mod fusion;
pub mod ingest;
pub mod metrics;
pub mod protocol;
pub mod rate;
pub mod scheduler;

// Re-exports for convenience
pub use config::{Config, ConfigError};
pub use core::{Context, EventBus};
pub use fusion::{FusionEngine, FusionResult};
pub use ingest::IngestServer;
pub use metrics::{Metrics, MetricsServer};
pub use protocol::{DecodedRecord, Decoder, ParseError};
pub use rate::AdaptiveRateController;
pub use scheduler::{DeviceRegistry, DeviceScheduler};

/// Emberwatch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Emberwatch name
pub const NAME: &str = "Emberwatch";
