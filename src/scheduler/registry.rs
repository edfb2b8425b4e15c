// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! PFDS device registry
//!
//! Devices are defined in a durable TOML file loaded at startup and
//! constructed only through validating constructors; out-of-range poll
//! intervals or bad addresses are rejected at this boundary. The
//! registry is read-mostly: the scheduler reads every tick, while
//! administrative add/remove takes the single writer lock.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::ConfigError;

/// Allowed poll interval range in seconds
pub const POLL_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 1..=3600;

/// Device reporting mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMode {
    /// Streams continuously once PERIOD_ON is acknowledged
    Continuous,
    /// Reports only when polled
    OnDemand,
}

/// One validated suppression/response device
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Unique device id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Device address
    pub ip: IpAddr,
    /// Location the device covers (cross-referenced externally)
    pub location_id: String,
    /// Reporting mode
    pub mode: DeviceMode,
    /// REQUEST1 polling cadence
    pub poll_interval: Duration,
}

impl Device {
    /// Validating constructor; the only way to make a `Device`
    pub fn new(
        id: &str,
        name: &str,
        ip: &str,
        location_id: &str,
        mode: DeviceMode,
        poll_interval_seconds: u64,
    ) -> Result<Self, ConfigError> {
        if id.is_empty() {
            return Err(ConfigError::OutOfRange {
                field: "device.id",
                value: String::new(),
                allowed: "non-empty",
            });
        }
        if !POLL_INTERVAL_RANGE.contains(&poll_interval_seconds) {
            return Err(ConfigError::OutOfRange {
                field: "device.poll_interval_seconds",
                value: poll_interval_seconds.to_string(),
                allowed: "1..=3600",
            });
        }
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(ip.to_string()))?;
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            ip,
            location_id: location_id.to_string(),
            mode,
            poll_interval: Duration::from_secs(poll_interval_seconds),
        })
    }
}

/// On-disk registry shape
#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    devices: Vec<DeviceEntry>,
}

/// Raw, unvalidated registry row
#[derive(Debug, Serialize, Deserialize)]
struct DeviceEntry {
    id: String,
    name: String,
    ip: String,
    location_id: String,
    mode: DeviceMode,
    poll_interval_seconds: u64,
}

/// Thread-safe device registry
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Arc<Device>>>,
}

impl DeviceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Load and validate the registry file; every row must pass
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let file: RegistryFile = toml::from_str(&content)?;

        let registry = Self::new();
        for entry in file.devices {
            let device = Device::new(
                &entry.id,
                &entry.name,
                &entry.ip,
                &entry.location_id,
                entry.mode,
                entry.poll_interval_seconds,
            )?;
            registry.insert(device)?;
        }
        info!(
            "Loaded {} devices from {:?}",
            registry.len(),
            path
        );
        Ok(registry)
    }

    /// Load the registry, or start empty when the file does not exist
    pub fn load_or_empty(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No device registry at {:?}, starting empty", path);
            Ok(Self::new())
        }
    }

    /// Add a device; duplicate ids are rejected
    pub fn insert(&self, device: Device) -> Result<(), ConfigError> {
        let mut devices = self.devices.write();
        if devices.contains_key(&device.id) {
            return Err(ConfigError::DuplicateDevice(device.id));
        }
        devices.insert(device.id.clone(), Arc::new(device));
        Ok(())
    }

    /// Remove a device by id
    pub fn remove(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.write().remove(id)
    }

    /// Look up one device
    pub fn get(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.read().get(id).cloned()
    }

    /// Snapshot of all devices, unordered
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.read().values().cloned().collect()
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// True when no devices are registered
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validating_constructor() {
        let ok = Device::new("pfds-1", "Bay 1 unit", "10.0.0.5", "Bay1", DeviceMode::OnDemand, 60);
        assert!(ok.is_ok());

        assert!(matches!(
            Device::new("pfds-2", "x", "10.0.0.5", "Bay1", DeviceMode::OnDemand, 0),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(
            Device::new("pfds-3", "x", "10.0.0.5", "Bay1", DeviceMode::OnDemand, 3601),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(
            Device::new("pfds-4", "x", "not-an-ip", "Bay1", DeviceMode::OnDemand, 60),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let registry = DeviceRegistry::new();
        let device =
            Device::new("pfds-1", "a", "10.0.0.1", "Bay1", DeviceMode::OnDemand, 30).unwrap();
        registry.insert(device.clone()).unwrap();
        assert!(matches!(
            registry.insert(device),
            Err(ConfigError::DuplicateDevice(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = std::env::temp_dir().join("emberwatch-registry-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("devices.toml");
        std::fs::write(
            &path,
            r#"
[[devices]]
id = "pfds-1"
name = "North bay suppressor"
ip = "192.168.1.40"
location_id = "BayN"
mode = "continuous"
poll_interval_seconds = 120

[[devices]]
id = "pfds-2"
name = "South bay suppressor"
ip = "192.168.1.41"
location_id = "BayS"
mode = "on_demand"
poll_interval_seconds = 60
"#,
        )
        .unwrap();

        let registry = DeviceRegistry::load(&path).unwrap();
        assert_eq!(registry.len(), 2);
        let d = registry.get("pfds-1").unwrap();
        assert_eq!(d.mode, DeviceMode::Continuous);
        assert_eq!(d.poll_interval, Duration::from_secs(120));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_or_empty_missing_file() {
        let registry =
            DeviceRegistry::load_or_empty(Path::new("/nonexistent/devices.toml")).unwrap();
        assert!(registry.is_empty());
    }
}
