// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Configuration module

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::alert::AudioVisualConfig;
use crate::notify::NotificationConfig;
use crate::streaming::StreamingConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Application version
    pub version: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Enable demo mode (simulated bus)
    pub demo_mode: bool,

    /// One-wire bus configuration
    pub bus: BusConfig,

    /// Alarm engine configuration
    pub engine: EngineConfig,

    /// Event queue configuration
    pub events: EventsConfig,

    /// Streaming configuration
    pub streaming: StreamingConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Annunciator outputs
    pub audiovisual: AudioVisualConfig,

    /// Notification configuration
    pub notifications: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "Tempnet".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            demo_mode: false,
            bus: BusConfig::default(),
            engine: EngineConfig::default(),
            events: EventsConfig::default(),
            streaming: StreamingConfig::default(),
            database: DatabaseConfig::default(),
            audiovisual: AudioVisualConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
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

    /// Move the session document and database under `dir`.
    pub fn relocate_data(&mut self, dir: &Path) {
        self.data_dir = dir.to_path_buf();
        self.engine.session_file = dir.join("temperature.json");
        self.database.path = dir.join("tempnet.db");
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("tempnet"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// One-wire bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// w1 sysfs devices directory
    pub devices_dir: PathBuf,

    /// Bus master directory name under `devices_dir`
    pub master: String,

    /// GPIO value file switching sensor power, if wired
    pub power_pin: Option<PathBuf>,

    /// How long power stays off during a power cycle
    pub power_cycle_hold_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            devices_dir: PathBuf::from("/sys/bus/w1/devices"),
            master: "w1_bus_master1".to_string(),
            power_pin: None,
            power_cycle_hold_ms: 1000,
        }
    }
}

/// Alarm engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine loop period in milliseconds
    pub poll_interval_ms: u64,

    /// Networks smaller than this are rate limited
    pub small_network_size: usize,

    /// Minimum seconds between full updates of a small network
    pub small_network_gate_secs: u64,

    /// Delay before retrying a missing config or a failed bus
    pub retry_secs: u64,

    /// Seconds between temperature log summaries
    pub log_interval_secs: u64,

    /// Session document
    pub session_file: PathBuf,

    /// Pending engine commands
    pub command_capacity: usize,
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            small_network_size: 10,
            small_network_gate_secs: 8,
            retry_secs: 60,
            log_interval_secs: 60,
            session_file: PathBuf::from("./data/temperature.json"),
            command_capacity: 16,
        }
    }
}

/// Event queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Queue capacity; producers drop events beyond it
    pub queue_capacity: usize,

    /// Dispatcher tick in milliseconds
    pub dispatch_interval_ms: u64,

    /// Gap between data events that triggers a stale data warning
    pub stale_data_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 50,
            dispatch_interval_ms: 500,
            stale_data_secs: 180,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database path
    pub path: PathBuf,

    /// Retention period in days
    pub retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/tempnet.db"),
            retention_days: 365,
        }
    }
}
