// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Bus controller trait and common types

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

/// Errors reported by a bus controller.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus not acquired")]
    NotAcquired,

    #[error("bus master not present at {0}")]
    MasterMissing(String),

    #[error("sensor {0} not found on the bus")]
    SensorMissing(String),

    #[error("CRC check failed for sensor {0}")]
    Crc(String),

    #[error("unreadable data from sensor {serial}: {detail}")]
    Parse { serial: String, detail: String },

    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Access to the shared one-wire bus.
///
/// A controller owns a handle while acquired. Reads address sensors by
/// serial number and return degrees Celsius.
#[async_trait]
pub trait BusController: Send {
    /// Controller name used in logs
    fn name(&self) -> &str;

    /// Handle of the acquired bus, `None` when not held.
    fn handle(&self) -> Option<u32>;

    fn is_ready(&self) -> bool {
        self.handle().is_some()
    }

    /// Take ownership of the bus master.
    async fn acquire(&mut self) -> Result<(), BusError>;

    /// Give the bus master back.
    async fn release(&mut self) -> Result<(), BusError>;

    /// Toggle power to the sensors on the bus.
    async fn power_cycle(&mut self) -> Result<(), BusError>;

    /// Release, power cycle and acquire again.
    async fn reset(&mut self) -> Result<(), BusError> {
        info!("Resetting bus controller {}", self.name());
        if let Err(e) = self.release().await {
            warn!("Release failed during reset of {}: {}", self.name(), e);
        }
        self.power_cycle().await?;
        self.acquire().await
    }

    /// Read one sensor.
    async fn try_read(&mut self, serial: &str) -> Result<f64, BusError>;

    /// Read one sensor, mapping any failure to `None`.
    async fn read_temperature(&mut self, serial: &str) -> Option<f64> {
        match self.try_read(serial).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Read failed on {}: {}", self.name(), e);
                None
            }
        }
    }
}
