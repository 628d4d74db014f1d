// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! One-wire bus through the Linux w1 sysfs interface

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{BusController, BusError};
use crate::config::BusConfig;

/// DS18B20 style sensors exposed by the `w1-gpio` kernel driver.
///
/// Each sensor shows up as `<devices>/<serial>/w1_slave`, whose first line
/// ends in `YES` when the CRC matched and whose second line carries the
/// reading as `t=<millidegrees>`.
pub struct SysfsBus {
    devices_dir: PathBuf,
    master: String,
    power_pin: Option<PathBuf>,
    power_hold: Duration,
    handle: Option<u32>,
    next_handle: u32,
}

impl SysfsBus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            devices_dir: config.devices_dir.clone(),
            master: config.master.clone(),
            power_pin: config.power_pin.clone(),
            power_hold: Duration::from_millis(config.power_cycle_hold_ms),
            handle: None,
            next_handle: 1,
        }
    }

    fn slave_path(&self, serial: &str) -> PathBuf {
        self.devices_dir.join(serial).join("w1_slave")
    }
}

/// Parse the two-line `w1_slave` report into degrees Celsius.
pub fn parse_w1_slave(serial: &str, content: &str) -> Result<f64, BusError> {
    let mut lines = content.lines();
    let crc_line = lines.next().unwrap_or_default();
    if !crc_line.trim_end().ends_with("YES") {
        return Err(BusError::Crc(serial.to_string()));
    }

    let data_line = lines.next().unwrap_or_default();
    let raw = data_line
        .rsplit_once("t=")
        .map(|(_, value)| value.trim())
        .ok_or_else(|| BusError::Parse {
            serial: serial.to_string(),
            detail: "missing t= field".to_string(),
        })?;

    let millidegrees: i64 = raw.parse().map_err(|_| BusError::Parse {
        serial: serial.to_string(),
        detail: format!("bad value {:?}", raw),
    })?;

    Ok(millidegrees as f64 / 1000.0)
}

async fn write_pin(pin: &Path, value: &str) -> Result<(), BusError> {
    tokio::fs::write(pin, value).await?;
    Ok(())
}

#[async_trait]
impl BusController for SysfsBus {
    fn name(&self) -> &str {
        &self.master
    }

    fn handle(&self) -> Option<u32> {
        self.handle
    }

    async fn acquire(&mut self) -> Result<(), BusError> {
        let master = self.devices_dir.join(&self.master);
        if !tokio::fs::try_exists(&master).await.unwrap_or(false) {
            return Err(BusError::MasterMissing(master.display().to_string()));
        }

        self.handle = Some(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        info!("Acquired one-wire bus {} (handle {:?})", self.master, self.handle);
        Ok(())
    }

    async fn release(&mut self) -> Result<(), BusError> {
        if let Some(handle) = self.handle.take() {
            debug!("Released one-wire bus {} (handle {})", self.master, handle);
        }
        Ok(())
    }

    async fn power_cycle(&mut self) -> Result<(), BusError> {
        let Some(pin) = self.power_pin.clone() else {
            debug!("No power pin configured for {}, skipping power cycle", self.master);
            return Ok(());
        };

        write_pin(&pin, "0").await?;
        tokio::time::sleep(self.power_hold).await;
        write_pin(&pin, "1").await?;
        info!("Power cycled sensors on {}", self.master);
        Ok(())
    }

    async fn try_read(&mut self, serial: &str) -> Result<f64, BusError> {
        if self.handle.is_none() {
            return Err(BusError::NotAcquired);
        }

        let path = self.slave_path(serial);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BusError::SensorMissing(serial.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        parse_w1_slave(serial, &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    fn bus_in(dir: &Path, pin: Option<PathBuf>) -> SysfsBus {
        SysfsBus::new(&BusConfig {
            devices_dir: dir.to_path_buf(),
            master: "w1_bus_master1".to_string(),
            power_pin: pin,
            power_cycle_hold_ms: 1,
        })
    }

    #[test]
    fn test_parse_w1_slave() {
        assert_eq!(parse_w1_slave("28-1", GOOD).unwrap(), 23.125);
        let negative = "ff : crc=1a YES\nff t=-1062\n";
        assert_eq!(parse_w1_slave("28-1", negative).unwrap(), -1.062);
    }

    #[test]
    fn test_parse_rejects_crc_failure() {
        let bad = "72 01 : crc=00 NO\n72 01 t=85000\n";
        assert!(matches!(parse_w1_slave("28-1", bad), Err(BusError::Crc(_))));
        assert!(matches!(parse_w1_slave("28-1", "x YES\nnothing\n"), Err(BusError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_read_requires_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let mut bus = bus_in(dir.path(), None);

        assert!(matches!(bus.try_read("28-1").await, Err(BusError::NotAcquired)));
        assert!(matches!(bus.acquire().await, Err(BusError::MasterMissing(_))));

        std::fs::create_dir(dir.path().join("w1_bus_master1")).unwrap();
        bus.acquire().await.unwrap();
        assert!(bus.is_ready());
        assert!(matches!(bus.try_read("28-1").await, Err(BusError::SensorMissing(_))));
        assert_eq!(bus.read_temperature("28-1").await, None);
    }

    #[tokio::test]
    async fn test_reads_sensor_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("w1_bus_master1")).unwrap();
        std::fs::create_dir(dir.path().join("28-000005e2fdc3")).unwrap();
        std::fs::write(dir.path().join("28-000005e2fdc3/w1_slave"), GOOD).unwrap();

        let mut bus = bus_in(dir.path(), None);
        bus.acquire().await.unwrap();
        assert_eq!(bus.read_temperature("28-000005e2fdc3").await, Some(23.125));
    }

    #[tokio::test]
    async fn test_reset_toggles_power_pin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("w1_bus_master1")).unwrap();
        let pin = dir.path().join("value");

        let mut bus = bus_in(dir.path(), Some(pin.clone()));
        bus.acquire().await.unwrap();
        let first = bus.handle();

        bus.reset().await.unwrap();
        assert!(bus.is_ready());
        assert_ne!(bus.handle(), first);
        assert_eq!(std::fs::read_to_string(&pin).unwrap(), "1");
    }
}
