// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Session store - owns the on-disk session document and its live copy

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{SessionConfig, SessionError};
use crate::sensors::Sensor;

/// Loads, mutates and persists the session document.
///
/// Every mutation takes a snapshot first and restores it if validation or
/// persistence fails, so the live copy and the file never disagree.
pub struct SessionStore {
    path: PathBuf,
    config: Option<SessionConfig>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// Current commit number, 0 when nothing is loaded.
    pub fn commit(&self) -> u64 {
        self.config.as_ref().map(|c| c.commit).unwrap_or(0)
    }

    /// Read and validate the document from disk.
    pub fn load(&mut self) -> Result<&SessionConfig, SessionError> {
        let content = fs::read_to_string(&self.path).map_err(|e| SessionError::io(&self.path, e))?;
        let config = SessionConfig::from_json(&content)?;
        config.validate()?;

        info!(
            "Loaded session {} ({}) with {} sensors, commit {}",
            config.session.id, config.session.alias, config.session.total_sensors, config.commit
        );

        Ok(&*self.config.insert(config))
    }

    /// Write the live copy to disk through a temporary sibling file.
    pub fn dump(&self) -> Result<(), SessionError> {
        let config = self.config.as_ref().ok_or(SessionError::NotConfigured)?;
        let content = serde_json::to_string_pretty(config)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| SessionError::io(parent, e))?;
            }
        }

        let tmp = self.tmp_path();
        fs::write(&tmp, content).map_err(|e| SessionError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| SessionError::io(&self.path, e))?;

        debug!("Session document written to {:?}", self.path);
        Ok(())
    }

    /// Replace the whole session. Sticky flags start clear and the commit
    /// number moves past the previous one.
    pub fn set_config(&mut self, mut incoming: SessionConfig) -> Result<&SessionConfig, SessionError> {
        incoming.validate()?;

        let snapshot = self.config.clone();
        incoming.commit = self.commit() + 1;
        incoming.reset_triggers();
        self.config = Some(incoming);

        self.persist_or_restore(snapshot)?;
        self.config.as_ref().ok_or(SessionError::NotConfigured)
    }

    /// Apply an edit to the running session.
    ///
    /// Only the session alias, the trigger rate and each sensor's serial,
    /// alias and thresholds are taken from `incoming`; sticky flags come from
    /// the live sensors. Returns the positions of the sensors that changed.
    pub fn change_config(&mut self, incoming: &SessionConfig, live: &[Sensor]) -> Result<Vec<u32>, SessionError> {
        let current = self.config.as_ref().ok_or(SessionError::NotConfigured)?;

        if incoming.sensors.len() != current.sensors.len()
            || incoming.sensors.keys().ne(current.sensors.keys())
        {
            return Err(SessionError::ShapeMismatch {
                live: current.sensors.len(),
                found: incoming.sensors.len(),
            });
        }

        let snapshot = self.config.clone();
        let mut merged = current.clone();
        merged.session.alias = incoming.session.alias.clone();
        merged.session.trigger_rate = incoming.session.trigger_rate;

        let mut changed = Vec::new();
        for (position, sensor) in merged.sensors.iter_mut() {
            if let Some(edit) = incoming.sensors.get(position) {
                let differs = sensor.serial != edit.serial
                    || sensor.alias != edit.alias
                    || sensor.a1 != edit.a1
                    || sensor.a2 != edit.a2;
                if differs {
                    sensor.serial = edit.serial.clone();
                    sensor.alias = edit.alias.clone();
                    sensor.a1 = edit.a1;
                    sensor.a2 = edit.a2;
                    changed.push(*position);
                }
            }
            if let Some(running) = live.iter().find(|s| s.position() == *position) {
                sensor.a1_triggered = running.config().a1_triggered;
                sensor.a2_triggered = running.config().a2_triggered;
            }
        }

        merged.validate()?;
        merged.commit += 1;
        self.config = Some(merged);

        self.persist_or_restore(snapshot)?;
        Ok(changed)
    }

    /// Copy sticky flags from the live sensors and persist them if any moved.
    pub fn record_triggers(&mut self, live: &[Sensor]) -> Result<bool, SessionError> {
        let config = self.config.as_mut().ok_or(SessionError::NotConfigured)?;

        let mut changed = false;
        for sensor in live {
            if let Some(stored) = config.sensors.get_mut(&sensor.position()) {
                let flags = (sensor.config().a1_triggered, sensor.config().a2_triggered);
                if (stored.a1_triggered, stored.a2_triggered) != flags {
                    stored.a1_triggered = flags.0;
                    stored.a2_triggered = flags.1;
                    changed = true;
                }
            }
        }

        if changed {
            self.dump()?;
        }
        Ok(changed)
    }

    /// Move the document aside and forget the live session.
    pub fn factory_reset(&mut self) -> Result<(), SessionError> {
        self.config = None;
        if self.path.exists() {
            let backup = self.backup_path();
            fs::rename(&self.path, &backup).map_err(|e| SessionError::io(&self.path, e))?;
            info!("Session document moved to {:?}", backup);
        }
        Ok(())
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn persist_or_restore(&mut self, snapshot: Option<SessionConfig>) -> Result<(), SessionError> {
        if let Err(e) = self.dump() {
            warn!("Session update failed, restoring previous config: {}", e);
            self.config = snapshot;
            return Err(e);
        }
        Ok(())
    }
}
