// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Batched temperature history writer

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::Database;

/// Receives the per-minute temperature summary.
pub trait DataLogger: Send {
    /// Start logging under `session`. With `remove_previous` the stored
    /// history of that session is deleted first.
    fn new_session(&mut self, session: &str, remove_previous: bool) -> Result<()>;

    /// Rows buffered before a write.
    fn set_batch_size(&mut self, size: usize);

    fn log(&mut self, at: DateTime<Utc>, data: &str) -> Result<()>;

    /// Write whatever is buffered.
    fn flush(&mut self) -> Result<()>;
}

/// Writes summaries to the `temperature_log` table in batches
pub struct TemperatureLog {
    db: Arc<Database>,
    session: Option<String>,
    batch_size: usize,
    pending: Vec<(DateTime<Utc>, String)>,
}

impl TemperatureLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            session: None,
            batch_size: 1,
            pending: Vec::new(),
        }
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl DataLogger for TemperatureLog {
    fn new_session(&mut self, session: &str, remove_previous: bool) -> Result<()> {
        self.flush()?;
        if remove_previous {
            let removed = self.db.delete_session_log(session)?;
            if removed > 0 {
                info!("Removed {} stored rows of session {}", removed, session);
            }
        }
        self.session = Some(session.to_string());
        Ok(())
    }

    fn set_batch_size(&mut self, size: usize) {
        self.batch_size = size.max(1);
        debug!("Temperature log batch size set to {}", self.batch_size);
    }

    fn log(&mut self, at: DateTime<Utc>, data: &str) -> Result<()> {
        if self.session.is_none() {
            return Err(anyhow!("no logging session started"));
        }
        self.pending.push((at, data.to_string()));
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let Some(session) = self.session.as_deref() else {
            self.pending.clear();
            return Ok(());
        };

        self.db.insert_log_rows(session, &self.pending)?;
        self.pending.clear();
        Ok(())
    }
}

impl Drop for TemperatureLog {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Dropping unflushed temperature rows: {}", e);
        }
    }
}
