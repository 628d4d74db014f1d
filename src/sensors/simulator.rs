// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Simulated one-wire bus for demo/testing

use async_trait::async_trait;
use rand::prelude::*;
use rand_distr::StandardNormal;
use std::collections::{HashMap, VecDeque};

use super::traits::{BusController, BusError};
use crate::session::{AlarmInterpretation, SensorConfig, SessionConfig};

/// Per-sensor simulation state
struct Probe {
    ambient: f64,
    drift: f64,
    excursion: f64,
}

/// Produces plausible cold-room readings.
///
/// Readings can also be scripted per serial: queued values are returned
/// first, and a queued `None` makes that read fail.
pub struct SimulatedBus {
    rng: StdRng,
    noise: f64,
    probes: HashMap<String, Probe>,
    scripted: HashMap<String, VecDeque<Option<f64>>>,
    handle: Option<u32>,
    next_handle: u32,
    excursion_probability: f64,
    failure_probability: f64,
    faulty: bool,
    resets: u32,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic bus that only returns scripted readings.
    pub fn scripted() -> Self {
        let mut bus = Self::with_rng(StdRng::seed_from_u64(7));
        bus.excursion_probability = 0.0;
        bus.failure_probability = 0.0;
        bus.handle = Some(1);
        bus.next_handle = 2;
        bus
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            noise: 0.15,
            probes: HashMap::new(),
            scripted: HashMap::new(),
            handle: None,
            next_handle: 1,
            excursion_probability: 0.01,
            failure_probability: 0.002,
            faulty: false,
            resets: 0,
        }
    }

    /// Queue readings for `serial`.
    pub fn push_readings<I>(&mut self, serial: &str, readings: I)
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        self.scripted
            .entry(serial.to_string())
            .or_default()
            .extend(readings);
    }

    /// Drop the bus handle, as a wedged bus master would.
    pub fn invalidate(&mut self) {
        self.handle = None;
    }

    /// Make every subsequent acquire fail until cleared.
    pub fn set_faulty(&mut self, faulty: bool) {
        self.faulty = faulty;
    }

    /// Number of completed power cycles.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    fn generate(&mut self, serial: &str) -> Option<f64> {
        if self.rng.gen::<f64>() < self.failure_probability {
            return None;
        }

        let start = 2.0 + self.rng.gen_range(-1.5..1.5);
        let probe = self.probes.entry(serial.to_string()).or_insert(Probe {
            ambient: start,
            drift: 0.0,
            excursion: 0.0,
        });

        probe.drift = (probe.drift + self.rng.gen_range(-0.02..0.02)).clamp(-2.0, 2.0);

        // Door openings: a sudden rise that decays over a few minutes.
        if self.rng.gen::<f64>() < self.excursion_probability {
            probe.excursion += self.rng.gen_range(4.0..12.0);
        }
        probe.excursion *= 0.97;

        let jitter: f64 = self.rng.sample(StandardNormal);
        let value = probe.ambient + probe.drift + probe.excursion + jitter * self.noise;
        Some((value * 16.0).round() / 16.0)
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusController for SimulatedBus {
    fn name(&self) -> &str {
        "simulated"
    }

    fn handle(&self) -> Option<u32> {
        self.handle
    }

    async fn acquire(&mut self) -> Result<(), BusError> {
        if self.faulty {
            return Err(BusError::MasterMissing("simulated".to_string()));
        }
        self.handle = Some(self.next_handle);
        self.next_handle += 1;
        Ok(())
    }

    async fn release(&mut self) -> Result<(), BusError> {
        self.handle = None;
        Ok(())
    }

    async fn power_cycle(&mut self) -> Result<(), BusError> {
        self.resets += 1;
        Ok(())
    }

    async fn try_read(&mut self, serial: &str) -> Result<f64, BusError> {
        if self.handle.is_none() {
            return Err(BusError::NotAcquired);
        }

        let reading = match self.scripted.get_mut(serial) {
            Some(queue) if !queue.is_empty() => queue.pop_front().flatten(),
            Some(_) => return Err(BusError::SensorMissing(serial.to_string())),
            None => self.generate(serial),
        };

        reading.ok_or_else(|| BusError::Crc(serial.to_string()))
    }
}

/// Four-sensor cold room used by `--demo`.
pub fn demo_session() -> SessionConfig {
    SessionConfig::new(
        "1",
        "Demo cold room",
        AlarmInterpretation::HighHigh,
        3,
        vec![
            SensorConfig::new("28-00000a1b2c01", "Door", 6.0, 10.0),
            SensorConfig::new("28-00000a1b2c02", "Evaporator", 6.0, 10.0),
            SensorConfig::new("28-00000a1b2c03", "Back wall", 6.0, 10.0),
            SensorConfig::new("28-00000a1b2c04", "Door vs wall", 3.0, 6.0).referencing(3),
        ],
    )
}
