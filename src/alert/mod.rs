// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Annunciator panel - alarm lamps and buzzer driven by AUV events

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::core::{Event, EventSink, Topic};

/// Annunciator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioVisualConfig {
    /// GPIO value file of the A1 lamp
    pub a1_lamp: Option<PathBuf>,

    /// GPIO value file of the A2 lamp
    pub a2_lamp: Option<PathBuf>,

    /// GPIO value file of the buzzer
    pub buzzer: Option<PathBuf>,

    /// Sound the buzzer for A1 alarms too
    pub buzzer_on_a1: bool,
}

impl AudioVisualConfig {
    fn pin(&self, line: Line) -> Option<&PathBuf> {
        match line {
            Line::A1Lamp => self.a1_lamp.as_ref(),
            Line::A2Lamp => self.a2_lamp.as_ref(),
            Line::Buzzer => self.buzzer.as_ref(),
        }
    }

    fn has_pins(&self) -> bool {
        Line::ALL.iter().any(|l| self.pin(*l).is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Line {
    A1Lamp,
    A2Lamp,
    Buzzer,
}

impl Line {
    pub const ALL: [Line; 3] = [Line::A1Lamp, Line::A2Lamp, Line::Buzzer];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Outputs {
    pub a1_lamp: bool,
    pub a2_lamp: bool,
    pub buzzer: bool,
}

impl Outputs {
    pub fn get(&self, line: Line) -> bool {
        match line {
            Line::A1Lamp => self.a1_lamp,
            Line::A2Lamp => self.a2_lamp,
            Line::Buzzer => self.buzzer,
        }
    }

    fn set(&mut self, line: Line, on: bool) {
        match line {
            Line::A1Lamp => self.a1_lamp = on,
            Line::A2Lamp => self.a2_lamp = on,
            Line::Buzzer => self.buzzer = on,
        }
    }

    fn changes_from(&self, before: &Outputs) -> Vec<(Line, bool)> {
        Line::ALL
            .into_iter()
            .filter(|l| self.get(*l) != before.get(*l))
            .map(|l| (l, self.get(l)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum AlarmLevel {
    #[default]
    A0,
    A1,
    A2,
}

/// Panel state as last driven
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PanelState {
    pub level: AlarmLevel,
    pub muted: bool,
    pub outputs: Outputs,
}

impl PanelState {
    /// Update from an AUV topic. Returns false for topics the panel ignores.
    pub fn apply(&mut self, topic: Topic, buzzer_on_a1: bool) -> bool {
        match topic {
            Topic::StateA0 => self.enter(AlarmLevel::A0, buzzer_on_a1),
            Topic::StateA1 => self.enter(AlarmLevel::A1, buzzer_on_a1),
            Topic::StateA2 => self.enter(AlarmLevel::A2, buzzer_on_a1),
            Topic::Mute => {
                self.muted = true;
                self.outputs.buzzer = false;
            }
            Topic::A1On => self.outputs.set(Line::A1Lamp, true),
            Topic::A1Off => self.outputs.set(Line::A1Lamp, false),
            Topic::A2On => self.outputs.set(Line::A2Lamp, true),
            Topic::A2Off => self.outputs.set(Line::A2Lamp, false),
            Topic::BuzzerOn => self.outputs.set(Line::Buzzer, true),
            Topic::BuzzerOff => self.outputs.set(Line::Buzzer, false),
            Topic::AllOff => self.outputs = Outputs::default(),
            _ => return false,
        }
        true
    }

    // A new level always unmutes.
    fn enter(&mut self, level: AlarmLevel, buzzer_on_a1: bool) {
        self.level = level;
        self.muted = false;
        self.outputs = Outputs {
            a1_lamp: level == AlarmLevel::A1,
            a2_lamp: level == AlarmLevel::A2,
            buzzer: level == AlarmLevel::A2 || (buzzer_on_a1 && level == AlarmLevel::A1),
        };
    }
}

/// Physical outputs of the panel
pub trait PanelOutput: Send {
    fn name(&self) -> &str;

    fn set(&mut self, line: Line, on: bool) -> Result<()>;
}

/// Drives lines through sysfs GPIO value files
pub struct GpioPanel {
    config: AudioVisualConfig,
}

impl GpioPanel {
    pub fn new(config: AudioVisualConfig) -> Self {
        Self { config }
    }
}

impl PanelOutput for GpioPanel {
    fn name(&self) -> &str {
        "gpio"
    }

    fn set(&mut self, line: Line, on: bool) -> Result<()> {
        let Some(pin) = self.config.pin(line) else {
            debug!("No pin for {:?}", line);
            return Ok(());
        };
        std::fs::write(pin, if on { "1" } else { "0" }).with_context(|| format!("writing {:?}", pin))
    }
}

/// Logs line changes, for gateways without a panel
pub struct LogPanel;

impl PanelOutput for LogPanel {
    fn name(&self) -> &str {
        "log"
    }

    fn set(&mut self, line: Line, on: bool) -> Result<()> {
        info!("Annunciator {:?} {}", line, if on { "on" } else { "off" });
        Ok(())
    }
}

/// Sink keeping the panel in step with AudioVisual events
pub struct AudioVisualSink {
    buzzer_on_a1: bool,
    state: Mutex<PanelState>,
    output: Mutex<Box<dyn PanelOutput>>,
}

impl AudioVisualSink {
    pub fn new(config: &AudioVisualConfig, output: Box<dyn PanelOutput>) -> Self {
        Self {
            buzzer_on_a1: config.buzzer_on_a1,
            state: Mutex::new(PanelState::default()),
            output: Mutex::new(output),
        }
    }

    /// GPIO output when any pin is configured, logging otherwise.
    pub fn from_config(config: &AudioVisualConfig) -> Self {
        let output: Box<dyn PanelOutput> = if config.has_pins() {
            Box::new(GpioPanel::new(config.clone()))
        } else {
            Box::new(LogPanel)
        };
        Self::new(config, output)
    }

    pub fn state(&self) -> PanelState {
        *self.state.lock()
    }
}

#[async_trait]
impl EventSink for AudioVisualSink {
    fn name(&self) -> &str {
        "audiovisual"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let mut state = self.state.lock();
        let mut next = *state;
        if !next.apply(event.topic, self.buzzer_on_a1) {
            debug!("Annunciator ignoring {}", event.topic);
            return Ok(());
        }

        // Lines are committed one by one so a failed write is retried by the
        // next event asking for the same output.
        let changes = next.outputs.changes_from(&state.outputs);
        state.level = next.level;
        state.muted = next.muted;

        let mut output = self.output.lock();
        for (line, on) in changes {
            output
                .set(line, on)
                .with_context(|| format!("{} output {:?}", output.name(), line))?;
            state.outputs.set(line, on);
        }
        Ok(())
    }
}
