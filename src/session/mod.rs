//! Session module - the persisted description of a sensor network
//!
//! A session names the sensors on the bus, their thresholds, the alarm
//! interpretation shared by all of them and the debounce trigger rate.
//! The document layout matches the `temperature.json` written by the
//! gateway firmware:
//!
//! ```json
//! {
//!   "Session": {"Number": "42", "Alias": "Cold room", "TotalSensors": 1,
//!               "AlarmType": 1, "TriggerRate": 3},
//!   "Sensors": {"1": {"Serial": "28-000005e2fdc3", "Alias": "Door",
//!                     "A1": 30.0, "A2": 40.0, "Diffmode": 0,
//!                     "A1trig": false, "A2trig": false}},
//!   "Commit": 7
//! }
//! ```

mod error;
mod store;

pub use error::SessionError;
pub use store::SessionStore;

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// How the two thresholds of every sensor are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AlarmInterpretation {
    /// A1 and A2 are both upper limits, A2 the higher one.
    HighHigh,
    /// A1 is a lower limit and A2 an upper limit; the band between is safe.
    HighLow,
    /// A1 and A2 are both lower limits, A2 the lower one.
    LowLow,
}

impl TryFrom<u8> for AlarmInterpretation {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::HighHigh),
            2 => Ok(Self::HighLow),
            3 => Ok(Self::LowLow),
            other => Err(format!("unknown alarm type {}", other)),
        }
    }
}

impl From<AlarmInterpretation> for u8 {
    fn from(value: AlarmInterpretation) -> Self {
        match value {
            AlarmInterpretation::HighHigh => 1,
            AlarmInterpretation::HighLow => 2,
            AlarmInterpretation::LowLow => 3,
        }
    }
}

/// Session-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfo {
    /// Session number, used as the data logger key
    #[serde(rename = "Number", deserialize_with = "string_or_number")]
    pub id: String,

    /// Display name
    pub alias: String,

    /// Number of sensors in `Sensors`
    pub total_sensors: usize,

    #[serde(rename = "AlarmType")]
    pub interpretation: AlarmInterpretation,

    /// Consecutive cycles a reading must stay in a zone before it commits
    pub trigger_rate: u32,
}

/// Configuration of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SensorConfig {
    /// One-wire address
    pub serial: String,

    pub alias: String,

    #[serde(rename = "A1")]
    pub a1: f64,

    #[serde(rename = "A2")]
    pub a2: f64,

    /// Position of the sensor this one is measured against, 0 for absolute
    #[serde(rename = "Diffmode", default)]
    pub reference: u32,

    #[serde(rename = "A1trig", default)]
    pub a1_triggered: bool,

    #[serde(rename = "A2trig", default)]
    pub a2_triggered: bool,
}

impl SensorConfig {
    /// Absolute sensor with both sticky flags clear.
    pub fn new(serial: &str, alias: &str, a1: f64, a2: f64) -> Self {
        Self {
            serial: serial.to_string(),
            alias: alias.to_string(),
            a1,
            a2,
            reference: 0,
            a1_triggered: false,
            a2_triggered: false,
        }
    }

    /// Same sensor measured against the sensor at `position`.
    pub fn referencing(mut self, position: u32) -> Self {
        self.reference = position;
        self
    }
}

/// The full session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionConfig {
    pub session: SessionInfo,

    /// Sensors keyed by 1-based position
    pub sensors: BTreeMap<u32, SensorConfig>,

    /// Bumped on every persisted change so clients can refresh cached copies
    #[serde(default)]
    pub commit: u64,
}

impl SessionConfig {
    /// Build a session from sensors listed in position order.
    pub fn new(
        id: &str,
        alias: &str,
        interpretation: AlarmInterpretation,
        trigger_rate: u32,
        sensors: Vec<SensorConfig>,
    ) -> Self {
        let total_sensors = sensors.len();
        Self {
            session: SessionInfo {
                id: id.to_string(),
                alias: alias.to_string(),
                total_sensors,
                interpretation,
                trigger_rate,
            },
            sensors: sensors
                .into_iter()
                .enumerate()
                .map(|(i, sensor)| (i as u32 + 1, sensor))
                .collect(),
            commit: 0,
        }
    }

    /// Parse a session document.
    pub fn from_json(content: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Check the configuration before it is allowed to drive the engine.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.session.id.trim().is_empty() {
            return Err(SessionError::EmptySessionId);
        }
        if self.session.total_sensors == 0 {
            return Err(SessionError::NoSensors);
        }
        if self.session.total_sensors != self.sensors.len() {
            return Err(SessionError::SensorCount {
                declared: self.session.total_sensors,
                found: self.sensors.len(),
            });
        }
        if self.session.trigger_rate == 0 {
            return Err(SessionError::TriggerRate);
        }
        check_name("session", &self.session.id)?;
        check_name("session", &self.session.alias)?;

        let total = self.session.total_sensors as u32;
        for position in 1..=total {
            let sensor = self
                .sensors
                .get(&position)
                .ok_or(SessionError::MissingPosition(position))?;

            let owner = format!("sensor {}", position);
            check_name(&owner, &sensor.alias)?;
            check_name(&owner, &sensor.serial)?;

            if !sensor.a1.is_finite() || !sensor.a2.is_finite() {
                return Err(SessionError::Threshold {
                    position,
                    reason: "thresholds must be finite",
                });
            }

            let ordered = match self.session.interpretation {
                AlarmInterpretation::HighHigh | AlarmInterpretation::HighLow => sensor.a1 <= sensor.a2,
                AlarmInterpretation::LowLow => sensor.a2 <= sensor.a1,
            };
            if !ordered {
                return Err(SessionError::Threshold {
                    position,
                    reason: "thresholds out of order for the alarm type",
                });
            }

            if sensor.reference == position {
                return Err(SessionError::SelfReference(position));
            }
            if sensor.reference > total {
                return Err(SessionError::UnknownReference {
                    position,
                    reference: sensor.reference,
                });
            }
        }

        Ok(())
    }

    /// Whether any sensor is measured against another one.
    pub fn any_differential(&self) -> bool {
        self.sensors.values().any(|s| s.reference != 0)
    }

    /// Clear every sticky trigger flag.
    pub fn reset_triggers(&mut self) {
        for sensor in self.sensors.values_mut() {
            sensor.a1_triggered = false;
            sensor.a2_triggered = false;
        }
    }

    /// Rows the data logger should buffer before writing, sized so a full
    /// network writes about once a minute.
    pub fn logger_batch_size(&self) -> Option<usize> {
        match self.session.total_sensors {
            n @ 1..=60 => Some(60 / n + 1),
            _ => None,
        }
    }

    /// `number,alias` payload used by session lifecycle events.
    pub fn describe(&self) -> String {
        format!("{},{}", self.session.id, self.session.alias)
    }
}

const RESERVED: [char; 4] = [',', ':', '<', '>'];

fn check_name(owner: &str, name: &str) -> Result<(), SessionError> {
    if name.contains(RESERVED) {
        return Err(SessionError::ReservedCharacter {
            owner: owner.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}
