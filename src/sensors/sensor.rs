// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Sensor alarm state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{AlarmInterpretation, SensorConfig};

/// Alarm state of a sensor, ordered by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlarmState {
    #[default]
    None,
    PastA1,
    PastA2,
    CurrentA1,
    CurrentA2,
}

impl AlarmState {
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::PastA1 => 1,
            Self::PastA2 => 2,
            Self::CurrentA1 => 3,
            Self::CurrentA2 => 4,
        }
    }

    /// Label used in per-sensor alarm records.
    pub fn sensor_label(self) -> &'static str {
        match self {
            Self::None => "No alarm",
            Self::PastA1 => "Past A1 alarm",
            Self::PastA2 => "Past A2 alarm",
            Self::CurrentA1 => "A1 alarm",
            Self::CurrentA2 => "A2 alarm",
        }
    }

    /// Label used when this state describes the whole network.
    pub fn global_label(self) -> &'static str {
        match self {
            Self::None => "No alarms",
            Self::PastA1 => "Past A1 alarms",
            Self::PastA2 => "Past A2 alarms",
            Self::CurrentA1 => "Current A1 alarms",
            Self::CurrentA2 => "Current A2 alarms",
        }
    }

    pub fn is_current(self) -> bool {
        matches!(self, Self::CurrentA1 | Self::CurrentA2)
    }

    /// Resting state implied by the sticky flags.
    pub fn past(a1_triggered: bool, a2_triggered: bool) -> Self {
        if a2_triggered {
            Self::PastA2
        } else if a1_triggered {
            Self::PastA1
        } else {
            Self::None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Threshold {
    A1,
    A2,
}

/// Direction a committed state change crossed a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    RisingA1,
    FallingA1,
    RisingA2,
    FallingA2,
}

impl Transition {
    pub fn label(self) -> &'static str {
        match self {
            Self::RisingA1 => "A1 rising",
            Self::FallingA1 => "A1 falling",
            Self::RisingA2 => "A2 rising",
            Self::FallingA2 => "A2 falling",
        }
    }

    pub fn threshold(self) -> Threshold {
        match self {
            Self::RisingA1 | Self::FallingA1 => Threshold::A1,
            Self::RisingA2 | Self::FallingA2 => Threshold::A2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    Normal,
    A1,
    A2,
}

impl Zone {
    fn classify(mode: AlarmInterpretation, v: f64, a1: f64, a2: f64) -> Self {
        match mode {
            AlarmInterpretation::HighHigh => {
                if v >= a2 {
                    Zone::A2
                } else if v >= a1 {
                    Zone::A1
                } else {
                    Zone::Normal
                }
            }
            AlarmInterpretation::HighLow => {
                if v >= a2 {
                    Zone::A2
                } else if v <= a1 {
                    Zone::A1
                } else {
                    Zone::Normal
                }
            }
            AlarmInterpretation::LowLow => {
                if v <= a2 {
                    Zone::A2
                } else if v <= a1 {
                    Zone::A1
                } else {
                    Zone::Normal
                }
            }
        }
    }
}

/// Consecutive-cycle counters, one per zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DebounceCounters {
    normal: u32,
    a1: u32,
    a2: u32,
}

impl DebounceCounters {
    /// Count one cycle in `zone`. Returns `true` when the zone has been held
    /// for `rate` cycles, after which its counter starts over.
    fn advance(&mut self, zone: Zone, rate: u32) -> bool {
        let (hit, others) = match zone {
            Zone::Normal => (&mut self.normal, [&mut self.a1, &mut self.a2]),
            Zone::A1 => (&mut self.a1, [&mut self.normal, &mut self.a2]),
            Zone::A2 => (&mut self.a2, [&mut self.normal, &mut self.a1]),
        };
        for other in others {
            *other = 0;
        }

        *hit += 1;
        if *hit >= rate.max(1) {
            *hit = 0;
            true
        } else {
            false
        }
    }
}

/// One sensor on the bus together with its live alarm state.
#[derive(Debug, Clone)]
pub struct Sensor {
    position: u32,
    config: SensorConfig,
    temperature: f64,
    last_contact: Option<DateTime<Utc>>,
    fresh: bool,
    alarm_state: AlarmState,
    counters: DebounceCounters,
    last_transition: Option<Transition>,
}

impl Sensor {
    /// Build a sensor whose alarm state reflects its sticky flags.
    pub fn new(position: u32, config: SensorConfig) -> Self {
        let alarm_state = AlarmState::past(config.a1_triggered, config.a2_triggered);
        Self {
            position,
            config,
            temperature: 0.0,
            last_contact: None,
            fresh: false,
            alarm_state,
            counters: DebounceCounters::default(),
            last_transition: None,
        }
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SensorConfig {
        &mut self.config
    }

    pub fn serial(&self) -> &str {
        &self.config.serial
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn last_contact(&self) -> Option<DateTime<Utc>> {
        self.last_contact
    }

    pub fn alarm_state(&self) -> AlarmState {
        self.alarm_state
    }

    pub fn last_transition(&self) -> Option<Transition> {
        self.last_transition
    }

    /// Position of the sensor this one is measured against.
    pub fn reference(&self) -> Option<u32> {
        match self.config.reference {
            0 => None,
            p if p == self.position => None,
            p => Some(p),
        }
    }

    pub fn is_differential(&self) -> bool {
        self.reference().is_some()
    }

    /// Whether a reading arrived during the current cycle.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Start a new poll cycle.
    pub fn begin_cycle(&mut self) {
        self.fresh = false;
        self.last_transition = None;
    }

    pub fn record_reading(&mut self, temperature: f64, at: DateTime<Utc>) {
        self.temperature = temperature;
        self.last_contact = Some(at);
        self.fresh = true;
    }

    /// Take over edited serial, alias and thresholds from `config`. Sticky
    /// flags and the running alarm state are left alone.
    pub fn apply_change(&mut self, config: &SensorConfig) {
        self.config.serial = config.serial.clone();
        self.config.alias = config.alias.clone();
        self.config.a1 = config.a1;
        self.config.a2 = config.a2;
    }

    /// Evaluate the latest reading against the thresholds.
    ///
    /// `reference` is the temperature of the reference sensor read during the
    /// same cycle; it is ignored for absolute sensors. A zone only commits
    /// once it has been seen for `trigger_rate` consecutive calls.
    pub fn process_alarm(
        &mut self,
        interpretation: AlarmInterpretation,
        trigger_rate: u32,
        reference: Option<f64>,
    ) -> AlarmState {
        self.last_transition = None;

        let value = match (self.reference(), reference) {
            (Some(_), Some(base)) => self.temperature - base,
            _ => self.temperature,
        };
        let zone = Zone::classify(interpretation, value, self.config.a1, self.config.a2);

        if !self.counters.advance(zone, trigger_rate) {
            return self.alarm_state;
        }

        let from_a2 = self.alarm_state == AlarmState::CurrentA2;
        match zone {
            Zone::A2 if !from_a2 => {
                self.last_transition = Some(match interpretation {
                    AlarmInterpretation::LowLow => Transition::FallingA2,
                    _ => Transition::RisingA2,
                });
                self.alarm_state = AlarmState::CurrentA2;
                self.config.a2_triggered = true;
            }
            Zone::A1 if self.alarm_state != AlarmState::CurrentA1 => {
                self.last_transition = Some(match (interpretation, from_a2) {
                    (AlarmInterpretation::HighHigh | AlarmInterpretation::HighLow, true) => Transition::FallingA2,
                    (AlarmInterpretation::HighHigh, false) => Transition::RisingA1,
                    (AlarmInterpretation::HighLow, false) => Transition::FallingA1,
                    (AlarmInterpretation::LowLow, true) => Transition::RisingA2,
                    (AlarmInterpretation::LowLow, false) => Transition::FallingA1,
                });
                self.alarm_state = AlarmState::CurrentA1;
                self.config.a1_triggered = true;
            }
            Zone::Normal if self.alarm_state.is_current() => {
                self.last_transition = Some(match interpretation {
                    AlarmInterpretation::HighHigh => Transition::FallingA1,
                    AlarmInterpretation::LowLow => Transition::RisingA1,
                    AlarmInterpretation::HighLow if from_a2 => Transition::FallingA2,
                    AlarmInterpretation::HighLow => Transition::RisingA1,
                });
                self.alarm_state = AlarmState::past(self.config.a1_triggered, self.config.a2_triggered);
            }
            _ => {}
        }

        self.alarm_state
    }

    /// `temp,A1,A2,state` fields for the live data stream.
    pub fn stream_fields(&self) -> String {
        format!(
            "{:.1},{},{},{}",
            self.temperature,
            self.config.a1,
            self.config.a2,
            self.alarm_state.code()
        )
    }

    /// `position,alias,temp,A1,A2,state,transition` record for alarm events.
    pub fn transition_record(&self) -> Option<String> {
        let transition = self.last_transition?;
        Some(format!(
            "{},{},{:.1},{},{},{},{}",
            self.position,
            self.config.alias,
            self.temperature,
            self.config.a1,
            self.config.a2,
            self.alarm_state.sensor_label(),
            transition.label()
        ))
    }
}

/// Most severe state across the network.
pub fn global_alarm_state(sensors: &[Sensor]) -> AlarmState {
    sensors
        .iter()
        .map(Sensor::alarm_state)
        .max()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn sensor(a1: f64, a2: f64) -> Sensor {
        Sensor::new(1, SensorConfig::new("28-0001", "Probe", a1, a2))
    }

    fn feed(s: &mut Sensor, mode: AlarmInterpretation, rate: u32, value: f64) -> (AlarmState, Option<Transition>) {
        s.begin_cycle();
        s.record_reading(value, Utc::now());
        let state = s.process_alarm(mode, rate, None);
        (state, s.last_transition())
    }

    #[test]
    fn test_high_high_scenario() {
        let mut s = sensor(30.0, 40.0);
        let results: Vec<_> = [25.0, 32.0, 32.0, 45.0, 45.0]
            .iter()
            .map(|v| feed(&mut s, AlarmInterpretation::HighHigh, 2, *v))
            .collect();

        let states: Vec<_> = results.iter().map(|r| r.0).collect();
        assert_eq!(
            states,
            vec![
                AlarmState::None,
                AlarmState::None,
                AlarmState::CurrentA1,
                AlarmState::CurrentA1,
                AlarmState::CurrentA2
            ]
        );

        let transitions: Vec<_> = results.iter().map(|r| r.1).collect();
        assert_eq!(
            transitions,
            vec![None, None, Some(Transition::RisingA1), None, Some(Transition::RisingA2)]
        );
        assert!(s.config().a1_triggered && s.config().a2_triggered);
    }

    #[test]
    fn test_debounce_needs_consecutive_cycles() {
        let mut s = sensor(30.0, 40.0);
        for value in [35.0, 20.0, 35.0, 20.0, 35.0, 20.0] {
            let (state, transition) = feed(&mut s, AlarmInterpretation::HighHigh, 2, value);
            assert_eq!(state, AlarmState::None);
            assert!(transition.is_none());
        }
        assert!(!s.config().a1_triggered);
    }

    #[test]
    fn test_rate_one_commits_immediately() {
        let mut s = sensor(30.0, 40.0);
        let (state, transition) = feed(&mut s, AlarmInterpretation::HighHigh, 1, 41.0);
        assert_eq!(state, AlarmState::CurrentA2);
        assert_eq!(transition, Some(Transition::RisingA2));
    }

    #[test]
    fn test_returning_to_normal_keeps_past_state() {
        let mut s = sensor(30.0, 40.0);
        feed(&mut s, AlarmInterpretation::HighHigh, 1, 45.0);
        let (state, transition) = feed(&mut s, AlarmInterpretation::HighHigh, 1, 20.0);
        assert_eq!(state, AlarmState::PastA2);
        assert_eq!(transition, Some(Transition::FallingA1));

        feed(&mut s, AlarmInterpretation::HighHigh, 1, 35.0);
        let (state, _) = feed(&mut s, AlarmInterpretation::HighHigh, 1, 20.0);
        assert_eq!(state, AlarmState::PastA2);
        assert!(s.config().a1_triggered && s.config().a2_triggered);
    }

    #[test]
    fn test_sticky_flags_never_clear() {
        let mut rng = rand::thread_rng();
        let mut s = sensor(30.0, 40.0);
        let mut seen = (false, false);
        for _ in 0..500 {
            let value = rng.gen_range(0.0..60.0);
            feed(&mut s, AlarmInterpretation::HighHigh, 2, value);
            let flags = (s.config().a1_triggered, s.config().a2_triggered);
            assert!(flags.0 >= seen.0 && flags.1 >= seen.1);
            seen = flags;
            match s.alarm_state() {
                AlarmState::CurrentA1 => assert!(flags.0),
                AlarmState::CurrentA2 => assert!(flags.1),
                _ => {}
            }
        }
    }

    #[test]
    fn test_new_sensor_starts_from_sticky_flags() {
        let mut config = SensorConfig::new("28-0001", "Probe", 30.0, 40.0);
        config.a1_triggered = true;
        assert_eq!(Sensor::new(1, config.clone()).alarm_state(), AlarmState::PastA1);
        config.a2_triggered = true;
        assert_eq!(Sensor::new(1, config).alarm_state(), AlarmState::PastA2);
    }

    #[test]
    fn test_low_low_transitions() {
        let mode = AlarmInterpretation::LowLow;
        let mut s = sensor(5.0, 0.0);
        assert_eq!(feed(&mut s, mode, 1, 4.0), (AlarmState::CurrentA1, Some(Transition::FallingA1)));
        assert_eq!(feed(&mut s, mode, 1, -2.0), (AlarmState::CurrentA2, Some(Transition::FallingA2)));
        assert_eq!(feed(&mut s, mode, 1, 3.0), (AlarmState::CurrentA1, Some(Transition::RisingA2)));
        assert_eq!(feed(&mut s, mode, 1, 10.0), (AlarmState::PastA2, Some(Transition::RisingA1)));
    }

    #[test]
    fn test_high_low_transitions() {
        let mode = AlarmInterpretation::HighLow;
        let mut s = sensor(2.0, 8.0);
        assert_eq!(feed(&mut s, mode, 1, 5.0), (AlarmState::None, None));
        assert_eq!(feed(&mut s, mode, 1, 1.0), (AlarmState::CurrentA1, Some(Transition::FallingA1)));
        assert_eq!(feed(&mut s, mode, 1, 5.0), (AlarmState::PastA1, Some(Transition::RisingA1)));
        assert_eq!(feed(&mut s, mode, 1, 9.0), (AlarmState::CurrentA2, Some(Transition::RisingA2)));
        assert_eq!(feed(&mut s, mode, 1, 5.0), (AlarmState::PastA2, Some(Transition::FallingA2)));
    }

    #[test]
    fn test_leaving_a2_for_a1_falls_from_a2() {
        let mode = AlarmInterpretation::HighHigh;
        let mut s = sensor(30.0, 40.0);
        feed(&mut s, mode, 1, 45.0);
        assert_eq!(feed(&mut s, mode, 1, 35.0), (AlarmState::CurrentA1, Some(Transition::FallingA2)));

        let mode = AlarmInterpretation::HighLow;
        let mut s = sensor(2.0, 8.0);
        feed(&mut s, mode, 1, 9.0);
        assert_eq!(feed(&mut s, mode, 1, 1.0), (AlarmState::CurrentA1, Some(Transition::FallingA2)));
        assert!(s.config().a1_triggered && s.config().a2_triggered);
    }

    #[test]
    fn test_zone_change_resets_counters() {
        let mut s = sensor(30.0, 40.0);
        let mode = AlarmInterpretation::HighHigh;
        feed(&mut s, mode, 3, 35.0);
        feed(&mut s, mode, 3, 35.0);
        feed(&mut s, mode, 3, 45.0);
        // Two A1 readings were interrupted, so three fresh ones are needed.
        assert_eq!(feed(&mut s, mode, 3, 35.0).0, AlarmState::None);
        assert_eq!(feed(&mut s, mode, 3, 35.0).0, AlarmState::None);
        assert_eq!(feed(&mut s, mode, 3, 35.0).0, AlarmState::CurrentA1);
    }

    #[test]
    fn test_differential_uses_reference_value() {
        let mut s = Sensor::new(2, SensorConfig::new("28-0002", "Delta", 5.0, 10.0).referencing(1));
        assert_eq!(s.reference(), Some(1));

        for expected in [AlarmState::None, AlarmState::CurrentA1] {
            s.begin_cycle();
            s.record_reading(26.0, Utc::now());
            assert_eq!(s.process_alarm(AlarmInterpretation::HighHigh, 2, Some(20.0)), expected);
        }
    }

    #[test]
    fn test_self_reference_is_absolute() {
        let s = Sensor::new(3, SensorConfig::new("28-0003", "Loop", 5.0, 10.0).referencing(3));
        assert_eq!(s.reference(), None);
    }

    #[test]
    fn test_global_state_is_most_severe() {
        let mut rng = rand::thread_rng();
        let states = [
            AlarmState::None,
            AlarmState::PastA1,
            AlarmState::PastA2,
            AlarmState::CurrentA1,
            AlarmState::CurrentA2,
        ];

        for _ in 0..200 {
            let n = rng.gen_range(1..12);
            let mut sensors = Vec::new();
            let mut expected = AlarmState::None;
            for position in 1..=n {
                let mut s = sensor(30.0, 40.0);
                s.position = position;
                s.alarm_state = states[rng.gen_range(0..states.len())];
                if s.alarm_state.code() > expected.code() {
                    expected = s.alarm_state;
                }
                sensors.push(s);
            }
            assert_eq!(global_alarm_state(&sensors), expected);
        }
        assert_eq!(global_alarm_state(&[]), AlarmState::None);
    }

    #[test]
    fn test_records() {
        let mut s = sensor(30.0, 40.0);
        feed(&mut s, AlarmInterpretation::HighHigh, 1, 31.3);
        assert_eq!(s.stream_fields(), "31.3,30,40,3");
        assert_eq!(
            s.transition_record().unwrap(),
            "1,Probe,31.3,30,40,A1 alarm,A1 rising"
        );
        s.begin_cycle();
        assert!(s.transition_record().is_none());
    }
}
