// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Alarm engine - polls the bus, evaluates sensors and raises events

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::sensor::{global_alarm_state, AlarmState, Sensor, Threshold};
use super::traits::{BusController, BusError};
use crate::config::EngineConfig;
use crate::core::{Action, EventPublisher, Priority, Shutdown, Topic};
use crate::db::DataLogger;
use crate::session::{SessionConfig, SessionError, SessionStore};

/// Run state reported in the live state string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Offline,
    Online,
    Halted,
}

impl EngineState {
    pub fn code(self) -> u8 {
        match self {
            Self::Offline => 0,
            Self::Online => 1,
            Self::Halted => 2,
        }
    }
}

/// Summary clients poll to notice configuration changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LiveState {
    pub commit: u64,
    pub state: EngineState,
    pub global: AlarmState,
}

impl fmt::Display for LiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.commit, self.state.code(), self.global.code())
    }
}

/// Latest reading and state of one sensor
#[derive(Debug, Clone, Serialize)]
pub struct SensorSnapshot {
    pub position: u32,
    pub serial: String,
    pub alias: String,
    pub temperature: Option<f64>,
    pub a1: f64,
    pub a2: f64,
    pub reference: u32,
    pub alarm_state: u8,
    pub last_contact: Option<DateTime<Utc>>,
}

impl From<&Sensor> for SensorSnapshot {
    fn from(sensor: &Sensor) -> Self {
        let config = sensor.config();
        Self {
            position: sensor.position(),
            serial: config.serial.clone(),
            alias: config.alias.clone(),
            temperature: sensor.last_contact().map(|_| sensor.temperature()),
            a1: config.a1,
            a2: config.a2,
            reference: config.reference,
            alarm_state: sensor.alarm_state().code(),
            last_contact: sensor.last_contact(),
        }
    }
}

/// Outcome of one completed evaluation cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub global: AlarmState,
    pub a1_records: Vec<String>,
    pub a2_records: Vec<String>,
    pub triggers_changed: bool,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("alarm engine unavailable")]
    Unavailable,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

type Reply<T> = oneshot::Sender<Result<T, CommandError>>;

enum EngineCommand {
    NewSession(Box<SessionConfig>, Reply<u64>),
    RestartSession(Reply<u64>),
    ResumeSession(Box<SessionConfig>, Reply<Vec<u32>>),
    StopSession(Reply<()>),
    GetConfig(Reply<Option<SessionConfig>>),
    LiveState(Reply<LiveState>),
    Readings(Reply<Vec<SensorSnapshot>>),
    StopController(Reply<()>),
    StartController(Reply<()>),
    FactoryReset(Reply<()>),
}

/// Cloneable handle other tasks use to drive the engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    halted: Arc<AtomicBool>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> EngineCommand) -> Result<T, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| CommandError::Unavailable)?;
        rx.await.map_err(|_| CommandError::Unavailable)?
    }

    /// Replace the session. Returns the new commit number.
    pub async fn new_session(&self, config: SessionConfig) -> Result<u64, CommandError> {
        self.request(|r| EngineCommand::NewSession(Box::new(config), r)).await
    }

    /// Start the current session over with cleared alarm history.
    pub async fn restart_session(&self) -> Result<u64, CommandError> {
        self.request(EngineCommand::RestartSession).await
    }

    /// Apply edits to the running session and resume processing.
    pub async fn resume_session(&self, config: SessionConfig) -> Result<Vec<u32>, CommandError> {
        self.request(|r| EngineCommand::ResumeSession(Box::new(config), r)).await
    }

    /// Halt processing. Takes effect before the next sensor is read.
    pub async fn stop_session(&self) -> Result<(), CommandError> {
        self.halted.store(true, Ordering::SeqCst);
        self.request(EngineCommand::StopSession).await
    }

    pub async fn get_config(&self) -> Result<Option<SessionConfig>, CommandError> {
        self.request(EngineCommand::GetConfig).await
    }

    pub async fn live_state(&self) -> Result<LiveState, CommandError> {
        self.request(EngineCommand::LiveState).await
    }

    pub async fn readings(&self) -> Result<Vec<SensorSnapshot>, CommandError> {
        self.request(EngineCommand::Readings).await
    }

    pub async fn stop_controller(&self) -> Result<(), CommandError> {
        self.request(EngineCommand::StopController).await
    }

    pub async fn start_controller(&self) -> Result<(), CommandError> {
        self.request(EngineCommand::StartController).await
    }

    pub async fn factory_reset(&self) -> Result<(), CommandError> {
        self.request(EngineCommand::FactoryReset).await
    }
}

/// Owns the sensors and the bus, and turns readings into events.
pub struct AlarmEngine<B: BusController> {
    settings: EngineConfig,
    store: SessionStore,
    sensors: Vec<Sensor>,
    any_differential: bool,
    bus: B,
    events: EventPublisher,
    logger: Box<dyn DataLogger>,
    global: AlarmState,
    state: EngineState,
    halted: Arc<AtomicBool>,
    commands: Option<mpsc::Receiver<EngineCommand>>,
    retry_at: Option<Instant>,
    last_update: Option<Instant>,
    last_summary: Option<Instant>,
}

impl<B: BusController + 'static> AlarmEngine<B> {
    pub fn new(
        settings: EngineConfig,
        bus: B,
        events: EventPublisher,
        logger: Box<dyn DataLogger>,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::channel(settings.command_capacity.max(1));
        let halted = Arc::new(AtomicBool::new(false));

        let engine = Self {
            store: SessionStore::new(settings.session_file.clone()),
            settings,
            sensors: Vec::new(),
            any_differential: false,
            bus,
            events,
            logger,
            global: AlarmState::None,
            state: EngineState::Offline,
            halted: halted.clone(),
            commands: Some(rx),
            retry_at: None,
            last_update: None,
            last_summary: None,
        };

        (engine, EngineHandle { tx, halted })
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn global_state(&self) -> AlarmState {
        self.global
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn state(&self) -> EngineState {
        match self.state {
            EngineState::Online if self.is_halted() => EngineState::Halted,
            state => state,
        }
    }

    pub fn live_state(&self) -> LiveState {
        LiveState {
            commit: self.store.commit(),
            state: self.state(),
            global: self.global,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn halt(&mut self) {
        info!("Alarm engine halted");
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn resume(&mut self) {
        info!("Alarm engine resumed");
        self.halted.store(false, Ordering::SeqCst);
        self.last_update = None;
    }

    /// Acquire the bus and go online.
    pub async fn start(&mut self) {
        if let Err(e) = self.bus.acquire().await {
            warn!("Bus {} unavailable at start: {}", self.bus.name(), e);
        }
        self.state = EngineState::Online;
        info!("Alarm engine online");
    }

    /// Main loop: one tick per poll interval, commands in between.
    pub async fn run(mut self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        info!("Starting alarm engine...");
        self.start().await;

        let token = shutdown.clone();
        let mut commands = self.commands.take();
        let mut ticker = interval(self.settings.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.triggered() => {
                    info!("Alarm engine shutting down...");
                    break;
                }
                Some(command) = recv_command(&mut commands) => {
                    self.handle_command(command).await;
                }
                _ = ticker.tick() => {
                    self.tick(Instant::now(), &token).await;
                }
            }
        }

        if let Err(e) = self.logger.flush() {
            warn!("Temperature log flush failed: {}", e);
        }
        if let Err(e) = self.bus.release().await {
            warn!("Bus release failed: {}", e);
        }
        self.state = EngineState::Offline;
        Ok(())
    }

    /// One pass of the engine loop.
    ///
    /// Returns the cycle report when sensors were evaluated, `None` when the
    /// tick was skipped, gated or aborted.
    pub async fn tick(&mut self, now: Instant, shutdown: &Shutdown) -> Option<CycleReport> {
        if self.state == EngineState::Offline || self.is_halted() {
            return None;
        }

        if let Some(at) = self.retry_at {
            if now < at {
                return None;
            }
        }

        if !self.store.is_configured() {
            if let Err(e) = self.load_session() {
                error!("Unable to load session configuration, retrying in {}s: {}", self.settings.retry_secs, e);
                let topic = match e {
                    SessionError::NoSensors => Topic::NoSensors,
                    _ => Topic::TemperatureNoConfig,
                };
                self.events.raise(topic, Priority::High, "", Action::Database);
                self.retry_at = Some(now + self.retry_delay());
                return None;
            }
        }

        if !self.bus.is_ready() {
            error!("Bus controller {} not initialised, retrying in {}s", self.bus.name(), self.settings.retry_secs);
            self.events.raise(Topic::ControllerFault, Priority::High, self.bus.name(), Action::Database);
            if let Err(e) = self.bus.reset().await {
                warn!("Bus reset failed: {}", e);
            }
            self.retry_at = Some(now + self.retry_delay());
            return None;
        }

        self.retry_at = None;

        let mut report = None;
        if self.update_due(now) {
            report = self.run_cycle(shutdown).await;
            if report.is_none() {
                return None;
            }
            self.last_update = Some(now);
        }

        match self.last_summary {
            None => self.last_summary = Some(now),
            Some(at) if now.duration_since(at) >= Duration::from_secs(self.settings.log_interval_secs) => {
                self.log_summary();
                self.last_summary = Some(now);
            }
            Some(_) => {}
        }

        report
    }

    fn update_due(&self, now: Instant) -> bool {
        if self.sensors.len() >= self.settings.small_network_size {
            return true;
        }
        match self.last_update {
            Some(at) => now.duration_since(at) >= Duration::from_secs(self.settings.small_network_gate_secs),
            None => true,
        }
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.settings.retry_secs)
    }

    fn should_abort(&self, shutdown: &Shutdown) -> bool {
        shutdown.is_triggered() || self.is_halted()
    }

    /// Read every sensor and evaluate alarms.
    ///
    /// Absolute sensors are evaluated as they are read. Differential sensors
    /// wait for a second pass so they see their reference's reading from the
    /// same cycle.
    async fn run_cycle(&mut self, shutdown: &Shutdown) -> Option<CycleReport> {
        let (interpretation, rate) = {
            let session = &self.store.config()?.session;
            (session.interpretation, session.trigger_rate)
        };

        let before: Vec<_> = self
            .sensors
            .iter()
            .map(|s| (s.config().a1_triggered, s.config().a2_triggered))
            .collect();

        for sensor in &mut self.sensors {
            sensor.begin_cycle();
        }

        for i in 0..self.sensors.len() {
            if self.should_abort(shutdown) {
                info!("Update aborted before sensor {}", self.sensors[i].position());
                return None;
            }

            let serial = self.sensors[i].serial().to_string();
            let sensor = &mut self.sensors[i];
            if let Some(value) = self.bus.read_temperature(&serial).await {
                sensor.record_reading(value, Utc::now());
                if !sensor.is_differential() {
                    sensor.process_alarm(interpretation, rate, None);
                }
            } else {
                debug!("No reading from sensor {} this cycle", sensor.position());
            }
        }

        if self.any_differential {
            for i in 0..self.sensors.len() {
                let Some(reference) = self.sensors[i].reference() else {
                    continue;
                };
                let base = self
                    .sensors
                    .iter()
                    .find(|s| s.position() == reference)
                    .filter(|s| s.is_fresh())
                    .map(Sensor::temperature);

                let sensor = &mut self.sensors[i];
                match base {
                    Some(base) if sensor.is_fresh() => {
                        sensor.process_alarm(interpretation, rate, Some(base));
                    }
                    _ => debug!("Skipping differential sensor {} this cycle", sensor.position()),
                }
            }
        }

        let triggers_changed = self
            .sensors
            .iter()
            .zip(&before)
            .any(|(s, b)| (s.config().a1_triggered, s.config().a2_triggered) != *b);
        if triggers_changed {
            debug!("Alarm triggers changed, saving session");
            if let Err(e) = self.store.record_triggers(&self.sensors) {
                error!("Failed to persist alarm triggers: {}", e);
            }
        }

        self.update_global();

        self.events.raise(Topic::NewData, Priority::High, self.data_line(), Action::Stream);

        let mut report = CycleReport {
            global: self.global,
            triggers_changed,
            ..Default::default()
        };
        for sensor in &self.sensors {
            if let (Some(transition), Some(record)) = (sensor.last_transition(), sensor.transition_record()) {
                debug!("Sensor alarm transition {}", record);
                match transition.threshold() {
                    Threshold::A1 => report.a1_records.push(record),
                    Threshold::A2 => report.a2_records.push(record),
                }
            }
        }

        let routed = Action::Stream | Action::Database | Action::Notification;
        if !report.a2_records.is_empty() {
            let payload = format!("{},{}", self.global.global_label(), report.a2_records.join(","));
            self.events.raise(Topic::A2Alarm, Priority::High, payload, routed);
        }
        if !report.a1_records.is_empty() {
            let payload = format!("{},{}", self.global.global_label(), report.a1_records.join(","));
            self.events.raise(Topic::A1Alarm, Priority::High, payload, routed);
        }

        Some(report)
    }

    /// Recompute the global state and drive the annunciator when it moves.
    fn update_global(&mut self) {
        let now = global_alarm_state(&self.sensors);
        if now != self.global {
            let topic = match now {
                AlarmState::CurrentA2 => Topic::StateA2,
                AlarmState::CurrentA1 => Topic::StateA1,
                _ => Topic::StateA0,
            };
            self.events.raise(topic, Priority::High, "", Action::AudioVisual);
            debug!("Global alarm state {:?} -> {:?}", self.global, now);
        }
        self.global = now;
    }

    fn data_line(&self) -> String {
        self.sensors
            .iter()
            .map(Sensor::stream_fields)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn log_summary(&mut self) {
        let data = self.data_line();
        if let Err(e) = self.logger.log(Utc::now(), &data) {
            warn!("Temperature log write failed: {}", e);
        }
    }

    fn load_session(&mut self) -> Result<(), SessionError> {
        let config = self.store.load()?.clone();
        self.rebuild_sensors(&config);
        self.start_logging(&config, false);
        self.update_global();
        Ok(())
    }

    fn rebuild_sensors(&mut self, config: &SessionConfig) {
        self.sensors = config
            .sensors
            .iter()
            .map(|(position, sensor)| Sensor::new(*position, sensor.clone()))
            .collect();
        self.any_differential = config.any_differential();
        self.last_update = None;
        self.retry_at = None;
    }

    fn start_logging(&mut self, config: &SessionConfig, remove_previous: bool) {
        if let Err(e) = self.logger.flush() {
            warn!("Temperature log flush failed: {}", e);
        }
        if let Err(e) = self.logger.new_session(&config.session.id, remove_previous) {
            warn!("Unable to start temperature log for session {}: {}", config.session.id, e);
        }
        if let Some(size) = config.logger_batch_size() {
            self.logger.set_batch_size(size);
        }
    }

    fn replace_session(&mut self, config: SessionConfig, topic: Topic) -> Result<u64, SessionError> {
        let stored = match self.store.set_config(config) {
            Ok(stored) => stored.clone(),
            Err(e) => {
                if matches!(e, SessionError::NoSensors) {
                    self.events.raise(Topic::NoSensors, Priority::High, "", Action::Database);
                }
                return Err(e);
            }
        };

        self.rebuild_sensors(&stored);
        self.start_logging(&stored, true);
        self.update_global();
        self.resume();

        info!("Session {} ({}) started, commit {}", stored.session.id, stored.session.alias, stored.commit);
        self.events.raise(
            topic,
            Priority::High,
            stored.describe(),
            Action::Stream | Action::Database | Action::Notification,
        );
        Ok(stored.commit)
    }

    /// Replace the session wholesale with cleared sticky flags.
    pub fn new_session(&mut self, config: SessionConfig) -> Result<u64, SessionError> {
        self.replace_session(config, Topic::NewSession)
    }

    /// Start the current session again with cleared sticky flags.
    pub fn restart_session(&mut self) -> Result<u64, SessionError> {
        let current = self.store.config().cloned().ok_or(SessionError::NotConfigured)?;
        self.replace_session(current, Topic::RestartSession)
    }

    /// Apply edits to the running session, keeping alarm history.
    pub fn resume_session(&mut self, config: SessionConfig) -> Result<Vec<u32>, SessionError> {
        let changed = self.store.change_config(&config, &self.sensors)?;
        let stored = self.store.config().cloned().ok_or(SessionError::NotConfigured)?;

        for position in &changed {
            if let (Some(sensor), Some(edit)) = (
                self.sensors.iter_mut().find(|s| s.position() == *position),
                stored.sensors.get(position),
            ) {
                sensor.apply_change(edit);
            }
        }

        self.start_logging(&stored, true);
        self.update_global();
        self.resume();

        info!("Session {} resumed, {} sensors changed", stored.session.id, changed.len());
        self.events.raise(
            Topic::ResumeSession,
            Priority::High,
            stored.describe(),
            Action::Stream | Action::Database | Action::Notification,
        );
        Ok(changed)
    }

    /// Halt processing of the current session.
    pub fn stop_session(&mut self) {
        self.halt();
        let payload = self.store.config().map(SessionConfig::describe).unwrap_or_default();
        self.events.raise(
            Topic::StopSession,
            Priority::High,
            payload,
            Action::Stream | Action::Database | Action::Notification,
        );
    }

    /// Release the bus and stop polling.
    pub async fn stop_controller(&mut self) -> Result<(), BusError> {
        self.bus.release().await?;
        self.state = EngineState::Offline;
        info!("Bus controller {} stopped", self.bus.name());
        Ok(())
    }

    /// Acquire the bus and resume polling. A failed acquire is still
    /// retried by the engine loop.
    pub async fn start_controller(&mut self) -> Result<(), BusError> {
        self.state = EngineState::Online;
        self.retry_at = None;
        self.bus.acquire().await?;
        info!("Bus controller {} started", self.bus.name());
        Ok(())
    }

    /// Move the session document aside and forget the session.
    pub fn factory_reset(&mut self) -> Result<(), SessionError> {
        info!("Alarm engine factory reset");
        self.store.factory_reset()?;
        self.sensors.clear();
        self.any_differential = false;
        self.global = AlarmState::None;
        self.retry_at = None;
        self.events.raise(Topic::FactoryReset, Priority::Medium, "temperature", Action::Database);
        Ok(())
    }

    pub fn readings(&self) -> Vec<SensorSnapshot> {
        self.sensors.iter().map(SensorSnapshot::from).collect()
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        // A dropped reply only means the caller gave up waiting.
        match command {
            EngineCommand::NewSession(config, reply) => {
                let _ = reply.send(self.new_session(*config).map_err(Into::into));
            }
            EngineCommand::RestartSession(reply) => {
                let _ = reply.send(self.restart_session().map_err(Into::into));
            }
            EngineCommand::ResumeSession(config, reply) => {
                let _ = reply.send(self.resume_session(*config).map_err(Into::into));
            }
            EngineCommand::StopSession(reply) => {
                self.stop_session();
                let _ = reply.send(Ok(()));
            }
            EngineCommand::GetConfig(reply) => {
                let _ = reply.send(Ok(self.store.config().cloned()));
            }
            EngineCommand::LiveState(reply) => {
                let _ = reply.send(Ok(self.live_state()));
            }
            EngineCommand::Readings(reply) => {
                let _ = reply.send(Ok(self.readings()));
            }
            EngineCommand::StopController(reply) => {
                let _ = reply.send(self.stop_controller().await.map_err(Into::into));
            }
            EngineCommand::StartController(reply) => {
                let _ = reply.send(self.start_controller().await.map_err(Into::into));
            }
            EngineCommand::FactoryReset(reply) => {
                let _ = reply.send(self.factory_reset().map_err(Into::into));
            }
        }
    }
}

async fn recv_command(commands: &mut Option<mpsc::Receiver<EngineCommand>>) -> Option<EngineCommand> {
    match commands {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Event, EventQueue, EventReceiver, Supervisor};
    use crate::sensors::SimulatedBus;
    use crate::session::{AlarmInterpretation, SensorConfig};
    use parking_lot::Mutex;
    use std::path::Path;

    #[derive(Clone, Default)]
    struct MemoryLog {
        rows: Arc<Mutex<Vec<String>>>,
        sessions: Arc<Mutex<Vec<(String, bool)>>>,
    }

    impl DataLogger for MemoryLog {
        fn new_session(&mut self, session: &str, remove_previous: bool) -> anyhow::Result<()> {
            self.sessions.lock().push((session.to_string(), remove_previous));
            Ok(())
        }

        fn set_batch_size(&mut self, _size: usize) {}

        fn log(&mut self, _at: DateTime<Utc>, data: &str) -> anyhow::Result<()> {
            self.rows.lock().push(data.to_string());
            Ok(())
        }

        fn flush(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Rig {
        engine: AlarmEngine<SimulatedBus>,
        handle: EngineHandle,
        events: EventReceiver,
        log: MemoryLog,
        t0: Instant,
    }

    impl Rig {
        async fn new(dir: &Path, config: Option<SessionConfig>) -> Self {
            let settings = EngineConfig {
                session_file: dir.join("temperature.json"),
                ..Default::default()
            };
            if let Some(config) = config {
                SessionStore::new(&settings.session_file).set_config(config).unwrap();
            }

            let (publisher, events) = EventQueue::bounded(200);
            let log = MemoryLog::default();
            let (mut engine, handle) =
                AlarmEngine::new(settings, SimulatedBus::scripted(), publisher, Box::new(log.clone()));
            engine.start().await;

            Self {
                engine,
                handle,
                events,
                log,
                t0: Instant::now(),
            }
        }

        async fn tick_at(&mut self, secs: u64) -> Option<CycleReport> {
            self.engine
                .tick(self.t0 + Duration::from_secs(secs), &Shutdown::never())
                .await
        }

        fn push(&mut self, serial: &str, readings: &[Option<f64>]) {
            self.engine.bus_mut().push_readings(serial, readings.iter().copied());
        }

        fn drain(&mut self) -> Vec<Event> {
            std::iter::from_fn(|| self.events.try_next()).collect()
        }
    }

    fn single(rate: u32) -> SessionConfig {
        SessionConfig::new(
            "42",
            "Cold room",
            AlarmInterpretation::HighHigh,
            rate,
            vec![SensorConfig::new("28-a", "Door", 30.0, 40.0)],
        )
    }

    fn topics(events: &[Event]) -> Vec<Topic> {
        events.iter().map(|e| e.topic).collect()
    }

    #[tokio::test]
    async fn test_single_sensor_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), Some(single(2))).await;
        rig.push("28-a", &[Some(25.0), Some(32.0), Some(32.0), Some(45.0), Some(45.0)]);

        let mut states = Vec::new();
        let mut per_cycle = Vec::new();
        for cycle in 0..5 {
            let report = rig.tick_at(cycle * 8).await.unwrap();
            states.push(rig.engine.sensors()[0].alarm_state());
            per_cycle.push((report, rig.drain()));
        }

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

        assert_eq!(topics(&per_cycle[0].1), vec![Topic::NewData]);
        assert_eq!(per_cycle[0].1[0].payload, "25.0,30,40,0");

        assert_eq!(topics(&per_cycle[2].1), vec![Topic::StateA1, Topic::NewData, Topic::A1Alarm]);
        let a1 = &per_cycle[2].1[2];
        assert_eq!(a1.payload, "Current A1 alarms,1,Door,32.0,30,40,A1 alarm,A1 rising");
        assert!(a1.actions.contains(Action::Notification));
        assert!(per_cycle[2].0.triggers_changed);

        assert_eq!(topics(&per_cycle[3].1), vec![Topic::NewData]);
        assert_eq!(topics(&per_cycle[4].1), vec![Topic::StateA2, Topic::NewData, Topic::A2Alarm]);
        assert_eq!(per_cycle[4].0.global, AlarmState::CurrentA2);
    }

    #[tokio::test]
    async fn test_sticky_flags_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), Some(single(1))).await;
        rig.push("28-a", &[Some(45.0)]);
        rig.tick_at(0).await.unwrap();

        let mut store = SessionStore::new(dir.path().join("temperature.json"));
        let stored = store.load().unwrap();
        assert!(stored.sensors[&1].a2_triggered);

        // A fresh engine starts from the persisted flags.
        let rig = Rig::new(dir.path(), None).await;
        let mut engine = rig.engine;
        engine.bus_mut().push_readings("28-a", [Some(20.0)]);
        engine.tick(Instant::now(), &Shutdown::never()).await.unwrap();
        assert_eq!(engine.sensors()[0].alarm_state(), AlarmState::PastA2);
        assert_eq!(engine.global_state(), AlarmState::PastA2);
    }

    #[tokio::test]
    async fn test_small_network_is_gated() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), Some(single(1))).await;
        rig.push("28-a", &[Some(20.0), Some(21.0)]);

        assert!(rig.tick_at(0).await.is_some());
        assert!(rig.tick_at(1).await.is_none());
        assert!(rig.tick_at(7).await.is_none());
        assert!(rig.tick_at(8).await.is_some());
        assert_eq!(rig.engine.sensors()[0].temperature(), 21.0);
    }

    #[tokio::test]
    async fn test_large_network_updates_every_tick() {
        let dir = tempfile::tempdir().unwrap();
        let sensors = (0..10)
            .map(|i| SensorConfig::new(&format!("28-{}", i), &format!("S{}", i), 30.0, 40.0))
            .collect();
        let config = SessionConfig::new("9", "Store", AlarmInterpretation::HighHigh, 1, sensors);
        let mut rig = Rig::new(dir.path(), Some(config)).await;
        for i in 0..10 {
            rig.push(&format!("28-{}", i), &[Some(20.0), Some(21.0)]);
        }

        assert!(rig.tick_at(0).await.is_some());
        assert!(rig.tick_at(1).await.is_some());
    }

    #[tokio::test]
    async fn test_summary_logged_every_minute() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), Some(single(1))).await;
        rig.push("28-a", &[Some(20.0); 10]);

        assert!(rig.tick_at(0).await.is_some());
        assert!(rig.tick_at(56).await.is_some());
        assert!(rig.log.rows.lock().is_empty());

        // Gated tick: no update, but the summary is still due.
        assert!(rig.tick_at(60).await.is_none());
        rig.tick_at(61).await;
        assert_eq!(rig.log.rows.lock().as_slice(), ["20.0,30,40,0"]);
        assert_eq!(rig.log.sessions.lock().as_slice(), [("42".to_string(), false)]);
    }

    #[tokio::test]
    async fn test_missing_config_retries_every_minute() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), None).await;

        assert!(rig.tick_at(0).await.is_none());
        let events = rig.drain();
        assert_eq!(topics(&events), vec![Topic::TemperatureNoConfig]);
        assert!(events[0].actions.contains(Action::Database));

        SessionStore::new(dir.path().join("temperature.json")).set_config(single(1)).unwrap();
        rig.push("28-a", &[Some(20.0)]);

        assert!(rig.tick_at(30).await.is_none());
        assert!(rig.drain().is_empty());

        assert!(rig.tick_at(60).await.is_some());
        assert_eq!(topics(&rig.drain()), vec![Topic::NewData]);
    }

    #[tokio::test]
    async fn test_invalid_bus_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), Some(single(1))).await;
        rig.push("28-a", &[Some(20.0)]);
        rig.engine.bus_mut().invalidate();

        assert!(rig.tick_at(0).await.is_none());
        assert_eq!(topics(&rig.drain()), vec![Topic::ControllerFault]);
        assert_eq!(rig.engine.bus_mut().resets(), 1);

        assert!(rig.tick_at(30).await.is_none());
        assert!(rig.tick_at(60).await.is_some());
    }

    #[tokio::test]
    async fn test_halt_and_shutdown_abort_without_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), Some(single(1))).await;
        rig.push("28-a", &[Some(45.0)]);

        rig.engine.halt();
        assert!(rig.tick_at(0).await.is_none());
        assert_eq!(rig.engine.state(), EngineState::Halted);
        rig.engine.resume();

        let supervisor = Supervisor::new();
        let token = supervisor.token();
        supervisor.shutdown().await;
        assert!(rig.engine.tick(rig.t0, &token).await.is_none());

        assert!(rig.drain().is_empty());
        assert_eq!(rig.engine.sensors()[0].alarm_state(), AlarmState::None);

        // The scripted reading was never consumed.
        assert!(rig.tick_at(8).await.is_some());
        assert_eq!(rig.engine.sensors()[0].alarm_state(), AlarmState::CurrentA2);
    }

    #[tokio::test]
    async fn test_failed_read_skips_sensor() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), Some(single(2))).await;
        rig.push("28-a", &[Some(32.0), None, Some(32.0)]);

        rig.tick_at(0).await.unwrap();
        let contact = rig.engine.sensors()[0].last_contact();

        rig.tick_at(8).await.unwrap();
        assert_eq!(rig.engine.sensors()[0].temperature(), 32.0);
        assert_eq!(rig.engine.sensors()[0].last_contact(), contact);
        assert_eq!(rig.engine.sensors()[0].alarm_state(), AlarmState::None);

        rig.tick_at(16).await.unwrap();
        assert_eq!(rig.engine.sensors()[0].alarm_state(), AlarmState::CurrentA1);
    }

    fn differential(rate: u32, reference_first: bool) -> SessionConfig {
        let base = SensorConfig::new("28-base", "Ambient", 30.0, 40.0);
        let delta = SensorConfig::new("28-delta", "Delta", 5.0, 10.0);
        let sensors = if reference_first {
            vec![base, delta.referencing(1)]
        } else {
            vec![delta.referencing(2), base]
        };
        SessionConfig::new("7", "Diff", AlarmInterpretation::HighHigh, rate, sensors)
    }

    #[tokio::test]
    async fn test_differential_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), Some(differential(2, true))).await;
        rig.push("28-base", &[Some(20.0), Some(20.0)]);
        rig.push("28-delta", &[Some(26.0), Some(26.0)]);

        rig.tick_at(0).await.unwrap();
        assert_eq!(rig.engine.sensors()[1].alarm_state(), AlarmState::None);
        rig.tick_at(8).await.unwrap();
        assert_eq!(rig.engine.sensors()[1].alarm_state(), AlarmState::CurrentA1);
        assert_eq!(rig.engine.sensors()[0].alarm_state(), AlarmState::None);
    }

    #[tokio::test]
    async fn test_differential_uses_same_cycle_reference() {
        let dir = tempfile::tempdir().unwrap();
        // Sensor 1 is read before the sensor it references.
        let mut rig = Rig::new(dir.path(), Some(differential(1, false))).await;
        rig.push("28-delta", &[Some(26.0), Some(26.0)]);
        rig.push("28-base", &[Some(20.0), Some(25.0)]);

        rig.tick_at(0).await.unwrap();
        assert_eq!(rig.engine.sensors()[0].alarm_state(), AlarmState::CurrentA1);

        let report = rig.tick_at(8).await.unwrap();
        assert_eq!(rig.engine.sensors()[0].alarm_state(), AlarmState::PastA1);
        assert_eq!(report.a1_records.len(), 1);
    }

    #[tokio::test]
    async fn test_differential_skipped_when_reference_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), Some(differential(1, true))).await;
        rig.push("28-base", &[None]);
        rig.push("28-delta", &[Some(26.0)]);

        rig.tick_at(0).await.unwrap();
        assert_eq!(rig.engine.sensors()[1].alarm_state(), AlarmState::None);
    }

    #[tokio::test]
    async fn test_new_session_clears_and_resume_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), Some(single(1))).await;
        rig.push("28-a", &[Some(35.0), Some(20.0)]);
        rig.tick_at(0).await.unwrap();
        rig.tick_at(8).await.unwrap();
        assert_eq!(rig.engine.global_state(), AlarmState::PastA1);
        rig.drain();

        let mut edit = rig.engine.store().config().unwrap().clone();
        edit.sensors.get_mut(&1).unwrap().a1 = 33.0;
        let changed = rig.engine.resume_session(edit).unwrap();
        assert_eq!(changed, vec![1]);
        assert_eq!(rig.engine.sensors()[0].config().a1, 33.0);
        assert!(rig.engine.sensors()[0].config().a1_triggered);
        assert_eq!(rig.engine.global_state(), AlarmState::PastA1);
        let events = rig.drain();
        assert_eq!(topics(&events), vec![Topic::ResumeSession]);
        assert_eq!(events[0].payload, "42,Cold room");

        let commit = rig.engine.new_session(single(1)).unwrap();
        assert_eq!(commit, rig.engine.live_state().commit);
        assert!(!rig.engine.sensors()[0].config().a1_triggered);
        assert_eq!(rig.engine.global_state(), AlarmState::None);
        assert_eq!(topics(&rig.drain()), vec![Topic::StateA0, Topic::NewSession]);

        let sessions = rig.log.sessions.lock().clone();
        assert_eq!(sessions.last(), Some(&("42".to_string(), true)));
    }

    #[tokio::test]
    async fn test_invalid_new_session_keeps_running_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), Some(single(1))).await;
        rig.push("28-a", &[Some(20.0)]);
        rig.tick_at(0).await.unwrap();

        let mut bad = single(1);
        bad.sensors.get_mut(&1).unwrap().reference = 1;
        assert!(matches!(rig.engine.new_session(bad), Err(SessionError::SelfReference(1))));
        assert_eq!(rig.engine.sensors().len(), 1);
        assert_eq!(rig.engine.live_state().commit, 1);
    }

    #[tokio::test]
    async fn test_live_state_string() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(dir.path(), Some(single(1))).await;
        rig.push("28-a", &[Some(35.0)]);
        rig.tick_at(0).await.unwrap();
        assert_eq!(rig.engine.live_state().to_string(), "1,1,3");

        rig.engine.stop_session();
        assert_eq!(rig.engine.live_state().to_string(), "1,2,3");
    }

    #[tokio::test]
    async fn test_handle_drives_running_engine() {
        let dir = tempfile::tempdir().unwrap();
        let rig = Rig::new(dir.path(), None).await;
        let handle = rig.handle.clone();
        let engine = rig.engine;

        let supervisor = Supervisor::new();
        supervisor.spawn("engine", move |shutdown| engine.run(shutdown)).await;

        assert_eq!(handle.get_config().await.unwrap(), None);
        let commit = handle.new_session(single(3)).await.unwrap();
        assert_eq!(commit, 1);
        assert_eq!(handle.live_state().await.unwrap().commit, 1);
        assert_eq!(handle.readings().await.unwrap().len(), 1);

        handle.stop_session().await.unwrap();
        assert_eq!(handle.live_state().await.unwrap().state, EngineState::Halted);
        assert_eq!(handle.restart_session().await.unwrap(), 2);
        assert_eq!(handle.live_state().await.unwrap().state, EngineState::Online);

        handle.stop_controller().await.unwrap();
        assert_eq!(handle.live_state().await.unwrap().state, EngineState::Offline);
        handle.start_controller().await.unwrap();

        handle.factory_reset().await.unwrap();
        assert_eq!(handle.get_config().await.unwrap(), None);
        assert!(dir.path().join("temperature.json.bak").exists());

        supervisor.shutdown().await;
        assert!(matches!(handle.live_state().await, Err(CommandError::Unavailable)));
    }
}
