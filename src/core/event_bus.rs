// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Event types and the bounded queue between producers and the dispatcher

use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Subsystem an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventClass {
    Temperature,
    System,
    Hamachi,
    Gateway,
    AudioVisual,
    Email,
    Sms,
    Network,
}

impl EventClass {
    pub fn code(self) -> &'static str {
        match self {
            Self::Temperature => "TMP",
            Self::System => "SYS",
            Self::Hamachi => "HAM",
            Self::Gateway => "GWY",
            Self::AudioVisual => "AUV",
            Self::Email => "EML",
            Self::Sms => "SMS",
            Self::Network => "NET",
        }
    }
}

/// Condition codes. The hundreds digit selects the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    // Temperature
    TemperatureNoConfig,
    ControllerFault,
    A1Alarm,
    A2Alarm,
    StopSession,
    NewSession,
    RestartSession,
    ResumeSession,
    NoSensors,
    NewData,

    // System
    SystemNoConfig,
    Shutdown,
    Restart,
    PowerOn,
    Updating,
    DiskFull,
    PowerChange,
    BatteryLow,

    // Hamachi VPN
    HamachiNoConfig,
    HamachiJoined,
    HamachiLeave,
    HamachiOffline,
    HamachiOnline,

    // Gateway
    GatewayNoConfig,
    Provisioned,
    FactoryReset,
    NewAdminPsk,
    PskReset,

    // Audio/visual annunciator
    AudioVisualNoConfig,
    A1On,
    A1Off,
    A2On,
    A2Off,
    BuzzerOn,
    BuzzerOff,
    AllOff,
    Mute,
    StateA0,
    StateA1,
    StateA2,

    // Email
    EmailNoConfig,
    SmtpFail,
    EmailSendFail,

    // SMS
    SmsNoConfig,
    SmsSendFail,

    // Network
    NetworkNoConfig,
    InterfaceChange,
    NoInternet,
}

const TOPICS: &[(Topic, u16)] = &[
    (Topic::TemperatureNoConfig, 0),
    (Topic::ControllerFault, 1),
    (Topic::A1Alarm, 2),
    (Topic::A2Alarm, 3),
    (Topic::StopSession, 4),
    (Topic::NewSession, 5),
    (Topic::RestartSession, 6),
    (Topic::ResumeSession, 7),
    (Topic::NoSensors, 8),
    (Topic::NewData, 9),
    (Topic::SystemNoConfig, 100),
    (Topic::Shutdown, 101),
    (Topic::Restart, 102),
    (Topic::PowerOn, 103),
    (Topic::Updating, 104),
    (Topic::DiskFull, 105),
    (Topic::PowerChange, 106),
    (Topic::BatteryLow, 107),
    (Topic::HamachiNoConfig, 200),
    (Topic::HamachiJoined, 201),
    (Topic::HamachiLeave, 202),
    (Topic::HamachiOffline, 203),
    (Topic::HamachiOnline, 204),
    (Topic::GatewayNoConfig, 300),
    (Topic::Provisioned, 301),
    (Topic::FactoryReset, 302),
    (Topic::NewAdminPsk, 303),
    (Topic::PskReset, 304),
    (Topic::AudioVisualNoConfig, 400),
    (Topic::A1On, 401),
    (Topic::A1Off, 402),
    (Topic::A2On, 403),
    (Topic::A2Off, 404),
    (Topic::BuzzerOn, 405),
    (Topic::BuzzerOff, 406),
    (Topic::AllOff, 407),
    (Topic::Mute, 408),
    (Topic::StateA0, 409),
    (Topic::StateA1, 410),
    (Topic::StateA2, 411),
    (Topic::EmailNoConfig, 500),
    (Topic::SmtpFail, 501),
    (Topic::EmailSendFail, 502),
    (Topic::SmsNoConfig, 600),
    (Topic::SmsSendFail, 601),
    (Topic::NetworkNoConfig, 700),
    (Topic::InterfaceChange, 701),
    (Topic::NoInternet, 702),
];

impl Topic {
    pub fn code(self) -> u16 {
        TOPICS
            .iter()
            .find(|(topic, _)| *topic == self)
            .map(|(_, code)| *code)
            .unwrap_or_default()
    }

    pub fn from_code(code: u16) -> Option<Self> {
        TOPICS.iter().find(|(_, c)| *c == code).map(|(topic, _)| *topic)
    }

    pub fn class(self) -> EventClass {
        match self.code() / 100 {
            0 => EventClass::Temperature,
            1 => EventClass::System,
            2 => EventClass::Hamachi,
            3 => EventClass::Gateway,
            4 => EventClass::AudioVisual,
            5 => EventClass::Email,
            6 => EventClass::Sms,
            _ => EventClass::Network,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:03}", self.class().code(), self.code())
    }
}

/// Event priority. Carried to the sinks, never used for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn code(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

/// Sink families an event can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Stream,
    Notification,
    AudioVisual,
    Database,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Stream, Action::Notification, Action::AudioVisual, Action::Database];

    fn bit(self) -> u8 {
        match self {
            Self::Stream => 1,
            Self::Notification => 1 << 1,
            Self::AudioVisual => 1 << 2,
            Self::Database => 1 << 3,
        }
    }
}

/// Set of actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actions(u8);

impl Actions {
    pub const NONE: Actions = Actions(0);

    pub fn contains(self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Action> {
        Action::ALL.into_iter().filter(move |a| self.contains(*a))
    }
}

impl From<Action> for Actions {
    fn from(action: Action) -> Self {
        Actions(action.bit())
    }
}

impl BitOr for Action {
    type Output = Actions;

    fn bitor(self, rhs: Action) -> Actions {
        Actions(self.bit() | rhs.bit())
    }
}

impl BitOr<Action> for Actions {
    type Output = Actions;

    fn bitor(self, rhs: Action) -> Actions {
        Actions(self.0 | rhs.bit())
    }
}

/// A condition raised by a producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    pub priority: Priority,
    pub payload: String,
    pub actions: Actions,
    pub timestamp: DateTime<Utc>,
    /// Microseconds since the epoch, strictly increasing per publisher
    pub sequence_key: i64,
}

impl Event {
    pub fn class(&self) -> EventClass {
        self.topic.class()
    }

    /// `<CLASS:TOPIC:PRIORITY:PAYLOAD>` frame sent to stream clients.
    pub fn stream_frame(&self) -> String {
        format!(
            "<{}:{:03}:{}:{}>",
            self.class().code(),
            self.topic.code(),
            self.priority.code(),
            self.payload
        )
    }

    /// Local wall-clock time used in messages shown to people.
    pub fn display_time(&self) -> String {
        self.timestamp.with_timezone(&Local).format("%H:%M %d/%m/%Y").to_string()
    }
}

/// Constructor for the bounded queue
pub struct EventQueue;

impl EventQueue {
    pub fn bounded(capacity: usize) -> (EventPublisher, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let publisher = EventPublisher {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            last_key: Arc::new(AtomicI64::new(0)),
        };
        (publisher, EventReceiver { rx })
    }
}

/// Producer side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
    last_key: Arc<AtomicI64>,
}

impl EventPublisher {
    /// Enqueue without waiting. When the queue is full the new event is
    /// dropped and `false` is returned.
    pub fn raise(&self, topic: Topic, priority: Priority, payload: impl Into<String>, actions: impl Into<Actions>) -> bool {
        let timestamp = Utc::now();
        let event = Event {
            topic,
            priority,
            payload: payload.into(),
            actions: actions.into(),
            timestamp,
            sequence_key: self.next_key(timestamp.timestamp_micros()),
        };
        self.publish(event)
    }

    pub fn publish(&self, event: Event) -> bool {
        let topic = event.topic;
        match self.tx.try_send(event) {
            Ok(()) => {
                debug!("Queued event {}", topic);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Event queue full, dropped {}", topic);
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Event queue closed, dropped {}", topic);
                false
            }
        }
    }

    /// Events currently waiting
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Events dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn next_key(&self, now: i64) -> i64 {
        let mut last = self.last_key.load(Ordering::Relaxed);
        loop {
            let key = now.max(last + 1);
            match self.last_key.compare_exchange_weak(last, key, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return key,
                Err(current) => last = current,
            }
        }
    }
}

/// Consumer side of the queue, owned by the dispatcher
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventReceiver {
    /// Pop the oldest event if there is one.
    pub fn try_next(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
