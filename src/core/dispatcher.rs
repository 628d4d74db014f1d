// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Event dispatcher - single consumer fanning events out to sinks

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::event_bus::{Action, Event, EventReceiver, Topic};
use super::supervisor::Shutdown;

/// Consumer of dispatched events.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub sink_failures: u64,
    pub stale_warnings: u64,
}

pub struct Dispatcher {
    receiver: EventReceiver,
    sinks: Vec<(Action, Arc<dyn EventSink>)>,
    tick: Duration,
    stale_after: chrono::Duration,
    last_data: Option<DateTime<Utc>>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(receiver: EventReceiver, tick: Duration, stale_after: Duration) -> Self {
        Self {
            receiver,
            sinks: Vec::new(),
            tick,
            stale_after: chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::seconds(180)),
            last_data: None,
            stats: DispatchStats::default(),
        }
    }

    /// Route every event carrying `action` to `sink`.
    pub fn register(&mut self, action: Action, sink: Arc<dyn EventSink>) {
        info!("Registered {} sink for {:?}", sink.name(), action);
        self.sinks.push((action, sink));
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Pop one event per tick until shutdown, then drain what is left.
    pub async fn run(mut self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        info!("Starting event dispatcher...");
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(event) = self.receiver.try_next() {
                        self.dispatch(&event).await;
                    }
                }
                _ = shutdown.triggered() => {
                    info!("Event dispatcher shutting down...");
                    break;
                }
            }
        }

        let drained = self.drain().await;
        info!("Event dispatcher stopped after draining {} events", drained);
        Ok(())
    }

    /// Dispatch everything still queued.
    pub async fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Some(event) = self.receiver.try_next() {
            self.dispatch(&event).await;
            count += 1;
        }
        count
    }

    /// Hand `event` to every sink registered for one of its actions.
    pub async fn dispatch(&mut self, event: &Event) {
        if event.topic == Topic::NewData {
            self.check_stale(event.timestamp);
        }

        for (action, sink) in &self.sinks {
            if !event.actions.contains(*action) {
                continue;
            }

            match AssertUnwindSafe(sink.handle(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.stats.sink_failures += 1;
                    warn!("{} sink failed on {}: {}", sink.name(), event.topic, e);
                }
                Err(_) => {
                    self.stats.sink_failures += 1;
                    error!("{} sink panicked on {}", sink.name(), event.topic);
                }
            }
        }

        self.stats.dispatched += 1;
        debug!("Dispatched {} ({} queued)", event.topic, self.receiver.len());
    }

    fn check_stale(&mut self, at: DateTime<Utc>) -> bool {
        let stale = match self.last_data {
            Some(previous) => at - previous >= self.stale_after,
            None => false,
        };
        if stale {
            self.stats.stale_warnings += 1;
            warn!(
                "No temperature data for {} seconds",
                self.last_data.map(|p| (at - p).num_seconds()).unwrap_or_default()
            );
        }
        self.last_data = Some(at);
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::{EventQueue, Priority};
    use crate::core::Supervisor;
    use parking_lot::Mutex;

    struct Recorder {
        name: String,
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl EventSink for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, event: &Event) -> anyhow::Result<()> {
            self.seen.lock().push(event.payload.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventSink for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, event: &Event) -> anyhow::Result<()> {
            if event.payload == "panic" {
                panic!("sink exploded");
            }
            anyhow::bail!("sink unavailable")
        }
    }

    #[tokio::test]
    async fn test_routes_by_action() {
        let (publisher, receiver) = EventQueue::bounded(10);
        let stream = Recorder::new("stream");
        let database = Recorder::new("database");

        let mut dispatcher = Dispatcher::new(receiver, Duration::from_millis(10), Duration::from_secs(180));
        dispatcher.register(Action::Stream, stream.clone());
        dispatcher.register(Action::Database, database.clone());

        publisher.raise(Topic::NewData, Priority::High, "a", Action::Stream);
        publisher.raise(Topic::ControllerFault, Priority::High, "b", Action::Database);
        publisher.raise(Topic::A1Alarm, Priority::High, "c", Action::Stream | Action::Database);
        publisher.raise(Topic::StateA1, Priority::High, "d", Action::AudioVisual);

        assert_eq!(dispatcher.drain().await, 4);
        assert_eq!(stream.seen(), vec!["a", "c"]);
        assert_eq!(database.seen(), vec!["b", "c"]);
        assert_eq!(dispatcher.stats().dispatched, 4);
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_others() {
        let (publisher, receiver) = EventQueue::bounded(10);
        let recorder = Recorder::new("recorder");

        let mut dispatcher = Dispatcher::new(receiver, Duration::from_millis(10), Duration::from_secs(180));
        dispatcher.register(Action::Stream, Arc::new(Failing));
        dispatcher.register(Action::Stream, recorder.clone());

        publisher.raise(Topic::NewData, Priority::Low, "error", Action::Stream);
        publisher.raise(Topic::NewData, Priority::Low, "panic", Action::Stream);
        publisher.raise(Topic::NewData, Priority::Low, "fine", Action::Stream);

        dispatcher.drain().await;
        assert_eq!(recorder.seen(), vec!["error", "panic", "fine"]);
        assert_eq!(dispatcher.stats().sink_failures, 3);
    }

    #[tokio::test]
    async fn test_run_drains_on_shutdown() {
        let (publisher, receiver) = EventQueue::bounded(50);
        let recorder = Recorder::new("recorder");

        // A long tick keeps the loop from consuming before shutdown.
        let mut dispatcher = Dispatcher::new(receiver, Duration::from_secs(3600), Duration::from_secs(180));
        dispatcher.register(Action::Database, recorder.clone());

        for i in 0..20 {
            publisher.raise(Topic::PowerOn, Priority::Low, i.to_string(), Action::Database);
        }

        let supervisor = Supervisor::new();
        supervisor.spawn("dispatcher", move |shutdown| dispatcher.run(shutdown)).await;
        supervisor.shutdown().await;

        assert_eq!(recorder.seen().len(), 20);
        assert!(publisher.is_empty());
    }

    #[test]
    fn test_stale_data_warning() {
        let (_publisher, receiver) = EventQueue::bounded(1);
        let mut dispatcher = Dispatcher::new(receiver, Duration::from_millis(10), Duration::from_secs(180));

        let start = Utc::now();
        assert!(!dispatcher.check_stale(start));
        assert!(!dispatcher.check_stale(start + chrono::Duration::seconds(60)));
        assert!(dispatcher.check_stale(start + chrono::Duration::seconds(300)));
        assert_eq!(dispatcher.stats().stale_warnings, 1);
    }
}
