// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Notifications - subscribed recipients are told about alarms and session changes

mod templates;

pub use templates::{render, Message, TemplateError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::{Event, EventSink, Topic};

/// What a recipient can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    PowerOn,
    PowerOff,
    PowerChange,
    LowBattery,
    SessionRestart,
    SessionResume,
    SessionNew,
    SessionStop,
    A1Alarms,
    A2Alarms,
    IfaceChange,
    DiskFull,
}

impl AlertType {
    pub fn from_topic(topic: Topic) -> Option<Self> {
        Some(match topic {
            Topic::A1Alarm => Self::A1Alarms,
            Topic::A2Alarm => Self::A2Alarms,
            Topic::StopSession => Self::SessionStop,
            Topic::NewSession => Self::SessionNew,
            Topic::RestartSession => Self::SessionRestart,
            Topic::ResumeSession => Self::SessionResume,
            Topic::Shutdown | Topic::Restart => Self::PowerOff,
            Topic::PowerOn => Self::PowerOn,
            Topic::DiskFull => Self::DiskFull,
            Topic::PowerChange => Self::PowerChange,
            Topic::BatteryLow => Self::LowBattery,
            Topic::InterfaceChange => Self::IfaceChange,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub alerts: Vec<AlertType>,
}

impl Recipient {
    pub fn subscribes_to(&self, alert: AlertType) -> bool {
        self.alerts.contains(&alert)
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,

    /// Endpoint receiving rendered messages as JSON
    pub webhook_url: Option<String>,

    pub timeout_secs: u64,

    pub users: Vec<Recipient>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
            timeout_secs: 10,
            users: Vec::new(),
        }
    }
}

/// Delivers a rendered message
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, alert: AlertType, recipients: &[Recipient], message: &Message) -> Result<()>;
}

/// Writes notifications to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: AlertType, recipients: &[Recipient], message: &Message) -> Result<()> {
        let names: Vec<&str> = recipients.iter().map(|r| r.name.as_str()).collect();
        info!("{:?} notification for {}: {}", alert, names.join(", "), message.subject);
        debug!("{}", message.body);
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    alert: AlertType,
    recipients: &'a [Recipient],
    subject: &'a str,
    body: &'a str,
}

/// POSTs notifications to an HTTP endpoint
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tempnet/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: AlertType, recipients: &[Recipient], message: &Message) -> Result<()> {
        let body = WebhookBody {
            alert,
            recipients,
            subject: &message.subject,
            body: &message.body,
        };
        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("posting to {}", self.url))?
            .error_for_status()?;
        Ok(())
    }
}

/// Sink turning notification events into messages for subscribers
pub struct NotificationSink {
    config: NotificationConfig,
    notifier: Arc<dyn Notifier>,
}

impl NotificationSink {
    pub fn new(config: NotificationConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self { config, notifier }
    }

    /// Webhook delivery when a URL is configured, logging otherwise.
    pub fn from_config(config: NotificationConfig) -> Result<Self> {
        let notifier: Arc<dyn Notifier> = match &config.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone(), Duration::from_secs(config.timeout_secs))?),
            None => Arc::new(LogNotifier),
        };
        Ok(Self::new(config, notifier))
    }

    fn recipients(&self, alert: AlertType) -> Vec<Recipient> {
        self.config
            .users
            .iter()
            .filter(|u| u.subscribes_to(alert))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for NotificationSink {
    fn name(&self) -> &str {
        "notification"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        if !self.config.enabled {
            debug!("Notifications disabled");
            return Ok(());
        }

        let Some(alert) = AlertType::from_topic(event.topic) else {
            warn!("Notification for unsupported topic {}", event.topic);
            return Ok(());
        };

        let recipients = self.recipients(alert);
        if recipients.is_empty() {
            debug!("No users subscribed to {:?}", alert);
            return Ok(());
        }

        let message = render(alert, &event.payload, &event.display_time())?;
        self.notifier
            .send(alert, &recipients, &message)
            .await
            .with_context(|| format!("{} notifier", self.notifier.name()))
    }
}
