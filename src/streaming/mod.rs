//! Streaming module - WebSocket broadcast of routed events

mod websocket;

pub use websocket::*;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

use crate::core::{Event, EventSink};

/// Streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Enable WebSocket server
    pub websocket_enabled: bool,
    pub bind_address: String,
    pub websocket_port: u16,
    pub websocket_max_clients: usize,

    /// Frames buffered per client before it starts skipping
    pub channel_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            websocket_enabled: true,
            bind_address: "0.0.0.0".to_string(),
            websocket_port: 54113,
            websocket_max_clients: 10,
            channel_capacity: 256,
        }
    }
}

/// Sink forwarding stream events to WebSocket clients
pub struct StreamSink {
    server: Arc<WebSocketServer>,
}

impl StreamSink {
    pub fn new(server: Arc<WebSocketServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl EventSink for StreamSink {
    fn name(&self) -> &str {
        "stream"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let clients = self.server.broadcast_frame(event.stream_frame());
        trace!("Streamed {} to {} clients", event.topic, clients);
        Ok(())
    }
}
