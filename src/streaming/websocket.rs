// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! WebSocket server for real-time streaming

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::StreamingConfig;
use crate::api::{ApiRouter, Envelope};
use crate::core::Shutdown;

/// WebSocket server
pub struct WebSocketServer {
    config: StreamingConfig,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
    broadcast_tx: broadcast::Sender<String>,
    router: Option<Arc<ApiRouter>>,
}

struct ClientHandle {
    addr: SocketAddr,
    connected: DateTime<Utc>,
}

/// Messages clients may send
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Ping,
    Request {
        #[serde(default)]
        id: Value,
        topic: String,
        #[serde(default)]
        payload: Value,
    },
}

impl WebSocketServer {
    pub fn new(config: StreamingConfig, router: Option<Arc<ApiRouter>>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(config.channel_capacity.max(1));

        Self {
            config,
            clients: Arc::new(RwLock::new(HashMap::new())),
            broadcast_tx,
            router,
        }
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.websocket_port);
        let listener = TcpListener::bind(&addr).await?;
        info!("WebSocket server listening on ws://{}", listener.local_addr()?);
        Ok(listener)
    }

    pub async fn run(self: Arc<Self>, shutdown: Shutdown) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Accept clients until shutdown.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: Shutdown) -> Result<()> {
        let token = shutdown.clone();
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            // The slot is held from accept so handshakes in
                            // flight count against the limit.
                            let client_id = {
                                let mut clients = self.clients.write().await;
                                if clients.len() >= self.config.websocket_max_clients {
                                    warn!("Max clients reached, rejecting connection from {}", addr);
                                    continue;
                                }
                                let client_id = uuid::Uuid::new_v4().to_string();
                                clients.insert(
                                    client_id.clone(),
                                    ClientHandle {
                                        addr,
                                        connected: Utc::now(),
                                    },
                                );
                                client_id
                            };

                            let broadcast_rx = self.broadcast_tx.subscribe();
                            tokio::spawn(handle_connection(
                                self.clone(),
                                stream,
                                addr,
                                client_id,
                                broadcast_rx,
                                token.clone(),
                            ));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.triggered() => {
                    info!("WebSocket server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Queue a frame for every connected client. Returns how many will see it.
    pub fn broadcast_frame(&self, frame: String) -> usize {
        self.broadcast_tx.send(frame).unwrap_or(0)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn client_addrs(&self) -> Vec<(SocketAddr, DateTime<Utc>)> {
        self.clients
            .read()
            .await
            .values()
            .map(|c| (c.addr, c.connected))
            .collect()
    }

    async fn reply_to(&self, text: &str) -> Value {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping) => serde_json::json!({"type": "pong"}),
            Ok(ClientMessage::Request { id, topic, payload }) => {
                let reply = match &self.router {
                    Some(router) => router.dispatch(&topic, payload).await,
                    None => Envelope::failure("api unavailable"),
                };
                serde_json::json!({
                    "type": "response",
                    "id": id,
                    "topic": topic,
                    "success": reply.success,
                    "data": reply.data,
                    "error": reply.error,
                })
            }
            Err(e) => serde_json::json!({"type": "error", "message": e.to_string()}),
        }
    }
}

async fn handle_connection(
    server: Arc<WebSocketServer>,
    stream: TcpStream,
    addr: SocketAddr,
    client_id: String,
    mut broadcast_rx: broadcast::Receiver<String>,
    mut shutdown: Shutdown,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            server.clients.write().await.remove(&client_id);
            return;
        }
    };

    info!("New WebSocket connection from {} (id: {})", addr, client_id);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let welcome = serde_json::json!({
        "type": "welcome",
        "client_id": client_id,
        "server": "Tempnet",
        "version": env!("CARGO_PKG_VERSION"),
    });

    if let Err(e) = ws_sender.send(Message::Text(welcome.to_string())).await {
        warn!("Failed to send welcome: {}", e);
    }

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received from {}: {}", addr, text);
                        let reply = server.reply_to(&text).await;
                        if let Err(e) = ws_sender.send(Message::Text(reply.to_string())).await {
                            warn!("Failed to reply to {}: {}", addr, e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by client {}", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            frame = broadcast_rx.recv() => {
                match frame {
                    Ok(frame) => {
                        if let Err(e) = ws_sender.send(Message::Text(frame)).await {
                            warn!("Failed to send to {}: {}", addr, e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagging, skipped {} frames", addr, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = shutdown.triggered() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    server.clients.write().await.remove(&client_id);

    info!("WebSocket client {} disconnected", addr);
}
