// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Tempnet - Temperature Network Gateway
//!
//! Polls DS18B20-class probes on a one-wire bus, evaluates two-level
//! temperature alarms with debounce and routes the resulting events to
//! WebSocket clients, an SQLite log, an annunciator panel and subscribed
//! users.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Tempnet Gateway                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────────┐   ┌───────────────────────┐ │
//! │  │ One-wire │ → │ Alarm Engine │ ← │ API (WebSocket reqs)  │ │
//! │  │   Bus    │   │  + Session   │   └───────────────────────┘ │
//! │  └──────────┘   └──────────────┘                             │
//! │                        ↓                                     │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │              Event Queue → Dispatcher                  │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │       ↓              ↓               ↓              ↓        │
//! │  ┌─────────┐   ┌──────────┐   ┌─────────────┐  ┌──────────┐  │
//! │  │ Stream  │   │ Database │   │ AudioVisual │  │  Notify  │  │
//! │  └─────────┘   └──────────┘   └─────────────┘  └──────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod alert;
pub mod api;
pub mod config;
pub mod core;
pub mod db;
pub mod notify;
pub mod sensors;
pub mod session;
pub mod streaming;

// Re-exports for convenience
pub use config::Config;
pub use core::{Dispatcher, EventQueue, Supervisor};
pub use db::Database;
pub use sensors::{AlarmEngine, EngineHandle};
pub use session::{SessionConfig, SessionStore};

/// Tempnet version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tempnet name
pub const NAME: &str = "Tempnet";
