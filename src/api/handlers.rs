// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Temperature API handlers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::pipeline::{ApiError, Handler, Pipeline, Request, RequestLog, RequireFields};
use super::ApiRouter;
use crate::db::Database;
use crate::sensors::EngineHandle;
use crate::session::SessionConfig;

/// Temperature operations reachable through the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureOp {
    New,
    Restart,
    Resume,
    Stop,
    Get,
    StopController,
    StartController,
    RealtimeData,
    LogData,
}

impl TemperatureOp {
    pub const ALL: [TemperatureOp; 9] = [
        Self::New,
        Self::Restart,
        Self::Resume,
        Self::Stop,
        Self::Get,
        Self::StopController,
        Self::StartController,
        Self::RealtimeData,
        Self::LogData,
    ];

    pub fn topic(self) -> &'static str {
        match self {
            Self::New => "temperature/new",
            Self::Restart => "temperature/restart",
            Self::Resume => "temperature/resume",
            Self::Stop => "temperature/stop",
            Self::Get => "temperature/get",
            Self::StopController => "temperature/stopctl",
            Self::StartController => "temperature/startctl",
            Self::RealtimeData => "temperature/realtimedata",
            Self::LogData => "temperature/logdata",
        }
    }

    fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::New | Self::Resume => &["Session", "Sensors"],
            Self::LogData => &["start", "end"],
            _ => &[],
        }
    }
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Handler for one temperature operation
pub struct TemperatureApi {
    op: TemperatureOp,
    engine: EngineHandle,
    db: Option<Arc<Database>>,
}

impl TemperatureApi {
    pub fn new(op: TemperatureOp, engine: EngineHandle, db: Option<Arc<Database>>) -> Self {
        Self { op, engine, db }
    }

    async fn log_data(&self, request: &Request) -> Result<Value, ApiError> {
        let db = self.db.as_ref().ok_or(ApiError::Unavailable("database"))?;
        let query: LogQuery = serde_json::from_value(request.payload.clone())?;
        if query.end < query.start {
            return Err(ApiError::InvalidPayload("end precedes start".into()));
        }

        let session = match query.session {
            Some(session) => session,
            None => self
                .engine
                .get_config()
                .await?
                .map(|c| c.session.id)
                .ok_or(ApiError::Unavailable("session"))?,
        };

        let rows = db.query_log(&session, query.start, query.end, query.limit)?;
        Ok(json!({ "session": session, "rows": rows }))
    }
}

#[async_trait]
impl Handler for TemperatureApi {
    async fn handle(&self, request: &Request) -> Result<Value, ApiError> {
        match self.op {
            TemperatureOp::New => {
                let config: SessionConfig = serde_json::from_value(request.payload.clone())?;
                let commit = self.engine.new_session(config).await?;
                Ok(json!({ "commit": commit }))
            }
            TemperatureOp::Restart => {
                let commit = self.engine.restart_session().await?;
                Ok(json!({ "commit": commit }))
            }
            TemperatureOp::Resume => {
                let config: SessionConfig = serde_json::from_value(request.payload.clone())?;
                let changed = self.engine.resume_session(config).await?;
                Ok(json!({ "changed": changed }))
            }
            TemperatureOp::Stop => {
                self.engine.stop_session().await?;
                Ok(Value::Null)
            }
            TemperatureOp::Get => {
                let config = self.engine.get_config().await?;
                Ok(serde_json::to_value(config)?)
            }
            TemperatureOp::StopController => {
                self.engine.stop_controller().await?;
                Ok(Value::Null)
            }
            TemperatureOp::StartController => {
                self.engine.start_controller().await?;
                Ok(Value::Null)
            }
            TemperatureOp::RealtimeData => {
                let live = self.engine.live_state().await?;
                let sensors = self.engine.readings().await?;
                Ok(json!({ "live": live.to_string(), "sensors": sensors }))
            }
            TemperatureOp::LogData => self.log_data(request).await,
        }
    }
}

/// Router with a pipeline for every temperature topic.
pub fn temperature_routes(engine: EngineHandle, db: Option<Arc<Database>>) -> ApiRouter {
    let mut router = ApiRouter::new();
    for op in TemperatureOp::ALL {
        let mut pipeline = Pipeline::new(TemperatureApi::new(op, engine.clone(), db.clone())).with_stage(RequestLog);
        if !op.required_fields().is_empty() {
            pipeline = pipeline.with_stage(RequireFields::new(op.required_fields()));
        }
        router.route(op.topic(), pipeline);
    }
    router
}
