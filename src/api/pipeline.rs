// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Request pipeline - stages wrapped around a handler

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sensors::CommandError;

/// One API call
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Uuid,
    pub topic: String,
    pub payload: Value,
    pub received: DateTime<Utc>,
    started: Instant,
}

impl Request {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            received: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    /// String field of the payload, if present.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }
}

/// Uniform reply to every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown request topic: {0}")]
    UnknownTopic(String),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0} unavailable")]
    Unavailable(&'static str),

    #[error(transparent)]
    Engine(#[from] CommandError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

/// Terminal step producing the reply data.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: &Request) -> Result<Value, ApiError>;
}

/// Hook run around the handler.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Runs before the handler. An error short-circuits the request.
    async fn before(&self, _request: &mut Request) -> Result<(), ApiError> {
        Ok(())
    }

    /// Runs after the handler, in reverse stage order, on every outcome.
    async fn after(&self, _request: &Request, _reply: &mut Envelope) {}
}

/// Stages wrapped around a handler
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    handler: Arc<dyn Handler>,
}

impl Pipeline {
    pub fn new(handler: impl Handler + 'static) -> Self {
        Self {
            stages: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, mut request: Request) -> Envelope {
        let mut rejected = None;
        for stage in &self.stages {
            if let Err(e) = stage.before(&mut request).await {
                debug!("Stage {} rejected request {}: {}", stage.name(), request.id, e);
                rejected = Some(e);
                break;
            }
        }

        let mut reply = match rejected {
            Some(e) => Envelope::failure(e),
            None => match self.handler.handle(&request).await {
                Ok(data) => Envelope::ok(data),
                Err(e) => Envelope::failure(e),
            },
        };

        for stage in self.stages.iter().rev() {
            stage.after(&request, &mut reply).await;
        }
        reply
    }
}

/// Rejects requests whose payload lacks any of the named fields
pub struct RequireFields {
    fields: Vec<&'static str>,
}

impl RequireFields {
    pub fn new(fields: &[&'static str]) -> Self {
        Self {
            fields: fields.to_vec(),
        }
    }
}

#[async_trait]
impl Stage for RequireFields {
    fn name(&self) -> &str {
        "require-fields"
    }

    async fn before(&self, request: &mut Request) -> Result<(), ApiError> {
        let Some(object) = request.payload.as_object() else {
            return Err(ApiError::InvalidPayload("expected a JSON object".into()));
        };
        match self.fields.iter().find(|f| !object.contains_key(**f)) {
            Some(missing) => Err(ApiError::MissingField(missing.to_string())),
            None => Ok(()),
        }
    }
}

/// Logs each request and its outcome
pub struct RequestLog;

#[async_trait]
impl Stage for RequestLog {
    fn name(&self) -> &str {
        "request-log"
    }

    async fn before(&self, request: &mut Request) -> Result<(), ApiError> {
        info!("API request {} {}", request.id, request.topic);
        Ok(())
    }

    async fn after(&self, request: &Request, reply: &mut Envelope) {
        match &reply.error {
            None => debug!("API request {} done in {} ms", request.id, request.elapsed_ms()),
            Some(e) => warn!("API request {} {} failed: {}", request.id, request.topic, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, request: &Request) -> Result<Value, ApiError> {
            Ok(request.payload.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn handle(&self, _request: &Request) -> Result<Value, ApiError> {
            Err(ApiError::Unavailable("database"))
        }
    }

    struct Trace {
        label: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Stage for Trace {
        fn name(&self) -> &str {
            self.label
        }

        async fn before(&self, _request: &mut Request) -> Result<(), ApiError> {
            self.calls.lock().push(format!("before {}", self.label));
            Ok(())
        }

        async fn after(&self, _request: &Request, _reply: &mut Envelope) {
            self.calls.lock().push(format!("after {}", self.label));
        }
    }

    #[tokio::test]
    async fn test_handler_reply_wrapped() {
        let pipeline = Pipeline::new(Echo).with_stage(RequestLog);
        let reply = pipeline.run(Request::new("echo", json!({"a": 1}))).await;
        assert_eq!(reply, Envelope::ok(json!({"a": 1})));

        let reply = Pipeline::new(Failing).run(Request::new("x", Value::Null)).await;
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("database unavailable"));
    }

    #[tokio::test]
    async fn test_stage_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(Echo)
            .with_stage(Trace { label: "outer", calls: calls.clone() })
            .with_stage(Trace { label: "inner", calls: calls.clone() });

        pipeline.run(Request::new("echo", json!({}))).await;
        assert_eq!(
            calls.lock().as_slice(),
            ["before outer", "before inner", "after inner", "after outer"]
        );
        assert_eq!(pipeline.stage_names(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn test_require_fields_short_circuits() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(Echo)
            .with_stage(RequireFields::new(&["start", "end"]))
            .with_stage(Trace { label: "after-check", calls: calls.clone() });

        let reply = pipeline.run(Request::new("log", json!({"start": "x"}))).await;
        assert_eq!(reply.error.as_deref(), Some("missing field: end"));
        assert!(calls.lock().contains(&"after after-check".to_string()));
        assert!(!calls.lock().contains(&"before after-check".to_string()));

        let reply = pipeline.run(Request::new("log", json!([1, 2]))).await;
        assert!(reply.error.unwrap().starts_with("invalid payload"));

        let reply = pipeline.run(Request::new("log", json!({"start": 1, "end": 2}))).await;
        assert!(reply.success);
    }
}
