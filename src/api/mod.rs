//! API module - request pipelines keyed by topic

mod handlers;
mod pipeline;

pub use handlers::{temperature_routes, TemperatureApi, TemperatureOp};
pub use pipeline::{ApiError, Envelope, Handler, Pipeline, Request, RequestLog, RequireFields, Stage};

use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Maps request topics to their pipelines
#[derive(Clone, Default)]
pub struct ApiRouter {
    routes: HashMap<String, Pipeline>,
}

impl ApiRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&mut self, topic: impl Into<String>, pipeline: Pipeline) {
        self.routes.insert(topic.into(), pipeline);
    }

    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<_> = self.routes.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    pub async fn dispatch(&self, topic: &str, payload: Value) -> Envelope {
        match self.routes.get(topic) {
            Some(pipeline) => pipeline.run(Request::new(topic, payload)).await,
            None => {
                debug!("No route for {}", topic);
                Envelope::failure(ApiError::UnknownTopic(topic.to_string()))
            }
        }
    }
}
