// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Session configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, validating or persisting a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session has been loaded or set yet.
    #[error("session not configured")]
    NotConfigured,

    /// I/O failure on the session document.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON or does not match the schema.
    #[error("malformed session document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session id is empty")]
    EmptySessionId,

    #[error("session declares no sensors")]
    NoSensors,

    #[error("session declares {declared} sensors but lists {found}")]
    SensorCount { declared: usize, found: usize },

    #[error("sensor position {0} is missing")]
    MissingPosition(u32),

    #[error("trigger rate must be at least 1")]
    TriggerRate,

    #[error("sensor {position}: {reason}")]
    Threshold { position: u32, reason: &'static str },

    #[error("sensor {0} references itself")]
    SelfReference(u32),

    #[error("sensor {position} references unknown sensor {reference}")]
    UnknownReference { position: u32, reference: u32 },

    /// Names end up in comma separated records and `<CLASS:TOPIC:..>` frames.
    #[error("{owner} name {name:?} contains one of , : < >")]
    ReservedCharacter { owner: String, name: String },

    /// A partial change tried to alter the shape of the live session.
    #[error("change lists {found} sensors but the live session has {live}")]
    ShapeMismatch { live: usize, found: usize },
}

impl SessionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` when the error comes from the content of the
    /// configuration rather than from storage.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::NotConfigured | Self::Io { .. } | Self::Json(_))
    }
}
