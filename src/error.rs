use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ComponentId;

/// Request-level failures. Every variant ends the request with a [`Rejection`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The wire payload could not be parsed.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// No component class is registered under the requested name.
    #[error("unknown component `{0}`")]
    UnknownComponent(String),

    /// The checksum did not match the received id and properties.
    #[error("checksum mismatch for component {0}")]
    Integrity(ComponentId),

    /// A public property value could not be coerced to its declared kind.
    #[error("property `{property}` expects {expected}, got {found}")]
    TypeMismatch {
        property: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A pipeline step failed for a reason of its own.
    #[error("step `{step}` failed: {reason}")]
    Step { step: &'static str, reason: String },

    /// The component's own mount/hydrate/dehydrate hook failed.
    #[error("component hook `{hook}` failed: {source}")]
    Hook {
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),
}

impl ProtocolError {
    /// Maps the error onto the generic wire rejection.
    ///
    /// The message never carries the underlying cause.
    #[must_use]
    pub fn rejection(&self) -> Rejection {
        let kind = match self {
            Self::Malformed(_) => RejectionKind::Malformed,
            Self::UnknownComponent(_) => RejectionKind::UnknownComponent,
            Self::Integrity(_) => RejectionKind::Integrity,
            Self::TypeMismatch { .. }
            | Self::Step { .. }
            | Self::Hook { .. }
            | Self::Cache(_)
            | Self::Checksum(_) => RejectionKind::Pipeline,
        };
        Rejection::new(kind)
    }
}

/// Failures raised while running an action against a hydrated instance.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("method `{0}` is not callable on this component")]
    UnknownMethod(String),

    #[error("property `{0}` is not a public property")]
    NotPublic(String),

    #[error("property `{0}` is not declared")]
    UnknownProperty(String),

    #[error("invalid parameters for `{method}`: {reason}")]
    InvalidParams { method: String, reason: String },

    /// Application code failed.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("snapshot compression failed: {0}")]
    Compress(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("signing key must be at least {min} bytes, got {len}")]
    KeyTooShort { min: usize, len: usize },

    #[error("signing key rejected by the MAC")]
    InvalidKey,

    #[error("canonical encoding failed: {0}")]
    Canonical(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown middleware step `{0}`")]
    UnknownStep(String),

    #[error("middleware step `{0}` registered twice")]
    DuplicateStep(String),

    #[error("invalid config: {0}")]
    Validation(String),

    #[error(transparent)]
    Key(#[from] ChecksumError),
}

/// Rejection categories exposed to the client.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    Malformed,
    UnknownComponent,
    Integrity,
    Pipeline,
}

impl RejectionKind {
    /// HTTP-style status code for the rejection.
    ///
    /// - Malformed: 400
    /// - Unknown component: 404
    /// - Integrity: 419, the client must discard its state and re-render
    /// - Pipeline: 500
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::Malformed => 400,
            Self::UnknownComponent => 404,
            Self::Integrity => 419,
            Self::Pipeline => 500,
        }
    }

    const fn message(self) -> &'static str {
        match self {
            Self::Malformed => "the request could not be understood",
            Self::UnknownComponent => "the requested component does not exist",
            Self::Integrity => "the component state is invalid or expired, reload required",
            Self::Pipeline => "the component could not be processed",
        }
    }
}

/// Body of a rejected request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub message: String,
    pub status: u16,
}

impl Rejection {
    #[must_use]
    pub fn new(kind: RejectionKind) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
            status: kind.status(),
        }
    }
}
