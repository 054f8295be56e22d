//! Error types for cellmesh

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the mesh
#[derive(Debug, Error)]
pub enum MeshError {
    /// Event constructed without a topic
    #[error("event needs a topic")]
    EmptyTopic,

    /// Payload could not be encoded at event construction
    #[error("cannot encode payload: {0}")]
    EncodePayload(#[source] serde_json::Error),

    /// Payload requested from an event that carries none
    #[error("event contains no payload")]
    NoPayload,

    /// Encoded payload is incompatible with the requested type
    #[error("cannot decode payload: {0}")]
    DecodePayload(#[source] serde_json::Error),

    /// Cell registration collision
    #[error("cell name '{0}' already used")]
    NameInUse(String),

    /// Named cell is not registered
    #[error("cell '{0}' does not exist")]
    UnknownCell(String),

    /// Emitter side of a subscription is not registered
    #[error("emitter cell '{0}' does not exist")]
    UnknownEmitterCell(String),

    /// Receptor side of a subscription is not registered
    #[error("receptor cell '{0}' does not exist")]
    UnknownReceptorCell(String),

    /// Receiving cell did not take the event within the push budget
    #[error("timeout pushing event after {0:?}")]
    PushTimeout(Duration),

    /// Error raised by a behavior, terminating its cell abnormally
    #[error("{0}")]
    Behavior(String),
}

impl MeshError {
    /// Convenience constructor for behavior errors
    pub fn behavior(reason: impl Into<String>) -> Self {
        MeshError::Behavior(reason.into())
    }
}

/// Result type alias for mesh operations
pub type Result<T> = std::result::Result<T, MeshError>;
