//! Core event type and payload codec
//!
//! Events are immutable records of `(timestamp, emitters path, topic,
//! encoded payload)`. The payload is anything encoded into JSON at
//! construction and decoded when a receiving cell accesses it, so
//! producers and consumers never share mutable payload state.

use crate::error::{MeshError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;

/// Topic of the event a cell emits to its subscribers on normal exit
pub const TOPIC_TERMINATED: &str = "terminated";

/// Topic of the event a cell emits to its subscribers on abnormal exit
pub const TOPIC_ERROR: &str = "error";

/// Testbed variant of [`TOPIC_TERMINATED`], captured into the sink
pub const TOPIC_TESTBED_TERMINATED: &str = "testbed-terminated";

/// Testbed variant of [`TOPIC_ERROR`], captured into the sink
pub const TOPIC_TESTBED_ERROR: &str = "testbed-error";

/// Root marker opening the emitters path of externally injected events
pub const ROOT_EMITTER: &str = "/";

/// Payload of a `terminated` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellTerminated {
    /// Name of the cell that exited
    pub cell_name: String,
}

/// Payload of an `error` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellFailed {
    /// Name of the cell whose behavior failed
    pub cell_name: String,

    /// Human-readable behavior error
    pub error: String,
}

/// An event traveling between cells
///
/// Immutable once constructed; the emitters path grows by one hop per
/// re-emitting cell, which happens on the cell's own clone before the
/// event is visible downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    timestamp: DateTime<Utc>,

    /// Hop path, starting with the root marker for external events
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    emitters: Vec<String>,

    topic: String,

    /// Encoded payload, passed through verbatim when (de)serializing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Box<RawValue>>,
}

impl Event {
    /// Create a new event without a payload
    pub fn new(topic: impl Into<String>) -> Result<Self> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(MeshError::EmptyTopic);
        }
        Ok(Self {
            timestamp: Utc::now(),
            emitters: Vec::new(),
            topic,
            payload: None,
        })
    }

    /// Create a new event carrying an encoded payload
    ///
    /// A single value is encoded directly. To carry several values,
    /// pass a tuple or vector; it is encoded as an ordered sequence
    /// and decodes back into the same shape.
    pub fn with_payload(topic: impl Into<String>, payload: impl Serialize) -> Result<Self> {
        let mut event = Self::new(topic)?;
        let raw = serde_json::value::to_raw_value(&payload).map_err(MeshError::EncodePayload)?;
        event.payload = Some(raw);
        Ok(event)
    }

    /// The event topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wall-clock instant of creation (UTC)
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether the event carries a payload
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Decode the payload into the requested type
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self.payload.as_deref().ok_or(MeshError::NoPayload)?;
        serde_json::from_str(raw.get()).map_err(MeshError::DecodePayload)
    }

    /// The formatted hop path, e.g. `/up/coll` for an external event
    /// forwarded by `up` and re-emitted by `coll`
    pub fn emitters(&self) -> String {
        match self.emitters.split_first() {
            None => String::new(),
            Some((root, rest)) if root == ROOT_EMITTER => format!("/{}", rest.join("/")),
            _ => self.emitters.join("/"),
        }
    }

    /// Reset the hop path to the root marker. Called when an event
    /// enters the mesh from outside.
    pub(crate) fn init_emitters(&mut self) {
        self.emitters = vec![ROOT_EMITTER.to_string()];
    }

    /// Append one hop. Called by each cell re-emitting the event.
    pub(crate) fn append_emitter(&mut self, name: &str) {
        self.emitters.push(name.to_string());
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
            && self.emitters == other.emitters
            && self.topic == other.topic
            && self.payload.as_deref().map(RawValue::get)
                == other.payload.as_deref().map(RawValue::get)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event{{timestamp:{} topic:{} payload:{}}}",
            self.timestamp.to_rfc3339(),
            self.topic,
            self.payload.as_deref().map_or("none", RawValue::get),
        )
    }
}
