//! Application event bus for callback-mode responses.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::session::LifecycleEvent;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("No subscriber for {0}")]
    NoSubscriber(String),

    #[error("Publish failed: {0}")]
    Failed(String),
}

/// Envelope type: a lifecycle transition or the outcome of an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Authorized,
    /// Successful operation, by operation name
    Response(String),
    /// Failed operation, by operation name
    Error(String),
}

impl EventKind {
    /// Wire name: `connected`, `find`, `find:error`, ...
    pub fn name(&self) -> String {
        match self {
            Self::Connected => "connected".to_string(),
            Self::Disconnected => "disconnected".to_string(),
            Self::Authorized => "authorized".to_string(),
            Self::Response(operation) => operation.clone(),
            Self::Error(operation) => format!("{}:error", operation),
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            "authorized" => Self::Authorized,
            other => match other.strip_suffix(":error") {
                Some(operation) => Self::Error(operation.to_string()),
                None => Self::Response(other.to_string()),
            },
        }
    }
}

impl From<LifecycleEvent> for EventKind {
    fn from(event: LifecycleEvent) -> Self {
        match event {
            LifecycleEvent::Connected => Self::Connected,
            LifecycleEvent::Disconnected => Self::Disconnected,
            LifecycleEvent::Authorized => Self::Authorized,
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

/// Where callback-mode results go
pub trait EventBus: Send + Sync {
    fn publish(&self, envelope: EventEnvelope) -> Result<(), BusError>;
}

impl<F> EventBus for F
where
    F: Fn(EventEnvelope) -> Result<(), BusError> + Send + Sync,
{
    fn publish(&self, envelope: EventEnvelope) -> Result<(), BusError> {
        self(envelope)
    }
}

/// Event bus backed by a tokio broadcast channel
pub struct BroadcastBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, envelope: EventEnvelope) -> Result<(), BusError> {
        self.tx
            .send(envelope)
            .map(|_| ())
            .map_err(|e| BusError::NoSubscriber(e.0.kind.name()))
    }
}
