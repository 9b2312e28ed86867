//! Lifecycle Events
//!
//! Notifications the connection manager raises towards the application, both
//! as a broadcast channel and through an optional message callback.

use log::trace;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    Connected,
    Disconnected,
    Authorized,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Authorized => "authorized",
        }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application callback for lifecycle notifications
pub type MessageCallback = Arc<dyn Fn(LifecycleEvent) + Send + Sync>;

pub struct LifecycleEmitter {
    tx: broadcast::Sender<LifecycleEvent>,
    callback: RwLock<Option<MessageCallback>>,
}

impl LifecycleEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            callback: RwLock::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Replace the message callback
    pub fn set_callback(&self, callback: MessageCallback) {
        *self.callback.write() = Some(callback);
    }

    pub fn emit(&self, event: LifecycleEvent) {
        trace!("Lifecycle event: {}", event);
        let _ = self.tx.send(event);

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }
}

impl Default for LifecycleEmitter {
    fn default() -> Self {
        Self::new()
    }
}
