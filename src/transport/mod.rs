//! Transport Abstraction
//!
//! The socket transport and its codec live outside this crate. Everything the
//! session layer needs from it is expressed by the [`Transport`] trait:
//! - lifecycle events (`connect`, `disconnect`, `encrypt`)
//! - the two authentication calls (resume and `local` login)
//! - service calls addressed by path and method
//! - per-path event subscriptions

pub mod error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use error::{RemoteError, TransportError, TransportResult};

/// Lifecycle events emitted by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Socket (re)connected
    Connect,
    /// Socket dropped
    Disconnect,
    /// Server delivered its bootstrap public key, base64(base64(DER))
    Encrypt(String),
}

/// Methods a remote service understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMethod {
    Get,
    Find,
    Create,
    Update,
    Patch,
    Remove,
}

impl ServiceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Find => "find",
            Self::Create => "create",
            Self::Update => "update",
            Self::Patch => "patch",
            Self::Remove => "remove",
        }
    }
}

impl std::fmt::Display for ServiceMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single call against a remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    pub path: String,
    pub method: ServiceMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Value>,
}

impl RemoteCall {
    pub fn new(path: impl Into<String>, method: ServiceMethod) -> Self {
        Self {
            path: path.into(),
            method,
            id: None,
            data: None,
            query: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_query(mut self, query: Option<serde_json::Value>) -> Self {
        self.query = query;
        self
    }
}

/// Socket transport to the remote API
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open (or reopen) the socket. Completion is reported through [`TransportEvent::Connect`].
    async fn open(&self) -> TransportResult<()>;

    /// Force-close the socket
    async fn close(&self);

    /// Check if the socket is currently connected
    fn is_connected(&self) -> bool;

    /// Subscribe to lifecycle events
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Resume a previous session using the token the transport stored
    async fn reauthenticate(&self) -> TransportResult<serde_json::Value>;

    /// Full login with an authentication payload
    async fn authenticate(&self, payload: serde_json::Value) -> TransportResult<serde_json::Value>;

    /// Fetch the identity bound to the authenticated socket
    async fn identity(&self) -> TransportResult<serde_json::Value>;

    /// Run a service call
    async fn call(&self, call: RemoteCall) -> TransportResult<serde_json::Value>;

    /// Subscribe to events a service publishes
    fn subscribe(&self, path: &str, event: &str) -> TransportResult<broadcast::Receiver<serde_json::Value>>;

    /// Get transport type name
    fn transport_type(&self) -> &'static str;
}
