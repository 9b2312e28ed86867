//! Transport Error Types
//!
//! Errors raised by a transport implementation and by the remote API behind it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error object raised by the remote API
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RemoteError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            code: None,
            data: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Transport-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
