//! Session State
//!
//! Connection bookkeeping and the reconnect decision.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::crypto::SessionCrypto;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identifier, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the connection stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    /// Transport opening
    Connecting,
    /// Transport up, not authenticated
    Connected,
    Authenticating,
    Authorized,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Authorized => write!(f, "authorized"),
        }
    }
}

/// What to do when the transport reports a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectDecision {
    /// Authenticate now
    Authenticate,
    /// Too soon after the last attempt: close and retry once the timeout passed
    Backoff,
    /// Try budget spent: close until an explicit `connect()`
    GiveUp,
}

/// Reconnect bookkeeping, mutated only by the connection manager
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    /// Failed authentication attempts since the last success
    pub connection_counter: u32,
    pub last_connect_at: Option<Instant>,
    pub manually_disconnected: bool,
    /// Set by the retry timer; the next connection authenticates without
    /// waiting out the timeout window again
    pub retry_due: bool,
}

impl ConnectionState {
    /// Consumes a pending retry
    pub fn decide(&mut self, max_tries: u32, timeout: Duration, now: Instant) -> ConnectDecision {
        let retry_due = std::mem::take(&mut self.retry_due);
        if self.connection_counter > max_tries {
            return ConnectDecision::GiveUp;
        }
        if retry_due {
            return ConnectDecision::Authenticate;
        }
        match self.last_connect_at {
            Some(last) if now.saturating_duration_since(last) <= timeout => ConnectDecision::Backoff,
            _ => ConnectDecision::Authenticate,
        }
    }

    pub fn within_budget(&self, max_tries: u32) -> bool {
        self.connection_counter <= max_tries
    }

    pub fn record_success(&mut self, now: Instant) {
        self.connection_counter = 0;
        self.last_connect_at = Some(now);
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.connection_counter += 1;
        self.last_connect_at = Some(now);
    }

    /// Fresh budget for an explicit `connect()`
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Authentication state and key material of one manager
pub struct Session {
    id: SessionId,
    crypto: Arc<SessionCrypto>,
    authenticated: AtomicBool,
    authorized_at: RwLock<Option<DateTime<Utc>>>,
}

impl Session {
    pub fn new() -> Self {
        let id = SessionId::next();
        Self {
            id,
            crypto: Arc::new(SessionCrypto::new(id.value())),
            authenticated: AtomicBool::new(false),
            authorized_at: RwLock::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn crypto(&self) -> &Arc<SessionCrypto> {
        &self.crypto
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
        if authenticated {
            *self.authorized_at.write() = Some(Utc::now());
        }
    }

    pub fn authorized_at(&self) -> Option<DateTime<Utc>> {
        *self.authorized_at.read()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

/// Serializable session snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub phase: ConnectionPhase,
    pub connection_counter: u32,
    pub manually_disconnected: bool,
    pub is_authenticated: bool,
    pub authorized_at: Option<String>,
}

impl SessionInfo {
    pub fn new(session: &Session, phase: ConnectionPhase, state: &ConnectionState) -> Self {
        Self {
            id: session.id(),
            phase,
            connection_counter: state.connection_counter,
            manually_disconnected: state.manually_disconnected,
            is_authenticated: session.is_authenticated(),
            authorized_at: session.authorized_at().map(|at| at.to_rfc3339()),
        }
    }
}
