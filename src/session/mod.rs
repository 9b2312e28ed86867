//! Session Management Module
//!
//! One [`ConnectionManager`] per client:
//! - reconnect / authentication state machine bounded by `maxTries`
//! - session-scoped key material (no process-wide state)
//! - lifecycle notifications as a broadcast channel and a callback

pub mod events;
pub mod manager;
pub mod state;

pub use events::{LifecycleEmitter, LifecycleEvent, MessageCallback};
pub use manager::{AuthError, ConnectionError, ConnectionManager, LOCAL_STRATEGY};
pub use state::{ConnectDecision, ConnectionPhase, ConnectionState, Session, SessionId, SessionInfo};
