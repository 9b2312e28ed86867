//! ledgerlink
//!
//! Client library for a socket-based payments API: keeps one authenticated,
//! encrypted session alive and exposes request / response and event
//! subscription semantics on top of it.

pub mod client;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod probe;
pub mod service;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod validation;

pub use client::Client;
pub use config::{ClientSettings, ConfigError, Environment, ExecutionContext};
pub use dispatch::{
    BroadcastBus, Dispatched, ErrorDetails, EventBus, EventEnvelope, EventKind, ResponseDispatcher,
    ResponseError, ResponseMode,
};
pub use probe::{NetworkSignal, ProbeStrategy};
pub use service::{ApiPath, EndpointProxy, Scope, ServiceError, Subscription};
pub use session::{ConnectionError, ConnectionManager, ConnectionPhase, LifecycleEvent, SessionInfo};
pub use transport::{RemoteCall, RemoteError, ServiceMethod, Transport, TransportError, TransportEvent};
pub use validation::{AddressValidator, AuthDetails, QueryOptions, ValidationError};
