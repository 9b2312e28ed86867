//! Response Dispatcher
//!
//! Every public operation goes through [`ResponseDispatcher::dispatch`]:
//! 1. validate options and arguments; a violation skips the call and becomes
//!    the `BadProps` outcome
//! 2. run the call, normalising failures into [`ResponseError`]
//! 3. route the outcome: return it (`Direct`, or `respondDirect` set on the
//!    call) or publish it on the application event bus (`Callback`)
//!
//! Success and failure of one call are always routed the same way.

pub mod bus;
pub mod error;

use log::{debug, error};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

pub use bus::{BroadcastBus, BusError, EventBus, EventEnvelope, EventKind};
pub use error::{ErrorDetails, ResponseError, UNKNOWN_API_ERROR};

use crate::session::LifecycleEvent;
use crate::validation::{validate_query_options, QueryOptions, ValidationResult};

/// Global routing mode
#[derive(Clone)]
pub enum ResponseMode {
    /// Return outcomes to the caller
    Direct,
    /// Publish outcomes on the event bus
    Callback(Arc<dyn EventBus>),
}

impl std::fmt::Debug for ResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => f.write_str("Direct"),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Where an operation's outcome went
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched<T> {
    Returned(T),
    /// Outcome published on the event bus
    Published,
}

impl<T> Dispatched<T> {
    pub fn into_returned(self) -> Option<T> {
        match self {
            Self::Returned(value) => Some(value),
            Self::Published => None,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published)
    }
}

pub type DispatchResult = Result<Dispatched<Value>, ResponseError>;

#[derive(Debug, Clone)]
pub struct ResponseDispatcher {
    mode: ResponseMode,
}

impl ResponseDispatcher {
    pub fn new(mode: ResponseMode) -> Self {
        Self { mode }
    }

    pub fn direct() -> Self {
        Self::new(ResponseMode::Direct)
    }

    pub fn callback(bus: Arc<dyn EventBus>) -> Self {
        Self::new(ResponseMode::Callback(bus))
    }

    pub fn mode(&self) -> &ResponseMode {
        &self.mode
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.mode, ResponseMode::Direct)
    }

    /// Validate, run and route one operation
    ///
    /// `call` receives the validated options and is skipped when validation
    /// fails; the `BadProps` outcome is routed like any other. Options that
    /// fail validation still honour a boolean `respondDirect`.
    pub async fn dispatch<V, F, Fut>(
        &self,
        operation: &str,
        options: Option<&Value>,
        validate: V,
        call: F,
    ) -> DispatchResult
    where
        V: FnOnce() -> ValidationResult,
        F: FnOnce(QueryOptions) -> Fut,
        Fut: Future<Output = Result<Value, ResponseError>>,
    {
        let (respond_direct, outcome) = match options.map(validate_query_options).transpose() {
            Ok(options) => {
                let options = options.unwrap_or_default();
                let respond_direct = options.respond_direct == Some(true);
                let outcome = match validate() {
                    Ok(()) => call(options).await,
                    Err(e) => Err(e.into()),
                };
                (respond_direct, outcome)
            }
            Err(e) => {
                let requested = options
                    .and_then(|options| options.get("respondDirect"))
                    .and_then(Value::as_bool);
                (requested == Some(true), Err(e.into()))
            }
        };

        self.route(operation, respond_direct, outcome)
    }

    fn route(&self, operation: &str, respond_direct: bool, outcome: Result<Value, ResponseError>) -> DispatchResult {
        match &self.mode {
            ResponseMode::Callback(bus) if !respond_direct => {
                let envelope = match outcome {
                    Ok(payload) => EventEnvelope::new(EventKind::Response(operation.to_string()), payload),
                    Err(e) => EventEnvelope::new(EventKind::Error(operation.to_string()), error_payload(&e)),
                };
                debug!("Publishing {}", envelope.kind.name());
                if let Err(e) = bus.publish(envelope) {
                    error!("Failed to publish {} outcome: {}", operation, e);
                }
                Ok(Dispatched::Published)
            }
            _ => outcome.map(Dispatched::Returned),
        }
    }

    /// Publish a lifecycle transition; no-op in direct mode
    pub fn publish_lifecycle(&self, event: LifecycleEvent) {
        if let ResponseMode::Callback(bus) = &self.mode {
            let envelope = EventEnvelope::new(event.into(), Value::from(event.as_str()));
            if let Err(e) = bus.publish(envelope) {
                error!("Failed to publish {} event: {}", event, e);
            }
        }
    }
}

fn error_payload(err: &ResponseError) -> Value {
    serde_json::to_value(err).unwrap_or_else(|_| Value::String(err.to_string()))
}
