//! Endpoint Proxy
//!
//! Forwards CRUD calls and event subscriptions for one remote path. Queries
//! are encrypted on the way out, results, errors and events decrypted on the
//! way in.

use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::AbortHandle;

use super::{ServiceContext, ServiceError, ServiceResult};
use crate::transport::{RemoteCall, ServiceMethod};

/// Handle for one remote path
#[derive(Debug, Clone)]
pub struct EndpointProxy {
    path: String,
    context: Arc<ServiceContext>,
}

impl EndpointProxy {
    pub(crate) fn new(path: impl Into<String>, context: Arc<ServiceContext>) -> Self {
        Self {
            path: path.into(),
            context,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn get(&self, id: &str, query: Option<Value>) -> ServiceResult<Value> {
        let call = RemoteCall::new(self.path.as_str(), ServiceMethod::Get)
            .with_id(id)
            .with_query(query);
        self.execute(call).await
    }

    pub async fn find(&self, query: Option<Value>) -> ServiceResult<Value> {
        let call = RemoteCall::new(self.path.as_str(), ServiceMethod::Find).with_query(query);
        self.execute(call).await
    }

    pub async fn create(&self, data: Value, query: Option<Value>) -> ServiceResult<Value> {
        let call = RemoteCall::new(self.path.as_str(), ServiceMethod::Create)
            .with_data(data)
            .with_query(query);
        self.execute(call).await
    }

    pub async fn update(&self, id: &str, data: Value, query: Option<Value>) -> ServiceResult<Value> {
        let call = RemoteCall::new(self.path.as_str(), ServiceMethod::Update)
            .with_id(id)
            .with_data(data)
            .with_query(query);
        self.execute(call).await
    }

    pub async fn patch(&self, id: &str, data: Value, query: Option<Value>) -> ServiceResult<Value> {
        let call = RemoteCall::new(self.path.as_str(), ServiceMethod::Patch)
            .with_id(id)
            .with_data(data)
            .with_query(query);
        self.execute(call).await
    }

    pub async fn remove(&self, id: &str, query: Option<Value>) -> ServiceResult<Value> {
        let call = RemoteCall::new(self.path.as_str(), ServiceMethod::Remove)
            .with_id(id)
            .with_query(query);
        self.execute(call).await
    }

    /// Listen to a service event; payloads are decrypted before `listener` runs
    ///
    /// The listener task is owned by the connection and stops on disconnect.
    /// Must be called from within a tokio runtime.
    pub fn on<F>(&self, event: &str, listener: F) -> ServiceResult<Subscription>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let transport = self.context.transport().ok_or(ServiceError::NoService)?;
        let hooks = self.context.hooks_for(&self.path);
        let mut events = transport.subscribe(&self.path, event)?;
        let event = event.to_string();

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(payload) => match hooks.event(payload) {
                        Ok(payload) => listener(payload),
                        Err(e) => warn!("Dropping {} event on {}: {}", event, hooks.path(), e),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Listener for {} on {} skipped {} events", event, hooks.path(), skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event stream {} on {} closed", event, hooks.path());
                        break;
                    }
                }
            }
        });

        let subscription = Subscription {
            abort: handle.abort_handle(),
        };
        self.context.track_listener(handle);
        Ok(subscription)
    }

    async fn execute(&self, call: RemoteCall) -> ServiceResult<Value> {
        let transport = self.context.transport().ok_or(ServiceError::NoService)?;
        let hooks = self.context.hooks_for(&self.path);

        let (call, key) = hooks.before(call)?;
        match transport.call(call).await {
            Ok(result) => Ok(hooks.after(key.as_ref(), result)?),
            Err(e) => Err(hooks.error(key.as_ref(), e).into()),
        }
    }
}

/// Active event subscription
#[derive(Debug)]
pub struct Subscription {
    abort: AbortHandle,
}

impl Subscription {
    /// Stop delivering events
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{encrypted_payload, SessionCrypto, SymmetricKey};
    use crate::testing::MemoryTransport;
    use crate::transport::{RemoteError, TransportError};
    use serde_json::json;
    use std::time::Duration;

    fn context() -> Arc<ServiceContext> {
        Arc::new(ServiceContext::new(Arc::new(SessionCrypto::new(1)), false))
    }

    #[tokio::test]
    async fn test_no_service_before_wiring() {
        let proxy = EndpointProxy::new("/v1/btc/testnet/transfers", context());

        assert!(matches!(proxy.find(None).await, Err(ServiceError::NoService)));
        assert!(matches!(proxy.remove("1", None).await, Err(ServiceError::NoService)));
        assert!(matches!(proxy.on("created", |_| {}), Err(ServiceError::NoService)));
    }

    #[tokio::test]
    async fn test_encrypted_round_trip() {
        let context = context();
        let transport = Arc::new(MemoryTransport::new());
        transport.open_silently();
        context.wire(transport.clone());
        let handle = context.crypto().install(SymmetricKey::generate());

        let response = handle.encrypt_value(&json!({ "total": 1, "data": [{ "id": "t1" }] })).unwrap();
        transport.push_response(Ok(response));

        let proxy = EndpointProxy::new("/v1/btc/testnet/transfers", context.clone());
        let result = proxy.find(Some(json!({ "status": "pending" }))).await.unwrap();
        assert_eq!(result, json!({ "total": 1, "data": [{ "id": "t1" }] }));

        let sent = transport.calls().pop().unwrap();
        let query = sent.query.unwrap();
        assert!(encrypted_payload(&query).is_some());
        assert_eq!(handle.decrypt_value(query).unwrap(), json!({ "status": "pending" }));
    }

    #[tokio::test]
    async fn test_remote_error_forwarded() {
        let context = context();
        let transport = Arc::new(MemoryTransport::new());
        transport.open_silently();
        context.wire(transport.clone());
        transport.push_response(Err(RemoteError::new("NotFound", "No record found").with_code(404)));

        let proxy = EndpointProxy::new("/v1/btc/testnet/transfers", context);
        match proxy.get("missing", None).await {
            Err(ServiceError::Transport(TransportError::Remote(remote))) => {
                assert_eq!(remote.code, Some(404));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_event_payloads_are_decrypted() {
        let context = context();
        let transport = Arc::new(MemoryTransport::new());
        transport.open_silently();
        context.wire(transport.clone());
        let handle = context.crypto().install(SymmetricKey::generate());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let proxy = EndpointProxy::new("/v1/btc/testnet/transfers", context.clone());
        let _subscription = proxy
            .on("created", move |payload| {
                let _ = tx.send(payload);
            })
            .unwrap();

        let payload = handle.encrypt_value(&json!({ "id": "t2" })).unwrap();
        transport.emit_service_event("/v1/btc/testnet/transfers", "created", payload);

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, json!({ "id": "t2" }));
        assert_eq!(context.listener_count(), 1);

        context.unwire();
        assert_eq!(context.listener_count(), 0);
    }
}
