//! Client
//!
//! Public entry point: owns one [`ConnectionManager`] and one
//! [`ResponseDispatcher`] and runs every data operation through
//! validate -> call -> route.

use log::debug;
use serde_json::Value;
use std::sync::Arc;

use crate::config::ClientSettings;
use crate::dispatch::{DispatchResult, ErrorDetails, EventBus, ResponseDispatcher, ResponseError};
use crate::probe::ProbeStrategy;
use crate::service::{ApiPath, EndpointProxy, Scope};
use crate::session::{ConnectionError, ConnectionManager, LifecycleEvent, MessageCallback};
use crate::transport::Transport;
use crate::validation::{
    require_non_empty, validate_address, validate_auth_details, validate_data, validate_query,
    validate_scope, AddressValidator,
};

const NETWORKS_ENDPOINT: &str = "networks";
const RATES_ENDPOINT: &str = "rates";

pub struct Client {
    manager: ConnectionManager,
    dispatcher: ResponseDispatcher,
    address_validator: Option<Arc<dyn AddressValidator>>,
}

impl Client {
    /// Build a client; nothing connects until [`connect`](Self::connect)
    ///
    /// Results are returned directly when `respondDirect` is set, and
    /// published on `bus` otherwise.
    pub fn new(
        settings: ClientSettings,
        auth_details: &Value,
        transport: Arc<dyn Transport>,
        bus: Option<Arc<dyn EventBus>>,
    ) -> Result<Self, ResponseError> {
        let auth = validate_auth_details(auth_details)?;

        let dispatcher = match (settings.respond_direct, bus) {
            (true, _) => ResponseDispatcher::direct(),
            (false, Some(bus)) => ResponseDispatcher::callback(bus),
            (false, None) => {
                return Err(ResponseError::BadProps(ErrorDetails::new(
                    "ValidationError",
                    "respondDirect is false but no event bus was given",
                )))
            }
        };

        let manager = ConnectionManager::new(settings, auth, transport);
        let client = Self {
            manager,
            dispatcher,
            address_validator: None,
        };
        client.route_lifecycle(None);
        Ok(client)
    }

    pub fn with_address_validator(mut self, validator: impl AddressValidator + 'static) -> Self {
        self.address_validator = Some(Arc::new(validator));
        self
    }

    /// Replace the liveness probe, e.g. with a host-fed `NetworkSignal`
    pub fn with_probe(self, probe: ProbeStrategy) -> Self {
        Self {
            manager: self.manager.with_probe(probe),
            ..self
        }
    }

    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.manager.connect().await
    }

    pub async fn disconnect(&self) {
        self.manager.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn is_authorized(&self) -> bool {
        self.manager.is_authorized()
    }

    pub fn service(&self, path: impl Into<String>) -> EndpointProxy {
        self.manager.service(path)
    }

    /// Lifecycle callback; in callback mode events are also published on the bus
    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        self.route_lifecycle(Some(Arc::new(callback)));
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn dispatcher(&self) -> &ResponseDispatcher {
        &self.dispatcher
    }

    /// Networks available for a currency
    pub async fn networks(&self, currency: &str, options: Option<&Value>) -> DispatchResult {
        let proxy = self.proxy(&Scope::currency(currency), NETWORKS_ENDPOINT);
        self.dispatcher
            .dispatch(
                "networks",
                options,
                || require_non_empty("currency", currency),
                |options| async move {
                    proxy
                        .find(options.apply_to_query(None))
                        .await
                        .map_err(ResponseError::from)
                },
            )
            .await
    }

    /// Exchange rates for a currency
    pub async fn rate(&self, currency: &str, options: Option<&Value>) -> DispatchResult {
        let proxy = self.proxy(&Scope::currency(currency), RATES_ENDPOINT);
        self.dispatcher
            .dispatch(
                "rate",
                options,
                || require_non_empty("currency", currency),
                |options| async move {
                    proxy
                        .find(options.apply_to_query(None))
                        .await
                        .map_err(ResponseError::from)
                },
            )
            .await
    }

    pub async fn find(
        &self,
        scope: &Scope,
        endpoint: &str,
        query: Option<Value>,
        options: Option<&Value>,
    ) -> DispatchResult {
        let proxy = self.proxy(scope, endpoint);
        let query_check = query.as_ref().map_or(Ok(()), validate_query);
        self.dispatcher
            .dispatch(
                "find",
                options,
                || {
                    validate_scope(scope)?;
                    require_non_empty("endpoint", endpoint)?;
                    query_check
                },
                |options| async move {
                    proxy
                        .find(options.apply_to_query(query))
                        .await
                        .map_err(ResponseError::from)
                },
            )
            .await
    }

    pub async fn get(&self, scope: &Scope, endpoint: &str, id: &str, options: Option<&Value>) -> DispatchResult {
        let proxy = self.proxy(scope, endpoint);
        self.dispatcher
            .dispatch(
                "get",
                options,
                || {
                    validate_scope(scope)?;
                    require_non_empty("endpoint", endpoint)?;
                    require_non_empty("id", id)
                },
                |_| async move { proxy.get(id, None).await.map_err(ResponseError::from) },
            )
            .await
    }

    pub async fn create(&self, scope: &Scope, endpoint: &str, data: Value, options: Option<&Value>) -> DispatchResult {
        let proxy = self.proxy(scope, endpoint);
        let data_check = validate_data(&data);
        self.dispatcher
            .dispatch(
                "create",
                options,
                || {
                    validate_scope(scope)?;
                    require_non_empty("endpoint", endpoint)?;
                    data_check
                },
                |_| async move { proxy.create(data, None).await.map_err(ResponseError::from) },
            )
            .await
    }

    pub async fn update(
        &self,
        scope: &Scope,
        endpoint: &str,
        id: &str,
        data: Value,
        options: Option<&Value>,
    ) -> DispatchResult {
        let proxy = self.proxy(scope, endpoint);
        let data_check = validate_data(&data);
        self.dispatcher
            .dispatch(
                "update",
                options,
                || {
                    validate_scope(scope)?;
                    require_non_empty("endpoint", endpoint)?;
                    require_non_empty("id", id)?;
                    data_check
                },
                |_| async move { proxy.update(id, data, None).await.map_err(ResponseError::from) },
            )
            .await
    }

    pub async fn patch(
        &self,
        scope: &Scope,
        endpoint: &str,
        id: &str,
        data: Value,
        options: Option<&Value>,
    ) -> DispatchResult {
        let proxy = self.proxy(scope, endpoint);
        let data_check = validate_data(&data);
        self.dispatcher
            .dispatch(
                "patch",
                options,
                || {
                    validate_scope(scope)?;
                    require_non_empty("endpoint", endpoint)?;
                    require_non_empty("id", id)?;
                    data_check
                },
                |_| async move { proxy.patch(id, data, None).await.map_err(ResponseError::from) },
            )
            .await
    }

    pub async fn remove(&self, scope: &Scope, endpoint: &str, id: &str, options: Option<&Value>) -> DispatchResult {
        let proxy = self.proxy(scope, endpoint);
        self.dispatcher
            .dispatch(
                "remove",
                options,
                || {
                    validate_scope(scope)?;
                    require_non_empty("endpoint", endpoint)?;
                    require_non_empty("id", id)
                },
                |_| async move { proxy.remove(id, None).await.map_err(ResponseError::from) },
            )
            .await
    }

    /// Check an address with the configured validator; malformed addresses are `BadProps`
    pub async fn validate_address(&self, address: &str, currency: &str, network: &str) -> DispatchResult {
        let configured = self.address_validator.is_some();
        self.dispatcher
            .dispatch(
                "validateAddress",
                None,
                || match &self.address_validator {
                    Some(validator) => validate_address(validator.as_ref(), address, currency, network),
                    None => {
                        require_non_empty("address", address)?;
                        require_non_empty("currency", currency)?;
                        require_non_empty("network", network)
                    }
                },
                |_| async move {
                    if configured {
                        Ok(Value::Bool(true))
                    } else {
                        Err(ResponseError::BadRequest(ErrorDetails::new(
                            "BadRequest",
                            "No address validator configured",
                        )))
                    }
                },
            )
            .await
    }

    fn proxy(&self, scope: &Scope, endpoint: &str) -> EndpointProxy {
        let path = ApiPath::for_scope(&self.manager.settings().version, scope, endpoint);
        debug!("Routing to {}", path);
        self.manager.service(path.as_str())
    }

    fn route_lifecycle(&self, callback: Option<MessageCallback>) {
        let dispatcher = self.dispatcher.clone();
        if dispatcher.is_direct() {
            if let Some(callback) = callback {
                self.manager.set_message_callback(move |event| callback(event));
            }
            return;
        }

        self.manager.set_message_callback(move |event| {
            dispatcher.publish_lifecycle(event);
            if let Some(callback) = &callback {
                callback(event);
            }
        });
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("manager", &self.manager)
            .field("mode", self.dispatcher.mode())
            .finish()
    }
}
