//! Connection Manager
//!
//! Owns the transport and drives the reconnect / authentication state machine:
//!
//! `Disconnected -> Connecting -> Connected -> Authenticating -> Authorized`
//!
//! Failed authentications count against `maxTries`: the transport is closed
//! and reopened after `connectionTimeout`, or left closed once the budget is
//! spent. Every background task (event pump, retry timer, liveness probe,
//! service listeners) belongs to the manager and is aborted on `disconnect()`
//! or drop.

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::events::{LifecycleEmitter, LifecycleEvent, MessageCallback};
use super::state::{ConnectDecision, ConnectionPhase, ConnectionState, Session, SessionId, SessionInfo};
use crate::config::ClientSettings;
use crate::crypto::CryptoError;
use crate::probe::ProbeStrategy;
use crate::service::{EndpointProxy, ServiceContext};
use crate::transport::{Transport, TransportError, TransportEvent};
use crate::validation::AuthDetails;

/// Login strategy for key / secret credentials
pub const LOCAL_STRATEGY: &str = "local";

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection manager was disconnected")]
    Disposed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Authentication errors; logged and reported through lifecycle events only
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Transport is not wired")]
    NotWired,

    #[error("Login failed: {0}")]
    Login(TransportError),

    #[error("Identity lookup failed: {0}")]
    Identity(TransportError),

    #[error("Could not seal login payload: {0}")]
    Seal(#[from] CryptoError),
}

#[derive(Default)]
struct Tasks {
    pump: Option<JoinHandle<()>>,
    probe: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

impl Tasks {
    fn retry_pending(&self) -> bool {
        self.retry.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn abort_all(&mut self) {
        for handle in [self.pump.take(), self.probe.take(), self.retry.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

struct Inner {
    settings: ClientSettings,
    auth: AuthDetails,
    transport: Arc<dyn Transport>,
    session: Session,
    state: Mutex<ConnectionState>,
    phase: RwLock<ConnectionPhase>,
    services: Arc<ServiceContext>,
    emitter: LifecycleEmitter,
    probe: Mutex<ProbeStrategy>,
    tasks: Mutex<Tasks>,
    identity: RwLock<Option<Value>>,
    disposed: AtomicBool,
}

/// Persistent, authenticated connection to the API
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager; nothing happens until [`connect`](Self::connect)
    pub fn new(settings: ClientSettings, auth: AuthDetails, transport: Arc<dyn Transport>) -> Self {
        let probe = ProbeStrategy::for_settings(&settings).unwrap_or_else(|e| {
            warn!("Liveness probe disabled: {}", e);
            ProbeStrategy::Disabled
        });
        let session = Session::new();
        let services = Arc::new(ServiceContext::new(
            Arc::clone(session.crypto()),
            settings.is_development(),
        ));

        Self {
            inner: Arc::new(Inner {
                settings,
                auth,
                transport,
                session,
                state: Mutex::new(ConnectionState::default()),
                phase: RwLock::new(ConnectionPhase::Disconnected),
                services,
                emitter: LifecycleEmitter::new(),
                probe: Mutex::new(probe),
                tasks: Mutex::new(Tasks::default()),
                identity: RwLock::new(None),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Replace the liveness probe; takes effect on the first `connect()`
    pub fn with_probe(self, probe: ProbeStrategy) -> Self {
        *self.inner.probe.lock() = probe;
        self
    }

    /// Open the transport and start the background tasks
    ///
    /// Clears a previous give-up: the try budget starts over.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Disposed);
        }

        inner.state.lock().reset();
        inner.services.wire(Arc::clone(&inner.transport));
        self.start_tasks();

        if inner.transport.is_connected() {
            debug!("Session {}: transport already connected", inner.session.id());
            return Ok(());
        }

        info!(
            "Session {}: connecting to {} via {} transport",
            inner.session.id(),
            inner.settings.url,
            inner.transport.transport_type()
        );
        inner.set_phase(ConnectionPhase::Connecting);
        inner.transport.open().await?;
        Ok(())
    }

    /// Tear the connection down for good; later calls are no-ops
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        inner.tasks.lock().abort_all();
        inner.services.unwire();
        inner.transport.close().await;
        inner.session.crypto().clear();
        inner.session.set_authenticated(false);
        *inner.identity.write() = None;
        inner.state.lock().manually_disconnected = true;
        inner.set_phase(ConnectionPhase::Disconnected);
        inner.emitter.emit(LifecycleEvent::Disconnected);
        info!("Session {}: disconnected", inner.session.id());
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.disposed.load(Ordering::SeqCst) && self.inner.transport.is_connected()
    }

    pub fn is_authorized(&self) -> bool {
        self.inner.session.is_authenticated()
    }

    /// Proxy for a remote path
    pub fn service(&self, path: impl Into<String>) -> EndpointProxy {
        EndpointProxy::new(path, Arc::clone(&self.inner.services))
    }

    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        let callback: MessageCallback = Arc::new(callback);
        self.inner.emitter.set_callback(callback);
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.emitter.subscribe()
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session.id()
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.inner.phase.read()
    }

    pub fn info(&self) -> SessionInfo {
        let state = self.inner.state.lock().clone();
        SessionInfo::new(&self.inner.session, self.phase(), &state)
    }

    /// Identity returned by the last successful authentication
    pub fn identity(&self) -> Option<Value> {
        self.inner.identity.read().clone()
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    fn start_tasks(&self) {
        let mut tasks = self.inner.tasks.lock();

        if tasks.pump.is_none() {
            // Subscribe before the transport opens so no event is missed
            let events = self.inner.transport.events();
            let inner = Arc::clone(&self.inner);
            tasks.pump = Some(tokio::spawn(inner.pump(events)));
        }

        if tasks.probe.is_none() {
            let strategy = self.inner.probe.lock().clone();
            let inner = Arc::clone(&self.inner);
            tasks.probe = strategy.spawn(move |reachable| {
                let inner = Arc::clone(&inner);
                async move { inner.on_probe(reachable).await }
            });
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.tasks.lock().abort_all();
        self.inner.services.unwire();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("session", &self.inner.session)
            .field("phase", &self.phase())
            .field("transport", &self.inner.transport.transport_type())
            .finish()
    }
}

impl Inner {
    fn set_phase(&self, phase: ConnectionPhase) {
        let previous = std::mem::replace(&mut *self.phase.write(), phase);
        if previous != phase {
            debug!("Session {}: {} -> {}", self.session.id(), previous, phase);
        }
    }

    async fn pump(self: Arc<Self>, mut events: broadcast::Receiver<TransportEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Session {}: skipped {} transport events", self.session.id(), skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("Session {}: transport event stream closed", self.session.id());
                    break;
                }
            }
        }
    }

    async fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connect => self.on_connect().await,
            TransportEvent::Disconnect => {
                info!("Session {}: transport disconnected", self.session.id());
                self.set_phase(ConnectionPhase::Disconnected);
                self.emitter.emit(LifecycleEvent::Disconnected);
            }
            TransportEvent::Encrypt(encoded) => {
                if let Err(e) = self.session.crypto().install_bootstrap(&encoded) {
                    warn!("Session {}: ignoring bootstrap key: {}", self.session.id(), e);
                }
            }
        }
    }

    async fn on_connect(self: &Arc<Self>) {
        info!("Session {}: transport connected", self.session.id());
        self.set_phase(ConnectionPhase::Connected);
        self.emitter.emit(LifecycleEvent::Connected);

        let max_tries = self.settings.max_tries;
        let timeout = self.settings.connection_timeout();
        let (decision, attempts) = {
            let mut state = self.state.lock();
            (state.decide(max_tries, timeout, Instant::now()), state.connection_counter)
        };

        match decision {
            ConnectDecision::Authenticate => self.authenticate().await,
            ConnectDecision::GiveUp => self.give_up(attempts).await,
            ConnectDecision::Backoff => {
                debug!(
                    "Session {}: last attempt less than {:?} ago, backing off",
                    self.session.id(),
                    timeout
                );
                self.back_off().await;
            }
        }
    }

    /// Close until an explicit `connect()`
    async fn give_up(&self, attempts: u32) {
        warn!(
            "Session {}: {} failed attempts, giving up until connect() is called",
            self.session.id(),
            attempts
        );
        self.state.lock().manually_disconnected = true;
        self.transport.close().await;
    }

    /// Close and reopen once `connectionTimeout` has passed
    async fn back_off(self: &Arc<Self>) {
        self.state.lock().manually_disconnected = true;
        self.transport.close().await;
        self.schedule_retry(self.settings.connection_timeout());
    }

    fn schedule_retry(self: &Arc<Self>, delay: Duration) {
        let mut tasks = self.tasks.lock();
        if tasks.retry_pending() {
            return;
        }

        let inner = Arc::clone(self);
        tasks.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Fired: later failures may schedule the next retry
            inner.tasks.lock().retry = None;
            {
                let mut state = inner.state.lock();
                state.manually_disconnected = false;
                state.retry_due = true;
            }
            if inner.disposed.load(Ordering::SeqCst) || inner.transport.is_connected() {
                inner.state.lock().retry_due = false;
                return;
            }
            debug!("Session {}: retrying connection", inner.session.id());
            inner.set_phase(ConnectionPhase::Connecting);
            if let Err(e) = inner.transport.open().await {
                warn!("Session {}: retry failed: {}", inner.session.id(), e);
            }
        }));
    }

    async fn authenticate(self: &Arc<Self>) {
        self.set_phase(ConnectionPhase::Authenticating);

        match self.try_authenticate().await {
            Ok(identity) => {
                self.state.lock().record_success(Instant::now());
                self.session.set_authenticated(true);
                *self.identity.write() = Some(identity);
                self.set_phase(ConnectionPhase::Authorized);
                info!("Session {}: authorized", self.session.id());
                self.emitter.emit(LifecycleEvent::Authorized);
            }
            Err(e) => {
                let attempts = {
                    let mut state = self.state.lock();
                    state.record_failure(Instant::now());
                    state.connection_counter
                };
                self.session.set_authenticated(false);
                error!(
                    "Session {}: authentication failed (attempt {}): {}",
                    self.session.id(),
                    attempts,
                    e
                );

                if attempts > self.settings.max_tries {
                    self.give_up(attempts).await;
                } else {
                    self.back_off().await;
                }
            }
        }
    }

    /// Resume the stored session, else log in with the sealed credentials
    async fn try_authenticate(&self) -> Result<Value, AuthError> {
        let transport = self.services.transport().ok_or(AuthError::NotWired)?;

        if let Err(e) = transport.reauthenticate().await {
            debug!("Session {}: resume rejected ({}), logging in", self.session.id(), e);

            let sealed = self.session.crypto().seal_auth(&self.auth)?;
            transport
                .authenticate(sealed.login_payload(LOCAL_STRATEGY))
                .await
                .map_err(AuthError::Login)?;

            if let Some(key) = sealed.into_pending() {
                self.session.crypto().install(key);
            }
        }

        transport.identity().await.map_err(AuthError::Identity)
    }

    async fn on_probe(&self, reachable: bool) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let connected = self.transport.is_connected();
        if reachable && !connected {
            let may_reconnect = {
                let state = self.state.lock();
                state.within_budget(self.settings.max_tries) && !state.manually_disconnected
            };
            if may_reconnect {
                info!("Session {}: API reachable again, reconnecting", self.session.id());
                self.set_phase(ConnectionPhase::Connecting);
                if let Err(e) = self.transport.open().await {
                    warn!("Session {}: reconnect failed: {}", self.session.id(), e);
                }
            }
        } else if !reachable && connected {
            warn!("Session {}: API unreachable, dropping transport", self.session.id());
            self.transport.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::testing::MemoryTransport;

    fn settings() -> ClientSettings {
        ClientSettings {
            environment: Environment::Test,
            ..ClientSettings::default()
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_connect_and_authorize() {
        let transport = Arc::new(MemoryTransport::new());
        let manager = ConnectionManager::new(settings(), AuthDetails::new("pk", "sk"), transport.clone());
        let mut events = manager.subscribe();

        manager.connect().await.unwrap();
        wait_until(|| manager.is_authorized()).await;

        assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Authorized);
        assert_eq!(manager.phase(), ConnectionPhase::Authorized);
        assert_eq!(manager.identity().unwrap()["id"], "user_1");
        assert_eq!(
            transport.auth_payloads(),
            vec![serde_json::json!({ "strategy": "local", "key": "pk", "secret": "sk" })]
        );
    }

    #[tokio::test]
    async fn test_resume_skips_login() {
        let transport = Arc::new(MemoryTransport::new());
        transport.accept_resume(true);
        let manager = ConnectionManager::new(settings(), AuthDetails::new("pk", "sk"), transport.clone());

        manager.connect().await.unwrap();
        wait_until(|| manager.is_authorized()).await;

        assert_eq!(transport.resume_count(), 1);
        assert!(transport.auth_payloads().is_empty());
    }

    #[tokio::test]
    async fn test_failed_login_is_counted_not_returned() {
        let transport = Arc::new(MemoryTransport::new());
        transport.accept_login(false);
        let manager = ConnectionManager::new(settings(), AuthDetails::new("pk", "sk"), transport.clone());

        assert!(manager.connect().await.is_ok());
        wait_until(|| manager.info().connection_counter == 1).await;
        wait_until(|| !manager.is_connected()).await;

        assert!(!manager.is_authorized());
        wait_until(|| manager.inner.tasks.lock().retry_pending()).await;
        assert!(manager.info().manually_disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_login_is_retried_after_timeout() {
        let transport = Arc::new(MemoryTransport::new());
        transport.accept_login(false);
        let manager = ConnectionManager::new(settings(), AuthDetails::new("pk", "sk"), transport.clone());

        manager.connect().await.unwrap();
        wait_until(|| manager.info().connection_counter == 1).await;
        transport.accept_login(true);
        assert!(!manager.is_authorized());

        tokio::time::sleep(manager.settings().connection_timeout()).await;
        wait_until(|| manager.is_authorized()).await;

        assert_eq!(transport.open_count(), 2);
        assert_eq!(transport.auth_payloads().len(), 2);
        assert_eq!(manager.info().connection_counter, 0);
        assert!(!manager.info().manually_disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_past_budget_close_for_good() {
        let transport = Arc::new(MemoryTransport::new());
        transport.accept_login(false);
        let settings = ClientSettings {
            max_tries: 1,
            ..settings()
        };
        let manager = ConnectionManager::new(settings, AuthDetails::new("pk", "sk"), transport.clone());

        manager.connect().await.unwrap();
        wait_until(|| manager.info().connection_counter == 1).await;
        tokio::time::sleep(Duration::from_secs(11)).await;
        wait_until(|| manager.info().connection_counter == 2).await;
        wait_until(|| !manager.is_connected()).await;

        assert!(manager.info().manually_disconnected);
        assert!(!manager.inner.tasks.lock().retry_pending());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 2);
        assert_eq!(transport.auth_payloads().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = Arc::new(MemoryTransport::new());
        let manager = ConnectionManager::new(settings(), AuthDetails::new("pk", "sk"), transport.clone());
        manager.connect().await.unwrap();
        wait_until(|| manager.is_authorized()).await;

        let mut events = manager.subscribe();
        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Disconnected);
        assert!(events.try_recv().is_err());
        assert_eq!(transport.close_count(), 1);
        assert!(!manager.is_connected());
        assert!(!manager.is_authorized());
        assert!(matches!(manager.connect().await, Err(ConnectionError::Disposed)));
    }

    #[tokio::test]
    async fn test_bootstrap_event_installs_key() {
        let (_, wire) = crate::testing::generate_bootstrap_key(1024).unwrap();
        let transport = Arc::new(MemoryTransport::new().with_bootstrap(wire));
        let manager = ConnectionManager::new(settings(), AuthDetails::new("pk", "sk"), transport.clone());

        manager.connect().await.unwrap();
        wait_until(|| manager.is_authorized()).await;

        let payload = transport.auth_payloads().pop().unwrap();
        assert_eq!(payload["strategy"], "local");
        assert!(payload["chunks"].is_array());
        assert!(payload.get("secret").is_none());
        assert!(manager.inner.session.crypto().has_key());
    }
}
