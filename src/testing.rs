//! In-memory transport and key helpers for exercising the client without a server.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use dashmap::DashMap;
use parking_lot::Mutex;
use rsa::{pkcs8::EncodePublicKey, RsaPrivateKey};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::broadcast;

use crate::crypto::{CryptoError, CryptoResult};
use crate::transport::{RemoteCall, RemoteError, Transport, TransportError, TransportEvent, TransportResult};

const EVENT_CAPACITY: usize = 64;

/// Scriptable [`Transport`] that records what the client sends
pub struct MemoryTransport {
    events: broadcast::Sender<TransportEvent>,
    connected: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    resumes: AtomicUsize,
    accept_resume: AtomicBool,
    accept_login: AtomicBool,
    bootstrap: Mutex<Option<String>>,
    identity: Mutex<Value>,
    calls: Mutex<Vec<RemoteCall>>,
    auth_payloads: Mutex<Vec<Value>>,
    responses: Mutex<VecDeque<Result<Value, RemoteError>>>,
    channels: DashMap<(String, String), broadcast::Sender<Value>>,
}

impl MemoryTransport {
    /// Transport that accepts logins and rejects session resumes
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            events,
            connected: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            accept_resume: AtomicBool::new(false),
            accept_login: AtomicBool::new(true),
            bootstrap: Mutex::new(None),
            identity: Mutex::new(json!({ "id": "user_1", "email": "user@example.com" })),
            calls: Mutex::new(Vec::new()),
            auth_payloads: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            channels: DashMap::new(),
        }
    }

    /// Emit `Encrypt(wire_key)` before every `Connect`
    pub fn with_bootstrap(self, wire_key: impl Into<String>) -> Self {
        *self.bootstrap.lock() = Some(wire_key.into());
        self
    }

    pub fn with_identity(self, identity: Value) -> Self {
        *self.identity.lock() = identity;
        self
    }

    pub fn accept_resume(&self, accept: bool) {
        self.accept_resume.store(accept, Ordering::SeqCst);
    }

    pub fn accept_login(&self, accept: bool) {
        self.accept_login.store(accept, Ordering::SeqCst);
    }

    /// Mark connected without emitting anything
    pub fn open_silently(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Queue the outcome of the next service call; calls default to `{}`
    pub fn push_response(&self, response: Result<Value, RemoteError>) {
        self.responses.lock().push_back(response);
    }

    /// Emit a lifecycle event, keeping the connected flag in step
    pub fn emit(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connect => self.connected.store(true, Ordering::SeqCst),
            TransportEvent::Disconnect => self.connected.store(false, Ordering::SeqCst),
            TransportEvent::Encrypt(_) => {}
        }
        let _ = self.events.send(event);
    }

    /// Publish a payload on a service event channel
    pub fn emit_service_event(&self, path: &str, event: &str, payload: Value) -> usize {
        self.channel(path, event).send(payload).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    pub fn auth_payloads(&self) -> Vec<Value> {
        self.auth_payloads.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    fn channel(&self, path: &str, event: &str) -> broadcast::Sender<Value> {
        self.channels
            .entry((path.to_string(), event.to_string()))
            .or_insert_with(|| broadcast::channel(EVENT_CAPACITY).0)
            .clone()
    }

    fn ensure_connected(&self) -> TransportResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> TransportResult<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let bootstrap = self.bootstrap.lock().clone();
        if let Some(wire_key) = bootstrap {
            self.emit(TransportEvent::Encrypt(wire_key));
        }
        self.emit(TransportEvent::Connect);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Disconnect);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn reauthenticate(&self) -> TransportResult<Value> {
        self.ensure_connected()?;
        self.resumes.fetch_add(1, Ordering::SeqCst);
        if self.accept_resume.load(Ordering::SeqCst) {
            Ok(json!({ "accessToken": "stored-token" }))
        } else {
            Err(RemoteError::new("NotAuthenticated", "No accessToken found in storage").with_code(401).into())
        }
    }

    async fn authenticate(&self, payload: Value) -> TransportResult<Value> {
        self.ensure_connected()?;
        self.auth_payloads.lock().push(payload);
        if self.accept_login.load(Ordering::SeqCst) {
            self.accept_resume.store(true, Ordering::SeqCst);
            Ok(json!({ "accessToken": "fresh-token" }))
        } else {
            Err(RemoteError::new("NotAuthenticated", "Invalid login").with_code(401).into())
        }
    }

    async fn identity(&self) -> TransportResult<Value> {
        self.ensure_connected()?;
        Ok(self.identity.lock().clone())
    }

    async fn call(&self, call: RemoteCall) -> TransportResult<Value> {
        self.ensure_connected()?;
        self.calls.lock().push(call);
        let response = self.responses.lock().pop_front();
        match response {
            Some(Ok(value)) => Ok(value),
            Some(Err(remote)) => Err(remote.into()),
            None => Ok(json!({})),
        }
    }

    fn subscribe(&self, path: &str, event: &str) -> TransportResult<broadcast::Receiver<Value>> {
        Ok(self.channel(path, event).subscribe())
    }

    fn transport_type(&self) -> &'static str {
        "memory"
    }
}

/// Fresh RSA key pair plus its public half in wire form, base64(base64(DER))
pub fn generate_bootstrap_key(bits: usize) -> CryptoResult<(RsaPrivateKey, String)> {
    let mut rng = rand::thread_rng();
    let private_key =
        RsaPrivateKey::new(&mut rng, bits).map_err(|e| CryptoError::InvalidBootstrapKey(e.to_string()))?;
    let der = private_key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| CryptoError::InvalidBootstrapKey(e.to_string()))?;
    let wire = STANDARD.encode(STANDARD.encode(der.as_bytes()));
    Ok((private_key, wire))
}
