//! Remote Services
//!
//! One [`EndpointProxy`] per remote path. Proxies share a [`ServiceContext`]
//! owned by the connection manager, which holds the wired transport, the
//! session crypto and the path-keyed hook registry.

pub mod hooks;
pub mod path;
pub mod proxy;

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

pub use hooks::{HookRegistry, ServiceHooks};
pub use path::{ApiPath, Scope};
pub use proxy::{EndpointProxy, Subscription};

use crate::crypto::{CryptoError, SessionCrypto};
use crate::transport::{Transport, TransportError};

/// Service call errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("No Service")]
    NoService,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Result type alias for service calls
pub type ServiceResult<T> = Result<T, ServiceError>;

/// State shared by every proxy of one connection
pub struct ServiceContext {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    crypto: Arc<SessionCrypto>,
    hooks: HookRegistry,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    development: bool,
}

impl ServiceContext {
    pub fn new(crypto: Arc<SessionCrypto>, development: bool) -> Self {
        Self {
            transport: RwLock::new(None),
            crypto,
            hooks: HookRegistry::new(),
            listeners: Mutex::new(Vec::new()),
            development,
        }
    }

    /// Make the transport available to proxies
    pub fn wire(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = Some(transport);
    }

    /// Withdraw the transport, cancel every listener and drop the hooks
    pub fn unwire(&self) {
        *self.transport.write() = None;
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
        self.hooks.clear();
    }

    pub fn is_wired(&self) -> bool {
        self.transport.read().is_some()
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    pub fn crypto(&self) -> &Arc<SessionCrypto> {
        &self.crypto
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub(crate) fn hooks_for(&self, path: &str) -> Arc<ServiceHooks> {
        self.hooks.hooks_for(path, &self.crypto, self.development)
    }

    pub(crate) fn track_listener(&self, handle: JoinHandle<()>) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|handle| !handle.is_finished());
        listeners.push(handle);
    }

    /// Number of live event listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().iter().filter(|h| !h.is_finished()).count()
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("wired", &self.is_wired())
            .field("crypto", &self.crypto)
            .field("development", &self.development)
            .finish()
    }
}
