//! Encryption hooks, attached once per remote path.

use dashmap::DashMap;
use log::{trace, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::crypto::{encrypted_payload, CryptoResult, KeyHandle, SessionCrypto};
use crate::transport::{RemoteCall, TransportError};

/// Before / after / error hooks for one path
pub struct ServiceHooks {
    path: String,
    crypto: Arc<SessionCrypto>,
    development: bool,
}

impl ServiceHooks {
    fn new(path: &str, crypto: Arc<SessionCrypto>, development: bool) -> Self {
        Self {
            path: path.to_string(),
            crypto,
            development,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Encrypt the query with the current key and return the key used
    pub fn before(&self, mut call: RemoteCall) -> CryptoResult<(RemoteCall, Option<KeyHandle>)> {
        if self.development {
            trace!("{} {} query: {:?}", call.method, self.path, call.query);
        }

        let key = self.crypto.current_key();
        if let (Some(handle), Some(query)) = (&key, call.query.take()) {
            call.query = Some(handle.encrypt_value(&query)?);
        }
        Ok((call, key))
    }

    /// Decrypt a result with the key its request was sent with
    pub fn after(&self, key: Option<&KeyHandle>, result: Value) -> CryptoResult<Value> {
        let result = self.crypto.decrypt_with(key, result)?;
        if self.development {
            trace!("{} result: {}", self.path, result);
        }
        Ok(result)
    }

    /// Decrypt a remote error
    ///
    /// Covers `data` and a `message` that arrived as a serialised
    /// `{encrypted}` payload; name and code are never encrypted.
    pub fn error(&self, key: Option<&KeyHandle>, error: TransportError) -> TransportError {
        match error {
            TransportError::Remote(mut remote) => {
                if let Some(data) = remote.data.take() {
                    remote.data = Some(match self.crypto.decrypt_with(key, data.clone()) {
                        Ok(decrypted) => decrypted,
                        Err(e) => {
                            warn!("Could not decrypt error data on {}: {}", self.path, e);
                            data
                        }
                    });
                }
                remote.message = self.reveal_message(key, remote.message);
                TransportError::Remote(remote)
            }
            other => other,
        }
    }

    fn reveal_message(&self, key: Option<&KeyHandle>, message: String) -> String {
        let Ok(sealed) = serde_json::from_str::<Value>(&message) else {
            return message;
        };
        if encrypted_payload(&sealed).is_none() {
            return message;
        }

        match self.crypto.decrypt_with(key, sealed) {
            Ok(Value::String(text)) => text,
            Ok(Value::Object(fields)) => {
                let text = fields.get("message").and_then(Value::as_str).map(str::to_string);
                text.unwrap_or_else(|| Value::Object(fields).to_string())
            }
            Ok(other) => other.to_string(),
            Err(e) => {
                warn!("Could not decrypt error message on {}: {}", self.path, e);
                message
            }
        }
    }

    /// Decrypt a subscribed event payload
    pub fn event(&self, payload: Value) -> CryptoResult<Value> {
        self.crypto.decrypt_value(payload)
    }
}

/// Path-keyed hook registry
pub struct HookRegistry {
    hooks: DashMap<String, Arc<ServiceHooks>>,
    registrations: AtomicUsize,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: DashMap::new(),
            registrations: AtomicUsize::new(0),
        }
    }

    /// Hooks for `path`, registering them on first use
    pub fn hooks_for(&self, path: &str, crypto: &Arc<SessionCrypto>, development: bool) -> Arc<ServiceHooks> {
        self.hooks
            .entry(path.to_string())
            .or_insert_with(|| {
                self.registrations.fetch_add(1, Ordering::SeqCst);
                Arc::new(ServiceHooks::new(path, Arc::clone(crypto), development))
            })
            .clone()
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.hooks.contains_key(path)
    }

    /// Number of hook sets ever registered
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.hooks.clear();
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
