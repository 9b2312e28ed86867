//! Session Crypto
//!
//! Payload encryption scoped to one session:
//! - the server hands out an RSA bootstrap key on every transport connection
//! - each login generates a fresh AES-128-CBC key, sealed into the login
//!   payload with the bootstrap key
//! - once a key is installed, service queries are sent as `{ "encrypted": ... }`
//!   and every result, error and event shaped that way is decrypted
//!
//! Without a bootstrap key or an installed symmetric key everything passes
//! through unchanged.

pub mod error;
pub mod keys;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, info};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use error::{CryptoError, CryptoResult};
pub use keys::{BootstrapKey, ExportedKey, SymmetricKey, RSA_CHUNK_SIZE};

use crate::validation::AuthDetails;

/// Field carrying an AES ciphertext
pub const ENCRYPTED_FIELD: &str = "encrypted";

/// Field carrying the exported key inside the login payload
pub const KEY_FIELD: &str = "encrypt";

/// Field carrying the RSA-sealed login payload
pub const CHUNKS_FIELD: &str = "chunks";

/// Snapshot of the installed symmetric key
///
/// Calls hold on to the handle they encrypted with, so a key rotation while a
/// request is in flight cannot make its response decrypt with the new key.
#[derive(Debug, Clone)]
pub struct KeyHandle {
    version: u64,
    key: Arc<SymmetricKey>,
}

impl KeyHandle {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Replace `value` by `{ "encrypted": base64(aes(json(value))) }`
    pub fn encrypt_value(&self, value: &Value) -> CryptoResult<Value> {
        let plaintext = serde_json::to_vec(value)?;
        let ciphertext = self.key.encrypt(&plaintext);
        Ok(json!({ ENCRYPTED_FIELD: STANDARD.encode(ciphertext) }))
    }

    /// Decrypt `{ "encrypted": ... }` payloads; anything else is returned as is
    pub fn decrypt_value(&self, value: Value) -> CryptoResult<Value> {
        let Some(ciphertext) = encrypted_payload(&value) else {
            return Ok(value);
        };
        let ciphertext = STANDARD.decode(ciphertext)?;
        let plaintext = self.key.decrypt(&ciphertext)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Ciphertext of a value shaped exactly `{ "encrypted": string }`
pub fn encrypted_payload(value: &Value) -> Option<&str> {
    match value {
        Value::Object(object) if object.len() == 1 => {
            object.get(ENCRYPTED_FIELD).and_then(Value::as_str)
        }
        _ => None,
    }
}

/// Login payload plus the key it carries
pub struct SealedAuth {
    payload: Map<String, Value>,
    pending: Option<SymmetricKey>,
}

impl SealedAuth {
    /// Login payload: `{ "strategy": <strategy>, ...payload }`
    pub fn login_payload(&self, strategy: &str) -> Value {
        let mut payload = Map::new();
        payload.insert("strategy".to_string(), Value::from(strategy));
        for (key, value) in &self.payload {
            payload.insert(key.clone(), value.clone());
        }
        Value::Object(payload)
    }

    /// Whether the payload was sealed with the bootstrap key
    pub fn is_sealed(&self) -> bool {
        self.pending.is_some()
    }

    /// Key to install once the login succeeded
    pub fn into_pending(self) -> Option<SymmetricKey> {
        self.pending
    }
}

/// Key material for one session
pub struct SessionCrypto {
    session_id: u64,
    bootstrap: RwLock<Option<BootstrapKey>>,
    current: RwLock<Option<KeyHandle>>,
    version: AtomicU64,
}

impl SessionCrypto {
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            bootstrap: RwLock::new(None),
            current: RwLock::new(None),
            version: AtomicU64::new(0),
        }
    }

    /// Decode and cache the bootstrap key from an `encrypt` event
    pub fn install_bootstrap(&self, encoded: &str) -> CryptoResult<()> {
        let key = BootstrapKey::from_wire(encoded)?;
        *self.bootstrap.write() = Some(key);
        debug!("Session {}: bootstrap key installed", self.session_id);
        Ok(())
    }

    pub fn set_bootstrap(&self, key: BootstrapKey) {
        *self.bootstrap.write() = Some(key);
    }

    pub fn has_bootstrap(&self) -> bool {
        self.bootstrap.read().is_some()
    }

    pub fn has_key(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn current_key(&self) -> Option<KeyHandle> {
        self.current.read().clone()
    }

    /// Build the login payload for `details`
    ///
    /// With a bootstrap key, a fresh symmetric key is generated and exported
    /// into the `encrypt` field, and the serialised payload is RSA-OAEP sealed
    /// in 60-byte chunks. Without one, the plain details are used.
    pub fn seal_auth(&self, details: &AuthDetails) -> CryptoResult<SealedAuth> {
        let Some(bootstrap) = self.bootstrap.read().clone() else {
            let payload = match serde_json::to_value(details)? {
                Value::Object(object) => object,
                _ => Map::new(),
            };
            return Ok(SealedAuth {
                payload,
                pending: None,
            });
        };

        let key = SymmetricKey::generate();
        let mut plain = match serde_json::to_value(details)? {
            Value::Object(object) => object,
            _ => Map::new(),
        };
        plain.insert(KEY_FIELD.to_string(), serde_json::to_value(key.export())?);

        let serialized = serde_json::to_vec(&plain)?;
        let chunks = bootstrap.seal_chunked(&serialized)?;
        debug!(
            "Session {}: login payload sealed into {} chunks",
            self.session_id,
            chunks.len()
        );

        let mut payload = Map::new();
        payload.insert(CHUNKS_FIELD.to_string(), Value::from(chunks));
        Ok(SealedAuth {
            payload,
            pending: Some(key),
        })
    }

    /// Atomically replace the session key
    pub fn install(&self, key: SymmetricKey) -> KeyHandle {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = KeyHandle {
            version,
            key: Arc::new(key),
        };
        *self.current.write() = Some(handle.clone());
        info!("Session {}: symmetric key v{} installed", self.session_id, version);
        handle
    }

    /// Encrypt with the current key, identity when there is none
    pub fn encrypt_value(&self, value: Value) -> CryptoResult<Value> {
        match self.current_key() {
            Some(handle) => handle.encrypt_value(&value),
            None => Ok(value),
        }
    }

    /// Decrypt with the current key, identity when there is none
    pub fn decrypt_value(&self, value: Value) -> CryptoResult<Value> {
        match self.current_key() {
            Some(handle) => handle.decrypt_value(value),
            None => Ok(value),
        }
    }

    /// Decrypt with the handle a request was sent with, falling back to the current key
    pub fn decrypt_with(&self, handle: Option<&KeyHandle>, value: Value) -> CryptoResult<Value> {
        match handle {
            Some(handle) => handle.decrypt_value(value),
            None => self.decrypt_value(value),
        }
    }

    /// Forget all key material
    pub fn clear(&self) {
        *self.current.write() = None;
        *self.bootstrap.write() = None;
    }
}

impl std::fmt::Debug for SessionCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCrypto")
            .field("session_id", &self.session_id)
            .field("has_bootstrap", &self.has_bootstrap())
            .field("key_version", &self.current_key().map(|h| h.version))
            .finish()
    }
}
