//! Crypto Error Types

use thiserror::Error;

/// Session crypto errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid bootstrap key: {0}")]
    InvalidBootstrapKey(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Invalid base64 payload: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
