//! Key material: the per-session AES-128-CBC key and the server's RSA bootstrap key.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use rsa::{pkcs8::DecodePublicKey, Oaep, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{CryptoError, CryptoResult};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const KEY_LEN: usize = 16;
pub const IV_LEN: usize = 16;

/// Plaintext chunk size for RSA-OAEP sealing
pub const RSA_CHUNK_SIZE: usize = 60;

/// AES-128-CBC key and IV for one session
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

/// Key and IV in the form embedded into the login payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedKey {
    pub key: String,
    pub iv: String,
}

impl SymmetricKey {
    /// Generate a fresh random key and IV
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    pub fn from_parts(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Base64 export of the raw key and IV
    pub fn export(&self) -> ExportedKey {
        ExportedKey {
            key: STANDARD.encode(self.key),
            iv: STANDARD.encode(self.iv),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes128CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        Aes128CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey").finish_non_exhaustive()
    }
}

/// Server public key delivered on the `encrypt` transport event
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapKey {
    key: RsaPublicKey,
}

impl BootstrapKey {
    /// Decode the wire form: base64(base64(DER SubjectPublicKeyInfo))
    pub fn from_wire(encoded: &str) -> CryptoResult<Self> {
        let inner = STANDARD.decode(encoded.trim())?;
        let der = STANDARD.decode(&inner)?;
        let key = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| CryptoError::InvalidBootstrapKey(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn from_public_key(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// RSA-OAEP encrypt `plaintext` in independent fixed-size chunks
    pub fn seal_chunked(&self, plaintext: &[u8]) -> CryptoResult<Vec<String>> {
        let mut rng = rand::thread_rng();

        plaintext
            .chunks(RSA_CHUNK_SIZE)
            .map(|chunk| {
                self.key
                    .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
                    .map(|ciphertext| STANDARD.encode(ciphertext))
                    .map_err(|e| CryptoError::Encrypt(e.to_string()))
            })
            .collect()
    }
}
