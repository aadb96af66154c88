// Password-based encryption for private chat messages.
//
// AES-256-GCM keyed with SHA-256(password). The stored form is
// base64(nonce || ciphertext) with a fresh 96-bit nonce per message.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("encrypted payload is too short")]
    Truncated,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed (wrong password or corrupted data)")]
    Decrypt,

    #[error("decrypted data is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn cipher(password: &str) -> Aes256Gcm {
    let digest = Sha256::digest(password.as_bytes());
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest))
}

pub fn encrypt(plaintext: &str, password: &str) -> Result<String, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher(password)
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;

    let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(payload))
}

pub fn decrypt(payload: &str, password: &str) -> Result<String, CryptoError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
    if bytes.len() <= NONCE_LEN {
        return Err(CryptoError::Truncated);
    }
    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
    let plain = cipher(password)
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decrypt)?;
    Ok(String::from_utf8(plain)?)
}
