//! AES-256-GCM encryption of single JSON values.
//!
//! Each value gets its own random nonce. Ciphertext, nonce and authentication
//! tag are stored separately, base64 encoded. The field name is bound in as
//! associated data so a ciphertext cannot be moved to another field.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::key::EncryptionKey;
use crate::error::DomainError;

/// Size of the AES-GCM nonce in bytes (96 bits).
const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes.
const TAG_SIZE: usize = 16;

/// An encrypted field as it appears inside a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    /// Encrypted JSON encoding of the original value (base64).
    pub ciphertext: String,
    /// Nonce used for this value (base64).
    pub nonce: String,
    /// Authentication tag (base64).
    pub tag: String,
    /// Format version for future algorithm changes.
    #[serde(default = "default_version")]
    pub version: u8,
}

fn default_version() -> u8 {
    1
}

fn decode(label: &str, encoded: &str) -> Result<Vec<u8>, DomainError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| DomainError::Decryption(format!("invalid {label} encoding: {e}")))
}

fn cipher(key: &EncryptionKey) -> Result<Aes256Gcm, DomainError> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| DomainError::Encryption(format!("failed to create cipher: {e}")))
}

/// Encrypts `value` for the field `field_name`.
///
/// # Errors
///
/// Returns `DomainError::Encryption` if the value cannot be encoded or the
/// cipher fails.
pub fn encrypt_value(
    value: &serde_json::Value,
    key: &EncryptionKey,
    field_name: &str,
) -> Result<EncryptedField, DomainError> {
    let mut buffer = serde_json::to_vec(value)
        .map_err(|e| DomainError::Encryption(format!("cannot encode field {field_name}: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let tag = cipher(key)?
        .encrypt_in_place_detached(nonce, field_name.as_bytes(), &mut buffer)
        .map_err(|e| DomainError::Encryption(format!("encryption of {field_name} failed: {e}")))?;

    Ok(EncryptedField {
        ciphertext: STANDARD.encode(&buffer),
        nonce: STANDARD.encode(nonce_bytes),
        tag: STANDARD.encode(tag),
        version: 1,
    })
}

/// Decrypts a field produced by [`encrypt_value`].
///
/// # Errors
///
/// Returns `DomainError::Decryption` if the encoding is invalid or the tag
/// does not verify (wrong key, tampered data, wrong field).
pub fn decrypt_value(
    encrypted: &EncryptedField,
    key: &EncryptionKey,
    field_name: &str,
) -> Result<serde_json::Value, DomainError> {
    if encrypted.version != 1 {
        return Err(DomainError::Decryption(format!(
            "unsupported encryption version: {}",
            encrypted.version
        )));
    }

    let nonce_bytes = decode("nonce", &encrypted.nonce)?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(DomainError::Decryption(format!(
            "invalid nonce size: expected {NONCE_SIZE}, got {}",
            nonce_bytes.len()
        )));
    }
    let tag_bytes = decode("tag", &encrypted.tag)?;
    if tag_bytes.len() != TAG_SIZE {
        return Err(DomainError::Decryption(format!(
            "invalid tag size: expected {TAG_SIZE}, got {}",
            tag_bytes.len()
        )));
    }
    let mut buffer = decode("ciphertext", &encrypted.ciphertext)?;

    cipher(key)?
        .decrypt_in_place_detached(
            Nonce::from_slice(&nonce_bytes),
            field_name.as_bytes(),
            &mut buffer,
            Tag::from_slice(&tag_bytes),
        )
        .map_err(|_| {
            DomainError::Decryption(format!(
                "authentication of {field_name} failed: invalid key or corrupted data"
            ))
        })?;

    serde_json::from_slice(&buffer)
        .map_err(|e| DomainError::Decryption(format!("invalid plaintext for {field_name}: {e}")))
}
