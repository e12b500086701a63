//! Encrypts and decrypts the personal-data fields of stored events.

use super::cipher::{EncryptedField, decrypt_value, encrypt_value};
use super::key::KeyRing;
use super::schema::PersonalDataSchema;
use crate::error::DomainError;
use crate::repository::StoredEvent;

/// Applies a [`PersonalDataSchema`] to stored events.
#[derive(Debug, Clone, Default)]
pub struct FieldEncryptor {
    schema: PersonalDataSchema,
}

impl FieldEncryptor {
    /// Creates an encryptor for `schema`.
    #[must_use]
    pub fn new(schema: PersonalDataSchema) -> Self {
        Self { schema }
    }

    /// The schema in use.
    #[must_use]
    pub fn schema(&self) -> &PersonalDataSchema {
        &self.schema
    }

    /// Encrypts every personal-data field of `event` under its owner's key,
    /// creating the key on the owner's first personal-data write. The payload
    /// is replaced only once every field is encrypted.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Encryption` if the event has personal fields but
    /// no owner, a non-object payload, or the cipher fails.
    pub async fn encrypt(&self, event: &mut StoredEvent, keys: &KeyRing<'_>) -> Result<(), DomainError> {
        let fields = self.schema.fields_for(&event.event_name);
        if fields.is_empty() {
            return Ok(());
        }
        let owner_id = event.owner_id.ok_or_else(|| {
            DomainError::Encryption(format!(
                "{} carries personal data but has no owner",
                event.event_name
            ))
        })?;
        let Some(payload) = event.payload.as_object() else {
            return Err(DomainError::Encryption(format!(
                "{} payload is not an object",
                event.event_name
            )));
        };

        let key = keys.key_for_write(owner_id).await?;
        let mut encrypted = payload.clone();
        for &field in fields {
            let Some(value) = encrypted.get_mut(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let sealed = encrypt_value(value, &key, field)?;
            *value = serde_json::to_value(sealed)
                .map_err(|e| DomainError::Encryption(format!("cannot encode {field}: {e}")))?;
        }
        event.payload = serde_json::Value::Object(encrypted);
        Ok(())
    }

    /// Restores the plaintext of every personal-data field of `event`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::KeyErased` if the owner's key is gone, or
    /// `DomainError::Decryption` if a field is malformed or fails
    /// authentication.
    pub async fn decrypt(&self, event: &mut StoredEvent, keys: &KeyRing<'_>) -> Result<(), DomainError> {
        let fields = self.schema.fields_for(&event.event_name);
        if fields.is_empty() {
            return Ok(());
        }
        let owner_id = event.owner_id.ok_or_else(|| {
            DomainError::Decryption(format!(
                "{} carries personal data but has no owner",
                event.event_name
            ))
        })?;
        let Some(payload) = event.payload.as_object() else {
            return Err(DomainError::Decryption(format!(
                "{} payload is not an object",
                event.event_name
            )));
        };

        let key = keys.key_for_read(owner_id).await?;
        let mut decrypted = payload.clone();
        for &field in fields {
            let Some(value) = decrypted.get_mut(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let sealed: EncryptedField = serde_json::from_value(value.clone()).map_err(|e| {
                DomainError::Decryption(format!(
                    "{field} of {} is not an encrypted field: {e}",
                    event.event_name
                ))
            })?;
            *value = decrypt_value(&sealed, &key, field)?;
        }
        event.payload = serde_json::Value::Object(decrypted);
        Ok(())
    }
}
