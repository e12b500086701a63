//! Domain event abstractions.
//!
//! A bounded context models its events as one enum implementing
//! [`DomainEvent`]. The enum is the closed set of kinds an aggregate
//! understands; decoding dispatches on the stored `event_name` tag and rejects
//! anything else with [`DomainError::UnknownEventType`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::repository::StoredEvent;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Stream (aggregate) this event belongs to.
    pub stream_id: Uuid,
    /// Monotonically increasing version within the stream.
    pub stream_version: i64,
    /// Request that caused this event, for causality and idempotency.
    pub request_id: Uuid,
    /// Entity the event is attributed to; selects the encryption key.
    pub owner_id: Option<Uuid>,
    /// Timestamp of event creation.
    pub occurred_on: DateTime<Utc>,
    /// Free-form metadata.
    pub meta_data: serde_json::Value,
}

impl EventMetadata {
    /// Creates metadata for a new event at `stream_version`.
    #[must_use]
    pub fn new(
        stream_id: Uuid,
        stream_version: i64,
        request_id: Uuid,
        occurred_on: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            stream_id,
            stream_version,
            request_id,
            owner_id: None,
            occurred_on,
            meta_data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Attributes the event to `owner_id`.
    #[must_use]
    pub fn owned_by(mut self, owner_id: Uuid) -> Self {
        self.owner_id = Some(owner_id);
        self
    }
}

/// Sum type of the events one aggregate type produces and consumes.
pub trait DomainEvent: Clone + Send + Sync + std::fmt::Debug + Sized {
    /// Logical type tag stored as `event_name`.
    fn event_name(&self) -> &'static str;

    /// Schema version of the payload written for this kind.
    fn event_version(&self) -> i32 {
        1
    }

    /// Serializes the payload.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    fn encode(&self) -> Result<serde_json::Value, DomainError>;

    /// Decodes a payload by its stored tag, upcasting older schema versions.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownEventType` for a tag/version the type
    /// does not know, or `DomainError::Serialization` for a malformed payload.
    fn decode(
        event_name: &str,
        event_version: i32,
        payload: serde_json::Value,
    ) -> Result<Self, DomainError>;
}

/// Encodes any serializable payload struct.
///
/// # Errors
///
/// Returns `DomainError::Serialization` if encoding fails.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<serde_json::Value, DomainError> {
    Ok(serde_json::to_value(payload)?)
}

/// Decodes a payload struct.
///
/// # Errors
///
/// Returns `DomainError::Serialization` if the JSON does not match `T`.
pub fn decode_payload<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T, DomainError> {
    Ok(serde_json::from_value(payload)?)
}

/// The error every decoder returns from its fallback arm.
#[must_use]
pub fn unknown_event(event_name: &str, event_version: i32) -> DomainError {
    DomainError::UnknownEventType {
        event_name: event_name.to_owned(),
        event_version,
    }
}

/// A domain event together with its metadata.
#[derive(Debug, Clone)]
pub struct Envelope<E: DomainEvent> {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: E,
}

impl<E: DomainEvent> Envelope<E> {
    /// Converts the event into its storage representation.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    pub fn to_stored(&self) -> Result<StoredEvent, DomainError> {
        let meta = &self.metadata;
        Ok(StoredEvent {
            event_id: meta.event_id,
            stream_id: meta.stream_id,
            stream_version: meta.stream_version,
            event_name: self.kind.event_name().to_owned(),
            event_version: self.kind.event_version(),
            payload: self.kind.encode()?,
            occurred_on: meta.occurred_on,
            request_id: meta.request_id,
            owner_id: meta.owner_id,
            meta_data: meta.meta_data.clone(),
        })
    }

    /// Rebuilds a typed event from a (decrypted) stored event.
    ///
    /// # Errors
    ///
    /// Propagates the decoder's `UnknownEventType`/`Serialization` errors.
    pub fn from_stored(stored: &StoredEvent) -> Result<Self, DomainError> {
        let kind = E::decode(
            &stored.event_name,
            stored.event_version,
            stored.payload.clone(),
        )?;
        Ok(Self {
            metadata: EventMetadata {
                event_id: stored.event_id,
                stream_id: stored.stream_id,
                stream_version: stored.stream_version,
                request_id: stored.request_id,
                owner_id: stored.owner_id,
                occurred_on: stored.occurred_on,
                meta_data: stored.meta_data.clone(),
            },
            kind,
        })
    }
}
