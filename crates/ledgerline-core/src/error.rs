//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No event was ever appended to the stream.
    #[error("stream not found: {0}")]
    StreamNotFound(Uuid),

    /// The stream is known (a snapshot references it) but holds no events.
    #[error("stream {0} exists but contains no events")]
    StreamEmpty(Uuid),

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on stream {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// A uniqueness registry is already claimed by someone else.
    #[error("value in scope '{scope}' is already claimed by {claimant} (registry {registry_id})")]
    UniquenessViolation {
        /// The uniqueness scope, e.g. `category-name:<owner>`.
        scope: String,
        /// The deterministic registry stream id.
        registry_id: Uuid,
        /// The current claimant.
        claimant: Uuid,
    },

    /// An event name/version pair the decoder does not know.
    #[error("unknown event type '{event_name}' (schema version {event_version})")]
    UnknownEventType {
        /// The stored event name.
        event_name: String,
        /// The stored payload schema version.
        event_version: i32,
    },

    /// Encrypting a personal-data field failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decrypting a personal-data field failed (bad tag, bad encoding, wrong key).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The owner's key has been deleted; their personal data is unrecoverable.
    #[error("encryption key for owner {0} has been erased")]
    KeyErased(Uuid),

    /// A projection replay batch failed; earlier batches stay committed.
    #[error("replay of '{projection}' failed in batch {batch} after position {offset} (event {event_id:?}): {reason}")]
    ReplayBatchFailure {
        /// The projection being replayed.
        projection: String,
        /// One-based number of the failing batch.
        batch: u64,
        /// Global position the failing batch started after; resume from here.
        offset: i64,
        /// The event that failed, if known.
        event_id: Option<Uuid>,
        /// Underlying failure.
        reason: String,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// Payload or snapshot (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transport or transaction failure in the backing store.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
