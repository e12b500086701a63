//! Uniqueness registries.
//!
//! A registry is an ordinary event-sourced aggregate whose id is derived from
//! a `(scope, value)` pair, so every attempt to claim the same value addresses
//! the same stream. The optimistic version check on that stream is what makes
//! two concurrent claims exclusive; no other lock exists.
//!
//! Registry events carry the scope, the registry id and the claimant only.
//! The claimed value itself is never written, so an e-mail address used as a
//! unique key does not leak into the log in clear text.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::aggregate::{AggregateRoot, EventRecorder};
use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::{DomainEvent, Envelope, decode_payload, encode_payload, unknown_event};
use crate::store::{AggregateStore, UnitOfWork};

/// Event name of a claim.
pub const VALUE_CLAIMED: &str = "registry.value_claimed";
/// Event name of a release.
pub const VALUE_RELEASED: &str = "registry.value_released";

/// Normalizes a candidate value: surrounding whitespace is ignored and the
/// comparison is case-insensitive.
#[must_use]
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// The deterministic stream id of the registry for `value` within `scope`.
#[must_use]
pub fn registry_id(scope: &str, value: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize(value).as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Payload of [`VALUE_CLAIMED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueClaimed {
    /// Registry stream, derived from the scope and the normalized value.
    pub registry_id: Uuid,
    /// Namespace the value is unique within.
    pub scope: String,
    /// Aggregate that now holds the value.
    pub claimant: Uuid,
}

/// Payload of [`VALUE_RELEASED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueReleased {
    /// Registry stream, derived from the scope and the normalized value.
    pub registry_id: Uuid,
    /// Namespace the value was unique within.
    pub scope: String,
    /// Aggregate that gave the value up.
    pub claimant: Uuid,
}

/// Events of a [`UniquenessRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Claimed(ValueClaimed),
    Released(ValueReleased),
}

impl DomainEvent for RegistryEvent {
    fn event_name(&self) -> &'static str {
        match self {
            Self::Claimed(_) => VALUE_CLAIMED,
            Self::Released(_) => VALUE_RELEASED,
        }
    }

    fn encode(&self) -> Result<serde_json::Value, DomainError> {
        match self {
            Self::Claimed(p) => encode_payload(p),
            Self::Released(p) => encode_payload(p),
        }
    }

    fn decode(
        event_name: &str,
        event_version: i32,
        payload: serde_json::Value,
    ) -> Result<Self, DomainError> {
        match (event_name, event_version) {
            (VALUE_CLAIMED, 1) => Ok(Self::Claimed(decode_payload(payload)?)),
            (VALUE_RELEASED, 1) => Ok(Self::Released(decode_payload(payload)?)),
            _ => Err(unknown_event(event_name, event_version)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryState {
    scope: Option<String>,
    claimant: Option<Uuid>,
}

/// Who currently holds one unique value.
#[derive(Debug)]
pub struct UniquenessRegistry {
    id: Uuid,
    version: i64,
    scope: Option<String>,
    claimant: Option<Uuid>,
    recorder: EventRecorder<RegistryEvent>,
}

impl UniquenessRegistry {
    /// The current claimant, including claims raised but not yet saved.
    #[must_use]
    pub fn claimant(&self) -> Option<Uuid> {
        self.claimant
    }

    /// The scope this registry was first claimed in.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Fails unless the value is free or held by `except_for`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UniquenessViolation` naming the current claimant.
    pub fn check_available(&self, scope: &str, except_for: Option<Uuid>) -> Result<(), DomainError> {
        match self.claimant {
            Some(claimant) if Some(claimant) != except_for => Err(DomainError::UniquenessViolation {
                scope: scope.to_owned(),
                registry_id: self.id,
                claimant,
            }),
            _ => Ok(()),
        }
    }

    /// Claims the value for `claimant`. Claiming a value one already holds
    /// raises nothing.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UniquenessViolation` if someone else holds it.
    pub fn claim(
        &mut self,
        scope: &str,
        claimant: Uuid,
        request_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.check_available(scope, Some(claimant))?;
        if self.claimant == Some(claimant) {
            return Ok(());
        }
        let metadata = self.next_metadata(request_id, clock);
        self.raise(
            metadata,
            RegistryEvent::Claimed(ValueClaimed {
                registry_id: self.id,
                scope: scope.to_owned(),
                claimant,
            }),
        );
        Ok(())
    }

    /// Releases the value if `claimant` holds it; returns whether it did.
    pub fn release(&mut self, claimant: Uuid, request_id: Uuid, clock: &dyn Clock) -> bool {
        if self.claimant != Some(claimant) {
            return false;
        }
        let scope = self.scope.clone().unwrap_or_default();
        let metadata = self.next_metadata(request_id, clock);
        self.raise(
            metadata,
            RegistryEvent::Released(ValueReleased {
                registry_id: self.id,
                scope,
                claimant,
            }),
        );
        true
    }
}

impl AggregateRoot for UniquenessRegistry {
    type Event = RegistryEvent;
    const AGGREGATE_TYPE: &'static str = "uniqueness_registry";

    fn empty(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            scope: None,
            claimant: None,
            recorder: EventRecorder::default(),
        }
    }

    fn restore(id: Uuid, version: i64, state: serde_json::Value) -> Result<Self, DomainError> {
        let state: RegistryState = decode_payload(state)?;
        Ok(Self {
            id,
            version,
            scope: state.scope,
            claimant: state.claimant,
            recorder: EventRecorder::default(),
        })
    }

    fn snapshot_state(&self) -> Result<serde_json::Value, DomainError> {
        encode_payload(&RegistryState {
            scope: self.scope.clone(),
            claimant: self.claimant,
        })
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Envelope<RegistryEvent>) {
        match &event.kind {
            RegistryEvent::Claimed(p) => {
                self.scope = Some(p.scope.clone());
                self.claimant = Some(p.claimant);
            }
            RegistryEvent::Released(_) => self.claimant = None,
        }
        self.version = event.metadata.stream_version;
    }

    fn recorder(&self) -> &EventRecorder<RegistryEvent> {
        &self.recorder
    }

    fn recorder_mut(&mut self) -> &mut EventRecorder<RegistryEvent> {
        &mut self.recorder
    }
}

/// Coordinates the registries touched by one operation.
///
/// Each registry is loaded at most once per builder, so a value claimed
/// earlier in the same operation is already seen as taken.
pub struct RegistryBuilder<'s, 'a> {
    store: &'s AggregateStore<'a>,
    request_id: Uuid,
    registries: Vec<UniquenessRegistry>,
}

impl std::fmt::Debug for RegistryBuilder<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("request_id", &self.request_id)
            .field("registries", &self.registries)
            .finish_non_exhaustive()
    }
}

impl<'s, 'a> RegistryBuilder<'s, 'a> {
    /// A builder for the operation identified by `request_id`.
    #[must_use]
    pub fn new(store: &'s AggregateStore<'a>, request_id: Uuid) -> Self {
        Self {
            store,
            request_id,
            registries: Vec::new(),
        }
    }

    /// The registry for `value` in `scope`: loaded once, or fresh if no claim
    /// was ever made.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StreamEmpty` if the registry stream is known but
    /// has no events (a storage defect), or any load error.
    pub async fn load_or_create(
        &mut self,
        scope: &str,
        value: &str,
    ) -> Result<&mut UniquenessRegistry, DomainError> {
        let id = registry_id(scope, value);
        let index = match self.registries.iter().position(|r| r.id == id) {
            Some(index) => index,
            None => {
                let registry = match self.store.load::<UniquenessRegistry>(id, None).await {
                    Ok(registry) => registry,
                    Err(DomainError::StreamNotFound(_)) => UniquenessRegistry::empty(id),
                    Err(e) => return Err(e),
                };
                self.registries.push(registry);
                self.registries.len() - 1
            }
        };
        Ok(&mut self.registries[index])
    }

    /// Fails unless `value` is free in `scope` or already held by `except_for`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UniquenessViolation`, or a load error.
    pub async fn ensure_available(
        &mut self,
        scope: &str,
        value: &str,
        except_for: Option<Uuid>,
    ) -> Result<(), DomainError> {
        self.load_or_create(scope, value)
            .await?
            .check_available(scope, except_for)
    }

    /// Claims `value` in `scope` for `claimant`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UniquenessViolation` if another claimant holds it.
    pub async fn register(&mut self, scope: &str, value: &str, claimant: Uuid) -> Result<(), DomainError> {
        let clock = self.store.clock();
        let request_id = self.request_id;
        let registry = self.load_or_create(scope, value).await?;
        registry.claim(scope, claimant, request_id, clock)?;
        tracing::debug!(scope, registry_id = %registry.id, %claimant, "value claimed");
        Ok(())
    }

    /// Releases `value` in `scope` if `claimant` holds it.
    ///
    /// # Errors
    ///
    /// Returns a load error.
    pub async fn release(&mut self, scope: &str, value: &str, claimant: Uuid) -> Result<(), DomainError> {
        let clock = self.store.clock();
        let request_id = self.request_id;
        let registry = self.load_or_create(scope, value).await?;
        if registry.release(claimant, request_id, clock) {
            tracing::debug!(scope, registry_id = %registry.id, %claimant, "value released");
        }
        Ok(())
    }

    /// Registries that accumulated events during this operation.
    pub fn registry_aggregates_to_persist(&self) -> impl Iterator<Item = &UniquenessRegistry> {
        self.registries
            .iter()
            .filter(|r| !r.uncommitted_events().is_empty())
    }

    /// Adds every changed registry to `unit`.
    ///
    /// # Errors
    ///
    /// Propagates [`AggregateStore::track`] errors.
    pub async fn track(&self, unit: &mut UnitOfWork) -> Result<(), DomainError> {
        for registry in self.registry_aggregates_to_persist() {
            self.store.track(unit, registry).await?;
        }
        Ok(())
    }

    /// Marks every registry as saved after a successful commit.
    pub fn mark_committed(&mut self) {
        for registry in &mut self.registries {
            registry.clear_uncommitted_events();
        }
    }
}
