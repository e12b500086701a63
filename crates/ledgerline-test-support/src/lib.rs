//! Shared test doubles and utilities for the Ledgerline engine.

mod clock;
mod keys;
mod projection;
mod repository;
mod snapshot;

pub use clock::{FixedClock, SteppingClock};
pub use keys::InMemoryKeyManager;
pub use projection::{InMemoryProjection, ProjectedRow};
pub use repository::{
    FailingConsumer, FailingEventRepository, InMemoryEventStore, RecordingConsumer,
};
pub use snapshot::{FailingSnapshotStore, InMemorySnapshotStore};
