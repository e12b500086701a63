//! Requests to change state.

use uuid::Uuid;

/// A request handled against one or more aggregates.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// Stable name used in logs, e.g. `budget.create_category`.
    fn command_type(&self) -> &'static str;

    /// Caller-supplied id stamped on every event the command appends,
    /// registry events included.
    fn request_id(&self) -> Uuid;
}
