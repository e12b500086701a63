//! Domain events for the budget context.

use ledgerline_core::crypto::PersonalDataSchema;
use ledgerline_core::error::DomainError;
use ledgerline_core::event::{DomainEvent, decode_payload, encode_payload, unknown_event};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type constant for category creation.
pub const CATEGORY_CREATED: &str = "budget.category_created";
/// Event type constant for category rename.
pub const CATEGORY_RENAMED: &str = "budget.category_renamed";
/// Event type constant for category archival.
pub const CATEGORY_ARCHIVED: &str = "budget.category_archived";
/// Event type constant for member registration.
pub const MEMBER_REGISTERED: &str = "budget.member_registered";
/// Event type constant for a member e-mail change.
pub const MEMBER_EMAIL_CHANGED: &str = "budget.member_email_changed";
/// Event type constant for member erasure.
pub const MEMBER_ERASED: &str = "budget.member_erased";

/// Group assigned to categories created before groups existed.
pub const DEFAULT_GROUP: &str = "General";

/// Every event name this context writes.
pub const KNOWN_EVENT_NAMES: &[&str] = &[
    CATEGORY_CREATED,
    CATEGORY_RENAMED,
    CATEGORY_ARCHIVED,
    MEMBER_REGISTERED,
    MEMBER_EMAIL_CHANGED,
    MEMBER_ERASED,
];

/// Payload fields holding personal data, per event.
pub const PERSONAL_DATA: &[(&str, &[&str])] = &[
    (MEMBER_REGISTERED, &["email", "display_name"]),
    (MEMBER_EMAIL_CHANGED, &["email"]),
];

/// The validated personal-data schema of this context.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the schema names an unknown event or
/// repeats an entry.
pub fn personal_data_schema() -> Result<PersonalDataSchema, DomainError> {
    let schema = PersonalDataSchema::new(PERSONAL_DATA)?;
    schema.validate_against(KNOWN_EVENT_NAMES)?;
    Ok(schema)
}

/// Emitted when a category is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCreated {
    pub category_id: Uuid,
    /// The budget owner the category belongs to.
    pub owner_id: Uuid,
    pub name: String,
    pub group: String,
}

/// First schema of `budget.category_created`, before groups.
#[derive(Debug, Deserialize)]
struct CategoryCreatedV1 {
    category_id: Uuid,
    owner_id: Uuid,
    name: String,
}

impl From<CategoryCreatedV1> for CategoryCreated {
    fn from(v1: CategoryCreatedV1) -> Self {
        Self {
            category_id: v1.category_id,
            owner_id: v1.owner_id,
            name: v1.name,
            group: DEFAULT_GROUP.to_owned(),
        }
    }
}

/// Emitted when a category is renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRenamed {
    pub category_id: Uuid,
    pub name: String,
}

/// Emitted when a category is archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryArchived {
    pub category_id: Uuid,
}

/// Events of the `Category` aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryEvent {
    /// A category has been created.
    Created(CategoryCreated),
    /// A category has been renamed.
    Renamed(CategoryRenamed),
    /// A category has been archived.
    Archived(CategoryArchived),
}

impl DomainEvent for CategoryEvent {
    fn event_name(&self) -> &'static str {
        match self {
            Self::Created(_) => CATEGORY_CREATED,
            Self::Renamed(_) => CATEGORY_RENAMED,
            Self::Archived(_) => CATEGORY_ARCHIVED,
        }
    }

    fn event_version(&self) -> i32 {
        match self {
            Self::Created(_) => 2,
            Self::Renamed(_) | Self::Archived(_) => 1,
        }
    }

    fn encode(&self) -> Result<serde_json::Value, DomainError> {
        match self {
            Self::Created(p) => encode_payload(p),
            Self::Renamed(p) => encode_payload(p),
            Self::Archived(p) => encode_payload(p),
        }
    }

    fn decode(
        event_name: &str,
        event_version: i32,
        payload: serde_json::Value,
    ) -> Result<Self, DomainError> {
        match (event_name, event_version) {
            (CATEGORY_CREATED, 1) => Ok(Self::Created(
                decode_payload::<CategoryCreatedV1>(payload)?.into(),
            )),
            (CATEGORY_CREATED, 2) => Ok(Self::Created(decode_payload(payload)?)),
            (CATEGORY_RENAMED, 1) => Ok(Self::Renamed(decode_payload(payload)?)),
            (CATEGORY_ARCHIVED, 1) => Ok(Self::Archived(decode_payload(payload)?)),
            _ => Err(unknown_event(event_name, event_version)),
        }
    }
}

/// Emitted when a member registers. `email` and `display_name` are stored
/// encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRegistered {
    pub member_id: Uuid,
    pub email: String,
    pub display_name: String,
}

/// Emitted when a member changes e-mail address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEmailChanged {
    pub member_id: Uuid,
    pub email: String,
}

/// Emitted right before a member's key is destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberErased {
    pub member_id: Uuid,
}

/// Events of the `Member` aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberEvent {
    /// A member has registered.
    Registered(MemberRegistered),
    /// A member's e-mail address has changed.
    EmailChanged(MemberEmailChanged),
    /// A member's personal data has been erased.
    Erased(MemberErased),
}

impl DomainEvent for MemberEvent {
    fn event_name(&self) -> &'static str {
        match self {
            Self::Registered(_) => MEMBER_REGISTERED,
            Self::EmailChanged(_) => MEMBER_EMAIL_CHANGED,
            Self::Erased(_) => MEMBER_ERASED,
        }
    }

    fn encode(&self) -> Result<serde_json::Value, DomainError> {
        match self {
            Self::Registered(p) => encode_payload(p),
            Self::EmailChanged(p) => encode_payload(p),
            Self::Erased(p) => encode_payload(p),
        }
    }

    fn decode(
        event_name: &str,
        event_version: i32,
        payload: serde_json::Value,
    ) -> Result<Self, DomainError> {
        match (event_name, event_version) {
            (MEMBER_REGISTERED, 1) => Ok(Self::Registered(decode_payload(payload)?)),
            (MEMBER_EMAIL_CHANGED, 1) => Ok(Self::EmailChanged(decode_payload(payload)?)),
            (MEMBER_ERASED, 1) => Ok(Self::Erased(decode_payload(payload)?)),
            _ => Err(unknown_event(event_name, event_version)),
        }
    }
}
