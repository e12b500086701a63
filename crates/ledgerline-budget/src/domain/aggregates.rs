//! Aggregate roots for the budget context.

use ledgerline_core::aggregate::{AggregateRoot, EventRecorder};
use ledgerline_core::clock::Clock;
use ledgerline_core::error::DomainError;
use ledgerline_core::event::{Envelope, decode_payload, encode_payload};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{
    CategoryArchived, CategoryCreated, CategoryEvent, CategoryRenamed, MemberEmailChanged,
    MemberErased, MemberEvent, MemberRegistered,
};

fn require_text(field: &str, value: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_owned())
}

/// Snapshot state of a category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryState {
    pub owner_id: Option<Uuid>,
    pub name: String,
    pub group: String,
    pub archived: bool,
}

/// A spending category of one budget owner. Names are unique per owner
/// among live categories.
#[derive(Debug)]
pub struct Category {
    /// Aggregate identifier.
    pub id: Uuid,
    version: i64,
    state: CategoryState,
    recorder: EventRecorder<CategoryEvent>,
}

impl Category {
    /// Read access to the current state.
    #[must_use]
    pub fn state(&self) -> &CategoryState {
        &self.state
    }

    /// Whether a creation event has been applied.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.state.owner_id.is_some()
    }

    fn ensure_live(&self) -> Result<Uuid, DomainError> {
        let owner_id = self
            .state
            .owner_id
            .ok_or(DomainError::StreamNotFound(self.id))?;
        if self.state.archived {
            return Err(DomainError::Validation(format!(
                "category {} is archived",
                self.id
            )));
        }
        Ok(owner_id)
    }

    /// Creates the category, producing a `CategoryCreated` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the category already exists or
    /// the name or group is blank.
    pub fn create(
        &mut self,
        owner_id: Uuid,
        name: &str,
        group: &str,
        request_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if self.exists() {
            return Err(DomainError::Validation(format!(
                "category {} already exists",
                self.id
            )));
        }
        let name = require_text("name", name)?;
        let group = require_text("group", group)?;
        let metadata = self.next_metadata(request_id, clock);
        self.raise(
            metadata,
            CategoryEvent::Created(CategoryCreated {
                category_id: self.id,
                owner_id,
                name,
                group,
            }),
        );
        Ok(())
    }

    /// Renames the category, producing a `CategoryRenamed` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the category is archived or the
    /// name is blank, and `DomainError::StreamNotFound` if it was never
    /// created.
    pub fn rename(&mut self, name: &str, request_id: Uuid, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_live()?;
        let name = require_text("name", name)?;
        if name == self.state.name {
            return Ok(());
        }
        let metadata = self.next_metadata(request_id, clock);
        self.raise(
            metadata,
            CategoryEvent::Renamed(CategoryRenamed {
                category_id: self.id,
                name,
            }),
        );
        Ok(())
    }

    /// Archives the category, producing a `CategoryArchived` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if it is already archived.
    pub fn archive(&mut self, request_id: Uuid, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_live()?;
        let metadata = self.next_metadata(request_id, clock);
        self.raise(
            metadata,
            CategoryEvent::Archived(CategoryArchived {
                category_id: self.id,
            }),
        );
        Ok(())
    }
}

impl AggregateRoot for Category {
    type Event = CategoryEvent;
    const AGGREGATE_TYPE: &'static str = "category";

    fn empty(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            state: CategoryState::default(),
            recorder: EventRecorder::default(),
        }
    }

    fn restore(id: Uuid, version: i64, state: serde_json::Value) -> Result<Self, DomainError> {
        let mut category = Self::empty(id);
        category.version = version;
        category.state = decode_payload(state)?;
        Ok(category)
    }

    fn snapshot_state(&self) -> Result<serde_json::Value, DomainError> {
        encode_payload(&self.state)
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Envelope<CategoryEvent>) {
        match &event.kind {
            CategoryEvent::Created(p) => {
                self.state.owner_id = Some(p.owner_id);
                self.state.name.clone_from(&p.name);
                self.state.group.clone_from(&p.group);
            }
            CategoryEvent::Renamed(p) => self.state.name.clone_from(&p.name),
            CategoryEvent::Archived(_) => self.state.archived = true,
        }
        self.version = event.metadata.stream_version;
    }

    fn recorder(&self) -> &EventRecorder<CategoryEvent> {
        &self.recorder
    }

    fn recorder_mut(&mut self) -> &mut EventRecorder<CategoryEvent> {
        &mut self.recorder
    }
}

/// Snapshot state of a member. Holds personal data, so snapshots are sealed
/// under the member's key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberState {
    pub registered: bool,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub erased: bool,
}

/// A person taking part in a budget. The member is its own data subject:
/// every event is attributed to the member id.
#[derive(Debug)]
pub struct Member {
    /// Aggregate identifier.
    pub id: Uuid,
    version: i64,
    state: MemberState,
    recorder: EventRecorder<MemberEvent>,
}

impl Member {
    /// Read access to the current state.
    #[must_use]
    pub fn state(&self) -> &MemberState {
        &self.state
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.state.registered {
            return Err(DomainError::StreamNotFound(self.id));
        }
        if self.state.erased {
            return Err(DomainError::Validation(format!(
                "member {} has been erased",
                self.id
            )));
        }
        Ok(())
    }

    /// Registers the member, producing a `MemberRegistered` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if already registered or a field is
    /// blank.
    pub fn register(
        &mut self,
        email: &str,
        display_name: &str,
        request_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if self.state.registered {
            return Err(DomainError::Validation(format!(
                "member {} already registered",
                self.id
            )));
        }
        let email = require_text("email", email)?;
        let display_name = require_text("display_name", display_name)?;
        let metadata = self.next_metadata(request_id, clock).owned_by(self.id);
        self.raise(
            metadata,
            MemberEvent::Registered(MemberRegistered {
                member_id: self.id,
                email,
                display_name,
            }),
        );
        Ok(())
    }

    /// Changes the e-mail address, producing a `MemberEmailChanged` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if erased or the address is blank.
    pub fn change_email(&mut self, email: &str, request_id: Uuid, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_active()?;
        let email = require_text("email", email)?;
        if self.state.email.as_deref() == Some(email.as_str()) {
            return Ok(());
        }
        let metadata = self.next_metadata(request_id, clock).owned_by(self.id);
        self.raise(
            metadata,
            MemberEvent::EmailChanged(MemberEmailChanged {
                member_id: self.id,
                email,
            }),
        );
        Ok(())
    }

    /// Marks the member erased, producing a `MemberErased` event. The caller
    /// destroys the key once the event is committed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if already erased.
    pub fn erase(&mut self, request_id: Uuid, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_active()?;
        let metadata = self.next_metadata(request_id, clock).owned_by(self.id);
        self.raise(
            metadata,
            MemberEvent::Erased(MemberErased { member_id: self.id }),
        );
        Ok(())
    }
}

impl AggregateRoot for Member {
    type Event = MemberEvent;
    const AGGREGATE_TYPE: &'static str = "member";

    fn empty(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            state: MemberState::default(),
            recorder: EventRecorder::default(),
        }
    }

    fn restore(id: Uuid, version: i64, state: serde_json::Value) -> Result<Self, DomainError> {
        let mut member = Self::empty(id);
        member.version = version;
        member.state = decode_payload(state)?;
        Ok(member)
    }

    fn snapshot_state(&self) -> Result<serde_json::Value, DomainError> {
        encode_payload(&self.state)
    }

    fn personal_data_owner(&self) -> Option<Uuid> {
        self.state.registered.then_some(self.id)
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Envelope<MemberEvent>) {
        match &event.kind {
            MemberEvent::Registered(p) => {
                self.state.registered = true;
                self.state.email = Some(p.email.clone());
                self.state.display_name = Some(p.display_name.clone());
            }
            MemberEvent::EmailChanged(p) => self.state.email = Some(p.email.clone()),
            MemberEvent::Erased(_) => {
                self.state.erased = true;
                self.state.email = None;
                self.state.display_name = None;
            }
        }
        self.version = event.metadata.stream_version;
    }

    fn recorder(&self) -> &EventRecorder<MemberEvent> {
        &self.recorder
    }

    fn recorder_mut(&mut self) -> &mut EventRecorder<MemberEvent> {
        &mut self.recorder
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use ledgerline_core::aggregate::reconstitute;
    use ledgerline_core::repository::StoredEvent;
    use ledgerline_test_support::FixedClock;

    use super::*;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())
    }

    #[test]
    fn test_create_trims_name_and_sets_state() {
        // Arrange
        let owner_id = Uuid::new_v4();
        let mut category = Category::empty(Uuid::new_v4());

        // Act
        category
            .create(owner_id, "  Groceries ", "Living", Uuid::new_v4(), &clock())
            .unwrap();

        // Assert
        assert_eq!(category.state().name, "Groceries");
        assert_eq!(category.state().owner_id, Some(owner_id));
        assert_eq!(category.version(), 1);
        assert_eq!(category.uncommitted_events().len(), 1);
    }

    #[test]
    fn test_create_twice_is_rejected() {
        let mut category = Category::empty(Uuid::new_v4());
        category
            .create(Uuid::new_v4(), "Rent", "Housing", Uuid::new_v4(), &clock())
            .unwrap();

        let result = category.create(Uuid::new_v4(), "Rent", "Housing", Uuid::new_v4(), &clock());

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_archived_category_cannot_be_renamed() {
        let mut category = Category::empty(Uuid::new_v4());
        category
            .create(Uuid::new_v4(), "Fun", "Leisure", Uuid::new_v4(), &clock())
            .unwrap();
        category.archive(Uuid::new_v4(), &clock()).unwrap();

        let result = category.rename("Hobbies", Uuid::new_v4(), &clock());

        match result {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("archived")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_rename_to_same_name_raises_nothing() {
        let mut category = Category::empty(Uuid::new_v4());
        category
            .create(Uuid::new_v4(), "Fun", "Leisure", Uuid::new_v4(), &clock())
            .unwrap();

        category.rename(" Fun ", Uuid::new_v4(), &clock()).unwrap();

        assert_eq!(category.version(), 1);
    }

    #[test]
    fn test_blank_email_is_rejected() {
        let mut member = Member::empty(Uuid::new_v4());

        let result = member.register("   ", "Ada", Uuid::new_v4(), &clock());

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert!(member.uncommitted_events().is_empty());
    }

    #[test]
    fn test_member_events_are_attributed_to_the_member() {
        let id = Uuid::new_v4();
        let mut member = Member::empty(id);

        member
            .register("ada@example.com", "Ada", Uuid::new_v4(), &clock())
            .unwrap();
        member
            .change_email("ada@lovelace.dev", Uuid::new_v4(), &clock())
            .unwrap();

        assert!(
            member
                .uncommitted_events()
                .iter()
                .all(|e| e.metadata.owner_id == Some(id))
        );
        assert_eq!(member.personal_data_owner(), Some(id));
        assert_eq!(member.state().email.as_deref(), Some("ada@lovelace.dev"));
    }

    #[test]
    fn test_erase_clears_personal_state_and_blocks_changes() {
        let mut member = Member::empty(Uuid::new_v4());
        member
            .register("ada@example.com", "Ada", Uuid::new_v4(), &clock())
            .unwrap();

        member.erase(Uuid::new_v4(), &clock()).unwrap();

        assert!(member.state().erased);
        assert_eq!(member.state().email, None);
        assert!(matches!(
            member.change_email("new@example.com", Uuid::new_v4(), &clock()),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            member.erase(Uuid::new_v4(), &clock()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn test_reconstituted_member_matches_live_state() {
        let id = Uuid::new_v4();
        let mut live = Member::empty(id);
        live.register("ada@example.com", "Ada", Uuid::new_v4(), &clock())
            .unwrap();
        live.change_email("ada@lovelace.dev", Uuid::new_v4(), &clock())
            .unwrap();
        let stored: Vec<StoredEvent> = live
            .uncommitted_events()
            .iter()
            .map(|e| e.to_stored().unwrap())
            .collect();

        let rebuilt = reconstitute::<Member>(id, &stored).unwrap();

        assert_eq!(rebuilt.state(), live.state());
        assert_eq!(rebuilt.version(), 2);
    }
}
