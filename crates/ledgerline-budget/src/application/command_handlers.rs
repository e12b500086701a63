//! Command handlers for the budget context.
//!
//! Each handler loads the aggregate, executes the command, lets the registry
//! builder claim or release unique values, and commits the aggregate and the
//! touched registries in one unit of work.

use ledgerline_core::aggregate::AggregateRoot;
use ledgerline_core::command::Command;
use ledgerline_core::crypto::KeyRing;
use ledgerline_core::error::DomainError;
use ledgerline_core::registry::{RegistryBuilder, normalize};
use ledgerline_core::store::{AggregateStore, UnitOfWork};
use uuid::Uuid;

use crate::domain::aggregates::{Category, Member};
use crate::domain::commands::{
    ArchiveCategory, ChangeMemberEmail, CreateCategory, EraseMember, RegisterMember,
    RenameCategory,
};
use crate::domain::events::DEFAULT_GROUP;

/// Registry scope of member e-mail addresses, unique across all members.
pub const MEMBER_EMAIL_SCOPE: &str = "member-email";

/// Registry scope of category names, unique per budget owner.
#[must_use]
pub fn category_name_scope(owner_id: Uuid) -> String {
    format!("category-name:{owner_id}")
}

/// Result of a successfully handled command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetCommandResult {
    /// The aggregate ID affected by the command.
    pub aggregate_id: Uuid,
    /// Stream version after the command.
    pub version: i64,
}

impl BudgetCommandResult {
    fn of<A: AggregateRoot>(aggregate: &A) -> Self {
        Self {
            aggregate_id: aggregate.aggregate_id(),
            version: aggregate.version(),
        }
    }
}

/// Commits the aggregate together with every registry the command touched.
async fn persist<A: AggregateRoot>(
    store: &AggregateStore<'_>,
    aggregate: &mut A,
    registries: &mut RegistryBuilder<'_, '_>,
) -> Result<(), DomainError> {
    let mut unit = UnitOfWork::new();
    store.track(&mut unit, aggregate).await?;
    registries.track(&mut unit).await?;
    store.commit(unit).await?;
    aggregate.clear_uncommitted_events();
    registries.mark_committed();
    Ok(())
}

async fn ensure_new(store: &AggregateStore<'_>, id: Uuid) -> Result<(), DomainError> {
    if store.events().current_version(id, None).await? > 0 {
        return Err(DomainError::Validation(format!("stream {id} already exists")));
    }
    Ok(())
}

fn category_owner(category: &Category) -> Result<Uuid, DomainError> {
    category
        .state()
        .owner_id
        .ok_or(DomainError::StreamNotFound(category.id))
}

/// Handles the `CreateCategory` command.
///
/// # Errors
///
/// Returns `DomainError::UniquenessViolation` if the owner already has a
/// live category of that name, `DomainError::Validation` for a blank name
/// or an existing id, and storage errors.
pub async fn handle_create_category(
    command: &CreateCategory,
    store: &AggregateStore<'_>,
) -> Result<BudgetCommandResult, DomainError> {
    ensure_new(store, command.category_id).await?;
    let mut category = Category::empty(command.category_id);
    category.create(
        command.owner_id,
        &command.name,
        command.group.as_deref().unwrap_or(DEFAULT_GROUP),
        command.request_id,
        store.clock(),
    )?;

    let mut registries = RegistryBuilder::new(store, command.request_id);
    registries
        .register(
            &category_name_scope(command.owner_id),
            &category.state().name,
            category.id,
        )
        .await?;
    persist(store, &mut category, &mut registries).await?;

    tracing::debug!(
        command = command.command_type(),
        request_id = %command.request_id(),
        category_id = %category.id,
        "handled"
    );
    Ok(BudgetCommandResult::of(&category))
}

/// Handles the `RenameCategory` command. The old name is released and the
/// new one claimed in the same commit.
///
/// # Errors
///
/// Returns `DomainError::StreamNotFound` for an unknown category,
/// `DomainError::UniquenessViolation` if the new name is taken, and
/// `DomainError::Validation` if the category is archived.
pub async fn handle_rename_category(
    command: &RenameCategory,
    store: &AggregateStore<'_>,
) -> Result<BudgetCommandResult, DomainError> {
    let mut category: Category = store.load(command.category_id, None).await?;
    let owner_id = category_owner(&category)?;
    let old_name = category.state().name.clone();
    category.rename(&command.name, command.request_id, store.clock())?;
    if category.uncommitted_events().is_empty() {
        return Ok(BudgetCommandResult::of(&category));
    }

    let new_name = category.state().name.clone();
    let mut registries = RegistryBuilder::new(store, command.request_id);
    if normalize(&old_name) != normalize(&new_name) {
        let scope = category_name_scope(owner_id);
        registries
            .ensure_available(&scope, &new_name, Some(category.id))
            .await?;
        registries.release(&scope, &old_name, category.id).await?;
        registries.register(&scope, &new_name, category.id).await?;
    }
    persist(store, &mut category, &mut registries).await?;

    tracing::debug!(
        command = command.command_type(),
        request_id = %command.request_id(),
        category_id = %category.id,
        "handled"
    );
    Ok(BudgetCommandResult::of(&category))
}

/// Handles the `ArchiveCategory` command, freeing the name for reuse.
///
/// # Errors
///
/// Returns `DomainError::StreamNotFound` for an unknown category and
/// `DomainError::Validation` if it is already archived.
pub async fn handle_archive_category(
    command: &ArchiveCategory,
    store: &AggregateStore<'_>,
) -> Result<BudgetCommandResult, DomainError> {
    let mut category: Category = store.load(command.category_id, None).await?;
    let owner_id = category_owner(&category)?;
    category.archive(command.request_id, store.clock())?;

    let mut registries = RegistryBuilder::new(store, command.request_id);
    registries
        .release(
            &category_name_scope(owner_id),
            &category.state().name,
            category.id,
        )
        .await?;
    persist(store, &mut category, &mut registries).await?;

    tracing::debug!(
        command = command.command_type(),
        request_id = %command.request_id(),
        category_id = %category.id,
        "handled"
    );
    Ok(BudgetCommandResult::of(&category))
}

/// Handles the `RegisterMember` command.
///
/// # Errors
///
/// Returns `DomainError::UniquenessViolation` if the e-mail address is in
/// use, `DomainError::Validation` for blank fields or an existing id, and
/// encryption or storage errors.
pub async fn handle_register_member(
    command: &RegisterMember,
    store: &AggregateStore<'_>,
) -> Result<BudgetCommandResult, DomainError> {
    ensure_new(store, command.member_id).await?;
    let mut member = Member::empty(command.member_id);
    member.register(
        &command.email,
        &command.display_name,
        command.request_id,
        store.clock(),
    )?;

    let mut registries = RegistryBuilder::new(store, command.request_id);
    if let Some(email) = member.state().email.as_deref() {
        registries
            .register(MEMBER_EMAIL_SCOPE, email, member.id)
            .await?;
    }
    persist(store, &mut member, &mut registries).await?;

    tracing::debug!(
        command = command.command_type(),
        request_id = %command.request_id(),
        member_id = %member.id,
        "handled"
    );
    Ok(BudgetCommandResult::of(&member))
}

/// Handles the `ChangeMemberEmail` command, moving the address claim.
///
/// # Errors
///
/// Returns `DomainError::UniquenessViolation` if the new address is taken,
/// `DomainError::KeyErased` if the member has been erased, and storage
/// errors.
pub async fn handle_change_member_email(
    command: &ChangeMemberEmail,
    store: &AggregateStore<'_>,
) -> Result<BudgetCommandResult, DomainError> {
    let mut member: Member = store.load(command.member_id, None).await?;
    let old_email = member.state().email.clone();
    member.change_email(&command.email, command.request_id, store.clock())?;
    if member.uncommitted_events().is_empty() {
        return Ok(BudgetCommandResult::of(&member));
    }

    let new_email = member.state().email.clone().unwrap_or_default();
    let mut registries = RegistryBuilder::new(store, command.request_id);
    let moved = old_email
        .as_deref()
        .is_none_or(|old| normalize(old) != normalize(&new_email));
    if moved {
        registries
            .ensure_available(MEMBER_EMAIL_SCOPE, &new_email, Some(member.id))
            .await?;
        if let Some(old) = old_email.as_deref() {
            registries.release(MEMBER_EMAIL_SCOPE, old, member.id).await?;
        }
        registries
            .register(MEMBER_EMAIL_SCOPE, &new_email, member.id)
            .await?;
    }
    persist(store, &mut member, &mut registries).await?;

    tracing::debug!(
        command = command.command_type(),
        request_id = %command.request_id(),
        member_id = %member.id,
        "handled"
    );
    Ok(BudgetCommandResult::of(&member))
}

/// Handles the `EraseMember` command: releases the e-mail claim, commits
/// `MemberErased`, then destroys the member's key. The events stay in the
/// log; their personal fields become unreadable.
///
/// # Errors
///
/// Returns `DomainError::KeyErased` if the member was already erased, and
/// storage errors. A failed key deletion after the commit leaves the member
/// marked erased with its key in place; retry it with `KeyRing::shred`.
pub async fn handle_erase_member(
    command: &EraseMember,
    store: &AggregateStore<'_>,
    keys: &KeyRing<'_>,
) -> Result<BudgetCommandResult, DomainError> {
    let mut member: Member = store.load(command.member_id, None).await?;
    let email = member.state().email.clone();
    member.erase(command.request_id, store.clock())?;

    let mut registries = RegistryBuilder::new(store, command.request_id);
    if let Some(email) = email.as_deref() {
        registries
            .release(MEMBER_EMAIL_SCOPE, email, member.id)
            .await?;
    }
    persist(store, &mut member, &mut registries).await?;
    keys.shred(member.id).await?;

    tracing::info!(member_id = %member.id, "member erased");
    Ok(BudgetCommandResult::of(&member))
}
