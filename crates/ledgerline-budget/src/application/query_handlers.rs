//! Query handlers for the budget context.
//!
//! Single-aggregate queries reconstitute from the event log (optionally at a
//! point in time); list queries read the projected read models.

use chrono::{DateTime, Utc};
use ledgerline_core::aggregate::AggregateRoot;
use ledgerline_core::error::DomainError;
use ledgerline_core::store::AggregateStore;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::aggregates::{Category, Member};

/// Read-only view of a category aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryView {
    pub category_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub group: String,
    pub archived: bool,
    /// Stream version the view was built at.
    pub version: i64,
}

/// Read-only view of a member aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberView {
    pub member_id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub erased: bool,
    pub version: i64,
}

/// Row of the `category_read_model` projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CategoryListItem {
    pub category_id: Uuid,
    pub name: String,
    pub category_group: String,
    pub archived: bool,
}

/// Row of the `member_directory` projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DirectoryEntry {
    pub member_id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub erased: bool,
}

/// Retrieves a category by its aggregate ID, as it was at `as_of` when given.
///
/// # Errors
///
/// Returns `DomainError::StreamNotFound` if the category did not exist
/// (yet), and decoding or storage errors.
pub async fn get_category_by_id(
    category_id: Uuid,
    as_of: Option<DateTime<Utc>>,
    store: &AggregateStore<'_>,
) -> Result<CategoryView, DomainError> {
    let category: Category = store.load(category_id, as_of).await?;
    let state = category.state();
    Ok(CategoryView {
        category_id,
        owner_id: state.owner_id.ok_or(DomainError::StreamNotFound(category_id))?,
        name: state.name.clone(),
        group: state.group.clone(),
        archived: state.archived,
        version: category.version(),
    })
}

/// Retrieves a member by its aggregate ID.
///
/// # Errors
///
/// Returns `DomainError::StreamNotFound` for an unknown member and
/// `DomainError::KeyErased` once the member has been erased.
pub async fn get_member_by_id(
    member_id: Uuid,
    store: &AggregateStore<'_>,
) -> Result<MemberView, DomainError> {
    let member: Member = store.load(member_id, None).await?;
    let state = member.state();
    Ok(MemberView {
        member_id,
        email: state.email.clone(),
        display_name: state.display_name.clone(),
        erased: state.erased,
        version: member.version(),
    })
}

/// Lists an owner's categories from the read model, ordered by name.
///
/// # Errors
///
/// Returns `DomainError::StorageUnavailable` if the query fails.
pub async fn list_categories(
    pool: &PgPool,
    owner_id: Uuid,
    include_archived: bool,
) -> Result<Vec<CategoryListItem>, DomainError> {
    sqlx::query_as::<_, CategoryListItem>(
        r"
        SELECT category_id, name, category_group, archived
        FROM category_read_model
        WHERE owner_id = $1 AND ($2 OR NOT archived)
        ORDER BY lower(name) ASC
        ",
    )
    .bind(owner_id)
    .bind(include_archived)
    .fetch_all(pool)
    .await
    .map_err(|e| DomainError::StorageUnavailable(e.to_string()))
}

/// Looks a member up in the directory read model.
///
/// # Errors
///
/// Returns `DomainError::StorageUnavailable` if the query fails.
pub async fn find_directory_entry(
    pool: &PgPool,
    member_id: Uuid,
) -> Result<Option<DirectoryEntry>, DomainError> {
    sqlx::query_as::<_, DirectoryEntry>(
        r"
        SELECT member_id, email, display_name, erased
        FROM member_directory
        WHERE member_id = $1
        ",
    )
    .bind(member_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| DomainError::StorageUnavailable(e.to_string()))
}
