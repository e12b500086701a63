//! Commands for the budget context.

use ledgerline_core::command::Command;
use uuid::Uuid;

/// Command to create a category.
#[derive(Debug, Clone)]
pub struct CreateCategory {
    /// The request ID correlating the produced events.
    pub request_id: Uuid,
    /// The new category identifier.
    pub category_id: Uuid,
    /// The budget owner.
    pub owner_id: Uuid,
    /// Display name, unique per owner.
    pub name: String,
    /// Grouping label; the default group when absent.
    pub group: Option<String>,
}

/// Command to rename a category.
#[derive(Debug, Clone)]
pub struct RenameCategory {
    /// The request ID correlating the produced events.
    pub request_id: Uuid,
    /// The category identifier.
    pub category_id: Uuid,
    /// The new name.
    pub name: String,
}

/// Command to archive a category and free its name.
#[derive(Debug, Clone)]
pub struct ArchiveCategory {
    /// The request ID correlating the produced events.
    pub request_id: Uuid,
    /// The category identifier.
    pub category_id: Uuid,
}

/// Command to register a member.
#[derive(Debug, Clone)]
pub struct RegisterMember {
    /// The request ID correlating the produced events.
    pub request_id: Uuid,
    /// The new member identifier.
    pub member_id: Uuid,
    /// E-mail address, globally unique.
    pub email: String,
    /// Name shown to other members.
    pub display_name: String,
}

/// Command to change a member's e-mail address.
#[derive(Debug, Clone)]
pub struct ChangeMemberEmail {
    /// The request ID correlating the produced events.
    pub request_id: Uuid,
    /// The member identifier.
    pub member_id: Uuid,
    /// The new address.
    pub email: String,
}

/// Command to erase a member's personal data.
#[derive(Debug, Clone)]
pub struct EraseMember {
    /// The request ID correlating the produced events.
    pub request_id: Uuid,
    /// The member identifier.
    pub member_id: Uuid,
}

impl Command for CreateCategory {
    fn command_type(&self) -> &'static str {
        "budget.create_category"
    }

    fn request_id(&self) -> Uuid {
        self.request_id
    }
}

impl Command for RenameCategory {
    fn command_type(&self) -> &'static str {
        "budget.rename_category"
    }

    fn request_id(&self) -> Uuid {
        self.request_id
    }
}

impl Command for ArchiveCategory {
    fn command_type(&self) -> &'static str {
        "budget.archive_category"
    }

    fn request_id(&self) -> Uuid {
        self.request_id
    }
}

impl Command for RegisterMember {
    fn command_type(&self) -> &'static str {
        "budget.register_member"
    }

    fn request_id(&self) -> Uuid {
        self.request_id
    }
}

impl Command for ChangeMemberEmail {
    fn command_type(&self) -> &'static str {
        "budget.change_member_email"
    }

    fn request_id(&self) -> Uuid {
        self.request_id
    }
}

impl Command for EraseMember {
    fn command_type(&self) -> &'static str {
        "budget.erase_member"
    }

    fn request_id(&self) -> Uuid {
        self.request_id
    }
}
