//! Row-level soft deletion
//!
//! Entities opt in by implementing [`SoftDelete`] and declaring
//! `with_soft_delete()` on their descriptor. Queries then exclude flagged
//! rows unless scoped with `include_deleted`; see [`Select::scope`].
//!
//! [`Select::scope`]: crate::sql::Select::scope

use chrono::{DateTime, Utc};

use crate::entity::Entity;

/// State machine over the `deleted_at` flag
///
/// `ACTIVE --delete--> DELETED --restore--> ACTIVE`. Rows are never removed.
pub trait SoftDelete: Entity {
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>);

    /// Flag as deleted at `at`, or now
    ///
    /// Deleting an already deleted entity moves the timestamp.
    fn delete(&mut self, at: Option<DateTime<Utc>>) {
        self.set_deleted_at(Some(at.unwrap_or_else(Utc::now)));
    }

    fn restore(&mut self) {
        self.set_deleted_at(None);
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}
