pub mod conversation;
pub mod message;
pub mod receipt;

use uuid::Uuid;

/// Attributed as `deleted_by` on sweeper tombstones; never a real user id.
pub fn system_user_id() -> Uuid {
    Uuid::nil()
}
