use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// One row per (message, reader); the primary key enforces the
/// at-most-one-receipt invariant.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReadReceipt {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}
