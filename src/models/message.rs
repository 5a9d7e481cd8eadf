use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Persisted message row. Content only ever leaves the store as ciphertext;
/// plaintext lives in `MessageDelivery`, which is never written back.
#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content_encrypted: Vec<u8>,
    pub content_nonce: Vec<u8>,
    pub content_type: String,
    pub media_urls: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Transient plaintext payload produced once per send/fetch, fanned out to
/// rooms and returned to the sender as the acknowledgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDelivery {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_urls: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub is_edited: bool,
    pub is_deleted: bool,
}
