use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::receipt::ReadReceipt;
use crate::services::conversation_service::ConversationService;

/// Read receipts are create-only and unique per (message, reader); the bulk
/// insert silently skips pairs that already exist, so clients may call these
/// on every viewport scroll without accumulating state or erroring.
pub struct ReceiptService;

impl ReceiptService {
    /// Records receipts for the given messages, restricted to this
    /// conversation and to messages the reader did not send. Returns the
    /// number of receipts actually created (0 is a valid result).
    pub async fn mark_read(
        db: &Pool<Postgres>,
        reader_id: Uuid,
        conversation_id: Uuid,
        message_ids: &[Uuid],
    ) -> AppResult<u64> {
        ConversationService::get(db, conversation_id).await?;
        if !ConversationService::is_member(db, conversation_id, reader_id).await? {
            return Err(AppError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        if message_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "INSERT INTO read_receipts (message_id, user_id) \
             SELECT m.id, $1 FROM messages m \
             WHERE m.id = ANY($2) AND m.conversation_id = $3 AND m.sender_id <> $1 \
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(reader_id)
        .bind(message_ids)
        .bind(conversation_id)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Receipts for every not-yet-read, not-deleted message from others in
    /// the conversation.
    pub async fn mark_all_read(
        db: &Pool<Postgres>,
        reader_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<u64> {
        ConversationService::get(db, conversation_id).await?;
        if !ConversationService::is_member(db, conversation_id, reader_id).await? {
            return Err(AppError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        let result = sqlx::query(
            "INSERT INTO read_receipts (message_id, user_id) \
             SELECT m.id, $1 FROM messages m \
             WHERE m.conversation_id = $2 AND m.sender_id <> $1 AND m.is_deleted = FALSE \
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(reader_id)
        .bind(conversation_id)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Who has read one message; any participant may ask.
    pub async fn receipts_for(
        db: &Pool<Postgres>,
        requester_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<Vec<ReadReceipt>> {
        ConversationService::get(db, conversation_id).await?;
        if !ConversationService::is_member(db, conversation_id, requester_id).await? {
            return Err(AppError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        let receipts = sqlx::query_as::<_, ReadReceipt>(
            "SELECT r.message_id, r.user_id, r.read_at FROM read_receipts r \
             JOIN messages m ON m.id = r.message_id \
             WHERE r.message_id = $1 AND m.conversation_id = $2 \
             ORDER BY r.read_at ASC",
        )
        .bind(message_id)
        .bind(conversation_id)
        .fetch_all(db)
        .await?;
        Ok(receipts)
    }
}
