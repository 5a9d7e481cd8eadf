use chrono::{Duration, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::config::PREVIEW_MAX_CHARS;
use crate::error::{AppError, AppResult};
use crate::models::conversation::MemberRole;
use crate::models::message::{Message, MessageDelivery};
use crate::services::conversation_service::ConversationService;
use crate::services::encryption::{EncryptionService, DELETED_SENTINEL};

pub struct MessageService;

/// Plaintext preview for the conversation list, truncated on a char
/// boundary so multi-byte content cannot split.
pub fn preview_of(content: &str) -> String {
    content.chars().take(PREVIEW_MAX_CHARS).collect()
}

impl MessageService {
    /// The send pipeline: authorize -> encrypt -> persist (message insert and
    /// denormalized preview update in one transaction) -> decrypt once into
    /// the delivery payload. Fan-out happens in the caller, strictly after
    /// the transaction commits.
    pub async fn send(
        db: &Pool<Postgres>,
        encryption: &EncryptionService,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
        content_type: &str,
        media_urls: Option<Vec<String>>,
    ) -> AppResult<MessageDelivery> {
        if content.is_empty() {
            return Err(AppError::BadRequest("message content cannot be empty".into()));
        }
        // NotFound for a missing conversation, Forbidden for a non-member
        ConversationService::get(db, conversation_id).await?;
        if !ConversationService::is_member(db, conversation_id, sender_id).await? {
            return Err(AppError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }

        // Plaintext must not touch the store
        let (ciphertext, nonce) = encryption.encrypt(conversation_id, content.as_bytes())?;

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let mut tx = db.begin().await?;
        sqlx::query(
            "INSERT INTO messages \
             (id, conversation_id, sender_id, content_encrypted, content_nonce, content_type, media_urls, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(&ciphertext)
        .bind(&nonce[..])
        .bind(content_type)
        .bind(&media_urls)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        ConversationService::touch_last_message(
            &mut tx,
            conversation_id,
            &preview_of(content),
            created_at,
        )
        .await?;
        tx.commit().await?;

        // Single decrypt of what was actually persisted
        let content = encryption.decrypt_to_string(conversation_id, &ciphertext, &nonce)?;
        Ok(MessageDelivery {
            id,
            conversation_id,
            sender_id,
            content,
            content_type: content_type.to_string(),
            media_urls,
            created_at,
            is_edited: false,
            is_deleted: false,
        })
    }

    /// Sender-only, within the edit window, and only while not deleted.
    /// The not-deleted check runs under the row lock in the same
    /// transaction as the write, so a concurrent delete wins. A message
    /// addressed under the wrong conversation is NotFound before anything
    /// is written.
    pub async fn edit(
        db: &Pool<Postgres>,
        encryption: &EncryptionService,
        conversation_id: Uuid,
        message_id: Uuid,
        editor_id: Uuid,
        new_content: &str,
        edit_window_minutes: i64,
    ) -> AppResult<MessageDelivery> {
        if new_content.is_empty() {
            return Err(AppError::BadRequest("message content cannot be empty".into()));
        }
        let mut tx = db.begin().await?;
        let row = sqlx::query(
            "SELECT conversation_id, sender_id, content_type, media_urls, created_at, is_deleted \
             FROM messages WHERE id = $1 FOR UPDATE",
        )
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;

        if row.get::<Uuid, _>("conversation_id") != conversation_id {
            return Err(AppError::NotFound);
        }
        let sender_id: Uuid = row.get("sender_id");
        let content_type: String = row.get("content_type");
        let media_urls: Option<Vec<String>> = row.get("media_urls");
        let created_at: chrono::DateTime<Utc> = row.get("created_at");
        let is_deleted: bool = row.get("is_deleted");

        if sender_id != editor_id {
            return Err(AppError::Forbidden("only the sender may edit".into()));
        }
        if is_deleted {
            return Err(AppError::AlreadyDeleted);
        }
        let edited_at = Utc::now();
        if edited_at - created_at > Duration::minutes(edit_window_minutes) {
            return Err(AppError::EditWindowExpired {
                max_edit_minutes: edit_window_minutes,
            });
        }

        let (ciphertext, nonce) = encryption.encrypt(conversation_id, new_content.as_bytes())?;
        sqlx::query(
            "UPDATE messages SET content_encrypted = $1, content_nonce = $2, \
             is_edited = TRUE, edited_at = $3 WHERE id = $4",
        )
        .bind(&ciphertext)
        .bind(&nonce[..])
        .bind(edited_at)
        .bind(message_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let content = encryption.decrypt_to_string(conversation_id, &ciphertext, &nonce)?;
        Ok(MessageDelivery {
            id: message_id,
            conversation_id,
            sender_id,
            content,
            content_type,
            media_urls,
            created_at,
            is_edited: true,
            is_deleted: false,
        })
    }

    /// Tombstone a message: the sender, or a group admin, replaces the
    /// content with an encrypted sentinel. A second delete is a Conflict,
    /// not a silent success. Returns the sender's id for the delete event.
    pub async fn soft_delete(
        db: &Pool<Postgres>,
        encryption: &EncryptionService,
        conversation_id: Uuid,
        message_id: Uuid,
        actor_id: Uuid,
    ) -> AppResult<Uuid> {
        let mut tx = db.begin().await?;
        let row = sqlx::query(
            "SELECT conversation_id, sender_id, is_deleted FROM messages WHERE id = $1 FOR UPDATE",
        )
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;

        if row.get::<Uuid, _>("conversation_id") != conversation_id {
            return Err(AppError::NotFound);
        }
        let sender_id: Uuid = row.get("sender_id");
        let is_deleted: bool = row.get("is_deleted");

        if is_deleted {
            return Err(AppError::AlreadyDeleted);
        }
        if actor_id != sender_id {
            // Role lookup stays on the open transaction's connection; the
            // row lock must not wait on a second pool checkout.
            let role = sqlx::query(
                "SELECT role FROM conversation_members \
                 WHERE conversation_id = $1 AND user_id = $2",
            )
            .bind(conversation_id)
            .bind(actor_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|r| MemberRole::parse(r.get::<String, _>("role").as_str()));
            if !role.is_some_and(|r| r.can_moderate()) {
                return Err(AppError::Forbidden(
                    "only the sender or a group admin may delete".into(),
                ));
            }
        }

        let (ciphertext, nonce) = encryption.encrypt(conversation_id, DELETED_SENTINEL.as_bytes())?;
        sqlx::query(
            "UPDATE messages SET content_encrypted = $1, content_nonce = $2, \
             is_deleted = TRUE, deleted_at = NOW(), deleted_by = $3 WHERE id = $4",
        )
        .bind(&ciphertext)
        .bind(&nonce[..])
        .bind(actor_id)
        .bind(message_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(sender_id)
    }

    /// Decrypted history in persisted order. Tombstones stay visible as
    /// deleted markers carrying the sentinel text; hard-deleted rows are
    /// simply gone.
    pub async fn history(
        db: &Pool<Postgres>,
        encryption: &EncryptionService,
        conversation_id: Uuid,
        requester_id: Uuid,
        limit: i64,
    ) -> AppResult<Vec<MessageDelivery>> {
        ConversationService::get(db, conversation_id).await?;
        if !ConversationService::is_member(db, conversation_id, requester_id).await? {
            return Err(AppError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        let limit = limit.clamp(1, 200);
        let rows = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at ASC LIMIT $2",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(db)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let content = encryption.decrypt_to_string(
                conversation_id,
                &row.content_encrypted,
                &row.content_nonce,
            )?;
            out.push(MessageDelivery {
                id: row.id,
                conversation_id: row.conversation_id,
                sender_id: row.sender_id,
                content,
                content_type: row.content_type,
                media_urls: row.media_urls,
                created_at: row.created_at,
                is_edited: row.is_edited,
                is_deleted: row.is_deleted,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundary() {
        let ascii = "a".repeat(250);
        assert_eq!(preview_of(&ascii).len(), PREVIEW_MAX_CHARS);

        let wide = "日".repeat(250);
        let preview = preview_of(&wide);
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS);
        assert!(preview.is_char_boundary(preview.len()));
    }

    #[test]
    fn short_content_is_left_alone() {
        assert_eq!(preview_of("hi"), "hi");
        assert_eq!(preview_of(""), "");
    }
}
