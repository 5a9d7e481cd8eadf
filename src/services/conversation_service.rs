use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::conversation::Conversation;

pub struct ConversationService;

impl ConversationService {
    /// Direct conversations always have exactly two participants.
    pub async fn create_direct(db: &Pool<Postgres>, a: Uuid, b: Uuid) -> AppResult<Uuid> {
        if a == b {
            return Err(AppError::BadRequest(
                "direct conversation needs two distinct participants".into(),
            ));
        }
        let id = Uuid::new_v4();
        let mut tx = db.begin().await?;
        sqlx::query("INSERT INTO conversations (id, is_group) VALUES ($1, FALSE)")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role) \
             VALUES ($1, $2, 'member'), ($1, $3, 'member')",
        )
        .bind(id)
        .bind(a)
        .bind(b)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    /// The creator becomes the group's admin.
    pub async fn create_group(
        db: &Pool<Postgres>,
        creator: Uuid,
        member_ids: &[Uuid],
    ) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        let mut tx = db.begin().await?;
        sqlx::query("INSERT INTO conversations (id, is_group) VALUES ($1, TRUE)")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role) \
             VALUES ($1, $2, 'admin') ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(creator)
        .execute(&mut *tx)
        .await?;
        for member in member_ids {
            if *member == creator {
                continue;
            }
            sqlx::query(
                "INSERT INTO conversation_members (conversation_id, user_id, role) \
                 VALUES ($1, $2, 'member') ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(member)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(id)
    }

    pub async fn get(db: &Pool<Postgres>, id: Uuid) -> AppResult<Conversation> {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, is_group, last_message, last_message_at, created_at \
             FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)
    }

    pub async fn is_member(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<bool> {
        let rec = sqlx::query(
            "SELECT 1 FROM conversation_members WHERE conversation_id = $1 AND user_id = $2 LIMIT 1",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?;
        Ok(rec.is_some())
    }

    pub async fn participants_of(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
    ) -> AppResult<Vec<Uuid>> {
        let rows =
            sqlx::query("SELECT user_id FROM conversation_members WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_all(db)
                .await?;
        Ok(rows.into_iter().map(|r| r.get("user_id")).collect())
    }

    /// Conversations the user participates in; used to join rooms on
    /// authentication.
    pub async fn conversation_ids_for(db: &Pool<Postgres>, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT cm.conversation_id FROM conversation_members cm \
             JOIN conversations c ON c.id = cm.conversation_id \
             WHERE cm.user_id = $1 \
             ORDER BY c.last_message_at DESC NULLS LAST",
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("conversation_id")).collect())
    }

    /// Any current member may add to a group; direct conversations are
    /// fixed at two participants.
    pub async fn add_member(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        actor: Uuid,
        new_member: Uuid,
    ) -> AppResult<()> {
        let conversation = Self::get(db, conversation_id).await?;
        if !conversation.is_group {
            return Err(AppError::BadRequest(
                "cannot add participants to a direct conversation".into(),
            ));
        }
        if !Self::is_member(db, conversation_id, actor).await? {
            return Err(AppError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role) \
             VALUES ($1, $2, 'member') ON CONFLICT DO NOTHING",
        )
        .bind(conversation_id)
        .bind(new_member)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Removes the membership; deleting the last membership destroys the
    /// conversation (messages and receipts cascade). Returns true when the
    /// conversation itself was removed.
    pub async fn leave(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<bool> {
        let mut tx = db.begin().await?;
        let removed = sqlx::query(
            "DELETE FROM conversation_members WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if removed.rows_affected() == 0 {
            return Err(AppError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::bigint FROM conversation_members WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_one(&mut *tx)
        .await?;
        let destroyed = remaining == 0;
        if destroyed {
            sqlx::query("DELETE FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(destroyed)
    }

    /// Explicit deletion by a participant; messages and receipts go with
    /// the conversation via FK cascade.
    pub async fn delete(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        actor: Uuid,
    ) -> AppResult<()> {
        if !Self::is_member(db, conversation_id, actor).await? {
            return Err(AppError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Denormalized list-view fields, written inside the send transaction.
    pub(crate) async fn touch_last_message(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        conversation_id: Uuid,
        preview: &str,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE conversations SET last_message = $1, last_message_at = $2 WHERE id = $3")
            .bind(preview)
            .bind(at)
            .bind(conversation_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}
