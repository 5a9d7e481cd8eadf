use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::guards::User;
use crate::models::conversation::Conversation;
use crate::services::conversation_service::ConversationService;
use crate::services::receipt_service::ReceiptService;
use crate::state::AppState;
use crate::websocket::message_types::WsOutbound;

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    pub peer_id: Uuid,
}

#[derive(Deserialize)]
pub struct CreateGroupConversationRequest {
    pub member_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

#[derive(Deserialize, Default)]
pub struct MarkReadRequest {
    /// Absent means "mark everything unread as read".
    #[serde(default)]
    pub message_ids: Option<Vec<Uuid>>,
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    pub count: u64,
}

#[derive(Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub is_group: bool,
    pub last_message: Option<String>,
    pub last_message_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Conversation> for ConversationResponse {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            is_group: c.is_group,
            last_message: c.last_message,
            last_message_at: c.last_message_at,
        }
    }
}

pub async fn create_conversation(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<CreateConversationRequest>,
) -> AppResult<(StatusCode, Json<ConversationResponse>)> {
    let id = ConversationService::create_direct(&state.db, user.id, body.peer_id).await?;
    notify_member_added(&state, id, body.peer_id).await;
    let conversation = ConversationService::get(&state.db, id).await?;
    Ok((StatusCode::CREATED, Json(conversation.into())))
}

pub async fn create_group_conversation(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<CreateGroupConversationRequest>,
) -> AppResult<(StatusCode, Json<ConversationResponse>)> {
    let id = ConversationService::create_group(&state.db, user.id, &body.member_ids).await?;
    for member in &body.member_ids {
        if *member != user.id {
            notify_member_added(&state, id, *member).await;
        }
    }
    let conversation = ConversationService::get(&state.db, id).await?;
    Ok((StatusCode::CREATED, Json(conversation.into())))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    user: User,
) -> AppResult<Json<Vec<ConversationResponse>>> {
    let rows = sqlx::query(
        "SELECT c.id, c.is_group, c.last_message, c.last_message_at, c.created_at \
         FROM conversations c \
         JOIN conversation_members cm ON cm.conversation_id = c.id \
         WHERE cm.user_id = $1 \
         ORDER BY c.last_message_at DESC NULLS LAST \
         LIMIT 100",
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;
    let out = rows
        .into_iter()
        .map(|r| ConversationResponse {
            id: r.get("id"),
            is_group: r.get("is_group"),
            last_message: r.get("last_message"),
            last_message_at: r.get("last_message_at"),
        })
        .collect();
    Ok(Json(out))
}

/// Explicit removal by a participant; messages and receipts cascade.
pub async fn delete_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    ConversationService::get(&state.db, id).await?;
    ConversationService::delete(&state.db, id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    ConversationService::get(&state.db, id).await?;
    let destroyed = ConversationService::leave(&state.db, id, user.id).await?;
    if destroyed {
        tracing::info!(conversation_id=%id, "last participant left; conversation removed");
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_member(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
    Json(body): Json<AddMemberRequest>,
) -> AppResult<StatusCode> {
    ConversationService::add_member(&state.db, id, user.id, body.user_id).await?;
    notify_member_added(&state, id, body.user_id).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
    Json(body): Json<MarkReadRequest>,
) -> AppResult<Json<MarkReadResponse>> {
    let count = match body.message_ids {
        Some(ids) => ReceiptService::mark_read(&state.db, user.id, id, &ids).await?,
        None => ReceiptService::mark_all_read(&state.db, user.id, id).await?,
    };
    Ok(Json(MarkReadResponse { count }))
}

/// Out-of-band notification on the added user's private channel; a live
/// client reacts by joining the new room.
async fn notify_member_added(state: &AppState, conversation_id: Uuid, user_id: Uuid) {
    let event = WsOutbound::MemberAdded { conversation_id };
    state.registry.send_to_user(user_id, event.to_message()).await;
}
