use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::guards::User;
use crate::models::message::MessageDelivery;
use crate::models::receipt::ReadReceipt;
use crate::services::message_service::MessageService;
use crate::services::receipt_service::ReceiptService;
use crate::state::AppState;
use crate::websocket::message_types::WsOutbound;

#[derive(Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Deserialize)]
pub struct UpdateMessageRequest {
    pub content: String,
}

/// Durable history is the delivery guarantee: a reconnecting client
/// re-fetches here instead of relying on broadcast replay.
pub async fn get_message_history(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<Vec<MessageDelivery>>> {
    let messages =
        MessageService::history(&state.db, &state.encryption, id, user.id, params.limit).await?;
    Ok(Json(messages))
}

pub async fn get_receipts(
    State(state): State<AppState>,
    user: User,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Vec<ReadReceipt>>> {
    let receipts = ReceiptService::receipts_for(&state.db, user.id, id, message_id).await?;
    Ok(Json(receipts))
}

pub async fn update_message(
    State(state): State<AppState>,
    user: User,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateMessageRequest>,
) -> AppResult<Json<MessageDelivery>> {
    let delivery = MessageService::edit(
        &state.db,
        &state.encryption,
        id,
        message_id,
        user.id,
        &body.content,
        state.config.edit_window_minutes,
    )
    .await?;
    let event = WsOutbound::MessageEdited {
        conversation_id: delivery.conversation_id,
        message: delivery.clone(),
    };
    state
        .rooms
        .broadcast(delivery.conversation_id, event.to_message(), None)
        .await;
    Ok(Json(delivery))
}

pub async fn delete_message(
    State(state): State<AppState>,
    user: User,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    MessageService::soft_delete(&state.db, &state.encryption, id, message_id, user.id).await?;
    let event = WsOutbound::MessageDeleted {
        conversation_id: id,
        message_id,
        deleted_by: user.id,
    };
    state
        .rooms
        .broadcast(id, event.to_message(), None)
        .await;
    Ok(StatusCode::NO_CONTENT)
}
