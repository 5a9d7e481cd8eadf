use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::state::AppState;
use crate::websocket::handlers::ws_handler;

pub mod conversations;
pub mod messages;

use conversations::{
    add_member, create_conversation, create_group_conversation, delete_conversation,
    leave_conversation, list_conversations, mark_read,
};
use messages::{delete_message, get_message_history, get_receipts, update_message};

pub fn build_router() -> Router<AppState> {
    let api_v1 = Router::new()
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route("/conversations/groups", post(create_group_conversation))
        .route("/conversations/:id", delete(delete_conversation))
        .route("/conversations/:id/leave", post(leave_conversation))
        .route("/conversations/:id/members", post(add_member))
        .route("/conversations/:id/read", post(mark_read))
        .route("/conversations/:id/messages", get(get_message_history))
        .route(
            "/conversations/:id/messages/:message_id",
            put(update_message).delete(delete_message),
        )
        .route(
            "/conversations/:id/messages/:message_id/receipts",
            get(get_receipts),
        );

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .route("/ws", get(ws_handler))
        .nest("/api/v1", api_v1)
        .layer(axum::middleware::from_fn(crate::metrics::track_http_metrics))
}
