use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::services::conversation_service::ConversationService;
use crate::services::message_service::{preview_of, MessageService};
use crate::services::push::OfflineNotification;
use crate::services::receipt_service::ReceiptService;
use crate::state::AppState;
use crate::websocket::message_types::{WsInbound, WsOutbound};
use crate::websocket::ConnectionId;

/// Per-connection mutable state, owned by the connection task. The shared
/// structures only ever hold the opaque connection id.
struct Session {
    connection_id: ConnectionId,
    user_id: Option<Uuid>,
}

impl Session {
    fn authenticated(&self) -> AppResult<Uuid> {
        self.user_id.ok_or(AppError::Unauthorized)
    }
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    metrics::ws_connection_opened();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = unbounded_channel::<Message>();
    let mut session = Session {
        connection_id: Uuid::new_v4(),
        user_id: None,
    };

    loop {
        tokio::select! {
            // Events queued for this connection (broadcasts, acks)
            maybe = rx.recv() => {
                match maybe {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Events arriving from the client
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, &mut session, &tx, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong handled by axum
                    Some(Err(_)) => break,
                }
            }
        }
    }

    cleanup(&state, &session).await;
    metrics::ws_connection_closed();
}

async fn handle_text(
    state: &AppState,
    session: &mut Session,
    tx: &UnboundedSender<Message>,
    text: &str,
) {
    let event = match serde_json::from_str::<WsInbound>(text) {
        Ok(event) => event,
        Err(_) => {
            send(tx, &WsOutbound::Error {
                category: "invalid".into(),
                reason: "malformed event".into(),
            });
            return;
        }
    };

    // Failures are structured rejections to the originating connection
    // only; nothing is ever broadcast for a failed operation.
    if let Err(e) = dispatch(state, session, tx, event).await {
        send(tx, &WsOutbound::Error {
            category: e.category().into(),
            reason: e.to_string(),
        });
    }
}

async fn dispatch(
    state: &AppState,
    session: &mut Session,
    tx: &UnboundedSender<Message>,
    event: WsInbound,
) -> AppResult<()> {
    match event {
        WsInbound::Authenticate { token } => handle_authenticate(state, session, tx, &token).await,
        WsInbound::JoinConversation { conversation_id } => {
            handle_join(state, session, tx, conversation_id).await
        }
        WsInbound::SendMessage {
            conversation_id,
            content,
            content_type,
            media_urls,
        } => {
            handle_send(
                state,
                session,
                tx,
                conversation_id,
                &content,
                content_type.as_deref().unwrap_or("text"),
                media_urls,
            )
            .await
        }
        WsInbound::TypingStart { conversation_id } => {
            handle_typing(state, session, conversation_id, true).await
        }
        WsInbound::TypingStop { conversation_id } => {
            handle_typing(state, session, conversation_id, false).await
        }
        WsInbound::MarkRead {
            conversation_id,
            message_ids,
        } => {
            let user_id = session.authenticated()?;
            let count =
                ReceiptService::mark_read(&state.db, user_id, conversation_id, &message_ids).await?;
            send(tx, &WsOutbound::ReadAck {
                conversation_id,
                count,
            });
            Ok(())
        }
    }
}

/// Authentication failures keep the connection open; only operations that
/// need an identity are rejected.
async fn handle_authenticate(
    state: &AppState,
    session: &mut Session,
    tx: &UnboundedSender<Message>,
    token: &str,
) -> AppResult<()> {
    if session.user_id.is_some() {
        return Err(AppError::BadRequest("already authenticated".into()));
    }
    let user_id = match state.identity.resolve_identity(token).await? {
        Some(user_id) => user_id,
        None => {
            send(tx, &WsOutbound::AuthenticationError {
                reason: "invalid identity proof".into(),
            });
            return Ok(());
        }
    };
    if state.identity.is_banned(user_id).await? {
        send(tx, &WsOutbound::AuthenticationError {
            reason: "account suspended".into(),
        });
        return Ok(());
    }

    session.user_id = Some(user_id);
    state
        .registry
        .register(user_id, session.connection_id, tx.clone())
        .await;

    // Subscribe this device to every conversation the user participates in
    for conversation_id in ConversationService::conversation_ids_for(&state.db, user_id).await? {
        state
            .rooms
            .join(conversation_id, session.connection_id, tx.clone())
            .await;
    }

    send(tx, &WsOutbound::Authenticated { user_id });
    Ok(())
}

async fn handle_join(
    state: &AppState,
    session: &Session,
    tx: &UnboundedSender<Message>,
    conversation_id: Uuid,
) -> AppResult<()> {
    let user_id = session.authenticated()?;
    ConversationService::get(&state.db, conversation_id).await?;
    if !ConversationService::is_member(&state.db, conversation_id, user_id).await? {
        return Err(AppError::Forbidden(
            "not a participant of this conversation".into(),
        ));
    }
    state
        .rooms
        .join(conversation_id, session.connection_id, tx.clone())
        .await;
    send(tx, &WsOutbound::JoinedConversation { conversation_id });
    Ok(())
}

async fn handle_send(
    state: &AppState,
    session: &Session,
    tx: &UnboundedSender<Message>,
    conversation_id: Uuid,
    content: &str,
    content_type: &str,
    media_urls: Option<Vec<String>>,
) -> AppResult<()> {
    let sender_id = session.authenticated()?;
    let delivery = MessageService::send(
        &state.db,
        &state.encryption,
        conversation_id,
        sender_id,
        content,
        content_type,
        media_urls,
    )
    .await?;
    metrics::record_message_sent();

    let event = WsOutbound::NewMessage {
        conversation_id,
        message: delivery.clone(),
    };
    // Fan out only after the transaction committed; the sender gets the
    // same payload as everyone else, as its acknowledgment. Delivery order
    // matches commit order per sender task; two senders racing on one
    // conversation may fan out in the opposite order from their commits,
    // and clients reconcile against `created_at` order in history.
    state
        .rooms
        .broadcast(conversation_id, event.to_message(), Some(session.connection_id))
        .await;
    send(tx, &event);

    notify_offline_participants(state, conversation_id, sender_id, &delivery.content).await;
    Ok(())
}

/// Recipients with zero live connections get a hand-off to the offline
/// delivery queue; failures there never affect the send.
async fn notify_offline_participants(
    state: &AppState,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: &str,
) {
    let participants = match ConversationService::participants_of(&state.db, conversation_id).await
    {
        Ok(participants) => participants,
        Err(e) => {
            tracing::warn!(error=%e, "failed to load participants for offline notify");
            return;
        }
    };
    for user_id in participants {
        if user_id == sender_id || state.registry.is_online(user_id).await {
            continue;
        }
        state.push.enqueue(OfflineNotification {
            user_id,
            conversation_id,
            preview: preview_of(content),
        });
    }
}

async fn handle_typing(
    state: &AppState,
    session: &Session,
    conversation_id: Uuid,
    is_typing: bool,
) -> AppResult<()> {
    let user_id = session.authenticated()?;
    // Room membership implies conversation membership; both were checked
    // when the room was joined.
    if !state
        .rooms
        .is_joined(conversation_id, session.connection_id)
        .await
    {
        return Err(AppError::Forbidden(
            "not joined to this conversation".into(),
        ));
    }
    let changed = state
        .presence
        .set_typing(conversation_id, user_id, is_typing)
        .await;
    if changed || is_typing {
        let event = WsOutbound::UserTyping {
            conversation_id,
            user_id,
            is_typing,
        };
        state
            .rooms
            .broadcast(conversation_id, event.to_message(), Some(session.connection_id))
            .await;
    }
    Ok(())
}

async fn cleanup(state: &AppState, session: &Session) {
    state.rooms.leave_all(session.connection_id).await;
    if let Some(user_id) = session.user_id {
        let went_offline = state
            .registry
            .unregister(user_id, session.connection_id)
            .await;
        if went_offline {
            // Last device gone: any typing flags are cleared immediately
            // rather than waiting out the TTL.
            for conversation_id in state.presence.clear_user(user_id).await {
                let event = WsOutbound::UserTyping {
                    conversation_id,
                    user_id,
                    is_typing: false,
                };
                state
                    .rooms
                    .broadcast(conversation_id, event.to_message(), None)
                    .await;
            }
        }
    }
}

fn send(tx: &UnboundedSender<Message>, event: &WsOutbound) {
    let _ = tx.send(event.to_message());
}
