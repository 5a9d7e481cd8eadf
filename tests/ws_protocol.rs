//! Wire-shape and in-memory fan-out behavior of the websocket layer,
//! exercised without a live store.

use std::time::Duration;

use axum::extract::ws::Message;
use parley::websocket::message_types::{WsInbound, WsOutbound};
use parley::websocket::presence::{spawn_typing_expiry, PresenceTracker};
use parley::websocket::rooms::RoomBroadcaster;
use parley::websocket::ConnectionRegistry;
use tokio::sync::mpsc::unbounded_channel;
use uuid::Uuid;

fn as_json(msg: &Message) -> serde_json::Value {
    match msg {
        Message::Text(text) => serde_json::from_str(text).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[test]
fn inbound_vocabulary_round_trips() {
    let conversation = Uuid::new_v4();
    let samples = vec![
        serde_json::json!({"type": "authenticate", "token": "abc"}),
        serde_json::json!({"type": "join_conversation", "conversation_id": conversation}),
        serde_json::json!({
            "type": "send_message",
            "conversation_id": conversation,
            "content": "hi",
            "content_type": "media",
            "media_urls": ["https://cdn.example/a.png"],
        }),
        serde_json::json!({"type": "typing_start", "conversation_id": conversation}),
        serde_json::json!({"type": "typing_stop", "conversation_id": conversation}),
        serde_json::json!({
            "type": "mark_read",
            "conversation_id": conversation,
            "message_ids": [Uuid::new_v4()],
        }),
    ];
    for sample in samples {
        let parsed: Result<WsInbound, _> = serde_json::from_value(sample.clone());
        assert!(parsed.is_ok(), "failed to parse {sample}");
    }
}

#[test]
fn unknown_inbound_types_are_rejected() {
    let raw = serde_json::json!({"type": "upload_reaction", "emoji": "x"});
    assert!(serde_json::from_value::<WsInbound>(raw).is_err());
}

#[test]
fn error_events_name_the_category() {
    let evt = WsOutbound::Error {
        category: "authorization".into(),
        reason: "not a participant of this conversation".into(),
    };
    let value = as_json(&evt.to_message());
    assert_eq!(value["type"], "error");
    assert_eq!(value["category"], "authorization");
}

#[tokio::test]
async fn room_fanout_and_private_channel_work_together() {
    let registry = ConnectionRegistry::new();
    let rooms = RoomBroadcaster::new();
    let conversation = Uuid::new_v4();

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let (alice_tx, mut alice_rx) = unbounded_channel();
    let (bob_tx, mut bob_rx) = unbounded_channel();
    let alice_conn = Uuid::new_v4();
    let bob_conn = Uuid::new_v4();

    registry.register(alice, alice_conn, alice_tx.clone()).await;
    registry.register(bob, bob_conn, bob_tx.clone()).await;
    rooms.join(conversation, alice_conn, alice_tx).await;
    rooms.join(conversation, bob_conn, bob_tx).await;

    // Room broadcast excluding the sender's connection
    let typing = WsOutbound::UserTyping {
        conversation_id: conversation,
        user_id: alice,
        is_typing: true,
    };
    rooms
        .broadcast(conversation, typing.to_message(), Some(alice_conn))
        .await;
    let seen = as_json(&bob_rx.recv().await.unwrap());
    assert_eq!(seen["type"], "user_typing");
    assert!(alice_rx.try_recv().is_err());

    // Out-of-band event on bob's private channel only
    let added = WsOutbound::MemberAdded {
        conversation_id: Uuid::new_v4(),
    };
    registry.send_to_user(bob, added.to_message()).await;
    let seen = as_json(&bob_rx.recv().await.unwrap());
    assert_eq!(seen["type"], "member_added");
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn abandoned_typing_state_expires_for_recipients() {
    let presence = PresenceTracker::new();
    let rooms = RoomBroadcaster::new();
    let conversation = Uuid::new_v4();
    let typer = Uuid::new_v4();

    let (watcher_tx, mut watcher_rx) = unbounded_channel();
    rooms.join(conversation, Uuid::new_v4(), watcher_tx).await;

    // Typer sets the flag and then silently drops: no explicit stop
    presence.set_typing(conversation, typer, true).await;
    let _task = spawn_typing_expiry(presence.clone(), rooms.clone(), 3);

    tokio::time::sleep(Duration::from_secs(5)).await;

    let seen = as_json(&watcher_rx.recv().await.unwrap());
    assert_eq!(seen["type"], "user_typing");
    assert_eq!(seen["user_id"], typer.to_string());
    assert_eq!(seen["is_typing"], false);
    assert!(!presence.is_typing(conversation, typer).await);
}
