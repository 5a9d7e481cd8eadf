use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ConnectionId;

/// Transient fan-out groups: conversation id -> the connections currently
/// subscribed to it. Delivery is fire-and-forget; the durable store is the
/// delivery guarantee, a reconnecting client re-fetches history instead of
/// relying on replay.
#[derive(Default, Clone)]
pub struct RoomBroadcaster {
    rooms: Arc<RwLock<HashMap<Uuid, HashMap<ConnectionId, UnboundedSender<Message>>>>>,
    // reverse index so a closing connection can leave everything it joined
    memberships: Arc<RwLock<HashMap<ConnectionId, HashSet<Uuid>>>>,
}

impl RoomBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(
        &self,
        conversation_id: Uuid,
        connection_id: ConnectionId,
        sender: UnboundedSender<Message>,
    ) {
        {
            let mut rooms = self.rooms.write().await;
            rooms
                .entry(conversation_id)
                .or_default()
                .insert(connection_id, sender);
        }
        let mut memberships = self.memberships.write().await;
        memberships
            .entry(connection_id)
            .or_default()
            .insert(conversation_id);
    }

    pub async fn leave(&self, conversation_id: Uuid, connection_id: ConnectionId) {
        {
            let mut rooms = self.rooms.write().await;
            if let Some(room) = rooms.get_mut(&conversation_id) {
                room.remove(&connection_id);
                if room.is_empty() {
                    rooms.remove(&conversation_id);
                }
            }
        }
        let mut memberships = self.memberships.write().await;
        if let Some(joined) = memberships.get_mut(&connection_id) {
            joined.remove(&conversation_id);
            if joined.is_empty() {
                memberships.remove(&connection_id);
            }
        }
    }

    pub async fn leave_all(&self, connection_id: ConnectionId) {
        let joined = {
            let mut memberships = self.memberships.write().await;
            memberships.remove(&connection_id).unwrap_or_default()
        };
        let mut rooms = self.rooms.write().await;
        for conversation_id in joined {
            if let Some(room) = rooms.get_mut(&conversation_id) {
                room.remove(&connection_id);
                if room.is_empty() {
                    rooms.remove(&conversation_id);
                }
            }
        }
    }

    pub async fn is_joined(&self, conversation_id: Uuid, connection_id: ConnectionId) -> bool {
        let memberships = self.memberships.read().await;
        memberships
            .get(&connection_id)
            .is_some_and(|joined| joined.contains(&conversation_id))
    }

    pub async fn broadcast(
        &self,
        conversation_id: Uuid,
        msg: Message,
        exclude: Option<ConnectionId>,
    ) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(&conversation_id) {
            room.retain(|connection_id, sender| {
                if Some(*connection_id) == exclude {
                    return true;
                }
                sender.send(msg.clone()).is_ok()
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn broadcast_reaches_room_except_excluded() {
        let rooms = RoomBroadcaster::new();
        let conversation = Uuid::new_v4();
        let (a_tx, mut a_rx) = unbounded_channel();
        let (b_tx, mut b_rx) = unbounded_channel();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        rooms.join(conversation, a, a_tx).await;
        rooms.join(conversation, b, b_tx).await;

        rooms
            .broadcast(conversation, Message::Text("hi".into()), Some(a))
            .await;
        assert!(b_rx.recv().await.is_some());
        assert!(a_rx.try_recv().is_err());

        rooms
            .broadcast(conversation, Message::Text("all".into()), None)
            .await;
        assert!(a_rx.recv().await.is_some());
        assert!(b_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn leave_all_detaches_connection_from_every_room() {
        let rooms = RoomBroadcaster::new();
        let conv_a = Uuid::new_v4();
        let conv_b = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let (tx, mut rx) = unbounded_channel();

        rooms.join(conv_a, conn, tx.clone()).await;
        rooms.join(conv_b, conn, tx).await;
        assert!(rooms.is_joined(conv_a, conn).await);
        assert!(rooms.is_joined(conv_b, conn).await);

        rooms.leave_all(conn).await;
        assert!(!rooms.is_joined(conv_a, conn).await);
        assert!(!rooms.is_joined(conv_b, conn).await);

        rooms
            .broadcast(conv_a, Message::Text("gone".into()), None)
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_subscribers_are_pruned_on_broadcast() {
        let rooms = RoomBroadcaster::new();
        let conversation = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let (tx, rx) = unbounded_channel();
        drop(rx);

        rooms.join(conversation, conn, tx).await;
        rooms
            .broadcast(conversation, Message::Text("x".into()), None)
            .await;

        // Subscriber with a closed channel is gone from the room
        let guard = rooms.rooms.read().await;
        assert!(guard.get(&conversation).map_or(true, |r| r.is_empty()));
    }
}
