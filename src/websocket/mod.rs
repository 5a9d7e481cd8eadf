use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use uuid::Uuid;

pub mod handlers;
pub mod message_types;
pub mod presence;
pub mod rooms;

pub type ConnectionId = Uuid;

/// In-memory map from user identity to that user's live connections.
/// A user may hold several at once (multi-device); the last one going away
/// transitions them to offline. Lock is held only for the map mutation,
/// never across I/O.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, HashMap<ConnectionId, UnboundedSender<Message>>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        user_id: Uuid,
        connection_id: ConnectionId,
        sender: UnboundedSender<Message>,
    ) {
        let mut guard = self.inner.write().await;
        guard.entry(user_id).or_default().insert(connection_id, sender);
    }

    /// Returns true if this was the user's last connection.
    pub async fn unregister(&self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut guard = self.inner.write().await;
        if let Some(connections) = guard.get_mut(&user_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                guard.remove(&user_id);
                return true;
            }
        }
        false
    }

    pub async fn connections_for(&self, user_id: Uuid) -> Vec<ConnectionId> {
        let guard = self.inner.read().await;
        guard
            .get(&user_id)
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        guard.get(&user_id).is_some_and(|c| !c.is_empty())
    }

    /// Private per-user channel: deliver to every device of one user.
    /// Dead senders are pruned on the way.
    pub async fn send_to_user(&self, user_id: Uuid, msg: Message) {
        let mut guard = self.inner.write().await;
        if let Some(connections) = guard.get_mut(&user_id) {
            connections.retain(|_, sender| sender.send(msg.clone()).is_ok());
            if connections.is_empty() {
                guard.remove(&user_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn multi_device_online_until_last_unregister() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (phone_tx, _phone_rx) = unbounded_channel();
        let (laptop_tx, _laptop_rx) = unbounded_channel();
        let phone = Uuid::new_v4();
        let laptop = Uuid::new_v4();

        registry.register(user, phone, phone_tx).await;
        registry.register(user, laptop, laptop_tx).await;
        assert!(registry.is_online(user).await);
        assert_eq!(registry.connections_for(user).await.len(), 2);

        assert!(!registry.unregister(user, phone).await);
        assert!(registry.is_online(user).await);

        assert!(registry.unregister(user, laptop).await);
        assert!(!registry.is_online(user).await);
        assert!(registry.connections_for(user).await.is_empty());
    }

    #[tokio::test]
    async fn send_to_user_reaches_all_devices_and_prunes_dead_ones() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (alive_tx, mut alive_rx) = unbounded_channel();
        let (dead_tx, dead_rx) = unbounded_channel();
        drop(dead_rx);

        registry.register(user, Uuid::new_v4(), alive_tx).await;
        registry.register(user, Uuid::new_v4(), dead_tx).await;

        registry.send_to_user(user, Message::Text("ping".into())).await;
        assert!(alive_rx.recv().await.is_some());
        assert_eq!(registry.connections_for(user).await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_user_is_offline() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.is_online(Uuid::new_v4()).await);
    }
}
