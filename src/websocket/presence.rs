use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use super::message_types::WsOutbound;
use super::rooms::RoomBroadcaster;

/// Ephemeral typing state. The server-side deadline is the canonical source
/// of "stopped typing": a client that vanishes mid-type is cleared by the
/// supervising expiry task, not by anything the client sends.
#[derive(Default, Clone)]
pub struct PresenceTracker {
    typing: Arc<RwLock<HashMap<(Uuid, Uuid), Instant>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the observable state changed (start of typing, or
    /// an explicit stop while marked typing); refreshes only bump the
    /// deadline.
    pub async fn set_typing(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) -> bool {
        let mut typing = self.typing.write().await;
        if is_typing {
            typing
                .insert((conversation_id, user_id), Instant::now())
                .is_none()
        } else {
            typing.remove(&(conversation_id, user_id)).is_some()
        }
    }

    pub async fn is_typing(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        let typing = self.typing.read().await;
        typing.contains_key(&(conversation_id, user_id))
    }

    /// Drop every typing flag for a disconnecting user, returning the
    /// conversations that need a synthetic stop event.
    pub async fn clear_user(&self, user_id: Uuid) -> Vec<Uuid> {
        let mut typing = self.typing.write().await;
        let stale: Vec<Uuid> = typing
            .keys()
            .filter(|(_, u)| *u == user_id)
            .map(|(c, _)| *c)
            .collect();
        typing.retain(|(_, u), _| *u != user_id);
        stale
    }

    /// Remove entries older than `ttl`, returning the cleared pairs.
    pub async fn expire_stale(&self, ttl: Duration) -> Vec<(Uuid, Uuid)> {
        let now = Instant::now();
        let mut typing = self.typing.write().await;
        let expired: Vec<(Uuid, Uuid)> = typing
            .iter()
            .filter(|(_, started)| now.duration_since(**started) >= ttl)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            typing.remove(key);
        }
        expired
    }
}

/// One supervising task expires all typing state, instead of a timer per
/// (conversation, user) pair.
pub fn spawn_typing_expiry(
    presence: PresenceTracker,
    rooms: RoomBroadcaster,
    ttl_seconds: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let ttl = Duration::from_secs(ttl_seconds);
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            for (conversation_id, user_id) in presence.expire_stale(ttl).await {
                let event = WsOutbound::UserTyping {
                    conversation_id,
                    user_id,
                    is_typing: false,
                };
                rooms
                    .broadcast(conversation_id, event.to_message(), None)
                    .await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refresh_does_not_double_report() {
        let presence = PresenceTracker::new();
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();

        assert!(presence.set_typing(conv, user, true).await);
        assert!(!presence.set_typing(conv, user, true).await);
        assert!(presence.is_typing(conv, user).await);

        assert!(presence.set_typing(conv, user, false).await);
        assert!(!presence.set_typing(conv, user, false).await);
    }

    #[tokio::test]
    async fn stale_entries_expire_without_an_explicit_stop() {
        let presence = PresenceTracker::new();
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();
        presence.set_typing(conv, user, true).await;

        // Zero TTL: everything is already stale
        let expired = presence.expire_stale(Duration::from_secs(0)).await;
        assert_eq!(expired, vec![(conv, user)]);
        assert!(!presence.is_typing(conv, user).await);

        // Re-running the expiry is a no-op
        assert!(presence.expire_stale(Duration::from_secs(0)).await.is_empty());
    }

    #[tokio::test]
    async fn fresh_entries_survive_expiry() {
        let presence = PresenceTracker::new();
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();
        presence.set_typing(conv, user, true).await;

        assert!(presence.expire_stale(Duration::from_secs(60)).await.is_empty());
        assert!(presence.is_typing(conv, user).await);
    }

    #[tokio::test]
    async fn clear_user_reports_affected_conversations() {
        let presence = PresenceTracker::new();
        let user = Uuid::new_v4();
        let conv_a = Uuid::new_v4();
        let conv_b = Uuid::new_v4();
        presence.set_typing(conv_a, user, true).await;
        presence.set_typing(conv_b, user, true).await;
        presence.set_typing(conv_a, Uuid::new_v4(), true).await;

        let mut cleared = presence.clear_user(user).await;
        cleared.sort();
        let mut expected = vec![conv_a, conv_b];
        expected.sort();
        assert_eq!(cleared, expected);
    }
}
