use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use uuid::Uuid;

/// Out-of-band "deliver if offline" hook (push notification, email, ...).
/// Explicitly best-effort: failures here never surface as messaging
/// pipeline failures.
#[async_trait]
pub trait OfflineDelivery: Send + Sync {
    async fn deliver(&self, notification: &OfflineNotification) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct OfflineNotification {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    pub preview: String,
}

/// Default hook when no external provider is configured.
pub struct LogDelivery;

#[async_trait]
impl OfflineDelivery for LogDelivery {
    async fn deliver(&self, notification: &OfflineNotification) -> Result<(), String> {
        tracing::info!(
            user_id = %notification.user_id,
            conversation_id = %notification.conversation_id,
            "offline recipient; no push provider configured"
        );
        Ok(())
    }
}

/// Queue in front of the delivery hook so the send path only does a channel
/// send. The worker retries once, then drops and logs.
#[derive(Clone)]
pub struct PushQueue {
    tx: UnboundedSender<OfflineNotification>,
}

impl PushQueue {
    pub fn spawn(delivery: Arc<dyn OfflineDelivery>) -> Self {
        let (tx, mut rx) = unbounded_channel::<OfflineNotification>();
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if delivery.deliver(&notification).await.is_ok() {
                    continue;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                if let Err(e) = delivery.deliver(&notification).await {
                    tracing::warn!(
                        user_id = %notification.user_id,
                        error = %e,
                        "offline delivery dropped after retry"
                    );
                }
            }
        });
        Self { tx }
    }

    pub fn enqueue(&self, notification: OfflineNotification) {
        if self.tx.send(notification).is_err() {
            tracing::warn!("offline delivery queue closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct Recording {
        delivered: Mutex<Vec<OfflineNotification>>,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl OfflineDelivery for Recording {
        async fn deliver(&self, notification: &OfflineNotification) -> Result<(), String> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err("provider unavailable".into());
            }
            self.delivered.lock().await.push(notification.clone());
            Ok(())
        }
    }

    fn note() -> OfflineNotification {
        OfflineNotification {
            user_id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            preview: "hi".into(),
        }
    }

    #[tokio::test]
    async fn enqueued_notifications_reach_the_hook() {
        let recording = Arc::new(Recording {
            delivered: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(0),
        });
        let queue = PushQueue::spawn(recording.clone());
        let notification = note();
        queue.enqueue(notification.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let delivered = recording.delivered.lock().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].user_id, notification.user_id);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_is_retried() {
        let recording = Arc::new(Recording {
            delivered: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(1),
        });
        let queue = PushQueue::spawn(recording.clone());
        queue.enqueue(note());

        // Paused clock: advancing past the backoff runs the retry
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recording.delivered.lock().await.len(), 1);
    }
}
