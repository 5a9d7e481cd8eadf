use std::sync::Arc;
use std::time::Duration;

use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::error::AppResult;
use crate::metrics;
use crate::models::system_user_id;
use crate::services::encryption::{EncryptionService, EXPIRED_SENTINEL};

/// Periodic maintenance over the message store: force-tombstone expired
/// self-destructing messages, then hard-delete tombstones past retention.
/// Best-effort: individual row failures are logged and skipped, and both
/// passes are no-ops when re-run. Consumers see results on next fetch;
/// no real-time events are emitted.
/// `make_interval` takes an int4; retention saturates at its bounds rather
/// than wrapping, and never goes negative (a negative interval would purge
/// fresh tombstones).
fn clamp_retention_days(retention_days: i64) -> i32 {
    i32::try_from(retention_days.max(0)).unwrap_or(i32::MAX)
}

pub struct LifecycleSweeper {
    db: Pool<Postgres>,
    encryption: Arc<EncryptionService>,
}

impl LifecycleSweeper {
    pub fn new(db: Pool<Postgres>, encryption: Arc<EncryptionService>) -> Self {
        Self { db, encryption }
    }

    /// Soft-delete every expired, not-yet-deleted message with the system
    /// identity and the expired sentinel. Returns how many were tombstoned.
    pub async fn sweep_expired(&self) -> AppResult<u64> {
        let rows = sqlx::query(
            "SELECT id, conversation_id FROM messages \
             WHERE expires_at IS NOT NULL AND expires_at <= NOW() AND is_deleted = FALSE",
        )
        .fetch_all(&self.db)
        .await?;

        let mut count = 0u64;
        for row in rows {
            let message_id: Uuid = row.get("id");
            let conversation_id: Uuid = row.get("conversation_id");
            match self.tombstone_expired(message_id, conversation_id).await {
                Ok(true) => count += 1,
                Ok(false) => {} // raced with a user delete; nothing to do
                Err(e) => {
                    tracing::warn!(%message_id, error=%e, "failed to tombstone expired message");
                }
            }
        }
        metrics::record_sweeper_reaped("expired", count);
        Ok(count)
    }

    async fn tombstone_expired(&self, message_id: Uuid, conversation_id: Uuid) -> AppResult<bool> {
        let (ciphertext, nonce) = self
            .encryption
            .encrypt(conversation_id, EXPIRED_SENTINEL.as_bytes())?;
        let result = sqlx::query(
            "UPDATE messages SET content_encrypted = $1, content_nonce = $2, \
             is_deleted = TRUE, deleted_at = NOW(), deleted_by = $3 \
             WHERE id = $4 AND is_deleted = FALSE",
        )
        .bind(&ciphertext)
        .bind(&nonce[..])
        .bind(system_user_id())
        .bind(message_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Permanently remove tombstones older than the retention window.
    pub async fn purge_old_tombstones(&self, retention_days: i64) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM messages WHERE is_deleted = TRUE \
             AND deleted_at < NOW() - make_interval(days => $1)",
        )
        .bind(clamp_retention_days(retention_days))
        .execute(&self.db)
        .await?;
        let count = result.rows_affected();
        metrics::record_sweeper_reaped("purged", count);
        Ok(count)
    }

    pub fn spawn(
        self,
        interval_seconds: u64,
        retention_days: i64,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
            loop {
                interval.tick().await;
                let mut failed = false;
                match self.sweep_expired().await {
                    Ok(count) if count > 0 => {
                        tracing::info!(count, "tombstoned expired messages")
                    }
                    Ok(_) => {}
                    Err(e) => {
                        failed = true;
                        tracing::error!(error=%e, "expiry sweep failed");
                    }
                }
                match self.purge_old_tombstones(retention_days).await {
                    Ok(count) if count > 0 => {
                        tracing::info!(count, "purged old tombstones")
                    }
                    Ok(_) => {}
                    Err(e) => {
                        failed = true;
                        tracing::error!(error=%e, "tombstone purge failed");
                    }
                }
                metrics::record_sweeper_run(if failed { "error" } else { "success" });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_days_saturate_at_int4_bounds() {
        assert_eq!(clamp_retention_days(30), 30);
        assert_eq!(clamp_retention_days(0), 0);
        assert_eq!(clamp_retention_days(i64::from(i32::MAX)), i32::MAX);
        assert_eq!(clamp_retention_days(i64::from(i32::MAX) + 1), i32::MAX);
        assert_eq!(clamp_retention_days(-5), 0);
        assert_eq!(clamp_retention_days(i64::MIN), 0);
    }
}
