use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dotenvy::dotenv;
use std::collections::HashSet;
use std::env;
use uuid::Uuid;

/// Denormalized conversation preview is truncated to this many characters.
pub const PREVIEW_MAX_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub encryption_master_key: [u8; 32],
    pub identity_hmac_secret: String,
    pub banned_user_ids: HashSet<Uuid>,
    pub edit_window_minutes: i64,
    pub typing_ttl_seconds: u64,
    pub tombstone_retention_days: i64,
    pub sweep_interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let master_key_b64 = env::var("MESSAGE_ENCRYPTION_MASTER_KEY").map_err(|_| {
            crate::error::AppError::Config("MESSAGE_ENCRYPTION_MASTER_KEY missing".into())
        })?;
        let master_key_bytes = STANDARD.decode(master_key_b64.trim()).map_err(|_| {
            crate::error::AppError::Config("MESSAGE_ENCRYPTION_MASTER_KEY invalid base64".into())
        })?;
        if master_key_bytes.len() != 32 {
            return Err(crate::error::AppError::Config(
                "MESSAGE_ENCRYPTION_MASTER_KEY must decode to 32 bytes".into(),
            ));
        }
        let mut encryption_master_key = [0u8; 32];
        encryption_master_key.copy_from_slice(&master_key_bytes);

        let identity_hmac_secret = env::var("IDENTITY_HMAC_SECRET")
            .map_err(|_| crate::error::AppError::Config("IDENTITY_HMAC_SECRET missing".into()))?;

        let banned_user_ids = env::var("BANNED_USER_IDS")
            .ok()
            .map(|v| Self::parse_uuid_list(&v))
            .unwrap_or_default();

        let edit_window_minutes = Self::env_i64("EDIT_WINDOW_MINUTES", 15);
        let typing_ttl_seconds = Self::env_i64("TYPING_TTL_SECONDS", 3) as u64;
        let tombstone_retention_days = Self::env_i64("TOMBSTONE_RETENTION_DAYS", 30);
        let sweep_interval_seconds = Self::env_i64("SWEEP_INTERVAL_SECONDS", 60) as u64;

        Ok(Self {
            database_url,
            port,
            encryption_master_key,
            identity_hmac_secret,
            banned_user_ids,
            edit_window_minutes,
            typing_ttl_seconds,
            tombstone_retention_days,
            sweep_interval_seconds,
        })
    }

    fn env_i64(name: &str, default: i64) -> i64 {
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn parse_uuid_list(value: &str) -> HashSet<Uuid> {
        value
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect()
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/test".into(),
            port: 3000,
            encryption_master_key: [0u8; 32],
            identity_hmac_secret: "test-secret".into(),
            banned_user_ids: HashSet::new(),
            edit_window_minutes: 15,
            typing_ttl_seconds: 3,
            tombstone_retention_days: 30,
            sweep_interval_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uuid_lists_and_skips_garbage() {
        let id = Uuid::new_v4();
        let parsed = Config::parse_uuid_list(&format!(" {} , not-a-uuid ,", id));
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains(&id));
    }

    #[test]
    fn test_defaults_are_self_consistent() {
        let cfg = Config::test_defaults();
        assert_eq!(cfg.edit_window_minutes, 15);
        assert_eq!(cfg.typing_ttl_seconds, 3);
        assert_eq!(cfg.tombstone_retention_days, 30);
    }
}
