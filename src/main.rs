use std::sync::Arc;

use parley::services::encryption::EncryptionService;
use parley::services::identity::HmacIdentity;
use parley::services::push::{LogDelivery, PushQueue};
use parley::services::sweeper::LifecycleSweeper;
use parley::state::AppState;
use parley::websocket::presence::{spawn_typing_expiry, PresenceTracker};
use parley::websocket::rooms::RoomBroadcaster;
use parley::websocket::ConnectionRegistry;
use parley::{config, db, error, logging, migrations, routes};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let db = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    // Embedded migrations are idempotent; a schema mismatch is fatal
    migrations::run_all(&db)
        .await
        .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;

    let registry = ConnectionRegistry::new();
    let rooms = RoomBroadcaster::new();
    let presence = PresenceTracker::new();
    let encryption = Arc::new(EncryptionService::new(cfg.encryption_master_key));
    let identity = Arc::new(HmacIdentity::new(
        &cfg.identity_hmac_secret,
        cfg.banned_user_ids.clone(),
    ));
    let push = PushQueue::spawn(Arc::new(LogDelivery));

    let _typing_expiry = spawn_typing_expiry(presence.clone(), rooms.clone(), cfg.typing_ttl_seconds);
    let _sweeper = LifecycleSweeper::new(db.clone(), encryption.clone())
        .spawn(cfg.sweep_interval_seconds, cfg.tombstone_retention_days);

    let state = AppState {
        db,
        config: cfg.clone(),
        registry,
        rooms,
        presence,
        encryption,
        identity,
        push,
    };

    let app = routes::build_router().with_state(state);
    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting parley");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    Ok(())
}
