use std::sync::Arc;

use sqlx::{Pool, Postgres};

use crate::config::Config;
use crate::services::encryption::EncryptionService;
use crate::services::identity::IdentityProvider;
use crate::services::push::PushQueue;
use crate::websocket::presence::PresenceTracker;
use crate::websocket::rooms::RoomBroadcaster;
use crate::websocket::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub config: Arc<Config>,
    pub registry: ConnectionRegistry,
    pub rooms: RoomBroadcaster,
    pub presence: PresenceTracker,
    pub encryption: Arc<EncryptionService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub push: PushQueue,
}
