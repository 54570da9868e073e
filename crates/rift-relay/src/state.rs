//! Shared handles passed to every HTTP route and socket driver.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenService;
use crate::config::{ConfigError, RelayConfig};
use crate::notifications::{
    HttpPushGateway, NoopPushGateway, NotificationDispatcher, NotificationError,
    NotificationService, PushGateway,
};
use crate::registry::RelayRegistry;
use crate::storage::RelayDatabase;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

#[derive(Clone)]
pub struct AppState {
    pub db: RelayDatabase,
    pub tokens: Arc<TokenService>,
    pub registry: Arc<RelayRegistry>,
    pub notifications: Arc<NotificationService>,
    pub ping_interval: Duration,
}

impl AppState {
    /// Wire up the relay from its configuration.
    ///
    /// Must be called inside a Tokio runtime: it spawns the clear worker.
    pub fn new(db: RelayDatabase, config: &RelayConfig) -> Result<Self, StartupError> {
        config.validate()?;

        let gateway: Arc<dyn PushGateway> = match &config.push_gateway {
            Some(gateway) => Arc::new(HttpPushGateway::new(gateway.clone())?),
            None => Arc::new(NoopPushGateway),
        };

        Ok(Self::with_gateway(db, config, gateway))
    }

    /// Same as [`AppState::new`] with an explicit push gateway.
    pub fn with_gateway(
        db: RelayDatabase,
        config: &RelayConfig,
        gateway: Arc<dyn PushGateway>,
    ) -> Self {
        let tokens = Arc::new(TokenService::with_ttls(
            config.jwt_secret.as_bytes(),
            config.token_ttls,
        ));
        let dispatcher = NotificationDispatcher::new(db.clone(), Arc::clone(&tokens), gateway);
        let notifications = Arc::new(NotificationService::start(db.clone(), dispatcher));

        Self {
            db,
            tokens,
            registry: Arc::new(RelayRegistry::new()),
            notifications,
            ping_interval: config.ping_interval,
        }
    }
}
