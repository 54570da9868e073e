//! Runtime configuration of the relay.

use std::time::Duration;

use crate::auth::TokenTtls;
use crate::notifications::PushGatewayConfig;

/// Interval between liveness pings on every socket.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("token signing secret must not be empty")]
    EmptySecret,

    #[error("ping interval must be greater than zero")]
    ZeroPingInterval,
}

/// Everything the relay needs besides its database.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub jwt_secret: String,
    pub token_ttls: TokenTtls,
    pub ping_interval: Duration,
    /// `None` disables push delivery.
    pub push_gateway: Option<PushGatewayConfig>,
}

impl RelayConfig {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttls: TokenTtls::default(),
            ping_interval: DEFAULT_PING_INTERVAL,
            push_gateway: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.ping_interval.is_zero() {
            return Err(ConfigError::ZeroPingInterval);
        }
        Ok(())
    }
}
