//! Notification Dispatcher.
//!
//! Delivers ready-check / game-started / clear pushes to every device
//! subscribed to a code, and follows each alert with an automatic clear:
//! - [`PushGateway`] is the outbound seam to the APNs/FCM gateway
//! - [`NotificationDispatcher`] resolves targets and builds the messages
//! - [`ClearScheduler`] holds the pending delayed clears
//! - [`NotificationService`] ties them together for the relay and HTTP layers

pub mod dispatcher;
pub mod gateway;
pub mod scheduler;
pub mod service;

pub use dispatcher::NotificationDispatcher;
pub use gateway::{
    AndroidAlert, HttpPushGateway, IosAlert, NoopPushGateway, PushGateway, PushGatewayConfig,
    PushMessage,
};
pub use scheduler::{ClearJob, ClearScheduler};
pub use service::{NotificationService, SubscribeOutcome};

/// Errors that can occur in the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// The push gateway client could not be built.
    #[error("Push gateway configuration error: {0}")]
    Config(String),

    /// HTTP request to the push gateway failed.
    #[error("Push gateway request error: {0}")]
    Request(String),

    /// The push gateway returned a non-success status code.
    #[error("Push gateway error (status {status}): {body}")]
    Gateway { status: u16, body: String },

    /// A notification context could not be turned into push data.
    #[error("Invalid notification context: {0}")]
    Context(String),

    /// Minting the instant-response token failed.
    #[error("Token error: {0}")]
    Token(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<rift_core::db::DatabaseError> for NotificationError {
    fn from(e: rift_core::db::DatabaseError) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<crate::auth::TokenError> for NotificationError {
    fn from(e: crate::auth::TokenError) -> Self {
        Self::Token(e.to_string())
    }
}
